//! Drives the gateway protocol for a deal: create a session, take the
//! authorization callback, approve, and reconcile the result into the deal
//! and its owner's usage counters. Cancel is the compensating action.

use crate::config::{GatewayConfig, RetryConfig};
use crate::domain::deal::{Actor, Deal, DealStatus, PaymentOutcome, StatusChange};
use crate::domain::money::Money;
use crate::domain::payment::{
    ApprovePaymentRequest, AuthCallbackData, BillingPaymentRequest, CARD_VERIFICATION_AMOUNT,
    CancelPaymentRequest, CreatePaymentRequest, Device, GatewayEnvelope, GatewayResult,
    GatewayTrxStatus, ResultClass, ShopValueInfo,
};
use crate::domain::ports::{DynDealStore, DynPaymentGateway, DynUserStore};
use crate::domain::user::User;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use std::future::Future;
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Settle attempts before a persistent version race is reported.
const MAX_SETTLE_ATTEMPTS: u32 = 5;

/// A payment page opened for a deal.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub did: String,
    pub track_id: String,
    pub trx_id: String,
    pub auth_page_url: String,
    pub amount: Money,
}

#[derive(Debug, Clone)]
pub struct Approval {
    pub deal: Deal,
    pub outcome: PaymentOutcome,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub deal: Deal,
    pub gateway_status: Option<GatewayTrxStatus>,
    /// Set when this poll settled the payment.
    pub outcome: Option<PaymentOutcome>,
}

#[derive(Debug, Clone)]
pub struct Refund {
    pub deal: Deal,
    pub refund_trx_id: String,
    pub amount: Money,
    pub remaining: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardVerification {
    pub charge_trx_id: String,
    pub cancel_trx_id: String,
}

/// Payment gateway orchestrator.
///
/// No store lock is held across a gateway call: sequence numbers are
/// persisted first, the gateway is called, then the outcome is written with a
/// version-checked update.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    deals: DynDealStore,
    users: DynUserStore,
    gateway: DynPaymentGateway,
    retry: RetryConfig,
    return_url: String,
    webhook_secret: Option<String>,
}

impl PaymentOrchestrator {
    pub fn new(
        deals: DynDealStore,
        users: DynUserStore,
        gateway: DynPaymentGateway,
        config: &GatewayConfig,
        return_url: impl Into<String>,
    ) -> Self {
        Self {
            deals,
            users,
            gateway,
            retry: config.retry.clone(),
            return_url: return_url.into(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn load(&self, did: &str) -> Result<Deal> {
        self.deals
            .get(did)
            .await?
            .ok_or_else(|| PaymentError::not_found("Deal", did))
    }

    async fn user(&self, uid: &str) -> Result<User> {
        self.users
            .get(uid)
            .await?
            .ok_or_else(|| PaymentError::not_found("User", uid))
    }

    /// Runs a gateway call, retrying only retryable result codes with
    /// exponential backoff. `call` receives the 1-based attempt number so
    /// create and cancel can derive a fresh reference per attempt.
    async fn call_gateway<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call(attempt).await {
                Ok(value) => {
                    debug!(operation, attempt, "Gateway call succeeded");
                    return Ok(value);
                }
                Err(failure) => match failure.code.classify() {
                    ResultClass::Retryable if attempt < max_attempts => {
                        let delay = self.retry.delay_for(attempt);
                        warn!(
                            operation,
                            attempt,
                            code = %failure.code,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable gateway failure"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    ResultClass::Retryable => {
                        error!(operation, attempt, code = %failure.code, "Gateway unavailable");
                        return Err(PaymentError::GatewayUnavailable {
                            code: failure.code.to_string(),
                            attempts: attempt,
                        });
                    }
                    ResultClass::Fatal | ResultClass::Success => {
                        warn!(
                            operation,
                            code = %failure.code,
                            gateway_message = %failure.message,
                            "Gateway declined"
                        );
                        return Err(PaymentError::GatewayDeclined {
                            message: failure.code.user_message(),
                            code: failure.code.to_string(),
                        });
                    }
                },
            }
        }
    }

    /// Reads, mutates and writes a deal until the write wins the version
    /// check. Domain errors from `mutate` are returned as-is.
    async fn update_deal<R>(
        &self,
        did: &str,
        mut mutate: impl FnMut(&mut Deal) -> Result<R>,
    ) -> Result<(Deal, R)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut deal = self.load(did).await?;
            let result = mutate(&mut deal)?;
            match self.deals.update(deal).await {
                Ok(stored) => return Ok((stored, result)),
                Err(PaymentError::ConcurrentModification(reason))
                    if attempt < MAX_SETTLE_ATTEMPTS =>
                {
                    debug!(did, attempt, %reason, "Retrying deal update after version race");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Opens a gateway session for an unpaid deal in `awaiting_payment`.
    pub async fn start_checkout(&self, uid: &str, did: &str, device: Device) -> Result<CheckoutSession> {
        let deal = self.load(did).await?;
        if deal.uid != uid {
            return Err(PaymentError::Forbidden(format!(
                "deal {did} belongs to another account"
            )));
        }
        deal.ensure_awaiting_payment()?;
        let user = self.user(uid).await?;
        user.ensure_can_transact()?;
        user.ensure_within_limit(deal.final_amount)?;

        // The sequence is persisted before calling out so references are
        // never reused, even when this process dies mid-call.
        let (deal, seq) = self
            .update_deal(did, |d| {
                d.ensure_awaiting_payment()?;
                d.checkout_count += 1;
                Ok(d.checkout_count)
            })
            .await?;

        let gateway = &self.gateway;
        let return_url = &self.return_url;
        let amount = deal.final_amount;
        let data = self
            .call_gateway("create", |attempt| {
                let request = CreatePaymentRequest {
                    track_id: format!("{did}_P{seq:02}_{attempt}"),
                    amount,
                    return_url: return_url.clone(),
                    goods_name: deal.deal_name.clone(),
                    payer_name: user.name.clone(),
                    payer_email: user.email.clone().unwrap_or_default(),
                    payer_tel: user.phone.clone(),
                    device,
                    shop_value_info: Some(ShopValueInfo {
                        value1: Some(did.to_string()),
                        value2: Some(uid.to_string()),
                        value3: None,
                    }),
                };
                async move { gateway.create(&request).await }
            })
            .await?;

        let now = Utc::now();
        self.update_deal(did, |d| d.begin_checkout(&data.track_id, &data.trx_id, now))
            .await?;
        info!(did, track_id = %data.track_id, trx_id = %data.trx_id, %amount, "Checkout session opened");

        Ok(CheckoutSession {
            did: did.to_string(),
            track_id: data.track_id,
            trx_id: data.trx_id,
            auth_page_url: data.auth_page_url,
            amount,
        })
    }

    /// Checks the callback signature when a webhook secret is configured.
    pub fn verify_callback_signature(&self, payload: &str, signature: Option<&str>) -> Result<()> {
        let Some(secret) = &self.webhook_secret else {
            return Ok(());
        };
        let signature = signature
            .ok_or_else(|| PaymentError::Unauthorized("missing callback signature".to_string()))?;
        let expected = hex::decode(signature)
            .map_err(|_| PaymentError::Unauthorized("malformed callback signature".to_string()))?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| PaymentError::internal(e.to_string()))?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| PaymentError::Unauthorized("invalid callback signature".to_string()))
    }

    /// Handles the raw authorization callback. The callback only signals
    /// that the cardholder authenticated; money moves at approval.
    pub async fn handle_callback(&self, payload: &str, signature: Option<&str>) -> Result<Approval> {
        self.verify_callback_signature(payload, signature)?;
        let envelope: GatewayEnvelope<AuthCallbackData> = serde_json::from_str(payload)?;
        let data = envelope.into_result().map_err(|failure| {
            PaymentError::GatewayDeclined {
                message: failure.code.user_message(),
                code: failure.code.to_string(),
            }
        })?;
        self.handle_authorization(data).await
    }

    /// Resolves the deal from the echoed merchant fields, falling back to the
    /// session's track id.
    pub async fn handle_authorization(&self, callback: AuthCallbackData) -> Result<Approval> {
        let echoed = callback
            .shop_value_info
            .as_ref()
            .and_then(|info| info.value1.clone());
        let did = match echoed {
            Some(did) => did,
            None => {
                let track_id = callback.track_id.as_deref().ok_or_else(|| {
                    PaymentError::Validation("callback carries no deal reference".to_string())
                })?;
                self.deals
                    .find_by_track_id(track_id)
                    .await?
                    .map(|deal| deal.did)
                    .ok_or_else(|| PaymentError::not_found("Deal", track_id))?
            }
        };
        self.approve(&did, &callback.trx_id, &callback.authorization_id, callback.amount)
            .await
    }

    /// Approves an authorized payment and settles it into the deal.
    ///
    /// Re-delivery of an approval already applied is answered from the deal
    /// without touching the gateway or the owner's counters.
    pub async fn approve(
        &self,
        did: &str,
        trx_id: &str,
        authorization_id: &str,
        amount: Money,
    ) -> Result<Approval> {
        let deal = self.load(did).await?;
        if deal.is_paid && deal.pg_transaction_id.as_deref() == Some(trx_id) {
            info!(did, trx_id, "Duplicate approval ignored");
            return Ok(Approval {
                deal,
                outcome: PaymentOutcome::AlreadyApplied,
            });
        }
        deal.ensure_awaiting_payment()?;
        if amount != deal.final_amount {
            return Err(PaymentError::Validation(format!(
                "authorized amount {amount} does not match payable amount {}",
                deal.final_amount
            )));
        }

        let request = ApprovePaymentRequest {
            trx_id: trx_id.to_string(),
            amount,
            authorization_id: authorization_id.to_string(),
        };
        let gateway = &self.gateway;
        let request = &request;
        let approved = self
            .call_gateway("approve", |_| async move { gateway.approve(request).await })
            .await?;

        let (deal, outcome) = self.settle(did, &approved.trx_id, Utc::now()).await?;
        Ok(Approval { deal, outcome })
    }

    /// Marks the deal paid and, for the first writer only, adds the payment
    /// to the owner's usage.
    async fn settle(
        &self,
        did: &str,
        trx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Deal, PaymentOutcome)> {
        let (deal, outcome) = self.update_deal(did, |d| d.mark_paid(trx_id, now)).await?;
        if outcome == PaymentOutcome::Applied {
            let amount = deal.final_amount;
            let result = self
                .users
                .modify(&deal.uid, &|u: &mut User| {
                    u.record_payment(amount, now);
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                // The deal is paid; usage is corrected by hand.
                error!(did, uid = %deal.uid, %amount, error = %e, "Failed to record payment usage");
            }
            info!(did, trx_id, %amount, "Payment settled");
        }
        Ok((deal, outcome))
    }

    /// Client-initiated poll: asks the gateway about the session transaction
    /// and settles the deal when the gateway reports it approved.
    pub async fn reconcile(&self, did: &str) -> Result<Reconciliation> {
        let deal = self.load(did).await?;
        if deal.is_paid {
            return Ok(Reconciliation {
                deal,
                gateway_status: None,
                outcome: None,
            });
        }
        let trx_id = deal.pg_transaction_id.clone().ok_or_else(|| {
            PaymentError::Conflict(format!("deal {did} has no checkout session"))
        })?;

        let gateway = &self.gateway;
        let trx = trx_id.as_str();
        let status = self
            .call_gateway("status", |_| async move { gateway.status(trx).await })
            .await?;

        if status.status == GatewayTrxStatus::Approved {
            let (deal, outcome) = self.settle(did, &status.trx_id, Utc::now()).await?;
            return Ok(Reconciliation {
                deal,
                gateway_status: Some(status.status),
                outcome: Some(outcome),
            });
        }
        debug!(did, trx_id, status = ?status.status, "Gateway reports payment not approved");
        Ok(Reconciliation {
            deal,
            gateway_status: Some(status.status),
            outcome: None,
        })
    }

    /// Cancels all or part of a paid deal's payment. A full cancel moves the
    /// deal to `cancelled`. Usage counters are left as they are.
    pub async fn cancel_payment(
        &self,
        operator_id: &str,
        did: &str,
        amount: Option<Money>,
        reason: Option<String>,
    ) -> Result<Refund> {
        let deal = self.load(did).await?;
        let root_trx_id = match (&deal.pg_transaction_id, deal.is_paid) {
            (Some(trx), true) => trx.clone(),
            _ => {
                return Err(PaymentError::Conflict(format!(
                    "deal {did} has no approved payment"
                )));
            }
        };
        if deal.is_transferred || deal.status == DealStatus::Completed {
            return Err(PaymentError::Conflict(format!(
                "deal {did} has already been transferred"
            )));
        }
        let remaining = deal.final_amount.saturating_sub(deal.refunded_amount);
        let amount = amount.unwrap_or(remaining);
        if amount.value() <= Decimal::ZERO || amount > remaining {
            return Err(PaymentError::Validation(format!(
                "cancel amount must be between 1 and {remaining}"
            )));
        }

        let (_, seq) = self
            .update_deal(did, |d| {
                d.cancel_count += 1;
                Ok(d.cancel_count)
            })
            .await?;

        let gateway = &self.gateway;
        let root = root_trx_id.as_str();
        let cancelled = self
            .call_gateway("cancel", |attempt| {
                let request = CancelPaymentRequest {
                    track_id: format!("{did}_R{seq:02}_{attempt}"),
                    root_trx_id: root.to_string(),
                    amount,
                };
                async move { gateway.cancel(&request).await }
            })
            .await?;

        let now = Utc::now();
        let (deal, _) = self
            .update_deal(did, |d| {
                d.mark_refunded(&cancelled.trx_id, amount, now)?;
                if d.is_fully_refunded() && !d.status.is_terminal() {
                    let change = StatusChange {
                        reason: reason.clone(),
                        ..StatusChange::to(DealStatus::Cancelled)
                    };
                    d.transition(change, Actor::Admin, Some(operator_id), now)?;
                }
                Ok(())
            })
            .await?;

        info!(
            did,
            operator_id,
            refund_trx_id = %cancelled.trx_id,
            %amount,
            remaining = %cancelled.remain_amount,
            "Payment cancelled"
        );
        Ok(Refund {
            deal,
            refund_trx_id: cancelled.trx_id,
            amount,
            remaining: cancelled.remain_amount,
        })
    }

    /// Verifies a stored card by charging the verification amount and
    /// cancelling it straight away.
    pub async fn verify_card(&self, uid: &str, billing_key: &str) -> Result<CardVerification> {
        let user = self.user(uid).await?;
        user.ensure_can_transact()?;
        let amount = Money::new(Decimal::from(CARD_VERIFICATION_AMOUNT));
        let base = format!("CV{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        let gateway = &self.gateway;
        let base_ref = base.as_str();
        let charge = self
            .call_gateway("billing", |attempt| {
                let request = BillingPaymentRequest {
                    track_id: format!("{base_ref}_P{attempt}"),
                    billing_key: billing_key.to_string(),
                    amount,
                    goods_name: "Card verification".to_string(),
                    payer_name: user.name.clone(),
                    payer_email: user.email.clone().unwrap_or_default(),
                    payer_tel: user.phone.clone(),
                };
                async move { gateway.pay_with_billing_key(&request).await }
            })
            .await?;

        let charge_trx = charge.trx_id.as_str();
        let cancelled = self
            .call_gateway("cancel", |attempt| {
                let request = CancelPaymentRequest {
                    track_id: format!("{base_ref}_R{attempt}"),
                    root_trx_id: charge_trx.to_string(),
                    amount,
                };
                async move { gateway.cancel(&request).await }
            })
            .await
            .inspect_err(|e| {
                error!(uid, charge_trx_id = %charge.trx_id, error = %e, "Verification charge was not cancelled");
            })?;

        info!(uid, charge_trx_id = %charge.trx_id, "Card verified");
        Ok(CardVerification {
            charge_trx_id: charge.trx_id,
            cancel_trx_id: cancelled.trx_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deal::tests::new_deal_input;
    use crate::domain::payment::ResultCode;
    use crate::domain::ports::{DealStore, PaymentGateway, UserStore};
    use crate::domain::settings::GradeSettings;
    use crate::domain::user::Grade;
    use crate::infrastructure::in_memory::{InMemoryDealStore, InMemoryGateway, InMemoryUserStore};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        orchestrator: PaymentOrchestrator,
        deals: Arc<InMemoryDealStore>,
        users: Arc<InMemoryUserStore>,
        gateway: InMemoryGateway,
    }

    async fn fixture() -> Fixture {
        let deals = Arc::new(InMemoryDealStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let gateway = InMemoryGateway::new();
        users
            .insert(User::new(
                "U1",
                "Seo",
                Some("seo@example.com".to_string()),
                "01099998888",
                Grade::Basic,
                GradeSettings::default().basic,
                Utc::now(),
            ))
            .await
            .unwrap();
        let mut deal = Deal::new(
            "D1",
            "U1",
            new_deal_input(dec!(1_000_000)),
            GradeSettings::default().basic.fee_rate,
            Utc::now(),
        )
        .unwrap();
        deal.transition(
            StatusChange::to(DealStatus::AwaitingPayment),
            Actor::User,
            None,
            Utc::now(),
        )
        .unwrap();
        deals.insert(deal).await.unwrap();

        let orchestrator = PaymentOrchestrator::new(
            deals.clone(),
            users.clone(),
            Arc::new(gateway.clone()),
            &GatewayConfig::default(),
            "https://app.local/return",
        )
        .with_retry_policy(RetryConfig::no_delay(3));
        Fixture {
            orchestrator,
            deals,
            users,
            gateway,
        }
    }

    #[tokio::test]
    async fn test_checkout_and_approve() {
        let f = fixture().await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap();
        assert_eq!(session.track_id, "D1_P01_1");
        assert_eq!(session.amount, Money::new(dec!(1_040_000)));

        let approval = f
            .orchestrator
            .approve(
                "D1",
                &session.trx_id,
                &InMemoryGateway::authorization_for(&session.trx_id),
                session.amount,
            )
            .await
            .unwrap();
        assert_eq!(approval.outcome, PaymentOutcome::Applied);
        assert_eq!(approval.deal.status, DealStatus::Reviewing);
        assert!(approval.deal.is_paid);

        let user = f.users.get("U1").await.unwrap().unwrap();
        assert_eq!(user.used_amount, Money::new(dec!(1_040_000)));
        assert_eq!(user.total_deal_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_approval_does_not_double_count() {
        let f = fixture().await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Mobile)
            .await
            .unwrap();
        let auth = InMemoryGateway::authorization_for(&session.trx_id);
        f.orchestrator
            .approve("D1", &session.trx_id, &auth, session.amount)
            .await
            .unwrap();
        let second = f
            .orchestrator
            .approve("D1", &session.trx_id, &auth, session.amount)
            .await
            .unwrap();
        assert_eq!(second.outcome, PaymentOutcome::AlreadyApplied);
        assert_eq!(f.gateway.calls("approve").await, 1);

        let user = f.users.get("U1").await.unwrap().unwrap();
        assert_eq!(user.total_deal_count, 1);
        assert_eq!(user.used_amount, Money::new(dec!(1_040_000)));
    }

    #[tokio::test]
    async fn test_retryable_create_uses_fresh_reference() {
        let f = fixture().await;
        f.gateway.script_failure("create", ResultCode::timeout()).await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap();
        assert_eq!(session.track_id, "D1_P01_2");
        assert_eq!(f.gateway.calls("create").await, 2);
    }

    #[tokio::test]
    async fn test_fatal_approval_leaves_deal_unpaid() {
        let f = fixture().await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap();
        f.gateway.script_failure("approve", ResultCode::new("1001")).await;
        let err = f
            .orchestrator
            .approve(
                "D1",
                &session.trx_id,
                &InMemoryGateway::authorization_for(&session.trx_id),
                session.amount,
            )
            .await
            .unwrap_err();
        match err {
            PaymentError::GatewayDeclined { code, message } => {
                assert_eq!(code, "1001");
                assert_eq!(message, "The card was declined");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.gateway.calls("approve").await, 1);
        let deal = f.deals.get("D1").await.unwrap().unwrap();
        assert!(!deal.is_paid);
        assert_eq!(deal.status, DealStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_unavailable() {
        let f = fixture().await;
        for _ in 0..3 {
            f.gateway.script_failure("create", ResultCode::http(503)).await;
        }
        let err = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PaymentError::GatewayUnavailable { attempts: 3, .. }
        ));
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn test_tampered_amount_rejected() {
        let f = fixture().await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap();
        let err = f
            .orchestrator
            .approve(
                "D1",
                &session.trx_id,
                &InMemoryGateway::authorization_for(&session.trx_id),
                Money::new(dec!(100)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert_eq!(f.gateway.calls("approve").await, 0);
    }

    #[tokio::test]
    async fn test_reconcile_settles_approved_session() {
        let f = fixture().await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap();
        let pending = f.orchestrator.reconcile("D1").await.unwrap();
        assert_eq!(pending.gateway_status, Some(GatewayTrxStatus::Waiting));
        assert!(!pending.deal.is_paid);

        // Approved at the gateway, but the deal write never happened.
        f.gateway
            .approve(&ApprovePaymentRequest {
                trx_id: session.trx_id.clone(),
                amount: session.amount,
                authorization_id: InMemoryGateway::authorization_for(&session.trx_id),
            })
            .await
            .unwrap();
        let settled = f.orchestrator.reconcile("D1").await.unwrap();
        assert_eq!(settled.outcome, Some(PaymentOutcome::Applied));
        assert!(settled.deal.is_paid);

        let again = f.orchestrator.reconcile("D1").await.unwrap();
        assert_eq!(again.outcome, None);
        let user = f.users.get("U1").await.unwrap().unwrap();
        assert_eq!(user.total_deal_count, 1);
    }

    #[tokio::test]
    async fn test_full_cancel_moves_deal_to_cancelled() {
        let f = fixture().await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap();
        f.orchestrator
            .approve(
                "D1",
                &session.trx_id,
                &InMemoryGateway::authorization_for(&session.trx_id),
                session.amount,
            )
            .await
            .unwrap();

        let refund = f
            .orchestrator
            .cancel_payment("ops1", "D1", None, Some("customer request".to_string()))
            .await
            .unwrap();
        assert_eq!(refund.amount, Money::new(dec!(1_040_000)));
        assert_eq!(refund.remaining, Money::ZERO);
        assert_eq!(refund.deal.status, DealStatus::Cancelled);
        assert_eq!(
            f.gateway.trx_status(&session.trx_id).await,
            Some(GatewayTrxStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_partial_cancel_keeps_deal_open() {
        let f = fixture().await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap();
        f.orchestrator
            .approve(
                "D1",
                &session.trx_id,
                &InMemoryGateway::authorization_for(&session.trx_id),
                session.amount,
            )
            .await
            .unwrap();
        let refund = f
            .orchestrator
            .cancel_payment("ops1", "D1", Some(Money::new(dec!(40_000))), None)
            .await
            .unwrap();
        assert_eq!(refund.remaining, Money::new(dec!(1_000_000)));
        assert_eq!(refund.deal.status, DealStatus::Reviewing);
    }

    #[tokio::test]
    async fn test_cancel_requires_payment() {
        let f = fixture().await;
        assert!(matches!(
            f.orchestrator.cancel_payment("ops1", "D1", None, None).await,
            Err(PaymentError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_card_charges_then_cancels() {
        let f = fixture().await;
        let result = f.orchestrator.verify_card("U1", "BK-123").await.unwrap();
        assert_eq!(
            f.gateway.trx_status(&result.charge_trx_id).await,
            Some(GatewayTrxStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_callback_resolves_deal_by_track_id() {
        let f = fixture().await;
        let session = f
            .orchestrator
            .start_checkout("U1", "D1", Device::Pc)
            .await
            .unwrap();
        let payload = serde_json::json!({
            "success": true,
            "resCode": "0000",
            "data": {
                "trxId": session.trx_id,
                "amount": "1040000",
                "authorizationId": InMemoryGateway::authorization_for(&session.trx_id),
                "trackId": session.track_id,
            }
        })
        .to_string();
        let approval = f.orchestrator.handle_callback(&payload, None).await.unwrap();
        assert_eq!(approval.outcome, PaymentOutcome::Applied);
        assert_eq!(approval.deal.did, "D1");

        let orphan = AuthCallbackData {
            trx_id: "T-none".to_string(),
            amount: session.amount,
            authorization_id: "AUTH-none".to_string(),
            track_id: Some("D9_P01_1".to_string()),
            shop_value_info: None,
        };
        assert!(matches!(
            f.orchestrator.handle_authorization(orphan).await,
            Err(PaymentError::NotFound { resource: "Deal", .. })
        ));
    }

    #[test]
    fn test_callback_signature() {
        let config = GatewayConfig {
            webhook_secret: Some("whsec".to_string()),
            ..Default::default()
        };
        let orchestrator = PaymentOrchestrator::new(
            Arc::new(InMemoryDealStore::new()),
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryGateway::new()),
            &config,
            "https://app.local/return",
        );
        let payload = r#"{"success":true}"#;
        let mut mac = HmacSha256::new_from_slice(b"whsec").unwrap();
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(
            orchestrator
                .verify_callback_signature(payload, Some(&signature))
                .is_ok()
        );
        assert!(matches!(
            orchestrator.verify_callback_signature(payload, Some("00ff")),
            Err(PaymentError::Unauthorized(_))
        ));
        assert!(orchestrator.verify_callback_signature(payload, None).is_err());
    }
}
