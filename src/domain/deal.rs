use super::discount::Discount;
use super::money::{Amount, FeeRate, Money};
use super::pricing::{DiscountValue, Quote, price_deal};
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealType {
    ProductPurchase,
    LaborCost,
    ServiceFee,
    Construction,
    Rent,
    MonthlyRent,
    Maintenance,
    Deposit,
    Advertising,
    Shipping,
    Rental,
    #[serde(alias = "etc")]
    Other,
}

/// Lifecycle of a deal.
///
/// ```text
/// draft -> awaiting_payment -> (payment approval) -> reviewing
/// reviewing -> hold | need_revision | completed | cancelled
/// hold | need_revision -> reviewing | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    Draft,
    AwaitingPayment,
    Pending,
    Reviewing,
    Hold,
    NeedRevision,
    Cancelled,
    Completed,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Draft => "draft",
            DealStatus::AwaitingPayment => "awaiting_payment",
            DealStatus::Pending => "pending",
            DealStatus::Reviewing => "reviewing",
            DealStatus::Hold => "hold",
            DealStatus::NeedRevision => "need_revision",
            DealStatus::Cancelled => "cancelled",
            DealStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DealStatus::Completed | DealStatus::Cancelled)
    }

    /// Statuses that block account withdrawal.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DealStatus::AwaitingPayment
                | DealStatus::Pending
                | DealStatus::Reviewing
                | DealStatus::Hold
        )
    }

    /// Whether an operator or owner may move a deal from `self` to `to`.
    ///
    /// Entry into `pending`/`reviewing` from `awaiting_payment` is reserved for
    /// payment approval and is not reachable here.
    pub fn can_transition_to(&self, to: DealStatus) -> bool {
        use DealStatus::*;
        match (self, to) {
            (Draft, AwaitingPayment) => true,
            (Pending, Reviewing) => true,
            (Reviewing, Completed) => true,
            (Reviewing | Pending, Hold) => true,
            (Reviewing | Hold | Pending, NeedRevision) => true,
            (Hold | NeedRevision, Reviewing) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionType {
    Documents,
    Recipient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    System,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub bank: String,
    pub account_number: String,
    pub account_holder: String,
    #[serde(default)]
    pub is_verified: bool,
}

impl Recipient {
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.bank.trim().is_empty()
            || self.account_number.trim().is_empty()
            || self.account_holder.trim().is_empty()
        {
            return Err(PaymentError::Validation(
                "Recipient bank, account number and holder are required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub description: String,
    pub actor: Actor,
    pub actor_id: Option<String>,
}

/// Discount attached to a deal, kept so the deal can be repriced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedDiscount {
    pub discount_id: String,
    pub code: String,
    #[serde(flatten)]
    pub value: DiscountValue,
    /// Minimum principal the discount was granted for.
    #[serde(default)]
    pub min_amount: Money,
}

/// Input for a new deal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewDeal {
    pub deal_name: String,
    pub deal_type: DealType,
    pub amount: Amount,
    pub recipient: Recipient,
    pub sender_name: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Pre-payment edit. Only these three fields are editable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DealEdit {
    pub amount: Option<Amount>,
    pub recipient: Option<Recipient>,
    pub attachments: Option<Vec<String>>,
}

impl DealEdit {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.recipient.is_none() && self.attachments.is_none()
    }
}

/// A status change requested through the operator console or by the owner.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatusChange {
    pub status: DealStatus,
    pub reason: Option<String>,
    pub revision_type: Option<RevisionType>,
    pub revision_memo: Option<String>,
}

impl StatusChange {
    pub fn to(status: DealStatus) -> Self {
        Self {
            status,
            reason: None,
            revision_type: None,
            revision_memo: None,
        }
    }
}

/// Result of applying a gateway approval to a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// First delivery of this transaction id; counters must be updated.
    Applied,
    /// Same transaction id seen before; nothing changes.
    AlreadyApplied,
}

/// One card-to-bank transfer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    pub did: String,
    pub uid: String,
    pub deal_name: String,
    pub deal_type: DealType,
    pub status: DealStatus,
    pub revision_type: Option<RevisionType>,
    pub revision_memo: Option<String>,
    pub reason: Option<String>,

    pub amount: Amount,
    /// Copied from the owner at creation and never changed.
    pub fee_rate: FeeRate,
    pub fee_amount: Money,
    pub total_amount: Money,
    pub discount: Option<AppliedDiscount>,
    pub discount_amount: Money,
    pub final_amount: Money,

    pub recipient: Recipient,
    pub sender_name: String,
    pub attachments: Vec<String>,

    /// Checkout sessions opened so far; part of each create reference.
    pub checkout_count: u32,
    /// Cancel requests issued so far; part of each cancel reference.
    pub cancel_count: u32,
    pub pg_track_id: Option<String>,
    pub pg_transaction_id: Option<String>,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub refund_transaction_id: Option<String>,
    pub refunded_amount: Money,
    pub refunded_at: Option<DateTime<Utc>>,

    pub is_transferred: bool,
    pub transferred_at: Option<DateTime<Utc>>,

    pub history: Vec<DealHistoryEntry>,
    /// Optimistic concurrency token, bumped by the store on every update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    pub fn new(
        did: impl Into<String>,
        uid: impl Into<String>,
        input: NewDeal,
        fee_rate: FeeRate,
        now: DateTime<Utc>,
    ) -> Result<Self, PaymentError> {
        if input.deal_name.trim().is_empty() || input.sender_name.trim().is_empty() {
            return Err(PaymentError::Validation(
                "Deal name and sender name are required".to_string(),
            ));
        }
        input.recipient.validate()?;

        let quote = price_deal(input.amount, fee_rate, None);
        let mut deal = Self {
            did: did.into(),
            uid: uid.into(),
            deal_name: input.deal_name,
            deal_type: input.deal_type,
            status: DealStatus::Draft,
            revision_type: None,
            revision_memo: None,
            reason: None,
            amount: input.amount,
            fee_rate,
            fee_amount: quote.fee_amount,
            total_amount: quote.total_amount,
            discount: None,
            discount_amount: quote.discount_amount,
            final_amount: quote.final_amount,
            recipient: Recipient {
                is_verified: false,
                ..input.recipient
            },
            sender_name: input.sender_name,
            attachments: input.attachments,
            checkout_count: 0,
            cancel_count: 0,
            pg_track_id: None,
            pg_transaction_id: None,
            is_paid: false,
            paid_at: None,
            refund_transaction_id: None,
            refunded_amount: Money::ZERO,
            refunded_at: None,
            is_transferred: false,
            transferred_at: None,
            history: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        deal.record(now, "created", "Deal created", Actor::User, None);
        Ok(deal)
    }

    /// Generates a deal identifier such as `D250112K3F9QZ`.
    pub fn generate_id(now: DateTime<Utc>) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase();
        format!("D{}{}", now.format("%y%m%d"), suffix)
    }

    /// Whether amount, recipient and attachments may still change.
    pub fn is_editable(&self) -> bool {
        matches!(self.status, DealStatus::Draft | DealStatus::AwaitingPayment) && !self.is_paid
    }

    pub fn quote(&self) -> Quote {
        Quote {
            fee_amount: self.fee_amount,
            total_amount: self.total_amount,
            discount_amount: self.discount_amount,
            final_amount: self.final_amount,
        }
    }

    fn reprice(&mut self) {
        let quote = price_deal(
            self.amount,
            self.fee_rate,
            self.discount.as_ref().map(|d| &d.value),
        );
        self.fee_amount = quote.fee_amount;
        self.total_amount = quote.total_amount;
        self.discount_amount = quote.discount_amount;
        self.final_amount = quote.final_amount;
    }

    fn record(
        &mut self,
        now: DateTime<Utc>,
        action: &str,
        description: impl Into<String>,
        actor: Actor,
        actor_id: Option<&str>,
    ) {
        self.history.push(DealHistoryEntry {
            timestamp: now,
            action: action.to_string(),
            description: description.into(),
            actor,
            actor_id: actor_id.map(str::to_string),
        });
        self.updated_at = now;
    }

    /// Applies a pre-payment edit, repricing when the principal changes.
    pub fn apply_edit(
        &mut self,
        edit: DealEdit,
        actor: Actor,
        actor_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if !self.is_editable() {
            return Err(PaymentError::Conflict(format!(
                "deal {} can no longer be edited (status {}, paid {})",
                self.did, self.status, self.is_paid
            )));
        }
        if edit.is_empty() {
            return Err(PaymentError::Validation(
                "No editable field supplied".to_string(),
            ));
        }
        if let Some(recipient) = &edit.recipient {
            recipient.validate()?;
        }
        if let Some(amount) = edit.amount
            && let Some(applied) = &self.discount
            && amount.money() < applied.min_amount
        {
            return Err(PaymentError::DiscountRejected(format!(
                "discount {} requires a principal of at least {}",
                applied.code, applied.min_amount
            )));
        }

        let mut changed = Vec::new();
        if let Some(amount) = edit.amount {
            self.amount = amount;
            self.reprice();
            changed.push("amount");
        }
        if let Some(recipient) = edit.recipient {
            self.recipient = Recipient {
                is_verified: false,
                ..recipient
            };
            changed.push("recipient");
        }
        if let Some(attachments) = edit.attachments {
            self.attachments = attachments;
            changed.push("attachments");
        }
        self.record(
            now,
            "edited",
            format!("Updated {}", changed.join(", ")),
            actor,
            actor_id,
        );
        Ok(())
    }

    /// Attaches an already validated and consumed discount and reprices.
    pub fn apply_discount(
        &mut self,
        discount: &Discount,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        self.ensure_accepts_discount()?;
        self.discount = Some(AppliedDiscount {
            discount_id: discount.id.clone(),
            code: discount.reference(),
            value: discount.value,
            min_amount: discount.min_amount,
        });
        self.reprice();
        self.record(
            now,
            "discount_applied",
            format!("Applied {} (-{})", discount.reference(), self.discount_amount),
            Actor::User,
            None,
        );
        Ok(())
    }

    pub fn ensure_accepts_discount(&self) -> Result<(), PaymentError> {
        if !self.is_editable() {
            return Err(PaymentError::Conflict(format!(
                "discounts cannot be applied to deal {} in status {}",
                self.did, self.status
            )));
        }
        if let Some(applied) = &self.discount {
            return Err(PaymentError::Conflict(format!(
                "deal {} already carries discount {}",
                self.did, applied.code
            )));
        }
        Ok(())
    }

    /// Moves the deal to a new status on behalf of an operator or the owner.
    pub fn transition(
        &mut self,
        change: StatusChange,
        actor: Actor,
        actor_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        let from = self.status;
        let to = change.status;

        if !from.can_transition_to(to) {
            return Err(PaymentError::Conflict(format!(
                "deal {} cannot move from {} to {}",
                self.did, from, to
            )));
        }
        if to == DealStatus::Cancelled && self.is_paid && !self.is_fully_refunded() {
            return Err(PaymentError::Conflict(format!(
                "deal {} is paid; the payment must be cancelled in full first",
                self.did
            )));
        }
        if to == DealStatus::NeedRevision && change.revision_type.is_none() {
            return Err(PaymentError::Validation(
                "revisionType is required for need_revision".to_string(),
            ));
        }
        if actor == Actor::User && !matches!(to, DealStatus::AwaitingPayment | DealStatus::Cancelled)
        {
            return Err(PaymentError::Forbidden(format!(
                "owners cannot move deals to {to}"
            )));
        }

        self.status = to;
        if to == DealStatus::NeedRevision {
            self.revision_type = change.revision_type;
            self.revision_memo = change.revision_memo;
        } else {
            self.revision_type = None;
            self.revision_memo = None;
        }
        if let Some(reason) = &change.reason {
            self.reason = Some(reason.clone());
        }
        if to == DealStatus::Completed {
            self.is_transferred = true;
            self.transferred_at = Some(now);
        }

        let description = match &change.reason {
            Some(reason) => format!("{from} -> {to}: {reason}"),
            None => format!("{from} -> {to}"),
        };
        self.record(now, "status_changed", description, actor, actor_id);
        Ok(())
    }

    pub fn ensure_awaiting_payment(&self) -> Result<(), PaymentError> {
        if self.status != DealStatus::AwaitingPayment || self.is_paid {
            return Err(PaymentError::Conflict(format!(
                "deal {} is not awaiting payment (status {})",
                self.did, self.status
            )));
        }
        Ok(())
    }

    /// Records the gateway session opened for this deal. The session's
    /// transaction id is what a later status poll asks about.
    pub fn begin_checkout(
        &mut self,
        track_id: &str,
        trx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        self.ensure_awaiting_payment()?;
        self.pg_track_id = Some(track_id.to_string());
        self.pg_transaction_id = Some(trx_id.to_string());
        self.record(
            now,
            "checkout_started",
            format!("Payment session {track_id} opened"),
            Actor::System,
            None,
        );
        Ok(())
    }

    /// Applies an approved payment. The only path that sets `is_paid`.
    ///
    /// The stored transaction id acts as the idempotency guard: a repeated
    /// delivery of the same id is reported as `AlreadyApplied`.
    pub fn mark_paid(
        &mut self,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome, PaymentError> {
        if self.pg_transaction_id.as_deref() == Some(transaction_id) && self.is_paid {
            return Ok(PaymentOutcome::AlreadyApplied);
        }
        if self.is_paid {
            return Err(PaymentError::Conflict(format!(
                "deal {} was already paid by another transaction",
                self.did
            )));
        }
        self.ensure_awaiting_payment()?;

        self.is_paid = true;
        self.paid_at = Some(now);
        self.pg_transaction_id = Some(transaction_id.to_string());
        self.status = DealStatus::Reviewing;
        self.revision_type = None;
        self.revision_memo = None;
        self.record(
            now,
            "paid",
            format!("Payment {transaction_id} approved ({})", self.final_amount),
            Actor::System,
            None,
        );
        Ok(PaymentOutcome::Applied)
    }

    /// Records a successful gateway cancellation.
    pub fn mark_refunded(
        &mut self,
        refund_transaction_id: &str,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if !self.is_paid {
            return Err(PaymentError::Conflict(format!(
                "deal {} has no payment to cancel",
                self.did
            )));
        }
        self.refund_transaction_id = Some(refund_transaction_id.to_string());
        self.refunded_amount += amount;
        self.refunded_at = Some(now);
        self.record(
            now,
            "payment_cancelled",
            format!("Payment cancelled by {refund_transaction_id} ({amount})"),
            Actor::System,
            None,
        );
        Ok(())
    }

    pub fn is_fully_refunded(&self) -> bool {
        self.is_paid && self.refunded_amount >= self.final_amount
    }
}
