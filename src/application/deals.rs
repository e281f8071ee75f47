use crate::domain::deal::{Actor, Deal, DealEdit, DealStatus, NewDeal, StatusChange};
use crate::domain::discount::Discount;
use crate::domain::ports::{DynDealStore, DynDiscountStore, DynUserStore};
use crate::domain::user::User;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use tracing::{info, warn};

/// Owner and operator operations on deals outside the payment flow.
#[derive(Clone)]
pub struct DealService {
    deals: DynDealStore,
    users: DynUserStore,
    discounts: DynDiscountStore,
}

impl DealService {
    pub fn new(deals: DynDealStore, users: DynUserStore, discounts: DynDiscountStore) -> Self {
        Self {
            deals,
            users,
            discounts,
        }
    }

    async fn user(&self, uid: &str) -> Result<User> {
        self.users
            .get(uid)
            .await?
            .ok_or_else(|| PaymentError::not_found("User", uid))
    }

    pub async fn get(&self, did: &str) -> Result<Deal> {
        self.deals
            .get(did)
            .await?
            .ok_or_else(|| PaymentError::not_found("Deal", did))
    }

    /// Loads a deal and checks that `uid` owns it.
    pub async fn get_owned(&self, uid: &str, did: &str) -> Result<Deal> {
        let deal = self.get(did).await?;
        if deal.uid != uid {
            return Err(PaymentError::Forbidden(format!(
                "deal {did} belongs to another account"
            )));
        }
        Ok(deal)
    }

    pub async fn list_by_owner(&self, uid: &str) -> Result<Vec<Deal>> {
        self.deals.list_by_owner(uid).await
    }

    /// Opens a draft deal priced at the owner's current fee rate.
    pub async fn create(&self, uid: &str, input: NewDeal) -> Result<Deal> {
        let user = self.user(uid).await?;
        user.ensure_can_transact()?;
        user.ensure_within_limit(input.amount.money())?;

        let now = Utc::now();
        let deal = Deal::new(Deal::generate_id(now), uid, input, user.fee_rate, now)?;
        self.deals.insert(deal.clone()).await?;
        info!(did = %deal.did, uid, amount = %deal.amount.money(), fee_rate = %deal.fee_rate, "Deal created");
        Ok(deal)
    }

    /// Pre-payment edit by the owner.
    pub async fn edit_by_owner(&self, uid: &str, did: &str, edit: DealEdit) -> Result<Deal> {
        let mut deal = self.get_owned(uid, did).await?;
        if let Some(amount) = edit.amount {
            self.user(uid).await?.ensure_within_limit(amount.money())?;
        }
        deal.apply_edit(edit, Actor::User, Some(uid), Utc::now())?;
        self.deals.update(deal).await
    }

    /// Pre-payment edit from the operator console.
    pub async fn edit_by_operator(
        &self,
        operator_id: &str,
        did: &str,
        edit: DealEdit,
    ) -> Result<Deal> {
        let mut deal = self.get(did).await?;
        deal.apply_edit(edit, Actor::Admin, Some(operator_id), Utc::now())?;
        let deal = self.deals.update(deal).await?;
        info!(did, operator_id, "Deal edited by operator");
        Ok(deal)
    }

    /// Validates, consumes and attaches a discount code.
    ///
    /// Consumption is a conditional update on the discount, so concurrent
    /// attempts on a single-use code leave exactly one winner. When the deal
    /// write loses a version race afterwards, the consumption is released.
    pub async fn apply_discount(&self, uid: &str, did: &str, code: &str) -> Result<Deal> {
        let mut deal = self.get_owned(uid, did).await?;
        deal.ensure_accepts_discount()?;
        let user = self.user(uid).await?;
        let discount = self
            .discounts
            .find_by_code(code)
            .await?
            .ok_or_else(|| PaymentError::not_found("Discount", Discount::normalize_code(code)))?;

        let now = Utc::now();
        discount.check_eligibility(deal.amount, &user, now)?;
        let consumed = self
            .discounts
            .modify(&discount.id, &|d: &mut Discount| {
                d.check_eligibility(deal.amount, &user, now)?;
                d.record_use(now)
            })
            .await?;

        deal.apply_discount(&consumed, now)?;
        match self.deals.update(deal).await {
            Ok(deal) => {
                info!(did, code = %consumed.reference(), discount = %deal.discount_amount, "Discount applied");
                Ok(deal)
            }
            Err(e) => {
                warn!(did, discount_id = %consumed.id, error = %e, "Releasing discount after failed deal update");
                self.discounts
                    .modify(&consumed.id, &|d: &mut Discount| {
                        d.release_use(now);
                        Ok(())
                    })
                    .await?;
                Err(e)
            }
        }
    }

    /// Owner submits the form: `draft -> awaiting_payment`.
    pub async fn finalize(&self, uid: &str, did: &str) -> Result<Deal> {
        let mut deal = self.get_owned(uid, did).await?;
        self.user(uid).await?.ensure_can_transact()?;
        deal.transition(
            StatusChange::to(DealStatus::AwaitingPayment),
            Actor::User,
            Some(uid),
            Utc::now(),
        )?;
        self.deals.update(deal).await
    }

    /// Owner cancels an unpaid deal.
    pub async fn cancel_by_owner(&self, uid: &str, did: &str, reason: Option<String>) -> Result<Deal> {
        let mut deal = self.get_owned(uid, did).await?;
        let change = StatusChange {
            reason,
            ..StatusChange::to(DealStatus::Cancelled)
        };
        deal.transition(change, Actor::User, Some(uid), Utc::now())?;
        let deal = self.deals.update(deal).await?;
        info!(did, uid, "Deal cancelled by owner");
        Ok(deal)
    }

    /// Operator status decision.
    pub async fn change_status(
        &self,
        operator_id: &str,
        did: &str,
        change: StatusChange,
    ) -> Result<Deal> {
        let mut deal = self.get(did).await?;
        let from = deal.status;
        deal.transition(change, Actor::Admin, Some(operator_id), Utc::now())?;
        let deal = self.deals.update(deal).await?;
        info!(did, operator_id, %from, to = %deal.status, "Deal status changed");
        Ok(deal)
    }
}
