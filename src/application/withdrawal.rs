use crate::domain::ports::{
    DynDealStore, DynIdentityProvider, DynRetentionStore, DynUserStore, IdentityError,
};
use crate::domain::retention::{WithdrawalReason, WithdrawnDeal, WithdrawnUser};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalReceipt {
    pub uid: String,
    pub archived_deals: usize,
    pub withdrawn_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
    /// False when the identity account still needs manual removal.
    pub identity_removed: bool,
}

/// Account closure: archive masked projections, then purge the live user.
///
/// Each step is an idempotent keyed write, so a retried closure after a
/// partial failure converges on the same archive.
#[derive(Clone)]
pub struct WithdrawalService {
    users: DynUserStore,
    deals: DynDealStore,
    retention: DynRetentionStore,
    identity: DynIdentityProvider,
}

impl WithdrawalService {
    pub fn new(
        users: DynUserStore,
        deals: DynDealStore,
        retention: DynRetentionStore,
        identity: DynIdentityProvider,
    ) -> Self {
        Self {
            users,
            deals,
            retention,
            identity,
        }
    }

    pub async fn withdraw(&self, uid: &str, reason: WithdrawalReason) -> Result<WithdrawalReceipt> {
        let Some(user) = self.users.get(uid).await? else {
            if self.retention.get_user(uid).await?.is_some() {
                return Err(PaymentError::Validation(
                    "Account has already been withdrawn".to_string(),
                ));
            }
            return Err(PaymentError::not_found("User", uid));
        };

        let deals = self.deals.list_by_owner(uid).await?;
        let active = deals.iter().filter(|d| d.status.is_active()).count();
        if active > 0 {
            warn!(uid, active, "Withdrawal blocked by active deals");
            return Err(PaymentError::ActiveDeals { count: active });
        }

        let now = Utc::now();
        let archived_user = WithdrawnUser::from_user(&user, reason, now);
        let retention_until = archived_user.retention_until;
        self.retention.put_user(archived_user).await?;

        let mut archived_deals = 0;
        for deal in deals.iter().filter_map(|d| WithdrawnDeal::from_deal(d, now)) {
            self.retention.put_deal(deal).await?;
            archived_deals += 1;
        }

        // Irreversible; runs only after every archive write succeeded.
        self.users.delete(uid).await?;

        let identity_removed = match &user.email {
            Some(email) => self.remove_identity(uid, email).await,
            None => true,
        };

        info!(uid, archived_deals, %retention_until, "Account withdrawn");
        Ok(WithdrawalReceipt {
            uid: uid.to_string(),
            archived_deals,
            withdrawn_at: now,
            retention_until,
            identity_removed,
        })
    }

    async fn remove_identity(&self, uid: &str, email: &str) -> bool {
        match self.identity.delete_user(email).await {
            Ok(()) | Err(IdentityError::NotFound) => true,
            Err(e) => {
                error!(uid, error = %e, "Identity account not removed; manual follow-up required");
                false
            }
        }
    }
}
