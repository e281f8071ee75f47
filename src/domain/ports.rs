use super::deal::Deal;
use super::discount::Discount;
use super::payment::{
    ApprovePaymentData, ApprovePaymentRequest, BillingPaymentData, BillingPaymentRequest,
    CancelPaymentData, CancelPaymentRequest, CreatePaymentData, CreatePaymentRequest,
    GatewayResult, StatusData,
};
use super::retention::{WithdrawnDeal, WithdrawnUser};
use super::settings::SettingsOverride;
use super::user::User;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A mutation applied under the store's per-record guard.
pub type Mutation<'a, T> = &'a (dyn Fn(&mut T) -> Result<()> + Send + Sync);

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `AlreadyExists` when the uid is taken.
    async fn insert(&self, user: User) -> Result<()>;
    async fn get(&self, uid: &str) -> Result<Option<User>>;
    /// Secondary lookup used by bearer authentication.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn all(&self) -> Result<Vec<User>>;
    /// Reads, mutates and writes one user atomically. Nothing is written when
    /// `mutation` fails.
    async fn modify(&self, uid: &str, mutation: Mutation<'_, User>) -> Result<User>;
    /// Removes the record. Deleting a missing uid is not an error.
    async fn delete(&self, uid: &str) -> Result<()>;
}

#[async_trait]
pub trait DealStore: Send + Sync {
    async fn insert(&self, deal: Deal) -> Result<()>;
    async fn get(&self, did: &str) -> Result<Option<Deal>>;
    /// Compare-and-set on `deal.version`: the write succeeds only when the
    /// stored version still equals the one the caller read. The stored copy
    /// gets the next version and is returned.
    async fn update(&self, deal: Deal) -> Result<Deal>;
    async fn list_by_owner(&self, uid: &str) -> Result<Vec<Deal>>;
    async fn find_by_track_id(&self, track_id: &str) -> Result<Option<Deal>>;
}

#[async_trait]
pub trait DiscountStore: Send + Sync {
    async fn insert(&self, discount: Discount) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Discount>>;
    /// Case-insensitive code lookup.
    async fn find_by_code(&self, code: &str) -> Result<Option<Discount>>;
    /// Conditional update; concurrent callers observe each other's writes.
    async fn modify(&self, id: &str, mutation: Mutation<'_, Discount>) -> Result<Discount>;
}

/// Write-once archive for closed accounts. Puts are idempotent per key.
#[async_trait]
pub trait RetentionStore: Send + Sync {
    async fn put_user(&self, user: WithdrawnUser) -> Result<()>;
    async fn put_deal(&self, deal: WithdrawnDeal) -> Result<()>;
    async fn get_user(&self, uid: &str) -> Result<Option<WithdrawnUser>>;
    async fn deals_for_user(&self, uid: &str) -> Result<Vec<WithdrawnDeal>>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<Option<SettingsOverride>>;
    async fn save(&self, layer: SettingsOverride) -> Result<()>;
}

/// The external card gateway. Transport failures come back as
/// `GatewayFailure` with a `TIMEOUT`, `NETWORK_ERROR` or `HTTP_xxx` code.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create(&self, request: &CreatePaymentRequest) -> GatewayResult<CreatePaymentData>;
    async fn approve(&self, request: &ApprovePaymentRequest) -> GatewayResult<ApprovePaymentData>;
    async fn cancel(&self, request: &CancelPaymentRequest) -> GatewayResult<CancelPaymentData>;
    async fn status(&self, trx_id: &str) -> GatewayResult<StatusData>;
    async fn pay_with_billing_key(
        &self,
        request: &BillingPaymentRequest,
    ) -> GatewayResult<BillingPaymentData>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("identity not found")]
    NotFound,
    #[error("invalid or expired credential")]
    InvalidCredential,
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// The managed identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_token(&self, token: &str) -> std::result::Result<VerifiedIdentity, IdentityError>;
    async fn set_password(
        &self,
        username: &str,
        secret: &str,
    ) -> std::result::Result<(), IdentityError>;
    async fn delete_user(&self, username: &str) -> std::result::Result<(), IdentityError>;
}

/// Issues time-boxed upload URLs for object storage.
#[async_trait]
pub trait UploadAuthorizer: Send + Sync {
    async fn presign_put(&self, key: &str, content_type: &str, ttl: Duration) -> Result<String>;
}

pub type DynUserStore = Arc<dyn UserStore>;
pub type DynDealStore = Arc<dyn DealStore>;
pub type DynDiscountStore = Arc<dyn DiscountStore>;
pub type DynRetentionStore = Arc<dyn RetentionStore>;
pub type DynSettingsStore = Arc<dyn SettingsStore>;
pub type DynPaymentGateway = Arc<dyn PaymentGateway>;
pub type DynIdentityProvider = Arc<dyn IdentityProvider>;
pub type DynUploadAuthorizer = Arc<dyn UploadAuthorizer>;
