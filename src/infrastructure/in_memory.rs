use crate::domain::deal::Deal;
use crate::domain::discount::Discount;
use crate::domain::money::Money;
use crate::domain::payment::{
    ApprovePaymentData, ApprovePaymentRequest, BillingPaymentData, BillingPaymentRequest,
    CancelPaymentData, CancelPaymentRequest, CreatePaymentData, CreatePaymentRequest,
    GatewayFailure, GatewayResult, GatewayTrxStatus, ResultCode, StatusData,
};
use crate::domain::ports::{
    DealStore, DiscountStore, IdentityError, IdentityProvider, Mutation, PaymentGateway,
    RetentionStore, SettingsStore, UploadAuthorizer, UserStore, VerifiedIdentity,
};
use crate::domain::retention::{WithdrawnDeal, WithdrawnUser};
use crate::domain::settings::SettingsOverride;
use crate::domain::user::User;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Users keyed by uid.
///
/// Uses `Arc<RwLock<HashMap<String, User>>>` so clones share state. `modify`
/// holds the write lock for the whole read-mutate-write cycle.
#[derive(Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: User) -> Result<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.uid) {
            return Err(PaymentError::AlreadyExists {
                resource: "User",
                id: user.uid,
            });
        }
        users.insert(user.uid.clone(), user);
        Ok(())
    }

    async fn get(&self, uid: &str) -> Result<Option<User>> {
        Ok(self.users.read().await.get(uid).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn all(&self) -> Result<Vec<User>> {
        let users = self.users.read().await;
        let mut all: Vec<User> = users.values().cloned().collect();
        all.sort_by(|a, b| a.uid.cmp(&b.uid));
        Ok(all)
    }

    async fn modify(&self, uid: &str, mutation: Mutation<'_, User>) -> Result<User> {
        let mut users = self.users.write().await;
        let current = users
            .get(uid)
            .ok_or_else(|| PaymentError::not_found("User", uid))?;
        let mut next = current.clone();
        mutation(&mut next)?;
        users.insert(uid.to_string(), next.clone());
        Ok(next)
    }

    async fn delete(&self, uid: &str) -> Result<()> {
        self.users.write().await.remove(uid);
        Ok(())
    }
}

/// Deals keyed by did, with version-checked updates.
#[derive(Default, Clone)]
pub struct InMemoryDealStore {
    deals: Arc<RwLock<HashMap<String, Deal>>>,
}

impl InMemoryDealStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DealStore for InMemoryDealStore {
    async fn insert(&self, deal: Deal) -> Result<()> {
        let mut deals = self.deals.write().await;
        if deals.contains_key(&deal.did) {
            return Err(PaymentError::AlreadyExists {
                resource: "Deal",
                id: deal.did,
            });
        }
        deals.insert(deal.did.clone(), deal);
        Ok(())
    }

    async fn get(&self, did: &str) -> Result<Option<Deal>> {
        Ok(self.deals.read().await.get(did).cloned())
    }

    async fn update(&self, mut deal: Deal) -> Result<Deal> {
        let mut deals = self.deals.write().await;
        let stored = deals
            .get(&deal.did)
            .ok_or_else(|| PaymentError::not_found("Deal", deal.did.clone()))?;
        if stored.version != deal.version {
            return Err(PaymentError::ConcurrentModification(format!(
                "deal {} (expected version {}, found {})",
                deal.did, deal.version, stored.version
            )));
        }
        deal.version += 1;
        deals.insert(deal.did.clone(), deal.clone());
        Ok(deal)
    }

    async fn list_by_owner(&self, uid: &str) -> Result<Vec<Deal>> {
        let deals = self.deals.read().await;
        let mut owned: Vec<Deal> = deals.values().filter(|d| d.uid == uid).cloned().collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn find_by_track_id(&self, track_id: &str) -> Result<Option<Deal>> {
        let deals = self.deals.read().await;
        Ok(deals
            .values()
            .find(|d| d.pg_track_id.as_deref() == Some(track_id))
            .cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryDiscountStore {
    discounts: Arc<RwLock<HashMap<String, Discount>>>,
}

impl InMemoryDiscountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscountStore for InMemoryDiscountStore {
    async fn insert(&self, mut discount: Discount) -> Result<()> {
        discount.code = discount.code.as_deref().map(Discount::normalize_code);
        let mut discounts = self.discounts.write().await;
        if discounts.contains_key(&discount.id) {
            return Err(PaymentError::AlreadyExists {
                resource: "Discount",
                id: discount.id,
            });
        }
        discounts.insert(discount.id.clone(), discount);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Discount>> {
        Ok(self.discounts.read().await.get(id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Discount>> {
        let code = Discount::normalize_code(code);
        let discounts = self.discounts.read().await;
        Ok(discounts
            .values()
            .find(|d| d.code.as_deref() == Some(code.as_str()))
            .cloned())
    }

    async fn modify(&self, id: &str, mutation: Mutation<'_, Discount>) -> Result<Discount> {
        let mut discounts = self.discounts.write().await;
        let current = discounts
            .get(id)
            .ok_or_else(|| PaymentError::not_found("Discount", id))?;
        let mut next = current.clone();
        mutation(&mut next)?;
        discounts.insert(id.to_string(), next.clone());
        Ok(next)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRetentionStore {
    users: Arc<RwLock<HashMap<String, WithdrawnUser>>>,
    deals: Arc<RwLock<HashMap<String, WithdrawnDeal>>>,
}

impl InMemoryRetentionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetentionStore for InMemoryRetentionStore {
    async fn put_user(&self, user: WithdrawnUser) -> Result<()> {
        self.users.write().await.insert(user.uid.clone(), user);
        Ok(())
    }

    async fn put_deal(&self, deal: WithdrawnDeal) -> Result<()> {
        self.deals.write().await.insert(deal.wdid.clone(), deal);
        Ok(())
    }

    async fn get_user(&self, uid: &str) -> Result<Option<WithdrawnUser>> {
        Ok(self.users.read().await.get(uid).cloned())
    }

    async fn deals_for_user(&self, uid: &str) -> Result<Vec<WithdrawnDeal>> {
        let deals = self.deals.read().await;
        let mut found: Vec<WithdrawnDeal> =
            deals.values().filter(|d| d.uid == uid).cloned().collect();
        found.sort_by(|a, b| a.wdid.cmp(&b.wdid));
        Ok(found)
    }
}

#[derive(Default, Clone)]
pub struct InMemorySettingsStore {
    layer: Arc<RwLock<Option<SettingsOverride>>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn load(&self) -> Result<Option<SettingsOverride>> {
        Ok(*self.layer.read().await)
    }

    async fn save(&self, layer: SettingsOverride) -> Result<()> {
        *self.layer.write().await = Some(layer);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SimulatedTrx {
    track_id: String,
    amount: Money,
    status: GatewayTrxStatus,
    refunded: Money,
}

#[derive(Default)]
struct GatewayState {
    transactions: HashMap<String, SimulatedTrx>,
    /// Track ids already used for create or cancel.
    references: HashMap<String, String>,
    scripted: HashMap<&'static str, VecDeque<ResultCode>>,
    calls: HashMap<&'static str, u32>,
}

/// A gateway simulator for tests and local runs.
///
/// Failures can be queued per operation (`"create"`, `"approve"`, `"cancel"`,
/// `"status"`, `"billing"`); each queued code is returned once before the
/// simulator answers normally again.
#[derive(Default, Clone)]
pub struct InMemoryGateway {
    state: Arc<Mutex<GatewayState>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script_failure(&self, operation: &'static str, code: ResultCode) {
        let mut state = self.state.lock().await;
        state.scripted.entry(operation).or_default().push_back(code);
    }

    /// Number of calls that reached the simulator for `operation`.
    pub async fn calls(&self, operation: &'static str) -> u32 {
        self.state.lock().await.calls.get(operation).copied().unwrap_or(0)
    }

    /// The authorization id the simulated payment page would hand back.
    pub fn authorization_for(trx_id: &str) -> String {
        format!("AUTH-{trx_id}")
    }

    pub async fn trx_status(&self, trx_id: &str) -> Option<GatewayTrxStatus> {
        let state = self.state.lock().await;
        state.transactions.get(trx_id).map(|t| t.status)
    }

    fn next_trx_id(&self) -> String {
        format!("T{:08}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn begin(state: &mut GatewayState, operation: &'static str) -> GatewayResult<()> {
        *state.calls.entry(operation).or_default() += 1;
        if let Some(code) = state
            .scripted
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            let message = code.user_message();
            return Err(GatewayFailure::new(code, message));
        }
        Ok(())
    }

    fn reuse_reference(state: &GatewayState, track_id: &str) -> GatewayResult<()> {
        if state.references.contains_key(track_id) {
            return Err(GatewayFailure::new(
                ResultCode::new("3001"),
                format!("duplicate trackId {track_id}"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn create(&self, request: &CreatePaymentRequest) -> GatewayResult<CreatePaymentData> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, "create")?;
        Self::reuse_reference(&state, &request.track_id)?;
        let trx_id = self.next_trx_id();
        state
            .references
            .insert(request.track_id.clone(), trx_id.clone());
        state.transactions.insert(
            trx_id.clone(),
            SimulatedTrx {
                track_id: request.track_id.clone(),
                amount: request.amount,
                status: GatewayTrxStatus::Waiting,
                refunded: Money::ZERO,
            },
        );
        Ok(CreatePaymentData {
            auth_page_url: format!("https://pay.local/auth/{trx_id}"),
            approval_url: None,
            track_id: request.track_id.clone(),
            trx_id,
        })
    }

    async fn approve(&self, request: &ApprovePaymentRequest) -> GatewayResult<ApprovePaymentData> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, "approve")?;
        let trx = state.transactions.get_mut(&request.trx_id).ok_or_else(|| {
            GatewayFailure::new(ResultCode::new("2003"), "transaction not found")
        })?;
        if request.authorization_id != Self::authorization_for(&request.trx_id) {
            return Err(GatewayFailure::new(
                ResultCode::new("1005"),
                "authorization mismatch",
            ));
        }
        if trx.amount != request.amount {
            return Err(GatewayFailure::new(ResultCode::new("2001"), "amount mismatch"));
        }
        // Approving twice answers with the same transaction.
        if trx.status == GatewayTrxStatus::Waiting {
            trx.status = GatewayTrxStatus::Approved;
        }
        Ok(ApprovePaymentData {
            trx_id: request.trx_id.clone(),
            track_id: Some(trx.track_id.clone()),
            amount: trx.amount,
            transaction_date: None,
        })
    }

    async fn cancel(&self, request: &CancelPaymentRequest) -> GatewayResult<CancelPaymentData> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, "cancel")?;
        Self::reuse_reference(&state, &request.track_id)?;
        let refund_id = self.next_trx_id();
        let trx = state
            .transactions
            .get_mut(&request.root_trx_id)
            .ok_or_else(|| GatewayFailure::new(ResultCode::new("2003"), "transaction not found"))?;
        if trx.status == GatewayTrxStatus::Cancelled {
            return Err(GatewayFailure::new(
                ResultCode::new("2002"),
                "already cancelled",
            ));
        }
        let remain = trx.amount.saturating_sub(trx.refunded);
        if request.amount > remain {
            return Err(GatewayFailure::new(
                ResultCode::new("2001"),
                "cancel amount exceeds remaining amount",
            ));
        }
        trx.refunded += request.amount;
        let remain = trx.amount.saturating_sub(trx.refunded);
        trx.status = if remain == Money::ZERO {
            GatewayTrxStatus::Cancelled
        } else {
            GatewayTrxStatus::PartialCancelled
        };
        let root_trx_id = request.root_trx_id.clone();
        state
            .references
            .insert(request.track_id.clone(), refund_id.clone());
        Ok(CancelPaymentData {
            trx_id: refund_id,
            track_id: request.track_id.clone(),
            root_trx_id,
            amount: request.amount,
            remain_amount: remain,
        })
    }

    async fn status(&self, trx_id: &str) -> GatewayResult<StatusData> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, "status")?;
        let trx = state
            .transactions
            .get(trx_id)
            .ok_or_else(|| GatewayFailure::new(ResultCode::new("2003"), "transaction not found"))?;
        Ok(StatusData {
            trx_id: trx_id.to_string(),
            status: trx.status,
            track_id: trx.track_id.clone(),
            amount: trx.amount,
            rdf_amount: trx.refunded,
            remain_amount: trx.amount.saturating_sub(trx.refunded),
        })
    }

    async fn pay_with_billing_key(
        &self,
        request: &BillingPaymentRequest,
    ) -> GatewayResult<BillingPaymentData> {
        let mut state = self.state.lock().await;
        Self::begin(&mut state, "billing")?;
        Self::reuse_reference(&state, &request.track_id)?;
        if request.billing_key.is_empty() {
            return Err(GatewayFailure::new(ResultCode::new("1004"), "invalid billing key"));
        }
        let trx_id = self.next_trx_id();
        state
            .references
            .insert(request.track_id.clone(), trx_id.clone());
        state.transactions.insert(
            trx_id.clone(),
            SimulatedTrx {
                track_id: request.track_id.clone(),
                amount: request.amount,
                status: GatewayTrxStatus::Approved,
                refunded: Money::ZERO,
            },
        );
        Ok(BillingPaymentData {
            trx_id,
            track_id: request.track_id.clone(),
            amount: request.amount,
        })
    }
}

#[derive(Default)]
struct IdentityState {
    tokens: HashMap<String, VerifiedIdentity>,
    passwords: HashMap<String, String>,
    accounts: HashSet<String>,
    fail_deletes: bool,
}

/// Identity provider fake keyed by username (email).
#[derive(Default, Clone)]
pub struct InMemoryIdentityProvider {
    state: Arc<RwLock<IdentityState>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account and a bearer token that resolves to it.
    pub async fn register(&self, token: &str, subject: &str, email: &str) {
        let mut state = self.state.write().await;
        state.tokens.insert(
            token.to_string(),
            VerifiedIdentity {
                subject: subject.to_string(),
                email: Some(email.to_string()),
            },
        );
        state.accounts.insert(email.to_string());
    }

    pub async fn has_account(&self, username: &str) -> bool {
        self.state.read().await.accounts.contains(username)
    }

    pub async fn password_of(&self, username: &str) -> Option<String> {
        self.state.read().await.passwords.get(username).cloned()
    }

    pub async fn fail_deletes(&self, fail: bool) {
        self.state.write().await.fail_deletes = fail;
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn verify_token(&self, token: &str) -> std::result::Result<VerifiedIdentity, IdentityError> {
        let state = self.state.read().await;
        state
            .tokens
            .get(token)
            .cloned()
            .ok_or(IdentityError::InvalidCredential)
    }

    async fn set_password(
        &self,
        username: &str,
        secret: &str,
    ) -> std::result::Result<(), IdentityError> {
        let mut state = self.state.write().await;
        state.accounts.insert(username.to_string());
        state
            .passwords
            .insert(username.to_string(), secret.to_string());
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> std::result::Result<(), IdentityError> {
        let mut state = self.state.write().await;
        if state.fail_deletes {
            return Err(IdentityError::Provider("service unavailable".to_string()));
        }
        if !state.accounts.remove(username) {
            return Err(IdentityError::NotFound);
        }
        state.passwords.remove(username);
        state
            .tokens
            .retain(|_, id| id.email.as_deref() != Some(username));
        Ok(())
    }
}

/// Produces unsigned local URLs carrying the key and expiry.
#[derive(Debug, Clone)]
pub struct InMemoryUploadAuthorizer {
    base_url: String,
}

impl InMemoryUploadAuthorizer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for InMemoryUploadAuthorizer {
    fn default() -> Self {
        Self::new("https://uploads.local")
    }
}

#[async_trait]
impl UploadAuthorizer for InMemoryUploadAuthorizer {
    async fn presign_put(&self, key: &str, content_type: &str, ttl: Duration) -> Result<String> {
        Ok(format!(
            "{}/{}?content-type={}&expires-in={}",
            self.base_url.trim_end_matches('/'),
            key,
            content_type,
            ttl.as_secs()
        ))
    }
}
