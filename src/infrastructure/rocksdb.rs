use crate::domain::deal::Deal;
use crate::domain::discount::Discount;
use crate::domain::ports::{
    DealStore, DiscountStore, Mutation, RetentionStore, SettingsStore, UserStore,
};
use crate::domain::retention::{WithdrawnDeal, WithdrawnUser};
use crate::domain::settings::SettingsOverride;
use crate::domain::user::User;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CF_USERS: &str = "users";
pub const CF_DEALS: &str = "deals";
pub const CF_DISCOUNTS: &str = "discounts";
pub const CF_WITHDRAWN_USERS: &str = "withdrawn_users";
pub const CF_WITHDRAWN_DEALS: &str = "withdrawn_deals";
pub const CF_SETTINGS: &str = "settings";

const SETTINGS_KEY: &[u8] = b"system";

/// Persistent store with one column family per entity, values as JSON.
///
/// Secondary lookups (owner, email, code, track id) scan their column family.
/// Read-modify-write operations serialize on `writes` so version checks and
/// discount consumption stay atomic within the process.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates the database at `path` with every column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [
            CF_USERS,
            CF_DEALS,
            CF_DISCOUNTS,
            CF_WITHDRAWN_USERS,
            CF_WITHDRAWN_DEALS,
            CF_SETTINGS,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)?;
        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::internal(format!("column family {name} not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_pinned_cf(&cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        self.db.put_cf(&cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn exists(&self, family: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(family)?;
        Ok(self.db.get_pinned_cf(&cf, key)?.is_some())
    }

    fn scan<T: DeserializeOwned>(&self, family: &str, mut keep: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let mut found = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let entity: T = serde_json::from_slice(&value)?;
            if keep(&entity) {
                found.push(entity);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl UserStore for RocksDbStore {
    async fn insert(&self, user: User) -> Result<()> {
        let _guard = self.writes.lock().await;
        if self.exists(CF_USERS, user.uid.as_bytes())? {
            return Err(PaymentError::AlreadyExists {
                resource: "User",
                id: user.uid,
            });
        }
        self.put_json(CF_USERS, user.uid.as_bytes(), &user)
    }

    async fn get(&self, uid: &str) -> Result<Option<User>> {
        self.get_json(CF_USERS, uid.as_bytes())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut found = self.scan(CF_USERS, |u: &User| u.email.as_deref() == Some(email))?;
        Ok(found.pop())
    }

    async fn all(&self) -> Result<Vec<User>> {
        self.scan(CF_USERS, |_: &User| true)
    }

    async fn modify(&self, uid: &str, mutation: Mutation<'_, User>) -> Result<User> {
        let _guard = self.writes.lock().await;
        let mut user: User = self
            .get_json(CF_USERS, uid.as_bytes())?
            .ok_or_else(|| PaymentError::not_found("User", uid))?;
        mutation(&mut user)?;
        self.put_json(CF_USERS, uid.as_bytes(), &user)?;
        Ok(user)
    }

    async fn delete(&self, uid: &str) -> Result<()> {
        let _guard = self.writes.lock().await;
        let cf = self.cf(CF_USERS)?;
        self.db.delete_cf(&cf, uid.as_bytes())?;
        Ok(())
    }
}

#[async_trait]
impl DealStore for RocksDbStore {
    async fn insert(&self, deal: Deal) -> Result<()> {
        let _guard = self.writes.lock().await;
        if self.exists(CF_DEALS, deal.did.as_bytes())? {
            return Err(PaymentError::AlreadyExists {
                resource: "Deal",
                id: deal.did,
            });
        }
        self.put_json(CF_DEALS, deal.did.as_bytes(), &deal)
    }

    async fn get(&self, did: &str) -> Result<Option<Deal>> {
        self.get_json(CF_DEALS, did.as_bytes())
    }

    async fn update(&self, mut deal: Deal) -> Result<Deal> {
        let _guard = self.writes.lock().await;
        let stored: Deal = self
            .get_json(CF_DEALS, deal.did.as_bytes())?
            .ok_or_else(|| PaymentError::not_found("Deal", deal.did.clone()))?;
        if stored.version != deal.version {
            return Err(PaymentError::ConcurrentModification(format!(
                "deal {} is at version {}, update was based on {}",
                deal.did, stored.version, deal.version
            )));
        }
        deal.version += 1;
        self.put_json(CF_DEALS, deal.did.as_bytes(), &deal)?;
        Ok(deal)
    }

    async fn list_by_owner(&self, uid: &str) -> Result<Vec<Deal>> {
        let mut deals = self.scan(CF_DEALS, |d: &Deal| d.uid == uid)?;
        deals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deals)
    }

    async fn find_by_track_id(&self, track_id: &str) -> Result<Option<Deal>> {
        let mut found = self.scan(CF_DEALS, |d: &Deal| d.pg_track_id.as_deref() == Some(track_id))?;
        Ok(found.pop())
    }
}

#[async_trait]
impl DiscountStore for RocksDbStore {
    async fn insert(&self, mut discount: Discount) -> Result<()> {
        let _guard = self.writes.lock().await;
        if self.exists(CF_DISCOUNTS, discount.id.as_bytes())? {
            return Err(PaymentError::AlreadyExists {
                resource: "Discount",
                id: discount.id,
            });
        }
        discount.code = discount.code.as_deref().map(Discount::normalize_code);
        self.put_json(CF_DISCOUNTS, discount.id.as_bytes(), &discount)
    }

    async fn get(&self, id: &str) -> Result<Option<Discount>> {
        self.get_json(CF_DISCOUNTS, id.as_bytes())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Discount>> {
        let code = Discount::normalize_code(code);
        let mut found = self.scan(CF_DISCOUNTS, |d: &Discount| {
            d.code.as_deref() == Some(code.as_str())
        })?;
        Ok(found.pop())
    }

    async fn modify(&self, id: &str, mutation: Mutation<'_, Discount>) -> Result<Discount> {
        let _guard = self.writes.lock().await;
        let mut discount: Discount = self
            .get_json(CF_DISCOUNTS, id.as_bytes())?
            .ok_or_else(|| PaymentError::not_found("Discount", id))?;
        mutation(&mut discount)?;
        self.put_json(CF_DISCOUNTS, id.as_bytes(), &discount)?;
        Ok(discount)
    }
}

#[async_trait]
impl RetentionStore for RocksDbStore {
    async fn put_user(&self, user: WithdrawnUser) -> Result<()> {
        self.put_json(CF_WITHDRAWN_USERS, user.uid.as_bytes(), &user)
    }

    async fn put_deal(&self, deal: WithdrawnDeal) -> Result<()> {
        self.put_json(CF_WITHDRAWN_DEALS, deal.wdid.as_bytes(), &deal)
    }

    async fn get_user(&self, uid: &str) -> Result<Option<WithdrawnUser>> {
        self.get_json(CF_WITHDRAWN_USERS, uid.as_bytes())
    }

    async fn deals_for_user(&self, uid: &str) -> Result<Vec<WithdrawnDeal>> {
        self.scan(CF_WITHDRAWN_DEALS, |d: &WithdrawnDeal| d.uid == uid)
    }
}

#[async_trait]
impl SettingsStore for RocksDbStore {
    async fn load(&self) -> Result<Option<SettingsOverride>> {
        self.get_json(CF_SETTINGS, SETTINGS_KEY)
    }

    async fn save(&self, layer: SettingsOverride) -> Result<()> {
        self.put_json(CF_SETTINGS, SETTINGS_KEY, &layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deal::tests::new_deal_input;
    use crate::domain::money::Money;
    use crate::domain::settings::GradeSettings;
    use crate::domain::user::Grade;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn user() -> User {
        User::new(
            "U1",
            "Oh",
            Some("oh@example.com".to_string()),
            "01012121212",
            Grade::Basic,
            GradeSettings::default().basic,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_open_creates_column_families() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        for name in [CF_USERS, CF_DEALS, CF_DISCOUNTS, CF_WITHDRAWN_USERS, CF_WITHDRAWN_DEALS, CF_SETTINGS] {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_user_round_trip_and_modify() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        UserStore::insert(&store, user()).await.unwrap();
        assert!(matches!(
            UserStore::insert(&store, user()).await,
            Err(PaymentError::AlreadyExists { .. })
        ));

        let found = store.find_by_email("oh@example.com").await.unwrap().unwrap();
        assert_eq!(found.uid, "U1");

        let updated = UserStore::modify(&store, "U1", &|u: &mut User| {
            u.record_payment(Money::new(dec!(1_000)), Utc::now());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(updated.total_deal_count, 1);

        UserStore::delete(&store, "U1").await.unwrap();
        assert!(UserStore::get(&store, "U1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deal_update_checks_version() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        let deal = Deal::new(
            "D1",
            "U1",
            new_deal_input(dec!(10_000)),
            GradeSettings::default().basic.fee_rate,
            Utc::now(),
        )
        .unwrap();
        DealStore::insert(&store, deal.clone()).await.unwrap();

        let updated = DealStore::update(&store, deal.clone()).await.unwrap();
        assert_eq!(updated.version, 1);
        assert!(matches!(
            DealStore::update(&store, deal).await,
            Err(PaymentError::ConcurrentModification(_))
        ));
        assert_eq!(store.list_by_owner("U1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDbStore::open(dir.path()).unwrap();
            UserStore::insert(&store, user()).await.unwrap();
            store.save(SettingsOverride::default()).await.unwrap();
        }
        let store = RocksDbStore::open(dir.path()).unwrap();
        assert!(UserStore::get(&store, "U1").await.unwrap().is_some());
        assert!(store.load().await.unwrap().is_some());
    }
}
