use crate::domain::ports::DynSettingsStore;
use crate::domain::settings::{SettingsOverride, SystemSettings};
use crate::error::Result;
use tracing::info;

/// Resolves effective tier settings and persists operator overrides.
///
/// Precedence, lowest first: built-in defaults, the deployment layer from
/// configuration, the persisted layer, then a request-supplied layer.
#[derive(Clone)]
pub struct SettingsService {
    store: DynSettingsStore,
    deployment: Option<SettingsOverride>,
}

impl SettingsService {
    pub fn new(store: DynSettingsStore, deployment: Option<SettingsOverride>) -> Self {
        Self { store, deployment }
    }

    pub async fn effective(&self) -> Result<SystemSettings> {
        self.resolve_with(None).await
    }

    /// Previews settings with `request` applied on top, without saving.
    pub async fn resolve_with(&self, request: Option<&SettingsOverride>) -> Result<SystemSettings> {
        let persisted = self.store.load().await?;
        let layers: Vec<&SettingsOverride> = self
            .deployment
            .iter()
            .chain(persisted.iter())
            .chain(request)
            .collect();
        SystemSettings::resolve(&layers)
    }

    /// Merges `layer` into the persisted override and returns the result.
    /// Nothing is saved when the merged settings fail validation.
    pub async fn update(&self, layer: SettingsOverride) -> Result<SystemSettings> {
        let persisted = self.store.load().await?.unwrap_or_default();
        let merged = persisted.merged_with(&layer);
        let layers: Vec<&SettingsOverride> =
            self.deployment.iter().chain(Some(&merged)).collect();
        let settings = SystemSettings::resolve(&layers)?;
        self.store.save(merged).await?;
        info!(
            platinum_threshold = %settings.grade_criteria.platinum_threshold,
            basic_threshold = %settings.grade_criteria.basic_threshold,
            "System settings updated"
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::ports::SettingsStore;
    use crate::domain::settings::GradeCriteriaOverride;
    use crate::error::PaymentError;
    use crate::infrastructure::in_memory::InMemorySettingsStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn criteria(platinum: Option<i64>, basic: Option<i64>) -> SettingsOverride {
        SettingsOverride {
            grade_criteria: GradeCriteriaOverride {
                platinum_threshold: platinum.map(|v| Money::new(v.into())),
                basic_threshold: basic.map(|v| Money::new(v.into())),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_update_merges_with_persisted_layer() {
        let service = SettingsService::new(Arc::new(InMemorySettingsStore::new()), None);
        service
            .update(criteria(Some(20_000_000), None))
            .await
            .unwrap();
        let settings = service.update(criteria(None, Some(6_000_000))).await.unwrap();
        assert_eq!(
            settings.grade_criteria.platinum_threshold,
            Money::new(dec!(20_000_000))
        );
        assert_eq!(
            settings.grade_criteria.basic_threshold,
            Money::new(dec!(6_000_000))
        );
    }

    #[tokio::test]
    async fn test_invalid_update_is_not_saved() {
        let store = Arc::new(InMemorySettingsStore::new());
        let service = SettingsService::new(store.clone(), None);
        let result = service.update(criteria(Some(1_000_000), None)).await;
        assert!(matches!(result, Err(PaymentError::Validation(_))));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persisted_layer_beats_deployment_layer() {
        let store = Arc::new(InMemorySettingsStore::new());
        store.save(criteria(Some(12_000_000), None)).await.unwrap();
        let service = SettingsService::new(store, Some(criteria(Some(15_000_000), None)));
        let settings = service.effective().await.unwrap();
        assert_eq!(
            settings.grade_criteria.platinum_threshold,
            Money::new(dec!(12_000_000))
        );

        let preview = service
            .resolve_with(Some(&criteria(Some(11_000_000), None)))
            .await
            .unwrap();
        assert_eq!(
            preview.grade_criteria.platinum_threshold,
            Money::new(dec!(11_000_000))
        );
    }
}
