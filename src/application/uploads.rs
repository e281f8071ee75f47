use crate::config::UploadConfig;
use crate::domain::ports::DynUploadAuthorizer;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

const ALLOWED_TYPES: [(&str, &str); 4] = [
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadGrant {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
    pub max_bytes: u64,
}

/// Issues scoped, short-lived upload grants for deal evidence.
#[derive(Clone)]
pub struct UploadService {
    authorizer: DynUploadAuthorizer,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(authorizer: DynUploadAuthorizer, config: UploadConfig) -> Self {
        Self { authorizer, config }
    }

    pub async fn grant(&self, uid: &str, file_name: &str, size: u64) -> Result<UploadGrant> {
        let file_name = sanitize(file_name);
        let content_type = content_type_for(&file_name)?;
        if size == 0 || size > self.config.max_file_bytes {
            return Err(PaymentError::Validation(format!(
                "file size must be between 1 and {} bytes",
                self.config.max_file_bytes
            )));
        }
        let key = format!("deals/{uid}/{}-{file_name}", uuid::Uuid::new_v4());
        let ttl = self.config.grant_ttl();
        let url = self.authorizer.presign_put(&key, content_type, ttl).await?;
        let expires_at = Utc::now()
            + Duration::from_std(ttl).map_err(|e| PaymentError::internal(e.to_string()))?;
        Ok(UploadGrant {
            key,
            url,
            content_type: content_type.to_string(),
            expires_at,
            max_bytes: self.config.max_file_bytes,
        })
    }
}

/// Keeps the last path segment and replaces anything outside `[A-Za-z0-9._-]`.
fn sanitize(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn content_type_for(file_name: &str) -> Result<&'static str> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    ALLOWED_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, content_type)| *content_type)
        .ok_or_else(|| {
            PaymentError::Validation("only pdf, jpeg and png files are accepted".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryUploadAuthorizer;
    use std::sync::Arc;

    fn service() -> UploadService {
        UploadService::new(
            Arc::new(InMemoryUploadAuthorizer::default()),
            UploadConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_grant_is_scoped_to_owner() {
        let grant = service().grant("U1", "lease contract.PDF", 2048).await.unwrap();
        assert!(grant.key.starts_with("deals/U1/"));
        assert!(grant.key.ends_with("-lease_contract.PDF"));
        assert_eq!(grant.content_type, "application/pdf");
        assert!(grant.url.contains("expires-in=300"));
        assert!(grant.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_rejects_other_types_and_sizes() {
        let service = service();
        assert!(service.grant("U1", "run.exe", 10).await.is_err());
        assert!(service.grant("U1", "noext", 10).await.is_err());
        assert!(service.grant("U1", "a.png", 0).await.is_err());
        assert!(service.grant("U1", "a.png", 11 * 1024 * 1024).await.is_err());
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize("../../etc/passwd.png"), "passwd.png");
        assert_eq!(sanitize("C:\\docs\\bill 1.jpg"), "bill_1.jpg");
    }
}
