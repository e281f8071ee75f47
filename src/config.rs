use crate::domain::settings::SettingsOverride;
use crate::error::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration.
///
/// Sources, later ones winning: built-in defaults, an optional TOML file,
/// then `DEALWIRE__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub checkout: CheckoutConfig,
    pub auth: AuthConfig,
    pub uploads: UploadConfig,
    /// JSON file with a tier override layered under persisted settings.
    pub grades_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Static shared key sent in the `Authorization` header.
    pub pay_key: String,
    /// Secret for callback signatures. Unsigned callbacks are accepted when unset.
    pub webhook_secret: Option<String>,
    pub create_timeout_ms: u64,
    pub approve_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub cancel_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://papi.softment.co.kr".to_string(),
            pay_key: String::new(),
            webhook_secret: None,
            create_timeout_ms: 10_000,
            approve_timeout_ms: 10_000,
            status_timeout_ms: 10_000,
            cancel_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn create_timeout(&self) -> Duration {
        Duration::from_millis(self.create_timeout_ms)
    }

    pub fn approve_timeout(&self) -> Duration {
        Duration::from_millis(self.approve_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

/// Backoff for retryable gateway results.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): doubling, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    pub return_url: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            return_url: "http://localhost:3000/api/payments/callback".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Key for deriving social-login secrets.
    pub social_secret_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            social_secret_key: "dealwire-social-secret".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub grant_ttl_secs: u64,
    pub max_file_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            grant_ttl_secs: 300,
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

impl UploadConfig {
    pub fn grant_ttl(&self) -> Duration {
        Duration::from_secs(self.grant_ttl_secs)
    }
}

impl AppConfig {
    /// Loads defaults, the file at `path` when given, then the environment.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix("DEALWIRE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Reads the configured tier override, if any.
    pub fn grades_layer(&self) -> Result<Option<SettingsOverride>> {
        let Some(path) = &self.grades_file else {
            return Ok(None);
        };
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }
}
