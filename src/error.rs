use thiserror::Error;

/// Error type shared by every layer of the crate.
///
/// Variants follow the caller-facing taxonomy: input validation, missing or
/// duplicated resources, domain conflicts, payment gateway failures and
/// unclassified internal errors.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("{resource} already exists: {id}")]
    AlreadyExists { resource: &'static str, id: String },
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("Account has {count} active deal(s)")]
    ActiveDeals { count: usize },
    #[error("Discount already used: {0}")]
    DiscountAlreadyUsed(String),
    #[error("Discount not applicable: {0}")]
    DiscountRejected(String),
    #[error("Payment declined ({code}): {message}")]
    GatewayDeclined { code: String, message: String },
    #[error("Payment gateway unavailable ({code}) after {attempts} attempt(s)")]
    GatewayUnavailable { code: String, attempts: u32 },
    #[error("Identity provider error: {0}")]
    Identity(String),
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, PaymentError>;

impl PaymentError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(Box::new(std::io::Error::other(message.into())))
    }

    /// HTTP-class status code for the error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::DiscountRejected(_)
            | Self::GatewayDeclined { .. }
            | Self::Csv(_)
            | Self::Json(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound { .. } => 404,
            Self::MethodNotAllowed(_) => 405,
            Self::AlreadyExists { .. }
            | Self::Conflict(_)
            | Self::ConcurrentModification(_)
            | Self::ActiveDeals { .. }
            | Self::DiscountAlreadyUsed(_) => 409,
            Self::Identity(_) => 502,
            Self::GatewayUnavailable { .. } => 503,
            _ => 500,
        }
    }

    /// Message safe to hand back to a caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.status_code() {
            500 | 502 => "An internal error occurred. Please try again later.".to_string(),
            503 => "The payment service is temporarily unavailable. Please retry.".to_string(),
            _ => match self {
                Self::GatewayDeclined { message, .. } => message.clone(),
                other => other.to_string(),
            },
        }
    }
}
