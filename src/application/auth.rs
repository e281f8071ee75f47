use crate::domain::ports::{DynIdentityProvider, DynUserStore, IdentityError};
use crate::domain::user::User;
use crate::error::{PaymentError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

/// Bearer authentication and the social-login bridge.
#[derive(Clone)]
pub struct AuthService {
    users: DynUserStore,
    identity: DynIdentityProvider,
    social_secret_key: String,
}

fn identity_error(e: IdentityError) -> PaymentError {
    match e {
        IdentityError::NotFound | IdentityError::InvalidCredential => {
            PaymentError::Unauthorized(e.to_string())
        }
        IdentityError::Provider(message) => PaymentError::Identity(message),
    }
}

impl AuthService {
    pub fn new(
        users: DynUserStore,
        identity: DynIdentityProvider,
        social_secret_key: impl Into<String>,
    ) -> Self {
        Self {
            users,
            identity,
            social_secret_key: social_secret_key.into(),
        }
    }

    /// Resolves an `Authorization` header value to the calling user.
    pub async fn authenticate(&self, header: &str) -> Result<User> {
        let token = header
            .strip_prefix("Bearer ")
            .unwrap_or(header)
            .trim();
        if token.is_empty() {
            return Err(PaymentError::Unauthorized("missing bearer token".to_string()));
        }
        let identity = self
            .identity
            .verify_token(token)
            .await
            .map_err(identity_error)?;
        let email = identity.email.ok_or_else(|| {
            PaymentError::Unauthorized("credential carries no email".to_string())
        })?;
        debug!(subject = %identity.subject, "Bearer token verified");
        self.users
            .find_by_email(&email)
            .await?
            .ok_or_else(|| PaymentError::not_found("User", email))
    }

    /// Deterministic sign-in secret for a socially authenticated account.
    /// Re-derived on every login, never stored.
    pub fn derive_social_secret(&self, external_id: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.social_secret_key.as_bytes())
            .map_err(|e| PaymentError::internal(e.to_string()))?;
        mac.update(external_id.as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());
        Ok(format!("Kk{}!1", &digest[..20]))
    }

    /// Sets the identity account's secret to the derived value so the social
    /// login can complete as a regular sign-in.
    pub async fn bridge_social_login(&self, email: &str, external_id: &str) -> Result<String> {
        let secret = self.derive_social_secret(external_id)?;
        self.identity
            .set_password(email, &secret)
            .await
            .map_err(identity_error)?;
        info!(email, "Social login bridged");
        Ok(secret)
    }
}
