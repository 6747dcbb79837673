//! External OAuth identity providers.

pub mod google;

use crate::error::{ConfigurationError, ProviderError};
use async_trait::async_trait;
use serde::Deserialize;

/// Claims read from a verified provider ID token. Everything is optional here;
/// [`ExternalIdentity`] enforces what the callback needs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Identity asserted by the provider for the duration of one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub issuer: String,
}

impl TryFrom<IdTokenClaims> for ExternalIdentity {
    type Error = ProviderError;

    fn try_from(claims: IdTokenClaims) -> Result<Self, Self::Error> {
        let subject = claims.sub.filter(|s| !s.is_empty());
        let email = claims.email.filter(|e| !e.is_empty());
        let (Some(subject), Some(email)) = (subject, email) else {
            return Err(ProviderError::MissingClaims);
        };
        Ok(Self {
            subject,
            email,
            email_verified: claims.email_verified.unwrap_or(false),
            name: claims.name,
            picture: claims.picture,
            issuer: claims.iss,
        })
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTokens {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Prefix used for derived uids, e.g. `google`.
    fn id(&self) -> &'static str;

    /// Fails when the client registration is missing.
    fn ensure_configured(&self) -> Result<(), ConfigurationError>;

    /// Consent URL. Pure; performs no network I/O.
    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<String, ConfigurationError>;

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderTokens, ProviderError>;

    /// Check signature, audience and issuer, returning the payload.
    async fn verify_id_token(&self, id_token: &str) -> Result<IdTokenClaims, ProviderError>;
}
