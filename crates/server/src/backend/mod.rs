//! Identity backend: canonical identity records, bearer-token verification and
//! session-credential minting.
//!
//! [`IdentityBackend`] is the seam; [`firebase::FirebaseBackend`] talks to the
//! real service and [`memory::MemoryBackend`] keeps everything in process.
//! [`BackendAdapter`] wraps an initializer so the client is built lazily, once,
//! and a configuration failure is remembered for the life of the process.

pub mod firebase;
pub mod memory;

use crate::config::AppConfig;
use crate::error::{BackendError, ConfigurationError, VerifyError};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use utoipa::ToSchema;

/// Canonical identity record owned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InternalIdentity {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    pub disabled: bool,
    #[schema(value_type = Option<Object>)]
    pub custom_claims: Option<BTreeMap<String, Value>>,
    pub metadata: IdentityMetadata,
    pub provider_data: Vec<ProviderInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetadata {
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub creation_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_sign_in_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_refresh_time: Option<OffsetDateTime>,
}

/// An external provider linked to an identity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub provider_id: String,
    pub uid: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

/// Initial attributes for a record created on first sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdentity {
    pub uid: String,
    pub email: String,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Claims embedded in a minted session credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub provider: String,
    pub email: String,
}

/// Decoded bearer credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BearerClaims {
    #[serde(rename = "sub")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase: Option<FirebaseClaims>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default)]
    pub iat: i64,
    pub exp: i64,
    /// Everything else in the token, including custom claims set at mint time.
    #[serde(flatten)]
    pub custom: BTreeMap<String, Value>,
}

impl BearerClaims {
    /// Minimal claim set for a uid; used by the in-memory backend.
    pub fn for_uid(uid: impl Into<String>, exp: i64) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            email_verified: None,
            name: None,
            picture: None,
            firebase: None,
            iss: None,
            aud: None,
            iat: OffsetDateTime::now_utc().unix_timestamp(),
            exp,
            custom: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirebaseClaims {
    #[serde(default)]
    pub identities: BTreeMap<String, Value>,
    #[serde(default)]
    pub sign_in_provider: String,
}

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn verify_bearer_token(&self, raw: &str) -> Result<BearerClaims, VerifyError>;

    /// Fails with [`BackendError::NotFound`] when no record exists.
    async fn get_identity(&self, uid: &str) -> Result<InternalIdentity, BackendError>;

    /// Fails with [`BackendError::AlreadyExists`] when the uid is taken.
    async fn create_identity(&self, fields: NewIdentity) -> Result<InternalIdentity, BackendError>;

    async fn mint_session_credential(
        &self,
        uid: &str,
        claims: &SessionClaims,
    ) -> Result<String, BackendError>;
}

type Initializer =
    Box<dyn Fn() -> Result<Arc<dyn IdentityBackend>, ConfigurationError> + Send + Sync>;

/// Lazily-initialized backend client.
///
/// The first caller runs the initializer; concurrent first callers block on
/// the same cell and observe its single outcome. Failures are cached as well,
/// so an unconfigured backend fails every later call without re-initializing.
pub struct BackendAdapter {
    cell: OnceCell<Result<Arc<dyn IdentityBackend>, ConfigurationError>>,
    init: Initializer,
}

impl BackendAdapter {
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn IdentityBackend>, ConfigurationError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            init: Box::new(init),
        }
    }

    /// Adapter around the Firebase backend built from `config` on first use.
    pub fn firebase(config: &AppConfig) -> Self {
        let config = config.clone();
        Self::new(move || {
            let account = config.service_account()?;
            let backend =
                firebase::FirebaseBackend::new(account, firebase::FirebaseEndpoints::default())?;
            Ok(Arc::new(backend) as Arc<dyn IdentityBackend>)
        })
    }

    /// Adapter that is already initialized with `backend`.
    pub fn ready(backend: Arc<dyn IdentityBackend>) -> Self {
        let adapter = Self::new(|| Err(ConfigurationError::MissingBackendCredentials));
        let _ = adapter.cell.set(Ok(backend));
        adapter
    }

    pub fn client(&self) -> Result<Arc<dyn IdentityBackend>, ConfigurationError> {
        self.cell
            .get_or_init(|| {
                let outcome = (self.init)();
                match &outcome {
                    Ok(_) => tracing::info!("identity backend initialized"),
                    Err(e) => tracing::error!(
                        error = %e,
                        "identity backend initialization failed; caching the error"
                    ),
                }
                outcome
            })
            .clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[async_trait]
impl IdentityBackend for BackendAdapter {
    async fn verify_bearer_token(&self, raw: &str) -> Result<BearerClaims, VerifyError> {
        self.client()?.verify_bearer_token(raw).await
    }

    async fn get_identity(&self, uid: &str) -> Result<InternalIdentity, BackendError> {
        self.client()?.get_identity(uid).await
    }

    async fn create_identity(&self, fields: NewIdentity) -> Result<InternalIdentity, BackendError> {
        self.client()?.create_identity(fields).await
    }

    async fn mint_session_credential(
        &self,
        uid: &str,
        claims: &SessionClaims,
    ) -> Result<String, BackendError> {
        self.client()?.mint_session_credential(uid, claims).await
    }
}
