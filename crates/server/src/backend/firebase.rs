//! Firebase Auth as the identity backend.
//!
//! - Session credentials are Firebase custom tokens: RS256 JWTs signed locally
//!   with the service-account key.
//! - Bearer credentials are Firebase ID tokens, verified against the
//!   securetoken JWKS.
//! - Identity records are read and created through the Identity Toolkit v1
//!   REST API, authorized with an access token obtained by the JWT-bearer
//!   grant and cached until shortly before it expires.

use super::{
    BearerClaims, IdentityBackend, IdentityMetadata, InternalIdentity, NewIdentity, ProviderInfo,
    SessionClaims,
};
use crate::config::ServiceAccount;
use crate::error::{BackendError, ConfigurationError, VerifyError};
use crate::jwks::{DEFAULT_REFRESH_INTERVAL, JwksCache};
use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, EncodingKey, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;

pub const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";
const ACCESS_TOKEN_SCOPES: &str = "https://www.googleapis.com/auth/cloud-platform \
                                   https://www.googleapis.com/auth/identitytoolkit";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Cached access tokens are renewed this long before they expire.
const ACCESS_TOKEN_SLACK_SECS: i64 = 300;
const MAX_UID_LEN: usize = 128;

/// Remote endpoints; overridable for tests.
#[derive(Debug, Clone)]
pub struct FirebaseEndpoints {
    pub identity_toolkit_url: String,
    pub oauth_token_url: String,
    pub jwks_url: String,
    pub issuer_prefix: String,
}

impl Default for FirebaseEndpoints {
    fn default() -> Self {
        Self {
            identity_toolkit_url: "https://identitytoolkit.googleapis.com/v1".to_string(),
            oauth_token_url: "https://oauth2.googleapis.com/token".to_string(),
            jwks_url:
                "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"
                    .to_string(),
            issuer_prefix: "https://securetoken.google.com/".to_string(),
        }
    }
}

struct CachedAccessToken {
    token: String,
    expires_at: i64,
}

pub struct FirebaseBackend {
    project_id: String,
    client_email: String,
    signing_key: EncodingKey,
    http: reqwest::Client,
    endpoints: FirebaseEndpoints,
    keys: JwksCache,
    access_token: Mutex<Option<CachedAccessToken>>,
}

#[derive(Serialize)]
struct CustomTokenClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    uid: &'a str,
    claims: &'a SessionClaims,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct RestErrorBody {
    error: RestError,
}

#[derive(Deserialize)]
struct RestError {
    message: String,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountRecord>,
}

/// Account as returned by `accounts:lookup`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecord {
    local_id: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    display_name: Option<String>,
    photo_url: Option<String>,
    phone_number: Option<String>,
    #[serde(default)]
    disabled: bool,
    /// JSON object serialized as a string.
    custom_attributes: Option<String>,
    /// Milliseconds since the epoch, as a string.
    created_at: Option<String>,
    last_login_at: Option<String>,
    /// RFC 3339.
    last_refresh_at: Option<String>,
    #[serde(default)]
    provider_user_info: Vec<ProviderUserInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderUserInfo {
    provider_id: String,
    raw_id: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountRequest<'a> {
    local_id: &'a str,
    email: &'a str,
    email_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    photo_url: Option<&'a str>,
}

impl From<AccountRecord> for InternalIdentity {
    fn from(record: AccountRecord) -> Self {
        let custom_claims = record
            .custom_attributes
            .as_deref()
            .and_then(|raw| serde_json::from_str::<BTreeMap<String, Value>>(raw).ok());
        InternalIdentity {
            uid: record.local_id,
            email: record.email,
            email_verified: record.email_verified,
            display_name: record.display_name,
            photo_url: record.photo_url,
            phone_number: record.phone_number,
            disabled: record.disabled,
            custom_claims,
            metadata: IdentityMetadata {
                creation_time: record.created_at.as_deref().and_then(parse_millis),
                last_sign_in_time: record.last_login_at.as_deref().and_then(parse_millis),
                last_refresh_time: record
                    .last_refresh_at
                    .as_deref()
                    .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok()),
            },
            provider_data: record
                .provider_user_info
                .into_iter()
                .map(|p| ProviderInfo {
                    provider_id: p.provider_id,
                    uid: p.raw_id,
                    email: p.email,
                    display_name: p.display_name,
                    photo_url: p.photo_url,
                })
                .collect(),
        }
    }
}

fn parse_millis(raw: &str) -> Option<OffsetDateTime> {
    let millis: i128 = raw.parse().ok()?;
    OffsetDateTime::from_unix_timestamp_nanos(millis * 1_000_000).ok()
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn validate_uid(uid: &str) -> Result<(), BackendError> {
    if uid.is_empty() || uid.len() > MAX_UID_LEN {
        return Err(BackendError::InvalidArgument(format!(
            "uid must be a non-empty string of at most {MAX_UID_LEN} characters"
        )));
    }
    Ok(())
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    match err.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => VerifyError::Malformed(err.to_string()),
        _ => VerifyError::Other(err.to_string()),
    }
}

impl FirebaseBackend {
    pub fn new(
        account: ServiceAccount,
        endpoints: FirebaseEndpoints,
    ) -> Result<Self, ConfigurationError> {
        let signing_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| ConfigurationError::InvalidPrivateKey(e.to_string()))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("identity-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;
        let keys = JwksCache::new(
            endpoints.jwks_url.clone(),
            http.clone(),
            DEFAULT_REFRESH_INTERVAL,
        );
        tracing::debug!(project_id = %account.project_id, "built Firebase backend client");
        Ok(Self {
            project_id: account.project_id,
            client_email: account.client_email,
            signing_key,
            http,
            endpoints,
            keys,
            access_token: Mutex::new(None),
        })
    }

    fn issuer(&self) -> String {
        format!("{}{}", self.endpoints.issuer_prefix, self.project_id)
    }

    fn accounts_url(&self, suffix: &str) -> String {
        format!(
            "{}/projects/{}/accounts{}",
            self.endpoints.identity_toolkit_url, self.project_id, suffix
        )
    }

    /// OAuth2 access token for the Identity Toolkit API.
    async fn access_token(&self) -> Result<String, BackendError> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at - ACCESS_TOKEN_SLACK_SECS > now()
        {
            return Ok(token.token.clone());
        }

        let iat = now();
        let assertion = encode(
            &Header::new(Algorithm::RS256),
            &AssertionClaims {
                iss: &self.client_email,
                scope: ACCESS_TOKEN_SCOPES,
                aud: &self.endpoints.oauth_token_url,
                iat,
                exp: iat + TOKEN_LIFETIME_SECS,
            },
            &self.signing_key,
        )
        .map_err(|e| BackendError::Signing(e.to_string()))?;

        let response = self
            .http
            .post(&self.endpoints.oauth_token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BackendError::Upstream(format!("access token request: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Upstream(format!(
                "access token request returned HTTP {status}: {body}"
            )));
        }
        let token: AccessTokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Upstream(format!("access token response: {e}")))?;

        tracing::debug!(expires_in = token.expires_in, "obtained backend access token");
        *cached = Some(CachedAccessToken {
            token: token.access_token.clone(),
            expires_at: iat + token.expires_in,
        });
        Ok(token.access_token)
    }

    async fn post_json<B: Serialize>(
        &self,
        url: &str,
        uid: &str,
        body: &B,
    ) -> Result<reqwest::Response, BackendError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Upstream(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<RestErrorBody>(&text)
            .map(|b| b.error.message)
            .unwrap_or(text);
        if message.starts_with("USER_NOT_FOUND") {
            Err(BackendError::NotFound(uid.to_string()))
        } else if message.starts_with("DUPLICATE_LOCAL_ID") {
            Err(BackendError::AlreadyExists(uid.to_string()))
        } else {
            Err(BackendError::Upstream(format!("HTTP {status}: {message}")))
        }
    }
}

#[async_trait]
impl IdentityBackend for FirebaseBackend {
    #[tracing::instrument(skip_all)]
    async fn verify_bearer_token(&self, raw: &str) -> Result<BearerClaims, VerifyError> {
        let header = decode_header(raw).map_err(|e| VerifyError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(VerifyError::Malformed(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| VerifyError::Malformed("token has no \"kid\" header".to_string()))?;
        let key = self
            .keys
            .decoding_key(&kid)
            .await
            .map_err(|e| VerifyError::Other(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[self.issuer()]);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);

        let claims = decode::<BearerClaims>(raw, &key, &validation)
            .map_err(map_jwt_error)?
            .claims;
        if claims.uid.is_empty() || claims.uid.len() > MAX_UID_LEN {
            return Err(VerifyError::Other(
                "token has an invalid \"sub\" claim".to_string(),
            ));
        }
        Ok(claims)
    }

    #[tracing::instrument(skip(self))]
    async fn get_identity(&self, uid: &str) -> Result<InternalIdentity, BackendError> {
        validate_uid(uid)?;
        let response = self
            .post_json(
                &self.accounts_url(":lookup"),
                uid,
                &serde_json::json!({ "localId": [uid] }),
            )
            .await?;
        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Upstream(format!("lookup response: {e}")))?;
        lookup
            .users
            .into_iter()
            .next()
            .map(InternalIdentity::from)
            .ok_or_else(|| BackendError::NotFound(uid.to_string()))
    }

    #[tracing::instrument(skip(self, fields), fields(uid = %fields.uid))]
    async fn create_identity(&self, fields: NewIdentity) -> Result<InternalIdentity, BackendError> {
        validate_uid(&fields.uid)?;
        self.post_json(
            &self.accounts_url(""),
            &fields.uid,
            &CreateAccountRequest {
                local_id: &fields.uid,
                email: &fields.email,
                email_verified: fields.email_verified,
                display_name: fields.display_name.as_deref(),
                photo_url: fields.photo_url.as_deref(),
            },
        )
        .await?;
        tracing::info!(uid = %fields.uid, "created identity record");
        self.get_identity(&fields.uid).await
    }

    #[tracing::instrument(skip(self, claims))]
    async fn mint_session_credential(
        &self,
        uid: &str,
        claims: &SessionClaims,
    ) -> Result<String, BackendError> {
        validate_uid(uid)?;
        let iat = now();
        encode(
            &Header::new(Algorithm::RS256),
            &CustomTokenClaims {
                iss: &self.client_email,
                sub: &self.client_email,
                aud: CUSTOM_TOKEN_AUDIENCE,
                iat,
                exp: iat + TOKEN_LIFETIME_SECS,
                uid,
                claims,
            },
            &self.signing_key,
        )
        .map_err(|e| BackendError::Signing(e.to_string()))
    }
}
