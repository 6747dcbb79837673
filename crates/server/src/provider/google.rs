use super::{IdTokenClaims, IdentityProvider, ProviderTokens};
use crate::config::{AppConfig, ClientCredentials};
use crate::error::{ConfigurationError, ProviderError};
use crate::jwks::{DEFAULT_REFRESH_INTERVAL, JwksCache};
use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use url::Url;

pub const SCOPES: &str = "openid email profile";
pub const ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub jwks_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            jwks_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
        }
    }
}

pub struct GoogleProvider {
    credentials: Option<ClientCredentials>,
    endpoints: GoogleEndpoints,
    http: reqwest::Client,
    keys: JwksCache,
}

impl GoogleProvider {
    pub fn new(credentials: Option<ClientCredentials>, endpoints: GoogleEndpoints) -> Self {
        let http = reqwest::Client::new();
        let keys = JwksCache::new(
            endpoints.jwks_url.clone(),
            http.clone(),
            DEFAULT_REFRESH_INTERVAL,
        );
        Self {
            credentials,
            endpoints,
            http,
            keys,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.provider_credentials(), GoogleEndpoints::default())
    }

    fn credentials(&self) -> Result<&ClientCredentials, ConfigurationError> {
        self.credentials
            .as_ref()
            .ok_or(ConfigurationError::MissingProviderCredentials)
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn id(&self) -> &'static str {
        "google"
    }

    fn ensure_configured(&self) -> Result<(), ConfigurationError> {
        self.credentials().map(|_| ())
    }

    fn authorization_url(
        &self,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<String, ConfigurationError> {
        let credentials = self.credentials()?;
        let mut params = vec![
            ("client_id", credentials.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", SCOPES),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ];
        if let Some(state) = state {
            params.push(("state", state));
        }
        Url::parse_with_params(&self.endpoints.auth_url, &params)
            .map(String::from)
            .map_err(|e| ConfigurationError::InvalidUrl(e.to_string()))
    }

    #[tracing::instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderTokens, ProviderError> {
        let credentials = self.credentials()?;
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("code", code),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Exchange(format!("HTTP {status}: {body}")));
        }
        response
            .json::<ProviderTokens>()
            .await
            .map_err(|e| ProviderError::Exchange(format!("failed to parse token response: {e}")))
    }

    #[tracing::instrument(skip_all)]
    async fn verify_id_token(&self, id_token: &str) -> Result<IdTokenClaims, ProviderError> {
        let credentials = self.credentials()?;
        let header =
            decode_header(id_token).map_err(|e| ProviderError::InvalidIdToken(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::InvalidIdToken("missing kid header".to_string()))?;
        let key = self
            .keys
            .decoding_key(&kid)
            .await
            .map_err(|e| ProviderError::Keys(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[credentials.client_id.as_str()]);
        validation.set_issuer(&ISSUERS);

        decode::<IdTokenClaims>(id_token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => {
                    ProviderError::InvalidIdToken("token has expired".to_string())
                }
                _ => ProviderError::InvalidIdToken(e.to_string()),
            })
    }
}
