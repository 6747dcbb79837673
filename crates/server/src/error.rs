//! Error taxonomy shared by the gateway.
//!
//! Lower layers (backend, provider, session verification) each have their own
//! error enum. Handlers convert them into [`GatewayError`], whose variants map
//! one-to-one onto HTTP status classes, and finally into an [`ErrorResponse`]
//! JSON body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Missing or unusable configuration. Cloneable so a failed backend
/// initialization can be cached and handed out to every later caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Missing GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET env vars")]
    MissingProviderCredentials,
    #[error(
        "identity backend credentials are not configured: set FIREBASE_SERVICE_ACCOUNT_KEY or \
         FIREBASE_PROJECT_ID/FIREBASE_CLIENT_EMAIL/FIREBASE_PRIVATE_KEY"
    )]
    MissingBackendCredentials,
    #[error("invalid service account key: {0}")]
    InvalidServiceAccount(String),
    #[error("invalid service account private key: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Failures reported by the identity backend for record and credential operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Unconfigured(#[from] ConfigurationError),
    #[error("no user record found for uid {0}")]
    NotFound(String),
    #[error("a user record already exists for uid {0}")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
    #[error("identity backend request failed: {0}")]
    Upstream(String),
}

/// Failures while verifying a bearer credential against the identity backend.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("token has expired")]
    Expired,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error(transparent)]
    Unconfigured(#[from] ConfigurationError),
    #[error("{0}")]
    Other(String),
}

/// Why a request failed bearer authentication. The display strings are the
/// messages returned to clients.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("Authorization header missing or invalid format")]
    InvalidHeader,
    #[error("Token not provided")]
    MissingToken,
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token format")]
    Malformed,
    #[error("Token verification failed: {0}")]
    Rejected(String),
}

impl From<VerifyError> for AuthenticationError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Expired => AuthenticationError::Expired,
            VerifyError::Malformed(_) => AuthenticationError::Malformed,
            VerifyError::Unconfigured(e) => AuthenticationError::Rejected(e.to_string()),
            VerifyError::Other(message) => AuthenticationError::Rejected(message),
        }
    }
}

/// Failures talking to the external OAuth identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("token exchange failed: {0}")]
    Exchange(String),
    #[error("failed to fetch provider signing keys: {0}")]
    Keys(String),
    #[error("No id_token received from the identity provider")]
    MissingIdToken,
    #[error("ID token verification failed: {0}")]
    InvalidIdToken(String),
    #[error("ID token payload missing sub/email")]
    MissingClaims,
}

/// Request-level error taxonomy. Each variant fixes the HTTP status class.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("{0}")]
    Input(String),
    #[error("{0}")]
    Protocol(String),
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error("{0}")]
    NotFound(String),
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Configuration(e) => GatewayError::Configuration(e),
            ProviderError::Exchange(_) | ProviderError::Keys(_) => {
                GatewayError::Upstream(err.to_string())
            }
            ProviderError::MissingIdToken
            | ProviderError::InvalidIdToken(_)
            | ProviderError::MissingClaims => GatewayError::Protocol(err.to_string()),
        }
    }
}

impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unconfigured(e) => GatewayError::Configuration(e),
            BackendError::NotFound(_) => GatewayError::NotFound(err.to_string()),
            other => GatewayError::Upstream(other.to_string()),
        }
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Configuration(_) | GatewayError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Input(_) | GatewayError::Protocol(_) => StatusCode::BAD_REQUEST,
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Attach the headline used as the `error` field for failures whose cause
    /// is reported separately in `message`.
    pub fn with_context(self, context: &'static str) -> ApiError {
        ApiError {
            context,
            source: self,
        }
    }

    fn default_context(&self) -> &'static str {
        match self {
            GatewayError::Authentication(_) => "Unauthorized",
            GatewayError::NotFound(_) => "Not found",
            _ => "Internal server error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let context = self.default_context();
        self.with_context(context).into_response()
    }
}

/// A [`GatewayError`] together with the endpoint-specific headline.
#[derive(Debug)]
pub struct ApiError {
    context: &'static str,
    source: GatewayError,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.source.status()
    }

    /// Client-caused input and protocol errors carry their cause as the
    /// headline; everything else reports `{error: context, message: cause}`.
    pub fn body(&self) -> ErrorResponse {
        match &self.source {
            GatewayError::Input(message) | GatewayError::Protocol(message) => {
                ErrorResponse::new(message.clone())
            }
            other => ErrorResponse::new(self.context).with_message(other.to_string()),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let context = err.default_context();
        err.with_context(context)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.source, context = self.context, "request failed");
        } else {
            tracing::debug!(error = %self.source, context = self.context, %status, "request rejected");
        }
        self.body().with_status(status)
    }
}

/// JSON error body returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Short description of the failure
    pub error: String,
    /// Underlying cause, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}
