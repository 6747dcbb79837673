//! Bearer-token gate for protected routes.

use crate::AppResources;
use crate::api::cors::preflight_response;
use crate::backend::{BearerClaims, IdentityBackend, InternalIdentity};
use crate::error::{AuthenticationError, GatewayError};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Attached to the request extensions once the bearer token checks out.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub uid: String,
    pub claims: BearerClaims,
}

/// Raw token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthenticationError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthenticationError::InvalidHeader)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AuthenticationError::InvalidHeader)?
        .trim();
    if token.is_empty() {
        return Err(AuthenticationError::MissingToken);
    }
    Ok(token)
}

pub async fn verify_session(
    backend: &dyn IdentityBackend,
    headers: &HeaderMap,
) -> Result<VerifiedSession, AuthenticationError> {
    let token = bearer_token(headers)?;
    let claims = backend.verify_bearer_token(token).await?;
    Ok(VerifiedSession {
        uid: claims.uid.clone(),
        claims,
    })
}

/// Middleware: OPTIONS passes as a bare preflight, everything else needs a
/// valid bearer token. The wrapped handler only runs on success.
pub async fn require_session(
    State(resources): State<AppResources>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return preflight_response();
    }

    match verify_session(resources.backend.as_ref(), request.headers()).await {
        Ok(session) => {
            tracing::debug!(uid = %session.uid, "bearer token accepted");
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        Err(e) => GatewayError::Authentication(e).into_response(),
    }
}

/// Full identity record for `uid`.
pub async fn get_user_by_uid(
    backend: &dyn IdentityBackend,
    uid: &str,
) -> Result<InternalIdentity, GatewayError> {
    backend
        .get_identity(uid)
        .await
        .map_err(|e| GatewayError::Upstream(format!("Failed to get user: {e}")))
}
