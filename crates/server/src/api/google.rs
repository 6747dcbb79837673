//! Google sign-in: consent redirect and OAuth callback.
//!
//! The callback is a straight pipeline with no retries:
//! code exchanged, ID token verified, identity resolved, session credential
//! minted, then delivered by redirect or as JSON. Any failure before delivery
//! ends the request with a JSON error, never a redirect.

use crate::AppResources;
use crate::api::auth::AUTH_TAG;
use crate::backend::SessionClaims;
use crate::config::AppConfig;
use crate::error::{ApiError, ErrorResponse, GatewayError, ProviderError};
use crate::identity::resolve_identity;
use crate::provider::ExternalIdentity;
use crate::redirect::{RedirectTarget, request_base_url};
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const CALLBACK_PATH: &str = "/api/auth/google/callback";

/// Returned when there is no usable redirect target.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub success: bool,
    pub uid: String,
    pub email: Option<String>,
    /// Exchange with the identity backend's client SDK for a bearer token
    pub session_credential: String,
}

/// Value of `name` when it occurs exactly once in the query string.
fn single<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    let mut values = params
        .iter()
        .filter(|(k, _)| k == name)
        .map(|(_, v)| v.as_str());
    match (values.next(), values.next()) {
        (Some(value), None) => Some(value),
        _ => None,
    }
}

/// Callback URI registered with the provider: the configured override, or
/// this gateway's own callback route on the host the client used.
fn callback_uri(config: &AppConfig, headers: &HeaderMap) -> Result<String, GatewayError> {
    if let Some(uri) = config.redirect_uri_override() {
        return Ok(uri.to_string());
    }
    request_base_url(headers)
        .map(|base| format!("{base}{CALLBACK_PATH}"))
        .ok_or_else(|| {
            GatewayError::Input("Cannot derive the callback URL: request has no Host".to_string())
        })
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Start Google sign-in.
#[utoipa::path(
    get,
    path = "/google",
    tag = AUTH_TAG,
    operation_id = "Start Google Sign-In",
    params(
        ("state" = Option<String>, Query, description = "Opaque value echoed back after sign-in")
    ),
    responses(
        (status = 302, description = "Redirect to the Google consent screen"),
        (status = 500, description = "Google OAuth is not configured", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn authorize(
    State(resources): State<AppResources>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let context = "Google OAuth is not configured";
    resources
        .provider
        .ensure_configured()
        .map_err(|e| GatewayError::from(e).with_context(context))?;

    let redirect_uri = callback_uri(&resources.config, &headers)
        .map_err(|e| e.with_context("Cannot start Google sign-in"))?;
    let url = resources
        .provider
        .authorization_url(&redirect_uri, single(&params, "state"))
        .map_err(|e| GatewayError::from(e).with_context(context))?;

    tracing::debug!(%redirect_uri, "redirecting to consent screen");
    Ok(found(url))
}

/// Complete Google sign-in.
#[utoipa::path(
    get,
    path = "/google/callback",
    tag = AUTH_TAG,
    operation_id = "Google Sign-In Callback",
    params(
        ("code" = String, Query, description = "Authorization code issued by Google"),
        ("redirect" = Option<String>, Query, description = "Where to send the browser afterwards"),
        ("state" = Option<String>, Query, description = "Passed through to the redirect target")
    ),
    responses(
        (status = 302, description = "Redirect carrying `sessionCredential` (and `state`)"),
        (status = 200, description = "Session credential as JSON", body = CallbackResponse),
        (status = 400, description = "Missing code or unusable provider response", body = ErrorResponse),
        (status = 500, description = "Configuration or upstream failure", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn callback(
    State(resources): State<AppResources>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    complete_sign_in(&resources, &headers, &params)
        .await
        .map_err(|e| e.with_context("Google OAuth callback failed"))
}

async fn complete_sign_in(
    resources: &AppResources,
    headers: &HeaderMap,
    params: &[(String, String)],
) -> Result<Response, GatewayError> {
    let provider = resources.provider.as_ref();
    provider.ensure_configured()?;

    let code = single(params, "code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| GatewayError::Input("Missing ?code from Google callback".to_string()))?;
    tracing::debug!("received authorization code");

    let redirect_uri = callback_uri(&resources.config, headers)?;
    let tokens = provider.exchange_code(code, &redirect_uri).await?;
    tracing::debug!("exchanged authorization code");

    let id_token = tokens.id_token.ok_or(ProviderError::MissingIdToken)?;
    let claims = provider.verify_id_token(&id_token).await?;
    let external = ExternalIdentity::try_from(claims)?;
    tracing::debug!(issuer = %external.issuer, "verified ID token");

    let identity = resolve_identity(resources.backend.as_ref(), provider.id(), &external).await?;
    tracing::debug!(uid = %identity.uid, "resolved identity");

    let session_claims = SessionClaims {
        provider: provider.id().to_string(),
        email: external.email.clone(),
    };
    let credential = resources
        .backend
        .mint_session_credential(&identity.uid, &session_claims)
        .await?;
    tracing::debug!(uid = %identity.uid, "minted session credential");

    let target = single(params, "redirect")
        .filter(|r| !r.trim().is_empty())
        .or(resources.config.frontend_redirect());
    if let Some(raw) = target {
        let base = request_base_url(headers);
        match RedirectTarget::parse(raw).and_then(|t| {
            t.with_credential(base.as_deref(), &credential, single(params, "state"))
        }) {
            Ok(url) => {
                tracing::info!(uid = %identity.uid, "sign-in complete, redirecting");
                return Ok(found(url.into()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "unusable redirect target, returning JSON instead");
            }
        }
    }

    tracing::info!(uid = %identity.uid, "sign-in complete");
    Ok(Json(CallbackResponse {
        success: true,
        email: identity.email.or(Some(external.email)),
        uid: identity.uid,
        session_credential: credential,
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn repeated_parameters_are_ignored() {
        let p = params(&[("state", "a"), ("state", "b"), ("code", "c")]);
        assert_eq!(single(&p, "state"), None);
        assert_eq!(single(&p, "code"), Some("c"));
        assert_eq!(single(&p, "redirect"), None);
    }

    #[test]
    fn callback_uri_prefers_override() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gw.example"));

        let config = AppConfig::default();
        assert_eq!(
            callback_uri(&config, &headers).unwrap(),
            "https://gw.example/api/auth/google/callback"
        );

        let config = AppConfig {
            google_redirect_uri: Some("https://login.example/cb".into()),
            ..AppConfig::default()
        };
        assert_eq!(
            callback_uri(&config, &headers).unwrap(),
            "https://login.example/cb"
        );
    }
}
