//! Authentication endpoints under `/api/auth`.
//!
//! - `/google`, `/google/callback`: sign-in flow, see [`crate::api::google`]
//! - `/protected`: any method, bearer token required
//! - `/user`: full identity record of the bearer
//! - `/verify`: checks a bearer token and reports its claims

use crate::AppResources;
use crate::api::cors::MethodNotAllowed;
use crate::api::session::{VerifiedSession, get_user_by_uid, require_session, verify_session};
use crate::api::{allow_only, google};
use crate::backend::{BearerClaims, FirebaseClaims, InternalIdentity};
use crate::error::{ApiError, ErrorResponse, GatewayError};
use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::router::{OpenApiRouter, UtoipaMethodRouter};
use utoipa_axum::routes;

pub const AUTH_TAG: &str = "Authentication";

fn gated(
    routes: UtoipaMethodRouter<AppResources>,
    resources: &AppResources,
) -> UtoipaMethodRouter<AppResources> {
    let (schemas, paths, method_router) = routes;
    let method_router = method_router.layer(middleware::from_fn_with_state(
        resources.clone(),
        require_session,
    ));
    (schemas, paths, method_router)
}

pub(crate) fn router(resources: AppResources) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(allow_only(routes!(google::authorize), &["GET", "OPTIONS"]))
        .routes(allow_only(routes!(google::callback), &["GET", "OPTIONS"]))
        .routes(gated(routes!(protected), &resources))
        .routes(gated(
            allow_only(routes!(current_user), &["GET"]),
            &resources,
        ))
        .routes(allow_only(routes!(verify), &["POST"]))
        .with_state(resources)
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionUser {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProtectedResponse {
    pub message: String,
    pub user: SessionUser,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
    pub method: String,
}

/// Example protected endpoint.
#[utoipa::path(
    method(get, post, put, patch, delete),
    path = "/protected",
    tag = AUTH_TAG,
    operation_id = "Protected Example",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Caller is authenticated", body = ProtectedResponse),
        (status = 401, description = "Missing, malformed or rejected bearer token", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn protected(
    method: Method,
    Extension(session): Extension<VerifiedSession>,
) -> Json<ProtectedResponse> {
    Json(ProtectedResponse {
        message: "This is a protected endpoint".to_string(),
        user: SessionUser {
            email: session.claims.email.clone(),
            name: session.claims.name.clone(),
            uid: session.uid,
        },
        timestamp: OffsetDateTime::now_utc(),
        method: method.to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub success: bool,
    pub user: InternalIdentity,
}

/// Identity record of the authenticated caller.
#[utoipa::path(
    get,
    path = "/user",
    tag = AUTH_TAG,
    operation_id = "Get Current User",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Identity record", body = UserResponse),
        (status = 401, description = "Missing, malformed or rejected bearer token", body = ErrorResponse),
        (status = 405, description = "Only GET is supported", body = MethodNotAllowed),
        (status = 500, description = "Record lookup failed", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn current_user(
    State(resources): State<AppResources>,
    Extension(session): Extension<VerifiedSession>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = get_user_by_uid(resources.backend.as_ref(), &session.uid)
        .await
        .map_err(|e| e.with_context("Failed to get user information"))?;
    Ok(Json(UserResponse {
        success: true,
        user,
    }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub creation_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_sign_in_time: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserRecordSummary {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub phone_number: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub disabled: bool,
    pub metadata: RecordMetadata,
}

impl From<InternalIdentity> for UserRecordSummary {
    fn from(record: InternalIdentity) -> Self {
        Self {
            display_name: record.display_name,
            email: record.email,
            email_verified: record.email_verified,
            phone_number: record.phone_number,
            photo_url: record.photo_url,
            disabled: record.disabled,
            metadata: RecordMetadata {
                creation_time: record.metadata.creation_time,
                last_sign_in_time: record.metadata.last_sign_in_time,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedUser {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub firebase: Option<FirebaseClaims>,
    /// Every claim of the decoded token
    #[schema(value_type = Object)]
    pub custom_claims: BearerClaims,
    pub user_record: UserRecordSummary,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyResponse {
    pub success: bool,
    pub user: VerifiedUser,
}

/// Verify a bearer token and describe its owner.
#[utoipa::path(
    post,
    path = "/verify",
    tag = AUTH_TAG,
    operation_id = "Verify Bearer Token",
    security(("Authorization" = [])),
    responses(
        (status = 200, description = "Token is valid", body = VerifyResponse),
        (status = 400, description = "No Authorization header", body = ErrorResponse),
        (status = 401, description = "Verification or record lookup failed", body = ErrorResponse),
        (status = 405, description = "Only POST is supported", body = MethodNotAllowed)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify(State(resources): State<AppResources>, headers: HeaderMap) -> Response {
    if headers
        .get(header::AUTHORIZATION)
        .is_none_or(|v| v.as_bytes().trim_ascii().is_empty())
    {
        return ErrorResponse::new("Authorization header required")
            .with_message("Please provide Authorization header with Bearer token")
            .with_status(StatusCode::BAD_REQUEST);
    }

    match verify_and_describe(&resources, &headers).await {
        Ok(user) => Json(VerifyResponse {
            success: true,
            user,
        })
        .into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "token verification failed");
            ErrorResponse::new("Token verification failed")
                .with_message(e.to_string())
                .with_status(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn verify_and_describe(
    resources: &AppResources,
    headers: &HeaderMap,
) -> Result<VerifiedUser, GatewayError> {
    let session = verify_session(resources.backend.as_ref(), headers).await?;
    let record = get_user_by_uid(resources.backend.as_ref(), &session.uid).await?;
    let claims = session.claims;
    Ok(VerifiedUser {
        uid: session.uid,
        email: claims.email.clone(),
        email_verified: claims.email_verified,
        name: claims.name.clone(),
        picture: claims.picture.clone(),
        firebase: claims.firebase.clone(),
        custom_claims: claims,
        user_record: record.into(),
    })
}
