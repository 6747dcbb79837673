//! Preflight handling and the 405 body shared by every endpoint.

use axum::{
    Json,
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

pub const ALLOW_HEADERS: &str = "X-CSRF-Token, X-Requested-With, Accept, Accept-Version, \
                                 Content-Length, Content-MD5, Content-Type, Date, \
                                 X-Api-Version, Authorization";
pub const ALLOW_METHODS: &str = "GET,OPTIONS,PATCH,DELETE,POST,PUT";

/// Empty 200 carrying the permissive CORS headers.
pub fn preflight_response() -> Response {
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response
}

/// Answers every OPTIONS request with 200 before routing.
pub async fn answer_preflight(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return preflight_response();
    }
    next.run(request).await
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MethodNotAllowed {
    /// Always `Method not allowed`
    #[schema(value_type = String)]
    pub error: &'static str,
    #[schema(value_type = Vec<String>)]
    pub allowed_methods: &'static [&'static str],
}

pub fn method_not_allowed(allowed: &'static [&'static str]) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(MethodNotAllowed {
            error: "Method not allowed",
            allowed_methods: allowed,
        }),
    )
        .into_response()
}
