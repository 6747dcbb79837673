//! Catch-all echo endpoint at `/api`.

use crate::api::allow_only;
use crate::api::cors::MethodNotAllowed;
use crate::api::users::DEMO_TAG;
use axum::{
    Json,
    body::Bytes,
    extract::{OriginalUri, Query},
    http::Method,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

pub(crate) fn router() -> OpenApiRouter {
    OpenApiRouter::new().routes(allow_only(
        routes!(echo),
        &["GET", "POST", "PUT", "DELETE", "OPTIONS"],
    ))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EchoResponse {
    pub message: String,
    pub method: String,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub timestamp: OffsetDateTime,
    /// Query parameters, for GET and DELETE
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub query: Option<Value>,
    /// Request body, for POST and PUT
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub body: Option<Value>,
    pub path: String,
}

/// JSON when it parses, the raw text otherwise.
fn lenient_body(body: &[u8]) -> Option<Value> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice(body)
        .ok()
        .or_else(|| Some(Value::String(String::from_utf8_lossy(body).into_owned())))
}

/// Echo the request back.
#[utoipa::path(
    method(get, post, put, delete),
    path = "/api",
    tag = DEMO_TAG,
    operation_id = "Echo",
    request_body(
        content = String,
        description = "Any body; echoed back as JSON when it parses, as text otherwise",
        content_type = "text/plain"
    ),
    responses(
        (status = 200, description = "Request echoed back", body = EchoResponse),
        (status = 405, description = "Unsupported method", body = MethodNotAllowed)
    )
)]
#[tracing::instrument(skip_all, fields(%method))]
pub async fn echo(
    method: Method,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Json<EchoResponse> {
    let query: Map<String, Value> = params
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    let (message, query, body) = match method {
        Method::GET => (
            "Welcome to the identity gateway API".to_string(),
            Some(Value::Object(query)),
            None,
        ),
        Method::DELETE => (
            "DELETE request received".to_string(),
            Some(Value::Object(query)),
            None,
        ),
        _ => (
            format!("{method} request received"),
            None,
            lenient_body(&body),
        ),
    };

    Json(EchoResponse {
        message,
        method: method.to_string(),
        timestamp: OffsetDateTime::now_utc(),
        query,
        body,
        path: uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
    })
}
