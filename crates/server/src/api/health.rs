//! Liveness check.

/// Tag for OpenAPI documentation.
pub const MISC_TAG: &str = "Miscellaneous";

/// Liveness check.
///
/// Does not touch the identity backend or the provider, so an unconfigured
/// gateway still reports healthy.
#[tracing::instrument()]
#[utoipa::path(
    method(get, head),
    path = "/healthz",
    tag = MISC_TAG,
    operation_id = "Health Check",
    summary = "Gateway liveness",
    responses(
        (status = 200, description = "The gateway is accepting requests", body = str, content_type = "text/plain", example = "ok")
    )
)]
pub async fn health() -> &'static str {
    "ok"
}
