//! HTTP surface of the gateway.
//!
//! - `auth` - sign-in flow and protected endpoints (/api/auth/*)
//! - `google` - consent redirect and OAuth callback handlers
//! - `session` - bearer-token middleware
//! - `users`, `echo` - demo endpoints (/api/users, /api)
//! - `health` - liveness check (/healthz)
//! - `cors` - preflight answers and 405 bodies
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod auth;
pub mod cors;
pub mod echo;
pub mod google;
pub mod health;
pub mod openapi;
pub mod session;
pub mod users;

use crate::AppResources;
use axum::{Router, middleware};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_axum::{
    router::{OpenApiRouter, UtoipaMethodRouter},
    routes,
};
use utoipa_redoc::{Redoc, Servable};

/// Answer methods the route does not register with a 405 listing `allowed`.
pub(crate) fn allow_only<S>(
    routes: UtoipaMethodRouter<S>,
    allowed: &'static [&'static str],
) -> UtoipaMethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    let (schemas, paths, method_router) = routes;
    let method_router =
        method_router.fallback(move || async move { cors::method_not_allowed(allowed) });
    (schemas, paths, method_router)
}

fn api_router(resources: AppResources) -> OpenApiRouter {
    OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .nest("/api/auth", auth::router(resources.clone()))
        .merge(users::router(resources))
        .merge(echo::router())
        .routes(routes!(health::health))
}

/// Full application router, including the Redoc UI at `/api-docs`.
pub fn build_router(resources: AppResources) -> Router {
    let (router, api) = api_router(resources)
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(cors::answer_preflight))
        .layer(TraceLayer::new_for_http())
        .split_for_parts();

    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server on the configured bind address.
#[tracing::instrument(skip(resources))]
pub async fn start_webserver(resources: AppResources) -> color_eyre::Result<()> {
    let addr = resources.config.bind_address.clone();
    let router = build_router(resources);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server running");
    axum::serve(listener, router)
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
