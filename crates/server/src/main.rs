use identity_gateway::AppResources;
use identity_gateway::api::start_webserver;
use identity_gateway::config::load_config_or_panic;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "identity_gateway=info,tower_http=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    initialize_standard_tracing();

    let config = load_config_or_panic();
    tracing::info!(
        bind_address = %config.bind_address,
        provider_configured = config.provider_credentials().is_some(),
        backend_configured = config.service_account().is_ok(),
        frontend_redirect = ?config.frontend_redirect(),
        "loaded configuration"
    );

    let resources = AppResources::from_config(config);
    start_webserver(resources).await?;
    Ok(())
}
