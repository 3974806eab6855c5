//! Binary entrypoint for the TGEN API server.
use tgen_api::run;
use tgen_core::OrchestratorConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // TGEN_CONFIG, then TGEN_ADDR / TGEN_WORKERS / TGEN_STORE_DIR
    let config = match OrchestratorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
