//! Bot entry point: logging, config, and process exit codes.

use tracing::{error, info};

use fedai_bot::Config;

#[tokio::main]
async fn main() {
    // Load .env first so it can set RUST_LOG and FEDAI_CONFIG.
    dotenv::dotenv().ok();

    // Initialise tracing (respects RUST_LOG env, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = Config::resolve_path();
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "could not load config");
            std::process::exit(1);
        }
    };
    info!(path = %path.display(), model = %config.openai_model, "config loaded");

    if let Err(e) = fedai_bot::run(config).await {
        error!(error = %e, "bot exited with an error");
        std::process::exit(1);
    }
}
