use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use action_ledger::api::{self, AppState};
use action_ledger::config::AppConfig;
use action_ledger::Ledger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "action_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting action ledger");

    // Load configuration
    let config = AppConfig::load()?;
    info!("Configuration loaded");

    // Open storage and wire components
    let ledger = Ledger::from_config(&config).await?;

    let addr = config.bind_address();
    let app = api::router(AppState::new(ledger, config));

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
