use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use pabx_hubspot_auth::{api, config::Config, hubspot::HubSpotClient, store::TokenStore};
use pabx_hubspot_auth::{token::TokenLifecycle, AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pabx_hubspot_auth=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("pabx-hubspot-auth v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    // Initialize components
    let store = Arc::new(TokenStore::new(&config.database_url).await?);
    store.migrate().await?;
    info!("Database connected and migrated ✓");

    let hubspot = HubSpotClient::new(
        config.hubspot_client_id.clone(),
        config.hubspot_client_secret.clone(),
        config.hubspot_redirect_uri.clone(),
    );
    let lifecycle = TokenLifecycle::new(store.clone(), hubspot.clone());

    // Build shared state
    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        store,
        hubspot,
        lifecycle,
    });

    // Build router
    let app = api::router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
