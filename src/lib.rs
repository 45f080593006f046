pub mod api;
pub mod config;
pub mod error;
pub mod hubspot;
pub mod store;
pub mod token;

pub use config::Config;
pub use error::ApiError;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<store::TokenStore>,
    pub hubspot: hubspot::HubSpotClient,
    pub lifecycle: token::TokenLifecycle,
}

pub type SharedState = Arc<AppState>;
