//! HTTP router for the connector service.
//!
//! Endpoint groups:
//! - /oauth/callback  — HubSpot OAuth redirect target
//! - /token/*         — access-token retrieval and status
//! - /api/*           — PABX frontend API (credentials, users, extensions)

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::app_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
