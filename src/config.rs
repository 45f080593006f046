use anyhow::{Context, Result};

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── Database (PostgreSQL, shared with the PABX backend) ─────────────
    pub database_url: String,

    // ── HubSpot OAuth app ───────────────────────────────────────────────
    pub hubspot_client_id: String,
    pub hubspot_client_secret: String,
    /// Redirect URI registered on the HubSpot app; must match exactly or
    /// the code exchange is rejected.
    pub hubspot_redirect_uri: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .context("Invalid PORT")?,

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string)")?,

            hubspot_client_id: std::env::var("HUBSPOT_CLIENT_ID")
                .context("HUBSPOT_CLIENT_ID is required")?,
            hubspot_client_secret: std::env::var("HUBSPOT_CLIENT_SECRET")
                .context("HUBSPOT_CLIENT_SECRET is required")?,
            hubspot_redirect_uri: std::env::var("HUBSPOT_REDIRECT_URI")
                .context("HUBSPOT_REDIRECT_URI is required")?,
        })
    }
}
