//! PostgreSQL-backed store for HubSpot tokens and PABX extension mappings.
//!
//! Tables:
//! - `conector_hubspot`: one token record per hub (portal) id
//! - `hubspot_usuarios_ramais`: per-user phone extension, scoped to a hub

use crate::error::ApiError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

/// Token store backed by PostgreSQL.
pub struct TokenStore {
    pub pool: PgPool,
}

impl TokenStore {
    pub async fn new(db_url: &str) -> Result<Self, ApiError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .connect(db_url)
            .await
            .map_err(|e| ApiError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conector_hubspot (
                hub_id          TEXT PRIMARY KEY,
                token_sonax     TEXT,
                client_id_sonax TEXT,
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                expires_at      TIMESTAMPTZ NOT NULL,
                created_at      TIMESTAMPTZ DEFAULT NOW(),
                updated_at      TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hubspot_usuarios_ramais (
                hub_id      TEXT NOT NULL,
                user_email  TEXT NOT NULL,
                ramal       TEXT NOT NULL,
                created_at  TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_usuarios_ramais_hub ON hubspot_usuarios_ramais(hub_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a token record. `refresh_token` is stored as given — callers
    /// that refresh must pass the old value through when HubSpot does not
    /// rotate it.
    pub async fn upsert_token(&self, upsert: &TokenUpsert) -> Result<TokenRecord, ApiError> {
        let row = sqlx::query(
            r#"
            INSERT INTO conector_hubspot
                (hub_id, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (hub_id)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            RETURNING hub_id, access_token, refresh_token, expires_at, created_at, updated_at
            "#,
        )
        .bind(&upsert.hub_id)
        .bind(&upsert.access_token)
        .bind(&upsert.refresh_token)
        .bind(upsert.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record_from_row(&row))
    }

    /// Upsert the save-credentials variant, which also carries the
    /// PABX-side token and client id.
    pub async fn upsert_credentials(
        &self,
        hub_id: &str,
        token_sonax: &str,
        client_id_sonax: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO conector_hubspot
                (hub_id, token_sonax, client_id_sonax, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (hub_id)
            DO UPDATE SET
                token_sonax = EXCLUDED.token_sonax,
                client_id_sonax = EXCLUDED.client_id_sonax,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(hub_id)
        .bind(token_sonax)
        .bind(client_id_sonax)
        .bind(access_token)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Point lookup of a token record.
    pub async fn get_token(&self, hub_id: &str) -> Result<Option<TokenRecord>, ApiError> {
        let row = sqlx::query(
            r#"
            SELECT hub_id, access_token, refresh_token, expires_at, created_at, updated_at
            FROM conector_hubspot
            WHERE hub_id = $1
            "#,
        )
        .bind(hub_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    /// Lightweight existence check, used to validate incoming requests
    /// before touching related tables.
    pub async fn hub_exists(&self, hub_id: &str) -> Result<bool, ApiError> {
        let row = sqlx::query("SELECT 1 FROM conector_hubspot WHERE hub_id = $1")
            .bind(hub_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    /// PABX-side credentials for a hub.
    pub async fn get_hub_data(&self, hub_id: &str) -> Result<Option<HubData>, ApiError> {
        let row = sqlx::query(
            "SELECT token_sonax, client_id_sonax FROM conector_hubspot WHERE hub_id = $1",
        )
        .bind(hub_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| HubData {
            token_sonax: r.try_get(0).ok().flatten(),
            client_id_sonax: r.try_get(1).ok().flatten(),
        }))
    }

    /// Replace the full extension set for a hub. Runs in a single
    /// transaction so a failure cannot leave a partial set behind.
    pub async fn replace_extensions(
        &self,
        hub_id: &str,
        entries: &[(String, String)],
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM hubspot_usuarios_ramais WHERE hub_id = $1")
            .bind(hub_id)
            .execute(&mut *tx)
            .await?;

        for (user_email, ramal) in entries {
            sqlx::query(
                "INSERT INTO hubspot_usuarios_ramais (hub_id, user_email, ramal) VALUES ($1, $2, $3)",
            )
            .bind(hub_id)
            .bind(user_email)
            .bind(ramal)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Current extension mapping for a hub; empty map if none saved.
    pub async fn list_extensions(
        &self,
        hub_id: &str,
    ) -> Result<HashMap<String, String>, ApiError> {
        let rows = sqlx::query(
            "SELECT user_email, ramal FROM hubspot_usuarios_ramais WHERE hub_id = $1",
        )
        .bind(hub_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect())
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> TokenRecord {
    TokenRecord {
        hub_id: row.get(0),
        access_token: row.get(1),
        refresh_token: row.try_get(2).ok().flatten(),
        expires_at: row.get(3),
        created_at: row.get(4),
        updated_at: row.get(5),
    }
}

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TokenUpsert {
    pub hub_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenRecord {
    pub hub_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// A record is expired once the current instant reaches `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Serialize)]
pub struct HubData {
    pub token_sonax: Option<String>,
    pub client_id_sonax: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_at: DateTime<Utc>) -> TokenRecord {
        TokenRecord {
            hub_id: "12345".into(),
            access_token: "tok".into(),
            refresh_token: Some("ref".into()),
            expires_at,
            created_at: expires_at - Duration::hours(1),
            updated_at: expires_at - Duration::hours(1),
        }
    }

    #[test]
    fn test_not_expired_before_deadline() {
        let now = Utc::now();
        assert!(!record(now + Duration::seconds(30)).is_expired_at(now));
    }

    #[test]
    fn test_expired_after_deadline() {
        let now = Utc::now();
        assert!(record(now - Duration::minutes(10)).is_expired_at(now));
    }

    #[test]
    fn test_expired_exactly_at_deadline() {
        let now = Utc::now();
        assert!(record(now).is_expired_at(now));
    }
}
