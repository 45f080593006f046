//! Token expiry checking and refresh-on-demand.
//!
//! Refreshes happen lazily when a caller asks for a valid access token and
//! the stored one has expired. Refreshes for the same hub are serialized
//! through a per-hub async mutex; the record is re-read after the lock is
//! acquired so only the first waiter performs the outbound exchange.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::ApiError;
use crate::hubspot::HubSpotClient;
use crate::store::{TokenRecord, TokenStore, TokenUpsert};

/// Manages the expiry/refresh lifecycle of stored HubSpot tokens.
pub struct TokenLifecycle {
    store: Arc<TokenStore>,
    hubspot: HubSpotClient,
    locks: RefreshLocks,
}

/// A token guaranteed valid at the time it was returned.
#[derive(Debug)]
pub struct ValidToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// True when the stored token was expired and a refresh ran (or had
    /// just run) to satisfy this call.
    pub renewed: bool,
}

impl TokenLifecycle {
    pub fn new(store: Arc<TokenStore>, hubspot: HubSpotClient) -> Self {
        Self {
            store,
            hubspot,
            locks: RefreshLocks::default(),
        }
    }

    /// Whether the stored token for `hub_id` has expired.
    ///
    /// A missing record is `NotFound`, not "expired" — callers that need
    /// to distinguish a never-connected hub from a stale one can.
    pub async fn is_expired(&self, hub_id: &str) -> Result<bool, ApiError> {
        let record = self.get_record(hub_id).await?;
        Ok(record.is_expired_at(Utc::now()))
    }

    /// Return a usable access token for `hub_id`, refreshing it first if
    /// the stored one has expired. The stored record is only written on a
    /// successful exchange; any refresh failure leaves it untouched.
    pub async fn valid_access_token(&self, hub_id: &str) -> Result<ValidToken, ApiError> {
        let record = self.get_record(hub_id).await?;
        if !record.is_expired_at(Utc::now()) {
            return Ok(ValidToken {
                access_token: record.access_token,
                expires_at: record.expires_at,
                renewed: false,
            });
        }

        let lock = self.locks.for_hub(hub_id);
        let _guard = lock.lock().await;

        // Another request may have renewed the token while we waited.
        let record = self.get_record(hub_id).await?;
        if !record.is_expired_at(Utc::now()) {
            return Ok(ValidToken {
                access_token: record.access_token,
                expires_at: record.expires_at,
                renewed: true,
            });
        }

        let renewed = self.refresh(&record).await?;
        tracing::info!("Refreshed access token for hub {hub_id}");

        Ok(ValidToken {
            access_token: renewed.access_token,
            expires_at: renewed.expires_at,
            renewed: true,
        })
    }

    async fn get_record(&self, hub_id: &str) -> Result<TokenRecord, ApiError> {
        self.store
            .get_token(hub_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Hub {hub_id}")))
    }

    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord, ApiError> {
        let refresh_token = record
            .refresh_token
            .as_deref()
            .ok_or_else(|| ApiError::RefreshFailed("no refresh token stored".into()))?;

        let tokens = self.hubspot.refresh_token(refresh_token).await?;
        let expires_at = Utc::now() + Duration::seconds(tokens.expires_in as i64);

        // HubSpot usually omits the refresh token on refresh; keep the old one.
        self.store
            .upsert_token(&TokenUpsert {
                hub_id: record.hub_id.clone(),
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token.or_else(|| record.refresh_token.clone()),
                expires_at,
            })
            .await
    }
}

/// One async mutex per hub id, created on first use.
#[derive(Default)]
struct RefreshLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RefreshLocks {
    fn for_hub(&self, hub_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(hub_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_hub_shares_a_lock() {
        let locks = RefreshLocks::default();
        let a = locks.for_hub("123");
        let b = locks.for_hub("123");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_different_hubs_do_not_contend() {
        let locks = RefreshLocks::default();
        let a = locks.for_hub("123");
        let b = locks.for_hub("456");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_lock_serializes_waiters() {
        let locks = RefreshLocks::default();
        let lock = locks.for_hub("123");
        let guard = lock.lock().await;

        let second = locks.for_hub("123");
        assert!(second.try_lock().is_err());

        drop(guard);
        assert!(second.try_lock().is_ok());
    }
}
