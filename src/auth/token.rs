//! Access/refresh token lifecycle.
//!
//! A session is one JSON record stored under its access token with a TTL equal
//! to the refresh window, so the store evicts sessions on its own once they
//! can no longer be refreshed. The refresh token is only ever found inside
//! that record.
//!
//! Expiry is always recomputed from the configured TTLs, so changing them
//! affects tokens that were already issued.

use super::store::{KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 30 * 60 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 70 * 60 * 60;
const OAUTH_NAMESPACE: &str = "OAUTH";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid session record: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    key_prefix: String,
}

impl TokenConfig {
    /// `key_prefix` is the deployment-wide store prefix, e.g. `NONAME`.
    #[must_use]
    pub fn new(key_prefix: &str) -> Self {
        Self {
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            key_prefix: format!("{key_prefix}:{OAUTH_NAMESPACE}:"),
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    fn store_key(&self, access_token: &str) -> String {
        format!("{}{access_token}", self.key_prefix)
    }

    fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.refresh_ttl_seconds).unwrap_or(0))
    }
}

/// Stored form of a session.
#[derive(Serialize, Deserialize, Debug)]
struct SessionRecord {
    username: String,
    create_time: i64,
    access_token: String,
    refresh_token: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    pub created_at: i64,
    pub access_expires_at: i64,
}

impl SessionToken {
    #[must_use]
    pub fn access_expired_at(&self, now: i64) -> bool {
        now > self.access_expires_at
    }

    #[must_use]
    pub fn refresh_expired_at(&self, now: i64, refresh_ttl_seconds: i64) -> bool {
        now > self.created_at + refresh_ttl_seconds
    }
}

/// Current time as epoch seconds.
#[must_use]
pub fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

/// Opaque token: SHA-1 over the username, the token kind and a random UUID.
fn generate_token(username: &str, kind: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(username.as_bytes());
    hasher.update(kind.as_bytes());
    hasher.update(Uuid::new_v4().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn KeyValueStore>,
    config: TokenConfig,
}

impl TokenManager {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: TokenConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue a new token pair for `username`.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written; nothing is retried.
    #[instrument(skip(self))]
    pub async fn provision(&self, username: &str) -> Result<SessionToken, TokenError> {
        let record = SessionRecord {
            username: username.to_string(),
            create_time: epoch_now(),
            access_token: generate_token(username, "access"),
            refresh_token: generate_token(username, "refresh"),
        };

        let json = serde_json::to_string(&record)?;
        self.store
            .set_ex(
                &self.config.store_key(&record.access_token),
                &json,
                self.config.refresh_ttl(),
            )
            .await?;

        debug!("Provisioned session");

        Ok(self.session_from(record))
    }

    /// Look up the session stored under `access_token`.
    ///
    /// # Errors
    /// `TokenError::NotFound` when no record exists (never issued, refreshed
    /// away, or evicted after the refresh window); store or decode errors
    /// otherwise.
    #[instrument(skip_all)]
    pub async fn validate(&self, access_token: &str) -> Result<SessionToken, TokenError> {
        let json = self
            .store
            .get(&self.config.store_key(access_token))
            .await?
            .ok_or(TokenError::NotFound)?;

        let record: SessionRecord = serde_json::from_str(&json)?;

        Ok(self.session_from(record))
    }

    #[must_use]
    pub fn is_access_expired(&self, token: &SessionToken) -> bool {
        epoch_now() > token.created_at + self.config.access_ttl_seconds
    }

    #[must_use]
    pub fn is_refresh_expired(&self, token: &SessionToken) -> bool {
        token.refresh_expired_at(epoch_now(), self.config.refresh_ttl_seconds)
    }

    /// Replace `token` with a fresh pair for the same user.
    ///
    /// The new pair is stored before the old key is deleted. If the delete
    /// fails the error is returned and the old session lives until its own
    /// expiry.
    ///
    /// # Errors
    /// Returns an error if provisioning or revoking fails.
    #[instrument(skip_all, fields(username = %token.username))]
    pub async fn refresh(&self, token: &SessionToken) -> Result<SessionToken, TokenError> {
        let refreshed = self.provision(&token.username).await?;
        self.revoke(&token.access_token).await?;
        Ok(refreshed)
    }

    /// Delete the session stored under `access_token`, if any.
    ///
    /// # Errors
    /// Returns an error if the store rejects the delete.
    #[instrument(skip_all)]
    pub async fn revoke(&self, access_token: &str) -> Result<(), TokenError> {
        self.store
            .del(&self.config.store_key(access_token))
            .await?;
        Ok(())
    }

    fn session_from(&self, record: SessionRecord) -> SessionToken {
        SessionToken {
            access_expires_at: record.create_time + self.config.access_ttl_seconds,
            username: record.username,
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            created_at: record.create_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryStore;
    use anyhow::Result;

    fn manager(access: i64, refresh: i64) -> (Arc<MemoryStore>, TokenManager) {
        let store = Arc::new(MemoryStore::new());
        let config = TokenConfig::new("TEST")
            .with_access_ttl_seconds(access)
            .with_refresh_ttl_seconds(refresh);
        (store.clone(), TokenManager::new(store, config))
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = TokenConfig::new("NONAME");
        assert_eq!(config.access_ttl_seconds(), DEFAULT_ACCESS_TTL_SECONDS);
        assert_eq!(config.refresh_ttl_seconds(), DEFAULT_REFRESH_TTL_SECONDS);
        assert_eq!(config.store_key("abc"), "NONAME:OAUTH:abc");

        let config = config
            .with_access_ttl_seconds(60)
            .with_refresh_ttl_seconds(120);
        assert_eq!(config.access_ttl_seconds(), 60);
        assert_eq!(config.refresh_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn generated_tokens_are_sha1_hex_and_distinct() {
        let first = generate_token("alice", "access");
        let second = generate_token("alice", "access");
        assert_eq!(first.len(), 40);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn session_expiry_comparisons() {
        let token = SessionToken {
            username: "alice".to_string(),
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            created_at: 1_000,
            access_expires_at: 1_060,
        };
        assert!(!token.access_expired_at(1_060));
        assert!(token.access_expired_at(1_061));
        assert!(!token.refresh_expired_at(1_120, 120));
        assert!(token.refresh_expired_at(1_121, 120));
    }

    #[tokio::test]
    async fn provision_then_validate() -> Result<()> {
        let (store, manager) = manager(60, 120);
        let token = manager.provision("alice").await?;

        assert_ne!(token.access_token, token.refresh_token);
        assert_eq!(token.access_expires_at, token.created_at + 60);
        assert_eq!(store.len().await, 1);

        let validated = manager.validate(&token.access_token).await?;
        assert_eq!(validated, token);
        assert!(!manager.is_access_expired(&validated));
        assert!(!manager.is_refresh_expired(&validated));
        Ok(())
    }

    #[tokio::test]
    async fn stored_record_uses_legacy_field_names() -> Result<()> {
        let (store, manager) = manager(60, 120);
        let token = manager.provision("alice").await?;

        let raw = store
            .get(&format!("TEST:OAUTH:{}", token.access_token))
            .await?
            .unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        assert_eq!(value["username"], "alice");
        assert_eq!(value["create_time"], token.created_at);
        assert_eq!(value["refresh_token"], token.refresh_token.as_str());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn validate_after_refresh_window_is_not_found() -> Result<()> {
        let (_store, manager) = manager(60, 120);
        let token = manager.provision("alice").await?;

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(manager.validate(&token.access_token).await.is_ok());

        tokio::time::advance(Duration::from_secs(1)).await;
        for _ in 0..3 {
            assert!(matches!(
                manager.validate(&token.access_token).await,
                Err(TokenError::NotFound)
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn validate_uses_current_access_ttl() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let issuing = TokenManager::new(
            store.clone(),
            TokenConfig::new("TEST").with_access_ttl_seconds(60),
        );
        let token = issuing.provision("alice").await?;

        let reconfigured = TokenManager::new(
            store,
            TokenConfig::new("TEST").with_access_ttl_seconds(10),
        );
        let validated = reconfigured.validate(&token.access_token).await?;
        assert_eq!(validated.access_expires_at, token.created_at + 10);
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_both_tokens() -> Result<()> {
        let (store, manager) = manager(60, 120);
        let old = manager.provision("alice").await?;
        let new = manager.refresh(&old).await?;

        assert_eq!(new.username, "alice");
        assert_ne!(new.access_token, old.access_token);
        assert_ne!(new.refresh_token, old.refresh_token);
        assert!(matches!(
            manager.validate(&old.access_token).await,
            Err(TokenError::NotFound)
        ));
        assert_eq!(manager.validate(&new.access_token).await?, new);
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn revoke_missing_token_is_ok() -> Result<()> {
        let (_store, manager) = manager(60, 120);
        manager.revoke("does-not-exist").await?;
        Ok(())
    }

    #[tokio::test]
    async fn validate_rejects_corrupt_record() -> Result<()> {
        let (store, manager) = manager(60, 120);
        store
            .set_ex("TEST:OAUTH:broken", "not json", Duration::from_secs(60))
            .await?;
        assert!(matches!(
            manager.validate("broken").await,
            Err(TokenError::Decode(_))
        ));
        Ok(())
    }
}
