//! Read-only access to customer accounts.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use tracing::{Instrument, info_span};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity lookup failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Account snapshot used to authenticate and classify a login.
#[derive(Clone, Debug, FromRow, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    /// Stored NTLM hash.
    pub password: String,
    pub email: String,
    pub tier: i32,
    pub status: i32,
    pub next_cycle: i64,
    pub customer_id: i64,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find the account for `username`, also trying [`normalize_username`].
    /// An exact match wins over the normalized form.
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, IdentityError>;
}

/// Older accounts were created with `@` replaced by `_` in the username.
#[must_use]
pub fn normalize_username(username: &str) -> String {
    username.replace('@', "_")
}

pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, IdentityError> {
        let query = r"
            SELECT
                ci.username AS username,
                ci.password_hash AS password,
                ci.email AS email,
                cs.tier AS tier,
                cs.user_status AS status,
                cs.next_cycle AS next_cycle,
                cs.cuid AS customer_id
            FROM customer_info ci
            JOIN customer_status cs ON cs.cuid = ci.cid
            WHERE ci.username = $1 OR ci.username = $2
            ORDER BY (ci.username = $1) DESC
            LIMIT 1
        ";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.sql.table = "customer_info"
        );

        let identity = sqlx::query_as::<_, Identity>(query)
            .bind(username)
            .bind(normalize_username(username))
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;

        Ok(identity)
    }
}
