//! MySQL-backed election store
//!
//! Speaks the `sender_master_election` anchor table and the
//! `sender_instances` heartbeat table:
//!
//! ```sql
//! CREATE TABLE sender_master_election (
//!     anchor           TINYINT UNSIGNED NOT NULL PRIMARY KEY,
//!     sender_address   VARCHAR(255)     NOT NULL,
//!     last_seen_active BIGINT           NOT NULL
//! );
//! CREATE TABLE sender_instances (
//!     sender_address   VARCHAR(255) NOT NULL PRIMARY KEY,
//!     last_seen        BIGINT       NOT NULL
//! );
//! ```
//!
//! The anchor takeover is a single `INSERT .. ON DUPLICATE KEY UPDATE`
//! statement, so the conditional replacement and the activity bump happen
//! under the anchor row's lock regardless of session isolation level.

use crate::coordinator::heartbeat::ElectionStore;
use crate::coordinator::NodeAddress;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::warn;

/// Primary key of the single anchor row
const ANCHOR_ID: u32 = 1;

/// Election store over a MySQL connection pool.
pub struct MySqlElectionStore {
    pool: MySqlPool,
}

impl MySqlElectionStore {
    /// Connect to the election database
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    /// Build the store from an existing pool
    pub fn with_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ElectionStore for MySqlElectionStore {
    async fn claim_or_refresh(&self, me: &NodeAddress, takeover: Duration) -> Result<NodeAddress> {
        // Assignments evaluate left to right: sender_address is replaced
        // first (only when the stored record went stale), then
        // last_seen_active is bumped only when the resulting address is
        // ours. An active foreign master is left untouched.
        sqlx::query(
            "INSERT INTO sender_master_election (anchor, sender_address, last_seen_active) \
             VALUES (?, ?, UNIX_TIMESTAMP()) \
             ON DUPLICATE KEY UPDATE \
                 sender_address = IF(last_seen_active < UNIX_TIMESTAMP() - ?, \
                                     VALUES(sender_address), sender_address), \
                 last_seen_active = IF(sender_address = VALUES(sender_address), \
                                       UNIX_TIMESTAMP(), last_seen_active)",
        )
        .bind(ANCHOR_ID)
        .bind(me.to_string())
        .bind(takeover.as_secs() as i64)
        .execute(&self.pool)
        .await?;

        match self.current_master().await? {
            Some(master) => Ok(master),
            None => Err(Error::Backend(
                "anchor row missing after upsert".to_string(),
            )),
        }
    }

    async fn current_master(&self) -> Result<Option<NodeAddress>> {
        let row = sqlx::query(
            "SELECT sender_address FROM sender_master_election WHERE anchor = ?",
        )
        .bind(ANCHOR_ID)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let address: String = row.try_get("sender_address")?;
                Ok(Some(address.parse()?))
            }
            None => Ok(None),
        }
    }

    async fn upsert_heartbeat(&self, me: &NodeAddress) -> Result<()> {
        sqlx::query(
            "INSERT INTO sender_instances (sender_address, last_seen) \
             VALUES (?, UNIX_TIMESTAMP()) \
             ON DUPLICATE KEY UPDATE last_seen = UNIX_TIMESTAMP()",
        )
        .bind(me.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn live_instances(&self, within: Duration) -> Result<Vec<NodeAddress>> {
        let rows = sqlx::query(
            "SELECT sender_address FROM sender_instances \
             WHERE last_seen > UNIX_TIMESTAMP() - ? \
             ORDER BY sender_address",
        )
        .bind(within.as_secs() as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let address: String = row.try_get("sender_address")?;
            match address.parse() {
                Ok(addr) => instances.push(addr),
                Err(_) => warn!("Failed getting address tuple from {}", address),
            }
        }
        Ok(instances)
    }

    async fn remove_instance(&self, addr: &NodeAddress) -> Result<()> {
        sqlx::query("DELETE FROM sender_instances WHERE sender_address = ?")
            .bind(addr.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn prune_stale(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sender_instances WHERE last_seen < UNIX_TIMESTAMP() - ?",
        )
        .bind(older_than.as_secs() as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
