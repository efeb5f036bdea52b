//! # Sync Watermark Repository
//!
//! Per-device monotonic cursors for the polling path.
//!
//! ## Monotonicity
//! `advance` uses `MAX(last_applied, excluded.last_applied)` in SQL, so the
//! cursor can only move forward no matter what the caller passes. Combined
//! with the apply-before-advance ordering in the polling agent, a crash
//! mid-cycle replays a bounded, already-idempotent tail instead of losing
//! or skipping records.

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// Repository for sync watermark operations.
#[derive(Debug, Clone)]
pub struct WatermarkRepository {
    pool: SqlitePool,
}

impl WatermarkRepository {
    /// Creates a new WatermarkRepository.
    pub fn new(pool: SqlitePool) -> Self {
        WatermarkRepository { pool }
    }

    /// Returns the current watermark for a device, if one exists.
    pub async fn get(&self, device_serial: &str) -> DbResult<Option<NaiveDateTime>> {
        let value: Option<NaiveDateTime> = sqlx::query_scalar(
            "SELECT last_applied FROM sync_watermarks WHERE device_serial = ?1",
        )
        .bind(device_serial)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    /// Advances the watermark, returning the stored value afterwards.
    ///
    /// A candidate at or before the current watermark is a no-op; the
    /// cursor never regresses.
    pub async fn advance(
        &self,
        device_serial: &str,
        candidate: NaiveDateTime,
    ) -> DbResult<NaiveDateTime> {
        sqlx::query(
            r#"
            INSERT INTO sync_watermarks (device_serial, last_applied, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(device_serial) DO UPDATE SET
                last_applied = MAX(last_applied, excluded.last_applied),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(device_serial)
        .bind(candidate)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;

        let stored = self
            .get(device_serial)
            .await?
            .ok_or_else(|| crate::DbError::not_found("Watermark", device_serial))?;

        debug!(device = %device_serial, watermark = %stored, "Watermark advanced");
        Ok(stored)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn watermark_starts_absent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.watermarks().get("ZK-01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn watermark_only_advances() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.watermarks();

        let after = repo.advance("ZK-01", ts(10, 0)).await.unwrap();
        assert_eq!(after, ts(10, 0));

        // Attempting to regress is a no-op
        let after = repo.advance("ZK-01", ts(9, 0)).await.unwrap();
        assert_eq!(after, ts(10, 0));

        let after = repo.advance("ZK-01", ts(18, 30)).await.unwrap();
        assert_eq!(after, ts(18, 30));

        assert_eq!(repo.get("ZK-01").await.unwrap(), Some(ts(18, 30)));
    }

    #[tokio::test]
    async fn watermarks_are_per_device() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.watermarks();

        repo.advance("ZK-01", ts(10, 0)).await.unwrap();
        repo.advance("ZK-02", ts(12, 0)).await.unwrap();

        assert_eq!(repo.get("ZK-01").await.unwrap(), Some(ts(10, 0)));
        assert_eq!(repo.get("ZK-02").await.unwrap(), Some(ts(12, 0)));
    }
}
