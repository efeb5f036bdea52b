//! # Quarantine Repository
//!
//! Holding logs for data that cannot yet be attributed: contacts from
//! unregistered hardware and punches without a resolvable staff member.
//!
//! Quarantine never blocks an acknowledgment and is never auto-promoted;
//! both tables exist purely for admin triage.

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use veritime_core::{QuarantineReason, QuarantinedPunch, UnknownDeviceRecord};

/// Repository for quarantine operations.
#[derive(Debug, Clone)]
pub struct QuarantineRepository {
    pool: SqlitePool,
}

impl QuarantineRepository {
    /// Creates a new QuarantineRepository.
    pub fn new(pool: SqlitePool) -> Self {
        QuarantineRepository { pool }
    }

    /// Upserts the unknown-device record for a serial number.
    ///
    /// First contact creates the row; repeat contact bumps `last_seen` and
    /// the attempt counter and fills in any metadata the device newly
    /// offered. Exactly one row exists per serial.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_unknown_device(
        &self,
        serial_number: &str,
        ip_address: Option<&str>,
        device_model: Option<&str>,
        firmware_version: Option<&str>,
        platform: Option<&str>,
        request_kind: &str,
        payload_sample: Option<&str>,
    ) -> DbResult<()> {
        let now = Utc::now().naive_utc();

        debug!(serial = %serial_number, kind = %request_kind, "Quarantining unknown device contact");

        sqlx::query(
            r#"
            INSERT INTO unknown_device_log
                (serial_number, ip_address, device_model, firmware_version, platform,
                 request_kind, payload_sample, first_seen, last_seen, attempt_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 1)
            ON CONFLICT(serial_number) DO UPDATE SET
                ip_address = COALESCE(excluded.ip_address, ip_address),
                device_model = COALESCE(excluded.device_model, device_model),
                firmware_version = COALESCE(excluded.firmware_version, firmware_version),
                platform = COALESCE(excluded.platform, platform),
                request_kind = excluded.request_kind,
                payload_sample = COALESCE(excluded.payload_sample, payload_sample),
                last_seen = excluded.last_seen,
                attempt_count = attempt_count + 1
            "#,
        )
        .bind(serial_number)
        .bind(ip_address)
        .bind(device_model)
        .bind(firmware_version)
        .bind(platform)
        .bind(request_kind)
        .bind(payload_sample)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetches the unknown-device record for a serial, if any.
    pub async fn find_unknown_device(
        &self,
        serial_number: &str,
    ) -> DbResult<Option<UnknownDeviceRecord>> {
        let record = sqlx::query_as::<_, UnknownDeviceRecord>(
            r#"
            SELECT id, serial_number, ip_address, device_model, firmware_version,
                   platform, request_kind, payload_sample, first_seen, last_seen,
                   attempt_count
            FROM unknown_device_log
            WHERE serial_number = ?1
            "#,
        )
        .bind(serial_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Quarantines a single punch with a triage reason.
    pub async fn quarantine_punch(
        &self,
        device_serial: &str,
        device_user_id: Option<&str>,
        punch_timestamp: Option<NaiveDateTime>,
        reason: QuarantineReason,
        detail: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO quarantined_punches
                (device_serial, device_user_id, punch_timestamp, reason, detail)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(device_serial)
        .bind(device_user_id)
        .bind(punch_timestamp)
        .bind(reason.as_str())
        .bind(detail)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists the most recent quarantined punches for admin triage.
    pub async fn recent_punches(&self, limit: u32) -> DbResult<Vec<QuarantinedPunch>> {
        let rows = sqlx::query_as::<_, QuarantinedPunch>(
            r#"
            SELECT id, device_serial, device_user_id, punch_timestamp, reason,
                   detail, created_at
            FROM quarantined_punches
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn unknown_device_upsert_counts_attempts() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.quarantine();

        repo.upsert_unknown_device("GHOST-1", Some("10.1.1.5"), None, None, None, "handshake", None)
            .await
            .unwrap();
        repo.upsert_unknown_device(
            "GHOST-1",
            None,
            Some("K40"),
            None,
            None,
            "data_push",
            Some("ATTLOG\t101"),
        )
        .await
        .unwrap();

        let record = repo.find_unknown_device("GHOST-1").await.unwrap().unwrap();
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.ip_address.as_deref(), Some("10.1.1.5"));
        assert_eq!(record.device_model.as_deref(), Some("K40"));
        assert_eq!(record.request_kind, "data_push");
        assert!(record.last_seen >= record.first_seen);
    }

    #[tokio::test]
    async fn quarantined_punch_round_trips() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.quarantine();

        repo.quarantine_punch(
            "ZK-01",
            Some("999"),
            None,
            QuarantineReason::StaffNotFound,
            Some("no staff with code 999"),
        )
        .await
        .unwrap();

        let rows = repo.recent_punches(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "staff_not_found");
        assert_eq!(rows[0].device_user_id.as_deref(), Some("999"));
    }
}
