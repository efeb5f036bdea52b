//! # Device Registry Repository
//!
//! Manages the registered-terminal table.
//!
//! Devices are soft state: created on first admin registration, mutated on
//! every handshake and sync cycle, never hard-deleted. Unregistered
//! hardware never enters this table - it goes to the quarantine log until
//! an administrator registers it by hand.

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use veritime_core::{ConnectionMode, Device};

/// Repository for device registry operations.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Registers a new device.
    ///
    /// ## Arguments
    /// * `host` - network host for polled devices; `None` for push devices
    pub async fn register(
        &self,
        institution_id: i64,
        serial_number: &str,
        device_name: &str,
        host: Option<&str>,
        port: u16,
        mode: ConnectionMode,
    ) -> DbResult<Device> {
        debug!(serial = %serial_number, %mode, "Registering device");

        sqlx::query(
            r#"
            INSERT INTO devices (institution_id, serial_number, device_name, host, port, mode)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(institution_id)
        .bind(serial_number)
        .bind(device_name)
        .bind(host)
        .bind(port as i64)
        .bind(mode)
        .execute(&self.pool)
        .await?;

        let device = self
            .find_by_serial(serial_number)
            .await?
            .ok_or_else(|| crate::DbError::not_found("Device", serial_number))?;

        Ok(device)
    }

    /// Looks up a device by hardware serial number.
    pub async fn find_by_serial(&self, serial_number: &str) -> DbResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, institution_id, serial_number, device_name, host, port, mode,
                   detected_format, device_model, firmware_version, platform,
                   last_handshake, last_sync, sync_status, is_active, is_degraded
            FROM devices
            WHERE serial_number = ?1
            "#,
        )
        .bind(serial_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    /// Lists all active devices reached by polling.
    pub async fn list_poll_targets(&self) -> DbResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(
            r#"
            SELECT id, institution_id, serial_number, device_name, host, port, mode,
                   detected_format, device_model, firmware_version, platform,
                   last_handshake, last_sync, sync_status, is_active, is_degraded
            FROM devices
            WHERE mode = 'poll' AND is_active = 1
            ORDER BY serial_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(devices)
    }

    /// Records a handshake contact and any metadata the device offered.
    ///
    /// Metadata fields the device did not send are left unchanged.
    pub async fn record_handshake(
        &self,
        serial_number: &str,
        device_model: Option<&str>,
        firmware_version: Option<&str>,
        platform: Option<&str>,
    ) -> DbResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            UPDATE devices SET
                device_model = COALESCE(?2, device_model),
                firmware_version = COALESCE(?3, firmware_version),
                platform = COALESCE(?4, platform),
                last_handshake = ?5,
                updated_at = ?5
            WHERE serial_number = ?1
            "#,
        )
        .bind(serial_number)
        .bind(device_model)
        .bind(firmware_version)
        .bind(platform)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stores the wire format detected from the device's last push.
    pub async fn set_detected_format(&self, serial_number: &str, format_tag: &str) -> DbResult<()> {
        sqlx::query("UPDATE devices SET detected_format = ?2 WHERE serial_number = ?1")
            .bind(serial_number)
            .bind(format_tag)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Records the outcome of a sync cycle.
    pub async fn update_sync_status(
        &self,
        serial_number: &str,
        status: &str,
        last_sync: Option<NaiveDateTime>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE devices SET
                sync_status = ?2,
                last_sync = COALESCE(?3, last_sync),
                updated_at = ?4
            WHERE serial_number = ?1
            "#,
        )
        .bind(serial_number)
        .bind(status)
        .bind(last_sync)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Flags or clears the degraded marker for a device.
    ///
    /// Degraded devices keep being polled at the capped backoff interval;
    /// the flag only drives the admin dashboard.
    pub async fn set_degraded(&self, serial_number: &str, degraded: bool) -> DbResult<()> {
        sqlx::query("UPDATE devices SET is_degraded = ?2, updated_at = ?3 WHERE serial_number = ?1")
            .bind(serial_number)
            .bind(degraded)
            .bind(Utc::now().naive_utc())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
