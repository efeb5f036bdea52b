//! # Protocol Detection Log Repository
//!
//! One row per inbound data push: what format was detected, whether it
//! parsed, and a bounded body sample. Kept for operability, not business
//! logic - this table is how an administrator answers "what is that new
//! terminal actually sending us?".

use sqlx::SqlitePool;

use crate::error::DbResult;
use veritime_core::ProtocolDetectionEntry;

/// Repository for protocol-detection diagnostics.
#[derive(Debug, Clone)]
pub struct DiagnosticsRepository {
    pool: SqlitePool,
}

impl DiagnosticsRepository {
    /// Creates a new DiagnosticsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DiagnosticsRepository { pool }
    }

    /// Records one protocol-detection row.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        serial_number: Option<&str>,
        request_method: &str,
        request_path: &str,
        content_type: Option<&str>,
        detected_format: &str,
        parsed_ok: bool,
        error_message: Option<&str>,
        body_sample: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO protocol_detection_log
                (serial_number, request_method, request_path, content_type,
                 detected_format, parsed_ok, error_message, body_sample)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(serial_number)
        .bind(request_method)
        .bind(request_path)
        .bind(content_type)
        .bind(detected_format)
        .bind(parsed_ok)
        .bind(error_message)
        .bind(body_sample)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lists the most recent entries for admin triage.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<ProtocolDetectionEntry>> {
        let rows = sqlx::query_as::<_, ProtocolDetectionEntry>(
            r#"
            SELECT id, serial_number, request_method, request_path, content_type,
                   detected_format, parsed_ok, error_message, body_sample, created_at
            FROM protocol_detection_log
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
