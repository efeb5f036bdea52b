//! # Canonical Attendance Repository
//!
//! Owns the `attendance` table and the `applied_punches` ledger.
//!
//! ## The Exactly-Once Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   apply_once(punch, folded row)                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT OR IGNORE INTO applied_punches                      │   │
//! │  │     (device_serial, device_user_id, punch_timestamp, code)     │   │
//! │  │                                                                 │   │
//! │  │  2. rows_affected == 0 ?                                       │   │
//! │  │     YES → tuple already applied → COMMIT, return Duplicate     │   │
//! │  │     NO  → INSERT INTO attendance ... ON CONFLICT(staff, date)  │   │
//! │  │           DO UPDATE (time_in, time_out, status, minutes)       │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← ledger row and canonical row land together or not at all     │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A punch tuple mutates the canonical row at most once                │
//! │  • Replay after a crash is a visible no-op (Duplicate)                 │
//! │  • The watermark can advance only after this commit returns           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callers are expected to serialize writes per (staff, date); the
//! Normalizer actor is the only writer in the running system.

use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use veritime_core::CanonicalAttendanceEvent;

/// Outcome of an `apply_once` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedOutcome {
    /// The ledger accepted the tuple and the canonical row was written.
    Applied,
    /// The tuple was already in the ledger; nothing changed.
    Duplicate,
}

/// Repository for canonical attendance rows and the punch ledger.
#[derive(Debug, Clone)]
pub struct AttendanceRepository {
    pool: SqlitePool,
}

impl AttendanceRepository {
    /// Creates a new AttendanceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AttendanceRepository { pool }
    }

    /// Fetches the canonical row for (staff, date), if any.
    pub async fn get(
        &self,
        staff_id: i64,
        date: NaiveDate,
    ) -> DbResult<Option<CanonicalAttendanceEvent>> {
        let row = sqlx::query_as::<_, CanonicalAttendanceEvent>(
            r#"
            SELECT id, staff_id, institution_id, date, time_in, time_out, status,
                   late_minutes, early_departure_minutes, shift_type, shift_start, shift_end
            FROM attendance
            WHERE staff_id = ?1 AND date = ?2
            "#,
        )
        .bind(staff_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Applies one punch tuple and its folded row exactly once.
    ///
    /// Returns `Duplicate` without touching the canonical row when the
    /// tuple is already in the ledger.
    pub async fn apply_once(
        &self,
        device_serial: &str,
        device_user_id: &str,
        punch_timestamp: NaiveDateTime,
        punch_code: u8,
        row: &CanonicalAttendanceEvent,
    ) -> DbResult<AppliedOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO applied_punches
                (device_serial, device_user_id, punch_timestamp, punch_code)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(device_serial)
        .bind(device_user_id)
        .bind(punch_timestamp)
        .bind(punch_code as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.commit().await?;
            debug!(
                device = %device_serial,
                user = %device_user_id,
                ts = %punch_timestamp,
                "Duplicate punch tuple ignored"
            );
            return Ok(AppliedOutcome::Duplicate);
        }

        sqlx::query(
            r#"
            INSERT INTO attendance
                (staff_id, institution_id, date, time_in, time_out, status,
                 late_minutes, early_departure_minutes, shift_type, shift_start, shift_end,
                 updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(staff_id, date) DO UPDATE SET
                time_in = excluded.time_in,
                time_out = excluded.time_out,
                status = excluded.status,
                late_minutes = excluded.late_minutes,
                early_departure_minutes = excluded.early_departure_minutes,
                shift_type = excluded.shift_type,
                shift_start = excluded.shift_start,
                shift_end = excluded.shift_end,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(row.staff_id)
        .bind(row.institution_id)
        .bind(row.date)
        .bind(row.time_in)
        .bind(row.time_out)
        .bind(row.status)
        .bind(row.late_minutes)
        .bind(row.early_departure_minutes)
        .bind(&row.shift_type)
        .bind(row.shift_start)
        .bind(row.shift_end)
        .bind(Utc::now().naive_utc())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AppliedOutcome::Applied)
    }

    /// Lists canonical rows for an institution and date range (inclusive).
    ///
    /// Read surface for downstream reporting and payroll.
    pub async fn list_range(
        &self,
        institution_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DbResult<Vec<CanonicalAttendanceEvent>> {
        let rows = sqlx::query_as::<_, CanonicalAttendanceEvent>(
            r#"
            SELECT id, staff_id, institution_id, date, time_in, time_out, status,
                   late_minutes, early_departure_minutes, shift_type, shift_start, shift_end
            FROM attendance
            WHERE institution_id = ?1 AND date >= ?2 AND date <= ?3
            ORDER BY date, staff_id
            "#,
        )
        .bind(institution_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Returns the number of ledger entries for a device (diagnostics).
    pub async fn ledger_count(&self, device_serial: &str) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM applied_punches WHERE device_serial = ?1")
                .bind(device_serial)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }
}

// =============================================================================
// Tests
// =============================================================================
