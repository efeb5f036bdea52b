//! # Calendar Exception Repository
//!
//! Read-only collaborator surface for approved calendar facts: holidays
//! (institution-wide), leave, on-duty and permission records (per staff).
//!
//! The approval workflows live in the wider platform; the ingestion engine
//! only asks one question: "is this (staff, date) covered, and by what?"

use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::error::DbResult;
use veritime_core::CalendarException;

/// Repository for calendar exception lookups.
#[derive(Debug, Clone)]
pub struct CalendarRepository {
    pool: SqlitePool,
}

impl CalendarRepository {
    /// Creates a new CalendarRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CalendarRepository { pool }
    }

    /// Returns the calendar exception covering (staff, date), if any.
    ///
    /// Institution-wide rows (staff_id IS NULL) cover everyone. When
    /// multiple facts cover the same day, precedence is
    /// holiday > leave > on_duty > permission.
    pub async fn exception_for(
        &self,
        institution_id: i64,
        staff_id: i64,
        date: NaiveDate,
    ) -> DbResult<Option<CalendarException>> {
        let kinds: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT kind
            FROM calendar_exceptions
            WHERE institution_id = ?1
              AND date = ?2
              AND (staff_id IS NULL OR staff_id = ?3)
            "#,
        )
        .bind(institution_id)
        .bind(date)
        .bind(staff_id)
        .fetch_all(&self.pool)
        .await?;

        let mut best: Option<CalendarException> = None;
        for (kind,) in kinds {
            if let Some(exception) = CalendarException::from_kind(&kind) {
                best = Some(match best {
                    Some(current) if precedence(current) <= precedence(exception) => current,
                    _ => exception,
                });
            }
        }

        Ok(best)
    }

    /// Records a calendar exception. Used by admin flows and test setup.
    pub async fn add_exception(
        &self,
        institution_id: i64,
        staff_id: Option<i64>,
        date: NaiveDate,
        kind: CalendarException,
        note: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO calendar_exceptions (institution_id, staff_id, date, kind, note)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(institution_id)
        .bind(staff_id)
        .bind(date)
        .bind(kind.as_str())
        .bind(note)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Lower value wins when several facts cover the same day.
fn precedence(exception: CalendarException) -> u8 {
    match exception {
        CalendarException::Holiday => 0,
        CalendarException::Leave => 1,
        CalendarException::OnDuty => 2,
        CalendarException::Permission => 3,
    }
}

// =============================================================================
// Tests
// =============================================================================
