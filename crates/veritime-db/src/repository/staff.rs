//! # Staff Directory Repository
//!
//! Read-only collaborator surface for the normalizer: resolves
//! device-local user ids to internal staff identities and fetches shift
//! timing configuration.
//!
//! Staff management itself (hiring, transfers, shift changes) lives in the
//! wider platform; the ingestion engine only reads.

use chrono::NaiveTime;
use sqlx::SqlitePool;

use crate::error::{DbError, DbResult};
use veritime_core::{ShiftTiming, StaffRef};

/// Repository for staff directory lookups.
#[derive(Debug, Clone)]
pub struct StaffRepository {
    pool: SqlitePool,
}

impl StaffRepository {
    /// Creates a new StaffRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StaffRepository { pool }
    }

    /// Resolves a device-local user id to a staff member.
    ///
    /// Scoped to the institution: the same code on two institutions'
    /// devices resolves to two different people.
    pub async fn resolve(
        &self,
        institution_id: i64,
        staff_code: &str,
    ) -> DbResult<Option<StaffRef>> {
        let staff = sqlx::query_as::<_, StaffRef>(
            r#"
            SELECT id, staff_code, name, shift_type
            FROM staff
            WHERE institution_id = ?1 AND staff_code = ?2 AND is_active = 1
            "#,
        )
        .bind(institution_id)
        .bind(staff_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(staff)
    }

    /// Fetches the shift window for a shift type.
    ///
    /// Falls back to the general-shift defaults when the shift type is not
    /// configured, so a misconfigured staff row still gets a sane status.
    pub async fn shift_timing(&self, shift_type: &str) -> DbResult<ShiftTiming> {
        let row: Option<(String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT shift_type, start_time, end_time, grace_period_minutes
            FROM shift_definitions
            WHERE shift_type = ?1
            "#,
        )
        .bind(shift_type)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((shift_type, start, end, grace_minutes)) => Ok(ShiftTiming {
                shift_type,
                start: parse_shift_time(&start)?,
                end: parse_shift_time(&end)?,
                grace_minutes,
            }),
            None => Ok(ShiftTiming::default()),
        }
    }

    /// Adds a staff member. Used by admin flows and test setup.
    pub async fn add_staff(
        &self,
        institution_id: i64,
        staff_code: &str,
        name: &str,
        shift_type: &str,
    ) -> DbResult<StaffRef> {
        sqlx::query(
            r#"
            INSERT INTO staff (institution_id, staff_code, name, shift_type)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(institution_id)
        .bind(staff_code)
        .bind(name)
        .bind(shift_type)
        .execute(&self.pool)
        .await?;

        self.resolve(institution_id, staff_code)
            .await?
            .ok_or_else(|| DbError::not_found("Staff", staff_code))
    }
}

/// Parses an `HH:MM:SS` shift boundary from the configuration table.
fn parse_shift_time(value: &str) -> DbResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|e| DbError::Internal(format!("bad shift time '{}': {}", value, e)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use veritime_core::DEFAULT_INSTITUTION_ID;

    #[tokio::test]
    async fn resolve_is_institution_scoped() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.staff();

        repo.add_staff(1, "101", "A. Kumar", "general").await.unwrap();
        repo.add_staff(2, "101", "B. Devi", "morning").await.unwrap();

        let a = repo.resolve(1, "101").await.unwrap().unwrap();
        let b = repo.resolve(2, "101").await.unwrap().unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "A. Kumar");
        assert_eq!(b.shift_type, "morning");

        assert!(repo.resolve(1, "999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shift_timing_reads_seeded_defaults() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.staff();

        let general = repo.shift_timing("general").await.unwrap();
        assert_eq!(general.start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(general.end, NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        assert_eq!(general.grace_minutes, 15);

        let morning = repo.shift_timing("morning").await.unwrap();
        assert_eq!(morning.start, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn unknown_shift_falls_back_to_general() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let timing = db.staff().shift_timing("does-not-exist").await.unwrap();
        assert_eq!(timing.shift_type, "general");
    }

    #[tokio::test]
    async fn default_institution_constant_resolves() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.staff();
        repo.add_staff(DEFAULT_INSTITUTION_ID, "500", "C. Rao", "general")
            .await
            .unwrap();
        assert!(repo
            .resolve(DEFAULT_INSTITUTION_ID, "500")
            .await
            .unwrap()
            .is_some());
    }
}
