//! # Punch Normalizer
//!
//! The idempotent state machine turning raw punches into canonical
//! attendance rows. Runs as a single-writer actor: both ingress paths
//! (polling agent and push receiver) funnel every mutation through one
//! task, so there is never a race between producers updating the same
//! (staff, date) key.
//!
//! ## Apply Pipeline (per punch)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Normalizer.apply_one                             │
//! │                                                                         │
//! │  RawPunch                                                               │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  resolve staff (device user id → staff)  ──── none ──► Quarantined     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  calendar exception for (staff, date)?                                  │
//! │     │ yes: row is pinned (holiday/leave/on-duty/permission)             │
//! │     ▼                                                                   │
//! │  fold punch into day state (min/max window, shift-aware status)         │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  apply_once: ledger INSERT-OR-IGNORE + row upsert in ONE transaction    │
//! │     │                                                                   │
//! │     ├── ledger hit  ──► Duplicate (no-op, observable in the report)     │
//! │     ├── pinned      ──► Ignored(status)                                 │
//! │     └── written     ──► Applied                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The batch report carries per-record outcomes; the polling agent uses
//! its resolved frontier to decide how far the watermark may advance.

use chrono::NaiveDateTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use veritime_db::repository::attendance::AppliedOutcome;
use veritime_db::Database;

use crate::error::{SyncError, SyncResult};
use veritime_core::daystate::{PunchFold, Transition};
use veritime_core::{
    AttendanceStatus, CanonicalAttendanceEvent, QuarantineReason, RawPunch,
};

// =============================================================================
// Outcomes
// =============================================================================

/// What happened to one punch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Ledger accepted the tuple; the canonical row was written.
    Applied,
    /// Tuple already applied; nothing changed.
    Duplicate,
    /// Ledger accepted the tuple but a calendar fact pins the row.
    Ignored(AttendanceStatus),
    /// Punch cannot be attributed; held for admin triage.
    Quarantined(QuarantineReason),
    /// Persistence failed; the punch is unresolved and must be retried.
    Failed(String),
}

impl ApplyOutcome {
    /// Resolved means durably applied or durably quarantined - the states
    /// a watermark may advance past.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ApplyOutcome::Failed(_))
    }
}

/// One punch's timestamp and outcome, in batch order.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub timestamp: NaiveDateTime,
    pub outcome: ApplyOutcome,
}

/// Per-batch summary returned to the ingress path.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<RecordOutcome>,
    pub applied: usize,
    pub duplicates: usize,
    pub ignored: usize,
    pub quarantined: usize,
    pub failed: usize,
}

impl BatchReport {
    fn push(&mut self, timestamp: NaiveDateTime, outcome: ApplyOutcome) {
        match &outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Duplicate => self.duplicates += 1,
            ApplyOutcome::Ignored(_) => self.ignored += 1,
            ApplyOutcome::Quarantined(_) => self.quarantined += 1,
            ApplyOutcome::Failed(_) => self.failed += 1,
        }
        self.outcomes.push(RecordOutcome { timestamp, outcome });
    }

    /// True when every punch in the batch is durably applied or
    /// quarantined.
    pub fn all_resolved(&self) -> bool {
        self.failed == 0
    }

    /// The largest timestamp T such that every record with timestamp <= T
    /// is resolved. The watermark may advance to T and no further.
    ///
    /// Among records sharing a timestamp, unresolved ones are considered
    /// first, so an unresolved record always holds the frontier strictly
    /// below its own timestamp.
    pub fn resolved_frontier(&self) -> Option<NaiveDateTime> {
        let mut ordered: Vec<&RecordOutcome> = self.outcomes.iter().collect();
        ordered.sort_by_key(|record| (record.timestamp, record.outcome.is_resolved()));

        let mut frontier = None;
        for record in ordered {
            if record.outcome.is_resolved() {
                frontier = Some(record.timestamp);
            } else {
                break;
            }
        }
        frontier
    }
}

// =============================================================================
// Actor Plumbing
// =============================================================================

enum Command {
    Apply {
        source: &'static str,
        punches: Vec<RawPunch>,
        reply: oneshot::Sender<BatchReport>,
    },
}

/// Handle for submitting batches to the running normalizer.
#[derive(Clone)]
pub struct NormalizerHandle {
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: mpsc::Sender<()>,
}

impl NormalizerHandle {
    /// Applies a batch of punches, serialized behind every other batch.
    ///
    /// `source` labels the ingress path ("poll" / "push") for logging.
    pub async fn apply_batch(
        &self,
        source: &'static str,
        punches: Vec<RawPunch>,
    ) -> SyncResult<BatchReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Apply {
                source,
                punches,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;

        reply_rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Channel("Shutdown channel closed".into()))
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// The single-writer actor owning all canonical attendance mutations.
pub struct Normalizer {
    db: Database,
    institution_id: i64,
    command_rx: mpsc::Receiver<Command>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Normalizer {
    /// Creates the actor and its handle. Spawn `run()` to start it.
    pub fn new(db: Database, institution_id: i64) -> (Self, NormalizerHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let normalizer = Normalizer {
            db,
            institution_id,
            command_rx,
            shutdown_rx,
        };

        let handle = NormalizerHandle {
            command_tx,
            shutdown_tx,
        };

        (normalizer, handle)
    }

    /// Runs the actor loop. Spawn as a background task.
    pub async fn run(mut self) {
        info!("Normalizer starting");

        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    match command {
                        Command::Apply { source, punches, reply } => {
                            let report = self.apply_batch(source, punches).await;
                            // Caller may have given up waiting; that is fine
                            let _ = reply.send(report);
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Normalizer shutting down");
                    break;
                }
            }
        }

        info!("Normalizer stopped");
    }

    /// Applies a batch sequentially. In-flight work always finishes; the
    /// shutdown signal is only observed between batches.
    async fn apply_batch(&self, source: &'static str, punches: Vec<RawPunch>) -> BatchReport {
        let mut report = BatchReport::default();

        for punch in &punches {
            let outcome = self.apply_one(punch).await;
            if let ApplyOutcome::Failed(ref message) = outcome {
                error!(
                    device = %punch.device_serial,
                    user = %punch.device_user_id,
                    ts = %punch.timestamp,
                    %message,
                    "Punch apply failed; left unresolved"
                );
            }
            report.push(punch.timestamp, outcome);
        }

        info!(
            source,
            total = report.outcomes.len(),
            applied = report.applied,
            duplicates = report.duplicates,
            ignored = report.ignored,
            quarantined = report.quarantined,
            failed = report.failed,
            "Batch normalized"
        );

        report
    }

    /// Applies one punch through staff resolution, calendar lookup, the
    /// day-state fold and the exactly-once transaction.
    async fn apply_one(&self, punch: &RawPunch) -> ApplyOutcome {
        // Staff resolution (read-only collaborator)
        let staff = match self
            .db
            .staff()
            .resolve(self.institution_id, &punch.device_user_id)
            .await
        {
            Ok(Some(staff)) => staff,
            Ok(None) => {
                warn!(
                    device = %punch.device_serial,
                    user = %punch.device_user_id,
                    "No staff for device user; quarantining punch"
                );
                let quarantined = self
                    .db
                    .quarantine()
                    .quarantine_punch(
                        &punch.device_serial,
                        Some(&punch.device_user_id),
                        Some(punch.timestamp),
                        QuarantineReason::StaffNotFound,
                        Some(&format!(
                            "no active staff with code {} in institution {}",
                            punch.device_user_id, self.institution_id
                        )),
                    )
                    .await;
                return match quarantined {
                    Ok(()) => ApplyOutcome::Quarantined(QuarantineReason::StaffNotFound),
                    // Quarantine must be durable before it counts as resolved
                    Err(e) => ApplyOutcome::Failed(e.to_string()),
                };
            }
            Err(e) => return ApplyOutcome::Failed(e.to_string()),
        };

        let date = punch.timestamp.date();

        let exception = match self
            .db
            .calendar()
            .exception_for(self.institution_id, staff.id, date)
            .await
        {
            Ok(exception) => exception,
            Err(e) => return ApplyOutcome::Failed(e.to_string()),
        };

        let shift = match self.db.staff().shift_timing(&staff.shift_type).await {
            Ok(shift) => shift,
            Err(e) => return ApplyOutcome::Failed(e.to_string()),
        };

        let existing = match self.db.attendance().get(staff.id, date).await {
            Ok(existing) => existing,
            Err(e) => return ApplyOutcome::Failed(e.to_string()),
        };

        let mut fold = match existing {
            Some(ref row) => PunchFold::from_row(row),
            None => PunchFold::empty(),
        };

        // Approved calendar facts win over raw punches
        if let Some(exception) = exception {
            fold.status = exception.status();
            fold.late_minutes = 0;
            fold.early_departure_minutes = 0;
        }

        let transition = fold.apply(punch.timestamp.time(), &shift);

        let row = CanonicalAttendanceEvent {
            id: existing.as_ref().map(|r| r.id).unwrap_or(0),
            staff_id: staff.id,
            institution_id: self.institution_id,
            date,
            time_in: fold.time_in,
            time_out: fold.time_out,
            status: fold.status,
            late_minutes: fold.late_minutes,
            early_departure_minutes: fold.early_departure_minutes,
            shift_type: shift.shift_type.clone(),
            shift_start: Some(shift.start),
            shift_end: Some(shift.end),
        };

        let applied = self
            .db
            .attendance()
            .apply_once(
                &punch.device_serial,
                &punch.device_user_id,
                punch.timestamp,
                punch.punch_code,
                &row,
            )
            .await;

        match applied {
            Ok(AppliedOutcome::Duplicate) => ApplyOutcome::Duplicate,
            Ok(AppliedOutcome::Applied) => {
                if matches!(transition, Transition::CalendarPinned) {
                    debug!(
                        staff = staff.id,
                        %date,
                        status = %row.status,
                        "Punch recorded but day is calendar-pinned"
                    );
                    ApplyOutcome::Ignored(row.status)
                } else {
                    ApplyOutcome::Applied
                }
            }
            Err(e) => ApplyOutcome::Failed(e.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use veritime_core::{CalendarException, VerifyMethod, WireFormat, DEFAULT_INSTITUTION_ID};
    use veritime_db::DbConfig;

    fn punch(user: &str, h: u32, m: u32) -> RawPunch {
        RawPunch {
            device_serial: "ZK-01".into(),
            device_user_id: user.into(),
            timestamp: NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            punch_code: 0,
            verify_method: VerifyMethod::Fingerprint,
            source_format: WireFormat::Json,
        }
    }

    async fn engine() -> (Database, NormalizerHandle) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.staff()
            .add_staff(DEFAULT_INSTITUTION_ID, "101", "A. Kumar", "general")
            .await
            .unwrap();

        let (normalizer, handle) = Normalizer::new(db.clone(), DEFAULT_INSTITUTION_ID);
        tokio::spawn(normalizer.run());
        (db, handle)
    }

    #[tokio::test]
    async fn applies_check_in_and_check_out() {
        let (db, handle) = engine().await;

        let report = handle
            .apply_batch("push", vec![punch("101", 10, 5), punch("101", 18, 10)])
            .await
            .unwrap();

        assert_eq!(report.applied, 2);
        assert!(report.all_resolved());

        let staff = db.staff().resolve(1, "101").await.unwrap().unwrap();
        let row = db
            .attendance()
            .get(staff.id, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(row.time_in, NaiveTime::from_hms_opt(10, 5, 0));
        assert_eq!(row.time_out, NaiveTime::from_hms_opt(18, 10, 0));
        assert_eq!(row.status, AttendanceStatus::Late); // 10:05 > 09:15 grace
    }

    #[tokio::test]
    async fn redelivery_is_a_visible_noop() {
        let (db, handle) = engine().await;
        let batch = vec![punch("101", 10, 5), punch("101", 18, 10)];

        let first = handle.apply_batch("push", batch.clone()).await.unwrap();
        assert_eq!(first.applied, 2);

        let second = handle.apply_batch("push", batch).await.unwrap();
        assert_eq!(second.applied, 0);
        assert_eq!(second.duplicates, 2);
        assert!(second.all_resolved());

        let staff = db.staff().resolve(1, "101").await.unwrap().unwrap();
        let row = db
            .attendance()
            .get(staff.id, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.time_in, NaiveTime::from_hms_opt(10, 5, 0));
        assert_eq!(row.time_out, NaiveTime::from_hms_opt(18, 10, 0));
    }

    #[tokio::test]
    async fn unknown_staff_is_quarantined_and_resolved() {
        let (db, handle) = engine().await;

        let report = handle
            .apply_batch("push", vec![punch("999", 9, 0)])
            .await
            .unwrap();

        assert_eq!(report.quarantined, 1);
        assert!(report.all_resolved());

        let held = db.quarantine().recent_punches(10).await.unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].reason, "staff_not_found");
    }

    #[tokio::test]
    async fn leave_day_pins_the_row() {
        let (db, handle) = engine().await;
        let staff = db.staff().resolve(1, "101").await.unwrap().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        db.calendar()
            .add_exception(1, Some(staff.id), date, CalendarException::Leave, None)
            .await
            .unwrap();

        let report = handle
            .apply_batch("push", vec![punch("101", 9, 0)])
            .await
            .unwrap();
        assert_eq!(report.ignored, 1);

        let row = db.attendance().get(staff.id, date).await.unwrap().unwrap();
        assert_eq!(row.status, AttendanceStatus::OnLeave);
        assert_eq!(row.time_in, None);
    }

    #[tokio::test]
    async fn out_of_order_batches_converge() {
        let (db, handle) = engine().await;

        // T3, T1, T2
        handle
            .apply_batch(
                "push",
                vec![punch("101", 18, 0), punch("101", 9, 0), punch("101", 12, 0)],
            )
            .await
            .unwrap();

        let staff = db.staff().resolve(1, "101").await.unwrap().unwrap();
        let row = db
            .attendance()
            .get(staff.id, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(row.time_in, NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(row.time_out, NaiveTime::from_hms_opt(18, 0, 0));
    }

    #[test]
    fn frontier_stops_at_first_unresolved() {
        let mut report = BatchReport::default();
        let base = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let at = |h: u32| base.and_hms_opt(h, 0, 0).unwrap();

        report.push(at(9), ApplyOutcome::Applied);
        report.push(at(10), ApplyOutcome::Duplicate);
        report.push(at(11), ApplyOutcome::Failed("disk".into()));
        report.push(at(12), ApplyOutcome::Applied);

        assert_eq!(report.resolved_frontier(), Some(at(10)));
        assert!(!report.all_resolved());
    }

    #[test]
    fn frontier_with_equal_timestamps_is_conservative() {
        let mut report = BatchReport::default();
        let base = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let at = |h: u32| base.and_hms_opt(h, 0, 0).unwrap();

        report.push(at(9), ApplyOutcome::Applied);
        report.push(at(10), ApplyOutcome::Applied);
        report.push(at(10), ApplyOutcome::Failed("disk".into()));

        // A failure at 10:00 holds the frontier below 10:00 even though
        // another record at 10:00 resolved
        assert_eq!(report.resolved_frontier(), Some(at(9)));
    }

    #[test]
    fn frontier_of_fully_resolved_batch_is_max_timestamp() {
        let mut report = BatchReport::default();
        let base = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let at = |h: u32| base.and_hms_opt(h, 0, 0).unwrap();

        report.push(at(18), ApplyOutcome::Applied);
        report.push(at(9), ApplyOutcome::Quarantined(QuarantineReason::StaffNotFound));

        assert_eq!(report.resolved_frontier(), Some(at(18)));
        assert!(report.all_resolved());
    }
}
