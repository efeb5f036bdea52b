//! # Day-State Machine
//!
//! Pure transition rules for one (staff, date) attendance row.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Per-(staff, date) Transitions                          │
//! │                                                                         │
//! │            first punch              second+ punch                       │
//! │  ┌─────────┐        ┌───────────┐           ┌────────────┐             │
//! │  │ NoPunch │ ─────► │ CheckedIn │ ────────► │ CheckedOut │ ──┐         │
//! │  └─────────┘        └───────────┘           └────────────┘   │         │
//! │       │                                           ▲          │         │
//! │       │                                           └──────────┘         │
//! │       │                                      later punch: time_out     │
//! │       │                                      moves to the latest seen  │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────────────────────────┐                      │
//! │  │ Calendar short-circuit                       │                      │
//! │  │ Holiday / OnLeave / OnDuty / OnPermission    │                      │
//! │  │ pins the row; punches are recorded but       │                      │
//! │  │ never change the status or times             │                      │
//! │  └──────────────────────────────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timestamp-ordinal policy
//! Device firmware is inconsistent about punch-code semantics (several
//! models send `0` for every punch), so in/out direction is derived from
//! timestamp order alone: time_in is the earliest punch observed for the
//! day, time_out the latest. The fold is a min/max, so out-of-order
//! delivery converges to the same row.

use chrono::NaiveTime;

use crate::types::{AttendanceStatus, CalendarException, CanonicalAttendanceEvent, ShiftTiming};

// =============================================================================
// Day State
// =============================================================================

/// Observable state of a day row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    /// No punch recorded yet.
    NoPunch,
    /// Exactly one punch observed.
    CheckedIn,
    /// Two or more punches observed.
    CheckedOut,
}

/// What a single punch did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First punch of the day set the check-in.
    SetCheckIn,
    /// A subsequent punch moved check-in and/or check-out.
    UpdatedTimes,
    /// Row is pinned by a calendar exception; times untouched.
    CalendarPinned,
    /// Punch was inside the already-observed window; row unchanged.
    Unchanged,
}

// =============================================================================
// Punch Fold
// =============================================================================

/// The mutable core of a canonical row, folded punch by punch.
///
/// This is the only place attendance times and statuses are computed. The
/// normalizer loads it from the stored row, applies one punch, and writes
/// it back inside the same transaction as the idempotence ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunchFold {
    pub time_in: Option<NaiveTime>,
    pub time_out: Option<NaiveTime>,
    pub status: AttendanceStatus,
    pub late_minutes: i64,
    pub early_departure_minutes: i64,
}

impl PunchFold {
    /// A day with no punches and no calendar facts.
    pub fn empty() -> Self {
        PunchFold {
            time_in: None,
            time_out: None,
            status: AttendanceStatus::Absent,
            late_minutes: 0,
            early_departure_minutes: 0,
        }
    }

    /// A day pinned by an approved calendar exception.
    pub fn pinned(exception: CalendarException) -> Self {
        PunchFold {
            time_in: None,
            time_out: None,
            status: exception.status(),
            late_minutes: 0,
            early_departure_minutes: 0,
        }
    }

    /// Rehydrates the fold from a stored row.
    pub fn from_row(row: &CanonicalAttendanceEvent) -> Self {
        PunchFold {
            time_in: row.time_in,
            time_out: row.time_out,
            status: row.status,
            late_minutes: row.late_minutes,
            early_departure_minutes: row.early_departure_minutes,
        }
    }

    /// Current state in the NoPunch → CheckedIn → CheckedOut machine.
    pub fn state(&self) -> DayState {
        match (self.time_in, self.time_out) {
            (None, _) => DayState::NoPunch,
            (Some(_), None) => DayState::CheckedIn,
            (Some(_), Some(_)) => DayState::CheckedOut,
        }
    }

    /// Folds one punch time into the row.
    ///
    /// The first punch sets check-in. Every subsequent punch re-derives the
    /// window as (earliest seen, latest seen), so a third-or-later punch is
    /// latest-wins for check-out and redelivery in any order converges.
    pub fn apply(&mut self, punch_time: NaiveTime, shift: &ShiftTiming) -> Transition {
        if self.status.is_calendar_override() {
            return Transition::CalendarPinned;
        }

        let transition = match self.time_in {
            None => {
                self.time_in = Some(punch_time);
                Transition::SetCheckIn
            }
            Some(current_in) => {
                let current_out = self.time_out.unwrap_or(current_in);
                let earliest = current_in.min(punch_time);
                let latest = current_out.max(punch_time);

                let changed = earliest != current_in || Some(latest) != self.time_out;
                self.time_in = Some(earliest);
                self.time_out = Some(latest);

                if changed {
                    Transition::UpdatedTimes
                } else {
                    Transition::Unchanged
                }
            }
        };

        self.derive_status(shift);
        transition
    }

    /// Recomputes status and minute counters against the shift window.
    ///
    /// Late wins over left-soon when both apply; both minute counters are
    /// kept regardless so reports can show them side by side.
    fn derive_status(&mut self, shift: &ShiftTiming) {
        if self.status.is_calendar_override() {
            return;
        }

        let Some(time_in) = self.time_in else {
            self.status = AttendanceStatus::Absent;
            return;
        };

        let grace_deadline = shift.start + chrono::Duration::minutes(shift.grace_minutes);
        self.late_minutes = if time_in > grace_deadline {
            (time_in - shift.start).num_minutes()
        } else {
            0
        };

        self.early_departure_minutes = match self.time_out {
            Some(out) if out < shift.end => (shift.end - out).num_minutes(),
            _ => 0,
        };

        self.status = if self.late_minutes > 0 {
            AttendanceStatus::Late
        } else if self.early_departure_minutes > 0 {
            AttendanceStatus::LeftSoon
        } else {
            AttendanceStatus::Present
        };
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn shift() -> ShiftTiming {
        ShiftTiming::default() // 09:00-17:00, 15 min grace
    }

    #[test]
    fn first_punch_sets_check_in() {
        let mut fold = PunchFold::empty();
        assert_eq!(fold.state(), DayState::NoPunch);

        let tr = fold.apply(t(8, 55), &shift());
        assert_eq!(tr, Transition::SetCheckIn);
        assert_eq!(fold.state(), DayState::CheckedIn);
        assert_eq!(fold.time_in, Some(t(8, 55)));
        assert_eq!(fold.time_out, None);
        assert_eq!(fold.status, AttendanceStatus::Present);
    }

    #[test]
    fn second_punch_sets_check_out() {
        let mut fold = PunchFold::empty();
        fold.apply(t(9, 0), &shift());
        fold.apply(t(17, 30), &shift());

        assert_eq!(fold.state(), DayState::CheckedOut);
        assert_eq!(fold.time_in, Some(t(9, 0)));
        assert_eq!(fold.time_out, Some(t(17, 30)));
        assert_eq!(fold.status, AttendanceStatus::Present);
    }

    #[test]
    fn third_punch_is_latest_wins_for_check_out() {
        let mut fold = PunchFold::empty();
        fold.apply(t(9, 0), &shift());
        fold.apply(t(12, 0), &shift());
        fold.apply(t(18, 10), &shift());

        assert_eq!(fold.time_in, Some(t(9, 0)));
        assert_eq!(fold.time_out, Some(t(18, 10)));
    }

    #[test]
    fn out_of_order_delivery_converges() {
        // T3, T1, T2 must end up identical to T1, T2, T3
        let mut fold = PunchFold::empty();
        fold.apply(t(18, 0), &shift());
        fold.apply(t(9, 0), &shift());
        fold.apply(t(12, 0), &shift());

        assert_eq!(fold.time_in, Some(t(9, 0)));
        assert_eq!(fold.time_out, Some(t(18, 0)));

        let mut in_order = PunchFold::empty();
        in_order.apply(t(9, 0), &shift());
        in_order.apply(t(12, 0), &shift());
        in_order.apply(t(18, 0), &shift());
        assert_eq!(fold, in_order);
    }

    #[test]
    fn late_check_in_derives_late_with_minutes() {
        let mut fold = PunchFold::empty();
        fold.apply(t(9, 40), &shift());

        assert_eq!(fold.status, AttendanceStatus::Late);
        assert_eq!(fold.late_minutes, 40);
    }

    #[test]
    fn check_in_within_grace_is_present() {
        let mut fold = PunchFold::empty();
        fold.apply(t(9, 14), &shift());
        assert_eq!(fold.status, AttendanceStatus::Present);
        assert_eq!(fold.late_minutes, 0);
    }

    #[test]
    fn early_check_out_derives_left_soon() {
        let mut fold = PunchFold::empty();
        fold.apply(t(9, 0), &shift());
        fold.apply(t(16, 0), &shift());

        assert_eq!(fold.status, AttendanceStatus::LeftSoon);
        assert_eq!(fold.early_departure_minutes, 60);
    }

    #[test]
    fn late_wins_over_left_soon() {
        let mut fold = PunchFold::empty();
        fold.apply(t(10, 0), &shift());
        fold.apply(t(16, 0), &shift());

        assert_eq!(fold.status, AttendanceStatus::Late);
        assert_eq!(fold.late_minutes, 60);
        assert_eq!(fold.early_departure_minutes, 60);
    }

    #[test]
    fn calendar_pinned_row_ignores_punches() {
        let mut fold = PunchFold::pinned(CalendarException::Leave);
        let tr = fold.apply(t(9, 0), &shift());

        assert_eq!(tr, Transition::CalendarPinned);
        assert_eq!(fold.status, AttendanceStatus::OnLeave);
        assert_eq!(fold.time_in, None);
        assert_eq!(fold.time_out, None);
    }

    #[test]
    fn repeated_time_inside_window_is_unchanged() {
        let mut fold = PunchFold::empty();
        fold.apply(t(9, 0), &shift());
        fold.apply(t(18, 0), &shift());
        let tr = fold.apply(t(12, 0), &shift());

        assert_eq!(tr, Transition::Unchanged);
        assert_eq!(fold.time_in, Some(t(9, 0)));
        assert_eq!(fold.time_out, Some(t(18, 0)));
    }
}
