//! # Domain Types
//!
//! Core domain types used throughout Veritime.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────┐   ┌─────────────────┐  │
//! │  │     Device      │   │      RawPunch        │   │ Canonical       │  │
//! │  │  ─────────────  │   │  ──────────────────  │   │ AttendanceEvent │  │
//! │  │  serial (uniq)  │   │  device_serial       │   │  ─────────────  │  │
//! │  │  host:port      │   │  device_user_id      │   │  staff_id       │  │
//! │  │  mode           │   │  timestamp (naive)   │   │  date           │  │
//! │  │  model/firmware │   │  punch_code          │   │  time_in/out    │  │
//! │  │  last_handshake │   │  verify_method       │   │  status         │  │
//! │  └─────────────────┘   └──────────────────────┘   └─────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────┐   ┌─────────────────┐  │
//! │  │  SyncWatermark  │   │ UnknownDeviceRecord  │   │ QuarantinedPunch│  │
//! │  │  ─────────────  │   │  ──────────────────  │   │  ─────────────  │  │
//! │  │  device_serial  │   │  serial, first/last  │   │  serial, user   │  │
//! │  │  last_applied   │   │  seen, attempts      │   │  reason, detail │  │
//! │  └─────────────────┘   └──────────────────────┘   └─────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity of a punch
//! A raw punch is identified by the tuple
//! `(device_serial, device_user_id, timestamp, punch_code)`. The ingestion
//! engine applies each tuple to the canonical store at most once, no matter
//! how many times or through which path it arrives.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Wire Format
// =============================================================================

/// Detected wire format of a push payload.
///
/// Terminals in the field speak three incompatible formats depending on
/// model generation; `Empty` marks a handshake-only contact and `Unknown`
/// a payload the decoder could not classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Tab/space-delimited text rows (legacy fingerprint terminals).
    Text,
    /// JSON batches (modern face-recognition terminals).
    Json,
    /// Attribute-style XML (specific older models).
    Xml,
    /// No payload at all - handshake-only contact, not an error.
    Empty,
    /// Could not be classified.
    Unknown,
    /// Fetched over the vendor binary protocol (poll path, never sniffed).
    Vendor,
}

impl WireFormat {
    /// Tag used in diagnostic logs.
    pub fn tag(&self) -> &'static str {
        match self {
            WireFormat::Text => "text",
            WireFormat::Json => "json",
            WireFormat::Xml => "xml",
            WireFormat::Empty => "empty",
            WireFormat::Unknown => "unknown",
            WireFormat::Vendor => "vendor",
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// =============================================================================
// Punch Kind / Verify Method
// =============================================================================

/// Vendor punch-code semantics.
///
/// Observed firmware is inconsistent about these codes (several models send
/// `0` for every punch), so the normalizer never trusts them for in/out
/// direction. The raw code stays part of the punch identity tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PunchKind {
    CheckIn,
    CheckOut,
    BreakOut,
    BreakIn,
    OvertimeIn,
    OvertimeOut,
}

impl PunchKind {
    /// Maps a vendor punch code to its nominal meaning.
    ///
    /// Unrecognized codes map to `CheckIn`, matching the most common
    /// firmware default.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => PunchKind::CheckOut,
            2 => PunchKind::BreakOut,
            3 => PunchKind::BreakIn,
            4 => PunchKind::OvertimeIn,
            5 => PunchKind::OvertimeOut,
            _ => PunchKind::CheckIn,
        }
    }
}

/// Biometric verification method reported by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMethod {
    Password,
    Fingerprint,
    Face,
    Palm,
    Card,
    Iris,
}

impl VerifyMethod {
    /// Maps a vendor verify code to a method.
    ///
    /// Code 15 is face on several models; unrecognized codes default to
    /// fingerprint, the most common hardware.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => VerifyMethod::Password,
            2 | 15 => VerifyMethod::Face,
            3 => VerifyMethod::Palm,
            4 => VerifyMethod::Card,
            5 => VerifyMethod::Iris,
            _ => VerifyMethod::Fingerprint,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyMethod::Password => "password",
            VerifyMethod::Fingerprint => "fingerprint",
            VerifyMethod::Face => "face",
            VerifyMethod::Palm => "palm",
            VerifyMethod::Card => "card",
            VerifyMethod::Iris => "iris",
        }
    }
}

impl std::fmt::Display for VerifyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Connection Mode
// =============================================================================

/// How a terminal is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum ConnectionMode {
    /// Agent polls the device over the vendor TCP protocol.
    #[default]
    Poll,
    /// Device pushes unsolicited batches to the HTTP receiver.
    Push,
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionMode::Poll => write!(f, "poll"),
            ConnectionMode::Push => write!(f, "push"),
        }
    }
}

impl std::str::FromStr for ConnectionMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poll" | "lan" | "agent" => Ok(ConnectionMode::Poll),
            "push" | "adms" => Ok(ConnectionMode::Push),
            other => Err(CoreError::Validation(crate::error::ValidationError::InvalidFormat {
                field: "connection_mode".to_string(),
                reason: format!("unknown mode '{}'. Valid options: poll, push", other),
            })),
        }
    }
}

// =============================================================================
// Attendance Status
// =============================================================================

/// Derived status of a canonical attendance row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    LeftSoon,
    OnLeave,
    OnDuty,
    OnPermission,
    Holiday,
}

impl AttendanceStatus {
    /// Returns true for statuses set by calendar facts rather than punches.
    pub fn is_calendar_override(&self) -> bool {
        matches!(
            self,
            AttendanceStatus::OnLeave
                | AttendanceStatus::OnDuty
                | AttendanceStatus::OnPermission
                | AttendanceStatus::Holiday
        )
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::LeftSoon => "left_soon",
            AttendanceStatus::OnLeave => "on_leave",
            AttendanceStatus::OnDuty => "on_duty",
            AttendanceStatus::OnPermission => "on_permission",
            AttendanceStatus::Holiday => "holiday",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Calendar Exception
// =============================================================================

/// An approved calendar fact covering a (staff, date).
///
/// Calendar facts win over raw punches: a punch on an approved leave day is
/// recorded (for idempotence) but never flips the row back to present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarException {
    Holiday,
    Leave,
    OnDuty,
    Permission,
}

impl CalendarException {
    /// The attendance status this exception pins the row to.
    pub fn status(&self) -> AttendanceStatus {
        match self {
            CalendarException::Holiday => AttendanceStatus::Holiday,
            CalendarException::Leave => AttendanceStatus::OnLeave,
            CalendarException::OnDuty => AttendanceStatus::OnDuty,
            CalendarException::Permission => AttendanceStatus::OnPermission,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarException::Holiday => "holiday",
            CalendarException::Leave => "leave",
            CalendarException::OnDuty => "on_duty",
            CalendarException::Permission => "permission",
        }
    }

    /// Parses the database representation.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "holiday" => Some(CalendarException::Holiday),
            "leave" => Some(CalendarException::Leave),
            "on_duty" => Some(CalendarException::OnDuty),
            "permission" => Some(CalendarException::Permission),
            _ => None,
        }
    }
}

// =============================================================================
// Raw Punch
// =============================================================================

/// One raw biometric clock event as reported by a terminal.
///
/// Ephemeral: produced by the decoder or DeviceLink, consumed immediately by
/// the normalizer, never persisted as-is. The timestamp is the device's
/// local clock with no trustworthy timezone, so it stays naive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPunch {
    /// Hardware serial number of the reporting terminal.
    pub device_serial: String,

    /// User identifier as enrolled on the device (not a staff id).
    pub device_user_id: String,

    /// Device-local timestamp.
    pub timestamp: NaiveDateTime,

    /// Vendor punch code, untrusted for in/out direction.
    pub punch_code: u8,

    /// Verification method used for this punch.
    pub verify_method: VerifyMethod,

    /// Which wire format this punch was decoded from.
    pub source_format: WireFormat,
}

impl RawPunch {
    /// The identity tuple under which this punch is applied at most once.
    pub fn identity(&self) -> (&str, &str, NaiveDateTime, u8) {
        (
            &self.device_serial,
            &self.device_user_id,
            self.timestamp,
            self.punch_code,
        )
    }

    /// Nominal punch kind from the vendor code.
    pub fn kind(&self) -> PunchKind {
        PunchKind::from_code(self.punch_code)
    }
}

// =============================================================================
// Device Registry
// =============================================================================

/// A registered biometric terminal.
///
/// Created on first handshake or admin registration; mutated on every
/// handshake and sync cycle; never hard-deleted (soft state only).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Device {
    /// Row identifier.
    pub id: i64,

    /// Institution this device belongs to.
    pub institution_id: i64,

    /// Hardware serial number (unique).
    pub serial_number: String,

    /// Human-readable name.
    pub device_name: String,

    /// Network host for polled devices (push devices dial in themselves).
    pub host: Option<String>,

    /// Vendor protocol port.
    pub port: i64,

    /// How this device is reached.
    pub mode: ConnectionMode,

    /// Wire format detected from the device's last push, if any.
    pub detected_format: Option<String>,

    /// Device model name reported during handshake (e.g. uFace802, K40).
    pub device_model: Option<String>,

    /// Firmware version reported during handshake.
    pub firmware_version: Option<String>,

    /// Device platform/architecture reported during handshake.
    pub platform: Option<String>,

    /// Last handshake/options contact.
    pub last_handshake: Option<NaiveDateTime>,

    /// Last successful sync.
    pub last_sync: Option<NaiveDateTime>,

    /// Last sync outcome: "success", "failed", "degraded", "unknown".
    pub sync_status: String,

    /// Soft-delete / enable flag.
    pub is_active: bool,

    /// Set when the poller exhausts its failure budget for this device.
    pub is_degraded: bool,
}

impl Device {
    /// `host:port` address for the polling agent.
    pub fn address(&self) -> Option<String> {
        self.host.as_ref().map(|h| format!("{}:{}", h, self.port))
    }
}

/// A user record enrolled on a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUser {
    /// Device-local user identifier.
    pub user_id: String,

    /// Display name stored on the device.
    pub name: String,

    /// Vendor privilege level (0 = normal user, 14 = admin).
    pub privilege: u8,

    /// Proximity card number, when enrolled.
    pub card_number: u32,
}

// =============================================================================
// Canonical Attendance Event
// =============================================================================

/// The single authoritative per-staff-per-day attendance record.
///
/// One row per (staff, date); owned exclusively by the normalizer; read by
/// downstream reporting and payroll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CanonicalAttendanceEvent {
    /// Row identifier.
    pub id: i64,

    /// Internal staff id (not the device-local user id).
    pub staff_id: i64,

    /// Institution scope.
    pub institution_id: i64,

    /// Calendar date of this row.
    pub date: NaiveDate,

    /// Earliest punch observed for the day.
    pub time_in: Option<NaiveTime>,

    /// Latest punch observed for the day, once two or more exist.
    pub time_out: Option<NaiveTime>,

    /// Derived status.
    pub status: AttendanceStatus,

    /// Minutes past shift start + grace at check-in.
    pub late_minutes: i64,

    /// Minutes before shift end at check-out.
    pub early_departure_minutes: i64,

    /// Shift this row was evaluated against.
    pub shift_type: String,

    /// Snapshot of the shift window used for status derivation.
    pub shift_start: Option<NaiveTime>,
    pub shift_end: Option<NaiveTime>,
}

// =============================================================================
// Shift Timing
// =============================================================================

/// Shift window used for status derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftTiming {
    /// Shift identifier ("general", "morning", "night", ...).
    pub shift_type: String,

    /// Scheduled start of work.
    pub start: NaiveTime,

    /// Scheduled end of work.
    pub end: NaiveTime,

    /// Minutes past `start` before a check-in counts as late.
    pub grace_minutes: i64,
}

impl Default for ShiftTiming {
    fn default() -> Self {
        ShiftTiming {
            shift_type: "general".to_string(),
            start: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(17, 0, 0).expect("valid time"),
            grace_minutes: crate::DEFAULT_GRACE_MINUTES,
        }
    }
}

// =============================================================================
// Staff Directory
// =============================================================================

/// Resolved staff identity for a device-local user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StaffRef {
    /// Internal staff id.
    pub id: i64,

    /// The code enrolled on terminals for this person.
    pub staff_code: String,

    /// Display name.
    pub name: String,

    /// Shift assignment used for status derivation.
    pub shift_type: String,
}

// =============================================================================
// Sync Watermark
// =============================================================================

/// Per-device monotonic cursor.
///
/// `last_applied` marks the newest device timestamp known to be durably
/// applied or durably quarantined. It only ever advances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SyncWatermark {
    pub device_serial: String,
    pub last_applied: NaiveDateTime,
}

// =============================================================================
// Quarantine / Diagnostics
// =============================================================================

/// Why a punch or contact was quarantined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    UnknownDevice,
    StaffNotFound,
    DecodeError,
}

impl QuarantineReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineReason::UnknownDevice => "unknown_device",
            QuarantineReason::StaffNotFound => "staff_not_found",
            QuarantineReason::DecodeError => "decode_error",
        }
    }
}

/// Holding record for contacts from unregistered hardware.
///
/// Used purely for admin triage; never auto-promoted to a registered
/// device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UnknownDeviceRecord {
    pub id: i64,
    pub serial_number: String,
    pub ip_address: Option<String>,
    pub device_model: Option<String>,
    pub firmware_version: Option<String>,
    pub platform: Option<String>,
    /// "handshake" or "data_push".
    pub request_kind: String,
    /// Bounded raw-payload sample for triage.
    pub payload_sample: Option<String>,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub attempt_count: i64,
}

/// A punch held back from the canonical store, kept for admin triage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct QuarantinedPunch {
    pub id: i64,
    pub device_serial: String,
    pub device_user_id: Option<String>,
    pub punch_timestamp: Option<NaiveDateTime>,
    /// One of the `QuarantineReason` tags.
    pub reason: String,
    pub detail: Option<String>,
    pub created_at: NaiveDateTime,
}

/// One protocol-detection log row per inbound data push.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProtocolDetectionEntry {
    pub id: i64,
    pub serial_number: Option<String>,
    pub request_method: String,
    pub request_path: String,
    pub content_type: Option<String>,
    /// Wire format tag, or "N/A" when no payload was decodable at all.
    pub detected_format: String,
    pub parsed_ok: bool,
    pub error_message: Option<String>,
    pub body_sample: Option<String>,
    pub created_at: NaiveDateTime,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_punch_kind_mapping() {
        assert_eq!(PunchKind::from_code(0), PunchKind::CheckIn);
        assert_eq!(PunchKind::from_code(1), PunchKind::CheckOut);
        assert_eq!(PunchKind::from_code(5), PunchKind::OvertimeOut);
        // Unknown codes fall back to check-in
        assert_eq!(PunchKind::from_code(42), PunchKind::CheckIn);
    }

    #[test]
    fn test_verify_method_mapping() {
        assert_eq!(VerifyMethod::from_code(1), VerifyMethod::Fingerprint);
        assert_eq!(VerifyMethod::from_code(2), VerifyMethod::Face);
        // Some devices use 15 for face
        assert_eq!(VerifyMethod::from_code(15), VerifyMethod::Face);
        assert_eq!(VerifyMethod::from_code(99), VerifyMethod::Fingerprint);
    }

    #[test]
    fn test_connection_mode_from_str() {
        assert_eq!("adms".parse::<ConnectionMode>().unwrap(), ConnectionMode::Push);
        assert_eq!("poll".parse::<ConnectionMode>().unwrap(), ConnectionMode::Poll);
        assert!("carrier-pigeon".parse::<ConnectionMode>().is_err());
    }

    #[test]
    fn test_calendar_exception_status() {
        assert_eq!(CalendarException::Leave.status(), AttendanceStatus::OnLeave);
        assert_eq!(CalendarException::Holiday.status(), AttendanceStatus::Holiday);
        assert!(CalendarException::Holiday.status().is_calendar_override());
        assert!(!AttendanceStatus::Late.is_calendar_override());
    }

    #[test]
    fn test_punch_identity_includes_code() {
        let ts = NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let a = RawPunch {
            device_serial: "ZK-01".into(),
            device_user_id: "101".into(),
            timestamp: ts,
            punch_code: 0,
            verify_method: VerifyMethod::Fingerprint,
            source_format: WireFormat::Json,
        };
        let mut b = a.clone();
        b.punch_code = 1;
        assert_ne!(a.identity(), b.identity());
    }
}
