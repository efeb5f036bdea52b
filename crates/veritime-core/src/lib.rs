//! # veritime-core: Pure Attendance Logic for Veritime
//!
//! This crate is the **heart** of the attendance engine. It contains the
//! canonical transition rules as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Veritime Architecture                             │
//! │                                                                         │
//! │  ┌──────────────┐        ┌──────────────┐                              │
//! │  │ Polling Agent│        │ Push Receiver│   Two independent producers  │
//! │  │ (DeviceLink) │        │ (HTTP/ADMS)  │                              │
//! │  └──────┬───────┘        └──────┬───────┘                              │
//! │         │      RawPunch        │                                       │
//! │         └──────────┬───────────┘                                       │
//! │                    ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              ★ veritime-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │ daystate  │  │ validation│                  │   │
//! │  │   │ RawPunch  │  │ NoPunch → │  │   rules   │                  │   │
//! │  │   │ Attendance│  │ CheckedIn │  │  checks   │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                    │                                                    │
//! │                    ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  veritime-db (Database Layer)                   │   │
//! │  │            SQLite queries, migrations, repositories             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Device, RawPunch, CanonicalAttendanceEvent, ...)
//! - [`daystate`] - Per-(staff, date) attendance state machine
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation at the decode boundary
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Naive Time**: Device clocks carry no trustworthy timezone; timestamps stay naive
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod daystate;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use veritime_core::RawPunch` instead of
// `use veritime_core::types::RawPunch`

pub use daystate::{DayState, PunchFold, Transition};
pub use error::{CoreError, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default institution ID for single-institution deployments.
///
/// The schema carries institution_id on every scoped table so a later
/// multi-institution rollout is a data change, not a schema change.
pub const DEFAULT_INSTITUTION_ID: i64 = 1;

/// Vendor terminals listen on this TCP port out of the box.
pub const VENDOR_DEFAULT_PORT: u16 = 4370;

/// Grace period applied to check-in before a punch counts as late.
pub const DEFAULT_GRACE_MINUTES: i64 = 15;

/// Maximum number of raw payload bytes kept in quarantine/diagnostic samples.
///
/// Bounded so a misbehaving device cannot grow the triage tables without
/// limit; 500 bytes is enough to identify the format by eye.
pub const PAYLOAD_SAMPLE_MAX: usize = 500;
