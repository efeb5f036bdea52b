//! # Repository Implementations
//!
//! One repository per table group. Each repository holds a cloned pool and
//! exposes async methods for its table(s).
//!
//! ## Write Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attendance + applied_punches   written ONLY via the Normalizer        │
//! │  sync_watermarks                written ONLY via the Polling Agent     │
//! │  devices / quarantine / logs    written by receiver + poller           │
//! │  staff / shifts / calendar      read-only collaborator lookups         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod attendance;
pub mod calendar;
pub mod device;
pub mod diagnostics;
pub mod quarantine;
pub mod staff;
pub mod watermark;
