//! # veritime-db: Database Layer for Veritime
//!
//! This crate provides database access for the attendance engine.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Veritime Data Flow                                │
//! │                                                                         │
//! │  Normalizer / Poller / Push Receiver (veritime-sync)                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    veritime-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (device.rs,   │    │  (embedded)  │  │   │
//! │  │   │               │    │  attendance,  │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│  watermark,   │    │ 001_init.sql │  │   │
//! │  │   │ WAL + FKs     │    │  quarantine)  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL mode)                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations per table group
//!
//! ## Usage
//!
//! ```rust,ignore
//! use veritime_db::{Database, DbConfig};
//!
//! let config = DbConfig::new("path/to/veritime.db");
//! let db = Database::new(config).await?;
//!
//! let device = db.devices().find_by_serial("ZK-01").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::DbError;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::attendance::{AppliedOutcome, AttendanceRepository};
pub use repository::calendar::CalendarRepository;
pub use repository::device::DeviceRepository;
pub use repository::diagnostics::DiagnosticsRepository;
pub use repository::quarantine::QuarantineRepository;
pub use repository::staff::StaffRepository;
pub use repository::watermark::WatermarkRepository;
