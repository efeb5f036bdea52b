//! # veritime-sync: Biometric Attendance Ingestion Engine
//!
//! Talks to physical terminals over the vendor binary protocol, accepts
//! unsolicited pushes in three incompatible wire formats, and reconciles
//! everything into a single canonical attendance timeline exactly once -
//! despite flaky local networks, clock-skewed devices and redundant
//! ingress paths.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Ingestion Data Flow                             │
//! │                                                                         │
//! │   local-network terminals              push-mode terminals              │
//! │        │  vendor TCP                        │  HTTP (3 formats)         │
//! │        ▼                                    ▼                           │
//! │  ┌───────────┐                       ┌──────────────┐                   │
//! │  │ DeviceLink│                       │ PushReceiver │                   │
//! │  │  session  │                       │ /iclock/...  │                   │
//! │  └─────┬─────┘                       └──────┬───────┘                   │
//! │        │                                    │                           │
//! │        │                             ┌──────┴───────┐                   │
//! │        │                             │ Wire Decoder │                   │
//! │        │                             │ text|json|xml│                   │
//! │        │                             └──────┬───────┘                   │
//! │        ▼                                    ▼                           │
//! │  ┌───────────┐      RawPunch        ┌──────────────────────────┐        │
//! │  │ Polling   │ ───────────────────► │ Normalizer (actor)       │        │
//! │  │ Agent     │                      │ single serialization     │        │
//! │  │ +Watermark│ ◄─────────────────── │ point for all writers    │        │
//! │  └───────────┘   resolved frontier  └──────────────────────────┘        │
//! │                                                                         │
//! │  Unattributable data → quarantine (unknown devices, unknown staff)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`device_link`] - vendor-protocol session client (connect, users, punches)
//! - [`protocol`] - pure frame/record codec for the vendor protocol
//! - [`decoder`] - format-sniffing push payload parser
//! - [`normalizer`] - the idempotent single-writer actor
//! - [`poller`] - per-device polling loops + watermark discipline
//! - [`receiver`] - HTTP push endpoint with the ack-always contract
//! - [`config`] - TOML engine configuration
//! - [`error`] - the ingestion error taxonomy

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod decoder;
pub mod device_link;
pub mod error;
pub mod normalizer;
pub mod poller;
pub mod protocol;
pub mod receiver;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::SyncConfig;
pub use decoder::{decode, DecodeHints, DecodedBatch};
pub use device_link::{DeviceLink, VendorLink, VendorLinkConfig, VendorSession};
pub use error::{SyncError, SyncResult};
pub use normalizer::{ApplyOutcome, BatchReport, Normalizer, NormalizerHandle};
pub use poller::{PollerConfig, PollingAgent, PollingAgentHandle};
pub use receiver::{PushReceiver, ReceiverConfig, ReceiverHandle, ReceiverState};
