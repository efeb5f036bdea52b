//! # Sync Error Types
//!
//! Error types for the ingestion engine.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Ingestion Error Categories                         │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Transport     │  │     Decode      │  │     Attribution         │ │
//! │  │  (transient,    │  │  (per-record,   │  │  (quarantined, device   │ │
//! │  │   poller retry) │  │   batch goes on)│  │   still acked)          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Connection     │  │  Decode         │  │  UnknownDevice          │ │
//! │  │  Timeout        │  │  Frame          │  │  StaffNotFound          │ │
//! │  │  Disconnected   │  │  Checksum       │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │  Configuration  │  │  Persistence / Internal                     │  │
//! │  │  InvalidConfig  │  │  WatermarkPersistence (cycle-fatal only)    │  │
//! │  │  ConfigLoad     │  │  Database, Channel, ShuttingDown            │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  A duplicate punch is NOT an error: it is ApplyOutcome::Duplicate,     │
//! │  observable in batch reports only.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Propagation policy: anything the device firmware would need to
//! "understand" is treated as a local, recoverable condition instead -
//! device retry behavior cannot be relied upon.

use thiserror::Error;

/// Result type alias for ingestion operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Ingestion error type covering device I/O, decoding and persistence.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoad(String),

    // =========================================================================
    // Transport Errors (DeviceLink)
    // =========================================================================
    /// Failed to establish a device session.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Device did not answer within the bounded timeout.
    #[error("Device timeout after {0} seconds")]
    Timeout(u64),

    /// Device closed the session mid-conversation.
    #[error("Device disconnected")]
    Disconnected,

    /// Malformed vendor frame.
    #[error("Protocol error: {0}")]
    Frame(String),

    /// Frame checksum did not verify.
    #[error("Frame checksum mismatch")]
    ChecksumMismatch,

    /// Device answered a command with an error status.
    #[error("Device rejected command {command:#06x}")]
    CommandRejected { command: u16 },

    // =========================================================================
    // Decode Errors
    // =========================================================================
    /// Whole-payload decode failure (per-record failures become
    /// diagnostics instead and never abort the batch).
    #[error("Decode failed: {0}")]
    Decode(String),

    // =========================================================================
    // Attribution Errors
    // =========================================================================
    /// Contact from an unregistered serial number.
    #[error("Unknown device: {serial}")]
    UnknownDevice { serial: String },

    /// No staff member resolves for a device-local user id.
    #[error("No staff found for device user {device_user_id}")]
    StaffNotFound { device_user_id: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Watermark write failed; the current poll cycle is abandoned and
    /// fully retried. No partial state is committed.
    #[error("Watermark persistence failed: {0}")]
    WatermarkPersistence(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    Channel(String),

    /// Engine is shutting down.
    #[error("Ingestion engine is shutting down")]
    ShuttingDown,

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<veritime_db::DbError> for SyncError {
    fn from(err: veritime_db::DbError) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => SyncError::Disconnected,
            std::io::ErrorKind::TimedOut => SyncError::Timeout(0),
            _ => SyncError::ConnectionFailed(err.to_string()),
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoad(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is transient and the polling agent
    /// should retry with backoff.
    ///
    /// ## Retryable Errors
    /// - Connection failures (network issues)
    /// - Timeouts
    /// - Mid-session disconnects
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Protocol/frame corruption (needs investigation, not retries)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) | SyncError::Disconnected
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, SyncError::InvalidConfig(_) | SyncError::ConfigLoad(_))
    }

    /// Returns true for failures that abandon the current poll cycle
    /// without advancing any state.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::WatermarkPersistence(_) | SyncError::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::ChecksumMismatch.is_retryable());
        assert!(!SyncError::WatermarkPersistence("disk full".into()).is_retryable());
    }

    #[test]
    fn test_cycle_fatal_errors() {
        assert!(SyncError::WatermarkPersistence("disk full".into()).is_cycle_fatal());
        assert!(SyncError::Database("locked".into()).is_cycle_fatal());
        assert!(!SyncError::Timeout(10).is_cycle_fatal());
    }

    #[test]
    fn test_io_error_mapping() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(SyncError::from(eof), SyncError::Disconnected));

        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(SyncError::from(refused), SyncError::ConnectionFailed(_)));
    }
}
