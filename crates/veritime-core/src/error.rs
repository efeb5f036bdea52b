//! # Error Types
//!
//! Domain-specific error types for veritime-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  veritime-core errors (this file)                                      │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  veritime-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  veritime-sync errors (separate crate)                                 │
//! │  └── SyncError        - Device I/O, decode, ingestion failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → diagnostics/logs      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core attendance logic errors.
///
/// These represent rule violations inside the pure domain layer. They are
/// translated into per-record diagnostics by the ingestion engine, never
/// surfaced to a device.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A punch timestamp falls outside the representable range.
    #[error("Punch timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    /// A punch arrived for a date different from the row it targets.
    ///
    /// ## When This Occurs
    /// - The caller folded a punch into the wrong day row
    /// - Indicates a programming error upstream, not bad device data
    #[error("Punch dated {punch_date} cannot apply to attendance row for {row_date}")]
    DateMismatch {
        punch_date: chrono::NaiveDate,
        row_date: chrono::NaiveDate,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised at the decode boundary, before any punch reaches the state
/// machine. An invalid field becomes a decode diagnostic, not a crash.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., invalid serial, invalid timestamp).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::Required {
            field: "serial_number".to_string(),
        };
        assert_eq!(err.to_string(), "serial_number is required");

        let err = ValidationError::InvalidFormat {
            field: "timestamp".to_string(),
            reason: "not a date".to_string(),
        };
        assert!(err.to_string().contains("timestamp"));
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "user_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
