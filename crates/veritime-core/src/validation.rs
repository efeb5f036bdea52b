//! # Validation Module
//!
//! Input validation at the decode boundary.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Wire Decoder / DeviceLink                                    │
//! │  ├── THIS MODULE: shape checks on serials, user ids, timestamps        │
//! │  └── Failures become per-record DecodeError diagnostics                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Normalizer                                                   │
//! │  ├── Staff resolution, calendar lookups                                │
//! │  └── Unresolvable records are quarantined                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  ├── UNIQUE constraints (punch ledger, (staff, date) row)              │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::PAYLOAD_SAMPLE_MAX;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a device hardware serial number.
///
/// ## Rules
/// - Must not be empty after trimming
/// - Must be at most 50 characters
/// - Alphanumeric plus `-` and `_` only
pub fn validate_serial(serial: &str) -> ValidationResult<&str> {
    let serial = serial.trim();

    if serial.is_empty() {
        return Err(ValidationError::Required {
            field: "serial_number".to_string(),
        });
    }

    if serial.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "serial_number".to_string(),
            max: 50,
        });
    }

    if !serial
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "serial_number".to_string(),
            reason: "only alphanumeric characters, hyphens and underscores allowed".to_string(),
        });
    }

    Ok(serial)
}

/// Validates a device-local user identifier.
///
/// Terminals enroll users under short numeric or alphanumeric codes; 24
/// characters covers every model seen in the field.
pub fn validate_device_user_id(user_id: &str) -> ValidationResult<&str> {
    let user_id = user_id.trim();

    if user_id.is_empty() {
        return Err(ValidationError::Required {
            field: "user_id".to_string(),
        });
    }

    if user_id.len() > 24 {
        return Err(ValidationError::TooLong {
            field: "user_id".to_string(),
            max: 24,
        });
    }

    Ok(user_id)
}

// =============================================================================
// Payload Sampling
// =============================================================================

/// Truncates raw payload bytes to a bounded, lossy UTF-8 sample.
///
/// Used for quarantine and diagnostic rows so triage tables stay bounded
/// no matter what a device sends.
pub fn payload_sample(payload: &[u8]) -> String {
    let end = payload.len().min(PAYLOAD_SAMPLE_MAX);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

// =============================================================================
// Unit Tests
// =============================================================================
