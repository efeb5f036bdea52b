//! # Wire Decoder
//!
//! Format-sniffing parser turning an unsolicited push's raw bytes plus a
//! content-type hint into normalized punch records.
//!
//! ## Classification
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Format Classification                             │
//! │                                                                         │
//! │  payload empty? ───────────────────────────────► Empty (not an error)  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Content-Type hint ("json" / "xml" / "text") ──► trust the header      │
//! │       │ absent or ambiguous                                             │
//! │       ▼                                                                 │
//! │  first non-whitespace byte:                                             │
//! │       '{' or '['  ──► JSON                                              │
//! │       '<'         ──► XML                                               │
//! │       else        ──► delimited-text heuristics, else Unknown           │
//! │                                                                         │
//! │  PER-RECORD FAILURES become diagnostics and are skipped; one bad       │
//! │  record never aborts the rest of the batch.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Accepted shapes
//! - Text: `ATTLOG\t101\t2026-03-02 09:00:00\t0\t1`, raw tab-separated
//!   rows, space-separated rows; `OK`/`ERROR` status lines are skipped
//! - JSON: an array of records, an object wrapping the array under
//!   `data`/`records`/`logs`/`attendance`, or a single record object
//! - XML: attribute-bearing `<Log/>`, `<Record/>`, `<Attendance/>` or
//!   `<Entry/>` elements (fallback: all children of the root)
//!
//! Field names vary by firmware; the decoder accepts the aliases observed
//! in the field (`user`/`pin`/`emp_id`/..., `time`/`punch_time`/...).

use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;
use tracing::{debug, warn};

use veritime_core::validation::{validate_device_user_id, validate_serial};
use veritime_core::{RawPunch, VerifyMethod, WireFormat};

// =============================================================================
// Inputs / Outputs
// =============================================================================

/// Request-level hints accompanying a push payload.
#[derive(Debug, Clone, Default)]
pub struct DecodeHints<'a> {
    /// HTTP Content-Type header, when present.
    pub content_type: Option<&'a str>,

    /// Device model from the query string, when present.
    pub device_model: Option<&'a str>,

    /// Firmware version from the query string, when present.
    pub firmware_version: Option<&'a str>,
}

/// One skipped record with the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeDiagnostic {
    /// 1-based line (text) or record index (JSON/XML), when known.
    pub record: Option<usize>,

    /// What went wrong.
    pub message: String,
}

/// Decoder output: format tag, good records, and per-record diagnostics.
#[derive(Debug, Clone)]
pub struct DecodedBatch {
    pub format: WireFormat,
    pub records: Vec<RawPunch>,
    pub diagnostics: Vec<DecodeDiagnostic>,
}

impl DecodedBatch {
    fn empty(format: WireFormat) -> Self {
        DecodedBatch {
            format,
            records: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn failed(format: WireFormat, message: String) -> Self {
        DecodedBatch {
            format,
            records: Vec::new(),
            diagnostics: vec![DecodeDiagnostic {
                record: None,
                message,
            }],
        }
    }

    /// First batch-level or record-level error message, for the
    /// protocol-detection log.
    pub fn first_error(&self) -> Option<&str> {
        self.diagnostics.first().map(|d| d.message.as_str())
    }
}

// =============================================================================
// Entry Point
// =============================================================================

/// Decodes a push payload into raw punches.
///
/// Never fails: the worst payload yields zero records plus diagnostics.
pub fn decode(device_serial: &str, payload: &[u8], hints: &DecodeHints<'_>) -> DecodedBatch {
    let serial = match validate_serial(device_serial) {
        Ok(serial) => serial,
        Err(e) => {
            return DecodedBatch::failed(WireFormat::Unknown, format!("bad device serial: {}", e))
        }
    };

    let text = String::from_utf8_lossy(payload);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        debug!(device = %serial, "Empty payload (handshake-only contact)");
        return DecodedBatch::empty(WireFormat::Empty);
    }

    let format = sniff_format(trimmed, hints.content_type);
    debug!(device = %serial, format = %format, "Detected payload format");

    match format {
        WireFormat::Json => parse_json(serial, trimmed),
        WireFormat::Xml => parse_xml(serial, trimmed),
        WireFormat::Text => parse_text(serial, trimmed),
        _ => {
            warn!(
                device = %serial,
                sample = %&trimmed[..trimmed.len().min(100)],
                "Unknown payload format"
            );
            DecodedBatch::failed(WireFormat::Unknown, "unknown payload format".to_string())
        }
    }
}

// =============================================================================
// Format Sniffing
// =============================================================================

/// Classifies the payload, preferring the content-type hint.
fn sniff_format(trimmed: &str, content_type: Option<&str>) -> WireFormat {
    if let Some(content_type) = content_type {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("json") {
            return WireFormat::Json;
        }
        if ct.contains("xml") {
            return WireFormat::Xml;
        }
        if ct.contains("text") || ct.contains("plain") {
            return WireFormat::Text;
        }
    }

    match trimmed.as_bytes()[0] {
        b'{' | b'[' => return WireFormat::Json,
        b'<' => return WireFormat::Xml,
        _ => {}
    }

    if looks_like_text_rows(trimmed) {
        return WireFormat::Text;
    }

    WireFormat::Unknown
}

/// Heuristics for the legacy delimited-text format.
fn looks_like_text_rows(trimmed: &str) -> bool {
    if trimmed.contains('\t')
        || trimmed.contains("ATTLOG")
        || trimmed.contains("USER")
        || trimmed.contains("OPLOG")
    {
        return true;
    }

    // Pattern: "<digits> <yyyy-mm-dd> <hh:mm...>" on the first line
    let first_line = trimmed.lines().next().unwrap_or("");
    let mut tokens = first_line.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(user), Some(date)) => {
            user.chars().all(|c| c.is_ascii_digit()) && looks_like_date(date)
        }
        _ => false,
    }
}

fn looks_like_date(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && (bytes[4] == b'-' || bytes[4] == b'/')
}

// =============================================================================
// Text Parser
// =============================================================================

fn parse_text(serial: &str, payload: &str) -> DecodedBatch {
    let mut batch = DecodedBatch::empty(WireFormat::Text);

    for (index, line) in payload.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // Command responses interleaved into upload bodies by some firmware
        if line.starts_with("OK") || line.starts_with("ERROR") {
            continue;
        }

        let fields = if let Some(rest) = line.strip_prefix("ATTLOG") {
            split_attlog(rest)
        } else {
            split_plain(line)
        };

        let Some(fields) = fields else {
            batch.diagnostics.push(DecodeDiagnostic {
                record: Some(index + 1),
                message: format!("unparseable row: '{}'", &line[..line.len().min(80)]),
            });
            continue;
        };

        match build_punch(serial, WireFormat::Text, fields) {
            Ok(punch) => batch.records.push(punch),
            Err(message) => batch.diagnostics.push(DecodeDiagnostic {
                record: Some(index + 1),
                message,
            }),
        }
    }

    batch
}

/// Raw fields extracted from any format, before validation.
struct RawFields {
    user_id: String,
    timestamp: String,
    punch_code: Option<String>,
    verify_method: Option<String>,
}

/// `ATTLOG\t<user>\t<timestamp>\t<code>\t<verify>`
fn split_attlog(rest: &str) -> Option<RawFields> {
    let parts: Vec<&str> = rest.trim_start_matches('\t').split('\t').collect();
    if parts.len() < 2 {
        return None;
    }

    Some(RawFields {
        user_id: parts[0].to_string(),
        timestamp: parts[1].to_string(),
        punch_code: parts.get(2).map(|s| s.to_string()),
        verify_method: parts.get(3).map(|s| s.to_string()),
    })
}

/// Raw tab-separated or space-separated rows.
fn split_plain(line: &str) -> Option<RawFields> {
    if line.contains('\t') {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            return None;
        }
        return Some(RawFields {
            user_id: parts[0].to_string(),
            timestamp: parts[1].to_string(),
            punch_code: parts.get(2).map(|s| s.to_string()),
            verify_method: parts.get(3).map(|s| s.to_string()),
        });
    }

    // Space-separated: the timestamp itself spans two tokens
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 2 {
        return None;
    }

    let (timestamp, rest_start) = if tokens.len() >= 3 && tokens[2].contains(':') {
        (format!("{} {}", tokens[1], tokens[2]), 3)
    } else {
        (tokens[1].to_string(), 2)
    };

    Some(RawFields {
        user_id: tokens[0].to_string(),
        timestamp,
        punch_code: tokens.get(rest_start).map(|s| s.to_string()),
        verify_method: tokens.get(rest_start + 1).map(|s| s.to_string()),
    })
}

// =============================================================================
// JSON Parser
// =============================================================================

/// Key aliases seen across firmware generations.
const USER_KEYS: &[&str] = &["user_id", "user", "pin", "userid", "emp_id", "cardno", "staff_id"];
const TIME_KEYS: &[&str] = &["timestamp", "time", "verify_time", "punch_time", "datetime", "att_time"];
const CODE_KEYS: &[&str] = &["status", "punch_code"];
const VERIFY_KEYS: &[&str] = &["verify_method", "verify", "method"];

/// Wrapper keys an object batch may use for its record array.
const BATCH_KEYS: &[&str] = &["data", "records", "logs", "attendance"];

fn parse_json(serial: &str, payload: &str) -> DecodedBatch {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            return DecodedBatch::failed(WireFormat::Json, format!("JSON parse error: {}", e))
        }
    };

    let logs: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(ref map) => {
            let wrapped = BATCH_KEYS
                .iter()
                .find_map(|key| map.get(*key))
                .and_then(Value::as_array)
                .cloned();
            match wrapped {
                Some(items) => items,
                // A single bare record object
                None => vec![value],
            }
        }
        _ => {
            return DecodedBatch::failed(
                WireFormat::Json,
                "unexpected JSON structure (not array or object)".to_string(),
            )
        }
    };

    let mut batch = DecodedBatch::empty(WireFormat::Json);
    for (index, log) in logs.iter().enumerate() {
        match json_fields(log) {
            Ok(fields) => match build_punch(serial, WireFormat::Json, fields) {
                Ok(punch) => batch.records.push(punch),
                Err(message) => batch.diagnostics.push(DecodeDiagnostic {
                    record: Some(index + 1),
                    message,
                }),
            },
            Err(message) => batch.diagnostics.push(DecodeDiagnostic {
                record: Some(index + 1),
                message,
            }),
        }
    }

    batch
}

fn json_fields(log: &Value) -> Result<RawFields, String> {
    let Value::Object(map) = log else {
        return Err("record is not an object".to_string());
    };

    let get = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|key| match map.get(*key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    };

    let user_id = get(USER_KEYS).ok_or_else(|| "no user id field".to_string())?;
    let timestamp = get(TIME_KEYS).ok_or_else(|| "no timestamp field".to_string())?;

    Ok(RawFields {
        user_id,
        timestamp,
        punch_code: get(CODE_KEYS),
        verify_method: get(VERIFY_KEYS),
    })
}

// =============================================================================
// XML Parser
// =============================================================================

/// Element names that carry one record each.
const XML_RECORD_TAGS: &[&str] = &["Log", "Record", "Attendance", "Entry"];

fn parse_xml(serial: &str, payload: &str) -> DecodedBatch {
    let mut reader = Reader::from_str(payload);

    // (element name, depth under root, attributes)
    let mut candidates: Vec<(String, usize, Vec<(String, String)>)> = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth > 0 {
                    candidates.push((
                        String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                        depth,
                        collect_attributes(&e),
                    ));
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                if depth > 0 {
                    candidates.push((
                        String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                        depth,
                        collect_attributes(&e),
                    ));
                }
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return DecodedBatch::failed(WireFormat::Xml, format!("XML parse error: {}", e))
            }
        }
    }

    // Prefer elements with known record names; otherwise fall back to
    // every direct child of the root
    let known: Vec<_> = candidates
        .iter()
        .filter(|(name, _, _)| XML_RECORD_TAGS.contains(&name.as_str()))
        .collect();
    let selected: Vec<_> = if known.is_empty() {
        candidates.iter().filter(|(_, depth, _)| *depth == 1).collect()
    } else {
        known
    };

    let mut batch = DecodedBatch::empty(WireFormat::Xml);
    for (index, (_, _, attributes)) in selected.iter().enumerate() {
        match xml_fields(attributes) {
            Ok(fields) => match build_punch(serial, WireFormat::Xml, fields) {
                Ok(punch) => batch.records.push(punch),
                Err(message) => batch.diagnostics.push(DecodeDiagnostic {
                    record: Some(index + 1),
                    message,
                }),
            },
            Err(message) => batch.diagnostics.push(DecodeDiagnostic {
                record: Some(index + 1),
                message,
            }),
        }
    }

    batch
}

fn collect_attributes(element: &quick_xml::events::BytesStart<'_>) -> Vec<(String, String)> {
    element
        .attributes()
        .flatten()
        .map(|attr| {
            (
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                String::from_utf8_lossy(&attr.value).into_owned(),
            )
        })
        .collect()
}

fn xml_fields(attributes: &[(String, String)]) -> Result<RawFields, String> {
    let get = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|key| {
            attributes
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))
                .map(|(_, value)| value.clone())
        })
    };

    let user_id = get(USER_KEYS).ok_or_else(|| "no user id attribute".to_string())?;
    let timestamp = get(TIME_KEYS).ok_or_else(|| "no timestamp attribute".to_string())?;

    Ok(RawFields {
        user_id,
        timestamp,
        punch_code: get(CODE_KEYS),
        verify_method: get(VERIFY_KEYS),
    })
}

// =============================================================================
// Record Normalization
// =============================================================================

/// Validates raw fields into a typed punch.
fn build_punch(serial: &str, format: WireFormat, fields: RawFields) -> Result<RawPunch, String> {
    let user_id = validate_device_user_id(&fields.user_id).map_err(|e| e.to_string())?;

    let timestamp = parse_device_timestamp(&fields.timestamp)
        .ok_or_else(|| format!("unparseable timestamp '{}'", fields.timestamp))?;

    let punch_code = fields
        .punch_code
        .as_deref()
        .and_then(|s| s.trim().parse::<u8>().ok())
        .unwrap_or(0);

    let verify_code = fields
        .verify_method
        .as_deref()
        .and_then(|s| s.trim().parse::<u8>().ok())
        .unwrap_or(1);

    Ok(RawPunch {
        device_serial: serial.to_string(),
        device_user_id: user_id.to_string(),
        timestamp,
        punch_code,
        verify_method: VerifyMethod::from_code(verify_code),
        source_format: format,
    })
}

/// Timestamp formats observed across firmware generations, tried in order,
/// then unix seconds in a sane range.
pub fn parse_device_timestamp(value: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];

    let value = value.trim();
    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }

    // Unix seconds, bounded to 2001..2286 so random integers don't pass
    if let Ok(unix) = value.parse::<i64>() {
        if (1_000_000_000..10_000_000_000).contains(&unix) {
            return chrono::DateTime::from_timestamp(unix, 0).map(|dt| dt.naive_utc());
        }
    }

    None
}

// =============================================================================
// Tests
// =============================================================================
