//! # Vendor Protocol Codec
//!
//! Pure encode/decode for the terminal wire protocol. The protocol is an
//! opaque vendor transport: session-oriented TCP with length-prefixed,
//! checksummed command frames and fixed-layout little-endian records.
//!
//! ## Frame Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Frame (little-endian)                            │
//! │                                                                         │
//! │  offset  size  field                                                    │
//! │  ──────  ────  ─────────────────────────────────────────────            │
//! │  0       2     magic     (0xA55A)                                       │
//! │  2       2     length    (payload bytes after the header)               │
//! │  4       2     command                                                  │
//! │  6       2     checksum  (ones' complement sum, see below)              │
//! │  8       2     session id (0 until CONNECT is acknowledged)             │
//! │  10      2     reply counter                                            │
//! │  12      n     payload                                                  │
//! │                                                                         │
//! │  CONVERSATION                                                           │
//! │  ────────────                                                           │
//! │  client ──► CONNECT                 server ◄── ACK_OK (session id)      │
//! │  client ──► READ_ATTLOG(since)      server ◄── DATA* then ACK_OK        │
//! │  client ──► READ_USERS              server ◄── DATA* then ACK_OK        │
//! │  client ──► SET_USER / DELETE_USER  server ◄── ACK_OK | ACK_ERROR       │
//! │  client ──► EXIT                    server ◄── ACK_OK                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timestamps on the wire are u32 seconds since 2000-01-01 00:00:00 in the
//! device's local clock. No timezone is carried; decoding keeps them naive.

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{SyncError, SyncResult};
use veritime_core::DeviceUser;

// =============================================================================
// Constants
// =============================================================================

/// Frame magic word.
pub const MAGIC: u16 = 0xA55A;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 12;

/// Attendance log record size on the wire.
pub const ATT_RECORD_SIZE: usize = 16;

/// Enrolled user record size on the wire.
pub const USER_RECORD_SIZE: usize = 40;

/// User id field width (zero-padded ASCII).
const USER_ID_WIDTH: usize = 9;

/// User name field width (zero-padded ASCII).
const USER_NAME_WIDTH: usize = 24;

// Command words
pub const CMD_CONNECT: u16 = 0x03E8;
pub const CMD_EXIT: u16 = 0x03E9;
pub const CMD_READ_USERS: u16 = 0x05DC;
pub const CMD_READ_ATTLOG: u16 = 0x05DD;
pub const CMD_SET_USER: u16 = 0x05DE;
pub const CMD_DELETE_USER: u16 = 0x05DF;
pub const CMD_ACK_OK: u16 = 0x07D0;
pub const CMD_ACK_ERROR: u16 = 0x07D1;
pub const CMD_DATA: u16 = 0x07D2;

/// Wire epoch: the vendor counts seconds from the start of 2000.
fn wire_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time")
}

// =============================================================================
// Frame
// =============================================================================

/// One protocol frame, header fields plus raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u16,
    pub session_id: u16,
    pub reply_id: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame with an empty payload.
    pub fn command(command: u16, session_id: u16, reply_id: u16) -> Self {
        Frame {
            command,
            session_id,
            reply_id,
            payload: Vec::new(),
        }
    }

    /// Encodes the frame to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.command.to_le_bytes());
        buf.extend_from_slice(&self.checksum().to_le_bytes());
        buf.extend_from_slice(&self.session_id.to_le_bytes());
        buf.extend_from_slice(&self.reply_id.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decodes a complete frame from wire bytes.
    ///
    /// The buffer must hold exactly one frame; the transport layer reads
    /// the header first to learn the payload length.
    pub fn decode(buf: &[u8]) -> SyncResult<Frame> {
        if buf.len() < HEADER_SIZE {
            return Err(SyncError::Frame(format!(
                "short frame: {} bytes, need at least {}",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let magic = u16::from_le_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(SyncError::Frame(format!("bad magic: {:#06x}", magic)));
        }

        let length = u16::from_le_bytes([buf[2], buf[3]]) as usize;
        if buf.len() != HEADER_SIZE + length {
            return Err(SyncError::Frame(format!(
                "length mismatch: header says {}, buffer has {}",
                length,
                buf.len() - HEADER_SIZE
            )));
        }

        let frame = Frame {
            command: u16::from_le_bytes([buf[4], buf[5]]),
            session_id: u16::from_le_bytes([buf[8], buf[9]]),
            reply_id: u16::from_le_bytes([buf[10], buf[11]]),
            payload: buf[HEADER_SIZE..].to_vec(),
        };

        let expected = u16::from_le_bytes([buf[6], buf[7]]);
        if frame.checksum() != expected {
            return Err(SyncError::ChecksumMismatch);
        }

        Ok(frame)
    }

    /// Ones' complement sum over command, session, reply and payload.
    pub fn checksum(&self) -> u16 {
        let mut sum: u32 = 0;
        sum += self.command as u32;
        sum += self.session_id as u32;
        sum += self.reply_id as u32;

        let mut chunks = self.payload.chunks_exact(2);
        for chunk in &mut chunks {
            sum += u16::from_le_bytes([chunk[0], chunk[1]]) as u32;
        }
        if let [last] = chunks.remainder() {
            sum += *last as u32;
        }

        while sum > 0xFFFF {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        !(sum as u16)
    }

    /// Returns true for the success acknowledgment.
    pub fn is_ack_ok(&self) -> bool {
        self.command == CMD_ACK_OK
    }
}

// =============================================================================
// Timestamps
// =============================================================================

/// Encodes a device-local timestamp as wire seconds.
///
/// Timestamps before the wire epoch clamp to zero; terminals cannot
/// represent them either.
pub fn encode_timestamp(ts: NaiveDateTime) -> u32 {
    let secs = (ts - wire_epoch()).num_seconds();
    secs.clamp(0, u32::MAX as i64) as u32
}

/// Decodes wire seconds back to a naive timestamp.
pub fn decode_timestamp(raw: u32) -> NaiveDateTime {
    wire_epoch() + chrono::Duration::seconds(raw as i64)
}

// =============================================================================
// Attendance Log Records
// =============================================================================

/// One attendance record as laid out on the wire.
///
/// ```text
/// offset  size  field
/// 0       9     user id   (zero-padded ASCII)
/// 9       4     timestamp (u32 LE, wire epoch seconds)
/// 13      1     punch code
/// 14      1     verify method
/// 15      1     reserved
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttLogRecord {
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub punch_code: u8,
    pub verify_method: u8,
}

impl AttLogRecord {
    /// Encodes the record to its fixed wire layout.
    pub fn encode(&self) -> [u8; ATT_RECORD_SIZE] {
        let mut buf = [0u8; ATT_RECORD_SIZE];
        write_padded_ascii(&mut buf[..USER_ID_WIDTH], &self.user_id);
        buf[9..13].copy_from_slice(&encode_timestamp(self.timestamp).to_le_bytes());
        buf[13] = self.punch_code;
        buf[14] = self.verify_method;
        buf
    }

    /// Decodes one record from its fixed wire layout.
    pub fn decode(buf: &[u8]) -> SyncResult<AttLogRecord> {
        if buf.len() != ATT_RECORD_SIZE {
            return Err(SyncError::Frame(format!(
                "attendance record must be {} bytes, got {}",
                ATT_RECORD_SIZE,
                buf.len()
            )));
        }

        let raw_ts = u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]);

        Ok(AttLogRecord {
            user_id: read_padded_ascii(&buf[..USER_ID_WIDTH])?,
            timestamp: decode_timestamp(raw_ts),
            punch_code: buf[13],
            verify_method: buf[14],
        })
    }
}

/// Decodes a DATA payload containing whole attendance records.
pub fn decode_att_payload(payload: &[u8]) -> SyncResult<Vec<AttLogRecord>> {
    if payload.len() % ATT_RECORD_SIZE != 0 {
        return Err(SyncError::Frame(format!(
            "attendance payload of {} bytes is not a multiple of {}",
            payload.len(),
            ATT_RECORD_SIZE
        )));
    }

    payload
        .chunks_exact(ATT_RECORD_SIZE)
        .map(AttLogRecord::decode)
        .collect()
}

/// Encodes attendance records into a DATA payload.
pub fn encode_att_payload(records: &[AttLogRecord]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(records.len() * ATT_RECORD_SIZE);
    for record in records {
        payload.extend_from_slice(&record.encode());
    }
    payload
}

// =============================================================================
// Enrolled User Records
// =============================================================================

/// Encodes an enrolled user to the wire layout.
///
/// ```text
/// offset  size  field
/// 0       9     user id   (zero-padded ASCII)
/// 9       24    name      (zero-padded ASCII)
/// 33      1     privilege
/// 34      4     card number (u32 LE)
/// 38      2     reserved
/// ```
pub fn encode_user(user: &DeviceUser) -> [u8; USER_RECORD_SIZE] {
    let mut buf = [0u8; USER_RECORD_SIZE];
    write_padded_ascii(&mut buf[..USER_ID_WIDTH], &user.user_id);
    write_padded_ascii(&mut buf[9..9 + USER_NAME_WIDTH], &user.name);
    buf[33] = user.privilege;
    buf[34..38].copy_from_slice(&user.card_number.to_le_bytes());
    buf
}

/// Decodes one enrolled user from the wire layout.
pub fn decode_user(buf: &[u8]) -> SyncResult<DeviceUser> {
    if buf.len() != USER_RECORD_SIZE {
        return Err(SyncError::Frame(format!(
            "user record must be {} bytes, got {}",
            USER_RECORD_SIZE,
            buf.len()
        )));
    }

    Ok(DeviceUser {
        user_id: read_padded_ascii(&buf[..USER_ID_WIDTH])?,
        name: read_padded_ascii(&buf[9..9 + USER_NAME_WIDTH])?,
        privilege: buf[33],
        card_number: u32::from_le_bytes([buf[34], buf[35], buf[36], buf[37]]),
    })
}

/// Decodes a DATA payload containing whole user records.
pub fn decode_user_payload(payload: &[u8]) -> SyncResult<Vec<DeviceUser>> {
    if payload.len() % USER_RECORD_SIZE != 0 {
        return Err(SyncError::Frame(format!(
            "user payload of {} bytes is not a multiple of {}",
            payload.len(),
            USER_RECORD_SIZE
        )));
    }

    payload.chunks_exact(USER_RECORD_SIZE).map(decode_user).collect()
}

/// Encodes a bare user id payload (DELETE_USER).
pub fn encode_user_id(user_id: &str) -> [u8; USER_ID_WIDTH] {
    let mut buf = [0u8; USER_ID_WIDTH];
    write_padded_ascii(&mut buf, user_id);
    buf
}

// =============================================================================
// Field Helpers
// =============================================================================

fn write_padded_ascii(buf: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
}

fn read_padded_ascii(buf: &[u8]) -> SyncResult<String> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end])
        .map(|s| s.to_string())
        .map_err(|_| SyncError::Frame("non-ASCII bytes in string field".to_string()))
}

// =============================================================================
// Tests
// =============================================================================
