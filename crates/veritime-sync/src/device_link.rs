//! # DeviceLink
//!
//! Session-oriented client for one terminal over the vendor TCP protocol.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DeviceLink Session                                 │
//! │                                                                         │
//! │  connect(addr, timeout) ──► TCP connect ──► CONNECT/ACK handshake      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  VendorSession { session_id, reply counter }                           │
//! │        │                                                                │
//! │        ├── list_users()     READ_USERS   ──► DATA* + ACK_OK            │
//! │        ├── fetch_since(wm)  READ_ATTLOG  ──► DATA* + ACK_OK            │
//! │        ├── create_user(u)   SET_USER     ──► ACK_OK | ACK_ERROR        │
//! │        ├── delete_user(id)  DELETE_USER  ──► ACK_OK | ACK_ERROR        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  disconnect() ──► EXIT ──► socket closed                               │
//! │                                                                         │
//! │  A fetch is ALL-OR-NOTHING: any mid-stream failure discards the        │
//! │  partial batch and surfaces a transport error, so the caller never     │
//! │  advances a watermark over a partially-consumed read.                  │
//! │                                                                         │
//! │  DeviceLink performs NO retries. Timeouts and socket errors are        │
//! │  reported as transient errors for caller-level (poller) retry; this    │
//! │  keeps the session a pure I/O boundary.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    self, AttLogRecord, Frame, CMD_ACK_ERROR, CMD_ACK_OK, CMD_CONNECT, CMD_DATA, CMD_DELETE_USER,
    CMD_EXIT, CMD_READ_ATTLOG, CMD_READ_USERS, CMD_SET_USER, HEADER_SIZE,
};
use veritime_core::{Device, DeviceUser, RawPunch, VerifyMethod, WireFormat};

// =============================================================================
// DeviceLink Trait
// =============================================================================

/// Abstraction over a device conversation, the seam the polling agent is
/// tested through.
///
/// Implementations must not retry internally: transient failures surface
/// as `ConnectionFailed`/`Timeout`/`Disconnected` for the caller's backoff
/// policy.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Fetches punches recorded strictly after `since` (everything when
    /// `None`). All-or-nothing.
    async fn fetch_since(
        &self,
        device: &Device,
        since: Option<NaiveDateTime>,
    ) -> SyncResult<Vec<RawPunch>>;

    /// Enumerates users enrolled on the terminal.
    async fn list_users(&self, device: &Device) -> SyncResult<Vec<DeviceUser>>;

    /// Enrolls or updates a user on the terminal.
    async fn create_user(&self, device: &Device, user: &DeviceUser) -> SyncResult<()>;

    /// Removes a user from the terminal.
    async fn delete_user(&self, device: &Device, user_id: &str) -> SyncResult<()>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Timeouts for the vendor protocol client.
#[derive(Debug, Clone)]
pub struct VendorLinkConfig {
    /// TCP connect + handshake budget.
    pub connect_timeout: Duration,

    /// Budget for each single read/write on an open session.
    pub io_timeout: Duration,
}

impl Default for VendorLinkConfig {
    fn default() -> Self {
        VendorLinkConfig {
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Vendor Session
// =============================================================================

/// An open session with one terminal.
pub struct VendorSession {
    stream: TcpStream,
    session_id: u16,
    reply_id: u16,
    io_timeout: Duration,
}

impl VendorSession {
    /// Connects and performs the CONNECT handshake.
    pub async fn connect(address: &str, config: &VendorLinkConfig) -> SyncResult<VendorSession> {
        let stream = match timeout(config.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(SyncError::ConnectionFailed(e.to_string())),
            Err(_) => return Err(SyncError::Timeout(config.connect_timeout.as_secs())),
        };

        let mut session = VendorSession {
            stream,
            session_id: 0,
            reply_id: 0,
            io_timeout: config.io_timeout,
        };

        let reply = session.exchange(CMD_CONNECT, Vec::new()).await?;
        if !reply.is_ack_ok() {
            return Err(SyncError::CommandRejected { command: CMD_CONNECT });
        }

        // The device allocates the session id in its CONNECT ack
        session.session_id = reply.session_id;
        debug!(address, session_id = session.session_id, "Device session established");

        Ok(session)
    }

    /// Fetches punches recorded strictly after `since`.
    ///
    /// The device streams zero or more DATA frames and terminates with
    /// ACK_OK. Any failure mid-stream discards the partial batch.
    pub async fn fetch_since(
        &mut self,
        since: Option<NaiveDateTime>,
    ) -> SyncResult<Vec<AttLogRecord>> {
        let cursor = since.map(protocol::encode_timestamp).unwrap_or(0);
        self.send(CMD_READ_ATTLOG, cursor.to_le_bytes().to_vec()).await?;

        let mut records = Vec::new();
        loop {
            let frame = self.read_frame().await?;
            match frame.command {
                CMD_DATA => records.extend(protocol::decode_att_payload(&frame.payload)?),
                CMD_ACK_OK => break,
                CMD_ACK_ERROR => {
                    return Err(SyncError::CommandRejected { command: CMD_READ_ATTLOG })
                }
                other => {
                    return Err(SyncError::Frame(format!(
                        "unexpected frame {:#06x} during attendance read",
                        other
                    )))
                }
            }
        }

        debug!(count = records.len(), "Fetched attendance records");
        Ok(records)
    }

    /// Enumerates users enrolled on the terminal.
    pub async fn list_users(&mut self) -> SyncResult<Vec<DeviceUser>> {
        self.send(CMD_READ_USERS, Vec::new()).await?;

        let mut users = Vec::new();
        loop {
            let frame = self.read_frame().await?;
            match frame.command {
                CMD_DATA => users.extend(protocol::decode_user_payload(&frame.payload)?),
                CMD_ACK_OK => break,
                CMD_ACK_ERROR => {
                    return Err(SyncError::CommandRejected { command: CMD_READ_USERS })
                }
                other => {
                    return Err(SyncError::Frame(format!(
                        "unexpected frame {:#06x} during user read",
                        other
                    )))
                }
            }
        }

        Ok(users)
    }

    /// Enrolls or updates a user on the terminal.
    pub async fn create_user(&mut self, user: &DeviceUser) -> SyncResult<()> {
        let reply = self
            .exchange(CMD_SET_USER, protocol::encode_user(user).to_vec())
            .await?;
        if !reply.is_ack_ok() {
            return Err(SyncError::CommandRejected { command: CMD_SET_USER });
        }
        Ok(())
    }

    /// Removes a user from the terminal.
    pub async fn delete_user(&mut self, user_id: &str) -> SyncResult<()> {
        let reply = self
            .exchange(CMD_DELETE_USER, protocol::encode_user_id(user_id).to_vec())
            .await?;
        if !reply.is_ack_ok() {
            return Err(SyncError::CommandRejected { command: CMD_DELETE_USER });
        }
        Ok(())
    }

    /// Ends the session. Best-effort: a device that drops the socket
    /// before acking EXIT is already disconnected.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.exchange(CMD_EXIT, Vec::new()).await {
            debug!(?e, "EXIT not acknowledged");
        }
    }

    /// Sends one command frame.
    async fn send(&mut self, command: u16, payload: Vec<u8>) -> SyncResult<()> {
        self.reply_id = self.reply_id.wrapping_add(1);
        let frame = Frame {
            command,
            session_id: self.session_id,
            reply_id: self.reply_id,
            payload,
        };

        let bytes = frame.encode();
        match timeout(self.io_timeout, self.stream.write_all(&bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.io_timeout.as_secs())),
        }
    }

    /// Reads one complete frame (header first, then payload).
    async fn read_frame(&mut self) -> SyncResult<Frame> {
        let mut buf = vec![0u8; HEADER_SIZE];
        self.read_exact_timed(&mut buf).await?;

        let payload_len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
        if payload_len > 0 {
            let mut payload = vec![0u8; payload_len];
            self.read_exact_timed(&mut payload).await?;
            buf.extend_from_slice(&payload);
        }

        Frame::decode(&buf)
    }

    async fn read_exact_timed(&mut self, buf: &mut [u8]) -> SyncResult<()> {
        match timeout(self.io_timeout, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.io_timeout.as_secs())),
        }
    }

    /// Sends a command and reads its single reply frame.
    async fn exchange(&mut self, command: u16, payload: Vec<u8>) -> SyncResult<Frame> {
        self.send(command, payload).await?;
        self.read_frame().await
    }
}

// =============================================================================
// VendorLink (production DeviceLink)
// =============================================================================

/// Production `DeviceLink` over the vendor TCP protocol.
///
/// Each operation opens a session, runs the conversation and disconnects;
/// terminals in the field handle one short-lived session at a time far
/// more reliably than long-held connections.
#[derive(Debug, Clone, Default)]
pub struct VendorLink {
    config: VendorLinkConfig,
}

impl VendorLink {
    /// Creates a new VendorLink with the given timeouts.
    pub fn new(config: VendorLinkConfig) -> Self {
        VendorLink { config }
    }

    fn address_of(device: &Device) -> SyncResult<String> {
        device.address().ok_or_else(|| {
            SyncError::InvalidConfig(format!(
                "device {} has no host configured for polling",
                device.serial_number
            ))
        })
    }
}

#[async_trait]
impl DeviceLink for VendorLink {
    async fn fetch_since(
        &self,
        device: &Device,
        since: Option<NaiveDateTime>,
    ) -> SyncResult<Vec<RawPunch>> {
        let address = Self::address_of(device)?;
        let mut session = VendorSession::connect(&address, &self.config).await?;

        let result = session.fetch_since(since).await;
        session.disconnect().await;
        let records = result?;

        Ok(records
            .into_iter()
            .map(|record| RawPunch {
                device_serial: device.serial_number.clone(),
                device_user_id: record.user_id,
                timestamp: record.timestamp,
                punch_code: record.punch_code,
                verify_method: VerifyMethod::from_code(record.verify_method),
                source_format: WireFormat::Vendor,
            })
            .collect())
    }

    async fn list_users(&self, device: &Device) -> SyncResult<Vec<DeviceUser>> {
        let address = Self::address_of(device)?;
        let mut session = VendorSession::connect(&address, &self.config).await?;
        let result = session.list_users().await;
        session.disconnect().await;
        result
    }

    async fn create_user(&self, device: &Device, user: &DeviceUser) -> SyncResult<()> {
        let address = Self::address_of(device)?;
        let mut session = VendorSession::connect(&address, &self.config).await?;
        let result = session.create_user(user).await;
        session.disconnect().await;
        result
    }

    async fn delete_user(&self, device: &Device, user_id: &str) -> SyncResult<()> {
        let address = Self::address_of(device)?;
        let mut session = VendorSession::connect(&address, &self.config).await?;
        let result = session.delete_user(user_id).await;
        session.disconnect().await;
        if result.is_err() {
            warn!(device = %device.serial_number, user_id, "Delete user rejected");
        }
        result
    }
}

// =============================================================================
// Tests (against an in-process fake terminal)
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::net::TcpListener;

    /// Minimal fake terminal: one session, scripted attendance records.
    async fn spawn_fake_terminal(records: Vec<AttLogRecord>, poison_stream: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut session_id = 0u16;

            loop {
                let mut header = [0u8; HEADER_SIZE];
                if socket.read_exact(&mut header).await.is_err() {
                    return;
                }
                let payload_len = u16::from_le_bytes([header[2], header[3]]) as usize;
                let mut buf = header.to_vec();
                buf.resize(HEADER_SIZE + payload_len, 0);
                socket.read_exact(&mut buf[HEADER_SIZE..]).await.unwrap();

                let frame = Frame::decode(&buf).unwrap();
                match frame.command {
                    CMD_CONNECT => {
                        session_id = 0x0BEE;
                        let ack = Frame::command(CMD_ACK_OK, session_id, frame.reply_id);
                        socket.write_all(&ack.encode()).await.unwrap();
                    }
                    CMD_READ_ATTLOG => {
                        if !records.is_empty() {
                            let data = Frame {
                                command: CMD_DATA,
                                session_id,
                                reply_id: frame.reply_id,
                                payload: protocol::encode_att_payload(&records),
                            };
                            socket.write_all(&data.encode()).await.unwrap();
                        }
                        if poison_stream {
                            // Drop the socket before the terminating ACK
                            return;
                        }
                        let ack = Frame::command(CMD_ACK_OK, session_id, frame.reply_id);
                        socket.write_all(&ack.encode()).await.unwrap();
                    }
                    CMD_EXIT => {
                        let ack = Frame::command(CMD_ACK_OK, session_id, frame.reply_id);
                        let _ = socket.write_all(&ack.encode()).await;
                        return;
                    }
                    other => panic!("fake terminal got unexpected command {:#06x}", other),
                }
            }
        });

        address
    }

    fn sample_records() -> Vec<AttLogRecord> {
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        vec![
            AttLogRecord {
                user_id: "101".into(),
                timestamp: date.and_hms_opt(10, 5, 0).unwrap(),
                punch_code: 0,
                verify_method: 1,
            },
            AttLogRecord {
                user_id: "101".into(),
                timestamp: date.and_hms_opt(18, 10, 0).unwrap(),
                punch_code: 0,
                verify_method: 1,
            },
        ]
    }

    #[tokio::test]
    async fn session_fetches_full_batch() {
        let address = spawn_fake_terminal(sample_records(), false).await;
        let config = VendorLinkConfig::default();

        let mut session = VendorSession::connect(&address, &config).await.unwrap();
        assert_eq!(session.session_id, 0x0BEE);

        let records = session.fetch_since(None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id, "101");

        session.disconnect().await;
    }

    #[tokio::test]
    async fn interrupted_fetch_is_all_or_nothing() {
        let address = spawn_fake_terminal(sample_records(), true).await;
        let config = VendorLinkConfig::default();

        let mut session = VendorSession::connect(&address, &config).await.unwrap();
        let result = session.fetch_since(None).await;

        // Data frames arrived but the stream died before ACK: no partial batch
        assert!(result.is_err());
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn connect_to_dead_port_is_transient() {
        // Bind-then-drop guarantees a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = VendorLinkConfig {
            connect_timeout: Duration::from_millis(500),
            io_timeout: Duration::from_millis(500),
        };
        let err = VendorSession::connect(&address, &config).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
