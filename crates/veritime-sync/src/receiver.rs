//! # Push Receiver
//!
//! HTTP endpoint accepting unsolicited terminal pushes (the vendor's
//! "phone home" mechanism) and routing them through the same decoder and
//! normalizer as the polling path.
//!
//! ## Two-Phase Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Push Receiver Contract                             │
//! │                                                                         │
//! │  GET /iclock/cdata?SN=...&model=...&firmware=...                        │
//! │      handshake: device announces itself, may update its metadata       │
//! │      → ALWAYS "OK" (unknown devices are quarantined, still acked)      │
//! │                                                                         │
//! │  POST /iclock/cdata?SN=...                                              │
//! │      data push: body decoded (3 formats) and normalized                │
//! │      → "OK" on EVERY outcome except a missing SN, which is the         │
//! │        single 400 ("ERROR: SN required") - with no serial there is     │
//! │        no identity to quarantine against                               │
//! │                                                                         │
//! │  GET /iclock/getrequest?SN=...                                          │
//! │      command poll: no command queue in scope → "OK"                    │
//! │                                                                         │
//! │  WHY ACK-ALWAYS: device firmware retries indefinitely on any           │
//! │  non-success response and floods the endpoint. Internal failures       │
//! │  (decode errors, unknown staff, unknown device) are recorded in        │
//! │  quarantine/diagnostic logs, never surfaced to the device.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use veritime_db::Database;

use crate::decoder::{self, DecodeHints};
use crate::error::{SyncError, SyncResult};
use crate::normalizer::NormalizerHandle;
use veritime_core::validation::payload_sample;
use veritime_core::WireFormat;

// =============================================================================
// Constants
// =============================================================================

/// Fixed success sentinel the terminals expect.
const ACK: &str = "OK";

/// Error body for the single non-acknowledged case.
const ERR_SN_REQUIRED: &str = "ERROR: SN required";

/// Endpoint path, fixed by device firmware.
const CDATA_PATH: &str = "/iclock/cdata";

// =============================================================================
// Configuration / State
// =============================================================================

/// Push receiver bind configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Bind address (default: 0.0.0.0).
    pub bind_addr: String,
    /// Listen port. Terminals in the field are provisioned with this port.
    pub port: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            bind_addr: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

impl ReceiverConfig {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Shared state for the receiver handlers.
pub struct ReceiverState {
    pub db: Database,
    pub normalizer: NormalizerHandle,
    pub institution_id: i64,
}

// =============================================================================
// Receiver
// =============================================================================

/// The push receiver server.
pub struct PushReceiver {
    config: ReceiverConfig,
    state: Arc<ReceiverState>,
}

/// Handle for stopping a running receiver.
pub struct ReceiverHandle {
    shutdown_tx: mpsc::Sender<()>,
    local_addr: std::net::SocketAddr,
}

impl ReceiverHandle {
    /// Address the receiver actually bound (useful with port 0 in tests).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Signals graceful shutdown; in-flight requests complete.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Channel("Receiver shutdown channel closed".into()))
    }
}

impl PushReceiver {
    /// Creates a new push receiver.
    pub fn new(config: ReceiverConfig, state: Arc<ReceiverState>) -> Self {
        PushReceiver { config, state }
    }

    /// Builds the router. Exposed separately so tests can drive handlers
    /// without opening a socket.
    pub fn router(state: Arc<ReceiverState>) -> Router {
        Router::new()
            .route(CDATA_PATH, get(handshake_handler).post(cdata_handler))
            .route("/iclock/getrequest", get(getrequest_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Binds the listener and starts serving in a background task.
    pub async fn start(self) -> SyncResult<ReceiverHandle> {
        let app = Self::router(self.state.clone());

        let bind = self.config.bind_address();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| SyncError::ConnectionFailed(format!("bind {}: {}", bind, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ConnectionFailed(e.to_string()))?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        info!(%local_addr, "Push receiver listening");

        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
                info!("Push receiver shutting down");
            };

            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(?e, "Push receiver server error");
            }

            info!("Push receiver stopped");
        });

        Ok(ReceiverHandle {
            shutdown_tx,
            local_addr,
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /iclock/cdata - handshake phase.
///
/// Always acknowledged: a handshake carries no punch data, so there is
/// nothing to lose by being polite to unknown hardware.
async fn handshake_handler(
    State(state): State<Arc<ReceiverState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> &'static str {
    let Some(serial) = params.get("SN").map(|s| s.trim()).filter(|s| !s.is_empty()) else {
        debug!("Handshake without SN; acknowledged and ignored");
        return ACK;
    };

    let model = params.get("model").map(String::as_str);
    let firmware = params.get("firmware").map(String::as_str);
    let platform = params.get("platform").map(String::as_str);

    match state.db.devices().find_by_serial(serial).await {
        Ok(Some(_)) => {
            info!(device = %serial, "Device handshake");
            if let Err(e) = state
                .db
                .devices()
                .record_handshake(serial, model, firmware, platform)
                .await
            {
                error!(device = %serial, ?e, "Failed to record handshake");
            }
        }
        Ok(None) => {
            warn!(device = %serial, "Handshake from unregistered device");
            if let Err(e) = state
                .db
                .quarantine()
                .upsert_unknown_device(
                    serial,
                    client_ip(&headers).as_deref(),
                    model,
                    firmware,
                    platform,
                    "handshake",
                    None,
                )
                .await
            {
                error!(device = %serial, ?e, "Failed to quarantine unknown device");
            }
        }
        Err(e) => error!(device = %serial, ?e, "Device lookup failed during handshake"),
    }

    ACK
}

/// POST /iclock/cdata - data phase.
///
/// The missing-SN case is the only non-acknowledged response: with no
/// serial there is no device identity to quarantine against.
async fn cdata_handler(
    State(state): State<Arc<ReceiverState>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let Some(serial) = params.get("SN").map(|s| s.trim()).filter(|s| !s.is_empty()) else {
        warn!("Data push without SN rejected");
        if let Err(e) = state
            .db
            .diagnostics()
            .record(
                None,
                "POST",
                CDATA_PATH,
                content_type,
                "N/A",
                false,
                Some("SN required"),
                Some(&payload_sample(&body)),
            )
            .await
        {
            error!(?e, "Failed to record SN-less push diagnostic");
        }
        return (StatusCode::BAD_REQUEST, ERR_SN_REQUIRED).into_response();
    };

    let hints = DecodeHints {
        content_type,
        device_model: params.get("model").map(String::as_str),
        firmware_version: params.get("firmware").map(String::as_str),
    };

    let device = match state.db.devices().find_by_serial(serial).await {
        Ok(device) => device,
        Err(e) => {
            // Ack-always: a registry read failure is our problem, not the
            // device's
            error!(device = %serial, ?e, "Device lookup failed during push");
            return ACK.into_response();
        }
    };

    let batch = decoder::decode(serial, &body, &hints);

    let parsed_ok = batch.diagnostics.is_empty();
    let registered = device.is_some();
    let log_error = if registered {
        batch.first_error().map(|s| s.to_string())
    } else {
        Some(format!("unknown device {}", serial))
    };

    if let Err(e) = state
        .db
        .diagnostics()
        .record(
            Some(serial),
            "POST",
            CDATA_PATH,
            content_type,
            batch.format.tag(),
            parsed_ok && registered,
            log_error.as_deref(),
            Some(&payload_sample(&body)),
        )
        .await
    {
        error!(device = %serial, ?e, "Failed to record protocol-detection log");
    }

    let Some(_device) = device else {
        warn!(device = %serial, "Data push from unregistered device quarantined");
        if let Err(e) = state
            .db
            .quarantine()
            .upsert_unknown_device(
                serial,
                client_ip(&headers).as_deref(),
                hints.device_model,
                hints.firmware_version,
                None,
                "data_push",
                Some(&payload_sample(&body)),
            )
            .await
        {
            error!(device = %serial, ?e, "Failed to quarantine unknown device push");
        }
        return ACK.into_response();
    };

    // Handshake-only contact carried no records at all
    if batch.format == WireFormat::Empty {
        return ACK.into_response();
    }

    if matches!(batch.format, WireFormat::Text | WireFormat::Json | WireFormat::Xml) {
        if let Err(e) = state
            .db
            .devices()
            .set_detected_format(serial, batch.format.tag())
            .await
        {
            error!(device = %serial, ?e, "Failed to store detected format");
        }
    }

    if !batch.records.is_empty() {
        match state.normalizer.apply_batch("push", batch.records).await {
            Ok(report) => {
                let status = if report.all_resolved() { "success" } else { "partial" };
                if let Err(e) = state
                    .db
                    .devices()
                    .update_sync_status(serial, status, Some(Utc::now().naive_utc()))
                    .await
                {
                    error!(device = %serial, ?e, "Failed to update sync status");
                }
            }
            Err(e) => error!(device = %serial, ?e, "Normalizer rejected push batch"),
        }
    }

    ACK.into_response()
}

/// GET /iclock/getrequest - devices poll for pending commands.
///
/// No command queue in scope; acknowledging keeps the firmware quiet.
async fn getrequest_handler(Query(params): Query<HashMap<String, String>>) -> &'static str {
    debug!(serial = ?params.get("SN"), "Command poll");
    ACK
}

/// GET /health
async fn health_handler(State(state): State<Arc<ReceiverState>>) -> Response {
    if state.db.health_check().await {
        (StatusCode::OK, "healthy").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
    }
}

/// Client IP from proxy headers; terminals on the LAN hit us directly and
/// have none, which is fine - the column is nullable.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::normalizer::Normalizer;
    use veritime_core::{ConnectionMode, DEFAULT_INSTITUTION_ID};
    use veritime_db::DbConfig;

    async fn test_app() -> (Database, Router) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.staff()
            .add_staff(DEFAULT_INSTITUTION_ID, "101", "A. Kumar", "general")
            .await
            .unwrap();
        db.devices()
            .register(
                DEFAULT_INSTITUTION_ID,
                "ZK-01",
                "Main Gate",
                None,
                4370,
                ConnectionMode::Push,
            )
            .await
            .unwrap();

        let (normalizer, handle) = Normalizer::new(db.clone(), DEFAULT_INSTITUTION_ID);
        tokio::spawn(normalizer.run());

        let state = Arc::new(ReceiverState {
            db: db.clone(),
            normalizer: handle,
            institution_id: DEFAULT_INSTITUTION_ID,
        });

        (db, PushReceiver::router(state))
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn handshake_from_known_device_updates_metadata() {
        let (db, app) = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/iclock/cdata?SN=ZK-01&options=all&model=uFace802&firmware=Ver8.0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        let device = db.devices().find_by_serial("ZK-01").await.unwrap().unwrap();
        assert_eq!(device.device_model.as_deref(), Some("uFace802"));
        assert!(device.last_handshake.is_some());
    }

    #[tokio::test]
    async fn unknown_device_handshake_is_acked_and_quarantined_once() {
        let (db, app) = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/iclock/cdata?SN=GHOST-9&model=K40")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        let record = db
            .quarantine()
            .find_unknown_device("GHOST-9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.attempt_count, 1);
        assert_eq!(record.device_model.as_deref(), Some("K40"));
    }

    #[tokio::test]
    async fn missing_sn_is_the_single_400() {
        let (db, app) = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/iclock/cdata?table=ATTLOG")
                    .header("content-type", "text/plain")
                    .body(Body::from("ATTLOG\t101\t2026-03-02 09:00:00\t0\t1"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "ERROR: SN required");

        // Diagnostic row tagged format=N/A
        let diagnostics = db.diagnostics().recent(1).await.unwrap();
        assert_eq!(diagnostics[0].detected_format, "N/A");
        assert!(!diagnostics[0].parsed_ok);
    }

    #[tokio::test]
    async fn json_push_lands_in_canonical_table() {
        let (db, app) = test_app().await;

        let payload = r#"{"records": [
            {"user": "101", "time": "2026-03-02 10:05:00", "status": 0, "verify": 1},
            {"user": "101", "time": "2026-03-02 18:10:00", "status": 0, "verify": 1}
        ]}"#;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/iclock/cdata?SN=ZK-01")
                    .header("content-type", "application/json")
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        let staff = db.staff().resolve(1, "101").await.unwrap().unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let row = db.attendance().get(staff.id, date).await.unwrap().unwrap();
        assert_eq!(row.time_in, chrono::NaiveTime::from_hms_opt(10, 5, 0));
        assert_eq!(row.time_out, chrono::NaiveTime::from_hms_opt(18, 10, 0));

        let device = db.devices().find_by_serial("ZK-01").await.unwrap().unwrap();
        assert_eq!(device.detected_format.as_deref(), Some("json"));
        assert_eq!(device.sync_status, "success");
    }

    #[tokio::test]
    async fn verbatim_redelivery_changes_nothing() {
        let (db, app) = test_app().await;

        let payload = r#"{"records": [
            {"user": "101", "time": "2026-03-02 10:05:00", "status": 0, "verify": 1},
            {"user": "101", "time": "2026-03-02 18:10:00", "status": 0, "verify": 1}
        ]}"#;

        let request = || {
            Request::builder()
                .method("POST")
                .uri("/iclock/cdata?SN=ZK-01")
                .header("content-type", "application/json")
                .body(Body::from(payload))
                .unwrap()
        };

        // First delivery, then the device retries the identical batch
        // (crash-before-watermark-advance behavior)
        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(body_string(first).await, "OK");
        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(body_string(second).await, "OK");

        let staff = db.staff().resolve(1, "101").await.unwrap().unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        // One canonical row, unchanged by the replay
        let rows = db.attendance().list_range(1, date, date).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].staff_id, staff.id);
        assert_eq!(rows[0].time_in, chrono::NaiveTime::from_hms_opt(10, 5, 0));
        assert_eq!(rows[0].time_out, chrono::NaiveTime::from_hms_opt(18, 10, 0));

        // Ledger holds exactly the two distinct tuples
        assert_eq!(db.attendance().ledger_count("ZK-01").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_device_push_is_acked_and_never_normalized() {
        let (db, app) = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/iclock/cdata?SN=GHOST-9")
                    .header("content-type", "text/plain")
                    .body(Body::from("ATTLOG\t101\t2026-03-02 09:00:00\t0\t1"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");

        // Quarantined with a payload sample, exactly one upsert
        let record = db
            .quarantine()
            .find_unknown_device("GHOST-9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.attempt_count, 1);
        assert!(record.payload_sample.as_deref().unwrap().contains("ATTLOG"));

        // Nothing reached the canonical table
        let staff = db.staff().resolve(1, "101").await.unwrap().unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(db.attendance().get(staff.id, date).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_records_are_skipped_but_device_is_acked() {
        let (db, app) = test_app().await;

        let payload = "ATTLOG\t101\t2026-03-02 09:00:00\t0\t1\n\
                       ATTLOG\t101\tgarbage\t0\t1";

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/iclock/cdata?SN=ZK-01")
                    .header("content-type", "text/plain")
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(body_string(response).await, "OK");

        // The good record landed despite the bad one
        let staff = db.staff().resolve(1, "101").await.unwrap().unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let row = db.attendance().get(staff.id, date).await.unwrap().unwrap();
        assert_eq!(row.time_in, chrono::NaiveTime::from_hms_opt(9, 0, 0));

        // And the skip is visible in the protocol log
        let diagnostics = db.diagnostics().recent(1).await.unwrap();
        assert!(!diagnostics[0].parsed_ok);
    }

    #[tokio::test]
    async fn getrequest_is_acked() {
        let (_db, app) = test_app().await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/iclock/getrequest?SN=ZK-01")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(body_string(response).await, "OK");
    }
}
