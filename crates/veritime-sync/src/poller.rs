//! # Polling Agent
//!
//! Scheduled loop driving DeviceLink + the watermark store for
//! local-network terminals.
//!
//! ## Per-Device Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     One Poll Cycle (per device)                         │
//! │                                                                         │
//! │  1. read watermark                                                      │
//! │  2. DeviceLink.fetch_since(watermark)        ── transient error ──┐    │
//! │  3. Normalizer.apply_batch(punches)                               │    │
//! │  4. advance watermark to the RESOLVED FRONTIER                    │    │
//! │     (max ts with everything at or below it applied/quarantined)   │    │
//! │  5. record sync status on the device row                          │    │
//! │                                                                   ▼    │
//! │                                              exponential backoff       │
//! │                                              (cap + jitter); after     │
//! │                                              max_failures cycles the   │
//! │                                              device is flagged         │
//! │                                              DEGRADED but keeps being  │
//! │                                              polled at the cap         │
//! │                                                                         │
//! │  WRITE-AHEAD ORDERING: applied-record durability (step 3) strictly     │
//! │  precedes the watermark advance (step 4). A crash between them         │
//! │  replays a bounded, already-idempotent tail.                           │
//! │                                                                         │
//! │  Each device runs its own independent task: a dead device never        │
//! │  stalls another device's cycle or agent shutdown.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use veritime_db::Database;

use crate::device_link::DeviceLink;
use crate::error::{SyncError, SyncResult};
use crate::normalizer::{BatchReport, NormalizerHandle};
use veritime_core::Device;

// =============================================================================
// Configuration
// =============================================================================

/// Polling agent tuning.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between successful cycles.
    pub poll_interval: Duration,

    /// First backoff step after a transient failure.
    pub initial_backoff: Duration,

    /// Backoff cap; a degraded device is retried at this interval.
    pub max_backoff: Duration,

    /// Consecutive failed cycles before the device is flagged degraded.
    pub max_failures: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            poll_interval: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_failures: 5,
        }
    }
}

// =============================================================================
// Single Cycle
// =============================================================================

/// Outcome of one successful poll cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Punches fetched from the device this cycle.
    pub fetched: usize,

    /// Normalizer report, when anything was fetched.
    pub report: Option<BatchReport>,

    /// Watermark after the cycle, when it was touched.
    pub watermark: Option<chrono::NaiveDateTime>,
}

/// Runs one poll cycle for one device.
///
/// Watermark ordering: the normalizer commits every applied punch before
/// the watermark advance below, so a crash mid-cycle replays a bounded,
/// idempotent tail instead of losing records.
pub async fn poll_device_once(
    db: &Database,
    link: &dyn DeviceLink,
    normalizer: &NormalizerHandle,
    device: &Device,
) -> SyncResult<CycleOutcome> {
    let serial = &device.serial_number;

    let since = db.watermarks().get(serial).await?;
    debug!(device = %serial, watermark = ?since, "Polling device");

    let punches = link.fetch_since(device, since).await?;
    let fetched = punches.len();

    if punches.is_empty() {
        db.devices()
            .update_sync_status(serial, "success", Some(Utc::now().naive_utc()))
            .await?;
        return Ok(CycleOutcome {
            fetched: 0,
            report: None,
            watermark: since,
        });
    }

    info!(device = %serial, count = fetched, "Fetched punches, normalizing");
    let report = normalizer.apply_batch("poll", punches).await?;

    let mut watermark = since;
    if let Some(frontier) = report.resolved_frontier() {
        let stored = db
            .watermarks()
            .advance(serial, frontier)
            .await
            .map_err(|e| SyncError::WatermarkPersistence(e.to_string()))?;
        watermark = Some(stored);
    }

    let status = if report.all_resolved() { "success" } else { "partial" };
    db.devices()
        .update_sync_status(serial, status, Some(Utc::now().naive_utc()))
        .await?;

    if !report.all_resolved() {
        warn!(
            device = %serial,
            failed = report.failed,
            "Cycle left unresolved punches; watermark held back for retry"
        );
    }

    Ok(CycleOutcome {
        fetched,
        report: Some(report),
        watermark,
    })
}

// =============================================================================
// Polling Agent
// =============================================================================

/// Owns one polling task per registered poll-mode device.
pub struct PollingAgent {
    db: Database,
    link: Arc<dyn DeviceLink>,
    normalizer: NormalizerHandle,
    config: PollerConfig,
}

/// Handle for stopping a running agent.
pub struct PollingAgentHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PollingAgentHandle {
    /// Signals every device loop to stop and waits for them.
    ///
    /// In-flight device calls finish up to their timeout; the signal is
    /// only observed between cycles, never mid-write.
    pub async fn shutdown(self) {
        info!("Polling agent shutting down");
        let _ = self.shutdown_tx.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(?e, "Device poll task panicked");
            }
        }

        info!("Polling agent stopped");
    }

    /// Number of device loops currently owned.
    pub fn device_count(&self) -> usize {
        self.tasks.len()
    }
}

impl PollingAgent {
    /// Creates a new polling agent.
    pub fn new(
        db: Database,
        link: Arc<dyn DeviceLink>,
        normalizer: NormalizerHandle,
        config: PollerConfig,
    ) -> Self {
        PollingAgent {
            db,
            link,
            normalizer,
            config,
        }
    }

    /// Loads poll targets and spawns one independent loop per device.
    pub async fn start(self) -> SyncResult<PollingAgentHandle> {
        let devices = self.db.devices().list_poll_targets().await?;
        info!(count = devices.len(), "Starting polling agent");

        let (shutdown_tx, _) = watch::channel(false);
        let mut tasks = Vec::with_capacity(devices.len());

        for device in devices {
            let db = self.db.clone();
            let link = self.link.clone();
            let normalizer = self.normalizer.clone();
            let config = self.config.clone();
            let shutdown_rx = shutdown_tx.subscribe();

            tasks.push(tokio::spawn(device_loop(
                db, link, normalizer, config, device, shutdown_rx,
            )));
        }

        Ok(PollingAgentHandle { shutdown_tx, tasks })
    }
}

/// The per-device polling loop.
async fn device_loop(
    db: Database,
    link: Arc<dyn DeviceLink>,
    normalizer: NormalizerHandle,
    config: PollerConfig,
    device: Device,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let serial = device.serial_number.clone();
    info!(device = %serial, "Device poll loop starting");

    let mut backoff = ExponentialBackoff {
        initial_interval: config.initial_backoff,
        max_interval: config.max_backoff,
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut consecutive_failures = 0u32;
    let mut degraded = device.is_degraded;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let sleep_for = match poll_device_once(&db, link.as_ref(), &normalizer, &device).await {
            Ok(outcome) => {
                if outcome.fetched > 0 {
                    debug!(device = %serial, fetched = outcome.fetched, "Cycle complete");
                }
                consecutive_failures = 0;
                backoff.reset();
                if degraded {
                    degraded = false;
                    if let Err(e) = db.devices().set_degraded(&serial, false).await {
                        warn!(device = %serial, ?e, "Failed to clear degraded flag");
                    }
                }
                config.poll_interval
            }

            Err(e) if e.is_retryable() => {
                consecutive_failures += 1;
                warn!(
                    device = %serial,
                    failures = consecutive_failures,
                    error = %e,
                    "Transient poll failure"
                );

                if consecutive_failures >= config.max_failures && !degraded {
                    degraded = true;
                    error!(device = %serial, "Device degraded after repeated failures");
                    if let Err(e) = db.devices().set_degraded(&serial, true).await {
                        warn!(device = %serial, ?e, "Failed to set degraded flag");
                    }
                    if let Err(e) = db
                        .devices()
                        .update_sync_status(&serial, "degraded", None)
                        .await
                    {
                        warn!(device = %serial, ?e, "Failed to record degraded status");
                    }
                }

                backoff.next_backoff().unwrap_or(config.max_backoff)
            }

            Err(e) => {
                // Cycle-fatal (e.g. watermark persistence): nothing was
                // committed past the failure, retry the whole cycle later
                consecutive_failures += 1;
                error!(device = %serial, error = %e, "Poll cycle failed");
                if let Err(e) = db.devices().update_sync_status(&serial, "failed", None).await {
                    warn!(device = %serial, ?e, "Failed to record cycle failure");
                }
                config.poll_interval
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!(device = %serial, "Device poll loop stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::Mutex;

    use crate::normalizer::Normalizer;
    use veritime_core::{
        ConnectionMode, DeviceUser, RawPunch, VerifyMethod, WireFormat, DEFAULT_INSTITUTION_ID,
    };
    use veritime_db::DbConfig;

    /// Scripted DeviceLink: hands out queued punches or a scripted error,
    /// and records the `since` cursor of every fetch.
    #[derive(Default)]
    struct MockLink {
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        punches: Vec<RawPunch>,
        fail_next: bool,
        seen_cursors: Vec<Option<NaiveDateTime>>,
    }

    #[async_trait]
    impl DeviceLink for MockLink {
        async fn fetch_since(
            &self,
            _device: &Device,
            since: Option<NaiveDateTime>,
        ) -> SyncResult<Vec<RawPunch>> {
            let mut state = self.state.lock().unwrap();
            state.seen_cursors.push(since);
            if state.fail_next {
                state.fail_next = false;
                return Err(SyncError::Timeout(10));
            }
            let punches = state
                .punches
                .iter()
                .filter(|p| since.map(|s| p.timestamp > s).unwrap_or(true))
                .cloned()
                .collect();
            Ok(punches)
        }

        async fn list_users(&self, _device: &Device) -> SyncResult<Vec<DeviceUser>> {
            Ok(Vec::new())
        }

        async fn create_user(&self, _device: &Device, _user: &DeviceUser) -> SyncResult<()> {
            Ok(())
        }

        async fn delete_user(&self, _device: &Device, _user_id: &str) -> SyncResult<()> {
            Ok(())
        }
    }

    fn punch(h: u32, m: u32) -> RawPunch {
        RawPunch {
            device_serial: "ZK-01".into(),
            device_user_id: "101".into(),
            timestamp: NaiveDate::from_ymd_opt(2026, 3, 2)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            punch_code: 0,
            verify_method: VerifyMethod::Fingerprint,
            source_format: WireFormat::Vendor,
        }
    }

    async fn engine() -> (Database, NormalizerHandle, Device) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.staff()
            .add_staff(DEFAULT_INSTITUTION_ID, "101", "A. Kumar", "general")
            .await
            .unwrap();
        let device = db
            .devices()
            .register(
                DEFAULT_INSTITUTION_ID,
                "ZK-01",
                "Main Gate",
                Some("192.168.1.201"),
                4370,
                ConnectionMode::Poll,
            )
            .await
            .unwrap();

        let (normalizer, handle) = Normalizer::new(db.clone(), DEFAULT_INSTITUTION_ID);
        tokio::spawn(normalizer.run());
        (db, handle, device)
    }

    #[tokio::test]
    async fn cycle_applies_and_advances_watermark() {
        let (db, normalizer, device) = engine().await;
        let link = MockLink::default();
        link.state.lock().unwrap().punches = vec![punch(9, 0), punch(18, 0)];

        let outcome = poll_device_once(&db, &link, &normalizer, &device)
            .await
            .unwrap();

        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.watermark, Some(punch(18, 0).timestamp));
        assert_eq!(
            db.watermarks().get("ZK-01").await.unwrap(),
            Some(punch(18, 0).timestamp)
        );

        let refreshed = db.devices().find_by_serial("ZK-01").await.unwrap().unwrap();
        assert_eq!(refreshed.sync_status, "success");
        assert!(refreshed.last_sync.is_some());
    }

    #[tokio::test]
    async fn second_cycle_fetches_from_the_watermark() {
        let (db, normalizer, device) = engine().await;
        let link = MockLink::default();
        link.state.lock().unwrap().punches = vec![punch(9, 0), punch(18, 0)];

        poll_device_once(&db, &link, &normalizer, &device)
            .await
            .unwrap();
        let outcome = poll_device_once(&db, &link, &normalizer, &device)
            .await
            .unwrap();

        // Everything before the watermark is filtered by the device
        assert_eq!(outcome.fetched, 0);

        let cursors = link.state.lock().unwrap().seen_cursors.clone();
        assert_eq!(cursors, vec![None, Some(punch(18, 0).timestamp)]);
    }

    #[tokio::test]
    async fn replayed_batch_does_not_move_state() {
        let (db, normalizer, device) = engine().await;
        let link = MockLink::default();
        link.state.lock().unwrap().punches = vec![punch(9, 0), punch(18, 0)];

        poll_device_once(&db, &link, &normalizer, &device)
            .await
            .unwrap();

        // Simulate a crash before watermark advance: clear the cursor view
        // by replaying the same batch straight through the normalizer
        let report = normalizer
            .apply_batch("poll", vec![punch(9, 0), punch(18, 0)])
            .await
            .unwrap();

        assert_eq!(report.applied, 0);
        assert_eq!(report.duplicates, 2);

        // Watermark monotonicity held
        assert_eq!(
            db.watermarks().get("ZK-01").await.unwrap(),
            Some(punch(18, 0).timestamp)
        );
    }

    #[tokio::test]
    async fn transient_failure_is_reported_retryable() {
        let (db, normalizer, device) = engine().await;
        let link = MockLink::default();
        link.state.lock().unwrap().fail_next = true;

        let err = poll_device_once(&db, &link, &normalizer, &device)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // Nothing advanced
        assert!(db.watermarks().get("ZK-01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_failures_mark_the_device_degraded() {
        let (db, normalizer, _device) = engine().await;

        /// Always times out, like an unplugged terminal.
        struct DeadLink;

        #[async_trait]
        impl DeviceLink for DeadLink {
            async fn fetch_since(
                &self,
                _device: &Device,
                _since: Option<NaiveDateTime>,
            ) -> SyncResult<Vec<RawPunch>> {
                Err(SyncError::Timeout(1))
            }
            async fn list_users(&self, _device: &Device) -> SyncResult<Vec<DeviceUser>> {
                Err(SyncError::Timeout(1))
            }
            async fn create_user(&self, _device: &Device, _user: &DeviceUser) -> SyncResult<()> {
                Err(SyncError::Timeout(1))
            }
            async fn delete_user(&self, _device: &Device, _user_id: &str) -> SyncResult<()> {
                Err(SyncError::Timeout(1))
            }
        }

        let agent = PollingAgent::new(
            db.clone(),
            Arc::new(DeadLink),
            normalizer,
            PollerConfig {
                poll_interval: Duration::from_millis(5),
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                max_failures: 2,
            },
        );

        let handle = agent.start().await.unwrap();

        // Enough cycles to blow the failure budget
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown().await;

        let device = db.devices().find_by_serial("ZK-01").await.unwrap().unwrap();
        assert!(device.is_degraded);
        assert_eq!(device.sync_status, "degraded");
    }

    #[tokio::test]
    async fn agent_polls_and_shuts_down_gracefully() {
        let (db, normalizer, _device) = engine().await;
        let link = Arc::new(MockLink::default());
        link.state.lock().unwrap().punches = vec![punch(10, 5)];

        let agent = PollingAgent::new(
            db.clone(),
            link.clone(),
            normalizer,
            PollerConfig {
                poll_interval: Duration::from_secs(3600),
                ..Default::default()
            },
        );

        let handle = agent.start().await.unwrap();
        assert_eq!(handle.device_count(), 1);

        // First cycle runs immediately; give it a moment
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown().await;

        assert_eq!(
            db.watermarks().get("ZK-01").await.unwrap(),
            Some(punch(10, 5).timestamp)
        );
    }
}
