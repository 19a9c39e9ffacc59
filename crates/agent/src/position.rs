//! Periodic position sampling

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::capability::CapabilityProbe;

const DEFAULT_INTERVAL_MS: u64 = 10_000;
const DEFAULT_FASTEST_MS: u64 = 5_000;
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Position sampling errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("LOCATION CAPABILITY DENIED")]
    CapabilityDenied,

    #[error("LOCATION UNAVAILABLE: {0}")]
    Unavailable(String),
}

/// One position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    pub captured_at_unix_millis: i64,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64, captured_at: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters,
            captured_at_unix_millis: captured_at,
        }
    }
}

/// Host location subsystem
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Latest fix, or `None` when nothing is available yet
    async fn current_position(&self) -> Result<Option<PositionSample>, PositionError>;
}

/// Sampling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCadence {
    /// Desired interval between samples
    pub interval: Duration,
    /// Floor below which samples are never taken
    pub fastest: Duration,
}

impl Default for SampleCadence {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            fastest: Duration::from_millis(DEFAULT_FASTEST_MS),
        }
    }
}

impl SampleCadence {
    pub fn new(interval: Duration, fastest: Duration) -> Self {
        Self { interval, fastest }
    }

    /// Period actually used by the sampling timer
    pub fn effective_period(&self) -> Duration {
        self.interval.max(self.fastest).max(MIN_PERIOD)
    }
}

/// Running sampling session; pass back to [`PositionSource::stop`]
#[derive(Debug)]
pub struct PositionHandle {
    session: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PositionHandle {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Capability-gated, restartable stream of position samples
///
/// Every tick with a fix yields a sample, so a device that is not moving
/// keeps reporting. A restarted session never opens with a fix an earlier
/// session already delivered.
pub struct PositionSource {
    provider: Arc<dyn LocationProvider>,
    probe: Arc<dyn CapabilityProbe>,
    last_delivered: Arc<AtomicI64>,
    sessions: AtomicU64,
}

impl PositionSource {
    pub fn new(provider: Arc<dyn LocationProvider>, probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            provider,
            probe,
            last_delivered: Arc::new(AtomicI64::new(i64::MIN)),
            sessions: AtomicU64::new(0),
        }
    }

    /// Number of sampling sessions started so far
    pub fn sessions_started(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Start sampling; `on_sample` runs on the sampling task for each new fix
    ///
    /// Callers check capabilities first. Starting without location access
    /// is refused with [`PositionError::CapabilityDenied`].
    pub fn start<F>(&self, cadence: SampleCadence, on_sample: F) -> Result<PositionHandle, PositionError>
    where
        F: Fn(PositionSample) + Send + Sync + 'static,
    {
        if !self.probe.current_capabilities().has_location() {
            warn!("◆ POSITION SOURCE REFUSED: NO LOCATION CAPABILITY");
            return Err(PositionError::CapabilityDenied);
        }

        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let period = cadence.effective_period();

        info!("◆ POSITION SOURCE STARTED (session {}, every {:?})", session, period);

        let task = tokio::spawn(sample_loop(
            Arc::clone(&self.provider),
            Arc::clone(&self.last_delivered),
            period,
            cancel.clone(),
            on_sample,
        ));

        Ok(PositionHandle {
            session,
            cancel,
            task,
        })
    }

    /// Stop a session and wait for its task to wind down
    pub async fn stop(&self, handle: PositionHandle) {
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!("◆ POSITION TASK ENDED ABNORMALLY: {}", e);
        }
        info!("◆ POSITION SOURCE STOPPED (session {})", handle.session);
    }
}

async fn sample_loop<F>(
    provider: Arc<dyn LocationProvider>,
    last_delivered: Arc<AtomicI64>,
    period: Duration,
    cancel: CancellationToken,
    on_sample: F,
) where
    F: Fn(PositionSample) + Send + Sync + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Fix a previous session already handed out; only the first read can replay it
    let replay_floor = last_delivered.load(Ordering::SeqCst);
    let mut first_fix = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fix = tokio::select! {
            _ = cancel.cancelled() => break,
            fix = provider.current_position() => fix,
        };

        match fix {
            Ok(Some(sample)) => {
                let replayed = first_fix && sample.captured_at_unix_millis <= replay_floor;
                first_fix = false;
                if replayed {
                    trace!("◆ STALE FIX SKIPPED ({})", sample.captured_at_unix_millis);
                    continue;
                }
                last_delivered.fetch_max(sample.captured_at_unix_millis, Ordering::SeqCst);
                debug!(
                    "◆ FIX: {}, {} (±{}m)",
                    sample.latitude, sample.longitude, sample.accuracy_meters
                );
                on_sample(sample);
            }
            Ok(None) => trace!("◆ NO FIX AVAILABLE"),
            Err(e) => warn!("◆ LOCATION READ FAILED: {}", e),
        }
    }
}
