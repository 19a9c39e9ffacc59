//! Operating-mode state machine and the reporting cycle

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lostmode_config::{Config, PreferenceStore, ServerConfig};
use lostmode_transport::{Transport, TransportError};

use crate::applier::{AlertActuator, CommandApplier, LockActuator, DEFAULT_ALERT_DURATION};
use crate::capability::{required_capabilities, CapabilityKind, CapabilityProbe, CapabilitySet};
use crate::channel::{CommandChannel, CommandDirective, RetryPolicy, TelemetryReport};
use crate::position::{LocationProvider, PositionHandle, PositionSample, PositionSource, SampleCadence};
use crate::status::{AgentStatus, OperatingMode};

const DEFAULT_RECHECK: Duration = Duration::from_secs(10);
const MIN_RECHECK: Duration = Duration::from_millis(100);

const PENDING_LOCK_NOTICE: &str = "LOCK PENDING: ADMINISTRATIVE AUTHORITY INACTIVE";

/// Tunables resolved from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub update_url: String,
    pub cadence: SampleCadence,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub capability_recheck: Duration,
    pub alert_duration: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            update_url: ServerConfig::default().update_url(),
            cadence: SampleCadence::default(),
            retry: RetryPolicy::default(),
            timeout: lostmode_transport::DEFAULT_TIMEOUT,
            capability_recheck: DEFAULT_RECHECK,
            alert_duration: DEFAULT_ALERT_DURATION,
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        let reporting = &config.reporting;
        Self {
            update_url: config.server.update_url(),
            cadence: SampleCadence::new(
                Duration::from_millis(reporting.interval_ms),
                Duration::from_millis(reporting.fastest_interval_ms),
            ),
            retry: RetryPolicy::from(&config.network),
            timeout: config.network.timeout(),
            capability_recheck: Duration::from_millis(reporting.capability_recheck_ms),
            alert_duration: Duration::from_millis(reporting.alert_duration_ms),
        }
    }
}

/// Collaborators the agent is built from
pub struct AgentContext {
    pub preferences: Arc<dyn PreferenceStore>,
    pub probe: Arc<dyn CapabilityProbe>,
    pub locations: Arc<dyn LocationProvider>,
    pub transport: Arc<dyn Transport>,
    pub lock: Arc<dyn LockActuator>,
    pub alert: Arc<dyn AlertActuator>,
    pub settings: AgentSettings,
}

/// Orchestrator: owns the operating mode and drives every other component
///
/// Mode decisions happen in [`AgentSupervisor::evaluate`], which
/// [`AgentSupervisor::run`] calls on every capability re-check tick.
/// Samples land in a single-slot mailbox drained by one worker, so at most
/// one report is in flight and a newer sample replaces any queued one.
pub struct AgentSupervisor {
    preferences: Arc<dyn PreferenceStore>,
    probe: Arc<dyn CapabilityProbe>,
    settings: AgentSettings,
    source: PositionSource,
    channel: CommandChannel,
    applier: CommandApplier,
    session: Mutex<Option<PositionHandle>>,
    status: watch::Sender<AgentStatus>,
    latest: Arc<watch::Sender<Option<PositionSample>>>,
    pending: watch::Receiver<Option<PositionSample>>,
    shutdown: CancellationToken,
}

impl AgentSupervisor {
    pub fn new(ctx: AgentContext) -> Self {
        let shutdown = CancellationToken::new();
        let settings = ctx.settings;

        let channel = CommandChannel::new(ctx.transport, Arc::clone(&ctx.preferences), &settings.update_url)
            .with_timeout(settings.timeout)
            .with_retry(settings.retry)
            .with_cancellation(shutdown.clone());
        let applier = CommandApplier::new(ctx.lock, ctx.alert, settings.alert_duration);
        let source = PositionSource::new(ctx.locations, Arc::clone(&ctx.probe));

        let (status, _) = watch::channel(AgentStatus::default());
        let (latest, pending) = watch::channel(None);

        Self {
            preferences: ctx.preferences,
            probe: ctx.probe,
            settings,
            source,
            channel,
            applier,
            session: Mutex::new(None),
            status,
            latest: Arc::new(latest),
            pending,
            shutdown,
        }
    }

    pub fn current_status(&self) -> AgentStatus {
        self.status.borrow().clone()
    }

    pub fn mode(&self) -> OperatingMode {
        self.status.borrow().mode
    }

    /// Receiver that observes every status change
    pub fn subscribe_status(&self) -> watch::Receiver<AgentStatus> {
        self.status.subscribe()
    }

    pub fn position_source(&self) -> &PositionSource {
        &self.source
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Whether persisted configuration asks for reporting
    pub async fn requires_reporting(&self) -> bool {
        self.preferences.snapshot().await.mode().requires_reporting()
    }

    /// Re-read configuration and capabilities and move to the matching mode
    pub async fn evaluate(&self) -> OperatingMode {
        let mut session = self.session.lock().await;
        let previous = self.mode();

        if !self.requires_reporting().await {
            if let Some(handle) = session.take() {
                self.source.stop(handle).await;
            }
            if previous != OperatingMode::Idle {
                info!("◆ REPORTING NO LONGER REQUIRED");
                self.applier.reset_epoch().await;
                self.latest.send_replace(None);
            }
            self.publish(|s| {
                s.mode = OperatingMode::Idle;
                s.missing_capabilities.clear();
                s.last_error = None;
            });
            log_transition(previous, OperatingMode::Idle);
            return OperatingMode::Idle;
        }

        let caps = self.probe.current_capabilities();
        let requirements = required_capabilities(OperatingMode::Engaged);
        let missing = missing_capabilities(&caps);

        if !requirements.satisfied_by(&caps) {
            if let Some(handle) = session.take() {
                warn!("◆ CAPABILITY REVOKED WHILE ENGAGED");
                self.source.stop(handle).await;
            }
            if previous == OperatingMode::Engaged {
                self.latest.send_replace(None);
            }
            return self.degrade(previous, missing);
        }

        let running = session.as_ref().map_or(false, |h| !h.is_finished());
        if !running {
            let latest = Arc::clone(&self.latest);
            match self.source.start(self.settings.cadence, move |sample| {
                latest.send_replace(Some(sample));
            }) {
                Ok(handle) => *session = Some(handle),
                Err(e) => {
                    // Capability vanished between the check and the start
                    warn!("◆ POSITION SOURCE START FAILED: {}", e);
                    return self.degrade(previous, missing_capabilities(&self.probe.current_capabilities()));
                }
            }
        }

        let pending_lock = self.current_status().pending_lock;
        self.publish(|s| {
            s.mode = OperatingMode::Engaged;
            s.missing_capabilities = missing;
            if previous != OperatingMode::Engaged {
                s.last_error = pending_lock.then(|| PENDING_LOCK_NOTICE.to_string());
            }
        });
        log_transition(previous, OperatingMode::Engaged);
        OperatingMode::Engaged
    }

    fn degrade(&self, previous: OperatingMode, missing: Vec<CapabilityKind>) -> OperatingMode {
        let names: Vec<String> = missing.iter().map(|k| k.to_string()).collect();
        self.publish(|s| {
            s.mode = OperatingMode::Degraded;
            s.last_error = Some(format!("MISSING CAPABILITY: {}", names.join(", ")));
            s.missing_capabilities = missing;
        });
        log_transition(previous, OperatingMode::Degraded);
        OperatingMode::Degraded
    }

    /// Hand a sample to the worker, replacing any sample still waiting
    pub fn submit_sample(&self, sample: PositionSample) {
        self.latest.send_replace(Some(sample));
    }

    /// One reporting cycle: report, then apply whatever came back
    pub async fn process_sample(&self, sample: PositionSample) {
        if self.mode() != OperatingMode::Engaged {
            debug!("◆ SAMPLE DISCARDED: AGENT NOT ENGAGED");
            return;
        }

        let prefs = self.preferences.snapshot().await;
        let report = TelemetryReport::new(sample, prefs.device_id());
        self.publish(|s| s.last_sample_at = sample_time(&sample));

        let (directive, failure) = match self.channel.report(&report).await {
            Ok(directive) => (directive, None),
            Err(TransportError::Cancelled) => {
                debug!("◆ REPORT ABANDONED: SHUTTING DOWN");
                return;
            }
            // Still apply an empty directive so a pending lock gets retried
            Err(e) => (CommandDirective::default(), Some(e.to_string())),
        };

        // Mode may have changed while the report was in flight
        let _session = self.session.lock().await;
        if self.mode() != OperatingMode::Engaged {
            debug!("◆ DIRECTIVE DISCARDED: AGENT LEFT ENGAGED MODE");
            return;
        }

        let caps = self.probe.current_capabilities();
        let outcome = self.applier.apply(directive, caps).await;
        let reported = failure.is_none();

        self.publish(|s| {
            if reported {
                s.last_report_at = Some(Utc::now());
            }
            s.last_error = failure.or_else(|| outcome.lock_pending.then(|| PENDING_LOCK_NOTICE.to_string()));
            s.pending_lock = outcome.lock_pending;
            s.missing_capabilities = missing_capabilities(&caps);
            s.last_outcome = Some(outcome);
        });
    }

    /// The owner unlocked the device; closes the current lock epoch
    pub async fn notify_unlocked(&self) {
        self.applier.mark_unlocked().await;
    }

    /// Drive the agent until `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("◆ LOST MODE AGENT ONLINE");

        let worker = tokio::spawn(Arc::clone(&self).sample_worker());

        let mut ticker = interval(self.settings.capability_recheck.max(MIN_RECHECK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.evaluate().await;
                }
            }
        }

        info!("◆ SHUTTING DOWN");
        self.shutdown.cancel();
        if let Err(e) = worker.await {
            warn!("◆ SAMPLE WORKER ENDED ABNORMALLY: {}", e);
        }

        if let Some(handle) = self.session.lock().await.take() {
            self.source.stop(handle).await;
        }
        self.applier.stop_alert().await;
        self.publish(|s| s.mode = OperatingMode::Idle);

        info!("◆ LOST MODE AGENT OFFLINE");
    }

    async fn sample_worker(self: Arc<Self>) {
        let mut pending = self.pending.clone();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                changed = pending.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let sample = *pending.borrow_and_update();
            if let Some(sample) = sample {
                self.process_sample(sample).await;
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut AgentStatus)) {
        self.status.send_if_modified(|status| {
            let before = status.clone();
            update(status);
            *status != before
        });
    }
}

fn missing_capabilities(caps: &CapabilitySet) -> Vec<CapabilityKind> {
    let requirements = required_capabilities(OperatingMode::Engaged);
    let mut missing = caps.missing(&requirements.required);
    missing.extend(caps.missing(&requirements.desired));
    missing
}

fn sample_time(sample: &PositionSample) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(sample.captured_at_unix_millis)
}

fn log_transition(from: OperatingMode, to: OperatingMode) {
    if from != to {
        info!("◆ MODE {} -> {}", from.to_string().to_uppercase(), to.to_string().to_uppercase());
    }
}
