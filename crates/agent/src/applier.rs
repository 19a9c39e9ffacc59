//! Command application against the lock and alert actuators

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::CapabilitySet;
use crate::channel::CommandDirective;

/// Default cap on a single alert playback
pub const DEFAULT_ALERT_DURATION: Duration = Duration::from_secs(6);

/// Actuator failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("ACTUATOR UNAVAILABLE: {0}")]
    Unavailable(String),

    #[error("ACTUATOR FAILED: {0}")]
    Failed(String),
}

/// Administrative lock sink
#[async_trait]
pub trait LockActuator: Send + Sync {
    async fn lock_now(&self) -> Result<(), ActuatorError>;
}

/// Audible alert sink
#[async_trait]
pub trait AlertActuator: Send + Sync {
    async fn start(&self) -> Result<(), ActuatorError>;
    async fn stop(&self) -> Result<(), ActuatorError>;
}

/// What one `apply` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub lock_attempted: bool,
    pub lock_succeeded: bool,
    pub alert_triggered: bool,
    /// A lock is still waiting for administrative authority or a retry
    #[serde(default)]
    pub lock_pending: bool,
}

#[derive(Debug, Default)]
struct LockState {
    pending: bool,
    already_locked: bool,
}

/// Applies directives idempotently
pub struct CommandApplier {
    lock: Arc<dyn LockActuator>,
    alert: Arc<dyn AlertActuator>,
    alert_duration: Duration,
    state: Mutex<LockState>,
    active_alert: Arc<Mutex<Option<CancellationToken>>>,
}

impl CommandApplier {
    pub fn new(
        lock: Arc<dyn LockActuator>,
        alert: Arc<dyn AlertActuator>,
        alert_duration: Duration,
    ) -> Self {
        Self {
            lock,
            alert,
            alert_duration,
            state: Mutex::new(LockState::default()),
            active_alert: Arc::new(Mutex::new(None)),
        }
    }

    /// Apply a directive. A previously pending lock is retried on every call.
    pub async fn apply(&self, directive: CommandDirective, caps: CapabilitySet) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        {
            // Held across the actuator call: no two lock invocations overlap
            let mut state = self.state.lock().await;

            if directive.lock || state.pending {
                if state.already_locked {
                    debug!("◆ LOCK SKIPPED: ALREADY LOCKED THIS EPOCH");
                    state.pending = false;
                } else if !caps.has_admin_authority {
                    if !state.pending {
                        warn!("◆ LOCK PENDING: ADMINISTRATIVE AUTHORITY INACTIVE");
                    }
                    state.pending = true;
                } else {
                    outcome.lock_attempted = true;
                    match self.lock.lock_now().await {
                        Ok(()) => {
                            info!("◆ DEVICE LOCKED");
                            state.already_locked = true;
                            state.pending = false;
                            outcome.lock_succeeded = true;
                        }
                        Err(e) => {
                            warn!("◆ LOCK FAILED: {}", e);
                            state.pending = true;
                        }
                    }
                }
            }

            outcome.lock_pending = state.pending;
        }

        if directive.play_alert {
            outcome.alert_triggered = self.trigger_alert().await;
        }

        outcome
    }

    pub async fn pending_lock(&self) -> bool {
        self.state.lock().await.pending
    }

    pub async fn already_locked(&self) -> bool {
        self.state.lock().await.already_locked
    }

    /// The device was unlocked by its owner; the next lock directive is honoured
    pub async fn mark_unlocked(&self) {
        let mut state = self.state.lock().await;
        if state.already_locked {
            info!("◆ UNLOCK OBSERVED: LOCK EPOCH CLOSED");
        }
        state.already_locked = false;
    }

    /// Close the lock epoch when reporting is switched off
    pub async fn reset_epoch(&self) {
        self.state.lock().await.already_locked = false;
    }

    /// Stop the current alert playback, if any
    pub async fn stop_alert(&self) {
        let mut active = self.active_alert.lock().await;
        if let Some(token) = active.take() {
            token.cancel();
            if let Err(e) = self.alert.stop().await {
                warn!("◆ ALERT STOP FAILED: {}", e);
            }
        }
    }

    async fn trigger_alert(&self) -> bool {
        let mut active = self.active_alert.lock().await;

        if let Some(previous) = active.take() {
            previous.cancel();
            debug!("◆ RESTARTING ALERT");
            if let Err(e) = self.alert.stop().await {
                warn!("◆ ALERT STOP FAILED: {}", e);
            }
        }

        if let Err(e) = self.alert.start().await {
            warn!("◆ ALERT FAILED: {}", e);
            return false;
        }
        info!("◆ ALERT PLAYING FOR {:?}", self.alert_duration);

        let token = CancellationToken::new();
        *active = Some(token.clone());
        drop(active);

        let slot = Arc::clone(&self.active_alert);
        let alert = Arc::clone(&self.alert);
        let duration = self.alert_duration;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(duration) => {}
            }

            let mut active = slot.lock().await;
            // A newer playback owns the slot now
            if token.is_cancelled() {
                return;
            }
            active.take();
            if let Err(e) = alert.stop().await {
                warn!("◆ ALERT STOP FAILED: {}", e);
            }
            debug!("◆ ALERT FINISHED");
        });

        true
    }
}
