//! Telemetry uplink and command downlink
//!
//! One [`TelemetryReport`] goes out per position sample; at most one
//! [`CommandDirective`] comes back. Transport-level failures are retried
//! with exponential backoff, after which the report is dropped: the next
//! sample supersedes it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use lostmode_config::{NetworkConfig, PreferenceStore};
use lostmode_transport::{Transport, TransportError, TransportRequest, TransportResponse};

use crate::position::PositionSample;

/// Build the shareable map link for a coordinate
pub fn map_link(latitude: f64, longitude: f64) -> String {
    format!("https://maps.google.com/?q={},{}", latitude, longitude)
}

/// Payload for one uplink
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReport {
    pub sample: PositionSample,
    pub device_identifier: Option<i64>,
    pub map_link_derived: String,
}

impl TelemetryReport {
    pub fn new(sample: PositionSample, device_identifier: Option<i64>) -> Self {
        Self {
            map_link_derived: map_link(sample.latitude, sample.longitude),
            sample,
            device_identifier,
        }
    }

    /// Wire body: `{lat, lng, accuracy, timestamp, device_id?, map_link}`
    pub fn to_wire(&self) -> Value {
        let mut body = json!({
            "lat": self.sample.latitude,
            "lng": self.sample.longitude,
            "accuracy": self.sample.accuracy_meters,
            "timestamp": self.sample.captured_at_unix_millis,
            "map_link": self.map_link_derived,
        });
        if let Some(id) = self.device_identifier {
            body["device_id"] = json!(id);
        }
        body
    }
}

/// Commands carried by a reporting response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDirective {
    pub lock: bool,
    pub play_alert: bool,
}

impl CommandDirective {
    pub fn lock() -> Self {
        Self {
            lock: true,
            play_alert: false,
        }
    }

    pub fn alert() -> Self {
        Self {
            lock: false,
            play_alert: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.lock && !self.play_alert
    }

    /// Parse a response body; anything unparseable is an empty directive
    pub fn parse(body: &str) -> Self {
        if body.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_json(&value),
            Err(e) => {
                debug!("◆ UNPARSEABLE RESPONSE TREATED AS EMPTY: {}", e);
                Self::default()
            }
        }
    }

    /// Only literal `true` booleans count; `sound` and `play_sound` are synonyms
    pub fn from_json(value: &Value) -> Self {
        let flag = |key: &str| value.get(key).and_then(Value::as_bool).unwrap_or(false);
        Self {
            lock: flag("lock"),
            play_alert: flag("sound") || flag("play_sound"),
        }
    }
}

/// Retry schedule for transport-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per report, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl From<&NetworkConfig> for RetryPolicy {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            initial_backoff: Duration::from_millis(config.backoff_initial_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the `attempt`-th failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Reporting channel to the backend
pub struct CommandChannel {
    transport: Arc<dyn Transport>,
    preferences: Arc<dyn PreferenceStore>,
    endpoint: String,
    timeout: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl CommandChannel {
    pub fn new(
        transport: Arc<dyn Transport>,
        preferences: Arc<dyn PreferenceStore>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            preferences,
            endpoint: endpoint.into(),
            timeout: lostmode_transport::DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Abort in-flight attempts and backoff when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver one report and return the directive it produced
    pub async fn report(&self, report: &TelemetryReport) -> Result<CommandDirective, TransportError> {
        let prefs = self.preferences.snapshot().await;
        let token = prefs.token().map(str::to_string);
        let body = report.to_wire();
        let attempts = self.retry.attempts();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = TransportRequest::post_json(&self.endpoint, body.clone())
                .with_bearer(token.clone())
                .with_timeout(self.timeout);

            trace!("◆ REPORT ATTEMPT {}/{}", attempt, attempts);

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                outcome = self.transport.send(request) => outcome,
            };

            match outcome {
                Ok(response) if response.is_success() => {
                    return Ok(self.accept(response, token.as_deref()).await);
                }
                Ok(response) => {
                    warn!("◆ REPORT REFUSED: HTTP {}", response.status);
                    return Err(TransportError::Status(response.status));
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "◆ REPORT ATTEMPT {}/{} FAILED: {} (retrying in {:?})",
                        attempt, attempts, e, delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!("◆ REPORT DROPPED AFTER {} ATTEMPT(S): {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    async fn accept(&self, response: TransportResponse, current_token: Option<&str>) -> CommandDirective {
        let Some(body) = response.json() else {
            debug!("◆ EMPTY OR UNPARSEABLE RESPONSE, NO COMMANDS");
            return CommandDirective::default();
        };

        if let Some(rotated) = body.get("token").and_then(Value::as_str) {
            if !rotated.is_empty() && Some(rotated) != current_token {
                match self.preferences.store_auth_token(rotated).await {
                    Ok(()) => info!("◆ BACKEND ROTATED AUTH TOKEN"),
                    Err(e) => warn!("◆ FAILED TO STORE ROTATED TOKEN: {}", e),
                }
            }
        }

        let directive = CommandDirective::from_json(&body);
        if !directive.is_empty() {
            info!(
                "◆ DIRECTIVE RECEIVED: lock={} alert={}",
                directive.lock, directive.play_alert
            );
        }
        directive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_link_format() {
        assert_eq!(
            map_link(37.1, -122.1),
            "https://maps.google.com/?q=37.1,-122.1"
        );
    }

    #[test]
    fn test_parse_tolerates_either_sound_key() {
        assert_eq!(CommandDirective::parse(r#"{"sound": true}"#), CommandDirective::alert());
        assert_eq!(
            CommandDirective::parse(r#"{"play_sound": true}"#),
            CommandDirective::alert()
        );
        assert_eq!(
            CommandDirective::parse(r#"{"sound": false, "play_sound": true}"#),
            CommandDirective::alert()
        );
    }

    #[test]
    fn test_parse_defaults_missing_keys() {
        assert_eq!(CommandDirective::parse(r#"{"lock": true}"#), CommandDirective::lock());
        assert!(CommandDirective::parse("{}").is_empty());
        assert!(CommandDirective::parse("").is_empty());
    }

    #[test]
    fn test_parse_never_infers_from_malformed_input() {
        assert!(CommandDirective::parse("lock").is_empty());
        assert!(CommandDirective::parse(r#"{"lock": "true"}"#).is_empty());
        assert!(CommandDirective::parse(r#"{"lock": 1}"#).is_empty());
        assert!(CommandDirective::parse(r#"[true]"#).is_empty());
        assert!(CommandDirective::parse(r#"{"lock": tr"#).is_empty());
    }

    #[test]
    fn test_backoff_is_exponential_with_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryPolicy::from(&NetworkConfig::default());
        assert_eq!(policy, RetryPolicy::default());
    }
}
