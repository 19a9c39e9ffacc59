//! Operating mode and the status surface exposed to the UI layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::applier::ApplyOutcome;
use crate::capability::CapabilityKind;

/// Agent operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Reporting disabled
    #[default]
    Idle,
    /// Reporting active with required capabilities present
    Engaged,
    /// Reporting required but a capability is missing
    Degraded,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingMode::Idle => "idle",
            OperatingMode::Engaged => "engaged",
            OperatingMode::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// Snapshot of what the agent is doing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub mode: OperatingMode,
    #[serde(default)]
    pub last_sample_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// A lock was requested but administrative authority is absent
    #[serde(default)]
    pub pending_lock: bool,
    /// Required or desired capabilities currently absent
    #[serde(default)]
    pub missing_capabilities: Vec<CapabilityKind>,
    #[serde(default)]
    pub last_report_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_outcome: Option<ApplyOutcome>,
}

impl AgentStatus {
    /// Whether the user should be prompted to fix something
    pub fn needs_attention(&self) -> bool {
        self.mode == OperatingMode::Degraded
            || self.pending_lock
            || !self.missing_capabilities.is_empty()
    }

    /// One-line notification text
    pub fn headline(&self) -> String {
        if self.pending_lock {
            return "Lock requested but administrative authority inactive - open app".to_string();
        }
        match self.mode {
            OperatingMode::Idle => "Lost mode not required".to_string(),
            OperatingMode::Degraded => {
                let missing: Vec<String> = self
                    .missing_capabilities
                    .iter()
                    .map(|k| k.to_string())
                    .collect();
                format!("Missing {} - open app to grant", missing.join(", "))
            }
            OperatingMode::Engaged => match &self.last_error {
                Some(err) => format!("Lost mode active - {}", err),
                None => "Lost mode active - sending location".to_string(),
            },
        }
    }
}
