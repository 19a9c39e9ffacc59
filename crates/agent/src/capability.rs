//! Host capability queries

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::status::OperatingMode;

/// A capability the agent may need
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Fine or coarse location access
    Location,
    BackgroundLocation,
    AdminAuthority,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityKind::Location => "location",
            CapabilityKind::BackgroundLocation => "background location",
            CapabilityKind::AdminAuthority => "administrative authority",
        };
        f.write_str(name)
    }
}

/// Capabilities granted at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub has_fine_location: bool,
    pub has_coarse_location: bool,
    pub has_background_location: bool,
    pub has_admin_authority: bool,
}

impl CapabilitySet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            has_fine_location: true,
            has_coarse_location: true,
            has_background_location: true,
            has_admin_authority: true,
        }
    }

    pub fn has_location(&self) -> bool {
        self.has_fine_location || self.has_coarse_location
    }

    pub fn has(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::Location => self.has_location(),
            CapabilityKind::BackgroundLocation => self.has_background_location,
            CapabilityKind::AdminAuthority => self.has_admin_authority,
        }
    }

    /// Kinds from `kinds` that are not granted
    pub fn missing(&self, kinds: &[CapabilityKind]) -> Vec<CapabilityKind> {
        kinds.iter().copied().filter(|k| !self.has(*k)).collect()
    }
}

/// What a mode needs: hard requirements and nice-to-haves
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub required: Vec<CapabilityKind>,
    pub desired: Vec<CapabilityKind>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.desired.is_empty()
    }

    /// True when every hard requirement is granted
    pub fn satisfied_by(&self, caps: &CapabilitySet) -> bool {
        caps.missing(&self.required).is_empty()
    }
}

/// Capabilities needed to operate in `mode`
pub fn required_capabilities(mode: OperatingMode) -> Requirements {
    match mode {
        OperatingMode::Idle => Requirements::default(),
        OperatingMode::Engaged | OperatingMode::Degraded => Requirements {
            required: vec![CapabilityKind::Location],
            desired: vec![
                CapabilityKind::BackgroundLocation,
                CapabilityKind::AdminAuthority,
            ],
        },
    }
}

/// Source of the current capability set
///
/// Must be a side-effect-free query; results are never cached by callers.
pub trait CapabilityProbe: Send + Sync {
    fn current_capabilities(&self) -> CapabilitySet;
}

impl<F> CapabilityProbe for F
where
    F: Fn() -> CapabilitySet + Send + Sync,
{
    fn current_capabilities(&self) -> CapabilitySet {
        self()
    }
}
