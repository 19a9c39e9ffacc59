//! FIELD AGENT: telemetry and command synchronization
//!
//! Keeps the operating mode consistent with configuration and host
//! capabilities, reports position samples to the backend and applies the
//! lock and alert commands that come back.

pub mod applier;
pub mod capability;
pub mod channel;
pub mod position;
pub mod status;
pub mod supervisor;

pub use applier::{ActuatorError, AlertActuator, ApplyOutcome, CommandApplier, LockActuator};
pub use capability::{
    required_capabilities, CapabilityKind, CapabilityProbe, CapabilitySet, Requirements,
};
pub use channel::{map_link, CommandChannel, CommandDirective, RetryPolicy, TelemetryReport};
pub use position::{
    LocationProvider, PositionError, PositionHandle, PositionSample, PositionSource,
    SampleCadence,
};
pub use status::{AgentStatus, OperatingMode};
pub use supervisor::{AgentContext, AgentSettings, AgentSupervisor};
