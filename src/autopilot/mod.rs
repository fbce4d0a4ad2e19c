//! Autopilot Bridge Module
//!
//! Provides integration with PX4 flight controllers via the MAVLink protocol.
//! Supports serial, UDP and TCP connections.

mod commands;
mod link;
mod telemetry;
mod traits;

pub use commands::{MavCommandSender, Px4Mode};
pub use link::{FcConfig, FcConnectionType, FcEvent, MavLink};
pub use telemetry::{log_mode_changes, MavlinkTelemetry};
pub use traits::{
    AttitudeSample, FcError, FlightControl, HealthSample, PositionNedYaw, PositionSample,
    Severity, StatusText, TelemetrySource, VelocityNedYaw, VelocitySample,
};
