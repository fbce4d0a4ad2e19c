//! Telemetry Module
//!
//! Keeps the latest flight controller state for the rest of the mission.

mod monitor;

pub use monitor::{MonitorTimeouts, TelemetryMonitor, TelemetrySnapshot};
