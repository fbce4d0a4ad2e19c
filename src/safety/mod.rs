//! Safety Module
//!
//! Watches telemetry freshness while the vehicle is airborne and reports
//! when the link has gone quiet for too long.

mod monitor;

pub use monitor::{TelemetryWatchdog, WatchdogAction, WatchdogConfig, WatchdogHandle};
