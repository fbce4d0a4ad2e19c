//! Mission
//!
//! Phase ownership, launch and teardown, and the per-role mission flows.

pub mod context;
pub mod controller;
pub mod runner;

pub use context::{HomeReference, MissionContext};
pub use controller::{LaunchTimeouts, MissionController};
pub use runner::{MissionReport, MissionRole, MissionRunner};
