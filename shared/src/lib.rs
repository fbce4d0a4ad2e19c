//! Swarm Shared Protocol Types
//!
//! This crate provides the coordination wire codec and the mission phase
//! state machine shared by every vehicle taking part in a swarm mission.

pub mod codec;
pub mod state_machine;

pub use codec::{CodecError, LandingPoint, ProtocolCommand, ProtocolMessage};
pub use state_machine::{
    FailureReason, MissionEvent, MissionPhase, MissionStateMachine, TransitionResult,
};

/// Mission timing and retry parameters
pub mod params {
    /// Period of every closed-loop navigation tick
    pub const CONTROL_PERIOD_MS: u64 = 100;

    /// Wait for the flight controller link to come up
    pub const CONNECTION_TIMEOUT_MS: u64 = 20_000;

    /// Wait for global position and home position to be reported healthy
    pub const HEALTH_TIMEOUT_MS: u64 = 30_000;

    /// Wait for the vehicle to reach takeoff altitude
    pub const TAKEOFF_TIMEOUT_MS: u64 = 30_000;

    /// Fraction of the target altitude that counts as takeoff complete
    pub const TAKEOFF_ALTITUDE_FRACTION: f64 = 0.95;

    /// Interval between relative altitude polls during takeoff
    pub const TAKEOFF_POLL_MS: u64 = 500;

    /// Offboard start attempts before the mission is aborted
    pub const OFFBOARD_MAX_ATTEMPTS: u32 = 5;

    /// Backoff between offboard start attempts
    pub const OFFBOARD_RETRY_DELAY_MS: u64 = 1000;

    /// Transmission attempts for a landing point announcement
    pub const ANNOUNCE_MAX_ATTEMPTS: u32 = 10;

    /// Spacing between announcement transmission attempts
    pub const ANNOUNCE_RETRY_DELAY_MS: u64 = 100;

    /// Ceiling on the wait for an announcement acknowledgement
    pub const FEEDBACK_TIMEOUT_MS: u64 = 60_000;

    /// Inbound radio queue capacity (drop-oldest when full)
    pub const INBOUND_QUEUE_CAPACITY: usize = 100;

    /// Position beacon broadcast interval
    pub const BEACON_INTERVAL_MS: u64 = 5000;

    /// Peers silent for this long are dropped from the peer table
    pub const PEER_TIMEOUT_MS: u64 = 3 * BEACON_INTERVAL_MS;

    /// Age of the last position update that counts as a stalled link
    pub const STALE_TELEMETRY_TIMEOUT_MS: u64 = 5000;

    /// Telemetry watchdog check interval
    pub const WATCHDOG_INTERVAL_MS: u64 = 1000;
}
