//! Mission error types

use std::time::Duration;
use swarm_shared::FailureReason;
use thiserror::Error;

use crate::autopilot::FcError;
use crate::coordination::RadioError;

/// Errors that end or interrupt a mission
#[derive(Error, Debug)]
pub enum MissionError {
    #[error("Flight controller did not connect within {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Position estimate not healthy within {0:?}")]
    HealthTimeout(Duration),

    #[error("Arm rejected: {0}")]
    ArmRejected(#[source] FcError),

    #[error("Takeoff timed out at {reached_m:.1}m of {target_m:.1}m")]
    TakeoffTimeout { reached_m: f64, target_m: f64 },

    #[error("Offboard mode refused after {attempts} attempts")]
    OffboardTransitionFailure { attempts: u32 },

    #[error("Home position has not been captured")]
    HomeNotSet,

    #[error("No position update for {0:?}")]
    TelemetryStale(Duration),

    #[error("Mission ended during launch")]
    Cancelled,

    #[error("Radio transmit failed: {0}")]
    RadioTransmit(#[from] RadioError),

    #[error("Flight controller error: {0}")]
    FlightController(#[from] FcError),
}

impl MissionError {
    /// The failure recorded in the mission phase, `None` for errors that are not fatal
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            MissionError::ConnectionTimeout(_) => Some(FailureReason::ConnectionTimeout),
            MissionError::HealthTimeout(_) => Some(FailureReason::HealthTimeout),
            MissionError::ArmRejected(_) => Some(FailureReason::ArmRejected),
            MissionError::TakeoffTimeout { .. } => Some(FailureReason::TakeoffTimeout),
            MissionError::OffboardTransitionFailure { .. } => {
                Some(FailureReason::OffboardTransitionFailure)
            }
            MissionError::TelemetryStale(_) => Some(FailureReason::TelemetryStale),
            MissionError::FlightController(_) => Some(FailureReason::FlightController),
            MissionError::HomeNotSet
            | MissionError::Cancelled
            | MissionError::RadioTransmit(_) => None,
        }
    }
}
