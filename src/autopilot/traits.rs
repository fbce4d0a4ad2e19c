//! Flight controller trait abstraction
//!
//! The mission logic talks to the autopilot only through these two traits:
//! `FlightControl` for commands and `TelemetrySource` for streamed state.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors returned by flight controller commands
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FcError {
    #[error("{command} rejected by flight controller: {result}")]
    Rejected {
        command: &'static str,
        result: String,
    },

    #[error("No acknowledgement for {0}")]
    AckTimeout(&'static str),

    #[error("Flight controller link closed")]
    LinkClosed,
}

/// Velocity setpoint in the local NED frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityNedYaw {
    pub north_m_s: f64,
    pub east_m_s: f64,
    pub down_m_s: f64,
    pub yaw_deg: f64,
}

impl VelocityNedYaw {
    pub fn new(north_m_s: f64, east_m_s: f64, down_m_s: f64, yaw_deg: f64) -> Self {
        Self {
            north_m_s,
            east_m_s,
            down_m_s,
            yaw_deg,
        }
    }

    /// Zero velocity holding the given heading
    pub fn zero(yaw_deg: f64) -> Self {
        Self::new(0.0, 0.0, 0.0, yaw_deg)
    }

    pub fn horizontal_speed(&self) -> f64 {
        self.north_m_s.hypot(self.east_m_s)
    }

    pub fn is_zero(&self) -> bool {
        self.north_m_s == 0.0 && self.east_m_s == 0.0 && self.down_m_s == 0.0
    }
}

/// Position setpoint in the local NED frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionNedYaw {
    pub north_m: f64,
    pub east_m: f64,
    pub down_m: f64,
    pub yaw_deg: f64,
}

/// Global position sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSample {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f64,
    pub relative_altitude_m: f64,
}

/// Velocity sample in the NED frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocitySample {
    pub north_m_s: f64,
    pub east_m_s: f64,
    pub down_m_s: f64,
}

/// Attitude sample, degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AttitudeSample {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

/// Position estimate readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthSample {
    pub global_position_ok: bool,
    pub home_position_ok: bool,
}

impl HealthSample {
    pub fn ready_to_fly(&self) -> bool {
        self.global_position_ok && self.home_position_ok
    }
}

/// MAVLink severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Severity {
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Severity::Emergency,
            1 => Severity::Alert,
            2 => Severity::Critical,
            3 => Severity::Error,
            4 => Severity::Warning,
            5 => Severity::Notice,
            6 => Severity::Info,
            _ => Severity::Debug,
        }
    }

    /// EMERGENCY, ALERT, CRITICAL, ERROR
    pub fn is_fault(&self) -> bool {
        *self <= Severity::Error
    }
}

/// Status text reported by the autopilot
#[derive(Debug, Clone, PartialEq)]
pub struct StatusText {
    pub severity: Severity,
    pub text: String,
}

/// Commands accepted by the flight controller
#[async_trait]
pub trait FlightControl: Send + Sync {
    async fn arm(&self) -> Result<(), FcError>;

    /// Take off to an AMSL altitude
    async fn takeoff(&self, amsl_altitude_m: f64) -> Result<(), FcError>;

    async fn land(&self) -> Result<(), FcError>;

    /// Freeze the autopilot in its own position hold
    async fn hold(&self) -> Result<(), FcError>;

    async fn set_velocity_ned(&self, setpoint: VelocityNedYaw) -> Result<(), FcError>;

    async fn set_position_ned(&self, setpoint: PositionNedYaw) -> Result<(), FcError>;

    /// Hand control to the companion computer's setpoint stream
    async fn start_offboard(&self) -> Result<(), FcError>;

    async fn stop_offboard(&self) -> Result<(), FcError>;

    /// Human-readable name for this flight controller
    fn name(&self) -> &'static str;
}

/// Streaming telemetry from the flight controller.
///
/// Every call returns an independent stream that ends when the link is dropped.
pub trait TelemetrySource: Send + Sync {
    fn position(&self) -> BoxStream<'static, PositionSample>;

    fn velocity(&self) -> BoxStream<'static, VelocitySample>;

    fn attitude(&self) -> BoxStream<'static, AttitudeSample>;

    fn connection_state(&self) -> BoxStream<'static, bool>;

    fn health(&self) -> BoxStream<'static, HealthSample>;

    fn status_text(&self) -> BoxStream<'static, StatusText>;
}
