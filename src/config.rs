//! Pilot configuration
//!
//! Loaded from the TOML file named by `SWARM_PILOT_CONFIG`. Every key is
//! optional; anything missing takes the default below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use swarm_shared::params;
use thiserror::Error;

use crate::autopilot::FcConfig;
use crate::coordination::AnnounceRetry;
use crate::mission::{LaunchTimeouts, MissionRole};
use crate::navigation::{NavParams, NavigationTarget, SearchArea, SquareWave};
use crate::safety::WatchdogConfig;
use crate::telemetry::MonitorTimeouts;
use crate::vision::{CameraModel, ServoParams};

/// Environment variable holding the config file path
pub const CONFIG_ENV: &str = "SWARM_PILOT_CONFIG";

/// A config value that parses but cannot be flown
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub node: NodeConfig,
    pub flight_controller: FcConfig,
    pub radio: RadioConfig,
    pub mission: MissionConfig,
    pub timeouts: TimeoutConfig,
    pub navigation: NavParams,
    pub vision: VisionConfig,
}

impl PilotConfig {
    /// Read the file named by `SWARM_PILOT_CONFIG`, or use defaults when unset
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                let path = std::path::PathBuf::from(path);
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("read config {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("parse config {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("invalid pilot config")?;
        config.validate().context("invalid pilot config")?;
        Ok(config)
    }

    /// Reject periods that would drive a zero-length ticker
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("navigation.control_period_ms", self.navigation.control_period_ms),
            ("timeouts.takeoff_poll_ms", self.timeouts.takeoff_poll_ms),
            ("timeouts.beacon_interval_ms", self.timeouts.beacon_interval_ms),
            ("timeouts.watchdog_interval_ms", self.timeouts.watchdog_interval_ms),
            ("vision.servo.detector_poll_ms", self.vision.servo.detector_poll_ms),
        ];
        match periods.into_iter().find(|(_, ms)| *ms == 0) {
            Some((name, _)) => Err(ConfigError::ZeroPeriod(name)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Radio address of this vehicle
    pub id: String,
    pub role: MissionRole,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "drone-1".into(),
            role: MissionRole::default(),
        }
    }
}

/// Radio link to the rest of the swarm
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RadioConfig {
    Udp { bind: String, peers: Vec<String> },
    Serial { port: String, baud: u32 },
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig::Udp {
            bind: "0.0.0.0:14600".into(),
            peers: vec!["127.0.0.1:14601".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// Cruise altitude relative to home
    pub target_altitude_m: f64,
    pub cruise_speed_m_s: f64,
    /// Flown in order by the waypoints role
    pub waypoints: Vec<NavigationTarget>,
    pub square_wave: SquareWave,
    /// Searcher sweep area. Without one the search ends as soon as it starts.
    pub search_area: Option<SearchArea>,
    pub camera: CameraModel,
    /// Searcher flies to a peer's landing point when interrupted by one
    pub follow_announced: bool,
    pub beacon: bool,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            target_altitude_m: 10.0,
            cruise_speed_m_s: 5.0,
            waypoints: Vec::new(),
            square_wave: SquareWave::default(),
            search_area: None,
            camera: CameraModel::default(),
            follow_announced: false,
            beacon: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connection_ms: u64,
    pub health_ms: u64,
    pub takeoff_ms: u64,
    pub takeoff_poll_ms: u64,
    pub takeoff_altitude_fraction: f64,
    pub offboard_attempts: u32,
    pub offboard_backoff_ms: u64,
    pub announce_attempts: u32,
    pub announce_delay_ms: u64,
    /// Follower's bound on reaching the announced point
    pub follow_ms: u64,
    pub beacon_interval_ms: u64,
    pub stale_telemetry_ms: u64,
    pub watchdog_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connection_ms: params::CONNECTION_TIMEOUT_MS,
            health_ms: params::HEALTH_TIMEOUT_MS,
            takeoff_ms: params::TAKEOFF_TIMEOUT_MS,
            takeoff_poll_ms: params::TAKEOFF_POLL_MS,
            takeoff_altitude_fraction: params::TAKEOFF_ALTITUDE_FRACTION,
            offboard_attempts: params::OFFBOARD_MAX_ATTEMPTS,
            offboard_backoff_ms: params::OFFBOARD_RETRY_DELAY_MS,
            announce_attempts: params::ANNOUNCE_MAX_ATTEMPTS,
            announce_delay_ms: params::ANNOUNCE_RETRY_DELAY_MS,
            follow_ms: 120_000,
            beacon_interval_ms: params::BEACON_INTERVAL_MS,
            stale_telemetry_ms: params::STALE_TELEMETRY_TIMEOUT_MS,
            watchdog_interval_ms: params::WATCHDOG_INTERVAL_MS,
        }
    }
}

impl TimeoutConfig {
    pub fn launch(&self) -> LaunchTimeouts {
        LaunchTimeouts {
            monitor: MonitorTimeouts {
                connection: Duration::from_millis(self.connection_ms),
                health: Duration::from_millis(self.health_ms),
            },
            takeoff: Duration::from_millis(self.takeoff_ms),
            takeoff_poll: Duration::from_millis(self.takeoff_poll_ms),
            takeoff_altitude_fraction: self.takeoff_altitude_fraction,
            offboard_attempts: self.offboard_attempts,
            offboard_backoff: Duration::from_millis(self.offboard_backoff_ms),
        }
    }

    pub fn announce_retry(&self) -> AnnounceRetry {
        AnnounceRetry {
            max_attempts: self.announce_attempts,
            delay: Duration::from_millis(self.announce_delay_ms),
        }
    }

    pub fn watchdog(&self) -> WatchdogConfig {
        WatchdogConfig {
            check_interval: Duration::from_millis(self.watchdog_interval_ms),
            stale_timeout: Duration::from_millis(self.stale_telemetry_ms),
        }
    }

    pub fn follow(&self) -> Duration {
        Duration::from_millis(self.follow_ms)
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub servo: ServoParams,
    /// Where the detection process sends its readings
    pub feed_address: String,
    /// Readings older than this count as "not found"
    pub reading_max_age_ms: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            servo: ServoParams::default(),
            feed_address: "127.0.0.1:5005".into(),
            reading_max_age_ms: 1000,
        }
    }
}
