//! Shared mission handles
//!
//! Everything a navigation primitive needs, cloned into each component that
//! drives the vehicle.

use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::autopilot::FlightControl;
use crate::error::MissionError;
use crate::telemetry::{TelemetryMonitor, TelemetrySnapshot};

/// Where the vehicle was when it armed. Captured once, never updated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomeReference {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f64,
    pub yaw_deg: f64,
}

impl From<&TelemetrySnapshot> for HomeReference {
    fn from(snap: &TelemetrySnapshot) -> Self {
        Self {
            latitude_deg: snap.latitude_deg,
            longitude_deg: snap.longitude_deg,
            absolute_altitude_m: snap.absolute_altitude_m,
            yaw_deg: snap.yaw_deg,
        }
    }
}

#[derive(Clone)]
pub struct MissionContext {
    pub fc: Arc<dyn FlightControl>,
    pub telemetry: Arc<TelemetryMonitor>,
    pub home: Arc<OnceLock<HomeReference>>,
    pub cancel: CancellationToken,
}

impl MissionContext {
    pub fn new(fc: Arc<dyn FlightControl>, telemetry: Arc<TelemetryMonitor>) -> Self {
        Self {
            fc,
            telemetry,
            home: Arc::new(OnceLock::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn home(&self) -> Result<HomeReference, MissionError> {
        self.home.get().copied().ok_or(MissionError::HomeNotSet)
    }

    /// Record home from the current snapshot. A second capture keeps the first.
    pub async fn capture_home(&self) -> HomeReference {
        let snap = self.telemetry.snapshot().await;
        let candidate = HomeReference::from(&snap);
        let home = *self.home.get_or_init(|| candidate);
        if home != candidate {
            warn!("[MISSION] Home already captured, keeping the original");
        } else {
            info!(
                "[MISSION] Home: lat={:.7} lon={:.7} alt={:.2}m yaw={:.1}",
                home.latitude_deg, home.longitude_deg, home.absolute_altitude_m, home.yaw_deg
            );
        }
        home
    }
}
