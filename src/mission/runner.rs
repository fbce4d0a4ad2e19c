//! Mission Runner
//!
//! Ties one flight together: opens the radio, brings the vehicle up, flies
//! the configured role under the telemetry watchdog and always ends by
//! landing.

use serde::Deserialize;
use std::sync::Arc;
use swarm_shared::LandingPoint;
use tracing::{error, info, warn};

use super::controller::MissionController;
use crate::autopilot::TelemetrySource;
use crate::config::PilotConfig;
use crate::coordination::{run_beacon, CoordinationChannel, LandingHandshake};
use crate::error::MissionError;
use crate::navigation::{
    coverage_sweep, square_wave_path, NavOutcome, NavigationEngine, NavigationTarget,
};
use crate::safety::{TelemetryWatchdog, WatchdogAction};
use crate::vision::{MarkerDetector, ServoOutcome, VisionServoLoop};

/// What this vehicle does once airborne
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionRole {
    /// Sweep the search area, centre on the marker and announce it
    #[default]
    Searcher,
    /// Wait on the ground for an announcement, then fly to it
    Follower,
    /// Fly the configured waypoints
    Waypoints,
    /// Fly a square wave from home
    SquareWave,
}

/// How the flight went
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissionReport {
    Searched(ServoOutcome),
    Followed { arrived: bool },
    Flown(NavOutcome),
}

pub struct MissionRunner {
    controller: Arc<MissionController>,
    source: Arc<dyn TelemetrySource>,
    channel: CoordinationChannel,
    handshake: Arc<LandingHandshake>,
    detector: Arc<dyn MarkerDetector>,
    config: PilotConfig,
}

impl MissionRunner {
    pub fn new(
        controller: Arc<MissionController>,
        source: Arc<dyn TelemetrySource>,
        channel: CoordinationChannel,
        detector: Arc<dyn MarkerDetector>,
        config: PilotConfig,
    ) -> Self {
        let handshake = LandingHandshake::new(channel.sender())
            .with_telemetry(controller.context().telemetry.clone())
            .with_retry(config.timeouts.announce_retry());
        Self {
            controller,
            source,
            channel,
            handshake: Arc::new(handshake),
            detector,
            config,
        }
    }

    pub fn handshake(&self) -> Arc<LandingHandshake> {
        self.handshake.clone()
    }

    /// Fly the mission. The vehicle is landed before this returns.
    pub async fn run(&self) -> Result<MissionReport, MissionError> {
        self.channel.open(self.handshake.clone())?;
        info!(
            "[MISSION] {} flying as {:?}",
            self.config.node.id, self.config.node.role
        );

        let result = self.fly().await;
        match &result {
            Ok(report) => info!("[MISSION] Finished: {:?}", report),
            Err(MissionError::Cancelled) => info!("[MISSION] Ended before launch completed"),
            Err(e) => error!("[MISSION] Finished with error: {}", e),
        }

        self.controller.end_mission().await;
        self.channel.close();
        result
    }

    async fn fly(&self) -> Result<MissionReport, MissionError> {
        let cancel = self.controller.context().cancel.clone();

        let announced = if self.config.node.role == MissionRole::Follower {
            info!("[MISSION] Waiting on the ground for a landing point");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(MissionReport::Followed { arrived: false }),
                point = self.handshake.wait_for_landing_command() => point,
            }
        } else {
            None
        };

        self.controller.connect(self.source.clone()).await?;
        self.controller
            .initialize_mission(self.config.mission.target_altitude_m)
            .await?;

        let watchdog =
            TelemetryWatchdog::new(self.controller.clone(), self.config.timeouts.watchdog());
        let _watchdog = watchdog.start_monitoring(cancel.child_token());
        let beacon = self.config.mission.beacon.then(|| {
            tokio::spawn(run_beacon(
                self.channel.sender(),
                self.controller.context().telemetry.clone(),
                self.config.timeouts.beacon_interval(),
                cancel.child_token(),
            ))
        });

        let result = tokio::select! {
            report = self.fly_role(announced) => report,
            Some(action) = watchdog.recv_action() => {
                let WatchdogAction::TelemetryStale { age } = action;
                Err(self.controller.fail(MissionError::TelemetryStale(age)).await)
            }
        };

        if let Some(beacon) = beacon {
            beacon.abort();
        }
        result
    }

    async fn fly_role(
        &self,
        announced: Option<LandingPoint>,
    ) -> Result<MissionReport, MissionError> {
        let nav = self.controller.navigation();
        let mission = &self.config.mission;

        match self.config.node.role {
            MissionRole::Searcher => self.search(nav).await,
            MissionRole::Follower => match announced {
                Some(point) => Ok(MissionReport::Followed {
                    arrived: self.approach_point(&nav, point).await?,
                }),
                None => Ok(MissionReport::Followed { arrived: false }),
            },
            MissionRole::Waypoints => Ok(MissionReport::Flown(
                nav.follow_waypoints(&mission.waypoints).await?,
            )),
            MissionRole::SquareWave => {
                let home = self.controller.context().home()?;
                let path = square_wave_path(
                    home.latitude_deg,
                    home.longitude_deg,
                    &mission.square_wave,
                    mission.target_altitude_m,
                    mission.cruise_speed_m_s,
                );
                info!("[MISSION] Square wave with {} waypoints", path.len());
                Ok(MissionReport::Flown(nav.follow_waypoints(&path).await?))
            }
        }
    }

    async fn search(&self, nav: NavigationEngine) -> Result<MissionReport, MissionError> {
        let mission = &self.config.mission;

        let sweep = match &mission.search_area {
            Some(area) => {
                let (lat, lon) = area.corners[0];
                let start = self.cruise_target(lat, lon);
                if nav.approach_position(&start).await? == NavOutcome::Cancelled {
                    return Ok(MissionReport::Searched(ServoOutcome::Aborted));
                }
                coverage_sweep(area, mission.camera.lane_spacing(mission.target_altitude_m))
            }
            None => {
                warn!("[MISSION] No search area configured");
                Vec::new()
            }
        };

        let servo = VisionServoLoop::new(
            self.controller.navigation(),
            self.detector.clone(),
            self.handshake.clone(),
            self.config.vision.servo.clone(),
            sweep,
        );
        let outcome = servo.run().await?;

        if outcome == ServoOutcome::Aborted && mission.follow_announced {
            if let Some(point) = self.handshake.announced_point() {
                self.approach_point(&nav, point).await?;
            }
        }
        Ok(MissionReport::Searched(outcome))
    }

    fn cruise_target(&self, lat: f64, lon: f64) -> NavigationTarget {
        NavigationTarget {
            latitude_deg: lat,
            longitude_deg: lon,
            altitude_m: self.config.mission.target_altitude_m,
            hold_time: std::time::Duration::ZERO,
            max_speed_m_s: self.config.mission.cruise_speed_m_s,
        }
    }

    /// Fly to an announced point at cruise altitude. `false` if it took too long.
    async fn approach_point(
        &self,
        nav: &NavigationEngine,
        point: LandingPoint,
    ) -> Result<bool, MissionError> {
        let target = self.cruise_target(point.latitude_deg(), point.longitude_deg());
        let limit = self.config.timeouts.follow();
        info!(
            "[MISSION] Following to {:.6},{:.6}",
            target.latitude_deg, target.longitude_deg
        );

        match tokio::time::timeout(limit, nav.approach_position(&target)).await {
            Ok(outcome) => Ok(outcome? == NavOutcome::Completed),
            Err(_) => {
                warn!("[MISSION] Did not reach the landing point within {:?}", limit);
                Ok(false)
            }
        }
    }
}
