//! Vision Servo Loop
//!
//! Searches for the landing marker, centres the vehicle over it with short
//! corrective bursts, then announces the spot to the swarm.
//!
//! A landing announcement from a peer interrupts every state.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use swarm_shared::LandingPoint;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::detector::MarkerDetector;
use crate::autopilot::VelocityNedYaw;
use crate::coordination::LandingHandshake;
use crate::error::MissionError;
use crate::navigation::{NavOutcome, NavigationEngine, SweepLeg};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServoParams {
    /// Largest normalized offset that counts as centred
    pub threshold: f64,
    /// m/s per unit of normalized offset
    pub gain: f64,
    pub burst_ms: u64,
    pub settle_ms: u64,
    /// Time without a detection before searching again
    pub lost_timeout_ms: u64,
    pub detector_poll_ms: u64,
    pub search_velocity_m_s: f64,
    /// Ceiling on the wait for a landing acknowledgement
    pub feedback_timeout_ms: u64,
}

impl Default for ServoParams {
    fn default() -> Self {
        Self {
            threshold: 0.015,
            gain: 0.4,
            burst_ms: 500,
            settle_ms: 500,
            lost_timeout_ms: 3000,
            detector_poll_ms: 100,
            search_velocity_m_s: 1.0,
            feedback_timeout_ms: swarm_shared::params::FEEDBACK_TIMEOUT_MS,
        }
    }
}

impl ServoParams {
    fn burst(&self) -> Duration {
        Duration::from_millis(self.burst_ms)
    }

    fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    fn lost_timeout(&self) -> Duration {
        Duration::from_millis(self.lost_timeout_ms)
    }

    fn poll(&self) -> Duration {
        Duration::from_millis(self.detector_poll_ms)
    }
}

/// How the servo loop ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoOutcome {
    /// Centred over the marker and announced it
    Confirmed {
        point: LandingPoint,
        acknowledged: bool,
    },
    /// The search pattern finished without a detection
    NotFound,
    /// A peer announced a landing point, or the mission was cancelled
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServoState {
    Searching,
    Centering,
    Confirmed,
}

enum Step {
    Next(ServoState),
    Finish(ServoOutcome),
}

/// Turn an image offset into a NED velocity at the given heading.
///
/// Image x points right and y points toward the tail, so the marker lies
/// `-y` ahead and `x` to the right.
pub fn body_correction(x: f64, y: f64, yaw_deg: f64, gain: f64) -> (f64, f64) {
    let forward = -y * gain;
    let right = x * gain;
    let (sin, cos) = yaw_deg.to_radians().sin_cos();
    (forward * cos - right * sin, forward * sin + right * cos)
}

pub struct VisionServoLoop {
    nav: NavigationEngine,
    detector: Arc<dyn MarkerDetector>,
    handshake: Arc<LandingHandshake>,
    params: ServoParams,
    sweep: Vec<SweepLeg>,
}

impl VisionServoLoop {
    pub fn new(
        nav: NavigationEngine,
        detector: Arc<dyn MarkerDetector>,
        handshake: Arc<LandingHandshake>,
        params: ServoParams,
        sweep: Vec<SweepLeg>,
    ) -> Self {
        Self {
            nav,
            detector,
            handshake,
            params,
            sweep,
        }
    }

    fn interrupted(&self) -> bool {
        self.handshake.landing_command_received() || self.nav.context().cancel.is_cancelled()
    }

    pub async fn run(&self) -> Result<ServoOutcome, MissionError> {
        let mut state = ServoState::Searching;
        loop {
            if self.interrupted() {
                info!("[VISION] Interrupted in {:?}", state);
                return Ok(ServoOutcome::Aborted);
            }
            debug!("[VISION] State {:?}", state);
            let step = match state {
                ServoState::Searching => self.search().await?,
                ServoState::Centering => self.center().await,
                ServoState::Confirmed => Step::Finish(self.confirm().await?),
            };
            match step {
                Step::Next(next) => state = next,
                Step::Finish(outcome) => return Ok(outcome),
            }
        }
    }

    async fn wait_for_detection(&self) {
        let mut ticker = interval(self.params.poll());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.detector.is_found() {
                return;
            }
        }
    }

    async fn search(&self) -> Result<Step, MissionError> {
        info!("[VISION] Searching over {} legs", self.sweep.len());
        let interrupt = self.handshake.interrupt();

        tokio::select! {
            _ = interrupt.cancelled() => Ok(Step::Finish(ServoOutcome::Aborted)),
            _ = self.wait_for_detection() => {
                info!("[VISION] Marker detected");
                self.stop().await;
                Ok(Step::Next(ServoState::Centering))
            }
            swept = self.nav.run_sweep(&self.sweep, self.params.search_velocity_m_s) => {
                match swept? {
                    NavOutcome::Completed => {
                        info!("[VISION] Search pattern finished without a detection");
                        Ok(Step::Finish(ServoOutcome::NotFound))
                    }
                    NavOutcome::Cancelled => Ok(Step::Finish(ServoOutcome::Aborted)),
                }
            }
        }
    }

    async fn stop(&self) {
        let yaw = self.nav.context().telemetry.snapshot().await.yaw_deg;
        if let Err(e) = self
            .nav
            .context()
            .fc
            .set_velocity_ned(VelocityNedYaw::zero(yaw))
            .await
        {
            warn!("[VISION] Stop setpoint not sent: {}", e);
        }
    }

    /// One burst toward the marker followed by a settle. `false` if interrupted.
    async fn correct(&self, x: f64, y: f64) -> bool {
        let yaw = self.nav.context().telemetry.snapshot().await.yaw_deg;
        let (north, east) = body_correction(x, y, yaw, self.params.gain);
        debug!(
            "[VISION] Offset ({:.3}, {:.3}) -> N {:.2} E {:.2}",
            x, y, north, east
        );

        let interrupt = self.handshake.interrupt();
        let burst = VelocityNedYaw::new(north, east, 0.0, yaw);
        let settle = VelocityNedYaw::zero(yaw);
        let outcome = tokio::select! {
            _ = interrupt.cancelled() => return false,
            outcome = async {
                match self.nav.hold_velocity(burst, self.params.burst()).await {
                    NavOutcome::Completed => {
                        self.nav.hold_velocity(settle, self.params.settle()).await
                    }
                    cancelled => cancelled,
                }
            } => outcome,
        };
        outcome == NavOutcome::Completed
    }

    async fn center(&self) -> Step {
        let mut lost_since: Option<Instant> = None;
        loop {
            if self.interrupted() {
                return Step::Finish(ServoOutcome::Aborted);
            }

            if !self.detector.is_found() {
                let since = *lost_since.get_or_insert_with(|| {
                    warn!("[VISION] Marker lost");
                    Instant::now()
                });
                if since.elapsed() >= self.params.lost_timeout() {
                    warn!("[VISION] Marker gone for {:?}, searching again", since.elapsed());
                    return Step::Next(ServoState::Searching);
                }
                let yaw = self.nav.context().telemetry.snapshot().await.yaw_deg;
                self.nav
                    .hold_velocity(VelocityNedYaw::zero(yaw), self.params.poll())
                    .await;
                continue;
            }
            if lost_since.take().is_some() {
                info!("[VISION] Marker reacquired");
            }

            let (x, y, _) = self.detector.averaged_offset();
            if x.abs().max(y.abs()) <= self.params.threshold {
                info!("[VISION] Centred at offset ({:.3}, {:.3})", x, y);
                return Step::Next(ServoState::Confirmed);
            }
            if !self.correct(x, y).await {
                return Step::Finish(ServoOutcome::Aborted);
            }
        }
    }

    async fn confirm(&self) -> Result<ServoOutcome, MissionError> {
        self.stop().await;
        let snap = self.nav.context().telemetry.snapshot().await;
        let point = LandingPoint::from_degrees(
            snap.latitude_deg,
            snap.longitude_deg,
            snap.absolute_altitude_m,
        );
        info!(
            "[VISION] Landing point {:.7},{:.7} at {:.1}m",
            snap.latitude_deg, snap.longitude_deg, snap.absolute_altitude_m
        );

        self.handshake.announce(point).await?;
        let acknowledged = self.wait_for_feedback().await;
        Ok(ServoOutcome::Confirmed {
            point,
            acknowledged,
        })
    }

    /// Keep centred until a peer acknowledges or the wait runs out
    async fn wait_for_feedback(&self) -> bool {
        let limit = Duration::from_millis(self.params.feedback_timeout_ms);
        let deadline = Instant::now() + limit;
        loop {
            if self.handshake.feedback_received() {
                info!("[VISION] Landing point acknowledged");
                return true;
            }
            if Instant::now() >= deadline {
                warn!("[VISION] No acknowledgement within {:?}, carrying on", limit);
                return false;
            }
            if self.nav.context().cancel.is_cancelled() {
                return false;
            }

            let (x, y, _) = self.detector.averaged_offset();
            if self.detector.is_found() && x.abs().max(y.abs()) > self.params.threshold {
                self.correct(x, y).await;
            } else {
                let yaw = self.nav.context().telemetry.snapshot().await.yaw_deg;
                self.nav
                    .hold_velocity(VelocityNedYaw::zero(yaw), self.params.poll())
                    .await;
            }
        }
    }
}
