//! Mission Controller
//!
//! Owns the mission phase and drives the vehicle from the ground to an
//! offboard-controlled hover, then back down again.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use swarm_shared::{params, MissionEvent, MissionPhase, MissionStateMachine, TransitionResult};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use super::context::MissionContext;
use crate::autopilot::{FlightControl, TelemetrySource, VelocityNedYaw};
use crate::error::MissionError;
use crate::navigation::{NavParams, NavigationEngine};
use crate::telemetry::{MonitorTimeouts, TelemetryMonitor};

/// Bounds and retry schedule for bringing the vehicle up
#[derive(Debug, Clone, Copy)]
pub struct LaunchTimeouts {
    pub monitor: MonitorTimeouts,
    pub takeoff: Duration,
    pub takeoff_poll: Duration,
    /// Fraction of the target altitude that counts as reached
    pub takeoff_altitude_fraction: f64,
    pub offboard_attempts: u32,
    pub offboard_backoff: Duration,
}

impl Default for LaunchTimeouts {
    fn default() -> Self {
        Self {
            monitor: MonitorTimeouts::default(),
            takeoff: Duration::from_millis(params::TAKEOFF_TIMEOUT_MS),
            takeoff_poll: Duration::from_millis(params::TAKEOFF_POLL_MS),
            takeoff_altitude_fraction: params::TAKEOFF_ALTITUDE_FRACTION,
            offboard_attempts: params::OFFBOARD_MAX_ATTEMPTS,
            offboard_backoff: Duration::from_millis(params::OFFBOARD_RETRY_DELAY_MS),
        }
    }
}

pub struct MissionController {
    ctx: MissionContext,
    fsm: Mutex<MissionStateMachine>,
    ending: AtomicBool,
    timeouts: LaunchTimeouts,
    nav_params: NavParams,
    target_altitude_m: OnceLock<f64>,
}

impl MissionController {
    pub fn new(
        fc: Arc<dyn FlightControl>,
        telemetry: Arc<TelemetryMonitor>,
        timeouts: LaunchTimeouts,
        nav_params: NavParams,
    ) -> Self {
        Self {
            ctx: MissionContext::new(fc, telemetry),
            fsm: Mutex::new(MissionStateMachine::new()),
            ending: AtomicBool::new(false),
            timeouts,
            nav_params,
            target_altitude_m: OnceLock::new(),
        }
    }

    pub fn context(&self) -> &MissionContext {
        &self.ctx
    }

    pub fn phase(&self) -> MissionPhase {
        self.fsm
            .lock()
            .map(|fsm| fsm.phase())
            .unwrap_or(MissionPhase::Disconnected)
    }

    /// A navigation engine cruising at the altitude given to `initialize_mission`
    pub fn navigation(&self) -> NavigationEngine {
        let altitude = self.target_altitude_m.get().copied().unwrap_or_default();
        NavigationEngine::new(self.ctx.clone(), self.nav_params.clone(), altitude)
    }

    fn transition(&self, event: MissionEvent) -> bool {
        let Ok(mut fsm) = self.fsm.lock() else {
            error!("[MISSION] Phase lock poisoned");
            return false;
        };
        match fsm.process_event(event) {
            TransitionResult::Success(phase) => {
                info!("[MISSION] Phase -> {:?}", phase);
                true
            }
            TransitionResult::Failed { from, reason } => {
                error!("[MISSION] {:?} -> Failed({:?})", from, reason);
                true
            }
            TransitionResult::Invalid { from, event } => {
                debug!("[MISSION] {:?} ignored in {:?}", event, from);
                false
            }
        }
    }

    /// Start the telemetry subscriptions and wait for a healthy link
    pub async fn connect(&self, source: Arc<dyn TelemetrySource>) -> Result<(), MissionError> {
        self.transition(MissionEvent::ConnectStarted);

        let monitor = self.timeouts.monitor;
        match self
            .guarded(self.ctx.telemetry.connect(source, monitor))
            .await
        {
            Ok(()) => {}
            Err(MissionError::Cancelled) => return Err(MissionError::Cancelled),
            Err(e) => return Err(self.fail(e).await),
        }

        self.transition(MissionEvent::LinkUp);
        Ok(())
    }

    /// Arm, capture home, take off, hold and hand over to offboard control.
    ///
    /// Returns `Cancelled` without touching the vehicle again if the mission
    /// starts ending part way through.
    pub async fn initialize_mission(&self, target_altitude_m: f64) -> Result<(), MissionError> {
        if self.target_altitude_m.set(target_altitude_m).is_err() {
            warn!("[MISSION] Mission already initialized");
        }

        match self.launch(target_altitude_m).await {
            Ok(()) => {
                info!("[MISSION] Offboard control active");
                Ok(())
            }
            Err(MissionError::Cancelled) => {
                warn!("[MISSION] Launch abandoned, mission is ending");
                Err(MissionError::Cancelled)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn launch(&self, target_altitude_m: f64) -> Result<(), MissionError> {
        info!("[MISSION] Arming...");
        self.guarded(async { self.ctx.fc.arm().await.map_err(MissionError::ArmRejected) })
            .await?;
        self.transition(MissionEvent::Armed);

        let home = self.ctx.capture_home().await;

        // MAV_CMD_NAV_TAKEOFF wants AMSL
        let takeoff_amsl_m = home.absolute_altitude_m + target_altitude_m;
        info!(
            "[MISSION] Taking off to {:.1}m ({:.1}m AMSL)",
            target_altitude_m, takeoff_amsl_m
        );
        self.guarded(async {
            self.ctx
                .fc
                .takeoff(takeoff_amsl_m)
                .await
                .map_err(MissionError::from)
        })
        .await?;
        self.transition(MissionEvent::TakeoffStarted);

        self.guarded(self.wait_for_altitude(target_altitude_m))
            .await?;

        match self
            .guarded(async { self.ctx.fc.hold().await.map_err(MissionError::from) })
            .await
        {
            Err(MissionError::Cancelled) => return Err(MissionError::Cancelled),
            Err(e) => warn!("[MISSION] Hold not confirmed: {}", e),
            Ok(()) => {}
        }
        self.transition(MissionEvent::TakeoffComplete);

        self.transition(MissionEvent::OffboardRequested);
        self.start_offboard(home.yaw_deg).await?;
        self.transition(MissionEvent::OffboardStarted);
        Ok(())
    }

    fn is_ending(&self) -> bool {
        self.ending.load(Ordering::SeqCst) || self.ctx.cancel.is_cancelled()
    }

    /// Run one launch step unless the mission is ending, and abandon it as
    /// soon as the mission starts ending.
    async fn guarded<T, F>(&self, step: F) -> Result<T, MissionError>
    where
        F: Future<Output = Result<T, MissionError>>,
    {
        if self.is_ending() {
            return Err(MissionError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(MissionError::Cancelled),
            result = step => result,
        }
    }

    async fn wait_for_altitude(&self, target_m: f64) -> Result<(), MissionError> {
        let threshold = target_m * self.timeouts.takeoff_altitude_fraction;
        let deadline = Instant::now() + self.timeouts.takeoff;
        let mut ticker = interval(self.timeouts.takeoff_poll);
        loop {
            ticker.tick().await;
            let reached = self.ctx.telemetry.snapshot().await.relative_altitude_m;
            debug!("[MISSION] Climbing: {:.1}m / {:.1}m", reached, target_m);
            if reached >= threshold {
                info!("[MISSION] Reached {:.1}m", reached);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MissionError::TakeoffTimeout {
                    reached_m: reached,
                    target_m,
                });
            }
        }
    }

    async fn start_offboard(&self, yaw_deg: f64) -> Result<(), MissionError> {
        let attempts = self.timeouts.offboard_attempts;
        for attempt in 1..=attempts {
            if self.is_ending() {
                return Err(MissionError::Cancelled);
            }
            // PX4 refuses offboard without a setpoint already streaming
            if let Err(e) = self.ctx.fc.set_velocity_ned(VelocityNedYaw::zero(yaw_deg)).await {
                warn!("[MISSION] Initial setpoint not sent: {}", e);
            }
            let result = self
                .guarded(async { self.ctx.fc.start_offboard().await.map_err(MissionError::from) })
                .await;
            match result {
                Ok(()) => {
                    info!("[MISSION] Offboard started on attempt {}", attempt);
                    return Ok(());
                }
                Err(MissionError::Cancelled) => return Err(MissionError::Cancelled),
                Err(e) => {
                    warn!("[MISSION] Offboard attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        let backoff = self.timeouts.offboard_backoff;
                        self.guarded(async {
                            tokio::time::sleep(backoff).await;
                            Ok(())
                        })
                        .await?;
                    }
                }
            }
        }
        Err(MissionError::OffboardTransitionFailure { attempts })
    }

    /// Record a fatal error, bring the vehicle down and hand the error back
    pub async fn fail(&self, err: MissionError) -> MissionError {
        error!("[MISSION] Fatal: {}", err);
        if let Some(reason) = err.failure_reason() {
            self.transition(MissionEvent::Fault(reason));
        }
        if self.ending.swap(true, Ordering::SeqCst) {
            return err;
        }

        self.teardown().await;
        err
    }

    /// Stop offboard control and land. Only the first call does anything.
    pub async fn end_mission(&self) {
        if self.ending.swap(true, Ordering::SeqCst) {
            debug!("[MISSION] Mission already ending");
            return;
        }
        info!("[MISSION] Ending mission");

        self.transition(MissionEvent::LandingStarted);
        self.teardown().await;
        self.transition(MissionEvent::Landed);
    }

    /// Cancel every loop, stop telemetry, leave offboard, then land
    async fn teardown(&self) {
        self.ctx.cancel.cancel();
        self.ctx.telemetry.stop();

        if let Err(e) = self.ctx.fc.stop_offboard().await {
            warn!("[MISSION] Stop offboard failed: {}", e);
        }
        match self.ctx.fc.land().await {
            Ok(()) => info!("[MISSION] Landing"),
            Err(e) => error!("[MISSION] Land not accepted: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimVehicle;
    use swarm_shared::FailureReason;

    fn controller(sim: &Arc<SimVehicle>) -> Arc<MissionController> {
        Arc::new(MissionController::new(
            sim.clone(),
            Arc::new(TelemetryMonitor::new()),
            LaunchTimeouts::default(),
            NavParams::default(),
        ))
    }

    async fn connected(sim: &Arc<SimVehicle>) -> Arc<MissionController> {
        let controller = controller(sim);
        controller.connect(sim.clone()).await.expect("connect");
        assert_eq!(controller.phase(), MissionPhase::AwaitingHealth);
        controller
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_reaches_active() {
        let sim = SimVehicle::new(47.397742, 8.545594, 488.0);
        let controller = connected(&sim).await;

        controller.initialize_mission(10.0).await.expect("initialize");

        assert_eq!(controller.phase(), MissionPhase::Active);
        assert_eq!(sim.offboard_attempts(), 1);
        let home = controller.context().home().expect("home");
        assert_eq!(home.absolute_altitude_m, 488.0);
        assert_eq!(sim.takeoff_amsl(), Some(498.0));
        assert_eq!(
            sim.calls(),
            vec!["arm", "takeoff", "hold", "start_offboard"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_offboard_succeeds_on_fifth_attempt() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        sim.reject_offboard(4);
        let controller = connected(&sim).await;

        let started = Instant::now();
        controller.initialize_mission(10.0).await.expect("initialize");

        assert_eq!(sim.offboard_attempts(), 5);
        assert_eq!(controller.phase(), MissionPhase::Active);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(sim.land_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offboard_gives_up_after_five_attempts() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        sim.reject_offboard(u32::MAX);
        let controller = connected(&sim).await;

        let err = controller.initialize_mission(10.0).await.unwrap_err();

        assert!(matches!(
            err,
            MissionError::OffboardTransitionFailure { attempts: 5 }
        ));
        assert_eq!(sim.offboard_attempts(), 5);
        assert_eq!(
            controller.phase(),
            MissionPhase::Failed(FailureReason::OffboardTransitionFailure)
        );
        assert_eq!(sim.land_calls(), 1);
        assert!(controller.context().cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_rejected_is_fatal() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        sim.reject_arm();
        let controller = connected(&sim).await;

        let err = controller.initialize_mission(10.0).await.unwrap_err();
        assert!(matches!(err, MissionError::ArmRejected(_)));
        assert!(controller.context().home().is_err());
        assert_eq!(sim.land_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_takeoff_timeout() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        sim.stall_takeoff();
        let controller = connected(&sim).await;

        let started = Instant::now();
        let err = controller.initialize_mission(10.0).await.unwrap_err();

        assert!(matches!(err, MissionError::TakeoffTimeout { target_m, .. } if target_m == 10.0));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(
            controller.phase(),
            MissionPhase::Failed(FailureReason::TakeoffTimeout)
        );
        assert_eq!(sim.offboard_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_timeout_is_fatal() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        sim.set_connected(false);
        let controller = controller(&sim);

        let err = controller.connect(sim.clone()).await.unwrap_err();
        assert!(matches!(err, MissionError::ConnectionTimeout(_)));
        assert_eq!(
            controller.phase(),
            MissionPhase::Failed(FailureReason::ConnectionTimeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_end_mission_lands_once() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let controller = connected(&sim).await;
        controller.initialize_mission(10.0).await.expect("initialize");

        let a = controller.clone();
        let b = controller.clone();
        tokio::join!(a.end_mission(), b.end_mission());
        controller.end_mission().await;

        assert_eq!(sim.land_calls(), 1);
        assert_eq!(controller.phase(), MissionPhase::Terminated);

        let calls = sim.calls();
        let stop = calls.iter().position(|c| *c == "stop_offboard").expect("stop");
        let land = calls.iter().position(|c| *c == "land").expect("land");
        assert!(stop < land);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_leaves_offboard_before_landing() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let controller = connected(&sim).await;
        controller.initialize_mission(10.0).await.expect("initialize");

        let err = controller
            .fail(MissionError::TelemetryStale(Duration::from_secs(6)))
            .await;
        controller.end_mission().await;

        assert!(matches!(err, MissionError::TelemetryStale(_)));
        assert_eq!(
            controller.phase(),
            MissionPhase::Failed(FailureReason::TelemetryStale)
        );
        assert_eq!(sim.land_calls(), 1);
        assert_eq!(
            sim.calls(),
            vec!["arm", "takeoff", "hold", "start_offboard", "stop_offboard", "land"]
        );

        // Subscriptions are gone, so the snapshot no longer follows the vehicle
        sim.teleport(47.01, 8.01);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let snap = controller.context().telemetry.snapshot().await;
        assert_eq!(snap.latitude_deg, 47.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_during_offboard_retries_stops_launch() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        sim.reject_offboard(2);
        let controller = connected(&sim).await;

        let ender = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            ender.end_mission().await;
        });

        let err = controller.initialize_mission(10.0).await.unwrap_err();
        assert!(matches!(err, MissionError::Cancelled));

        // Nothing is commanded after the landing
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            sim.calls(),
            vec![
                "arm",
                "takeoff",
                "hold",
                "start_offboard",
                "start_offboard",
                "stop_offboard",
                "land"
            ]
        );
        assert_eq!(sim.offboard_attempts(), 2);
        assert_eq!(controller.phase(), MissionPhase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_during_climb_skips_offboard() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        sim.stall_takeoff();
        let controller = connected(&sim).await;

        let ender = controller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ender.end_mission().await;
        });

        let started = Instant::now();
        let err = controller.initialize_mission(10.0).await.unwrap_err();

        assert!(matches!(err, MissionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(sim.offboard_attempts(), 0);
        assert_eq!(sim.land_calls(), 1);
        assert_eq!(controller.phase(), MissionPhase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_after_failure_does_not_land_again() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        sim.reject_offboard(u32::MAX);
        let controller = connected(&sim).await;

        let _ = controller.initialize_mission(10.0).await;
        controller.end_mission().await;

        assert_eq!(sim.land_calls(), 1);
        assert!(controller.phase().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_uses_target_altitude() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let controller = connected(&sim).await;
        controller.initialize_mission(12.0).await.expect("initialize");

        let nav = controller.navigation();
        nav.move_forward(5.0, 2.0, 0.0).await.expect("move");

        // Already at cruise altitude, so no vertical correction
        let log = sim.velocity_log();
        assert!(log.iter().skip(1).all(|v| v.down_m_s.abs() < 1e-9));
    }
}
