//! Navigation Engine
//!
//! Closed-loop movement primitives. Every primitive ticks at the control
//! period, sends one velocity setpoint per tick and returns early when the
//! mission is cancelled.

use serde::Deserialize;
use std::time::Duration;
use swarm_shared::params;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::geodesy;
use crate::autopilot::VelocityNedYaw;
use crate::error::MissionError;
use crate::mission::{HomeReference, MissionContext};

/// Tunables for the navigation control law
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavParams {
    pub control_period_ms: u64,
    /// Proportional gain on altitude error
    pub vertical_gain: f64,
    /// Clamp on the vertical velocity command, m/s
    pub max_vertical_speed: f64,
    /// moveForward stops when this close to the end of the leg
    pub forward_arrival_m: f64,
    /// Fraction of the requested speed once the remaining distance drops below it
    pub slow_approach_fraction: f64,
    /// approachPosition stops when this close to the target
    pub approach_arrival_m: f64,
    /// Ceiling on approachPosition speed
    pub max_approach_speed: f64,
    /// Pause between waypoints
    pub waypoint_pause_ms: u64,
}

impl Default for NavParams {
    fn default() -> Self {
        Self {
            control_period_ms: params::CONTROL_PERIOD_MS,
            vertical_gain: 0.85,
            max_vertical_speed: 2.0,
            forward_arrival_m: 1.0,
            slow_approach_fraction: 0.3,
            approach_arrival_m: 0.5,
            max_approach_speed: 20.0,
            waypoint_pause_ms: 200,
        }
    }
}

impl NavParams {
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }
}

/// A global position to fly to. `altitude_m` is relative to home.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NavigationTarget {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
    #[serde(default, with = "seconds")]
    pub hold_time: Duration,
    pub max_speed_m_s: f64,
}

/// One straight leg of a sweep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepLeg {
    pub distance_m: f64,
    pub bearing_deg: f64,
}

/// How a primitive ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    Completed,
    Cancelled,
}

/// Horizontal speed for moveForward given how much of the leg is left
pub fn forward_speed(remaining_m: f64, requested_m_s: f64, params: &NavParams) -> f64 {
    if remaining_m <= params.forward_arrival_m {
        0.0
    } else if remaining_m > requested_m_s {
        requested_m_s
    } else {
        requested_m_s * params.slow_approach_fraction
    }
}

/// Fraction of the approach speed to use at a given distance from the target
pub fn approach_speed_factor(remaining_m: f64) -> f64 {
    if remaining_m > 5.0 {
        1.0
    } else if remaining_m > 2.0 {
        0.5
    } else {
        0.2
    }
}

/// Down velocity that servos toward the target absolute altitude
pub fn vertical_command(target_alt_m: f64, current_alt_m: f64, params: &NavParams) -> f64 {
    let down = params.vertical_gain * (current_alt_m - target_alt_m);
    down.clamp(-params.max_vertical_speed, params.max_vertical_speed)
}

pub struct NavigationEngine {
    ctx: MissionContext,
    params: NavParams,
    /// Cruise altitude relative to home
    target_altitude_m: f64,
}

impl NavigationEngine {
    pub fn new(ctx: MissionContext, params: NavParams, target_altitude_m: f64) -> Self {
        Self {
            ctx,
            params,
            target_altitude_m,
        }
    }

    pub fn params(&self) -> &NavParams {
        &self.params
    }

    pub fn context(&self) -> &MissionContext {
        &self.ctx
    }

    fn ticker(&self) -> Interval {
        let mut ticker = interval(self.params.control_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Wait for the next tick. `false` means the mission was cancelled.
    async fn tick(&self, ticker: &mut Interval) -> bool {
        tokio::select! {
            _ = self.ctx.cancel.cancelled() => false,
            _ = ticker.tick() => true,
        }
    }

    async fn send(&self, setpoint: VelocityNedYaw) {
        if let Err(e) = self.ctx.fc.set_velocity_ned(setpoint).await {
            warn!("[NAV] Setpoint not sent: {}", e);
        }
    }

    fn cruise_altitude(&self, home: &HomeReference) -> f64 {
        home.absolute_altitude_m + self.target_altitude_m
    }

    /// Command zero velocity at `yaw_deg` for `duration`
    pub async fn hold_position(&self, duration: Duration, yaw_deg: f64) -> NavOutcome {
        debug!("[NAV] Holding {:?} at yaw {:.1}", duration, yaw_deg);
        self.hold_velocity(VelocityNedYaw::zero(yaw_deg), duration).await
    }

    /// Repeat one setpoint every tick for `duration`
    pub async fn hold_velocity(&self, setpoint: VelocityNedYaw, duration: Duration) -> NavOutcome {
        let deadline = Instant::now() + duration;
        let mut ticker = self.ticker();
        while Instant::now() < deadline {
            if !self.tick(&mut ticker).await {
                return NavOutcome::Cancelled;
            }
            self.send(setpoint).await;
        }
        NavOutcome::Completed
    }

    /// Fly `distance_m` along `yaw_deg` at up to `velocity_m_s`, holding cruise altitude
    pub async fn move_forward(
        &self,
        distance_m: f64,
        velocity_m_s: f64,
        yaw_deg: f64,
    ) -> Result<NavOutcome, MissionError> {
        let home = self.ctx.home()?;
        let start = self.ctx.telemetry.snapshot().await;
        let target_alt = self.cruise_altitude(&home);
        info!(
            "[NAV] Forward {:.1}m at {:.1}m/s, bearing {:.1}",
            distance_m, velocity_m_s, yaw_deg
        );

        let mut ticker = self.ticker();
        loop {
            if !self.tick(&mut ticker).await {
                return Ok(NavOutcome::Cancelled);
            }

            let snap = self.ctx.telemetry.snapshot().await;
            let travelled = geodesy::distance_and_bearing(
                start.latitude_deg,
                start.longitude_deg,
                snap.latitude_deg,
                snap.longitude_deg,
            )
            .total_m;
            let remaining = distance_m - travelled;
            let speed = forward_speed(remaining, velocity_m_s, &self.params);

            if speed == 0.0 {
                self.send(VelocityNedYaw::zero(yaw_deg)).await;
                debug!("[NAV] Leg done, {:.2}m short", remaining);
                return Ok(NavOutcome::Completed);
            }

            let (north, east) = geodesy::vector_from_polar(speed, yaw_deg);
            let down = vertical_command(target_alt, snap.absolute_altitude_m, &self.params);
            debug!(
                "[NAV] remaining={:.2}m speed={:.2} down={:.2}",
                remaining, speed, down
            );
            self.send(VelocityNedYaw::new(north, east, down, yaw_deg)).await;
        }
    }

    /// Fly to an absolute position, then hold there for the target's hold time
    pub async fn approach_position(
        &self,
        target: &NavigationTarget,
    ) -> Result<NavOutcome, MissionError> {
        let home = self.ctx.home()?;
        let target_alt = home.absolute_altitude_m + target.altitude_m;
        let max_speed = target.max_speed_m_s.min(self.params.max_approach_speed);
        info!(
            "[NAV] Approaching {:.7},{:.7} at up to {:.1}m/s",
            target.latitude_deg, target.longitude_deg, max_speed
        );

        let mut bearing = self.ctx.telemetry.snapshot().await.yaw_deg;
        let mut ticker = self.ticker();
        loop {
            if !self.tick(&mut ticker).await {
                return Ok(NavOutcome::Cancelled);
            }

            let snap = self.ctx.telemetry.snapshot().await;
            let offset = geodesy::distance_and_bearing(
                snap.latitude_deg,
                snap.longitude_deg,
                target.latitude_deg,
                target.longitude_deg,
            );

            if offset.total_m <= self.params.approach_arrival_m {
                self.send(VelocityNedYaw::zero(bearing)).await;
                info!("[NAV] Arrived within {:.2}m", offset.total_m);
                break;
            }

            bearing = offset.bearing_deg;
            let speed = max_speed * approach_speed_factor(offset.total_m);
            let scale = speed / offset.total_m;
            let down = vertical_command(target_alt, snap.absolute_altitude_m, &self.params);
            self.send(VelocityNedYaw::new(
                offset.north_m * scale,
                offset.east_m * scale,
                down,
                bearing,
            ))
            .await;
        }

        Ok(self.hold_position(target.hold_time, bearing).await)
    }

    /// Visit each target in order
    pub async fn follow_waypoints(
        &self,
        targets: &[NavigationTarget],
    ) -> Result<NavOutcome, MissionError> {
        let pause = Duration::from_millis(self.params.waypoint_pause_ms);
        for (i, target) in targets.iter().enumerate() {
            info!("[NAV] Waypoint {}/{}", i + 1, targets.len());
            if self.approach_position(target).await? == NavOutcome::Cancelled {
                return Ok(NavOutcome::Cancelled);
            }
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => return Ok(NavOutcome::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
        Ok(NavOutcome::Completed)
    }

    /// Fly each leg in order with `move_forward`
    pub async fn run_sweep(
        &self,
        legs: &[SweepLeg],
        velocity_m_s: f64,
    ) -> Result<NavOutcome, MissionError> {
        for (i, leg) in legs.iter().enumerate() {
            debug!("[NAV] Sweep leg {}/{}", i + 1, legs.len());
            let outcome = self
                .move_forward(leg.distance_m, velocity_m_s, leg.bearing_deg)
                .await?;
            if outcome == NavOutcome::Cancelled {
                return Ok(outcome);
            }
        }
        Ok(NavOutcome::Completed)
    }
}

/// Serde adapter for durations written as fractional seconds
mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::MissionContext;
    use crate::telemetry::TelemetryMonitor;
    use crate::testing::SimVehicle;
    use std::sync::Arc;

    async fn flying_engine(sim: &Arc<SimVehicle>) -> (NavigationEngine, MissionContext) {
        let telemetry = Arc::new(TelemetryMonitor::new());
        telemetry.start(sim.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ctx = MissionContext::new(sim.clone(), telemetry);
        ctx.capture_home().await;
        (
            NavigationEngine::new(ctx.clone(), NavParams::default(), 0.0),
            ctx,
        )
    }

    #[test]
    fn test_speed_ramp() {
        let params = NavParams::default();
        // Leg of 20m at 5m/s
        assert_eq!(forward_speed(20.0 - 10.0, 5.0, &params), 5.0);
        assert_eq!(forward_speed(4.0, 5.0, &params), 1.5);
        assert_eq!(forward_speed(0.5, 5.0, &params), 0.0);
        assert_eq!(forward_speed(1.0, 5.0, &params), 0.0);
    }

    #[test]
    fn test_approach_factor_bands() {
        assert_eq!(approach_speed_factor(30.0), 1.0);
        assert_eq!(approach_speed_factor(5.0), 0.5);
        assert_eq!(approach_speed_factor(2.5), 0.5);
        assert_eq!(approach_speed_factor(2.0), 0.2);
    }

    #[test]
    fn test_vertical_command_clamped() {
        let params = NavParams::default();
        // 10m below target: climb (negative down), clamped
        assert_eq!(vertical_command(110.0, 100.0, &params), -2.0);
        assert_eq!(vertical_command(100.0, 110.0, &params), 2.0);
        let small = vertical_command(100.0, 99.0, &params);
        assert!((small + 0.85).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primitives_require_home() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let telemetry = Arc::new(TelemetryMonitor::new());
        let ctx = MissionContext::new(sim.clone(), telemetry);
        let engine = NavigationEngine::new(ctx, NavParams::default(), 10.0);

        let err = engine.move_forward(10.0, 2.0, 0.0).await.unwrap_err();
        assert!(matches!(err, MissionError::HomeNotSet));
        assert!(sim.velocity_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_approach_stops_within_tolerance() {
        let sim = SimVehicle::new(47.397742, 8.545594, 488.0);
        let (engine, _ctx) = flying_engine(&sim).await;

        let (lat, lon) = geodesy::destination(47.397742, 8.545594, 63.0, 42.0);
        let target = NavigationTarget {
            latitude_deg: lat,
            longitude_deg: lon,
            altitude_m: 0.0,
            hold_time: Duration::ZERO,
            max_speed_m_s: 8.0,
        };
        let outcome = engine.approach_position(&target).await.unwrap();
        assert_eq!(outcome, NavOutcome::Completed);

        let pos = sim.position();
        let miss = geodesy::distance_and_bearing(pos.0, pos.1, lat, lon).total_m;
        assert!(miss <= 0.5, "stopped {:.3}m from target", miss);

        let last = *sim.velocity_log().last().expect("setpoints");
        assert!(last.is_zero());
        // Never faster than requested
        assert!(sim
            .velocity_log()
            .iter()
            .all(|v| v.horizontal_speed() <= 8.0 + 1e-9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_approach_caps_speed_at_twenty() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let (engine, _ctx) = flying_engine(&sim).await;

        let (lat, lon) = geodesy::destination(47.0, 8.0, 180.0, 150.0);
        let target = NavigationTarget {
            latitude_deg: lat,
            longitude_deg: lon,
            altitude_m: 0.0,
            hold_time: Duration::from_secs(1),
            max_speed_m_s: 50.0,
        };
        engine.approach_position(&target).await.unwrap();

        let log = sim.velocity_log();
        let fastest = log.iter().map(|v| v.horizontal_speed()).fold(0.0, f64::max);
        assert!((fastest - 20.0).abs() < 1e-6);
        // Hold at the final bearing afterwards
        let tail = &log[log.len() - 10..];
        assert!(tail.iter().all(|v| v.is_zero()));
        assert!(tail.iter().all(|v| (v.yaw_deg - 180.0).abs() < 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_forward_covers_distance() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let (engine, _ctx) = flying_engine(&sim).await;

        engine.move_forward(20.0, 5.0, 90.0).await.unwrap();

        let pos = sim.position();
        let moved = geodesy::distance_and_bearing(47.0, 8.0, pos.0, pos.1);
        assert!(moved.total_m >= 19.0 && moved.total_m <= 20.5, "{}", moved.total_m);
        assert!((moved.bearing_deg - 90.0).abs() < 0.5);
        assert!(sim.velocity_log().last().unwrap().is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_forward_corrects_altitude() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let (_, ctx) = flying_engine(&sim).await;
        let engine = NavigationEngine::new(ctx, NavParams::default(), 10.0);

        engine.move_forward(30.0, 3.0, 0.0).await.unwrap();

        let first = sim.velocity_log()[0];
        assert_eq!(first.down_m_s, -2.0);
        assert!(sim.altitude() > 405.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_within_a_tick() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let (engine, ctx) = flying_engine(&sim).await;

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1050)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let outcome = engine.hold_position(Duration::from_secs(60), 0.0).await;
        assert_eq!(outcome, NavOutcome::Cancelled);
        assert!(started.elapsed() <= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_waypoints_in_order() {
        let sim = SimVehicle::new(47.0, 8.0, 400.0);
        let (engine, _ctx) = flying_engine(&sim).await;

        let a = geodesy::destination(47.0, 8.0, 0.0, 15.0);
        let b = geodesy::destination(a.0, a.1, 90.0, 15.0);
        let targets: Vec<NavigationTarget> = [a, b]
            .iter()
            .map(|&(lat, lon)| NavigationTarget {
                latitude_deg: lat,
                longitude_deg: lon,
                altitude_m: 0.0,
                hold_time: Duration::ZERO,
                max_speed_m_s: 5.0,
            })
            .collect();

        let outcome = engine.follow_waypoints(&targets).await.unwrap();
        assert_eq!(outcome, NavOutcome::Completed);

        let pos = sim.position();
        assert!(geodesy::distance_and_bearing(pos.0, pos.1, b.0, b.1).total_m <= 0.5);
    }

    #[test]
    fn test_target_from_toml() {
        let target: NavigationTarget = toml::from_str(
            "latitude_deg = 47.1\nlongitude_deg = 8.5\naltitude_m = 15.0\nhold_time = 0.5\nmax_speed_m_s = 8.0",
        )
        .unwrap();
        assert_eq!(target.hold_time, Duration::from_millis(500));
    }
}
