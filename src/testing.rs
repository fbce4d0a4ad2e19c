//! Test doubles
//!
//! A kinematic vehicle, an in-memory radio and scripted marker detectors.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::autopilot::{
    AttitudeSample, FcError, FlightControl, HealthSample, PositionNedYaw, PositionSample,
    StatusText, TelemetrySource, VelocityNedYaw, VelocitySample,
};
use crate::coordination::{RadioError, RadioFrame, RadioTransceiver};
use crate::navigation::geodesy;
use crate::vision::{DetectorReading, MarkerDetector};

/// Time one velocity setpoint is integrated over
const SIM_STEP_S: f64 = 0.1;

fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

#[derive(Debug, Default)]
struct SimState {
    velocity_log: Vec<VelocityNedYaw>,
    calls: Vec<&'static str>,
    offboard_rejects: u32,
    offboard_attempts: u32,
    land_calls: u32,
    reject_arm: bool,
    stall_takeoff: bool,
    position_muted: bool,
    takeoff_amsl_m: Option<f64>,
}

/// Kinematic vehicle: every velocity setpoint moves it for one control period
pub struct SimVehicle {
    ground_alt_m: f64,
    state: Mutex<SimState>,
    position: watch::Sender<PositionSample>,
    velocity: watch::Sender<VelocitySample>,
    attitude: watch::Sender<AttitudeSample>,
    connected: watch::Sender<bool>,
    health: watch::Sender<HealthSample>,
}

impl SimVehicle {
    pub fn new(lat: f64, lon: f64, abs_alt_m: f64) -> Arc<Self> {
        Arc::new(Self {
            ground_alt_m: abs_alt_m,
            state: Mutex::new(SimState::default()),
            position: watch::channel(PositionSample {
                latitude_deg: lat,
                longitude_deg: lon,
                absolute_altitude_m: abs_alt_m,
                relative_altitude_m: 0.0,
            })
            .0,
            velocity: watch::channel(VelocitySample::default()).0,
            attitude: watch::channel(AttitudeSample::default()).0,
            connected: watch::channel(true).0,
            health: watch::channel(HealthSample {
                global_position_ok: true,
                home_position_ok: true,
            })
            .0,
        })
    }

    fn record(&self, call: &'static str) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    pub fn set_health(&self, health: HealthSample) {
        self.health.send_replace(health);
    }

    /// Move without commanding anything. Always publishes a position sample.
    pub fn teleport(&self, lat: f64, lon: f64) {
        self.position.send_modify(|p| {
            p.latitude_deg = lat;
            p.longitude_deg = lon;
        });
    }

    pub fn position(&self) -> (f64, f64) {
        let p = *self.position.borrow();
        (p.latitude_deg, p.longitude_deg)
    }

    pub fn altitude(&self) -> f64 {
        self.position.borrow().absolute_altitude_m
    }

    pub fn yaw(&self) -> f64 {
        self.attitude.borrow().yaw_deg
    }

    /// Refuse the next `n` offboard starts. `u32::MAX` refuses forever.
    pub fn reject_offboard(&self, n: u32) {
        self.state.lock().unwrap().offboard_rejects = n;
    }

    pub fn reject_arm(&self) {
        self.state.lock().unwrap().reject_arm = true;
    }

    /// Accept takeoff but never climb
    pub fn stall_takeoff(&self) {
        self.state.lock().unwrap().stall_takeoff = true;
    }

    /// Keep moving but stop publishing position samples
    pub fn mute_position(&self) {
        self.state.lock().unwrap().position_muted = true;
    }

    pub fn velocity_log(&self) -> Vec<VelocityNedYaw> {
        self.state.lock().unwrap().velocity_log.clone()
    }

    /// Every command other than velocity setpoints, in order
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn offboard_attempts(&self) -> u32 {
        self.state.lock().unwrap().offboard_attempts
    }

    /// Altitude the last takeoff command asked for
    pub fn takeoff_amsl(&self) -> Option<f64> {
        self.state.lock().unwrap().takeoff_amsl_m
    }

    pub fn land_calls(&self) -> u32 {
        self.state.lock().unwrap().land_calls
    }
}

#[async_trait]
impl FlightControl for SimVehicle {
    async fn arm(&self) -> Result<(), FcError> {
        self.record("arm");
        if self.state.lock().unwrap().reject_arm {
            return Err(FcError::Rejected {
                command: "ARM",
                result: "MAV_RESULT_DENIED".into(),
            });
        }
        Ok(())
    }

    async fn takeoff(&self, amsl_altitude_m: f64) -> Result<(), FcError> {
        self.record("takeoff");
        {
            let mut state = self.state.lock().unwrap();
            state.takeoff_amsl_m = Some(amsl_altitude_m);
            if state.stall_takeoff {
                return Ok(());
            }
        }
        let ground = self.ground_alt_m;
        self.position.send_modify(|p| {
            p.relative_altitude_m = amsl_altitude_m - ground;
            p.absolute_altitude_m = amsl_altitude_m;
        });
        Ok(())
    }

    async fn land(&self) -> Result<(), FcError> {
        self.record("land");
        self.state.lock().unwrap().land_calls += 1;
        Ok(())
    }

    async fn hold(&self) -> Result<(), FcError> {
        self.record("hold");
        Ok(())
    }

    async fn set_velocity_ned(&self, setpoint: VelocityNedYaw) -> Result<(), FcError> {
        let muted = {
            let mut state = self.state.lock().unwrap();
            state.velocity_log.push(setpoint);
            state.position_muted
        };

        let speed = setpoint.horizontal_speed();
        let bearing = setpoint.east_m_s.atan2(setpoint.north_m_s).to_degrees();
        let ground = self.ground_alt_m;
        self.position.send_if_modified(|p| {
            if speed > 0.0 {
                let (lat, lon) = geodesy::destination(
                    p.latitude_deg,
                    p.longitude_deg,
                    geodesy::normalize_bearing(bearing),
                    speed * SIM_STEP_S,
                );
                p.latitude_deg = lat;
                p.longitude_deg = lon;
            }
            p.absolute_altitude_m -= setpoint.down_m_s * SIM_STEP_S;
            p.relative_altitude_m = p.absolute_altitude_m - ground;
            !muted
        });
        self.velocity.send_replace(VelocitySample {
            north_m_s: setpoint.north_m_s,
            east_m_s: setpoint.east_m_s,
            down_m_s: setpoint.down_m_s,
        });
        self.attitude.send_modify(|a| a.yaw_deg = setpoint.yaw_deg);
        Ok(())
    }

    async fn set_position_ned(&self, _setpoint: PositionNedYaw) -> Result<(), FcError> {
        self.record("set_position_ned");
        Ok(())
    }

    async fn start_offboard(&self) -> Result<(), FcError> {
        self.record("start_offboard");
        let mut state = self.state.lock().unwrap();
        state.offboard_attempts += 1;
        if state.offboard_rejects > 0 {
            if state.offboard_rejects != u32::MAX {
                state.offboard_rejects -= 1;
            }
            return Err(FcError::Rejected {
                command: "DO_SET_MODE",
                result: "MAV_RESULT_TEMPORARILY_REJECTED".into(),
            });
        }
        Ok(())
    }

    async fn stop_offboard(&self) -> Result<(), FcError> {
        self.record("stop_offboard");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Simulated vehicle"
    }
}

impl TelemetrySource for SimVehicle {
    fn position(&self) -> BoxStream<'static, PositionSample> {
        watch_stream(self.position.subscribe())
    }

    fn velocity(&self) -> BoxStream<'static, VelocitySample> {
        watch_stream(self.velocity.subscribe())
    }

    fn attitude(&self) -> BoxStream<'static, AttitudeSample> {
        watch_stream(self.attitude.subscribe())
    }

    fn connection_state(&self) -> BoxStream<'static, bool> {
        watch_stream(self.connected.subscribe())
    }

    fn health(&self) -> BoxStream<'static, HealthSample> {
        watch_stream(self.health.subscribe())
    }

    fn status_text(&self) -> BoxStream<'static, StatusText> {
        stream::pending().boxed()
    }
}

/// A frame handed to `LoopbackRadio`
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    /// `None` for broadcasts
    pub destination: Option<String>,
    pub payload: String,
}

/// In-memory radio: records sends and serves injected frames to `receive`
pub struct LoopbackRadio {
    node_id: String,
    open: AtomicBool,
    inbox: Mutex<VecDeque<RadioFrame>>,
    arrived: Condvar,
    sent: Mutex<Vec<SentFrame>>,
    failures_left: AtomicU32,
    attempts: AtomicU32,
}

impl LoopbackRadio {
    pub fn new(node_id: &str) -> Arc<Self> {
        Arc::new(Self {
            node_id: node_id.to_string(),
            open: AtomicBool::new(false),
            inbox: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
            sent: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn inject(&self, sender_id: &str, is_broadcast: bool, payload: &str) {
        self.inbox.lock().unwrap().push_back(RadioFrame {
            sender_id: sender_id.to_string(),
            is_broadcast,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        });
        self.arrived.notify_all();
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// Fail the next `n` sends. `u32::MAX` fails forever.
    pub fn fail_next_sends(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn send_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn transmit(&self, destination: Option<&str>, payload: &[u8]) -> Result<(), RadioError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_open() {
            return Err(RadioError::NotOpen);
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            if left != u32::MAX {
                self.failures_left.store(left - 1, Ordering::SeqCst);
            }
            return Err(RadioError::Transmit("injected failure".into()));
        }
        self.sent.lock().unwrap().push(SentFrame {
            destination: destination.map(str::to_string),
            payload: String::from_utf8_lossy(payload).into_owned(),
        });
        Ok(())
    }
}

impl RadioTransceiver for LoopbackRadio {
    fn open(&self) -> Result<(), RadioError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_broadcast(&self, payload: &[u8]) -> Result<(), RadioError> {
        self.transmit(None, payload)
    }

    fn send_unicast(&self, address: &str, payload: &[u8]) -> Result<(), RadioError> {
        self.transmit(Some(address), payload)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<RadioFrame>, RadioError> {
        if !self.is_open() {
            return Err(RadioError::NotOpen);
        }
        let inbox = self.inbox.lock().unwrap();
        let (mut inbox, _) = self
            .arrived
            .wait_timeout_while(inbox, timeout, |q| q.is_empty())
            .unwrap();
        Ok(inbox.pop_front())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }
}

/// Detector that replays readings on a timeline starting at construction.
///
/// Each reading holds from its offset until the next one. Before the first,
/// nothing is found.
pub struct ScriptedDetector {
    started: Instant,
    script: Vec<(Duration, DetectorReading)>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<(Duration, DetectorReading)>) -> Self {
        Self {
            started: Instant::now(),
            script,
        }
    }

    fn current(&self) -> DetectorReading {
        let elapsed = self.started.elapsed();
        self.script
            .iter()
            .rev()
            .find(|(at, _)| *at <= elapsed)
            .map(|(_, reading)| *reading)
            .unwrap_or_default()
    }
}

impl MarkerDetector for ScriptedDetector {
    fn is_found(&self) -> bool {
        self.current().found
    }

    fn is_centered(&self) -> bool {
        self.current().centered
    }

    fn averaged_offset(&self) -> (f64, f64, f64) {
        self.current().offset
    }
}

/// Detector looking down from a `SimVehicle` at a fixed marker.
///
/// `scale_m` is the ground distance from the image centre to its edge.
pub struct MarkerBelow {
    sim: Arc<SimVehicle>,
    marker: (f64, f64),
    scale_m: f64,
}

impl MarkerBelow {
    pub fn new(sim: Arc<SimVehicle>, marker: (f64, f64), scale_m: f64) -> Self {
        Self {
            sim,
            marker,
            scale_m,
        }
    }

    fn offset(&self) -> (f64, f64) {
        let (lat, lon) = self.sim.position();
        let d = geodesy::distance_and_bearing(lat, lon, self.marker.0, self.marker.1);
        let (sin, cos) = self.sim.yaw().to_radians().sin_cos();
        let forward = d.north_m * cos + d.east_m * sin;
        let right = -d.north_m * sin + d.east_m * cos;
        (right / self.scale_m, -forward / self.scale_m)
    }
}

impl MarkerDetector for MarkerBelow {
    fn is_found(&self) -> bool {
        let (x, y) = self.offset();
        x.abs() <= 1.0 && y.abs() <= 1.0
    }

    fn is_centered(&self) -> bool {
        let (x, y) = self.offset();
        x.abs().max(y.abs()) <= 0.015
    }

    fn averaged_offset(&self) -> (f64, f64, f64) {
        let (x, y) = self.offset();
        (x, y, 0.0)
    }
}
