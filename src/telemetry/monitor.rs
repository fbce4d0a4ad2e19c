//! Telemetry Monitor
//!
//! Runs one subscription task per telemetry stream. Each task writes its own
//! fields of a shared snapshot; every other component reads copies.

use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_shared::params;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use crate::autopilot::{Severity, StatusText, TelemetrySource};
use crate::error::MissionError;

/// Poll period while waiting for the link and health flags
const READINESS_POLL: Duration = Duration::from_millis(100);

/// Latest known vehicle state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f64,
    pub relative_altitude_m: f64,
    pub velocity_north_m_s: f64,
    pub velocity_east_m_s: f64,
    pub velocity_down_m_s: f64,
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
    pub connected: bool,
    pub global_position_ok: bool,
    pub home_position_ok: bool,
    /// When the last position sample arrived
    pub last_position_update: Option<Instant>,
}

impl TelemetrySnapshot {
    pub fn has_position(&self) -> bool {
        self.last_position_update.is_some()
    }
}

/// Bounds on the readiness waits in `TelemetryMonitor::connect`
#[derive(Debug, Clone, Copy)]
pub struct MonitorTimeouts {
    pub connection: Duration,
    pub health: Duration,
}

impl Default for MonitorTimeouts {
    fn default() -> Self {
        Self {
            connection: Duration::from_millis(params::CONNECTION_TIMEOUT_MS),
            health: Duration::from_millis(params::HEALTH_TIMEOUT_MS),
        }
    }
}

/// Subscribes to the flight controller streams and keeps the latest snapshot
pub struct TelemetryMonitor {
    snapshot: Arc<RwLock<TelemetrySnapshot>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TelemetryMonitor {
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(TelemetrySnapshot::default())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the subscriptions, then wait for the link and for a healthy
    /// position estimate
    pub async fn connect(
        &self,
        source: Arc<dyn TelemetrySource>,
        timeouts: MonitorTimeouts,
    ) -> Result<(), MissionError> {
        self.start(source);

        info!("[FC] Waiting for flight controller connection...");
        if !self.wait_until(timeouts.connection, |s| s.connected).await {
            error!("[FC] No connection after {:?}", timeouts.connection);
            return Err(MissionError::ConnectionTimeout(timeouts.connection));
        }
        info!("[FC] Connected");

        info!("[FC] Waiting for global position estimate...");
        if !self
            .wait_until(timeouts.health, |s| s.global_position_ok && s.home_position_ok)
            .await
        {
            error!("[FC] Position estimate not healthy after {:?}", timeouts.health);
            return Err(MissionError::HealthTimeout(timeouts.health));
        }
        info!("[FC] Global position estimate OK");

        Ok(())
    }

    /// Spawn one task per stream
    pub fn start(&self, source: Arc<dyn TelemetrySource>) {
        let mut handles = Vec::with_capacity(6);

        let snapshot = self.snapshot.clone();
        let mut stream = source.position();
        handles.push(tokio::spawn(async move {
            while let Some(pos) = stream.next().await {
                let mut s = snapshot.write().await;
                s.latitude_deg = pos.latitude_deg;
                s.longitude_deg = pos.longitude_deg;
                s.absolute_altitude_m = pos.absolute_altitude_m;
                s.relative_altitude_m = pos.relative_altitude_m;
                s.last_position_update = Some(Instant::now());
            }
            debug!("[FC] Position stream ended");
        }));

        let snapshot = self.snapshot.clone();
        let mut stream = source.velocity();
        handles.push(tokio::spawn(async move {
            while let Some(vel) = stream.next().await {
                let mut s = snapshot.write().await;
                s.velocity_north_m_s = vel.north_m_s;
                s.velocity_east_m_s = vel.east_m_s;
                s.velocity_down_m_s = vel.down_m_s;
            }
        }));

        let snapshot = self.snapshot.clone();
        let mut stream = source.attitude();
        handles.push(tokio::spawn(async move {
            while let Some(att) = stream.next().await {
                let mut s = snapshot.write().await;
                s.yaw_deg = att.yaw_deg;
                s.pitch_deg = att.pitch_deg;
                s.roll_deg = att.roll_deg;
            }
        }));

        let snapshot = self.snapshot.clone();
        let mut stream = source.connection_state();
        handles.push(tokio::spawn(async move {
            while let Some(connected) = stream.next().await {
                let was = std::mem::replace(&mut snapshot.write().await.connected, connected);
                if was && !connected {
                    warn!("[FC] Connection lost");
                }
            }
        }));

        let snapshot = self.snapshot.clone();
        let mut stream = source.health();
        handles.push(tokio::spawn(async move {
            while let Some(health) = stream.next().await {
                let mut s = snapshot.write().await;
                s.global_position_ok = health.global_position_ok;
                s.home_position_ok = health.home_position_ok;
            }
        }));

        let mut stream = source.status_text();
        handles.push(tokio::spawn(async move {
            while let Some(status) = stream.next().await {
                log_status_text(&status);
            }
        }));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.extend(handles);
        }
    }

    /// Abort every subscription task
    pub fn stop(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    pub async fn snapshot(&self) -> TelemetrySnapshot {
        *self.snapshot.read().await
    }

    /// Time since the last position sample, `None` before the first one
    pub async fn position_age(&self) -> Option<Duration> {
        self.snapshot
            .read()
            .await
            .last_position_update
            .map(|at| at.elapsed())
    }

    async fn wait_until<F>(&self, limit: Duration, ready: F) -> bool
    where
        F: Fn(&TelemetrySnapshot) -> bool,
    {
        let deadline = Instant::now() + limit;
        let mut ticker = interval(READINESS_POLL);
        loop {
            ticker.tick().await;
            if ready(&*self.snapshot.read().await) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }
}

impl Default for TelemetryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TelemetryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn log_status_text(status: &StatusText) {
    match status.severity {
        Severity::Emergency | Severity::Alert | Severity::Critical => {
            error!("[FC] {:?}: {}", status.severity, status.text)
        }
        Severity::Error | Severity::Warning => warn!("[FC] {:?}: {}", status.severity, status.text),
        Severity::Notice | Severity::Info => info!("[FC] {}", status.text),
        Severity::Debug => debug!("[FC] {}", status.text),
    }
}
