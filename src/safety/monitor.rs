//! Telemetry Watchdog
//!
//! Runs a background task that checks the age of the last position update
//! and raises an action once it exceeds the stale limit while airborne.

use std::sync::Arc;
use std::time::Duration;
use swarm_shared::params;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::mission::MissionController;

/// Actions that the watchdog can trigger
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogAction {
    /// No position update for `age` while airborne
    TelemetryStale { age: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub check_interval: Duration,
    pub stale_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(params::WATCHDOG_INTERVAL_MS),
            stale_timeout: Duration::from_millis(params::STALE_TELEMETRY_TIMEOUT_MS),
        }
    }
}

pub struct TelemetryWatchdog {
    controller: Arc<MissionController>,
    config: WatchdogConfig,
    /// Channel to send watchdog actions
    action_tx: mpsc::UnboundedSender<WatchdogAction>,
    /// Channel to receive watchdog actions
    action_rx: Mutex<mpsc::UnboundedReceiver<WatchdogAction>>,
}

impl TelemetryWatchdog {
    pub fn new(controller: Arc<MissionController>, config: WatchdogConfig) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            config,
            action_tx,
            action_rx: Mutex::new(action_rx),
        }
    }

    /// Receive the next action (waits until one is available)
    pub async fn recv_action(&self) -> Option<WatchdogAction> {
        self.action_rx.lock().await.recv().await
    }

    /// Start the check loop. It raises at most one action and stops when
    /// `cancel` fires or the handle is dropped.
    pub fn start_monitoring(&self, cancel: CancellationToken) -> WatchdogHandle {
        let controller = self.controller.clone();
        let config = self.config;
        let action_tx = self.action_tx.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(config.check_interval);
            info!(
                "[SAFETY] Watchdog started, stale after {:?}",
                config.stale_timeout
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let phase = controller.phase();
                if !phase.is_airborne() {
                    continue;
                }
                let telemetry = &controller.context().telemetry;
                let Some(age) = telemetry.position_age().await else {
                    continue;
                };
                debug!("[SAFETY] Position age {:?} in {:?}", age, phase);

                if age > config.stale_timeout {
                    error!("[SAFETY] No position update for {:?}", age);
                    let _ = action_tx.send(WatchdogAction::TelemetryStale { age });
                    break;
                }
            }

            info!("[SAFETY] Watchdog stopped");
        });

        WatchdogHandle { task }
    }
}

/// Stops the watchdog when dropped
pub struct WatchdogHandle {
    task: JoinHandle<()>,
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
