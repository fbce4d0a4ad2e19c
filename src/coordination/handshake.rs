//! Landing handshake
//!
//! Turns the lossy broadcast channel into an announce/acknowledge exchange:
//!
//! - command 1 announces a landing point. Receivers echo it once as command 2,
//!   remember the point and fire the landing interrupt.
//! - command 2 acknowledges an announcement.
//! - command 0 is a position beacon feeding the peer table.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_shared::{codec, params, LandingPoint, ProtocolCommand, ProtocolMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{MessageHandler, RadioSender};
use super::peers::{peer_geometry, PeerTable};
use super::queue::CoordinationMessage;
use super::radio::RadioError;
use crate::telemetry::TelemetryMonitor;

/// Retry schedule for announcements
#[derive(Debug, Clone, Copy)]
pub struct AnnounceRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for AnnounceRetry {
    fn default() -> Self {
        Self {
            max_attempts: params::ANNOUNCE_MAX_ATTEMPTS,
            delay: Duration::from_millis(params::ANNOUNCE_RETRY_DELAY_MS),
        }
    }
}

pub struct LandingHandshake {
    sender: RadioSender,
    landing_command_received: AtomicBool,
    feedback_received: AtomicBool,
    announced_point: Mutex<Option<LandingPoint>>,
    interrupt: CancellationToken,
    peers: PeerTable,
    telemetry: Option<Arc<TelemetryMonitor>>,
    retry: AnnounceRetry,
}

impl LandingHandshake {
    pub fn new(sender: RadioSender) -> Self {
        Self {
            sender,
            landing_command_received: AtomicBool::new(false),
            feedback_received: AtomicBool::new(false),
            announced_point: Mutex::new(None),
            interrupt: CancellationToken::new(),
            peers: PeerTable::new(),
            telemetry: None,
            retry: AnnounceRetry::default(),
        }
    }

    /// Use our own position to report distance to beaconing peers
    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryMonitor>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_retry(mut self, retry: AnnounceRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn landing_command_received(&self) -> bool {
        self.landing_command_received.load(Ordering::SeqCst)
    }

    pub fn feedback_received(&self) -> bool {
        self.feedback_received.load(Ordering::SeqCst)
    }

    /// The landing point most recently announced by a peer
    pub fn announced_point(&self) -> Option<LandingPoint> {
        self.announced_point.lock().ok().and_then(|p| *p)
    }

    /// Cancelled when a landing announcement arrives
    pub fn interrupt(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Wait for a landing announcement and return its point
    pub async fn wait_for_landing_command(&self) -> Option<LandingPoint> {
        self.interrupt.cancelled().await;
        self.announced_point()
    }

    /// Broadcast a landing point, retrying until the radio accepts it
    pub async fn announce(&self, point: LandingPoint) -> Result<(), RadioError> {
        let payload = codec::encode(&ProtocolMessage::new(
            point,
            ProtocolCommand::LandingAnnounce,
        ));

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sender.send_broadcast(&payload) {
                Ok(()) => {
                    info!(
                        "[RADIO] Landing point announced ({}) on attempt {}",
                        String::from_utf8_lossy(&payload),
                        attempt
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    warn!("[RADIO] Announce attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    warn!("[RADIO] Announce gave up after {} attempts", attempt);
                    return Err(e);
                }
            }
        }
    }

    fn on_landing_announce(&self, message: &ProtocolMessage) {
        let ack = codec::encode(&message.acknowledgement());
        if let Err(e) = self.sender.send_broadcast(&ack) {
            warn!("[RADIO] Landing acknowledgement not sent: {}", e);
        }

        if let Ok(mut point) = self.announced_point.lock() {
            *point = Some(message.point);
        }
        self.landing_command_received.store(true, Ordering::SeqCst);
        self.interrupt.cancel();

        info!(
            "[RADIO] Landing command received: lat={:.6} lon={:.6} alt={:.1}m",
            message.point.latitude_deg(),
            message.point.longitude_deg(),
            message.point.altitude_m()
        );
    }

    async fn on_beacon(&self, sender_id: &str, point: LandingPoint) {
        self.peers.update(sender_id, point);
        self.peers.prune(Duration::from_millis(params::PEER_TIMEOUT_MS));

        let Some(telemetry) = &self.telemetry else {
            return;
        };
        let own = telemetry.snapshot().await;
        if !own.has_position() {
            return;
        }
        let geometry = peer_geometry(own.latitude_deg, own.longitude_deg, &point);
        info!(
            "[RADIO] Peer {} at {:.1}m bearing {:.0}, midpoint {:.6},{:.6}",
            sender_id,
            geometry.displacement.total_m,
            geometry.displacement.bearing_deg,
            geometry.midpoint.0,
            geometry.midpoint.1
        );
    }
}

#[async_trait]
impl MessageHandler for LandingHandshake {
    async fn handle(&self, message: CoordinationMessage) {
        let decoded = match codec::decode(&message.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    "[RADIO] Dropped payload {:?} from {}: {}",
                    message.payload, message.sender_id, e
                );
                return;
            }
        };
        debug!("[RADIO] {} -> {:?}", message.sender_id, decoded.command);

        match decoded.command {
            ProtocolCommand::LandingAnnounce => self.on_landing_announce(&decoded),
            ProtocolCommand::Acknowledge => {
                self.feedback_received.store(true, Ordering::SeqCst);
                info!("[RADIO] Landing acknowledged by {}", message.sender_id);
            }
            ProtocolCommand::Idle => self.on_beacon(&message.sender_id, decoded.point).await,
        }
    }
}
