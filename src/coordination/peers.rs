//! Peer position table and position beacon

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_shared::{codec, LandingPoint, ProtocolCommand, ProtocolMessage};
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::RadioSender;
use crate::navigation::geodesy::{self, Displacement};
use crate::telemetry::TelemetryMonitor;

/// Last position a peer broadcast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerPosition {
    pub point: LandingPoint,
    pub seen_at: Instant,
}

/// Where a peer is relative to us
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerGeometry {
    pub displacement: Displacement,
    pub midpoint: (f64, f64),
}

/// Latest beacon position per sender
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: Mutex<HashMap<String, PeerPosition>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, sender_id: &str, point: LandingPoint) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(
                sender_id.to_string(),
                PeerPosition {
                    point,
                    seen_at: Instant::now(),
                },
            );
        }
    }

    pub fn get(&self, sender_id: &str) -> Option<PeerPosition> {
        self.peers.lock().ok()?.get(sender_id).copied()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop peers not heard from within `max_age`
    pub fn prune(&self, max_age: Duration) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.retain(|_, p| p.seen_at.elapsed() <= max_age);
        }
    }
}

/// Distance, bearing and midpoint from our position to a peer's
pub fn peer_geometry(own_lat: f64, own_lon: f64, peer: &LandingPoint) -> PeerGeometry {
    let (lat, lon) = (peer.latitude_deg(), peer.longitude_deg());
    PeerGeometry {
        displacement: geodesy::distance_and_bearing(own_lat, own_lon, lat, lon),
        midpoint: geodesy::midpoint(own_lat, own_lon, lat, lon),
    }
}

/// Broadcast our own position with command 0 until cancelled
pub async fn run_beacon(
    sender: RadioSender,
    telemetry: Arc<TelemetryMonitor>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snap = telemetry.snapshot().await;
        if !snap.has_position() {
            continue;
        }
        let point = LandingPoint::from_degrees(
            snap.latitude_deg,
            snap.longitude_deg,
            snap.absolute_altitude_m,
        );
        let payload = codec::encode(&ProtocolMessage::new(point, ProtocolCommand::Idle));
        match sender.send_broadcast(&payload) {
            Ok(()) => debug!("[RADIO] Beacon {}", String::from_utf8_lossy(&payload)),
            Err(e) => warn!("[RADIO] Beacon not sent: {}", e),
        }
    }
    debug!("[RADIO] Beacon stopped");
}
