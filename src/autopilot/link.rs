//! Flight Controller Link
//!
//! Owns the MAVLink connection to a PX4/ArduPilot flight controller over
//! serial, UDP or TCP. A dedicated reader thread performs the blocking reads
//! and fans every message out on a broadcast channel.

use mavlink::ardupilotmega::{
    MavAutopilot, MavMessage, MavModeFlag, MavState, MavType, HEARTBEAT_DATA,
};
use mavlink::error::MessageReadError;
use mavlink::{MavConnection, MavHeader};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::traits::FcError;

type SharedConnection = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

/// Delay between reconnection attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Companion heartbeat period
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

/// Connection type for flight controller
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FcConnectionType {
    /// Serial port connection (e.g., "/dev/ttyACM0" or "/dev/serial0")
    Serial { port: String, baud: u32 },
    /// UDP listen address (e.g., "0.0.0.0:14540" for PX4 SITL)
    Udp { address: String },
    /// TCP connection (e.g., "127.0.0.1:5760")
    Tcp { address: String },
}

impl Default for FcConnectionType {
    fn default() -> Self {
        // PX4 SITL offboard API port
        Self::Udp {
            address: "0.0.0.0:14540".into(),
        }
    }
}

impl FcConnectionType {
    /// Address string understood by `mavlink::connect`
    pub fn connection_string(&self) -> String {
        match self {
            FcConnectionType::Serial { port, baud } => format!("serial:{}:{}", port, baud),
            FcConnectionType::Udp { address } => format!("udpin:{}", address),
            FcConnectionType::Tcp { address } => format!("tcpout:{}", address),
        }
    }
}

/// Configuration for flight controller connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FcConfig {
    /// Connection type and parameters
    pub connection: FcConnectionType,
    /// System ID for this companion computer
    pub system_id: u8,
    /// Component ID for this companion computer
    pub component_id: u8,
    /// Target system ID (flight controller)
    pub target_system: u8,
    /// Target component ID (autopilot)
    pub target_component: u8,
    /// How long to wait for COMMAND_ACK
    pub ack_timeout_ms: u64,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            connection: FcConnectionType::default(),
            system_id: 255,      // Companion computer
            component_id: 190,   // MAV_COMP_ID_ONBOARD_COMPUTER
            target_system: 1,    // Autopilot
            target_component: 1, // MAV_COMP_ID_AUTOPILOT1
            ack_timeout_ms: 3000,
        }
    }
}

/// Events from the flight controller
#[derive(Debug, Clone)]
pub enum FcEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected { reason: String },
    /// Received a MAVLink message
    Message(MavMessage),
}

/// Flight controller connection
pub struct MavLink {
    config: FcConfig,
    connection: Arc<RwLock<Option<SharedConnection>>>,
    events: broadcast::Sender<FcEvent>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    sequence: AtomicU8,
}

impl MavLink {
    /// Open the link. Spawns the reader thread and the heartbeat task; must be
    /// called from within a tokio runtime.
    pub fn new(config: FcConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel::<FcEvent>(256);

        let link = Arc::new(Self {
            config: config.clone(),
            connection: Arc::new(RwLock::new(None)),
            events: events.clone(),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            sequence: AtomicU8::new(0),
        });

        let slot = link.connection.clone();
        let connected = link.connected.clone();
        let shutdown = link.shutdown.clone();
        std::thread::Builder::new()
            .name("mavlink-reader".into())
            .spawn(move || connection_loop(config, slot, events, connected, shutdown))
            .map_err(|e| error!("[FC] Failed to spawn reader thread: {}", e))
            .ok();

        let heartbeat_link = link.clone();
        tokio::spawn(async move {
            heartbeat_loop(heartbeat_link).await;
        });

        link
    }

    /// Check if connected to flight controller
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribe to flight controller events
    pub fn subscribe(&self) -> broadcast::Receiver<FcEvent> {
        self.events.subscribe()
    }

    /// Get the configuration
    pub fn config(&self) -> &FcConfig {
        &self.config
    }

    /// Send a MAVLink message to the flight controller
    pub fn send(&self, msg: &MavMessage) -> Result<(), FcError> {
        let conn = self
            .connection
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(FcError::LinkClosed)?;

        conn.send(&self.make_header(), msg).map_err(|e| {
            warn!("[FC] Send failed: {}", e);
            FcError::LinkClosed
        })?;
        Ok(())
    }

    /// Stop the reader thread after its next read returns
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Create MAVLink header for sending messages
    fn make_header(&self) -> MavHeader {
        MavHeader {
            system_id: self.config.system_id,
            component_id: self.config.component_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Blocking connect/read/reconnect loop, runs on the reader thread
fn connection_loop(
    config: FcConfig,
    slot: Arc<RwLock<Option<SharedConnection>>>,
    events: broadcast::Sender<FcEvent>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    let address = config.connection.connection_string();

    while !shutdown.load(Ordering::SeqCst) {
        info!("[FC] Connecting to flight controller at {}", address);

        match mavlink::connect::<MavMessage>(&address) {
            Ok(conn) => {
                let conn: SharedConnection = Arc::from(conn);
                if let Ok(mut guard) = slot.write() {
                    *guard = Some(conn.clone());
                }
                connected.store(true, Ordering::SeqCst);
                let _ = events.send(FcEvent::Connected);
                info!("[FC] Link open");

                let reason = read_until_error(conn.as_ref(), &events, &shutdown);
                warn!("[FC] Disconnected: {}", reason);

                connected.store(false, Ordering::SeqCst);
                if let Ok(mut guard) = slot.write() {
                    *guard = None;
                }
                let _ = events.send(FcEvent::Disconnected { reason });
            }
            Err(e) => {
                error!("[FC] Failed to connect: {}", e);
            }
        }

        std::thread::sleep(RECONNECT_DELAY);
    }

    info!("[FC] Reader thread stopped");
}

fn read_until_error(
    conn: &(dyn MavConnection<MavMessage> + Send + Sync),
    events: &broadcast::Sender<FcEvent>,
    shutdown: &AtomicBool,
) -> String {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return "link closed".into();
        }
        match conn.recv() {
            Ok((_header, msg)) => {
                // No subscribers is not an error
                let _ = events.send(FcEvent::Message(msg));
            }
            Err(MessageReadError::Io(ref e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(MessageReadError::Io(e)) => return format!("read error: {}", e),
            Err(e) => {
                debug!("[FC] Dropped malformed frame: {}", e);
            }
        }
    }
}

/// Companion computer heartbeat, so the autopilot sees an onboard controller
async fn heartbeat_loop(link: Arc<MavLink>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
    loop {
        ticker.tick().await;
        if link.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if !link.is_connected() {
            continue;
        }
        let heartbeat = MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        });
        if let Err(e) = link.send(&heartbeat) {
            debug!("[FC] Heartbeat not sent: {}", e);
        }
    }
}
