//! MAVLink Telemetry Reader
//!
//! Converts raw MAVLink messages into the typed samples of `TelemetrySource`.
//! Each stream is backed by its own broadcast receiver on the link.

use futures::stream::{self, BoxStream, StreamExt};
use mavlink::ardupilotmega::{MavMessage, MavModeFlag};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::commands::Px4Mode;
use super::link::{FcEvent, MavLink};
use super::traits::{
    AttitudeSample, HealthSample, PositionSample, Severity, StatusText, TelemetrySource,
    VelocitySample,
};

/// Telemetry streams read from a live MAVLink link
pub struct MavlinkTelemetry {
    link: Arc<MavLink>,
}

impl MavlinkTelemetry {
    pub fn new(link: Arc<MavLink>) -> Self {
        Self { link }
    }

    /// Build a stream that yields whatever `extract` pulls out of each event
    fn event_stream<T, F>(&self, extract: F) -> BoxStream<'static, T>
    where
        T: Send + 'static,
        F: FnMut(&FcEvent) -> Option<T> + Send + 'static,
    {
        let rx = self.link.subscribe();
        stream::unfold((rx, extract), |(mut rx, mut extract)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Some(value) = extract(&event) {
                            return Some((value, (rx, extract)));
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!("[FC] Telemetry stream lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

impl TelemetrySource for MavlinkTelemetry {
    fn position(&self) -> BoxStream<'static, PositionSample> {
        self.event_stream(|event| match event {
            FcEvent::Message(msg) => position_from(msg),
            _ => None,
        })
    }

    fn velocity(&self) -> BoxStream<'static, VelocitySample> {
        self.event_stream(|event| match event {
            FcEvent::Message(msg) => velocity_from(msg),
            _ => None,
        })
    }

    fn attitude(&self) -> BoxStream<'static, AttitudeSample> {
        self.event_stream(|event| match event {
            FcEvent::Message(msg) => attitude_from(msg),
            _ => None,
        })
    }

    fn connection_state(&self) -> BoxStream<'static, bool> {
        let mut last: Option<bool> = None;
        self.event_stream(move |event| {
            let now = match event {
                FcEvent::Connected => true,
                FcEvent::Disconnected { .. } => false,
                // Late subscribers learn the link is up from the next heartbeat
                FcEvent::Message(MavMessage::HEARTBEAT(_)) => true,
                FcEvent::Message(_) => return None,
            };
            if last == Some(now) {
                return None;
            }
            last = Some(now);
            Some(now)
        })
    }

    fn health(&self) -> BoxStream<'static, HealthSample> {
        let mut health = HealthSample::default();
        let mut announced = false;
        self.event_stream(move |event| {
            let FcEvent::Message(msg) = event else {
                return None;
            };
            let next = apply_health(health, msg)?;
            if announced && next == health {
                return None;
            }
            announced = true;
            health = next;
            Some(health)
        })
    }

    fn status_text(&self) -> BoxStream<'static, StatusText> {
        self.event_stream(|event| match event {
            FcEvent::Message(msg) => status_text_from(msg),
            _ => None,
        })
    }
}

pub fn position_from(msg: &MavMessage) -> Option<PositionSample> {
    match msg {
        MavMessage::GLOBAL_POSITION_INT(pos) => Some(PositionSample {
            latitude_deg: pos.lat as f64 / 1e7,
            longitude_deg: pos.lon as f64 / 1e7,
            absolute_altitude_m: pos.alt as f64 / 1000.0, // mm to m
            relative_altitude_m: pos.relative_alt as f64 / 1000.0,
        }),
        _ => None,
    }
}

pub fn velocity_from(msg: &MavMessage) -> Option<VelocitySample> {
    match msg {
        // cm/s to m/s
        MavMessage::GLOBAL_POSITION_INT(pos) => Some(VelocitySample {
            north_m_s: pos.vx as f64 / 100.0,
            east_m_s: pos.vy as f64 / 100.0,
            down_m_s: pos.vz as f64 / 100.0,
        }),
        _ => None,
    }
}

pub fn attitude_from(msg: &MavMessage) -> Option<AttitudeSample> {
    match msg {
        MavMessage::ATTITUDE(att) => Some(AttitudeSample {
            roll_deg: (att.roll as f64).to_degrees(),
            pitch_deg: (att.pitch as f64).to_degrees(),
            yaw_deg: (att.yaw as f64).to_degrees(),
        }),
        _ => None,
    }
}

/// Fold a message into the health flags, `None` if it carries no health data
fn apply_health(mut health: HealthSample, msg: &MavMessage) -> Option<HealthSample> {
    match msg {
        MavMessage::GPS_RAW_INT(gps) => {
            health.global_position_ok = gps.fix_type as u8 >= 3; // 3D fix or better
            Some(health)
        }
        MavMessage::HOME_POSITION(_) => {
            health.home_position_ok = true;
            Some(health)
        }
        _ => None,
    }
}

pub fn status_text_from(msg: &MavMessage) -> Option<StatusText> {
    match msg {
        MavMessage::STATUSTEXT(text) => {
            let text_str = String::from_utf8_lossy(&text.text);
            let text_str = text_str.trim_end_matches('\0').to_string();
            Some(StatusText {
                severity: Severity::from_level(text.severity as u8),
                text: text_str,
            })
        }
        _ => None,
    }
}

/// Log autopilot heartbeats whenever the armed flag or flight mode changes
pub async fn log_mode_changes(link: Arc<MavLink>) {
    let mut rx = link.subscribe();
    let mut last: Option<(bool, u32)> = None;
    loop {
        match rx.recv().await {
            Ok(FcEvent::Message(MavMessage::HEARTBEAT(hb))) => {
                let armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
                if last != Some((armed, hb.custom_mode)) {
                    info!(
                        "[FC] {} mode={}",
                        if armed { "ARMED" } else { "DISARMED" },
                        mode_to_string(hb.custom_mode)
                    );
                    last = Some((armed, hb.custom_mode));
                }
            }
            Ok(FcEvent::Message(MavMessage::STATUSTEXT(text))) => {
                let Some(status) = status_text_from(&MavMessage::STATUSTEXT(text)) else {
                    continue;
                };
                if status.severity.is_fault() {
                    warn!("[FC] {:?}: {}", status.severity, status.text);
                } else {
                    debug!("[FC] {:?}: {}", status.severity, status.text);
                }
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

/// Convert PX4 custom mode to string
pub fn mode_to_string(custom_mode: u32) -> String {
    match Px4Mode::from_custom_mode(custom_mode) {
        Some(Px4Mode::Manual) => "MANUAL".to_string(),
        Some(Px4Mode::Altctl) => "ALTCTL".to_string(),
        Some(Px4Mode::Posctl) => "POSCTL".to_string(),
        Some(Px4Mode::Offboard) => "OFFBOARD".to_string(),
        Some(Px4Mode::AutoTakeoff) => "AUTO.TAKEOFF".to_string(),
        Some(Px4Mode::AutoLoiter) => "AUTO.LOITER".to_string(),
        Some(Px4Mode::AutoMission) => "AUTO.MISSION".to_string(),
        Some(Px4Mode::AutoRtl) => "AUTO.RTL".to_string(),
        Some(Px4Mode::AutoLand) => "AUTO.LAND".to_string(),
        None => format!("UNKNOWN({})", custom_mode),
    }
}
