//! MAVLink Command Translation
//!
//! Implements `FlightControl` on top of a `MavLink`. Long commands wait for the
//! matching COMMAND_ACK; setpoints are fire-and-forget.

use async_trait::async_trait;
use mavlink::ardupilotmega::{
    MavCmd, MavFrame, MavMessage, MavResult, PositionTargetTypemask, COMMAND_LONG_DATA,
    SET_POSITION_TARGET_LOCAL_NED_DATA,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::link::{FcEvent, MavLink};
use super::traits::{FcError, FlightControl, PositionNedYaw, VelocityNedYaw};

/// Setpoint mask: use vx, vy, vz and yaw, ignore everything else
const VELOCITY_TYPE_MASK: u16 = 0b0000_1001_1100_0111;

/// Setpoint mask: use x, y, z and yaw, ignore everything else
const POSITION_TYPE_MASK: u16 = 0b0000_1001_1111_1000;

/// MAV_MODE_FLAG_CUSTOM_MODE_ENABLED
const CUSTOM_MODE_ENABLED: f32 = 1.0;

/// PX4 flight modes, as (main mode, sub mode) pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Px4Mode {
    Manual,
    Altctl,
    Posctl,
    Offboard,
    AutoTakeoff,
    AutoLoiter,
    AutoMission,
    AutoRtl,
    AutoLand,
}

impl Px4Mode {
    pub fn main_mode(&self) -> u8 {
        match self {
            Px4Mode::Manual => 1,
            Px4Mode::Altctl => 2,
            Px4Mode::Posctl => 3,
            Px4Mode::AutoTakeoff
            | Px4Mode::AutoLoiter
            | Px4Mode::AutoMission
            | Px4Mode::AutoRtl
            | Px4Mode::AutoLand => 4,
            Px4Mode::Offboard => 6,
        }
    }

    pub fn sub_mode(&self) -> u8 {
        match self {
            Px4Mode::AutoTakeoff => 2,
            Px4Mode::AutoLoiter => 3,
            Px4Mode::AutoMission => 4,
            Px4Mode::AutoRtl => 5,
            Px4Mode::AutoLand => 6,
            _ => 0,
        }
    }

    /// Decode the `custom_mode` field of a PX4 HEARTBEAT
    pub fn from_custom_mode(custom_mode: u32) -> Option<Self> {
        let main = ((custom_mode >> 16) & 0xff) as u8;
        let sub = ((custom_mode >> 24) & 0xff) as u8;
        match (main, sub) {
            (1, _) => Some(Px4Mode::Manual),
            (2, _) => Some(Px4Mode::Altctl),
            (3, _) => Some(Px4Mode::Posctl),
            (4, 2) => Some(Px4Mode::AutoTakeoff),
            (4, 3) => Some(Px4Mode::AutoLoiter),
            (4, 4) => Some(Px4Mode::AutoMission),
            (4, 5) => Some(Px4Mode::AutoRtl),
            (4, 6) => Some(Px4Mode::AutoLand),
            (6, _) => Some(Px4Mode::Offboard),
            _ => None,
        }
    }
}

/// NAV_TAKEOFF params. PX4 reads param7 as AMSL; NaN yaw/lat/lon keep the current values.
fn takeoff_params(amsl_altitude_m: f64) -> [f32; 7] {
    [
        0.0,
        0.0,
        0.0,
        f32::NAN,
        f32::NAN,
        f32::NAN,
        amsl_altitude_m as f32,
    ]
}

/// Sends commands to the flight controller via MAVLink
pub struct MavCommandSender {
    link: Arc<MavLink>,
    target_system: u8,
    target_component: u8,
    ack_timeout: Duration,
    started: Instant,
}

impl MavCommandSender {
    /// Create a new command sender targeting the autopilot named in the link config
    pub fn new(link: Arc<MavLink>) -> Self {
        let config = link.config();
        Self {
            target_system: config.target_system,
            target_component: config.target_component,
            ack_timeout: Duration::from_millis(config.ack_timeout_ms),
            started: Instant::now(),
            link,
        }
    }

    fn command_long(&self, command: MavCmd, params: [f32; 7]) -> MavMessage {
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system: self.target_system,
            target_component: self.target_component,
            command,
            confirmation: 0,
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
        })
    }

    /// Send a COMMAND_LONG and wait for its COMMAND_ACK
    async fn send_and_ack(
        &self,
        label: &'static str,
        command: MavCmd,
        params: [f32; 7],
    ) -> Result<(), FcError> {
        // Subscribe first so the ack can't slip past
        let mut events = self.link.subscribe();
        self.link.send(&self.command_long(command, params))?;
        debug!("[FC] Sent {} ({:?})", label, command);

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(FcEvent::Message(MavMessage::COMMAND_ACK(ack)))
                        if ack.command == command =>
                    {
                        match ack.result {
                            MavResult::MAV_RESULT_ACCEPTED => return Ok(()),
                            MavResult::MAV_RESULT_IN_PROGRESS => continue,
                            other => {
                                return Err(FcError::Rejected {
                                    command: label,
                                    result: format!("{:?}", other),
                                })
                            }
                        }
                    }
                    Ok(FcEvent::Disconnected { .. }) | Err(RecvError::Closed) => {
                        return Err(FcError::LinkClosed)
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        debug!("[FC] Ack waiter skipped {} events", n);
                    }
                }
            }
        };

        match tokio::time::timeout(self.ack_timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!("[FC] No ack for {}", label);
                Err(FcError::AckTimeout(label))
            }
        }
    }

    async fn set_mode(&self, label: &'static str, mode: Px4Mode) -> Result<(), FcError> {
        info!("[FC] Switching to {:?}", mode);
        self.send_and_ack(
            label,
            MavCmd::MAV_CMD_DO_SET_MODE,
            [
                CUSTOM_MODE_ENABLED,
                mode.main_mode() as f32,
                mode.sub_mode() as f32,
                0.0,
                0.0,
                0.0,
                0.0,
            ],
        )
        .await
    }

    fn local_ned_setpoint(
        &self,
        type_mask: u16,
        position: [f32; 3],
        velocity: [f32; 3],
        yaw_deg: f64,
    ) -> MavMessage {
        MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms: self.started.elapsed().as_millis() as u32,
            x: position[0],
            y: position[1],
            z: position[2],
            vx: velocity[0],
            vy: velocity[1],
            vz: velocity[2],
            afx: 0.0,
            afy: 0.0,
            afz: 0.0,
            yaw: yaw_deg.to_radians() as f32,
            yaw_rate: 0.0,
            type_mask: PositionTargetTypemask::from_bits_truncate(type_mask),
            target_system: self.target_system,
            target_component: self.target_component,
            coordinate_frame: MavFrame::MAV_FRAME_LOCAL_NED,
        })
    }
}

#[async_trait]
impl FlightControl for MavCommandSender {
    async fn arm(&self) -> Result<(), FcError> {
        info!("[FC] Sending ARM command");
        // param1: 1 = arm
        self.send_and_ack(
            "arm",
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
        .await
    }

    async fn takeoff(&self, amsl_altitude_m: f64) -> Result<(), FcError> {
        info!("[FC] Sending TAKEOFF to {:.1}m AMSL", amsl_altitude_m);
        self.send_and_ack(
            "takeoff",
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            takeoff_params(amsl_altitude_m),
        )
        .await
    }

    async fn land(&self) -> Result<(), FcError> {
        info!("[FC] Sending LAND command");
        self.send_and_ack(
            "land",
            MavCmd::MAV_CMD_NAV_LAND,
            [0.0, 0.0, 0.0, f32::NAN, f32::NAN, f32::NAN, 0.0],
        )
        .await
    }

    async fn hold(&self) -> Result<(), FcError> {
        self.set_mode("hold", Px4Mode::AutoLoiter).await
    }

    async fn set_velocity_ned(&self, setpoint: VelocityNedYaw) -> Result<(), FcError> {
        let msg = self.local_ned_setpoint(
            VELOCITY_TYPE_MASK,
            [0.0; 3],
            [
                setpoint.north_m_s as f32,
                setpoint.east_m_s as f32,
                setpoint.down_m_s as f32,
            ],
            setpoint.yaw_deg,
        );
        self.link.send(&msg)
    }

    async fn set_position_ned(&self, setpoint: PositionNedYaw) -> Result<(), FcError> {
        let msg = self.local_ned_setpoint(
            POSITION_TYPE_MASK,
            [
                setpoint.north_m as f32,
                setpoint.east_m as f32,
                setpoint.down_m as f32,
            ],
            [0.0; 3],
            setpoint.yaw_deg,
        );
        self.link.send(&msg)
    }

    async fn start_offboard(&self) -> Result<(), FcError> {
        self.set_mode("start_offboard", Px4Mode::Offboard).await
    }

    async fn stop_offboard(&self) -> Result<(), FcError> {
        self.set_mode("stop_offboard", Px4Mode::AutoLoiter).await
    }

    fn name(&self) -> &'static str {
        "PX4 (MAVLink)"
    }
}
