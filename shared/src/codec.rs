//! Coordination payload codec
//!
//! Landing handshake messages are plain ASCII:
//! ```text
//! {lat_int},{lon_int},{alt_int},{command}
//! ```
//! `lat_int`/`lon_int` are degrees × 1,000,000 and `alt_int` is metres × 10.
//! There is no checksum; loss is handled by the handshake retry policy.
//!
//! Transparent serial radios deliver a byte stream rather than packets, so
//! frames on those links are newline terminated and split by [`LineDecoder`].

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Scale between degrees and the integer wire representation
pub const COORD_SCALE: f64 = 1_000_000.0;

/// Scale between metres and the integer wire representation
pub const ALT_SCALE: f64 = 10.0;

/// Longest line accepted before the decoder gives up on a frame
pub const MAX_LINE_LEN: usize = 512;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Expected 4 comma separated fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid integer in {field} field: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("Unknown command code: {0}")]
    UnknownCommand(i64),

    #[error("Line too long: {0} bytes (max: {MAX_LINE_LEN})")]
    LineTooLong(usize),
}

/// Application level command carried in the last payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolCommand {
    /// Position report, no action requested
    Idle,
    /// Landing point announced, awaiting acknowledgement
    LandingAnnounce,
    /// Acknowledgement of a specific announcement
    Acknowledge,
}

impl ProtocolCommand {
    pub fn code(self) -> u8 {
        match self {
            ProtocolCommand::Idle => 0,
            ProtocolCommand::LandingAnnounce => 1,
            ProtocolCommand::Acknowledge => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, CodecError> {
        match code {
            0 => Ok(ProtocolCommand::Idle),
            1 => Ok(ProtocolCommand::LandingAnnounce),
            2 => Ok(ProtocolCommand::Acknowledge),
            other => Err(CodecError::UnknownCommand(other)),
        }
    }
}

/// A position in wire fixed-point units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LandingPoint {
    pub lat_e6: i64,
    pub lon_e6: i64,
    pub alt_dm: i64,
}

impl LandingPoint {
    /// Scale a geodetic position into wire units
    pub fn from_degrees(latitude: f64, longitude: f64, altitude_m: f64) -> Self {
        Self {
            lat_e6: (latitude * COORD_SCALE).round() as i64,
            lon_e6: (longitude * COORD_SCALE).round() as i64,
            alt_dm: (altitude_m * ALT_SCALE).round() as i64,
        }
    }

    pub fn latitude_deg(&self) -> f64 {
        self.lat_e6 as f64 / COORD_SCALE
    }

    pub fn longitude_deg(&self) -> f64 {
        self.lon_e6 as f64 / COORD_SCALE
    }

    pub fn altitude_m(&self) -> f64 {
        self.alt_dm as f64 / ALT_SCALE
    }
}

/// One decoded coordination payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub point: LandingPoint,
    pub command: ProtocolCommand,
}

impl ProtocolMessage {
    pub fn new(point: LandingPoint, command: ProtocolCommand) -> Self {
        Self { point, command }
    }

    /// The acknowledgement echoing this message's position
    pub fn acknowledgement(&self) -> Self {
        Self {
            point: self.point,
            command: ProtocolCommand::Acknowledge,
        }
    }

    /// Render the ASCII payload
    pub fn to_payload(&self) -> String {
        format!(
            "{},{},{},{}",
            self.point.lat_e6,
            self.point.lon_e6,
            self.point.alt_dm,
            self.command.code()
        )
    }
}

/// Encode a message into payload bytes
pub fn encode(message: &ProtocolMessage) -> Bytes {
    Bytes::from(message.to_payload())
}

/// Decode an ASCII payload
pub fn decode(payload: &str) -> Result<ProtocolMessage, CodecError> {
    let fields: Vec<&str> = payload.trim().split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(CodecError::FieldCount(fields.len()));
    }

    let lat_e6 = parse_field("latitude", fields[0])?;
    let lon_e6 = parse_field("longitude", fields[1])?;
    let alt_dm = parse_field("altitude", fields[2])?;
    let command = ProtocolCommand::from_code(parse_field("command", fields[3])?)?;

    Ok(ProtocolMessage {
        point: LandingPoint {
            lat_e6,
            lon_e6,
            alt_dm,
        },
        command,
    })
}

fn parse_field(field: &'static str, value: &str) -> Result<i64, CodecError> {
    value.parse::<i64>().map_err(|_| CodecError::InvalidField {
        field,
        value: value.to_string(),
    })
}

/// Splits a byte stream into newline terminated frames
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: BytesMut,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to take the next complete line, without its terminator
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames.
    /// An oversized partial line is discarded and reported once.
    pub fn decode_next(&mut self) -> Result<Option<Bytes>, CodecError> {
        match self.buffer.iter().position(|b| *b == b'\n') {
            Some(end) => {
                let mut line = self.buffer.split_to(end);
                self.buffer.advance(1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                if line.len() > MAX_LINE_LEN {
                    return Err(CodecError::LineTooLong(line.len()));
                }
                Ok(Some(line.freeze()))
            }
            None if self.buffer.len() > MAX_LINE_LEN => {
                let len = self.buffer.len();
                self.buffer.clear();
                Err(CodecError::LineTooLong(len))
            }
            None => Ok(None),
        }
    }
}
