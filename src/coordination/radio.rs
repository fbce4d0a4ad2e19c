//! Radio transceiver trait abstraction
//!
//! Every radio is a single broadcast-capable half-duplex channel. Reads are
//! blocking and driven by the coordination worker thread.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Destination marker for broadcast frames
pub const BROADCAST_ADDRESS: &str = "*";

/// Errors from a radio transceiver
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("Transmit failed: {0}")]
    Transmit(String),

    #[error("Radio is not open")]
    NotOpen,

    #[error("Radio I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    Frame(String),
}

/// A frame as delivered by the radio
#[derive(Debug, Clone, PartialEq)]
pub struct RadioFrame {
    pub sender_id: String,
    pub is_broadcast: bool,
    pub payload: Bytes,
}

/// A half-duplex broadcast radio
pub trait RadioTransceiver: Send + Sync {
    fn open(&self) -> Result<(), RadioError>;

    fn send_broadcast(&self, payload: &[u8]) -> Result<(), RadioError>;

    fn send_unicast(&self, address: &str, payload: &[u8]) -> Result<(), RadioError>;

    /// Block for up to `timeout` waiting for the next frame addressed to us
    fn receive(&self, timeout: Duration) -> Result<Option<RadioFrame>, RadioError>;

    fn close(&self);

    /// Address of this node on the radio network
    fn node_id(&self) -> &str;
}

/// Wrap a payload as `src>dst|payload` for links that carry no addressing
pub fn encode_frame(source: &str, destination: &str, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(source.len() + destination.len() + payload.len() + 3);
    frame.extend_from_slice(source.as_bytes());
    frame.push(b'>');
    frame.extend_from_slice(destination.as_bytes());
    frame.push(b'|');
    frame.extend_from_slice(payload);
    frame.push(b'\n');
    frame
}

/// Parse a `src>dst|payload` frame. Returns `Ok(None)` when the frame is our
/// own echo or is addressed to another node.
pub fn decode_frame(local_id: &str, line: &[u8]) -> Result<Option<RadioFrame>, RadioError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let split = line
        .iter()
        .position(|&b| b == b'|')
        .ok_or_else(|| RadioError::Frame("missing '|'".into()))?;
    let (address, payload) = (&line[..split], &line[split + 1..]);

    let address =
        std::str::from_utf8(address).map_err(|_| RadioError::Frame("address not UTF-8".into()))?;
    let (source, destination) = address
        .split_once('>')
        .ok_or_else(|| RadioError::Frame(format!("bad address '{}'", address)))?;
    if source.is_empty() {
        return Err(RadioError::Frame("empty source".into()));
    }

    if source == local_id {
        return Ok(None);
    }
    let is_broadcast = destination == BROADCAST_ADDRESS;
    if !is_broadcast && destination != local_id {
        return Ok(None);
    }

    Ok(Some(RadioFrame {
        sender_id: source.to_string(),
        is_broadcast,
        payload: Bytes::copy_from_slice(payload),
    }))
}
