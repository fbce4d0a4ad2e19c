//! Detector feed
//!
//! Receives `found,centered,x,y,z` datagrams from the detection process and
//! publishes them to a `SharedDetector`.

use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detector::{DetectorReading, SharedDetector};

#[derive(Error, Debug, PartialEq)]
pub enum FeedError {
    #[error("Expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid flag: {0}")]
    Flag(String),

    #[error("Invalid offset: {0}")]
    Offset(String),
}

fn parse_flag(field: &str) -> Result<bool, FeedError> {
    match field.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(FeedError::Flag(other.to_string())),
    }
}

fn parse_offset(field: &str) -> Result<f64, FeedError> {
    let value: f64 = field
        .trim()
        .parse()
        .map_err(|_| FeedError::Offset(field.trim().to_string()))?;
    if !value.is_finite() {
        return Err(FeedError::Offset(field.trim().to_string()));
    }
    Ok(value.clamp(-1.0, 1.0))
}

/// Parse one feed line
pub fn parse_reading(line: &str) -> Result<DetectorReading, FeedError> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() != 5 {
        return Err(FeedError::FieldCount(fields.len()));
    }
    Ok(DetectorReading {
        found: parse_flag(fields[0])?,
        centered: parse_flag(fields[1])?,
        offset: (
            parse_offset(fields[2])?,
            parse_offset(fields[3])?,
            parse_offset(fields[4])?,
        ),
    })
}

pub struct DetectorFeed {
    socket: UdpSocket,
    detector: SharedDetector,
}

impl DetectorFeed {
    pub async fn bind(address: &str, detector: SharedDetector) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        info!("[VISION] Detector feed on {}", socket.local_addr()?);
        Ok(Self { socket, detector })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Publish readings until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = [0u8; 512];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };
            let (len, from) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!("[VISION] Feed receive failed: {}", e);
                    continue;
                }
            };

            let Ok(line) = std::str::from_utf8(&buf[..len]) else {
                warn!("[VISION] Non-UTF-8 datagram from {}", from);
                continue;
            };
            match parse_reading(line) {
                Ok(reading) => {
                    debug!("[VISION] {:?}", reading);
                    self.detector.update(reading);
                }
                Err(e) => warn!("[VISION] Bad feed line {:?}: {}", line.trim(), e),
            }
        }
        debug!("[VISION] Detector feed stopped");
    }
}
