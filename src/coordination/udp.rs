//! UDP radio
//!
//! Emulates a shared broadcast channel over UDP for SITL runs: every frame is
//! sent to every configured peer address and carries `src>dst|` addressing.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use super::radio::{
    decode_frame, encode_frame, RadioError, RadioFrame, RadioTransceiver, BROADCAST_ADDRESS,
};

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 1500;

pub struct UdpRadio {
    node_id: String,
    bind_address: String,
    peer_addresses: Vec<String>,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    peers: RwLock<Vec<SocketAddr>>,
}

impl UdpRadio {
    pub fn new(node_id: String, bind_address: String, peer_addresses: Vec<String>) -> Self {
        Self {
            node_id,
            bind_address,
            peer_addresses,
            socket: RwLock::new(None),
            peers: RwLock::new(Vec::new()),
        }
    }

    fn socket(&self) -> Result<Arc<UdpSocket>, RadioError> {
        self.socket
            .read()
            .ok()
            .and_then(|s| s.clone())
            .ok_or(RadioError::NotOpen)
    }

    fn send_to_all(&self, frame: &[u8]) -> Result<(), RadioError> {
        let socket = self.socket()?;
        let peers = self.peers.read().map(|p| p.clone()).unwrap_or_default();
        for peer in &peers {
            socket
                .send_to(frame, peer)
                .map_err(|e| RadioError::Transmit(format!("{}: {}", peer, e)))?;
        }
        Ok(())
    }
}

impl RadioTransceiver for UdpRadio {
    fn open(&self) -> Result<(), RadioError> {
        let socket = UdpSocket::bind(&self.bind_address)?;

        let mut resolved = Vec::with_capacity(self.peer_addresses.len());
        for address in &self.peer_addresses {
            resolved.extend(address.to_socket_addrs()?);
        }
        info!(
            "[RADIO] UDP radio on {} with {} peers",
            self.bind_address,
            resolved.len()
        );

        if let Ok(mut peers) = self.peers.write() {
            *peers = resolved;
        }
        if let Ok(mut slot) = self.socket.write() {
            *slot = Some(Arc::new(socket));
        }
        Ok(())
    }

    fn send_broadcast(&self, payload: &[u8]) -> Result<(), RadioError> {
        self.send_to_all(&encode_frame(&self.node_id, BROADCAST_ADDRESS, payload))
    }

    fn send_unicast(&self, address: &str, payload: &[u8]) -> Result<(), RadioError> {
        self.send_to_all(&encode_frame(&self.node_id, address, payload))
    }

    fn receive(&self, timeout: Duration) -> Result<Option<RadioFrame>, RadioError> {
        let socket = self.socket()?;
        socket.set_read_timeout(Some(timeout))?;

        let mut buf = [0u8; MAX_DATAGRAM];
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                debug!("[RADIO] {} bytes from {}", len, from);
                decode_frame(&self.node_id, &buf[..len])
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&self) {
        if let Ok(mut slot) = self.socket.write() {
            *slot = None;
        }
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }
}
