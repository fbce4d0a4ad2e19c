//! Coordination Module
//!
//! Radio link between cooperating vehicles: transceivers, the inbound queue
//! and drain loop, and the landing handshake built on top of them.

mod channel;
mod handshake;
mod peers;
mod queue;
mod radio;
mod serial;
mod udp;

pub use channel::{CoordinationChannel, MessageHandler, RadioSender};
pub use handshake::{AnnounceRetry, LandingHandshake};
pub use peers::{peer_geometry, run_beacon, PeerGeometry, PeerPosition, PeerTable};
pub use queue::{CoordinationMessage, InboundQueue};
pub use radio::{
    decode_frame, encode_frame, RadioError, RadioFrame, RadioTransceiver, BROADCAST_ADDRESS,
};
pub use serial::SerialRadio;
pub use udp::UdpRadio;
