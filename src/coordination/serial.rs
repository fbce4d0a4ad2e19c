//! Serial radio
//!
//! Drives a transparent-mode radio modem (XBee, SiK, LoRa bridge) on a serial
//! port. The modem broadcasts every byte written, so frames carry their own
//! `src>dst|` addressing and are newline delimited.

use std::io::{ErrorKind, Read, Write};
use std::sync::Mutex;
use std::time::Duration;
use swarm_shared::codec::LineDecoder;
use tokio_serial::SerialPort;
use tracing::{info, warn};

use super::radio::{
    decode_frame, encode_frame, RadioError, RadioFrame, RadioTransceiver, BROADCAST_ADDRESS,
};

struct Receiver {
    port: Box<dyn SerialPort>,
    decoder: LineDecoder,
}

pub struct SerialRadio {
    node_id: String,
    path: String,
    baud: u32,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    reader: Mutex<Option<Receiver>>,
}

impl SerialRadio {
    pub fn new(node_id: String, path: String, baud: u32) -> Self {
        Self {
            node_id,
            path,
            baud,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    fn write_frame(&self, frame: &[u8]) -> Result<(), RadioError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| RadioError::Transmit("writer lock poisoned".into()))?;
        let port = writer.as_mut().ok_or(RadioError::NotOpen)?;
        port.write_all(frame)
            .and_then(|_| port.flush())
            .map_err(|e| RadioError::Transmit(e.to_string()))
    }
}

impl RadioTransceiver for SerialRadio {
    fn open(&self) -> Result<(), RadioError> {
        let port = tokio_serial::new(&self.path, self.baud)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| RadioError::Io(e.into()))?;
        let read_half = port.try_clone().map_err(|e| RadioError::Io(e.into()))?;
        info!("[RADIO] Serial radio on {} @ {} baud", self.path, self.baud);

        if let Ok(mut writer) = self.writer.lock() {
            *writer = Some(port);
        }
        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(Receiver {
                port: read_half,
                decoder: LineDecoder::new(),
            });
        }
        Ok(())
    }

    fn send_broadcast(&self, payload: &[u8]) -> Result<(), RadioError> {
        self.write_frame(&encode_frame(&self.node_id, BROADCAST_ADDRESS, payload))
    }

    fn send_unicast(&self, address: &str, payload: &[u8]) -> Result<(), RadioError> {
        self.write_frame(&encode_frame(&self.node_id, address, payload))
    }

    fn receive(&self, timeout: Duration) -> Result<Option<RadioFrame>, RadioError> {
        let mut guard = self
            .reader
            .lock()
            .map_err(|_| RadioError::Frame("reader lock poisoned".into()))?;
        let receiver = guard.as_mut().ok_or(RadioError::NotOpen)?;

        loop {
            // Serve lines already buffered before touching the port again
            match receiver.decoder.decode_next() {
                Ok(Some(line)) => match decode_frame(&self.node_id, &line) {
                    Ok(Some(frame)) => return Ok(Some(frame)),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("[RADIO] {}", e);
                        continue;
                    }
                },
                Ok(None) => {}
                Err(e) => warn!("[RADIO] Discarded serial input: {}", e),
            }

            receiver
                .port
                .set_timeout(timeout)
                .map_err(|e| RadioError::Io(e.into()))?;
            let mut buf = [0u8; 256];
            match receiver.port.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => receiver.decoder.extend(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            *writer = None;
        }
        if let Ok(mut reader) = self.reader.lock() {
            *reader = None;
        }
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unopened_port() {
        let radio = SerialRadio::new("scout".into(), "/dev/ttyUSB0".into(), 57600);
        assert_eq!(radio.node_id(), "scout");
        assert!(matches!(radio.send_broadcast(b"x"), Err(RadioError::NotOpen)));
        assert!(matches!(
            radio.receive(Duration::from_millis(1)),
            Err(RadioError::NotOpen)
        ));
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let radio = SerialRadio::new("scout".into(), "/dev/does-not-exist".into(), 57600);
        assert!(matches!(radio.open(), Err(RadioError::Io(_))));
    }
}
