//! Coordination channel
//!
//! A dedicated OS thread does the blocking radio reads and fills the inbound
//! queue. A tokio task drains the queue and hands each message to the
//! registered handler. Sends go straight to the radio under a send lock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::queue::{CoordinationMessage, InboundQueue};
use super::radio::{RadioError, RadioTransceiver};

/// Blocking read timeout on the worker thread
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after a failed read before trying again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Handles one inbound message per call, on the drain task
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: CoordinationMessage);
}

/// Serialized access to the radio's transmit side
#[derive(Clone)]
pub struct RadioSender {
    radio: Arc<dyn RadioTransceiver>,
    send_lock: Arc<Mutex<()>>,
}

impl RadioSender {
    pub fn new(radio: Arc<dyn RadioTransceiver>) -> Self {
        Self {
            radio,
            send_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn send_broadcast(&self, payload: &[u8]) -> Result<(), RadioError> {
        let _guard = self
            .send_lock
            .lock()
            .map_err(|_| RadioError::Transmit("send lock poisoned".into()))?;
        self.radio.send_broadcast(payload)
    }

    pub fn send_unicast(&self, address: &str, payload: &[u8]) -> Result<(), RadioError> {
        let _guard = self
            .send_lock
            .lock()
            .map_err(|_| RadioError::Transmit("send lock poisoned".into()))?;
        self.radio.send_unicast(address, payload)
    }

    pub fn node_id(&self) -> &str {
        self.radio.node_id()
    }
}

/// Radio receive worker, inbound queue and drain task
pub struct CoordinationChannel {
    radio: Arc<dyn RadioTransceiver>,
    sender: RadioSender,
    queue: Arc<InboundQueue>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl CoordinationChannel {
    pub fn new(radio: Arc<dyn RadioTransceiver>, queue_capacity: usize) -> Self {
        Self {
            sender: RadioSender::new(radio.clone()),
            radio,
            queue: Arc::new(InboundQueue::new(queue_capacity)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            drain: Mutex::new(None),
        }
    }

    /// A handle for sending. All clones share one send lock.
    pub fn sender(&self) -> RadioSender {
        self.sender.clone()
    }

    pub fn queue(&self) -> Arc<InboundQueue> {
        self.queue.clone()
    }

    /// Open the radio and start the worker thread and drain task
    pub fn open(&self, handler: Arc<dyn MessageHandler>) -> Result<(), RadioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("[RADIO] Channel already open");
            return Ok(());
        }
        if let Err(e) = self.radio.open() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!("[RADIO] Opened as {}", self.radio.node_id());

        let radio = self.radio.clone();
        let queue = self.queue.clone();
        let running = self.running.clone();
        let worker = std::thread::Builder::new()
            .name("radio-rx".into())
            .spawn(move || receive_loop(radio, queue, running))?;
        if let Ok(mut slot) = self.worker.lock() {
            *slot = Some(worker);
        }

        let queue = self.queue.clone();
        let drain = tokio::spawn(async move {
            loop {
                for message in queue.drain() {
                    handler.handle(message).await;
                }
                queue.notified().await;
            }
        });
        if let Ok(mut slot) = self.drain.lock() {
            *slot = Some(drain);
        }

        Ok(())
    }

    /// Stop the drain task, let the worker exit and close the radio
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(drain) = self.drain.lock().ok().and_then(|mut d| d.take()) {
            drain.abort();
        }
        // The worker notices within one receive timeout
        if let Some(worker) = self.worker.lock().ok().and_then(|mut w| w.take()) {
            if worker.join().is_err() {
                error!("[RADIO] Receive worker panicked");
            }
        }
        self.radio.close();
        info!("[RADIO] Closed");
    }
}

impl Drop for CoordinationChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(
    radio: Arc<dyn RadioTransceiver>,
    queue: Arc<InboundQueue>,
    running: Arc<AtomicBool>,
) {
    debug!("[RADIO] Receive worker started");
    while running.load(Ordering::SeqCst) {
        match radio.receive(RECEIVE_TIMEOUT) {
            Ok(Some(frame)) => match String::from_utf8(frame.payload.to_vec()) {
                Ok(payload) => queue.push(CoordinationMessage {
                    sender_id: frame.sender_id,
                    is_broadcast: frame.is_broadcast,
                    payload,
                    received_at: Instant::now(),
                }),
                Err(_) => warn!("[RADIO] Dropped non-UTF-8 payload from {}", frame.sender_id),
            },
            Ok(None) => {}
            Err(RadioError::Frame(reason)) => debug!("[RADIO] Bad frame: {}", reason),
            Err(e) => {
                warn!("[RADIO] Receive failed: {}", e);
                std::thread::sleep(RECEIVE_ERROR_BACKOFF);
            }
        }
    }
    debug!("[RADIO] Receive worker stopped");
}
