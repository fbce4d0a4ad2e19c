//! Bounded inbound message queue
//!
//! Filled by the radio worker thread, drained by a tokio task. When full the
//! oldest message is discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// A decoded radio message waiting to be handled
#[derive(Debug, Clone)]
pub struct CoordinationMessage {
    pub sender_id: String,
    pub is_broadcast: bool,
    pub payload: String,
    pub received_at: Instant,
}

pub struct InboundQueue {
    messages: Mutex<VecDeque<CoordinationMessage>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a message, evicting the oldest one when full. Safe to call
    /// from a plain OS thread.
    pub fn push(&self, message: CoordinationMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            if messages.len() >= self.capacity {
                if let Some(old) = messages.pop_front() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("[RADIO] Queue full, dropped message from {}", old.sender_id);
                }
            }
            messages.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Take everything currently queued, oldest first
    pub fn drain(&self) -> Vec<CoordinationMessage> {
        self.messages
            .lock()
            .map(|mut messages| messages.drain(..).collect())
            .unwrap_or_default()
    }

    /// Wait until a push happens. A push that raced ahead of this call still
    /// wakes it.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn message(n: usize) -> CoordinationMessage {
        CoordinationMessage {
            sender_id: "peer".into(),
            is_broadcast: true,
            payload: n.to_string(),
            received_at: Instant::now(),
        }
    }

    #[test]
    fn test_drop_oldest_keeps_newest() {
        let queue = InboundQueue::new(100);
        for n in 0..150 {
            queue.push(message(n));
        }

        assert_eq!(queue.len(), 100);
        assert_eq!(queue.dropped(), 50);

        let drained = queue.drain();
        assert_eq!(drained.len(), 100);
        assert_eq!(drained.first().map(|m| m.payload.as_str()), Some("50"));
        assert_eq!(drained.last().map(|m| m.payload.as_str()), Some("149"));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_push_from_thread_wakes_waiter() {
        let queue = Arc::new(InboundQueue::new(4));

        let producer = queue.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(message(7));
        });

        tokio::time::timeout(Duration::from_secs(2), queue.notified())
            .await
            .expect("woken by push");
        assert_eq!(queue.drain()[0].payload, "7");
    }

    #[tokio::test]
    async fn test_push_before_wait_is_not_lost() {
        let queue = InboundQueue::new(4);
        queue.push(message(1));

        tokio::time::timeout(Duration::from_millis(100), queue.notified())
            .await
            .expect("stored permit");
    }
}
