//! Offline message queue.
//!
//! Messages sent while the connection is down are held here and flushed in
//! FIFO order on reconnect. The queue is bounded: when full, the oldest
//! entry is evicted first. A message that keeps failing to send is dropped
//! after a fixed number of retries.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use codelink_core::ClientMessage;
use tracing::warn;

/// Offline queue limits
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum queued messages; the oldest is evicted beyond this
    pub capacity: usize,
    /// Send attempts per message before it is dropped
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            max_retries: 3,
        }
    }
}

/// A message awaiting delivery
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: ClientMessage,
    pub queued_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// Bounded FIFO queue of undelivered messages
pub struct OfflineQueue {
    config: QueueConfig,
    items: Mutex<VecDeque<QueuedMessage>>,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl OfflineQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a message, evicting the oldest entry when the queue is full
    pub fn enqueue(&self, message: ClientMessage) {
        let mut items = self.items.lock().expect("queue lock poisoned");
        if items.len() >= self.config.capacity {
            items.pop_front();
            warn!(capacity = self.config.capacity, "Offline queue full, evicted oldest message");
        }
        items.push_back(QueuedMessage {
            message,
            queued_at: Utc::now(),
            retry_count: 0,
        });
    }

    /// Take the oldest message for a send attempt
    pub fn pop(&self) -> Option<QueuedMessage> {
        self.items.lock().expect("queue lock poisoned").pop_front()
    }

    /// Put a failed send back at the head of the queue. Returns false when
    /// the message has exhausted its retries and was dropped instead.
    pub fn record_failure(&self, mut item: QueuedMessage) -> bool {
        item.retry_count += 1;
        if item.retry_count > self.config.max_retries {
            warn!(
                retries = item.retry_count,
                "Dropping message after repeated send failures"
            );
            return false;
        }
        self.items
            .lock()
            .expect("queue lock poisoned")
            .push_front(item);
        true
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
