//! Progress broker: multiplexes per-session events to subscribers.
//!
//! Each session has an in-memory topic holding the append-only event log.
//! Event append and subscriber dispatch happen under one lock so every
//! subscriber observes the same order. Topics are evicted a short hold after
//! the session turns terminal; late subscribers then read the terminal
//! snapshot from storage instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::session::{SessionLogEntry, SessionStatus};

/// Default buffered-event limit before a slow subscriber is disconnected.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1024;

/// Default hold before a terminal topic is evicted.
pub const DEFAULT_TERMINAL_HOLD: Duration = Duration::from_secs(60);

/// One event on a session's progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Log(SessionLogEntry),
    StatusChanged { status: SessionStatus },
}

struct TopicState {
    events: Vec<ProgressEvent>,
    subscribers: Vec<mpsc::Sender<ProgressEvent>>,
    terminal: bool,
}

struct Topic {
    state: Mutex<TopicState>,
}

impl Topic {
    fn new() -> Self {
        Self {
            state: Mutex::new(TopicState {
                events: Vec::new(),
                subscribers: Vec::new(),
                terminal: false,
            }),
        }
    }
}

/// Per-session progress topics with best-effort delivery.
pub struct ProgressBroker {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    buffer_limit: usize,
    terminal_hold: Duration,
}

impl ProgressBroker {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            buffer_limit: DEFAULT_SUBSCRIBER_BUFFER,
            terminal_hold: DEFAULT_TERMINAL_HOLD,
        }
    }

    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit.max(1);
        self
    }

    pub fn with_terminal_hold(mut self, hold: Duration) -> Self {
        self.terminal_hold = hold;
        self
    }

    fn topic(&self, request_id: &str) -> Arc<Topic> {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topics
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone()
    }

    /// Append an event and fan it out to live subscribers.
    ///
    /// Subscribers that cannot keep up (full buffer) are disconnected.
    pub fn publish(&self, request_id: &str, event: ProgressEvent) {
        let topic = self.topic(request_id);
        let mut state = topic
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        state.events.push(event.clone());
        state.subscribers.retain(|subscriber| {
            match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(request_id, "disconnecting slow progress subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Subscribe with replay from the start of the session.
    ///
    /// Returns `None` once the topic has been evicted; callers then read the
    /// terminal snapshot from the store.
    pub fn subscribe(&self, request_id: &str) -> Option<mpsc::Receiver<ProgressEvent>> {
        let topic = {
            let topics = self
                .topics
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            topics.get(request_id)?.clone()
        };

        let mut state = topic
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Capacity covers the full replay plus the live buffer allowance.
        let (tx, rx) = mpsc::channel(state.events.len() + self.buffer_limit);
        for event in &state.events {
            // Cannot fail: the channel was sized for the replay.
            let _ = tx.try_send(event.clone());
        }
        state.subscribers.push(tx);
        Some(rx)
    }

    /// Ensure a topic exists for a newly admitted session.
    pub fn register(&self, request_id: &str) {
        let _ = self.topic(request_id);
    }

    /// Mark a session terminal; the topic is evicted after the hold.
    pub fn mark_terminal(self: &Arc<Self>, request_id: &str) {
        let topic = self.topic(request_id);
        {
            let mut state = topic
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.terminal = true;
        }

        let broker = Arc::clone(self);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(broker.terminal_hold).await;
            broker.evict(&request_id);
        });
    }

    fn evict(&self, request_id: &str) {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.remove(request_id);
    }

    /// Number of live topics, for health reporting.
    pub fn topic_count(&self) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for ProgressBroker {
    fn default() -> Self {
        Self::new()
    }
}
