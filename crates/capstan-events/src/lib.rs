//! Event log for the Capstan control layer.
//!
//! Every component reports noteworthy occurrences here instead of aborting
//! the calling thread: lifecycle transitions, absorbed engine failures,
//! persistence milestones. The bus assigns sequential identifiers and keeps a
//! bounded replay ring so late subscribers (a log pane, a status bar) can
//! catch up. Internally it uses `tokio::broadcast`; when the channel
//! overflows, the oldest events are dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each event posted to the log.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Severity attached to log-style events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Critical,
    Fatal,
}

impl Severity {
    /// Stable lowercase label for display surfaces.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Fatal => "fatal",
        }
    }
}

/// Externally visible lifecycle state of a torrent controller.
///
/// `Pausing` and `Stopping` are transient: they always resolve to `Paused`
/// or `Stopped` once the engine confirms, unless superseded by a newer
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Stopped,
    Paused,
    Pausing,
    Stopping,
    Active,
}

impl LifecycleState {
    /// Whether the state is a transient one awaiting an engine confirmation.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Pausing | Self::Stopping)
    }

    /// Stable lowercase label for display surfaces.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Pausing => "pausing",
            Self::Stopping => "stopping",
            Self::Active => "active",
        }
    }
}

/// Typed events surfaced across the control layer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TorrentAdded {
        name: String,
    },
    TorrentRemoved {
        name: String,
    },
    StateChanged {
        name: String,
        state: LifecycleState,
    },
    TorrentFinished {
        name: String,
    },
    ResumeDataSaved {
        name: String,
    },
    /// A lookup failed to resolve to a live torrent, or an engine handle was
    /// invalid where one was expected.
    InvalidTorrent {
        severity: Severity,
        identifier: String,
        operation: String,
    },
    /// An engine-side failure was absorbed at the controller boundary.
    TorrentError {
        severity: Severity,
        name: String,
        operation: String,
        message: String,
    },
    /// Free-form diagnostic message.
    Message {
        severity: Severity,
        message: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for display consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Event::TorrentAdded { .. } => "torrent_added",
            Event::TorrentRemoved { .. } => "torrent_removed",
            Event::StateChanged { .. } => "state_changed",
            Event::TorrentFinished { .. } => "torrent_finished",
            Event::ResumeDataSaved { .. } => "resume_data_saved",
            Event::InvalidTorrent { .. } => "invalid_torrent",
            Event::TorrentError { .. } => "torrent_error",
            Event::Message { .. } => "message",
        }
    }

    /// Severity of the event; structural notifications report `Info`.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Event::InvalidTorrent { severity, .. }
            | Event::TorrentError { severity, .. }
            | Event::Message { severity, .. } => *severity,
            _ => Severity::Info,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, ensuring dropped events impact both structures consistently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer.lock().expect("event buffer mutex poisoned");
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Post a free-form message at the given severity.
    pub fn post(&self, severity: Severity, message: impl Into<String>) -> EventId {
        self.publish(Event::Message {
            severity,
            message: message.into(),
        })
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer.lock().expect("event buffer mutex poisoned");
            for item in buffer.iter() {
                if item.id > since {
                    backlog.push_back(item.clone());
                }
            }
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.buffer.lock().expect("event buffer mutex poisoned");
        buffer.back().map(|event| event.id)
    }

    /// Buffered events newer than `since_id`, oldest first.
    ///
    /// Synchronous view of the replay ring for polling consumers; events
    /// that have already rolled out of the ring are gone.
    ///
    /// # Panics
    ///
    /// Panics if the replay buffer mutex has been poisoned.
    #[must_use]
    pub fn events_since(&self, since_id: EventId) -> Vec<EventEnvelope> {
        let buffer = self.buffer.lock().expect("event buffer mutex poisoned");
        buffer
            .iter()
            .filter(|event| event.id > since_id)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.receiver.recv().await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_state_event(id: usize) -> Event {
        Event::StateChanged {
            name: format!("torrent-{id}"),
            state: LifecycleState::Active,
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_state_event(i));
        }
        assert_eq!(last_id, 5);

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().unwrap().id, 3);
        assert_eq!(received.last().unwrap().id, 5);

        let polled = bus.events_since(3);
        assert_eq!(polled.len(), 2);
        assert_eq!(polled.first().unwrap().id, 4);
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    timeout(PUBLISH_TIMEOUT, async move {
                        let _ = publish_bus.publish(sample_state_event(i));
                    })
                    .await
                    .expect("publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = consumer.await.expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn severity_defaults_to_info_for_structural_events() {
        let event = Event::TorrentAdded {
            name: "alpha".into(),
        };
        assert_eq!(event.severity(), Severity::Info);
        assert_eq!(event.kind(), "torrent_added");

        let error = Event::TorrentError {
            severity: Severity::Critical,
            name: "alpha".into(),
            operation: "details".into(),
            message: "invalid handle".into(),
        };
        assert_eq!(error.severity(), Severity::Critical);
    }

    #[test]
    fn transient_states_are_flagged() {
        assert!(LifecycleState::Pausing.is_transient());
        assert!(LifecycleState::Stopping.is_transient());
        assert!(!LifecycleState::Active.is_transient());
        assert!(!LifecycleState::Stopped.is_transient());
        assert_eq!(LifecycleState::Paused.label(), "paused");
    }
}
