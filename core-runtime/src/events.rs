//! # Event Bus System
//!
//! Event-driven communication for the sync core using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The core publishes authentication and sync events through a single
//! [`EventBus`]; host surfaces (popup UI, badge, options page bridge)
//! subscribe independently. Events that map onto the UI messaging channel
//! are additionally rendered to their wire shape and published on a
//! parallel message channel: the aggregated state snapshot arrives there as
//! `{"cmd":"UpdateSync","data":[…]}`, ready to forward verbatim via
//! [`EventBus::subscribe_ui`].
//!
//! Emission is fire-and-forget: when nobody subscribes, events are dropped
//! silently.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::Started {
//!     service: "dropbox".to_string(),
//! }));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::RecvError;
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Wire command name of the aggregated state snapshot message.
pub const CMD_UPDATE_SYNC: &str = "UpdateSync";

/// Per-service progress counters for the current sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub finished: u32,
    pub total: u32,
}

/// Snapshot of one registered service, as delivered to UI consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    pub name: String,
    pub display_name: String,
    pub auth_state: String,
    pub sync_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,
    pub progress: SyncProgress,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub user_config: Value,
}

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Authentication-related events
    Auth(AuthEvent),
    /// Sync-related events
    Sync(SyncEvent),
}

/// Events related to provider authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A service's auth state changed.
    StateChanged { service: String, state: String },
}

/// Events related to synchronization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A sync run started on a service.
    Started { service: String },
    /// A sync run finished successfully.
    Completed { service: String },
    /// A sync run ended with errors.
    Failed { service: String, message: String },
    /// Debounced aggregated state snapshot across all registered services.
    StatesUpdated { states: Vec<ServiceState> },
}

impl SyncEvent {
    /// Render the event as a UI message, when it maps onto one.
    ///
    /// Only the aggregated snapshot has a wire shape:
    /// `{"cmd":"UpdateSync","data":[…]}`.
    pub fn ui_message(&self) -> Option<Value> {
        match self {
            SyncEvent::StatesUpdated { states } => Some(serde_json::json!({
                "cmd": CMD_UPDATE_SYNC,
                "data": states,
            })),
            _ => None,
        }
    }
}

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally: multiple producers (clone the
/// bus), multiple independent consumers, non-blocking sends, lag detection
/// for slow subscribers. Events with a UI wire shape are mirrored onto a
/// second channel as rendered messages.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
    ui_sender: broadcast::Sender<Value>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (ui_sender, _) = broadcast::channel(capacity);
        Self { sender, ui_sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// An event that maps onto a UI message is also rendered and published
    /// on the message channel. Returns the number of subscribers that
    /// received the event; `0` when nobody listens (the event is dropped
    /// silently).
    pub fn emit(&self, event: CoreEvent) -> usize {
        if let CoreEvent::Sync(sync) = &event {
            if let Some(message) = sync.ui_message() {
                let _ = self.ui_sender.send(message);
            }
        }
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new subscriber to receive future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Creates a new subscriber to receive rendered UI messages
    /// (`{"cmd":"UpdateSync","data":[…]}`), forwardable verbatim.
    pub fn subscribe_ui(&self) -> Receiver<Value> {
        self.ui_sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
