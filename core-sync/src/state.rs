//! Finite-state holders for per-service auth and sync state.
//!
//! Both states are plain enums, so only listed values are representable.
//! Every set pokes a shared change signal; the manager's notifier task
//! debounces those pokes into aggregated snapshot events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

/// Authentication state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    Idle,
    Initializing,
    Authorizing,
    Authorized,
    Unauthorized,
    Error,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Idle => "idle",
            AuthState::Initializing => "initializing",
            AuthState::Authorizing => "authorizing",
            AuthState::Authorized => "authorized",
            AuthState::Unauthorized => "unauthorized",
            AuthState::Error => "error",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AuthState::Idle),
            "initializing" => Ok(AuthState::Initializing),
            "authorizing" => Ok(AuthState::Authorizing),
            "authorized" => Ok(AuthState::Authorized),
            "unauthorized" => Ok(AuthState::Unauthorized),
            "error" => Ok(AuthState::Error),
            other => Err(format!("unknown auth state: {other}")),
        }
    }
}

/// Sync state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Ready,
    Syncing,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Ready => "ready",
            SyncState::Syncing => "syncing",
            SyncState::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncState::Idle),
            "ready" => Ok(SyncState::Ready),
            "syncing" => Ok(SyncState::Syncing),
            "error" => Ok(SyncState::Error),
            other => Err(format!("unknown sync state: {other}")),
        }
    }
}

/// A typed state holder that signals a shared notifier on every set.
///
/// Transitions are unrestricted among the enum's values.
pub struct StateCell<S> {
    label: &'static str,
    value: Mutex<S>,
    notify: Arc<Notify>,
}

impl<S> StateCell<S>
where
    S: Copy + PartialEq + fmt::Debug,
{
    pub fn new(label: &'static str, initial: S, notify: Arc<Notify>) -> Self {
        Self {
            label,
            value: Mutex::new(initial),
            notify,
        }
    }

    pub fn get(&self) -> S {
        *self.value.lock().unwrap()
    }

    pub fn set(&self, next: S) {
        {
            let mut value = self.value.lock().unwrap();
            if *value != next {
                debug!(cell = self.label, from = ?*value, to = ?next, "state transition");
            }
            *value = next;
        }
        self.notify.notify_one();
    }
}
