//! Script Store Contract
//!
//! The script store plugin owns the local script collection; the sync core
//! only drives it through this interface. Scripts are opaque to the core
//! except for the identity and bookkeeping fields modeled here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Local script identifier, only meaningful to the owning [`ScriptStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptId(pub i64);

impl std::fmt::Display for ScriptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bookkeeping properties of a local script.
///
/// `uri` is the stable logical identity across devices and the join key for
/// reconciliation. All timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptProps {
    pub uri: String,

    /// Last local modification time; absent means unknown (treated as 0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,

    /// Last time the script body was updated from its source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,

    /// Ordering rank within the local list (1-based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

/// User-visible toggles carried with a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub enabled: bool,
    pub should_update: bool,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            should_update: true,
        }
    }
}

/// A local script as listed by the store. Code bytes are fetched separately
/// via [`ScriptStore::code`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub props: ScriptProps,
    #[serde(default)]
    pub custom: Value,
    #[serde(default)]
    pub config: ScriptConfig,
}

impl Script {
    pub fn uri(&self) -> &str {
        &self.props.uri
    }

    /// Local modification stamp, 0 when unknown.
    pub fn last_modified(&self) -> i64 {
        self.props.last_modified.unwrap_or(0)
    }
}

/// Payload handed to [`ScriptStore::update`] when importing remote content.
///
/// Absent fields are left untouched by the store; the store matches an
/// existing script by `uri` or creates a new one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptUpdate {
    pub uri: String,
    pub code: String,
    pub custom: Option<Value>,
    pub enabled: Option<bool>,
    pub should_update: Option<bool>,
    pub last_updated: Option<i64>,
    pub last_modified: Option<i64>,
    pub position: Option<i64>,
}

/// Partial update for script bookkeeping without touching the body.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScriptInfoPatch {
    pub position: Option<i64>,
}

/// Script store plugin interface.
///
/// The store exclusively owns the local collection; the core never holds
/// script state across calls.
#[async_trait::async_trait]
pub trait ScriptStore: Send + Sync {
    /// Enumerate all local scripts.
    async fn list(&self) -> Result<Vec<Script>>;

    /// Fetch the code body of a script.
    async fn code(&self, id: ScriptId) -> Result<String>;

    /// Create or update a script from imported remote content.
    async fn update(&self, update: ScriptUpdate) -> Result<()>;

    /// Delete a script.
    async fn remove(&self, id: ScriptId) -> Result<()>;

    /// Re-normalize positions across the whole list.
    ///
    /// Returns `true` when any position changed.
    async fn sort_scripts(&self) -> Result<bool>;

    /// Apply a bookkeeping-only patch (no script body involved).
    async fn update_script_info(&self, id: ScriptId, patch: ScriptInfoPatch) -> Result<()>;
}
