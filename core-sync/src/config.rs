//! Typed view over the `sync.*` option subtree.
//!
//! [`SyncConfig`] roots every path at `sync`; [`ServiceConfig`] scopes a
//! further `services.<name>` prefix for one registered service. Writes go
//! straight through the host option store; there is no transactionality.

use std::sync::Arc;

use bridge_traits::OptionStore;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::Result;
use crate::meta::LocalMeta;

const ROOT: &str = "sync";

/// Option key holding the name of the current service.
pub const CURRENT_KEY: &str = "sync.current";

/// Facade over the option store, rooted at the `sync` subtree.
#[derive(Clone)]
pub struct SyncConfig {
    store: Arc<dyn OptionStore>,
}

impl SyncConfig {
    pub fn new(store: Arc<dyn OptionStore>) -> Self {
        Self { store }
    }

    /// Make sure the root subtree exists with at least `{services: {}}`.
    pub async fn ensure_root(&self) -> Result<()> {
        let root = self.store.get(ROOT).await?;
        if !root.as_ref().is_some_and(Value::is_object) {
            self.store.set(ROOT, json!({ "services": {} })).await?;
            return Ok(());
        }
        if self.get("services").await?.filter(|v| v.is_object()).is_none() {
            self.set("services", json!({})).await?;
        }
        Ok(())
    }

    /// Read a value under the `sync` root.
    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        let value = self.store.get(&format!("{ROOT}.{path}")).await?;
        Ok(value.filter(|v| !v.is_null()))
    }

    /// Write a value under the `sync` root.
    pub async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.store.set(&format!("{ROOT}.{path}"), value).await?;
        Ok(())
    }

    /// The name of the current service, when one is selected.
    pub async fn current(&self) -> Result<Option<String>> {
        Ok(self
            .get("current")
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty()))
    }

    /// Last time the local script store changed at all. Top-level option,
    /// sibling of the `sync` subtree.
    pub async fn global_last_modified(&self) -> i64 {
        match self.store.get("lastModified").await {
            Ok(value) => value.and_then(|v| v.as_i64()).unwrap_or(0),
            Err(err) => {
                warn!(error = %err, "failed to read global lastModified");
                0
            }
        }
    }

    /// Whether script enablement travels across devices. Top-level option,
    /// default true.
    pub async fn sync_script_status(&self) -> bool {
        match self.store.get("syncScriptStatus").await {
            Ok(value) => value.and_then(|v| v.as_bool()).unwrap_or(true),
            Err(err) => {
                warn!(error = %err, "failed to read syncScriptStatus");
                true
            }
        }
    }

    /// Scope a facade onto one service's subtree.
    pub fn service(&self, name: &str) -> ServiceConfig {
        ServiceConfig {
            store: Arc::clone(&self.store),
            prefix: format!("{ROOT}.services.{name}"),
        }
    }
}

/// Facade over one service's subtree (`sync.services.<name>`).
#[derive(Clone)]
pub struct ServiceConfig {
    store: Arc<dyn OptionStore>,
    prefix: String,
}

impl ServiceConfig {
    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        let value = self.store.get(&format!("{}.{path}", self.prefix)).await?;
        Ok(value.filter(|v| !v.is_null()))
    }

    pub async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.store.set(&format!("{}.{path}", self.prefix), value).await?;
        Ok(())
    }

    /// Merge an object patch into the service subtree, key by key.
    pub async fn patch(&self, patch: Value) -> Result<()> {
        if let Value::Object(map) = patch {
            for (key, value) in map {
                self.set(&key, value).await?;
            }
        }
        Ok(())
    }

    /// Wipe the whole service subtree.
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(&self.prefix).await?;
        Ok(())
    }

    pub async fn token(&self) -> Result<Option<String>> {
        Ok(self
            .get("token")
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|t| !t.is_empty()))
    }

    pub async fn set_token(&self, token: Option<&str>) -> Result<()> {
        match token {
            Some(token) => self.set("token", json!(token)).await,
            None => self.set("token", Value::Null).await,
        }
    }

    /// The persisted local meta record; a missing or malformed value reads
    /// as the first-sync state.
    pub async fn meta(&self) -> Result<LocalMeta> {
        let Some(value) = self.get("meta").await? else {
            return Ok(LocalMeta::default());
        };
        Ok(serde_json::from_value(value).unwrap_or_else(|err| {
            warn!(error = %err, "malformed local meta, treating as first sync");
            LocalMeta::default()
        }))
    }

    pub async fn set_meta(&self, meta: &LocalMeta) -> Result<()> {
        let value = serde_json::to_value(meta).unwrap_or(Value::Null);
        self.set("meta", value).await
    }

    pub async fn user_config(&self) -> Result<Option<Value>> {
        self.get("userConfig").await
    }

    pub async fn set_user_config(&self, config: Value) -> Result<()> {
        self.set("userConfig", config).await
    }
}
