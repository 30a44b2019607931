//! Sync Provider Contract
//!
//! Abstracts remote storage providers (Dropbox-style file hosts, WebDAV
//! servers, etc.) behind a single trait. The core drives a provider through
//! this interface only; OAuth flows and HTTP verbs against the vendor API
//! live entirely inside the implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Default name of the remote metadata object.
pub const DEFAULT_META_FILE: &str = "Violentmonkey";

/// Default minimum gap between two requests against the same provider.
pub const DEFAULT_FETCH_DELAY: Duration = Duration::from_millis(1000);

/// A file-like object in the remote store.
///
/// `name` follows the filename convention; `uri` is the decoded script
/// identity when the object holds a script. `metadata` carries provider
/// fields (object ids, revisions) that must survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl RemoteObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

/// Static description of a provider.
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    /// Stable registry key (`sync.current` stores this).
    pub name: &'static str,

    /// Human-readable name for UI surfaces.
    pub display_name: &'static str,

    /// Provider-declared properties surfaced in state snapshots
    /// (e.g. auth type).
    pub properties: Value,

    /// Prefix of URLs that may complete this provider's auth flow.
    pub url_prefix: Option<&'static str>,

    /// Name of the remote metadata object.
    pub meta_file: &'static str,

    /// Minimum gap between two requests to this provider.
    pub delay: Duration,
}

impl ProviderMetadata {
    pub fn new(name: &'static str, display_name: &'static str) -> Self {
        Self {
            name,
            display_name,
            properties: Value::Null,
            url_prefix: None,
            meta_file: DEFAULT_META_FILE,
            delay: DEFAULT_FETCH_DELAY,
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_url_prefix(mut self, prefix: &'static str) -> Self {
        self.url_prefix = Some(prefix);
        self
    }

    pub fn with_meta_file(mut self, name: &'static str) -> Self {
        self.meta_file = name;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Remote storage provider.
///
/// Listing excludes the metadata object; `get`/`put`/`remove` address
/// objects by the record handed back from `list` (or synthesized by the
/// core for uploads, where the canonical name routes by URI).
#[async_trait::async_trait]
pub trait SyncProvider: Send + Sync {
    fn metadata(&self) -> &ProviderMetadata;

    /// Kick off the provider's interactive authorization flow.
    async fn authorize(&self) -> Result<()>;

    /// Revoke the current authorization with the vendor.
    async fn revoke(&self) -> Result<()>;

    /// Check whether `url` completes this provider's auth flow.
    ///
    /// Returns the redeemed access token when it does; the core persists it
    /// and re-runs the sync check.
    async fn check_auth(&self, url: &str) -> Result<Option<String>>;

    /// Push the stored token into the provider so subsequent requests carry
    /// the derived authorization header. `None` clears it.
    fn apply_token(&self, token: Option<&str>);

    /// Validate the current token against the vendor account endpoint.
    async fn user(&self) -> Result<()>;

    /// Enumerate remote script objects, excluding the metadata object.
    async fn list(&self) -> Result<Vec<RemoteObject>>;

    /// Download an object's content.
    async fn get(&self, obj: &RemoteObject) -> Result<Bytes>;

    /// Upload content, returning the stored record.
    async fn put(&self, obj: &RemoteObject, data: Bytes) -> Result<RemoteObject>;

    /// Delete an object.
    async fn remove(&self, obj: &RemoteObject) -> Result<()>;

    /// Take the provider-level sync lock. Default: no lock support.
    async fn acquire_lock(&self) -> Result<()> {
        Ok(())
    }

    /// Release the provider-level sync lock. Default: no lock support.
    async fn release_lock(&self) -> Result<()> {
        Ok(())
    }

    /// Provider-specific user configuration as shown in state snapshots.
    fn user_config(&self) -> Value {
        Value::Null
    }

    /// Apply provider-specific user configuration.
    async fn set_user_config(&self, _config: Value) -> Result<()> {
        Ok(())
    }

    /// Map an error from fetching or decoding the metadata object onto
    /// replacement content. The default rethrows; providers typically map
    /// missing-meta onto empty-object bytes so a fresh remote bootstraps.
    fn handle_meta_error(&self, _err: &BridgeError) -> Option<Bytes> {
        None
    }
}

/// Builds a provider instance; registered with the manager before
/// initialization and invoked exactly once.
pub trait ProviderFactory: Send + Sync {
    fn build(&self) -> Arc<dyn SyncProvider>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> Arc<dyn SyncProvider> + Send + Sync,
{
    fn build(&self) -> Arc<dyn SyncProvider> {
        (self)()
    }
}
