//! Option Tree Storage
//!
//! Abstracts the host's option storage as a JSON tree addressed by dotted
//! paths. The sync core reads and writes the `sync.*` subtree plus a couple
//! of top-level options (`lastModified`, `syncScriptStatus`); everything else
//! in the tree belongs to the host.

use serde_json::Value;

use crate::error::Result;

/// JSON-tree option store.
///
/// Paths are dot-separated object keys (e.g. `sync.services.dropbox.token`).
/// Path segments never contain dots: the core only addresses well-known keys
/// and provider names, never user data such as script URIs.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::options::OptionStore;
/// use serde_json::json;
///
/// async fn select_provider(options: &dyn OptionStore) -> bridge_traits::error::Result<()> {
///     options.set("sync.current", json!("dropbox")).await?;
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait OptionStore: Send + Sync {
    /// Read the value at `path`.
    ///
    /// Returns `Ok(None)` when the path (or any intermediate object) does
    /// not exist.
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Write `value` at `path`, creating intermediate objects as needed.
    ///
    /// Writes persist immediately; there is no transactionality.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Remove the value at `path`.
    ///
    /// The default implementation writes JSON `null`, which the core treats
    /// the same as an absent value.
    async fn remove(&self, path: &str) -> Result<()> {
        self.set(path, Value::Null).await
    }
}
