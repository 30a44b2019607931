//! # Host Bridge Traits
//!
//! Contracts between the script sync core and its host collaborators.
//!
//! ## Overview
//!
//! This crate defines the boundary the core never crosses directly: option
//! storage, the local script collection, and remote storage providers. Each
//! trait represents a capability that is implemented elsewhere (by the host
//! extension runtime or by a concrete provider transport) and injected into
//! the core at construction time.
//!
//! ## Traits
//!
//! - [`OptionStore`](options::OptionStore) - JSON option tree (the `sync.*`
//!   subtree plus a couple of top-level options)
//! - [`ScriptStore`](scripts::ScriptStore) - the script plugin owning the
//!   local collection
//! - [`SyncProvider`](provider::SyncProvider) - a remote storage provider
//!   (transport, auth flow, locking)
//! - [`ProviderFactory`](provider::ProviderFactory) - deferred provider
//!   construction for registry registration
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Implementations should:
//!
//! - Convert vendor-specific errors to `BridgeError`
//! - Map credential rejection onto `BridgeError::Unauthorized` (or an HTTP
//!   401), which the core turns into the `unauthorized` auth state
//! - Provide actionable error messages
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent
//! usage across async tasks. Implementations must ensure thread safety.

pub mod error;
pub mod options;
pub mod provider;
pub mod scripts;

pub use error::BridgeError;

// Re-export commonly used types
pub use options::OptionStore;
pub use provider::{
    ProviderFactory, ProviderMetadata, RemoteObject, SyncProvider, DEFAULT_FETCH_DELAY,
    DEFAULT_META_FILE,
};
pub use scripts::{Script, ScriptConfig, ScriptId, ScriptInfoPatch, ScriptProps, ScriptStore, ScriptUpdate};
