//! # Script Sync Core
//!
//! Keeps the local user-script collection in agreement with a remote copy
//! held by a cloud storage provider.
//!
//! ## Overview
//!
//! Multiple named providers may be registered; exactly one is *current* at
//! any time and only that one syncs. Reconciliation is a lightweight
//! two-way protocol mediated by a single remote metadata object: scripts
//! join by URI, per-script `lastModified` stamps and the remote epoch decide
//! upload/download/delete/reposition, and conflicts resolve last-writer-wins
//! with a whole script as the unit.
//!
//! ## Components
//!
//! - **Naming** (`filename`): URI ↔ remote object name convention
//! - **Codec** (`codec`): v1/v2 script payload wire shapes
//! - **Config facade** (`config`): typed view over the `sync.*` option tree
//! - **State cells** (`state`): auth and sync state with change signaling
//! - **Service base** (`service`): lifecycle, rate-limited fetch, progress,
//!   coalesced and serialized sync entry
//! - **Manager** (`manager`): provider registry and public dispatch surface
//! - **Reconciler** (`reconciler`): the diff-and-apply algorithm
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_sync::SyncManager;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::builder()
//!     .option_store(Arc::new(MyOptionStore))
//!     .script_store(Arc::new(MyScriptStore))
//!     .build()?;
//!
//! let manager = SyncManager::new(config);
//! manager.register(|| my_provider());
//! manager.initialize().await?;
//!
//! // Trigger a sync on the current provider
//! manager.sync().await?.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod filename;
pub mod manager;
pub mod meta;
pub mod reconciler;
pub mod service;
pub mod state;

pub use codec::{parse_script_data, serialize_script, ScriptData, WRITE_VERSION};
pub use config::{ServiceConfig, SyncConfig, CURRENT_KEY};
pub use error::{Result, SyncError};
pub use filename::{is_script_file, script_file_name, uri_from_file_name};
pub use manager::SyncManager;
pub use meta::{normalize_meta, LocalMeta, RemoteMetaData, RemoteScriptInfo};
pub use service::{SyncHandle, SyncService, SYNC_COALESCE_DELAY};
pub use state::{AuthState, SyncState};
