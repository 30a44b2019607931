//! # Core Configuration Module
//!
//! Configuration for bootstrapping the script sync core.
//!
//! ## Overview
//!
//! The configuration uses a builder pattern to construct a [`CoreConfig`]
//! holding the host collaborators the core cannot run without. It enforces
//! fail-fast validation so a missing bridge surfaces as an actionable error
//! at construction time instead of a panic deep inside a sync run.
//!
//! ## Required Dependencies
//!
//! - `OptionStore` - option tree persistence (`sync.*` subtree, tokens, meta)
//! - `ScriptStore` - the script plugin owning the local collection
//!
//! ## Optional Dependencies
//!
//! - `EventBus` - state snapshot / sync event broadcasting (a fresh bus is
//!   created when not provided)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .option_store(Arc::new(MyOptionStore))
//!     .script_store(Arc::new(MyScriptStore))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::EventBus;
use bridge_traits::{OptionStore, ScriptStore};
use std::sync::Arc;

/// Core configuration for the script sync core.
///
/// Use [`CoreConfig::builder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Option tree persistence (required)
    pub options: Arc<dyn OptionStore>,

    /// Local script collection (required)
    pub scripts: Arc<dyn ScriptStore>,

    /// Event bus for state and sync events
    pub event_bus: EventBus,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("options", &"OptionStore { ... }")
            .field("scripts", &"ScriptStore { ... }")
            .field("event_bus", &self.event_bus)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }
}

/// Builder for [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    options: Option<Arc<dyn OptionStore>>,
    scripts: Option<Arc<dyn ScriptStore>>,
    event_bus: Option<EventBus>,
}

impl CoreConfigBuilder {
    /// Sets the option store implementation (required).
    pub fn option_store(mut self, store: Arc<dyn OptionStore>) -> Self {
        self.options = Some(store);
        self
    }

    /// Sets the script store implementation (required).
    pub fn script_store(mut self, store: Arc<dyn ScriptStore>) -> Self {
        self.scripts = Some(store);
        self
    }

    /// Sets the event bus. A default-sized bus is created when omitted.
    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityMissing`] when a required bridge is absent.
    pub fn build(self) -> Result<CoreConfig> {
        let options = self.options.ok_or_else(|| Error::CapabilityMissing {
            capability: "OptionStore".to_string(),
            message: "OptionStore implementation is required for option persistence. \
                     Inject the host's option storage adapter via .option_store()."
                .to_string(),
        })?;

        let scripts = self.scripts.ok_or_else(|| Error::CapabilityMissing {
            capability: "ScriptStore".to_string(),
            message: "ScriptStore implementation is required to reach the local script \
                     collection. Inject the script plugin adapter via .script_store()."
                .to_string(),
        })?;

        Ok(CoreConfig {
            options,
            scripts,
            event_bus: self.event_bus.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{Script, ScriptId, ScriptInfoPatch, ScriptUpdate};
    use serde_json::Value;

    struct MockOptionStore;

    #[async_trait]
    impl OptionStore for MockOptionStore {
        async fn get(&self, _path: &str) -> BridgeResult<Option<Value>> {
            Ok(None)
        }

        async fn set(&self, _path: &str, _value: Value) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct MockScriptStore;

    #[async_trait]
    impl ScriptStore for MockScriptStore {
        async fn list(&self) -> BridgeResult<Vec<Script>> {
            Ok(Vec::new())
        }

        async fn code(&self, _id: ScriptId) -> BridgeResult<String> {
            Ok(String::new())
        }

        async fn update(&self, _update: ScriptUpdate) -> BridgeResult<()> {
            Ok(())
        }

        async fn remove(&self, _id: ScriptId) -> BridgeResult<()> {
            Ok(())
        }

        async fn sort_scripts(&self) -> BridgeResult<bool> {
            Ok(false)
        }

        async fn update_script_info(
            &self,
            _id: ScriptId,
            _patch: ScriptInfoPatch,
        ) -> BridgeResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_builder_requires_option_store() {
        let result = CoreConfig::builder()
            .script_store(Arc::new(MockScriptStore))
            .build();

        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("OptionStore"));
    }

    #[test]
    fn test_builder_requires_script_store() {
        let result = CoreConfig::builder()
            .option_store(Arc::new(MockOptionStore))
            .build();

        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("ScriptStore"));
    }

    #[test]
    fn test_builder_with_all_required_fields() {
        let config = CoreConfig::builder()
            .option_store(Arc::new(MockOptionStore))
            .script_store(Arc::new(MockScriptStore))
            .build()
            .unwrap();

        assert_eq!(config.event_bus.subscriber_count(), 0);
    }

    #[test]
    fn test_builder_accepts_custom_event_bus() {
        let bus = EventBus::new(8);
        let _keep = bus.subscribe();

        let config = CoreConfig::builder()
            .option_store(Arc::new(MockOptionStore))
            .script_store(Arc::new(MockScriptStore))
            .event_bus(bus)
            .build()
            .unwrap();

        assert_eq!(config.event_bus.subscriber_count(), 1);
    }
}
