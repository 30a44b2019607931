//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the script sync core:
//! - Logging and tracing infrastructure
//! - Configuration management (host collaborator wiring)
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the sync core depends on. It
//! establishes the logging conventions and event broadcasting mechanisms
//! used throughout the system, and provides the [`config::CoreConfig`]
//! builder through which hosts inject their option and script stores.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, ServiceState, SyncProgress};
