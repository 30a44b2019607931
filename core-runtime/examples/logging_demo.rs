//! Logging system demonstration
//!
//! This example shows how to use the logging infrastructure in different modes.
//!
//! Run with:
//! ```bash
//! # Pretty format (default in debug)
//! cargo run --example logging_demo
//!
//! # JSON format
//! cargo run --example logging_demo -- json
//!
//! # Compact format
//! cargo run --example logging_demo -- compact
//!
//! # With custom filter
//! cargo run --example logging_demo -- pretty "core_runtime=trace"
//! ```

use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use std::env;
use tracing::{debug, info, instrument, warn, Level};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let format = match args.get(1).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        Some("pretty") => LogFormat::Pretty,
        _ => LogFormat::default(),
    };

    let mut config = LoggingConfig::default()
        .with_format(format)
        .with_level(Level::TRACE)
        .with_target(true);
    if let Some(filter) = args.get(2) {
        config = config.with_filter(filter.clone());
    }

    init_logging(config).expect("Failed to initialize logging");

    info!(format = ?format, "logging initialized");

    debug!(service = "dropbox", "preparing sync service");
    info!(
        service = "dropbox",
        scripts = 12,
        "remote listing fetched"
    );
    warn!(service = "dropbox", attempt = 2, "retrying metadata write");

    // Token-adjacent values should be routed through the redaction helper.
    let token = "secret-token-value";
    info!(token = %redact_if_sensitive("token", token), "token loaded");

    run_demo_sync("dropbox").await;

    info!("demo complete");
}

#[instrument]
async fn run_demo_sync(service: &str) {
    info!("sync started");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    info!(uploads = 1, downloads = 2, "sync finished");
}
