//! Script payload codec.
//!
//! Remote script blobs come in two JSON wire shapes. Version 2 is preferred
//! for reads; version 1 is always used for writes so older clients keep
//! understanding freshly uploaded blobs:
//!
//! ```text
//! v2: { "version": 2, "custom": …, "config": {…}, "props": {"lastUpdated": …}, "code": "…" }
//! v1: { "version": 1, "more": {"custom": …, "enabled": …, "update": …, "lastUpdated": …}, "code": "…" }
//! ```
//!
//! Blobs that fail to parse as JSON degrade to code-only data so foreign
//! content still imports.

use bridge_traits::Script;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// Payload version used for uploads.
pub const WRITE_VERSION: u32 = 1;

/// Parsed payload of a remote script blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptData {
    pub code: Option<String>,
    pub custom: Option<Value>,
    pub enabled: Option<bool>,
    pub should_update: Option<bool>,
    pub last_updated: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    should_update: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireV2 {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom: Option<Value>,
    #[serde(default)]
    config: WireConfig,
    #[serde(default)]
    props: WireProps,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMoreV1 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    custom: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    update: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireV1 {
    version: u32,
    #[serde(default)]
    more: WireMoreV1,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

/// Parse a remote blob into [`ScriptData`].
///
/// Recognized versions map their fields as documented above, dropping any
/// nullish keys. Valid JSON with an unknown version yields empty data (the
/// importer skips blobs without code); non-JSON content becomes code-only.
pub fn parse_script_data(raw: &str) -> ScriptData {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => {
            return ScriptData {
                code: Some(raw.to_string()),
                ..ScriptData::default()
            }
        }
    };

    match value.get("version").and_then(Value::as_u64) {
        Some(2) => {
            let wire: WireV2 = match serde_json::from_value(value) {
                Ok(wire) => wire,
                Err(_) => return ScriptData::default(),
            };
            ScriptData {
                code: wire.code,
                custom: non_null(wire.custom),
                enabled: wire.config.enabled,
                should_update: wire.config.should_update,
                last_updated: wire.props.last_updated,
            }
        }
        Some(1) => {
            let wire: WireV1 = match serde_json::from_value(value) {
                Ok(wire) => wire,
                Err(_) => return ScriptData::default(),
            };
            ScriptData {
                code: wire.code,
                custom: non_null(wire.more.custom),
                enabled: wire.more.enabled,
                should_update: wire.more.update,
                last_updated: wire.more.last_updated,
            }
        }
        _ => ScriptData::default(),
    }
}

/// Serialize a script and its code as a blob of the given wire version.
///
/// Uploads use [`WRITE_VERSION`] (v1) for cross-client compatibility; the
/// v2 shape exists for reading newer peers and for tooling.
pub fn serialize_script(script: &Script, code: &str, version: u32) -> Result<String> {
    let result = match version {
        2 => serde_json::to_string(&WireV2 {
            version: 2,
            custom: non_null(Some(script.custom.clone())),
            config: WireConfig {
                enabled: Some(script.config.enabled),
                should_update: Some(script.config.should_update),
            },
            props: WireProps {
                last_updated: script.props.last_updated,
            },
            code: Some(code.to_string()),
        }),
        _ => serde_json::to_string(&WireV1 {
            version: 1,
            more: WireMoreV1 {
                custom: non_null(Some(script.custom.clone())),
                enabled: Some(script.config.enabled),
                update: Some(script.config.should_update),
                last_updated: script.props.last_updated,
            },
            code: Some(code.to_string()),
        }),
    };
    result.map_err(|source| SyncError::Decode {
        what: "script payload",
        source,
    })
}

fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}
