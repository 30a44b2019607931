//! Remote and local sync metadata.
//!
//! One JSON object on the remote side indexes every remote script by URI and
//! carries the remote epoch; a small per-service record on the local side
//! remembers the epoch observed at the end of the last successful sync.

use std::collections::BTreeMap;

use bridge_traits::RemoteObject;
use serde::{Deserialize, Serialize};

/// Per-URI entry in the remote metadata index.
///
/// `modified` is 0 only before normalization; afterwards it always carries a
/// positive stamp. `position` is the ordering rank last written by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteScriptInfo {
    #[serde(default)]
    pub modified: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl RemoteScriptInfo {
    /// The position when it is meaningful (present and positive).
    pub fn position(&self) -> Option<i64> {
        self.position.filter(|p| *p > 0)
    }
}

/// The remote metadata object: `{ timestamp, info: { <uri>: {…} } }`.
///
/// `timestamp` is the remote epoch used to decide outdatedness; `info` keys
/// are exactly the set of remote script URIs once normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMetaData {
    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub info: BTreeMap<String, RemoteScriptInfo>,
}

/// Per-service local record, persisted at `sync.services.<name>.meta`.
///
/// An absent `timestamp` marks the first sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<i64>,
}

/// Rebuild the metadata index against the actual remote listing.
///
/// The index keys become exactly the remote script URIs: stale entries drop,
/// missing entries appear, and entries without a `modified` stamp get `now`.
/// Returns whether the metadata drifted from what the remote currently
/// holds and therefore needs to be written back (a zero epoch or a key-count
/// mismatch also forces a write).
pub fn normalize_meta(meta: &mut RemoteMetaData, remote: &[RemoteObject], now: i64) -> bool {
    let mut changed = meta.timestamp == 0 || meta.info.len() != remote.len();

    let mut stale = std::mem::take(&mut meta.info);
    for obj in remote {
        let Some(uri) = obj.uri.as_deref() else {
            continue;
        };
        let mut entry = match stale.remove(uri) {
            Some(entry) => entry,
            None => {
                changed = true;
                RemoteScriptInfo::default()
            }
        };
        if entry.modified == 0 {
            entry.modified = now;
            changed = true;
        }
        meta.info.insert(uri.to_string(), entry);
    }

    changed
}
