//! The reconciliation algorithm.
//!
//! Diffs the local script list against the remote listing by URI, using the
//! remote metadata index and per-script `lastModified` stamps to decide what
//! to upload, download, delete, or reposition. The run has three explicit
//! phases (per-item operations, position sort, metadata commit) with one
//! error collection across all three; any captured error fails the sync as
//! a whole.
//!
//! Conflict policy is last-writer-wins with a whole script as the unit.
//! The classification is total: every local/remote pair lands in exactly
//! one bucket.

use std::collections::BTreeMap;

use bridge_traits::{BridgeError, RemoteObject, Script, ScriptId, ScriptInfoPatch, ScriptUpdate};
use bytes::Bytes;
use futures::future::{join_all, BoxFuture};
use tracing::{debug, info};

use crate::codec::{self, WRITE_VERSION};
use crate::error::{Result, SyncError};
use crate::filename;
use crate::meta::{normalize_meta, LocalMeta, RemoteMetaData, RemoteScriptInfo};
use crate::service::SyncService;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

type OpResult = std::result::Result<(), String>;

/// A remote script to import locally, with the metadata entry observed at
/// planning time.
#[derive(Debug, Clone)]
struct Download {
    object: RemoteObject,
    info: RemoteScriptInfo,
}

/// A local script to write out, reusing the existing remote record (minus
/// its name, so the canonical name routes by URI) when one exists.
#[derive(Debug, Clone)]
struct Upload {
    script: Script,
    base: Option<RemoteObject>,
}

/// Everything one reconciliation pass decided to do.
#[derive(Debug, Default)]
struct SyncPlan {
    downloads: Vec<Download>,
    uploads: Vec<Upload>,
    remote_deletions: Vec<RemoteObject>,
    local_deletions: Vec<ScriptId>,
    repositions: Vec<(ScriptId, i64)>,
}

struct ClassifyContext {
    first_sync: bool,
    outdated: bool,
    remote_timestamp: i64,
    global_last_modified: i64,
}

/// Run one full reconciliation for `service`.
///
/// Only reachable through the service's serialized `start_sync` path.
pub(crate) async fn run(service: &SyncService) -> Result<()> {
    let now = now_ms();

    // Inputs: remote meta, remote listing, local list, local meta, globals.
    let mut meta = load_meta(service).await?;
    let remote_list = load_remote_list(service).await?;
    let local_list = service.scripts().list().await.map_err(SyncError::from)?;
    let local_meta = service.service_config().meta().await?;
    let global_last_modified = service.sync_config().global_last_modified().await;
    let import_status = service.sync_config().sync_script_status().await;

    let remote_timestamp = meta.timestamp;
    let first_sync = local_meta.timestamp.is_none();
    let outdated = first_sync || remote_timestamp > local_meta.timestamp.unwrap_or(0);
    debug!(
        first_sync,
        outdated,
        remote_timestamp,
        local_scripts = local_list.len(),
        remote_scripts = remote_list.len(),
        "classifying"
    );

    let mut changed = normalize_meta(&mut meta, &remote_list, now);

    let mut remote_map = BTreeMap::new();
    for obj in remote_list {
        if let Some(uri) = obj.uri.clone() {
            remote_map.insert(uri, obj);
        }
    }

    let ctx = ClassifyContext {
        first_sync,
        outdated,
        remote_timestamp,
        global_last_modified,
    };
    let plan = build_plan(&ctx, &local_list, remote_map, &mut meta, &mut changed, now);
    info!(
        downloads = plan.downloads.len(),
        uploads = plan.uploads.len(),
        remote_deletions = plan.remote_deletions.len(),
        local_deletions = plan.local_deletions.len(),
        repositions = plan.repositions.len(),
        "sync plan ready"
    );

    // Lock window covers every mutation, including the meta write.
    service.provider().acquire_lock().await.map_err(SyncError::from)?;
    let errors = apply(service, plan, &mut meta, &mut changed, import_status).await;
    if let Err(err) = service.provider().release_lock().await {
        debug!(error = %err, "lock release failed");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SyncError::Aggregate { errors })
    }
}

/// Fetch and decode the remote metadata object, letting the provider remap
/// fetch or decode failures (typically missing-meta onto `{}`).
async fn load_meta(service: &SyncService) -> Result<RemoteMetaData> {
    let provider = service.provider();
    let object = RemoteObject::new(service.provider_meta().meta_file);

    let bytes = match service.fetch(provider.get(&object)).await {
        Ok(bytes) => bytes,
        Err(SyncError::Bridge(err)) => match provider.handle_meta_error(&err) {
            Some(bytes) => bytes,
            None => return Err(err.into()),
        },
        Err(err) => return Err(err),
    };

    match serde_json::from_slice::<RemoteMetaData>(&bytes) {
        Ok(meta) => Ok(meta),
        Err(source) => {
            let decode_err = BridgeError::Serialization(source.to_string());
            match provider.handle_meta_error(&decode_err) {
                Some(bytes) => {
                    serde_json::from_slice(&bytes).map_err(|source| SyncError::Decode {
                        what: "remote meta",
                        source,
                    })
                }
                None => Err(SyncError::Decode {
                    what: "remote meta",
                    source,
                }),
            }
        }
    }
}

/// List remote script objects, dropping anything that is not a script file
/// and deriving URIs from names where the provider left them out.
async fn load_remote_list(service: &SyncService) -> Result<Vec<RemoteObject>> {
    let listed = service.fetch(service.provider().list()).await?;
    let meta_file = service.provider_meta().meta_file;

    let mut remote = Vec::with_capacity(listed.len());
    for mut obj in listed {
        if obj.name == meta_file || !filename::is_script_file(&obj.name) {
            debug!(name = %obj.name, "ignoring non-script remote object");
            continue;
        }
        if obj.uri.is_none() {
            obj.uri = filename::uri_from_file_name(&obj.name);
        }
        remote.push(obj);
    }
    Ok(remote)
}

/// Classify every script into exactly one bucket.
///
/// Metadata mutations (stamp adoption, position resolution, entry upserts
/// and removals) happen here, under exclusive ownership of the meta value;
/// the apply phase only performs I/O.
fn build_plan(
    ctx: &ClassifyContext,
    local: &[Script],
    mut remote_map: BTreeMap<String, RemoteObject>,
    meta: &mut RemoteMetaData,
    changed: &mut bool,
    now: i64,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for script in local {
        let uri = script.uri();
        let last_modified = script.last_modified();
        let remote_obj = remote_map.remove(uri);

        if let Some(entry) = meta.info.get_mut(uri) {
            if ctx.first_sync || last_modified == 0 || entry.modified > last_modified {
                // Remote wins: download over the local copy.
                if let Some(object) = remote_obj {
                    plan.downloads.push(Download {
                        info: entry.clone(),
                        object,
                    });
                }
            } else if entry.modified < last_modified {
                // Local wins: upload and adopt the local stamp.
                entry.modified = last_modified;
                entry.position = script.props.position;
                *changed = true;
                plan.uploads.push(Upload {
                    script: script.clone(),
                    base: remote_obj,
                });
            } else if entry.position != script.props.position {
                match entry.position() {
                    Some(remote_position)
                        if ctx.global_last_modified <= ctx.remote_timestamp =>
                    {
                        // The local store hasn't changed since the remote
                        // epoch: accept the remote ordering.
                        plan.repositions.push((script.id, remote_position));
                    }
                    _ => {
                        entry.position = script.props.position;
                        *changed = true;
                    }
                }
            }
        } else if ctx.first_sync || !ctx.outdated || last_modified > ctx.remote_timestamp {
            // Local-only script the remote never deleted: upload it.
            let modified = if last_modified > 0 { last_modified } else { now };
            meta.info.insert(
                uri.to_string(),
                RemoteScriptInfo {
                    modified,
                    position: script.props.position,
                },
            );
            *changed = true;
            plan.uploads.push(Upload {
                script: script.clone(),
                base: None,
            });
        } else {
            // The remote intentionally deleted it while we were behind.
            plan.local_deletions.push(script.id);
        }
    }

    // Remote-only scripts.
    for (uri, object) in remote_map {
        if ctx.outdated {
            let info = meta.info.get(&uri).cloned().unwrap_or_default();
            plan.downloads.push(Download { object, info });
        } else {
            meta.info.remove(&uri);
            *changed = true;
            plan.remote_deletions.push(object);
        }
    }

    plan
}

/// Phase 1 (per-item ops, concurrent) → phase 2 (position sort) →
/// phase 3 (metadata commit), collecting errors across all three.
async fn apply(
    service: &SyncService,
    plan: SyncPlan,
    meta: &mut RemoteMetaData,
    changed: &mut bool,
    import_status: bool,
) -> Vec<String> {
    let mut ops: Vec<BoxFuture<'_, OpResult>> = Vec::new();
    for download in plan.downloads {
        ops.push(Box::pin(apply_download(service, download, import_status)));
    }
    for upload in plan.uploads {
        ops.push(Box::pin(apply_upload(service, upload)));
    }
    for object in plan.remote_deletions {
        ops.push(Box::pin(apply_remote_delete(service, object)));
    }
    for id in plan.local_deletions {
        ops.push(Box::pin(apply_local_delete(service, id)));
    }
    for (id, position) in plan.repositions {
        ops.push(Box::pin(apply_reposition(service, id, position)));
    }

    let mut errors: Vec<String> = join_all(ops)
        .await
        .into_iter()
        .filter_map(|result| result.err())
        .collect();

    // Phase 2: re-normalize local positions and copy them back.
    match service.scripts().sort_scripts().await {
        Ok(true) => {
            *changed = true;
            match service.scripts().list().await {
                Ok(local) => {
                    for script in &local {
                        if let Some(entry) = meta.info.get_mut(script.uri()) {
                            entry.position = script.props.position;
                        }
                    }
                }
                Err(err) => errors.push(format!("list scripts after sort: {err}")),
            }
        }
        Ok(false) => {}
        Err(err) => errors.push(format!("sort scripts: {err}")),
    }

    // Phase 3: write the metadata object when it drifted, then persist the
    // local record either way (we adopt the epoch we decided on).
    if *changed {
        meta.timestamp = now_ms();
        match serde_json::to_vec(&*meta) {
            Ok(bytes) => {
                let object = RemoteObject::new(service.provider_meta().meta_file);
                if let Err(err) = service
                    .fetch(service.provider().put(&object, Bytes::from(bytes)))
                    .await
                {
                    errors.push(format!("write remote meta: {err}"));
                }
            }
            Err(err) => errors.push(format!("encode remote meta: {err}")),
        }
    }
    let local_meta = LocalMeta {
        timestamp: Some(meta.timestamp),
        last_sync: Some(now_ms()),
    };
    if let Err(err) = service.service_config().set_meta(&local_meta).await {
        errors.push(format!("persist local meta: {err}"));
    }

    errors
}

async fn apply_download(service: &SyncService, download: Download, import_status: bool) -> OpResult {
    let uri = download.object.uri.clone().unwrap_or_default();
    let bytes = service
        .fetch(service.provider().get(&download.object))
        .await
        .map_err(|err| format!("download {uri}: {err}"))?;

    let text = String::from_utf8_lossy(&bytes);
    let data = codec::parse_script_data(&text);
    let Some(code) = data.code else {
        debug!(%uri, "remote blob carries no code, skipping import");
        return Ok(());
    };

    let mut update = ScriptUpdate {
        uri: uri.clone(),
        code,
        custom: data.custom,
        enabled: data.enabled,
        should_update: data.should_update,
        last_updated: data.last_updated,
        last_modified: None,
        position: None,
    };
    if download.info.modified > 0 {
        update.last_modified = Some(download.info.modified);
    }
    update.position = download.info.position();
    if !import_status {
        // Enablement stays a per-device choice.
        update.enabled = None;
    }

    service
        .scripts()
        .update(update)
        .await
        .map_err(|err| format!("import {uri}: {err}"))
}

async fn apply_upload(service: &SyncService, upload: Upload) -> OpResult {
    let uri = upload.script.props.uri.clone();
    let code = service
        .scripts()
        .code(upload.script.id)
        .await
        .map_err(|err| format!("read {uri}: {err}"))?;
    let payload = codec::serialize_script(&upload.script, &code, WRITE_VERSION)
        .map_err(|err| format!("encode {uri}: {err}"))?;

    let mut target = upload.base.clone().unwrap_or_default();
    target.name = filename::script_file_name(&uri);
    target.uri = Some(uri.clone());

    service
        .fetch(service.provider().put(&target, Bytes::from(payload)))
        .await
        .map(|_| ())
        .map_err(|err| format!("upload {uri}: {err}"))
}

async fn apply_remote_delete(service: &SyncService, object: RemoteObject) -> OpResult {
    let name = object.name.clone();
    service
        .fetch(service.provider().remove(&object))
        .await
        .map_err(|err| format!("delete remote {name}: {err}"))
}

async fn apply_local_delete(service: &SyncService, id: ScriptId) -> OpResult {
    service
        .scripts()
        .remove(id)
        .await
        .map_err(|err| format!("delete local script {id}: {err}"))
}

async fn apply_reposition(service: &SyncService, id: ScriptId, position: i64) -> OpResult {
    service
        .scripts()
        .update_script_info(id, ScriptInfoPatch {
            position: Some(position),
        })
        .await
        .map_err(|err| format!("reposition script {id}: {err}"))
}
