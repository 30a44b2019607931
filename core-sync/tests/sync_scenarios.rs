//! Integration tests for the full sync flow.
//!
//! These drive the public manager surface against in-memory collaborators:
//! - first sync bootstrap (upload-only, metadata creation)
//! - pulling new remote scripts and honoring remote deletions
//! - last-writer-wins on per-script stamps and position conflicts
//! - status stripping on import
//! - trigger coalescing and error aggregation

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bridge_traits::{
    error::Result as BridgeResult, BridgeError, OptionStore, ProviderMetadata, RemoteObject,
    Script, ScriptConfig, ScriptId, ScriptInfoPatch, ScriptProps, ScriptStore, ScriptUpdate,
    SyncProvider,
};
use bytes::Bytes;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, SyncEvent};
use core_sync::{AuthState, RemoteMetaData, SyncError, SyncManager, SyncState};
use serde_json::{json, Value};

const META_FILE: &str = "Violentmonkey";

// ============================================================================
// Mock Implementations
// ============================================================================

/// In-memory option tree navigating dotted paths.
#[derive(Default)]
struct MemoryOptions {
    tree: Mutex<Value>,
}

impl MemoryOptions {
    fn read(&self, path: &str) -> Option<Value> {
        let tree = self.tree.lock().unwrap();
        let mut node = &*tree;
        for segment in path.split('.') {
            node = node.get(segment)?;
        }
        Some(node.clone())
    }

    fn write(&self, path: &str, value: Value) {
        let mut tree = self.tree.lock().unwrap();
        if tree.is_null() {
            *tree = json!({});
        }
        let mut node = &mut *tree;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                node[segment] = value;
                return;
            }
            if node.get(segment).map_or(true, |v| !v.is_object()) {
                node[segment] = json!({});
            }
            node = node.get_mut(segment).unwrap();
        }
    }
}

#[async_trait::async_trait]
impl OptionStore for MemoryOptions {
    async fn get(&self, path: &str) -> BridgeResult<Option<Value>> {
        Ok(self.read(path))
    }

    async fn set(&self, path: &str, value: Value) -> BridgeResult<()> {
        self.write(path, value);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptsInner {
    scripts: Vec<Script>,
    codes: HashMap<i64, String>,
    next_id: i64,
    updates: Vec<ScriptUpdate>,
}

/// In-memory script store with position assignment on create and a
/// position-renumbering sort, mimicking the real plugin.
#[derive(Default)]
struct MemoryScripts {
    inner: Mutex<ScriptsInner>,
}

impl MemoryScripts {
    fn seed(&self, uri: &str, last_modified: i64, position: i64, code: &str) -> ScriptId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.scripts.push(Script {
            id: ScriptId(id),
            props: ScriptProps {
                uri: uri.to_string(),
                last_modified: (last_modified > 0).then_some(last_modified),
                last_updated: None,
                position: Some(position),
            },
            custom: Value::Null,
            config: ScriptConfig::default(),
        });
        inner.codes.insert(id, code.to_string());
        ScriptId(id)
    }

    fn scripts(&self) -> Vec<Script> {
        self.inner.lock().unwrap().scripts.clone()
    }

    fn by_uri(&self, uri: &str) -> Option<Script> {
        self.scripts().into_iter().find(|s| s.uri() == uri)
    }

    fn updates(&self) -> Vec<ScriptUpdate> {
        self.inner.lock().unwrap().updates.clone()
    }
}

#[async_trait::async_trait]
impl ScriptStore for MemoryScripts {
    async fn list(&self) -> BridgeResult<Vec<Script>> {
        Ok(self.scripts())
    }

    async fn code(&self, id: ScriptId) -> BridgeResult<String> {
        self.inner
            .lock()
            .unwrap()
            .codes
            .get(&id.0)
            .cloned()
            .ok_or_else(|| BridgeError::Storage(format!("no code for script {id}")))
    }

    async fn update(&self, update: ScriptUpdate) -> BridgeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let inner = &mut *inner;
        inner.updates.push(update.clone());

        if let Some(script) = inner
            .scripts
            .iter_mut()
            .find(|s| s.props.uri == update.uri)
        {
            if let Some(custom) = update.custom.clone() {
                script.custom = custom;
            }
            if let Some(enabled) = update.enabled {
                script.config.enabled = enabled;
            }
            if let Some(should_update) = update.should_update {
                script.config.should_update = should_update;
            }
            if update.last_updated.is_some() {
                script.props.last_updated = update.last_updated;
            }
            if update.last_modified.is_some() {
                script.props.last_modified = update.last_modified;
            }
            if update.position.is_some() {
                script.props.position = update.position;
            }
            let id = script.id.0;
            inner.codes.insert(id, update.code);
            return Ok(());
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let next_position = inner
            .scripts
            .iter()
            .filter_map(|s| s.props.position)
            .max()
            .unwrap_or(0)
            + 1;
        inner.scripts.push(Script {
            id: ScriptId(id),
            props: ScriptProps {
                uri: update.uri.clone(),
                last_modified: update.last_modified,
                last_updated: update.last_updated,
                position: update.position.or(Some(next_position)),
            },
            custom: update.custom.clone().unwrap_or(Value::Null),
            config: ScriptConfig {
                enabled: update.enabled.unwrap_or(true),
                should_update: update.should_update.unwrap_or(true),
            },
        });
        inner.codes.insert(id, update.code);
        Ok(())
    }

    async fn remove(&self, id: ScriptId) -> BridgeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.retain(|s| s.id != id);
        inner.codes.remove(&id.0);
        Ok(())
    }

    async fn sort_scripts(&self) -> BridgeResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .scripts
            .sort_by_key(|s| (s.props.position.unwrap_or(i64::MAX), s.id.0));
        let mut changed = false;
        for (index, script) in inner.scripts.iter_mut().enumerate() {
            let position = Some(index as i64 + 1);
            if script.props.position != position {
                script.props.position = position;
                changed = true;
            }
        }
        Ok(changed)
    }

    async fn update_script_info(&self, id: ScriptId, patch: ScriptInfoPatch) -> BridgeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let script = inner
            .scripts
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| BridgeError::Storage(format!("unknown script {id}")))?;
        if patch.position.is_some() {
            script.props.position = patch.position;
        }
        Ok(())
    }
}

#[derive(Default)]
struct ProviderState {
    objects: BTreeMap<String, Bytes>,
    fail_get: Vec<String>,
}

/// In-memory provider keeping remote objects in a name-indexed map.
struct MockProvider {
    meta: ProviderMetadata,
    state: Mutex<ProviderState>,
    token: Mutex<Option<String>>,
    list_calls: AtomicU32,
    locks_taken: AtomicU32,
    locks_released: AtomicU32,
}

impl MockProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            meta: ProviderMetadata::new("mock", "Mock Drive"),
            state: Mutex::new(ProviderState::default()),
            token: Mutex::new(None),
            list_calls: AtomicU32::new(0),
            locks_taken: AtomicU32::new(0),
            locks_released: AtomicU32::new(0),
        })
    }

    fn put_object(&self, name: &str, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(name.to_string(), Bytes::copy_from_slice(bytes));
    }

    fn fail_get(&self, name: &str) {
        self.state.lock().unwrap().fail_get.push(name.to_string());
    }

    fn object(&self, name: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(name).cloned()
    }

    fn object_names(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    fn remote_meta(&self) -> Option<RemoteMetaData> {
        let bytes = self.object(META_FILE)?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[async_trait::async_trait]
impl SyncProvider for MockProvider {
    fn metadata(&self) -> &ProviderMetadata {
        &self.meta
    }

    async fn authorize(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn revoke(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn check_auth(&self, _url: &str) -> BridgeResult<Option<String>> {
        Ok(None)
    }

    fn apply_token(&self, token: Option<&str>) {
        *self.token.lock().unwrap() = token.map(str::to_string);
    }

    async fn user(&self) -> BridgeResult<()> {
        if self.token.lock().unwrap().is_some() {
            Ok(())
        } else {
            Err(BridgeError::Unauthorized("no token".into()))
        }
    }

    async fn list(&self) -> BridgeResult<Vec<RemoteObject>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .keys()
            .filter(|name| name.as_str() != META_FILE)
            .map(RemoteObject::new)
            .collect())
    }

    async fn get(&self, obj: &RemoteObject) -> BridgeResult<Bytes> {
        let state = self.state.lock().unwrap();
        if state.fail_get.contains(&obj.name) {
            return Err(BridgeError::Http {
                status: 500,
                message: "injected failure".into(),
            });
        }
        state
            .objects
            .get(&obj.name)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(obj.name.clone()))
    }

    async fn put(&self, obj: &RemoteObject, data: Bytes) -> BridgeResult<RemoteObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(obj.name.clone(), data);
        Ok(obj.clone())
    }

    async fn remove(&self, obj: &RemoteObject) -> BridgeResult<()> {
        self.state.lock().unwrap().objects.remove(&obj.name);
        Ok(())
    }

    async fn acquire_lock(&self) -> BridgeResult<()> {
        self.locks_taken.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release_lock(&self) -> BridgeResult<()> {
        self.locks_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn handle_meta_error(&self, err: &BridgeError) -> Option<Bytes> {
        err.is_not_found().then(|| Bytes::from_static(b"{}"))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    manager: SyncManager,
    options: Arc<MemoryOptions>,
    scripts: Arc<MemoryScripts>,
    provider: Arc<MockProvider>,
}

impl Harness {
    async fn new(with_token: bool) -> Self {
        let options = Arc::new(MemoryOptions::default());
        let scripts = Arc::new(MemoryScripts::default());
        let provider = MockProvider::new();

        options.write("sync.current", json!("mock"));
        if with_token {
            options.write("sync.services.mock.token", json!("token-1"));
        }

        let config = CoreConfig::builder()
            .option_store(options.clone())
            .script_store(scripts.clone())
            .build()
            .unwrap();

        let manager = SyncManager::new(config);
        let factory_provider: Arc<dyn SyncProvider> = provider.clone();
        manager.register(move || Arc::clone(&factory_provider));

        Self {
            manager,
            options,
            scripts,
            provider,
        }
    }

    fn set_local_meta(&self, timestamp: i64) {
        self.options.write(
            "sync.services.mock.meta",
            json!({"timestamp": timestamp, "lastSync": timestamp}),
        );
    }

    fn local_meta(&self) -> Value {
        self.options
            .read("sync.services.mock.meta")
            .unwrap_or(Value::Null)
    }

    fn seed_remote_meta(&self, meta: Value) {
        self.provider
            .put_object(META_FILE, meta.to_string().as_bytes());
    }

    fn seed_remote_script(&self, uri: &str, code: &str) {
        let blob = json!({"version": 1, "more": {}, "code": code});
        self.provider
            .put_object(&format!("vm@2-{uri}"), blob.to_string().as_bytes());
    }

    async fn sync_and_wait(&self) {
        self.manager.sync().await.expect("sync trigger").wait().await;
    }

    fn sync_state(&self) -> SyncState {
        self.manager.service("mock").unwrap().sync_state()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_sync_uploads_to_empty_remote() {
    let harness = Harness::new(true).await;
    harness.scripts.seed("a", 1000, 1, "// script a");
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();

    // The local script was uploaded as a v1 payload under its canonical name.
    let blob = harness.provider.object("vm@2-a").expect("uploaded object");
    let payload: Value = serde_json::from_slice(&blob).unwrap();
    assert_eq!(payload["version"], 1);
    assert_eq!(payload["code"], "// script a");

    // The metadata object was created with a fresh epoch and one entry.
    let meta = harness.provider.remote_meta().expect("meta written");
    assert!(meta.timestamp > 0);
    assert_eq!(meta.info.len(), 1);
    assert_eq!(meta.info["a"].modified, 1000);
    assert_eq!(meta.info["a"].position, Some(1));

    // The local record adopted the new epoch.
    let local = harness.local_meta();
    assert_eq!(local["timestamp"].as_i64(), Some(meta.timestamp));
    assert!(local["lastSync"].as_i64().unwrap() > 0);

    assert_eq!(harness.sync_state(), SyncState::Idle);
    assert_eq!(harness.provider.locks_taken.load(Ordering::SeqCst), 1);
    assert_eq!(harness.provider.locks_released.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pull_new_remote_script() {
    let harness = Harness::new(true).await;
    harness.set_local_meta(100);
    harness.seed_remote_meta(json!({"timestamp": 200, "info": {"b": {"modified": 200}}}));
    harness.seed_remote_script("b", "// script b");
    // Junk objects in the remote folder are ignored.
    harness.provider.put_object("notes.txt", b"not a script");
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();

    let script = harness.scripts.by_uri("b").expect("imported script");
    assert_eq!(script.props.last_modified, Some(200));

    // Nothing drifted, so the remote epoch is untouched and the local
    // record advances to it.
    let meta = harness.provider.remote_meta().unwrap();
    assert_eq!(meta.timestamp, 200);
    assert_eq!(harness.local_meta()["timestamp"].as_i64(), Some(200));
    assert!(harness.provider.object("notes.txt").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_remote_deletion_removes_stale_local_script() {
    let harness = Harness::new(true).await;
    harness.scripts.seed("c", 250, 1, "// script c");
    harness.set_local_meta(300);
    harness.seed_remote_meta(json!({"timestamp": 400, "info": {}}));
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();

    assert!(harness.scripts.by_uri("c").is_none());
    assert_eq!(harness.local_meta()["timestamp"].as_i64(), Some(400));
}

#[tokio::test(start_paused = true)]
async fn test_position_conflict_adopts_remote_order() {
    let harness = Harness::new(true).await;
    harness.scripts.seed("x", 500, 1, "// x");
    harness.scripts.seed("d", 500, 5, "// d");
    harness.set_local_meta(500);
    harness.options.write("lastModified", json!(100));
    harness.seed_remote_meta(json!({
        "timestamp": 500,
        "info": {
            "x": {"modified": 500, "position": 1},
            "d": {"modified": 500, "position": 2},
        },
    }));
    harness.seed_remote_script("x", "// x");
    harness.seed_remote_script("d", "// d");
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();

    // The remote ordering wins without any body transfer.
    let script = harness.scripts.by_uri("d").unwrap();
    assert_eq!(script.props.position, Some(2));
    assert!(harness.scripts.updates().is_empty());

    let meta = harness.provider.remote_meta().unwrap();
    assert_eq!(meta.timestamp, 500);
}

#[tokio::test(start_paused = true)]
async fn test_newer_local_script_uploads_and_bumps_meta() {
    let harness = Harness::new(true).await;
    harness.scripts.seed("e", 200, 1, "// new body");
    harness.set_local_meta(150);
    harness.seed_remote_meta(json!({
        "timestamp": 150,
        "info": {"e": {"modified": 100, "position": 1}},
    }));
    harness.seed_remote_script("e", "// old body");
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();

    let blob = harness.provider.object("vm@2-e").unwrap();
    let payload: Value = serde_json::from_slice(&blob).unwrap();
    assert_eq!(payload["code"], "// new body");

    let meta = harness.provider.remote_meta().unwrap();
    assert_eq!(meta.info["e"].modified, 200);
    assert!(meta.timestamp > 150);
    assert_eq!(
        harness.local_meta()["timestamp"].as_i64(),
        Some(meta.timestamp)
    );

    // Index keys still mirror the remote listing exactly.
    let script_objects = harness
        .provider
        .object_names()
        .into_iter()
        .filter(|n| n != META_FILE)
        .count();
    assert_eq!(meta.info.len(), script_objects);
}

#[tokio::test(start_paused = true)]
async fn test_status_is_not_imported_when_disabled() {
    let harness = Harness::new(true).await;
    harness.options.write("syncScriptStatus", json!(false));
    harness.set_local_meta(100);
    harness.seed_remote_meta(json!({"timestamp": 200, "info": {"s": {"modified": 200}}}));
    let blob = json!({"version": 1, "more": {"enabled": true}, "code": "// s"});
    harness
        .provider
        .put_object("vm@2-s", blob.to_string().as_bytes());
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();

    let updates = harness.scripts.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].uri, "s");
    assert!(updates[0].enabled.is_none());
}

// ============================================================================
// Triggers, states, errors
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_burst_of_triggers_coalesces_into_one_run() {
    let harness = Harness::new(true).await;
    harness.manager.initialize().await.unwrap();

    let first = harness.manager.sync().await.unwrap();
    let second = harness.manager.sync().await.unwrap();
    let third = harness.manager.sync().await.unwrap();
    first.wait().await;
    second.wait().await;
    third.wait().await;

    assert_eq!(harness.provider.list_calls.load(Ordering::SeqCst), 1);

    // A later trigger schedules a fresh run.
    harness.sync_and_wait();
    assert_eq!(harness.provider.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_missing_token_lands_in_unauthorized() {
    let harness = Harness::new(false).await;
    harness.manager.initialize().await.unwrap();

    let err = harness.manager.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized));
    assert_eq!(
        harness.manager.service("mock").unwrap().auth_state(),
        AuthState::Unauthorized
    );
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_aggregate_into_error_state() {
    let harness = Harness::new(true).await;
    harness.set_local_meta(100);
    harness.seed_remote_meta(json!({"timestamp": 200, "info": {"z": {"modified": 200}}}));
    harness.seed_remote_script("z", "// z");
    harness.provider.fail_get("vm@2-z");
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();

    assert_eq!(harness.sync_state(), SyncState::Error);
    assert!(harness.scripts.by_uri("z").is_none());
    // The lock is still released on the error path.
    assert_eq!(
        harness.provider.locks_taken.load(Ordering::SeqCst),
        harness.provider.locks_released.load(Ordering::SeqCst)
    );
}

#[tokio::test(start_paused = true)]
async fn test_first_sync_never_deletes_local_scripts() {
    let harness = Harness::new(true).await;
    harness.scripts.seed("x", 0, 1, "// x");
    harness.scripts.seed("y", 0, 2, "// y");
    harness.seed_remote_meta(json!({"timestamp": 900, "info": {"r": {"modified": 900}}}));
    harness.seed_remote_script("r", "// r");
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();

    assert!(harness.scripts.by_uri("x").is_some());
    assert!(harness.scripts.by_uri("y").is_some());
    assert!(harness.scripts.by_uri("r").is_some());
    assert!(harness.provider.object("vm@2-x").is_some());
    assert!(harness.provider.object("vm@2-y").is_some());

    let meta = harness.provider.remote_meta().unwrap();
    assert_eq!(meta.info.len(), 3);
    assert!(meta.info.values().all(|entry| entry.modified > 0));
}

#[tokio::test(start_paused = true)]
async fn test_states_snapshot_and_events() {
    let harness = Harness::new(true).await;
    let mut events = harness.manager.events().subscribe();
    let mut ui_messages = harness.manager.events().subscribe_ui();
    harness.manager.initialize().await.unwrap();

    harness.sync_and_wait();
    // Let the debounced notifier flush its aggregated snapshot.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let states = harness.manager.get_states().await;
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].name, "mock");
    assert_eq!(states[0].display_name, "Mock Drive");
    assert_eq!(states[0].auth_state, "authorized");
    assert_eq!(states[0].sync_state, "idle");
    assert!(states[0].last_sync.is_some());

    let mut saw_started = false;
    let mut saw_completed = false;
    let mut saw_snapshot = false;
    while let Ok(event) = events.try_recv() {
        match event {
            CoreEvent::Sync(SyncEvent::Started { .. }) => saw_started = true,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => saw_completed = true,
            CoreEvent::Sync(SyncEvent::StatesUpdated { .. }) => saw_snapshot = true,
            _ => {}
        }
    }
    assert!(saw_started);
    assert!(saw_completed);
    assert!(saw_snapshot);

    // The snapshot also arrives as the rendered UI wire message.
    let message = ui_messages.try_recv().expect("ui message published");
    assert_eq!(message["cmd"], "UpdateSync");
    assert_eq!(message["data"][0]["name"], "mock");
    assert_eq!(message["data"][0]["displayName"], "Mock Drive");
}

#[tokio::test(start_paused = true)]
async fn test_provider_swap_during_wait_cancels_run() {
    let harness = Harness::new(true).await;
    harness.manager.initialize().await.unwrap();

    let handle = harness.manager.sync().await.unwrap();
    // Swap the current provider away while the coalescing window is open.
    harness.options.write("sync.current", json!("elsewhere"));
    handle.wait().await;

    assert_eq!(harness.provider.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.sync_state(), SyncState::Idle);
}
