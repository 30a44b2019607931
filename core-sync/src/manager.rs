//! Provider registry and public dispatch surface.
//!
//! A [`SyncManager`] owns what used to be scattered globals: the registered
//! services, the process-wide work lock, and the debounced state notifier.
//! Exactly one registered service is *current* at any time (selected by the
//! `sync.current` option) and only that one syncs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use bridge_traits::ProviderFactory;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, ServiceState, SyncEvent};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{SyncConfig, CURRENT_KEY};
use crate::error::{Result, SyncError};
use crate::service::{CoreShared, SyncHandle, SyncService};

/// Re-trigger interval armed after every public sync request.
const AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Debounce window for aggregated state snapshots.
const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(50);

struct ManagerInner {
    shared: Arc<CoreShared>,
    factories: StdMutex<Vec<Box<dyn ProviderFactory>>>,
    services: StdRwLock<Vec<Arc<SyncService>>>,
    initialized: AtomicBool,
    notifier_started: AtomicBool,
    autosync: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.autosync.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Handle onto the sync core. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<ManagerInner>,
}

impl SyncManager {
    /// Build a manager from the host collaborators.
    pub fn new(config: CoreConfig) -> Self {
        let shared = Arc::new(CoreShared {
            work: AsyncMutex::new(()),
            notify: Arc::new(Notify::new()),
            events: config.event_bus,
            config: SyncConfig::new(config.options),
            scripts: config.scripts,
        });
        Self {
            inner: Arc::new(ManagerInner {
                shared,
                factories: StdMutex::new(Vec::new()),
                services: StdRwLock::new(Vec::new()),
                initialized: AtomicBool::new(false),
                notifier_started: AtomicBool::new(false),
                autosync: StdMutex::new(None),
            }),
        }
    }

    /// The event bus carrying auth, sync, and snapshot events.
    pub fn events(&self) -> &EventBus {
        &self.inner.shared.events
    }

    /// Register a provider factory. Factories are instantiated exactly once,
    /// by [`initialize`](Self::initialize); registration after that point is
    /// ignored with a warning.
    pub fn register(&self, factory: impl ProviderFactory + 'static) {
        if self.inner.initialized.load(Ordering::SeqCst) {
            warn!("provider registered after initialization, ignoring");
            return;
        }
        self.inner.factories.lock().unwrap().push(Box::new(factory));
    }

    /// Seed the option subtree, instantiate registered factories, and run
    /// the sync check on the current service. Idempotent.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        self.inner.shared.config.ensure_root().await?;
        self.start_notifier();

        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            let factories = std::mem::take(&mut *self.inner.factories.lock().unwrap());
            let mut services: Vec<Arc<SyncService>> = Vec::with_capacity(factories.len());
            for factory in factories {
                let service = SyncService::new(factory.build(), Arc::clone(&self.inner.shared));
                if services.iter().any(|s| s.name() == service.name()) {
                    warn!(service = service.name(), "duplicate provider name, skipping");
                    continue;
                }
                service.load_user_config().await;
                info!(service = service.name(), "sync service registered");
                services.push(service);
            }
            *self.inner.services.write().unwrap() = services;
        }

        if let Some(service) = self.current_service().await? {
            if let Err(err) = service.check_sync().await {
                debug!(service = service.name(), error = %err, "initial sync check failed");
            }
        }
        Ok(())
    }

    /// The name of the current service per the `sync.current` option.
    pub async fn current(&self) -> Result<Option<String>> {
        self.inner.shared.config.current().await
    }

    /// Look up a registered service by name.
    pub fn service(&self, name: &str) -> Option<Arc<SyncService>> {
        self.inner
            .services
            .read()
            .unwrap()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    async fn current_service(&self) -> Result<Option<Arc<SyncService>>> {
        let Some(name) = self.current().await? else {
            return Ok(None);
        };
        let service = self.service(&name);
        if service.is_none() {
            warn!(service = %name, "current service is not registered");
        }
        Ok(service)
    }

    fn require_initialized(&self) -> Result<()> {
        if self.inner.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::NotInitialized)
        }
    }

    async fn require_current(&self) -> Result<Arc<SyncService>> {
        self.require_initialized()?;
        self.current_service()
            .await?
            .ok_or(SyncError::NoCurrentService)
    }

    /// Public sync trigger: re-arm the hourly auto-sync and run the sync
    /// check on the current service.
    pub async fn sync(&self) -> Result<SyncHandle> {
        self.require_initialized()?;
        self.arm_auto_sync();
        let service = self.require_current().await?;
        service.check_sync().await
    }

    /// Kick off the current provider's interactive auth flow.
    pub async fn authorize(&self) -> Result<()> {
        self.require_current().await?.authorize().await
    }

    /// Drop the current provider's credentials.
    pub async fn revoke(&self) -> Result<()> {
        self.require_current().await?.revoke().await
    }

    /// Push provider-specific configuration to the current service, then
    /// re-run its sync check.
    pub async fn set_config(&self, user_config: Value) -> Result<SyncHandle> {
        self.require_current()
            .await?
            .set_user_config(user_config)
            .await
    }

    /// Ask every registered provider whether `url` completes its auth flow;
    /// the first positive wins. The redeemed token is persisted and the
    /// service's sync check re-runs.
    pub async fn check_auth_url(&self, url: &str) -> bool {
        let services: Vec<Arc<SyncService>> = self.inner.services.read().unwrap().clone();
        for service in services {
            if let Some(prefix) = service.provider_meta().url_prefix {
                if !url.starts_with(prefix) {
                    continue;
                }
            }
            match service.provider().check_auth(url).await {
                Ok(Some(token)) => {
                    info!(service = service.name(), "auth flow completed");
                    if let Err(err) = service.service_config().set_token(Some(&token)).await {
                        warn!(service = service.name(), error = %err, "failed to persist token");
                    }
                    if let Err(err) = service.check_sync().await {
                        debug!(service = service.name(), error = %err, "post-auth sync check failed");
                    }
                    return true;
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(service = service.name(), error = %err, "auth url check failed");
                }
            }
        }
        false
    }

    /// Snapshot every registered service for UI consumers.
    pub async fn get_states(&self) -> Vec<ServiceState> {
        let services: Vec<Arc<SyncService>> = self.inner.services.read().unwrap().clone();
        let mut states = Vec::with_capacity(services.len());
        for service in services {
            states.push(service.snapshot().await);
        }
        states
    }

    /// Inbound option-change hook. A truthy `sync.current` re-runs
    /// initialization (and with it the sync check on the new selection).
    pub async fn handle_option_change(&self, key: &str, value: &Value) {
        if key == CURRENT_KEY && is_truthy(value) {
            if let Err(err) = self.initialize().await {
                warn!(error = %err, "re-initialization after option change failed");
            }
        }
    }

    /// Arm (or re-arm) the hourly re-trigger. Any new public sync call
    /// resets the hour.
    fn arm_auto_sync(&self) {
        let mut slot = self.inner.autosync.lock().unwrap();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let inner = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(AUTO_SYNC_INTERVAL).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            debug!("auto sync timer fired");
            let manager = SyncManager { inner };
            if let Err(err) = manager.sync().await {
                debug!(error = %err, "auto sync skipped");
            }
        }));
    }

    /// Spawn the debounced notifier: state-cell pokes collapse into one
    /// aggregated snapshot event per burst.
    fn start_notifier(&self) {
        if self.inner.notifier_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let notify = Arc::clone(&self.inner.shared.notify);
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                notify.notified().await;
                tokio::time::sleep(NOTIFY_DEBOUNCE).await;
                // Absorb pokes that landed during the debounce window.
                let _ = notify.notified().now_or_never();

                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let manager = SyncManager { inner };
                let states = manager.get_states().await;
                manager
                    .inner
                    .shared
                    .events
                    .emit(CoreEvent::Sync(SyncEvent::StatesUpdated { states }));
            }
        });
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
