//! Per-provider service runtime.
//!
//! A [`SyncService`] composes a provider value with the reusable lifecycle:
//! auth preparation, progress accounting, the per-service request rate gate,
//! and the coalesced, process-serialized entry into the reconciler.
//!
//! ## Trigger flow
//!
//! ```text
//! check_sync() = prepare() ──► start_sync()
//!                                 │ gate: authorized ∧ current
//!                                 ▼
//!                            sync_state = ready
//!                                 │ coalescing delay (≥10 s, pokes merge)
//!                                 ▼ re-check gate
//!                            work lock (process-wide FIFO)
//!                                 ▼
//!                            sync_state = syncing ──► reconciler
//! ```
//!
//! Many concurrent triggers collapse to one run; a provider swap during the
//! wait makes the queued stage no-op at the re-check. Once the reconciler
//! starts it runs to completion.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use bridge_traits::{ProviderMetadata, ScriptStore, SyncProvider};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, ServiceState, SyncEvent, SyncProgress};
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::{ServiceConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::reconciler;
use crate::state::{AuthState, StateCell, SyncState};

/// Quiet period between entering `ready` and entering `syncing`. Repeated
/// triggers during the window merge into the same pending run.
pub const SYNC_COALESCE_DELAY: Duration = Duration::from_secs(10);

/// State shared by every service of one manager.
pub(crate) struct CoreShared {
    /// Process-wide FIFO: at most one reconciliation runs at a time.
    pub(crate) work: AsyncMutex<()>,
    /// Change signal feeding the debounced snapshot notifier.
    pub(crate) notify: Arc<Notify>,
    pub(crate) events: EventBus,
    pub(crate) config: SyncConfig,
    pub(crate) scripts: Arc<dyn ScriptStore>,
}

/// Progress counters for the current sync run.
#[derive(Default)]
pub(crate) struct Progress {
    finished: AtomicU32,
    total: AtomicU32,
}

impl Progress {
    fn reset(&self) {
        self.finished.store(0, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> SyncProgress {
        SyncProgress {
            finished: self.finished.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

/// Enforces the minimum gap between request dispatches to one provider.
///
/// The lock is held while waiting, so queued requests dispatch FIFO with at
/// least `delay` between consecutive dispatch times.
pub(crate) struct FetchGate {
    delay: Duration,
    last: AsyncMutex<Option<Instant>>,
}

impl FetchGate {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: AsyncMutex::new(None),
        }
    }

    async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready = prev + self.delay;
            if ready > Instant::now() {
                tokio::time::sleep_until(ready).await;
            }
        }
        *last = Some(Instant::now());
    }
}

struct PendingSync {
    deadline: Instant,
    done: watch::Receiver<bool>,
}

/// Waitable handle onto an in-flight (or merged) sync run.
#[derive(Debug)]
pub struct SyncHandle {
    done: watch::Receiver<bool>,
}

impl SyncHandle {
    fn finished() -> Self {
        let (_tx, done) = watch::channel(true);
        Self { done }
    }

    /// Wait until the run this handle tracks has settled.
    pub async fn wait(mut self) {
        let _ = self.done.wait_for(|done| *done).await;
    }
}

/// A registered provider plus the reusable service lifecycle.
pub struct SyncService {
    provider: Arc<dyn SyncProvider>,
    meta: ProviderMetadata,
    config: ServiceConfig,
    shared: Arc<CoreShared>,
    weak_self: Weak<SyncService>,
    auth_state: StateCell<AuthState>,
    sync_state: StateCell<SyncState>,
    progress: Progress,
    fetch_gate: FetchGate,
    headers: StdMutex<HashMap<String, String>>,
    pending: StdMutex<Option<PendingSync>>,
    coalesce_delay: Duration,
}

impl SyncService {
    pub(crate) fn new(provider: Arc<dyn SyncProvider>, shared: Arc<CoreShared>) -> Arc<Self> {
        let meta = provider.metadata().clone();
        let config = shared.config.service(meta.name);
        let notify = Arc::clone(&shared.notify);
        Arc::new_cyclic(|weak_self| Self {
            provider,
            fetch_gate: FetchGate::new(meta.delay),
            meta,
            config,
            shared,
            weak_self: weak_self.clone(),
            auth_state: StateCell::new("auth", AuthState::Idle, Arc::clone(&notify)),
            sync_state: StateCell::new("sync", SyncState::Idle, notify),
            progress: Progress::default(),
            headers: StdMutex::new(HashMap::new()),
            pending: StdMutex::new(None),
            coalesce_delay: SYNC_COALESCE_DELAY,
        })
    }

    pub fn name(&self) -> &'static str {
        self.meta.name
    }

    pub fn display_name(&self) -> &'static str {
        self.meta.display_name
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state.get()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state.get()
    }

    /// Request headers derived from the stored token, for transports that
    /// issue their own calls.
    pub fn headers(&self) -> HashMap<String, String> {
        self.headers.lock().unwrap().clone()
    }

    pub(crate) fn provider(&self) -> &Arc<dyn SyncProvider> {
        &self.provider
    }

    pub(crate) fn provider_meta(&self) -> &ProviderMetadata {
        &self.meta
    }

    pub(crate) fn service_config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn sync_config(&self) -> &SyncConfig {
        &self.shared.config
    }

    pub(crate) fn scripts(&self) -> &Arc<dyn ScriptStore> {
        &self.shared.scripts
    }

    /// Whether this service is the one `sync.current` selects.
    pub async fn is_current(&self) -> bool {
        matches!(
            self.shared.config.current().await,
            Ok(Some(ref name)) if name == self.meta.name
        )
    }

    fn set_auth(&self, state: AuthState) {
        self.auth_state.set(state);
        self.shared.events.emit(CoreEvent::Auth(AuthEvent::StateChanged {
            service: self.meta.name.to_string(),
            state: state.to_string(),
        }));
    }

    /// Load the stored token and rebuild the derived auth header.
    fn init_token(&self, token: Option<&str>) -> bool {
        let mut headers = self.headers.lock().unwrap();
        headers.clear();
        let tokened = match token {
            Some(token) => {
                headers.insert("authorization".to_string(), format!("Bearer {token}"));
                true
            }
            None => false,
        };
        drop(headers);
        self.provider.apply_token(token);
        tokened
    }

    /// Push persisted provider configuration into the provider value.
    pub(crate) async fn load_user_config(&self) {
        match self.config.user_config().await {
            Ok(Some(config)) => {
                if let Err(err) = self.provider.set_user_config(config).await {
                    warn!(service = self.meta.name, error = %err, "failed to apply stored user config");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(service = self.meta.name, error = %err, "failed to read stored user config");
            }
        }
    }

    /// Validate authorization: derive headers from the stored token and
    /// check it against the provider's account endpoint.
    #[instrument(skip(self), fields(service = self.meta.name))]
    pub async fn prepare(&self) -> Result<()> {
        self.set_auth(AuthState::Initializing);

        let token = match self.config.token().await {
            Ok(token) => token,
            Err(err) => {
                self.set_auth(AuthState::Error);
                self.sync_state.set(SyncState::Idle);
                return Err(err.into());
            }
        };

        let checked = if self.init_token(token.as_deref()) {
            self.fetch(self.provider.user()).await
        } else {
            Err(SyncError::Unauthorized)
        };

        match checked {
            Ok(()) => {
                self.set_auth(AuthState::Authorized);
                Ok(())
            }
            Err(err) => {
                let state = if err.is_unauthorized() {
                    AuthState::Unauthorized
                } else {
                    AuthState::Error
                };
                debug!(service = self.meta.name, error = %err, "authorization check failed");
                self.set_auth(state);
                self.sync_state.set(SyncState::Idle);
                Err(err)
            }
        }
    }

    /// `prepare` then `start_sync`.
    pub async fn check_sync(&self) -> Result<SyncHandle> {
        self.prepare().await?;
        Ok(self.start_sync().await)
    }

    async fn should_sync(&self) -> bool {
        self.auth_state.get() == AuthState::Authorized && self.is_current().await
    }

    /// Schedule a sync run. Idempotent: triggers landing during the
    /// coalescing window merge into the pending run; the returned handle
    /// settles when that run does.
    pub async fn start_sync(&self) -> SyncHandle {
        if !self.should_sync().await {
            debug!(service = self.meta.name, "sync trigger ignored, not current or not authorized");
            return SyncHandle::finished();
        }
        self.sync_state.set(SyncState::Ready);

        let deadline = Instant::now() + self.coalesce_delay;
        let (task, handle) = {
            let mut pending = self.pending.lock().unwrap();
            if let Some(pending) = pending.as_mut() {
                pending.deadline = deadline;
                (None, SyncHandle { done: pending.done.clone() })
            } else {
                let (tx, done) = watch::channel(false);
                *pending = Some(PendingSync {
                    deadline,
                    done: done.clone(),
                });
                (Some(tx), SyncHandle { done })
            }
        };

        if let Some(done) = task {
            // The service is registry-owned, so the upgrade only fails
            // during teardown, when there is nothing left to run.
            if let Some(service) = self.weak_self.upgrade() {
                tokio::spawn(service.run_pending(done));
            }
        }
        handle
    }

    /// Sleep out the coalescing window (following deadline pushes), then
    /// re-check the gate and run the reconciler under the work lock.
    async fn run_pending(self: Arc<Self>, done: watch::Sender<bool>) {
        loop {
            let deadline = match self.pending.lock().unwrap().as_ref() {
                Some(pending) => pending.deadline,
                None => break,
            };
            if deadline <= Instant::now() {
                break;
            }
            tokio::time::sleep_until(deadline).await;
        }
        self.pending.lock().unwrap().take();

        if !self.should_sync().await {
            debug!(service = self.meta.name, "pending sync dropped at re-check");
            self.sync_state.set(SyncState::Idle);
            let _ = done.send(true);
            return;
        }

        {
            let _serialized = self.shared.work.lock().await;
            self.run_sync().await;
        }
        let _ = done.send(true);
    }

    #[instrument(skip(self), fields(service = self.meta.name))]
    async fn run_sync(&self) {
        self.sync_state.set(SyncState::Syncing);
        self.progress.reset();
        self.shared.notify.notify_one();
        self.shared.events.emit(CoreEvent::Sync(SyncEvent::Started {
            service: self.meta.name.to_string(),
        }));
        info!(service = self.meta.name, "sync started");

        match reconciler::run(self).await {
            Ok(()) => {
                self.sync_state.set(SyncState::Idle);
                self.shared.events.emit(CoreEvent::Sync(SyncEvent::Completed {
                    service: self.meta.name.to_string(),
                }));
                info!(service = self.meta.name, "sync completed");
            }
            Err(err) => {
                warn!(service = self.meta.name, error = %err, "sync failed");
                self.sync_state.set(SyncState::Error);
                self.shared.events.emit(CoreEvent::Sync(SyncEvent::Failed {
                    service: self.meta.name.to_string(),
                    message: err.to_string(),
                }));
            }
        }
    }

    /// Run one provider request through the rate gate and the progress
    /// counters. The total bumps at enqueue, the finished count at settle,
    /// and the change signal fires on both.
    pub(crate) async fn fetch<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = bridge_traits::error::Result<T>>,
    {
        self.progress.total.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_one();

        self.fetch_gate.acquire().await;
        let result = request.await;

        self.progress.finished.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_one();
        Ok(result?)
    }

    /// Snapshot this service for UI consumers.
    pub async fn snapshot(&self) -> ServiceState {
        let local_meta = self.config.meta().await.unwrap_or_default();
        ServiceState {
            name: self.meta.name.to_string(),
            display_name: self.meta.display_name.to_string(),
            auth_state: self.auth_state.get().to_string(),
            sync_state: self.sync_state.get().to_string(),
            last_sync: local_meta.last_sync,
            progress: self.progress.snapshot(),
            properties: self.meta.properties.clone(),
            user_config: self.provider.user_config(),
        }
    }

    /// Kick off the provider's interactive auth flow.
    pub async fn authorize(&self) -> Result<()> {
        self.set_auth(AuthState::Authorizing);
        self.provider.authorize().await?;
        Ok(())
    }

    /// Persist and apply provider-specific configuration, then re-run the
    /// sync check.
    pub async fn set_user_config(&self, config: serde_json::Value) -> Result<SyncHandle> {
        self.config.set_user_config(config.clone()).await?;
        self.provider.set_user_config(config).await?;
        self.check_sync().await
    }

    /// Drop the stored credentials and revoke with the vendor.
    pub async fn revoke(&self) -> Result<()> {
        if let Err(err) = self.provider.revoke().await {
            debug!(service = self.meta.name, error = %err, "provider revoke failed");
        }
        self.config.set_token(None).await?;
        self.init_token(None);
        self.set_auth(AuthState::Unauthorized);
        self.sync_state.set(SyncState::Idle);
        Ok(())
    }
}
