// MIT License - Copyright (c) 2026 Peter Wright
// Alula / Cove bridge

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::entry::{ConfigEntry, ConfigEntryStore};
use crate::error::{AlulaError, ErrorKind, Result};
use crate::event::{BridgeEvent, EventReceiver, EventSender, diff_snapshots, event_channel};
use crate::snapshot::AccountSnapshot;
use crate::transport::{AccountClient, AccountStatus};

/// What subscribers see of the coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    /// Last good snapshot; kept through failed refreshes
    pub snapshot: Option<Arc<AccountSnapshot>>,
    /// False until the first success, and again once failures reach the threshold
    pub available: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Cloneable failure shared between coalesced refresh callers.
#[derive(Debug, Clone)]
struct RefreshFailure {
    kind: ErrorKind,
    message: String,
}

impl From<RefreshFailure> for AlulaError {
    fn from(f: RefreshFailure) -> Self {
        AlulaError::UpdateFailed {
            kind: f.kind,
            message: f.message,
        }
    }
}

type RefreshOutput = std::result::Result<Arc<AccountSnapshot>, RefreshFailure>;
type InFlight = Shared<BoxFuture<'static, RefreshOutput>>;

/// Config entry whose refresh token follows the session.
struct EntryBinding {
    entry: tokio::sync::Mutex<ConfigEntry>,
    store: Arc<dyn ConfigEntryStore>,
}

struct Inner {
    client: Arc<dyn AccountClient>,
    config: CoordinatorConfig,
    binding: Option<EntryBinding>,
    state_tx: watch::Sender<CoordinatorState>,
    event_tx: EventSender,
    in_flight: Mutex<Option<InFlight>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Centralises fetches for one account and fans the result out to entities.
///
/// Cheap to clone; all clones share the same state. At most one
/// `fetch_status` call is in flight at any time: refresh requests arriving
/// while one is running wait for it and receive its result.
#[derive(Clone)]
pub struct UpdateCoordinator {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl UpdateCoordinator {
    pub fn new(client: Arc<dyn AccountClient>, config: CoordinatorConfig) -> Self {
        Self::build(client, config, None)
    }

    /// Coordinator that writes rotated refresh tokens back to `store`.
    pub fn for_entry(
        client: Arc<dyn AccountClient>,
        config: CoordinatorConfig,
        entry: ConfigEntry,
        store: Arc<dyn ConfigEntryStore>,
    ) -> Self {
        let binding = EntryBinding {
            entry: tokio::sync::Mutex::new(entry),
            store,
        };
        Self::build(client, config, Some(binding))
    }

    fn build(
        client: Arc<dyn AccountClient>,
        config: CoordinatorConfig,
        binding: Option<EntryBinding>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CoordinatorState::default());
        let (event_tx, _) = event_channel(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                binding,
                state_tx,
                event_tx,
                in_flight: Mutex::new(None),
                poll_task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn client(&self) -> Arc<dyn AccountClient> {
        Arc::clone(&self.inner.client)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> CoordinatorState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<Arc<AccountSnapshot>> {
        self.inner.state_tx.borrow().snapshot.clone()
    }

    pub fn is_available(&self) -> bool {
        self.inner.state_tx.borrow().available
    }

    /// Watch the coordinator state. Every update replaces the whole value.
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to change events.
    pub fn events(&self) -> EventReceiver {
        self.inner.event_tx.subscribe()
    }

    /// Fetch now, or join the fetch already in flight.
    pub async fn request_refresh(&self) -> Result<Arc<AccountSnapshot>> {
        let fut = {
            let mut slot = lock(&self.inner.in_flight);
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(AlulaError::Shutdown);
            }
            match slot.as_ref() {
                Some(existing) => {
                    debug!("Refresh already in flight, joining it");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let fut = async move { inner.refresh().await }.boxed().shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        fut.await.map_err(AlulaError::from)
    }

    /// Start the poll loop. The first tick is skipped: callers are expected
    /// to have done the first refresh themselves.
    pub fn start(&self) {
        let mut task = lock(&self.inner.poll_task);
        if task.is_some() || self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.update_interval();
        debug!("Polling every {}ms", period.as_millis());
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let coordinator = UpdateCoordinator { inner };
                if let Err(e) = coordinator.request_refresh().await {
                    debug!("Scheduled refresh failed: {e}");
                }
            }
        }));
    }

    /// Stop polling, drop any in-flight fetch and mark entities unavailable.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down update coordinator");
        if let Some(task) = lock(&self.inner.poll_task).take() {
            task.abort();
        }
        lock(&self.inner.in_flight).take();
        let was_available = self.inner.state_tx.borrow().available;
        self.inner.state_tx.send_modify(|s| s.available = false);
        if was_available {
            let _ = self
                .inner
                .event_tx
                .send(BridgeEvent::AvailabilityChanged { available: false });
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.poll_task).take() {
            task.abort();
        }
    }
}

impl Inner {
    async fn refresh(self: Arc<Self>) -> RefreshOutput {
        let result = match tokio::time::timeout(self.config.fetch_timeout(), self.client.fetch_status()).await {
            Ok(result) => result,
            Err(_) => Err(AlulaError::Timeout {
                operation: "fetch_status".to_string(),
            }),
        };

        let output = match result {
            Ok(status) => {
                let snapshot = Arc::new(build_snapshot(status));
                self.apply_success(Arc::clone(&snapshot)).await;
                Ok(snapshot)
            }
            Err(e) => {
                self.apply_failure(&e);
                Err(RefreshFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                })
            }
        };

        lock(&self.in_flight).take();
        output
    }

    async fn apply_success(&self, snapshot: Arc<AccountSnapshot>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let (previous, was_available) = {
            let state = self.state_tx.borrow();
            (state.snapshot.clone(), state.available)
        };

        if previous.is_none() {
            log_first_snapshot(&snapshot);
        }

        let fetched_at = snapshot.fetched_at;
        self.state_tx.send_modify(|s| {
            s.snapshot = Some(Arc::clone(&snapshot));
            s.available = true;
            s.consecutive_failures = 0;
            s.last_error = None;
            s.last_success = Some(fetched_at);
        });
        debug!(
            "Snapshot updated: {} panels, {} zones",
            snapshot.panels.len(),
            snapshot.zone_count()
        );

        if !was_available {
            if previous.is_some() {
                info!("Cove cloud reachable again, entities available");
            }
            let _ = self
                .event_tx
                .send(BridgeEvent::AvailabilityChanged { available: true });
        }
        if let Some(prev) = previous {
            for event in diff_snapshots(&prev, &snapshot) {
                let _ = self.event_tx.send(event);
            }
        }
        let _ = self.event_tx.send(BridgeEvent::SnapshotUpdated(snapshot));

        self.persist_refresh_token().await;
    }

    fn apply_failure(&self, e: &AlulaError) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let threshold = self.config.failure_threshold;
        let mut became_unavailable = false;
        let mut failures = 0;
        self.state_tx.send_modify(|s| {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            s.last_error = Some(e.to_string());
            if s.available && s.consecutive_failures >= threshold {
                s.available = false;
                became_unavailable = true;
            }
            failures = s.consecutive_failures;
        });

        if became_unavailable {
            error!("Refresh failed {failures} times in a row, marking entities unavailable: {e}");
            let _ = self
                .event_tx
                .send(BridgeEvent::AvailabilityChanged { available: false });
        } else if failures == 1 {
            warn!("Refresh failed, keeping last snapshot: {e}");
        } else {
            debug!("Refresh failed ({failures} consecutive): {e}");
        }
        let _ = self.event_tx.send(BridgeEvent::RefreshFailed {
            kind: e.kind(),
            message: e.to_string(),
        });
    }

    async fn persist_refresh_token(&self) {
        let Some(ref binding) = self.binding else {
            return;
        };
        let Some(token) = self.client.refresh_token().await else {
            return;
        };
        let mut entry = binding.entry.lock().await;
        if entry.data.refresh_token.as_deref() == Some(token.as_str()) {
            return;
        }
        entry.data.refresh_token = Some(token);
        match binding.store.update(&entry).await {
            Ok(()) => debug!("Stored rotated refresh token for {}", entry.unique_id),
            Err(e) => warn!("Failed to store refresh token for {}: {e}", entry.unique_id),
        }
    }
}

fn build_snapshot(status: AccountStatus) -> AccountSnapshot {
    AccountSnapshot::new(Utc::now(), status.panels, status.zones, status.camera_count)
}

fn log_first_snapshot(snapshot: &AccountSnapshot) {
    if snapshot.panels.is_empty() && snapshot.camera_count == 0 {
        warn!("No devices found for this account");
        return;
    }
    if snapshot.panels.is_empty() {
        warn!(
            "Account has {} cameras but no alarm panels; no entities will be created",
            snapshot.camera_count
        );
    }
    info!(
        "Found {} panels, {} cameras, zones for {} panels ({} zones)",
        snapshot.panels.len(),
        snapshot.camera_count,
        snapshot.zones.len(),
        snapshot.zone_count()
    );
}
