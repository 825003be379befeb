//! # Synchronization Facade
//!
//! `ContactSync` is the only surface presentation code talks to. It owns the
//! synchronized collection, runs bulk loads against the store, applies local
//! mutations optimistically and wires the change subscription into the
//! collection when realtime is enabled.
//!
//! ## Features
//!
//! - **Reactive view**: `subscribe()` hands out a watch receiver that is
//!   updated after every change to the collection
//! - **Stale-but-visible**: a failed load keeps the previous view and records the error
//! - **Optimistic CRUD**: a confirmed mutation is applied right away; the
//!   change-feed echo arriving later is absorbed by last-writer-wins
//! - **Loads don't roll back**: writes and events that land while a fetch is
//!   in flight survive the reload it feeds
//! - **One feed at a time**: switching the filter with realtime enabled stops
//!   the old subscription before the new one starts
//! - **Quiescent disable**: once `disable_realtime()` returns, no more events
//!   reach the collection
//!
//! ## Usage
//!
//! ```rust,no_run
//! use contact_sync::{ContactFilter, ContactSync, ContactType, InMemoryContactStore, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryContactStore::new("contacts"));
//! let leads = ContactFilter::builder().contact_type(ContactType::Lead).build()?;
//! let sync = ContactSync::open(store.clone(), store, SyncConfig::default(), leads).await;
//!
//! println!("{} leads", sync.current_view().len());
//!
//! let mut items = sync.subscribe();
//! items.changed().await?;
//! println!("now {} leads", items.borrow().len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Notices from the subscription are funnelled through an unbounded channel
//! into a single pump task, so realtime events are applied one at a time and
//! in arrival order. The collection sits behind a `tokio::sync::RwLock`; it
//! stays readable while loads and mutations are in flight.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::shared::config::SyncConfig;
use crate::shared::contact::{ContactInput, ContactPatch, ContactRecord};
use crate::shared::error::{MutationKind, SyncError};
use crate::shared::event::ChangeEvent;
use crate::shared::filter::ContactFilter;
use crate::sync::collection::SynchronizedCollection;
use crate::sync::store::{ChangeScope, ChangeTransport, ContactStore};
use crate::sync::subscription::{ChangeSubscription, SubscriptionNotice, SubscriptionState};

/// Point-in-time view of everything the presentation layer renders
#[derive(Debug, Clone)]
pub struct SyncSnapshot {
    /// Visible contacts, newest first
    pub items: Arc<Vec<ContactRecord>>,
    /// At least one load is in flight
    pub is_loading: bool,
    /// Most recent failure, cleared by the next successful load
    pub error: Option<SyncError>,
    pub realtime_enabled: bool,
    /// `None` while realtime is disabled
    pub subscription_state: Option<SubscriptionState>,
    /// Completion time of the last successful load
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Status {
    last_error: Option<SyncError>,
    last_synced_at: Option<DateTime<Utc>>,
    subscription: Option<watch::Receiver<SubscriptionState>>,
}

struct SyncInner {
    store: Arc<dyn ContactStore>,
    transport: Arc<dyn ChangeTransport>,
    config: SyncConfig,
    collection: RwLock<SynchronizedCollection>,
    view: watch::Sender<Arc<Vec<ContactRecord>>>,
    status: Mutex<Status>,
    loads_in_flight: AtomicUsize,
    realtime_enabled: AtomicBool,
}

/// Decrements the in-flight load counter on every exit path
struct LoadingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> LoadingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SyncInner {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_error(&self, error: SyncError) {
        self.status().last_error = Some(error);
    }

    fn mark_synced(&self) {
        let mut status = self.status();
        status.last_error = None;
        status.last_synced_at = Some(Utc::now());
    }

    /// Push the collection's current order to view subscribers
    fn publish(&self, collection: &SynchronizedCollection) {
        self.view.send_replace(Arc::new(collection.snapshot()));
    }

    async fn apply(&self, event: ChangeEvent, origin: &str) {
        let id = event.id().to_string();
        let mut collection = self.collection.write().await;
        match collection.apply_event(event) {
            Ok(outcome) => {
                tracing::debug!("[ContactSync] {} event for {}: {:?}", origin, id, outcome);
                if outcome.changed() {
                    self.publish(&collection);
                }
            }
            Err(err) => {
                tracing::warn!("[ContactSync] Rejected {} event for {}: {}", origin, id, err);
                self.record_error(err);
            }
        }
    }

    /// Re-seed from the store under the current filter
    async fn refresh(&self) -> Result<(), SyncError> {
        let (filter, since) = {
            let collection = self.collection.read().await;
            (collection.filter().clone(), collection.generation())
        };
        let _loading = LoadingGuard::new(&self.loads_in_flight);

        let records = match self.store.fetch_contacts(&filter).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!("[ContactSync] Re-sync fetch failed: {}", err);
                self.record_error(err.clone());
                return Err(err);
            }
        };

        let mut collection = self.collection.write().await;
        if collection.filter() != &filter {
            tracing::debug!("[ContactSync] Filter changed during re-sync, dropping result");
            return Ok(());
        }
        collection.reconcile(records, since);
        self.publish(&collection);
        drop(collection);

        self.mark_synced();
        Ok(())
    }
}

/// Applies subscription notices to the collection, one at a time
async fn pump_notices(inner: Arc<SyncInner>, mut notices: mpsc::UnboundedReceiver<SubscriptionNotice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            SubscriptionNotice::Event(event) => inner.apply(event, "realtime").await,
            SubscriptionNotice::Rejected(err) => inner.record_error(err),
            SubscriptionNotice::Resynchronize => {
                tracing::info!("[ContactSync] Change feed reconnected, re-seeding");
                // Failure is already recorded; the stale view stays visible.
                let _ = inner.refresh().await;
            }
        }
    }
    tracing::debug!("[ContactSync] Notice pump finished");
}

/// A running subscription plus the task draining its notices
struct RealtimeWiring {
    subscription: ChangeSubscription,
    pump: Option<JoinHandle<()>>,
}

impl RealtimeWiring {
    async fn start(inner: &Arc<SyncInner>) -> Result<Self, SyncError> {
        let filter = inner.collection.read().await.filter().clone();
        let subscription = ChangeSubscription::new(
            Arc::clone(&inner.transport),
            ChangeScope::new(inner.config.table.clone(), filter),
            inner.config.backoff(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_notices(Arc::clone(inner), rx));

        subscription
            .start(move |notice| {
                // The pump only goes away after the subscription stopped.
                let _ = tx.send(notice);
            })
            .await?;

        inner.status().subscription = Some(subscription.watch_state());
        Ok(Self {
            subscription,
            pump: Some(pump),
        })
    }

    /// Stop the feed, then drain and join the pump
    async fn shutdown(mut self, inner: &SyncInner) {
        self.subscription.stop().await;
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                if e.is_panic() {
                    tracing::error!("[ContactSync] Notice pump panicked: {}", e);
                }
            }
        }
        inner.status().subscription = None;
    }
}

impl Drop for RealtimeWiring {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Synchronized contact collection exposed to presentation code
pub struct ContactSync {
    inner: Arc<SyncInner>,
    realtime: tokio::sync::Mutex<Option<RealtimeWiring>>,
}

impl fmt::Debug for ContactSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactSync")
            .field("table", &self.inner.config.table)
            .field("items", &self.current_view().len())
            .field("realtime_enabled", &self.realtime_enabled())
            .finish()
    }
}

impl ContactSync {
    /// Create an empty facade scoped to `filter`; performs no I/O
    pub fn new(
        store: Arc<dyn ContactStore>,
        transport: Arc<dyn ChangeTransport>,
        config: SyncConfig,
        filter: ContactFilter,
    ) -> Self {
        let (view, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(SyncInner {
                store,
                transport,
                config,
                collection: RwLock::new(SynchronizedCollection::new(filter)),
                view,
                status: Mutex::new(Status::default()),
                loads_in_flight: AtomicUsize::new(0),
                realtime_enabled: AtomicBool::new(false),
            }),
            realtime: tokio::sync::Mutex::new(None),
        }
    }

    /// Create the facade, run the initial load and start realtime if configured
    ///
    /// Failures are recorded in `last_error()` rather than returned, so the
    /// caller always gets a usable handle.
    pub async fn open(
        store: Arc<dyn ContactStore>,
        transport: Arc<dyn ChangeTransport>,
        config: SyncConfig,
        filter: ContactFilter,
    ) -> Self {
        let realtime_on_open = config.realtime_on_open;
        let sync = Self::new(store, transport, config, filter.clone());

        if let Err(err) = sync.load(filter).await {
            tracing::warn!("[ContactSync] Initial load failed: {}", err);
        }
        if realtime_on_open {
            if let Err(err) = sync.enable_realtime().await {
                tracing::warn!("[ContactSync] Could not enable realtime: {}", err);
                sync.inner.record_error(err);
            }
        }
        sync
    }

    /// Bulk-load contacts matching `filter` and seed the collection
    ///
    /// On failure the previous view stays in place and the error is recorded.
    /// Under the current filter the fetched rows are reconciled with local
    /// writes and realtime events that landed while the fetch was in flight.
    /// A different filter resets the collection and, with realtime enabled,
    /// replaces the subscription with one scoped to the new filter.
    ///
    /// Once the rows are in, the load counts as successful: if the
    /// replacement subscription cannot start, the error is recorded, realtime
    /// ends up disabled and `Ok(())` is still returned.
    pub async fn load(&self, filter: ContactFilter) -> Result<(), SyncError> {
        let mut realtime = self.realtime.lock().await;
        let loading = LoadingGuard::new(&self.inner.loads_in_flight);
        let since = self.inner.collection.read().await.generation();

        tracing::debug!("[ContactSync] Loading contacts");
        let records = match self.inner.store.fetch_contacts(&filter).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!("[ContactSync] Load failed, keeping previous view: {}", err);
                self.inner.record_error(err.clone());
                return Err(err);
            }
        };

        let filter_changed = {
            let mut collection = self.inner.collection.write().await;
            let changed = collection.filter() != &filter;
            if changed {
                collection.reset(filter);
                collection.seed(records);
            } else {
                collection.reconcile(records, since);
            }
            self.inner.publish(&collection);
            tracing::info!("[ContactSync] Loaded {} contact(s)", collection.size());
            changed
        };
        self.inner.mark_synced();
        drop(loading);

        if filter_changed {
            if let Some(wiring) = realtime.take() {
                tracing::info!("[ContactSync] Filter changed, restarting change feed");
                wiring.shutdown(&self.inner).await;
                self.inner.realtime_enabled.store(false, Ordering::SeqCst);
                match RealtimeWiring::start(&self.inner).await {
                    Ok(wiring) => {
                        *realtime = Some(wiring);
                        self.inner.realtime_enabled.store(true, Ordering::SeqCst);
                    }
                    Err(err) => {
                        tracing::warn!(
                            "[ContactSync] Loaded new filter but change feed did not restart: {}",
                            err
                        );
                        self.inner.record_error(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// Reload with the current filter
    pub async fn reload(&self) -> Result<(), SyncError> {
        let filter = self.filter().await;
        self.load(filter).await
    }

    /// Create a contact and show it without waiting for the change feed
    pub async fn create(&self, input: ContactInput) -> Result<ContactRecord, SyncError> {
        match self.inner.store.insert_contact(input).await {
            Ok(record) => {
                self.inner
                    .apply(ChangeEvent::Inserted(record.clone()), "create")
                    .await;
                Ok(record)
            }
            Err(err) => Err(self.mutation_failed(MutationKind::Create, err)),
        }
    }

    /// Update a contact and apply the stored row immediately
    pub async fn update(&self, id: &str, patch: ContactPatch) -> Result<ContactRecord, SyncError> {
        match self.inner.store.update_contact(id, patch).await {
            Ok(record) => {
                self.inner
                    .apply(ChangeEvent::Updated(record.clone()), "update")
                    .await;
                Ok(record)
            }
            Err(err) => Err(self.mutation_failed(MutationKind::Update, err)),
        }
    }

    /// Delete a contact and remove it immediately
    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        match self.inner.store.delete_contact(id).await {
            Ok(()) => {
                self.inner
                    .apply(ChangeEvent::Deleted(id.to_string()), "delete")
                    .await;
                Ok(())
            }
            Err(err) => Err(self.mutation_failed(MutationKind::Delete, err)),
        }
    }

    fn mutation_failed(&self, operation: MutationKind, err: SyncError) -> SyncError {
        let err = match err {
            err @ SyncError::MutationError { .. } => err,
            other => SyncError::mutation(operation, other.to_string()),
        };
        tracing::warn!("[ContactSync] {}", err);
        self.inner.record_error(err.clone());
        err
    }

    /// Start the change subscription for the current filter; no-op if running
    pub async fn enable_realtime(&self) -> Result<(), SyncError> {
        let mut realtime = self.realtime.lock().await;
        if realtime.is_some() {
            return Ok(());
        }
        *realtime = Some(RealtimeWiring::start(&self.inner).await?);
        self.inner.realtime_enabled.store(true, Ordering::SeqCst);
        tracing::info!("[ContactSync] Realtime enabled");
        Ok(())
    }

    /// Stop the change subscription; no event is applied after this returns
    pub async fn disable_realtime(&self) {
        let mut realtime = self.realtime.lock().await;
        if let Some(wiring) = realtime.take() {
            wiring.shutdown(&self.inner).await;
            self.inner.realtime_enabled.store(false, Ordering::SeqCst);
            tracing::info!("[ContactSync] Realtime disabled");
        }
    }

    pub async fn set_realtime(&self, enabled: bool) -> Result<(), SyncError> {
        if enabled {
            self.enable_realtime().await
        } else {
            self.disable_realtime().await;
            Ok(())
        }
    }

    /// Flip realtime and return the new setting
    pub async fn toggle_realtime(&self) -> Result<bool, SyncError> {
        let enable = !self.realtime_enabled();
        self.set_realtime(enable).await?;
        Ok(enable)
    }

    pub fn realtime_enabled(&self) -> bool {
        self.inner.realtime_enabled.load(Ordering::SeqCst)
    }

    /// Visible contacts, newest first
    pub fn current_view(&self) -> Arc<Vec<ContactRecord>> {
        self.inner.view.borrow().clone()
    }

    /// Receiver updated after every change to the visible contacts
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ContactRecord>>> {
        self.inner.view.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loads_in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn last_error(&self) -> Option<SyncError> {
        self.inner.status().last_error.clone()
    }

    /// State of the change subscription, `None` while realtime is disabled
    pub fn subscription_state(&self) -> Option<SubscriptionState> {
        self.inner
            .status()
            .subscription
            .as_ref()
            .map(|state| *state.borrow())
    }

    pub async fn filter(&self) -> ContactFilter {
        self.inner.collection.read().await.filter().clone()
    }

    pub async fn get(&self, id: &str) -> Option<ContactRecord> {
        self.inner.collection.read().await.get(id).cloned()
    }

    pub fn state(&self) -> SyncSnapshot {
        let status = self.inner.status();
        SyncSnapshot {
            items: self.current_view(),
            is_loading: self.is_loading(),
            error: status.last_error.clone(),
            realtime_enabled: self.realtime_enabled(),
            subscription_state: status.subscription.as_ref().map(|state| *state.borrow()),
            last_synced_at: status.last_synced_at,
        }
    }

    /// Stop realtime and empty the collection
    pub async fn shutdown(&self) {
        self.disable_realtime().await;
        let mut collection = self.inner.collection.write().await;
        collection.clear();
        self.inner.publish(&collection);
        tracing::info!("[ContactSync] Shut down");
    }
}
