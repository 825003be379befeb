//! Writes landing while a bulk load is in flight

use async_trait::async_trait;
use contact_sync::{
    ContactFilter, ContactInput, ContactPatch, ContactRecord, ContactStore, ContactSync,
    ContactType, InMemoryContactStore, SubscriptionState, SyncError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::assert_ok;
use crate::common::*;

/// Store whose next fetch reads its rows, then waits for `release()`
///
/// The returned rows are the ones present when the fetch started, like a
/// query whose response is still on the wire.
struct HeldStore {
    inner: Arc<InMemoryContactStore>,
    hold: AtomicBool,
    entered: watch::Sender<usize>,
    release: watch::Sender<bool>,
}

impl HeldStore {
    fn new(inner: Arc<InMemoryContactStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            hold: AtomicBool::new(false),
            entered: watch::channel(0).0,
            release: watch::channel(false).0,
        })
    }

    fn hold_next_fetch(&self) {
        self.release.send_replace(false);
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Wait until a held fetch has read its rows
    async fn wait_held(&self) {
        let mut entered = self.entered.subscribe();
        assert_ok!(
            tokio::time::timeout(Duration::from_secs(2), entered.wait_for(|n| *n >= 1)).await
        )
        .unwrap();
    }

    fn release(&self) {
        self.release.send_replace(true);
    }
}

#[async_trait]
impl ContactStore for HeldStore {
    async fn fetch_contacts(&self, filter: &ContactFilter) -> Result<Vec<ContactRecord>, SyncError> {
        let rows = self.inner.fetch_contacts(filter).await?;
        if self.hold.swap(false, Ordering::SeqCst) {
            let mut release = self.release.subscribe();
            self.entered.send_modify(|n| *n += 1);
            let _ = release.wait_for(|open| *open).await;
        }
        Ok(rows)
    }

    async fn insert_contact(&self, input: ContactInput) -> Result<ContactRecord, SyncError> {
        self.inner.insert_contact(input).await
    }

    async fn update_contact(&self, id: &str, patch: ContactPatch) -> Result<ContactRecord, SyncError> {
        self.inner.update_contact(id, patch).await
    }

    async fn delete_contact(&self, id: &str) -> Result<(), SyncError> {
        self.inner.delete_contact(id).await
    }
}

async fn open_held(
    held: &Arc<HeldStore>,
    feed: &Arc<InMemoryContactStore>,
    realtime: bool,
) -> Arc<ContactSync> {
    Arc::new(
        ContactSync::open(
            held.clone(),
            feed.clone(),
            fast_config(realtime),
            ContactFilter::all(),
        )
        .await,
    )
}

fn spawn_reload(sync: &Arc<ContactSync>) -> JoinHandle<Result<(), SyncError>> {
    let sync = Arc::clone(sync);
    tokio::spawn(async move { sync.reload().await })
}

fn visible(sync: &ContactSync, id: &str) -> bool {
    sync.current_view().iter().any(|c| c.id == id)
}

#[tokio::test]
async fn test_create_during_reload_survives() {
    let store = memory_store();
    store.preload(vec![lead("a", 10)]).await;
    let held = HeldStore::new(store.clone());
    let sync = open_held(&held, &store, false).await;

    held.hold_next_fetch();
    let reload = spawn_reload(&sync);
    held.wait_held().await;

    let created = assert_ok!(sync.create(ContactInput::new(ContactType::Lead, "Mid-load")).await);
    assert!(visible(&sync, &created.id));

    held.release();
    assert_ok!(assert_ok!(reload.await));

    assert!(visible(&sync, &created.id));
    assert!(visible(&sync, "a"));
    assert!(sync.last_error().is_none());
}

#[tokio::test]
async fn test_delete_during_reload_stays_deleted() {
    let store = memory_store();
    store.preload(vec![lead("a", 10), lead("b", 20)]).await;
    let held = HeldStore::new(store.clone());
    let sync = open_held(&held, &store, false).await;

    held.hold_next_fetch();
    let reload = spawn_reload(&sync);
    held.wait_held().await;

    assert_ok!(sync.delete("b").await);

    held.release();
    assert_ok!(assert_ok!(reload.await));

    assert!(!visible(&sync, "b"));
    assert!(visible(&sync, "a"));
}

#[tokio::test]
async fn test_update_during_reload_is_not_rolled_back() {
    let store = memory_store();
    store.preload(vec![lead("a", 10)]).await;
    let held = HeldStore::new(store.clone());
    let sync = open_held(&held, &store, false).await;

    held.hold_next_fetch();
    let reload = spawn_reload(&sync);
    held.wait_held().await;

    let updated = assert_ok!(sync.update("a", ContactPatch::default().status("qualified")).await);

    held.release();
    assert_ok!(assert_ok!(reload.await));

    assert_eq!(sync.get("a").await, Some(updated));
}

#[tokio::test]
async fn test_realtime_insert_during_reload_survives() {
    let store = memory_store();
    let held = HeldStore::new(store.clone());
    let sync = open_held(&held, &store, true).await;

    held.hold_next_fetch();
    let reload = spawn_reload(&sync);
    held.wait_held().await;

    let remote = assert_ok!(
        store
            .remote_insert(ContactInput::new(ContactType::Partner, "Initech"))
            .await
    );
    eventually(|| visible(&sync, &remote.id)).await;

    held.release();
    assert_ok!(assert_ok!(reload.await));

    assert!(visible(&sync, &remote.id));
}

#[tokio::test]
async fn test_resync_racing_local_create_keeps_create() {
    // The feed comes from a separate store, so the create has no echo that
    // could restore it after the re-seed.
    let store = memory_store();
    store.preload(vec![lead("a", 10)]).await;
    let feed = memory_store();
    let held = HeldStore::new(store.clone());
    let sync = open_held(&held, &feed, true).await;

    held.hold_next_fetch();
    feed.drop_connections();
    held.wait_held().await;
    assert!(sync.is_loading());

    let created = assert_ok!(sync.create(ContactInput::new(ContactType::Lead, "Racer")).await);

    held.release();
    eventually(|| !sync.is_loading()).await;

    assert!(visible(&sync, &created.id));
    assert!(visible(&sync, "a"));
    eventually(|| sync.subscription_state() == Some(SubscriptionState::Active)).await;
}

#[tokio::test]
async fn test_rows_removed_upstream_leave_on_reload() {
    let store = memory_store();
    store.preload(vec![lead("a", 10), lead("b", 20)]).await;
    let held = HeldStore::new(store.clone());
    let sync = open_held(&held, &store, false).await;

    // Not a write through this facade, so the reload is authoritative for it.
    assert_ok!(store.delete_contact("b").await);
    assert_ok!(sync.reload().await);

    assert!(!visible(&sync, "b"));
    assert!(visible(&sync, "a"));
}

#[tokio::test]
async fn test_filter_switch_with_failed_subscribe_still_switches() {
    let store = memory_store();
    store
        .preload(vec![lead("a", 10), contact("c", ContactType::Client, 20)])
        .await;
    let sync = open_sync(&store, only(ContactType::Lead), true).await;

    store.fail_next_subscribes(1);
    assert_ok!(sync.load(only(ContactType::Client)).await);

    assert_eq!(sync.filter().await, only(ContactType::Client));
    assert!(visible(&sync, "c"));
    assert!(!visible(&sync, "a"));
    assert!(sync.realtime_enabled());

    eventually(|| sync.subscription_state() == Some(SubscriptionState::Active)).await;
    assert_eq!(store.active_subscriptions(), 1);
    eventually(|| sync.last_error().is_none()).await;
}
