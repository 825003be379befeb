//! Facade scenarios against the in-memory store

use assert_matches::assert_matches;
use contact_sync::{
    ContactFilter, ContactInput, ContactPatch, ContactStore, ContactType, MutationKind,
    RawChangePayload, SubscriptionState, SyncError,
};

use crate::common::*;
use crate::{assert_err, assert_newest_first, assert_ok, assert_view_ids};

#[tokio::test]
async fn test_open_shows_matching_rows_newest_first() {
    let store = memory_store();
    store
        .preload(vec![
            lead("a", 10),
            lead("b", 30),
            contact("c", ContactType::Client, 20),
            lead("d", 30),
        ])
        .await;

    let sync = open_sync(&store, only(ContactType::Lead), false).await;

    assert_view_ids!(sync.current_view(), ["b", "d", "a"]);
    assert_newest_first!(sync.current_view());
    assert!(!sync.is_loading());
    assert!(sync.last_error().is_none());
}

#[tokio::test]
async fn test_remote_update_out_of_filter_removes_contact() {
    let store = memory_store();
    store.preload(vec![lead("a", 10), lead("b", 20), lead("c", 30)]).await;
    let sync = open_sync(&store, only(ContactType::Lead), true).await;
    assert_eq!(sync.current_view().len(), 3);

    assert_ok!(
        store
            .remote_update("b", ContactPatch::default().contact_type(ContactType::Client))
            .await
    );

    eventually(|| sync.current_view().len() == 2).await;
    assert!(sync.current_view().iter().all(|c| c.id != "b"));
}

#[tokio::test]
async fn test_create_is_visible_before_any_echo() {
    let store = memory_store();
    let sync = open_sync(&store, ContactFilter::all(), false).await;

    let created = assert_ok!(sync.create(ContactInput::new(ContactType::Lead, "Ada")).await);

    assert_view_ids!(sync.current_view(), [created.id.as_str()]);
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_echo_of_local_create_does_not_duplicate() {
    let store = memory_store();
    let sync = open_sync(&store, ContactFilter::all(), true).await;

    let created = assert_ok!(sync.create(ContactInput::new(ContactType::Lead, "Ada")).await);
    settle().await;

    assert_view_ids!(sync.current_view(), [created.id.as_str()]);
}

#[tokio::test]
async fn test_local_update_and_delete_apply_immediately() {
    let store = memory_store();
    store.preload(vec![lead("a", 10), lead("b", 20)]).await;
    let sync = open_sync(&store, ContactFilter::all(), false).await;

    let updated = assert_ok!(sync.update("a", ContactPatch::default().status("qualified")).await);
    assert_eq!(sync.current_view()[0], updated);

    assert_ok!(sync.delete("b").await);
    assert_view_ids!(sync.current_view(), ["a"]);
}

#[tokio::test]
async fn test_failed_mutation_leaves_view_unchanged() {
    let store = memory_store();
    store.preload(vec![lead("a", 10)]).await;
    let sync = open_sync(&store, ContactFilter::all(), false).await;
    let before = sync.current_view();

    store.fail_next_mutations(1);
    assert_err!(
        sync.delete("a").await,
        SyncError::MutationError { operation: MutationKind::Delete, .. }
    );

    assert_eq!(sync.current_view(), before);
    assert_matches!(sync.last_error(), Some(SyncError::MutationError { .. }));
}

#[tokio::test]
async fn test_failed_load_keeps_previous_view() {
    let store = memory_store();
    store.preload(vec![lead("a", 10), lead("b", 20)]).await;
    let sync = open_sync(&store, ContactFilter::all(), false).await;
    let before = sync.current_view();

    store.fail_next_fetches(1);
    assert_err!(sync.reload().await, SyncError::FetchError { .. });

    assert_eq!(sync.current_view(), before);
    assert_matches!(sync.last_error(), Some(SyncError::FetchError { .. }));
    assert!(!sync.is_loading());
    assert!(!sync.state().is_loading);
}

#[tokio::test]
async fn test_successful_load_clears_error() {
    let store = memory_store();
    store.fail_next_fetches(1);
    let sync = open_sync(&store, ContactFilter::all(), false).await;
    assert!(sync.last_error().is_some());
    assert!(sync.state().last_synced_at.is_none());

    assert_ok!(sync.reload().await);

    assert!(sync.last_error().is_none());
    assert!(sync.state().last_synced_at.is_some());
}

#[tokio::test]
async fn test_failed_load_with_new_filter_keeps_old_filter() {
    let store = memory_store();
    store.preload(vec![lead("a", 10)]).await;
    let sync = open_sync(&store, only(ContactType::Lead), false).await;

    store.fail_next_fetches(1);
    assert_err!(sync.load(only(ContactType::Client)).await);

    assert_eq!(sync.filter().await, only(ContactType::Lead));
    assert_view_ids!(sync.current_view(), ["a"]);
}

#[tokio::test]
async fn test_remote_writes_reach_view_and_watchers() {
    let store = memory_store();
    let sync = open_sync(&store, ContactFilter::all(), true).await;
    let mut items = sync.subscribe();

    let created = assert_ok!(
        store
            .remote_insert(ContactInput::new(ContactType::Partner, "Initech"))
            .await
    );

    assert_ok!(
        tokio::time::timeout(std::time::Duration::from_secs(2), items.changed()).await
    )
    .unwrap();
    assert_view_ids!(items.borrow().clone(), [created.id.as_str()]);

    assert_ok!(store.remote_delete(&created.id).await);
    eventually(|| sync.current_view().is_empty()).await;
}

#[tokio::test]
async fn test_disable_realtime_stops_delivery() {
    let store = memory_store();
    let sync = open_sync(&store, ContactFilter::all(), true).await;
    assert!(sync.realtime_enabled());

    sync.disable_realtime().await;
    assert_eq!(store.active_subscriptions(), 0);

    assert_ok!(
        store
            .remote_insert(ContactInput::new(ContactType::Lead, "Late"))
            .await
    );
    settle().await;

    assert!(sync.current_view().is_empty());
    assert!(!sync.realtime_enabled());
    assert_eq!(sync.subscription_state(), None);
}

#[tokio::test]
async fn test_reenable_after_disable_delivers_once() {
    let store = memory_store();
    let sync = open_sync(&store, ContactFilter::all(), true).await;

    sync.disable_realtime().await;
    assert_ok!(sync.enable_realtime().await);
    assert_eq!(store.active_subscriptions(), 1);

    let created = assert_ok!(
        store
            .remote_insert(ContactInput::new(ContactType::Lead, "Once"))
            .await
    );
    eventually(|| !sync.current_view().is_empty()).await;
    settle().await;

    assert_view_ids!(sync.current_view(), [created.id.as_str()]);
}

#[tokio::test]
async fn test_filter_switch_restarts_subscription() {
    let store = memory_store();
    store
        .preload(vec![lead("a", 10), contact("c", ContactType::Client, 20)])
        .await;
    let sync = open_sync(&store, only(ContactType::Lead), true).await;

    assert_ok!(sync.load(only(ContactType::Client)).await);

    assert_view_ids!(sync.current_view(), ["c"]);
    assert_eq!(store.active_subscriptions(), 1);
    assert_eq!(sync.subscription_state(), Some(SubscriptionState::Active));

    assert_ok!(
        store
            .remote_insert(ContactInput::new(ContactType::Lead, "Ignored"))
            .await
    );
    let client = assert_ok!(
        store
            .remote_insert(ContactInput::new(ContactType::Client, "Shown"))
            .await
    );

    eventually(|| sync.current_view().len() == 2).await;
    assert_eq!(sync.current_view()[0].id, client.id);
}

#[tokio::test]
async fn test_reconnect_reseeds_missed_writes() {
    let store = memory_store();
    store.preload(vec![lead("a", 10)]).await;
    let sync = open_sync(&store, ContactFilter::all(), true).await;

    store.drop_connections();
    let missed = assert_ok!(
        store
            .remote_insert(ContactInput::new(ContactType::Lead, "During gap"))
            .await
    );

    eventually(|| sync.current_view().iter().any(|c| c.id == missed.id)).await;
    eventually(|| sync.subscription_state() == Some(SubscriptionState::Active)).await;
    assert_eq!(store.active_subscriptions(), 1);
}

#[tokio::test]
async fn test_malformed_payload_is_reported_and_feed_survives() {
    let store = memory_store();
    let sync = open_sync(&store, ContactFilter::all(), true).await;

    store.emit_raw(RawChangePayload {
        event_type: "TRUNCATE".to_string(),
        old: None,
        new: None,
    });
    eventually(|| sync.last_error().is_some()).await;
    assert_matches!(sync.last_error(), Some(SyncError::InvalidEventError { .. }));

    let created = assert_ok!(
        store
            .remote_insert(ContactInput::new(ContactType::Lead, "Still flowing"))
            .await
    );
    eventually(|| sync.current_view().iter().any(|c| c.id == created.id)).await;
}

#[tokio::test]
async fn test_stale_remote_event_is_discarded() {
    let store = memory_store();
    let sync = open_sync(&store, ContactFilter::all(), true).await;
    let created = assert_ok!(sync.create(ContactInput::new(ContactType::Lead, "Fresh")).await);

    let mut stale = created.clone();
    stale.name = "Stale".to_string();
    stale.updated_at = at(1);
    store.emit_raw(assert_ok!(RawChangePayload::update(None, &stale)));
    settle().await;

    assert_eq!(sync.current_view()[0].name, "Fresh");
}

#[tokio::test]
async fn test_open_survives_failed_initial_load() {
    let store = memory_store();
    store.fail_next_fetches(1);

    let sync = open_sync(&store, ContactFilter::all(), true).await;

    assert!(sync.current_view().is_empty());
    assert_matches!(sync.last_error(), Some(SyncError::FetchError { .. }));
    assert!(sync.realtime_enabled());
}

#[tokio::test]
async fn test_state_snapshot_reflects_facade() {
    let store = memory_store();
    store.preload(vec![lead("a", 10)]).await;
    let sync = open_sync(&store, ContactFilter::all(), true).await;

    let state = sync.state();
    assert_eq!(state.items.len(), 1);
    assert!(!state.is_loading);
    assert!(state.error.is_none());
    assert!(state.realtime_enabled);
    assert_eq!(state.subscription_state, Some(SubscriptionState::Active));

    sync.shutdown().await;
    let state = sync.state();
    assert!(state.items.is_empty());
    assert!(!state.realtime_enabled);
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_store_fetch_matches_facade_view() {
    let store = memory_store();
    store
        .preload(vec![lead("a", 10), lead("b", 20), contact("c", ContactType::Client, 30)])
        .await;
    let sync = open_sync(&store, only(ContactType::Lead), false).await;

    let fetched = assert_ok!(store.fetch_contacts(&only(ContactType::Lead)).await);
    assert_eq!(*sync.current_view(), fetched);
}
