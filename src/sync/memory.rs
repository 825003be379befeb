/**
 * In-Memory Contact Store
 *
 * A process-local stand-in for the remote contact table and its change feed.
 * It implements both `ContactStore` and `ChangeTransport`, so a `ContactSync`
 * can run end to end without a network. The demo binary and the test suite
 * use it; it is also handy for offline development.
 *
 * # Change Feed
 *
 * Every successful mutation is echoed to all open feeds as a raw
 * `INSERT`/`UPDATE`/`DELETE` payload over a `tokio::sync::broadcast` channel,
 * just like the hosted store would. The feed carries every row of the table;
 * filtering is the subscriber's job.
 *
 * A subscriber that falls behind the channel capacity loses its connection
 * (the feed yields a transport error and ends) instead of silently skipping
 * events, so the subscription reconnects and re-seeds.
 *
 * # Fault Injection
 *
 * `fail_next_fetches`, `fail_next_mutations` and `fail_next_subscribes` make
 * the next N calls fail, and `drop_connections` cuts every open feed.
 *
 * # Timestamps
 *
 * `updated_at` is stamped by the store and strictly increases across all
 * writes, even when the wall clock does not move between two of them.
 */
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::shared::contact::{ContactInput, ContactPatch, ContactRecord};
use crate::shared::error::{MutationKind, SyncError};
use crate::shared::event::RawChangePayload;
use crate::shared::filter::ContactFilter;
use crate::sync::store::{ChangeFeed, ChangeScope, ChangeTransport, ContactStore};

/// Buffered messages per feed before a slow subscriber is disconnected
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum FeedMessage {
    Change(RawChangePayload),
    Disconnect,
}

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<String, ContactRecord>,
    clock: Option<DateTime<Utc>>,
}

impl Table {
    /// Next write timestamp, strictly after every earlier one
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(prev) if now <= prev => prev + ChronoDuration::milliseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }
}

struct Inner {
    table: String,
    data: RwLock<Table>,
    feed: broadcast::Sender<FeedMessage>,
    fetch_faults: AtomicUsize,
    mutation_faults: AtomicUsize,
    subscribe_faults: AtomicUsize,
    active_feeds: Arc<AtomicUsize>,
}

/// Shared handle to an in-memory contact table
#[derive(Clone)]
pub struct InMemoryContactStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryContactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContactStore")
            .field("table", &self.inner.table)
            .field("active_feeds", &self.active_subscriptions())
            .finish()
    }
}

impl InMemoryContactStore {
    pub fn new(table: impl Into<String>) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                table: table.into(),
                data: RwLock::new(Table::default()),
                feed,
                fetch_faults: AtomicUsize::new(0),
                mutation_faults: AtomicUsize::new(0),
                subscribe_faults: AtomicUsize::new(0),
                active_feeds: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    /// Store rows as-is, keeping their timestamps, without notifying feeds
    pub async fn preload(&self, records: impl IntoIterator<Item = ContactRecord>) {
        let mut data = self.inner.data.write().await;
        for record in records {
            if data.clock.map_or(true, |clock| record.updated_at > clock) {
                data.clock = Some(record.updated_at);
            }
            data.rows.insert(record.id.clone(), record);
        }
    }

    /// Current row for `id`
    pub async fn row(&self, id: &str) -> Option<ContactRecord> {
        self.inner.data.read().await.rows.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.data.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Create a row as another client would; ignores injected faults
    pub async fn remote_insert(&self, input: ContactInput) -> Result<ContactRecord, SyncError> {
        self.write_insert(input).await
    }

    /// Update a row as another client would; ignores injected faults
    pub async fn remote_update(&self, id: &str, patch: ContactPatch) -> Result<ContactRecord, SyncError> {
        self.write_update(id, patch).await
    }

    /// Delete a row as another client would; ignores injected faults
    pub async fn remote_delete(&self, id: &str) -> Result<(), SyncError> {
        self.write_delete(id).await
    }

    /// Push an arbitrary payload to every open feed
    pub fn emit_raw(&self, payload: RawChangePayload) {
        self.broadcast(FeedMessage::Change(payload));
    }

    /// Cut every open feed; subscribers see a transport error
    pub fn drop_connections(&self) {
        tracing::info!("[MemoryStore] Dropping {} feed(s)", self.active_subscriptions());
        self.broadcast(FeedMessage::Disconnect);
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.inner.fetch_faults.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_mutations(&self, count: usize) {
        self.inner.mutation_faults.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_subscribes(&self, count: usize) {
        self.inner.subscribe_faults.store(count, Ordering::SeqCst);
    }

    /// Number of feeds currently open
    pub fn active_subscriptions(&self) -> usize {
        self.inner.active_feeds.load(Ordering::SeqCst)
    }

    fn broadcast(&self, message: FeedMessage) {
        // No open feeds is not an error.
        let _ = self.inner.feed.send(message);
    }

    async fn write_insert(&self, input: ContactInput) -> Result<ContactRecord, SyncError> {
        let mut data = self.inner.data.write().await;
        let record = ContactRecord {
            id: Uuid::new_v4().to_string(),
            contact_type: input.contact_type,
            status: input.status,
            name: input.name,
            email: input.email,
            company: input.company,
            tags: input.tags,
            updated_at: data.stamp(),
            attributes: input.attributes,
        };

        let payload = RawChangePayload::insert(&record)?;
        data.rows.insert(record.id.clone(), record.clone());
        self.broadcast(FeedMessage::Change(payload));

        tracing::debug!("[MemoryStore] Inserted contact {}", record.id);
        Ok(record)
    }

    async fn write_update(&self, id: &str, patch: ContactPatch) -> Result<ContactRecord, SyncError> {
        let mut data = self.inner.data.write().await;
        let previous = data
            .rows
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::mutation(MutationKind::Update, format!("contact {} not found", id)))?;

        let mut record = previous.clone();
        if let Some(contact_type) = patch.contact_type {
            record.contact_type = contact_type;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(email) = patch.email {
            record.email = Some(email);
        }
        if let Some(company) = patch.company {
            record.company = Some(company);
        }
        if let Some(tags) = patch.tags {
            record.tags = tags;
        }
        record.attributes.extend(patch.attributes);
        record.updated_at = data.stamp();

        let payload = RawChangePayload::update(Some(&previous), &record)?;
        data.rows.insert(record.id.clone(), record.clone());
        self.broadcast(FeedMessage::Change(payload));

        tracing::debug!("[MemoryStore] Updated contact {}", id);
        Ok(record)
    }

    async fn write_delete(&self, id: &str) -> Result<(), SyncError> {
        let mut data = self.inner.data.write().await;
        if data.rows.remove(id).is_none() {
            return Err(SyncError::mutation(
                MutationKind::Delete,
                format!("contact {} not found", id),
            ));
        }
        data.stamp();
        self.broadcast(FeedMessage::Change(RawChangePayload::delete(id)));

        tracing::debug!("[MemoryStore] Deleted contact {}", id);
        Ok(())
    }
}

/// Consume one pending fault, if any
fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ContactStore for InMemoryContactStore {
    async fn fetch_contacts(&self, filter: &ContactFilter) -> Result<Vec<ContactRecord>, SyncError> {
        if take_fault(&self.inner.fetch_faults) {
            return Err(SyncError::fetch("injected fetch failure"));
        }

        let data = self.inner.data.read().await;
        let mut rows: Vec<ContactRecord> = data
            .rows
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn insert_contact(&self, input: ContactInput) -> Result<ContactRecord, SyncError> {
        if take_fault(&self.inner.mutation_faults) {
            return Err(SyncError::mutation(MutationKind::Create, "injected mutation failure"));
        }
        self.write_insert(input).await
    }

    async fn update_contact(&self, id: &str, patch: ContactPatch) -> Result<ContactRecord, SyncError> {
        if take_fault(&self.inner.mutation_faults) {
            return Err(SyncError::mutation(MutationKind::Update, "injected mutation failure"));
        }
        self.write_update(id, patch).await
    }

    async fn delete_contact(&self, id: &str) -> Result<(), SyncError> {
        if take_fault(&self.inner.mutation_faults) {
            return Err(SyncError::mutation(MutationKind::Delete, "injected mutation failure"));
        }
        self.write_delete(id).await
    }
}

/// Keeps the open-feed count in step with live streams
struct FeedGuard {
    active: Arc<AtomicUsize>,
}

impl FeedGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChangeTransport for InMemoryContactStore {
    async fn subscribe(&self, scope: &ChangeScope) -> Result<ChangeFeed, SyncError> {
        if scope.table != self.inner.table {
            return Err(SyncError::transport(format!("unknown table '{}'", scope.table)));
        }
        if take_fault(&self.inner.subscribe_faults) {
            return Err(SyncError::transport("injected subscribe failure"));
        }

        let rx = self.inner.feed.subscribe();
        let guard = FeedGuard::new(Arc::clone(&self.inner.active_feeds));
        tracing::debug!("[MemoryStore] Feed opened on table {}", scope.table);

        let feed = stream::unfold(Some((rx, guard)), |state| async move {
            let (mut rx, guard) = state?;
            match rx.recv().await {
                Ok(FeedMessage::Change(payload)) => Some((Ok(payload), Some((rx, guard)))),
                Ok(FeedMessage::Disconnect) => {
                    Some((Err(SyncError::transport("connection dropped")), None))
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[MemoryStore] Feed lagged behind by {} message(s)", skipped);
                    Some((
                        Err(SyncError::transport(format!("feed lagged by {} message(s)", skipped))),
                        None,
                    ))
                }
                Err(RecvError::Closed) => None,
            }
        });

        Ok(feed.boxed())
    }
}
