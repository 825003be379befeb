//! # Synchronized Collection
//!
//! The authoritative in-memory set of contacts that currently exist and match
//! the active filter. Every mutation goes through [`SynchronizedCollection::seed`]
//! or [`SynchronizedCollection::apply_event`], which enforce the invariants:
//!
//! - **Uniqueness**: at most one record per id
//! - **Membership**: every held record matches the active filter
//! - **Order**: records are kept by `updated_at` descending, ties by id
//! - **Last writer wins**: an event older than the newest known state of its
//!   id is discarded, whatever order it arrived in
//!
//! ## Watermarks
//!
//! The collection remembers the newest `updated_at` it has seen for every id,
//! including ids that are out of scope and ids that were deleted. A deleted id
//! keeps a tombstone: only a record strictly newer than the tombstone brings
//! it back. A delete for an id the collection never saw has no timestamp to
//! compare against, so it blocks every upsert of that id until a bulk load
//! that started after the delete brings the id back.
//!
//! ## Reconciling Bulk Loads
//!
//! A bulk fetch can be overtaken by local writes and realtime events. Every
//! watermark write bumps a generation counter; take [`SynchronizedCollection::generation`]
//! before fetching and hand it to [`SynchronizedCollection::reconcile`]:
//!
//! - ids written after that generation keep their state unless the fetched
//!   row is newer, and survive even when missing from the fetch
//! - every other id takes the fetched row, unless its known state is
//!   strictly newer
//! - ids that were neither written since nor fetched are dropped
//!
//! `seed`, `reset` and `clear` drop all watermarks.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::shared::contact::ContactRecord;
use crate::shared::event::ChangeEvent;
use crate::shared::error::SyncError;
use crate::shared::filter::ContactFilter;

type OrderKey = (Reverse<DateTime<Utc>>, String);

fn order_key(record: &ContactRecord) -> OrderKey {
    (Reverse(record.updated_at), record.id.clone())
}

/// Newest known state of one id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Watermark {
    Live(DateTime<Utc>),
    /// Deleted; `None` when the id was never seen before its deletion
    Deleted(Option<DateTime<Utc>>),
}

impl Watermark {
    fn is_stale(&self, updated_at: DateTime<Utc>) -> bool {
        match self {
            Self::Live(known) => updated_at < *known,
            Self::Deleted(Some(known)) => updated_at <= *known,
            Self::Deleted(None) => true,
        }
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Live(at) => Some(*at),
            Self::Deleted(at) => *at,
        }
    }
}

/// Why an event left the collection unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Older than the newest known state of the id
    Stale,
    /// Does not match the filter and was not held
    OutOfScope,
    /// Delete for an id that was not held
    Absent,
}

/// What applying one event did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Replaced,
    Removed,
    Discarded(DiscardReason),
}

impl ApplyOutcome {
    /// Whether the visible records changed
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Discarded(_))
    }
}

/// Ordered, duplicate-free, filtered set of contacts
#[derive(Debug, Clone, Default)]
pub struct SynchronizedCollection {
    filter: ContactFilter,
    records: HashMap<String, ContactRecord>,
    /// Sorted ascending by `order_key`
    order: Vec<OrderKey>,
    watermarks: HashMap<String, Watermark>,
    /// Generation of the last watermark write per id
    touched: HashMap<String, u64>,
    generation: u64,
}

impl SynchronizedCollection {
    /// Create an empty collection for `filter`
    pub fn new(filter: ContactFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn filter(&self) -> &ContactFilter {
        &self.filter
    }

    /// Replace the whole collection with the matching subset of `records`
    ///
    /// Duplicate ids in the input keep their newest version. Idempotent.
    pub fn seed(&mut self, records: Vec<ContactRecord>) {
        self.clear();
        self.reconcile(records, self.generation);
    }

    /// Counter bumped by every watermark write; read it before a bulk fetch
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Merge a bulk fetch that started at generation `since`
    ///
    /// Writes applied after `since` are kept unless the fetched row is newer.
    pub fn reconcile(&mut self, records: Vec<ContactRecord>, since: u64) {
        let total = records.len();
        let fetched = newest_by_id(records);

        let mut previous_records = std::mem::take(&mut self.records);
        let previous_marks = std::mem::take(&mut self.watermarks);
        let previous_touched = std::mem::take(&mut self.touched);
        self.order.clear();

        let written_since = |id: &str| previous_touched.get(id).is_some_and(|g| *g > since);
        let mut kept = 0usize;

        for (id, mark) in &previous_marks {
            if fetched.contains_key(id) || !written_since(id.as_str()) {
                continue;
            }
            self.restore(id, *mark, &previous_touched, &mut previous_records);
            kept += 1;
        }

        for (id, record) in fetched {
            let keep_existing = match previous_marks.get(&id) {
                None => false,
                Some(mark) if written_since(id.as_str()) => mark.is_stale(record.updated_at),
                Some(mark) => mark.timestamp().is_some_and(|known| known > record.updated_at),
            };

            if keep_existing {
                if let Some(mark) = previous_marks.get(&id) {
                    self.restore(&id, *mark, &previous_touched, &mut previous_records);
                    kept += 1;
                }
                continue;
            }

            self.watermarks
                .insert(id.clone(), Watermark::Live(record.updated_at));
            if self.filter.matches(&record) {
                self.attach(record);
            }
        }

        tracing::debug!(
            "[Collection] Reconciled {} fetched records, kept {} newer local states, {} visible",
            total,
            kept,
            self.records.len()
        );
    }

    fn restore(
        &mut self,
        id: &str,
        mark: Watermark,
        touched: &HashMap<String, u64>,
        records: &mut HashMap<String, ContactRecord>,
    ) {
        self.watermarks.insert(id.to_string(), mark);
        if let Some(generation) = touched.get(id) {
            self.touched.insert(id.to_string(), *generation);
        }
        if let Some(record) = records.remove(id) {
            self.attach(record);
        }
    }

    fn mark(&mut self, id: &str, mark: Watermark) {
        self.generation += 1;
        self.watermarks.insert(id.to_string(), mark);
        self.touched.insert(id.to_string(), self.generation);
    }

    /// Apply one change event
    ///
    /// Malformed events are rejected with `InvalidEventError` and leave the
    /// collection untouched.
    pub fn apply_event(&mut self, event: ChangeEvent) -> Result<ApplyOutcome, SyncError> {
        event.validate()?;

        let outcome = match event {
            // A duplicate insert is an update; delivery is at-least-once.
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => self.upsert(record),
            ChangeEvent::Deleted(id) => self.delete(&id),
        };
        Ok(outcome)
    }

    fn upsert(&mut self, record: ContactRecord) -> ApplyOutcome {
        if let Some(mark) = self.watermarks.get(&record.id) {
            if mark.is_stale(record.updated_at) {
                tracing::debug!(
                    "[Collection] Discarding stale event for {} at {} (known state {:?})",
                    record.id,
                    record.updated_at,
                    mark.timestamp()
                );
                return ApplyOutcome::Discarded(DiscardReason::Stale);
            }
        }

        self.mark(&record.id, Watermark::Live(record.updated_at));

        let previous = self.detach(&record.id);
        if self.filter.matches(&record) {
            self.attach(record);
            if previous.is_some() {
                ApplyOutcome::Replaced
            } else {
                ApplyOutcome::Inserted
            }
        } else if previous.is_some() {
            ApplyOutcome::Removed
        } else {
            ApplyOutcome::Discarded(DiscardReason::OutOfScope)
        }
    }

    fn delete(&mut self, id: &str) -> ApplyOutcome {
        let removed = self.detach(id);
        let known = removed
            .as_ref()
            .map(|record| record.updated_at)
            .or_else(|| self.watermarks.get(id).and_then(Watermark::timestamp));
        self.mark(id, Watermark::Deleted(known));

        if removed.is_some() {
            ApplyOutcome::Removed
        } else {
            ApplyOutcome::Discarded(DiscardReason::Absent)
        }
    }

    fn attach(&mut self, record: ContactRecord) {
        let key = order_key(&record);
        let position = self.order.binary_search(&key).unwrap_or_else(|pos| pos);
        self.order.insert(position, key);
        self.records.insert(record.id.clone(), record);
    }

    fn detach(&mut self, id: &str) -> Option<ContactRecord> {
        let record = self.records.remove(id)?;
        if let Ok(position) = self.order.binary_search(&order_key(&record)) {
            self.order.remove(position);
        }
        Some(record)
    }

    /// Copy of the visible records, most recently changed first
    pub fn snapshot(&self) -> Vec<ContactRecord> {
        self.order
            .iter()
            .filter_map(|(_, id)| self.records.get(id))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&ContactRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Switch to a new filter; the collection is emptied and must be re-seeded
    pub fn reset(&mut self, filter: ContactFilter) {
        self.filter = filter;
        self.clear();
    }

    /// Drop all records and watermarks
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.watermarks.clear();
        self.touched.clear();
    }
}

/// Drop blank ids and keep the newest version of each id
fn newest_by_id(records: Vec<ContactRecord>) -> HashMap<String, ContactRecord> {
    let mut newest: HashMap<String, ContactRecord> = HashMap::with_capacity(records.len());
    for record in records {
        if record.id.trim().is_empty() {
            tracing::warn!("[Collection] Dropping fetched record without an id");
            continue;
        }
        let newer = newest
            .get(&record.id)
            .map_or(true, |existing| record.updated_at >= existing.updated_at);
        if newer {
            newest.insert(record.id.clone(), record);
        }
    }
    newest
}
