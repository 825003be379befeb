//! Upstream collaborator seams
//!
//! The remote data store and its change feed are external to this crate. The
//! facade talks to them only through these two traits:
//!
//! - [`ContactStore`] - bulk query plus create/update/delete
//! - [`ChangeTransport`] - opens a row-level change feed for a table scope
//!
//! A change feed is a stream of raw payloads. An `Err` item or the end of the
//! stream means the connection dropped; dropping the stream unsubscribes.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::shared::contact::{ContactInput, ContactPatch, ContactRecord};
use crate::shared::error::SyncError;
use crate::shared::event::RawChangePayload;
use crate::shared::filter::ContactFilter;

/// Live change notifications for one subscription
pub type ChangeFeed = BoxStream<'static, Result<RawChangePayload, SyncError>>;

/// Bulk query and mutation interface of the contact table
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Contacts matching `filter`, ordered by `updated_at` descending
    async fn fetch_contacts(&self, filter: &ContactFilter) -> Result<Vec<ContactRecord>, SyncError>;

    /// Create a contact and return the stored row
    async fn insert_contact(&self, input: ContactInput) -> Result<ContactRecord, SyncError>;

    /// Merge `patch` into the contact and return the stored row
    async fn update_contact(&self, id: &str, patch: ContactPatch) -> Result<ContactRecord, SyncError>;

    async fn delete_contact(&self, id: &str) -> Result<(), SyncError>;
}

/// What a change subscription listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeScope {
    /// Table whose row changes are delivered
    pub table: String,
    /// Filter of the subscriber owning the feed
    pub filter: ContactFilter,
}

impl ChangeScope {
    pub fn new(table: impl Into<String>, filter: ContactFilter) -> Self {
        Self {
            table: table.into(),
            filter,
        }
    }
}

/// Subscribe/unsubscribe interface of the change-event source
#[async_trait]
pub trait ChangeTransport: Send + Sync {
    /// Open a feed for `scope`; resolves once the subscription is established
    async fn subscribe(&self, scope: &ChangeScope) -> Result<ChangeFeed, SyncError>;
}
