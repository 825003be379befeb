//! Contact Sync - Realtime Contact Synchronization
//!
//! Keeps a local, filtered, ordered view of a remote contact table in step
//! with the table itself: an initial bulk load seeds the view, a live change
//! feed keeps it current, and local mutations show up immediately without
//! waiting for their echo.
//!
//! # Module Structure
//!
//! - **`shared`** - Plain data types, no I/O
//!   - Contact record, predicate filter, change events
//!   - Error taxonomy and configuration
//!
//! - **`sync`** - Runtime components
//!   - Synchronized collection (last-writer-wins by `updated_at`)
//!   - Change subscription with reconnect and re-seed
//!   - `ContactSync` facade and an in-memory store/feed
//!
//! # Data Flow
//!
//! ```text
//! load(filter) -> fetch -> seed collection -> start subscription
//!                                               |
//!     raw payload -> classify -> ChangeEvent -> apply under filter -> view
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use contact_sync::{ContactFilter, ContactInput, ContactSync, ContactType, InMemoryContactStore, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), contact_sync::SyncError> {
//! let store = Arc::new(InMemoryContactStore::new("contacts"));
//! let sync = ContactSync::open(store.clone(), store, SyncConfig::default(), ContactFilter::all()).await;
//!
//! let created = sync.create(ContactInput::new(ContactType::Lead, "Ada Lovelace")).await?;
//! assert!(sync.current_view().iter().any(|c| c.id == created.id));
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! `ContactSync` is `Send + Sync`; share it behind an `Arc`. Readers get
//! immutable snapshots (`Arc<Vec<ContactRecord>>`) and never see a
//! half-applied change.
//!
//! # Error Handling
//!
//! Every fallible operation returns `Result<T, SyncError>`. Failures are
//! local to one operation and also recorded as the facade's last error.

/// Shared types and data structures
pub mod shared;

/// Collection, subscription and facade
pub mod sync;

pub use shared::{
    ChangeEvent, ConfigError, ContactFilter, ContactFilterBuilder, ContactInput, ContactPatch,
    ContactRecord, ContactType, MutationKind, RawChangePayload, SyncConfig, SyncConfigBuilder,
    SyncError,
};
pub use sync::{
    ApplyOutcome, ChangeScope, ChangeSubscription, ChangeTransport, ContactStore, ContactSync,
    DiscardReason, InMemoryContactStore, SubscriptionNotice, SubscriptionState,
    SynchronizedCollection, SyncSnapshot,
};
