//! Sync Module
//!
//! Runtime side of the contact synchronization layer:
//!
//! - `collection` - filtered, ordered, last-writer-wins contact set
//! - `store` - traits for the upstream store and change feed
//! - `retry` - reconnect backoff schedule
//! - `subscription` - change feed lifecycle and reconnection
//! - `facade` - `ContactSync`, the surface presentation code uses
//! - `memory` - in-process store and change feed

pub mod collection;
pub mod facade;
pub mod memory;
pub mod retry;
pub mod store;
pub mod subscription;

pub use collection::{ApplyOutcome, DiscardReason, SynchronizedCollection};
pub use facade::{ContactSync, SyncSnapshot};
pub use memory::InMemoryContactStore;
pub use retry::{Backoff, BackoffStrategy};
pub use store::{ChangeFeed, ChangeScope, ChangeTransport, ContactStore};
pub use subscription::{ChangeSubscription, NoticeHandler, SubscriptionNotice, SubscriptionState};
