//! Shared Module
//!
//! This module contains the plain data types of the contact synchronization
//! layer: the contact record, the predicate filter, normalized change events,
//! the error taxonomy and configuration. None of these types performs I/O.

/// Contact record and mutation inputs
pub mod contact;

/// Predicate filter deciding which contacts are in scope
pub mod filter;

/// Normalized change events and raw payload classification
pub mod event;

/// Shared error types
pub mod error;

/// Synchronization configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use contact::{ContactInput, ContactPatch, ContactRecord, ContactType};
pub use filter::{ContactFilter, ContactFilterBuilder};
pub use event::{ChangeEvent, RawChangePayload};
pub use error::{MutationKind, SyncError};
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
