//! Synchronization Error Types
//!
//! This module defines the error taxonomy of the contact synchronization layer.
//! Every error is local to one operation: a failed fetch, a failed mutation,
//! one malformed change payload, a contradictory filter, or a dropped change
//! feed. None of them is allowed to break the collection's invariants.
//!
//! # Error Categories
//!
//! - `FetchError` - Bulk load failed; the previous view stays visible
//! - `MutationError` - Create/update/delete failed; nothing is applied locally
//! - `InvalidEventError` - A change payload failed to classify; it is dropped
//! - `InvalidFilterError` - A filter was built with contradictory bounds
//! - `TransportError` - The change feed dropped; the subscription reconnects
//! - `SubscriptionStopped` - A stopped subscription was asked to start again
//!
//! # Usage
//!
//! ```rust
//! use contact_sync::shared::error::{MutationKind, SyncError};
//!
//! let error = SyncError::mutation(MutationKind::Delete, "row is locked");
//! assert!(error.to_string().contains("delete"));
//! ```
//!
//! # Thread Safety
//!
//! All error types are `Send + Sync + Clone`, so the facade can keep the last
//! error around and hand out copies of it.
use std::fmt;
use thiserror::Error;

/// The mutation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Errors raised by the contact synchronization layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Bulk load from the store failed
    #[error("Fetch error: {message}")]
    FetchError {
        /// Human-readable error message
        message: String,
    },

    /// A create/update/delete call against the store failed
    #[error("Mutation error during {operation}: {message}")]
    MutationError {
        /// Which mutation failed
        operation: MutationKind,
        /// Human-readable error message
        message: String,
    },

    /// A change payload or event was malformed
    #[error("Invalid event: {message}")]
    InvalidEventError {
        /// Human-readable error message
        message: String,
    },

    /// A filter was constructed with contradictory constraints
    #[error("Invalid filter: {message}")]
    InvalidFilterError {
        /// Human-readable error message
        message: String,
    },

    /// The change-event transport failed or dropped the connection
    #[error("Transport error: {message}")]
    TransportError {
        /// Human-readable error message
        message: String,
    },

    /// `start()` was called on a subscription that was already stopped
    #[error("Subscription already stopped; create a new one to resume")]
    SubscriptionStopped,
}

impl SyncError {
    /// Create a new fetch error
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::FetchError {
            message: message.into(),
        }
    }

    /// Create a new mutation error
    pub fn mutation(operation: MutationKind, message: impl Into<String>) -> Self {
        Self::MutationError {
            operation,
            message: message.into(),
        }
    }

    /// Create a new invalid event error
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEventError {
            message: message.into(),
        }
    }

    /// Create a new invalid filter error
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilterError {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportError {
            message: message.into(),
        }
    }
}

/// Payload decoding failures are invalid events
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_event(format!("JSON error: {}", err))
    }
}
