//! Contact Predicate Filter
//!
//! A `ContactFilter` decides which contacts are visible to one subscriber.
//! It is an immutable value: build it once with [`ContactFilter::builder`],
//! then evaluate it against any number of records.
//!
//! # Constraints
//!
//! Every constraint is optional and they combine with AND:
//!
//! - type membership (`types`)
//! - status membership (`statuses`)
//! - case-insensitive substring search over name, email and company
//! - required tag subset (`tags`)
//! - inclusive `updated_at` window (`updated_after` / `updated_before`)
//!
//! An empty membership set is treated as "no constraint", matching how the
//! admin screens send an unselected multi-select.
//!
//! # Example
//!
//! ```rust
//! use contact_sync::shared::{ContactFilter, ContactType};
//!
//! let filter = ContactFilter::builder()
//!     .types([ContactType::Lead, ContactType::Client])
//!     .search("acme")
//!     .build()
//!     .unwrap();
//! assert!(filter.types().is_some());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::shared::contact::{ContactRecord, ContactType};
use crate::shared::error::SyncError;

/// Which contacts are in scope
///
/// Deserialization goes through [`ContactFilterBuilder`], so a decoded filter
/// obeys the same rules as a built one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ContactFilterRepr")]
pub struct ContactFilter {
    types: Option<BTreeSet<ContactType>>,
    statuses: Option<BTreeSet<String>>,
    /// Lowercased, trimmed search needle
    search: Option<String>,
    tags: BTreeSet<String>,
    updated_after: Option<DateTime<Utc>>,
    updated_before: Option<DateTime<Utc>>,
}

impl ContactFilter {
    /// Filter that matches every record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn builder() -> ContactFilterBuilder {
        ContactFilterBuilder::default()
    }

    /// Whether `record` is in scope. Pure and total.
    pub fn matches(&self, record: &ContactRecord) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&record.contact_type) {
                return false;
            }
        }

        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&record.status) {
                return false;
            }
        }

        if !self.tags.is_subset(&record.tags) {
            return false;
        }

        if let Some(after) = self.updated_after {
            if record.updated_at < after {
                return false;
            }
        }

        if let Some(before) = self.updated_before {
            if record.updated_at > before {
                return false;
            }
        }

        match &self.search {
            Some(needle) => Self::text_matches(record, needle),
            None => true,
        }
    }

    fn text_matches(record: &ContactRecord, needle: &str) -> bool {
        let haystacks = [
            Some(record.name.as_str()),
            record.email.as_deref(),
            record.company.as_deref(),
        ];
        haystacks
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(needle))
    }

    pub fn types(&self) -> Option<&BTreeSet<ContactType>> {
        self.types.as_ref()
    }

    pub fn statuses(&self) -> Option<&BTreeSet<String>> {
        self.statuses.as_ref()
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn updated_after(&self) -> Option<DateTime<Utc>> {
        self.updated_after
    }

    pub fn updated_before(&self) -> Option<DateTime<Utc>> {
        self.updated_before
    }
}

/// Builder for [`ContactFilter`]
#[derive(Debug, Default)]
pub struct ContactFilterBuilder {
    types: BTreeSet<ContactType>,
    statuses: BTreeSet<String>,
    search: Option<String>,
    tags: BTreeSet<String>,
    updated_after: Option<DateTime<Utc>>,
    updated_before: Option<DateTime<Utc>>,
}

impl ContactFilterBuilder {
    pub fn types(mut self, types: impl IntoIterator<Item = ContactType>) -> Self {
        self.types.extend(types);
        self
    }

    pub fn contact_type(mut self, contact_type: ContactType) -> Self {
        self.types.insert(contact_type);
        self
    }

    pub fn statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statuses.extend(statuses.into_iter().map(Into::into));
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn updated_after(mut self, at: DateTime<Utc>) -> Self {
        self.updated_after = Some(at);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    /// Build the filter, rejecting an inverted `updated_at` window
    pub fn build(self) -> Result<ContactFilter, SyncError> {
        if let (Some(after), Some(before)) = (self.updated_after, self.updated_before) {
            if after > before {
                return Err(SyncError::invalid_filter(format!(
                    "updated_after ({}) is later than updated_before ({})",
                    after.to_rfc3339(),
                    before.to_rfc3339()
                )));
            }
        }

        let search = self
            .search
            .map(|text| text.trim().to_lowercase())
            .filter(|text| !text.is_empty());

        Ok(ContactFilter {
            types: (!self.types.is_empty()).then_some(self.types),
            statuses: (!self.statuses.is_empty()).then_some(self.statuses),
            search,
            tags: self.tags,
            updated_after: self.updated_after,
            updated_before: self.updated_before,
        })
    }
}

/// Wire shape of a filter before validation
#[derive(Default, Deserialize)]
#[serde(default)]
struct ContactFilterRepr {
    types: Option<BTreeSet<ContactType>>,
    statuses: Option<BTreeSet<String>>,
    search: Option<String>,
    tags: BTreeSet<String>,
    updated_after: Option<DateTime<Utc>>,
    updated_before: Option<DateTime<Utc>>,
}

impl TryFrom<ContactFilterRepr> for ContactFilter {
    type Error = SyncError;

    fn try_from(repr: ContactFilterRepr) -> Result<Self, Self::Error> {
        let mut builder = ContactFilter::builder()
            .types(repr.types.unwrap_or_default())
            .statuses(repr.statuses.unwrap_or_default())
            .tags(repr.tags);
        if let Some(search) = repr.search {
            builder = builder.search(search);
        }
        if let Some(after) = repr.updated_after {
            builder = builder.updated_after(after);
        }
        if let Some(before) = repr.updated_before {
            builder = builder.updated_before(before);
        }
        builder.build()
    }
}
