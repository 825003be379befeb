//! Contact Data Structure
//!
//! A contact is one person or organization managed by the admin application,
//! tagged with a category (`ContactType`). Records are assigned their `id` by
//! the store and carry an `updated_at` timestamp, which is the only ordering
//! and staleness signal this layer trusts.
//!
//! Category-specific columns that this layer does not interpret are kept in
//! the open `attributes` bag, so a full row survives a round trip untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::shared::error::SyncError;

/// Closed set of contact categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContactType {
    BoardMember,
    External,
    Freelance,
    Member,
    Network,
    Partner,
    Waitlist,
    Blacklist,
    Lead,
    Client,
    Investor,
}

impl ContactType {
    /// Every category, in declaration order
    pub const ALL: [ContactType; 11] = [
        ContactType::BoardMember,
        ContactType::External,
        ContactType::Freelance,
        ContactType::Member,
        ContactType::Network,
        ContactType::Partner,
        ContactType::Waitlist,
        ContactType::Blacklist,
        ContactType::Lead,
        ContactType::Client,
        ContactType::Investor,
    ];

    /// Wire name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoardMember => "board-member",
            Self::External => "external",
            Self::Freelance => "freelance",
            Self::Member => "member",
            Self::Network => "network",
            Self::Partner => "partner",
            Self::Waitlist => "waitlist",
            Self::Blacklist => "blacklist",
            Self::Lead => "lead",
            Self::Client => "client",
            Self::Investor => "investor",
        }
    }
}

impl fmt::Display for ContactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContactType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncError::invalid_event(format!("unknown contact type '{}'", s)))
    }
}

/// A contact row as stored upstream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactRecord {
    /// Store-assigned identifier, immutable after creation
    pub id: String,
    /// Category of the contact
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    /// Free-form workflow status
    #[serde(default)]
    pub status: String,
    /// Display name of the person or organization
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Last modification time; monotonically non-decreasing per id
    pub updated_at: DateTime<Utc>,
    /// Category-specific columns not interpreted by this layer
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ContactRecord {
    /// Create a record with empty optional fields
    pub fn new(
        id: impl Into<String>,
        contact_type: ContactType,
        name: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            contact_type,
            status: String::new(),
            name: name.into(),
            email: None,
            company: None,
            tags: BTreeSet::new(),
            updated_at,
            attributes: Map::new(),
        }
    }

    /// Set the status
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Set the email
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set the company
    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Name to show in lists: the name, else the email, else the id
    pub fn display_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            return &self.name;
        }
        self.email.as_deref().unwrap_or(&self.id)
    }

    /// Up to two uppercase initials taken from the display name
    pub fn initials(&self) -> String {
        let initials: String = self
            .display_name()
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect();

        if initials.is_empty() {
            "?".to_string()
        } else {
            initials
        }
    }
}

/// Fields supplied when creating a contact; the store assigns `id` and `updated_at`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactInput {
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    #[serde(default)]
    pub status: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ContactInput {
    pub fn new(contact_type: ContactType, name: impl Into<String>) -> Self {
        Self {
            contact_type,
            status: String::new(),
            name: name.into(),
            email: None,
            company: None,
            tags: BTreeSet::new(),
            attributes: Map::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Partial update; `None` leaves a field untouched. Merging is the store's job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactPatch {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub contact_type: Option<ContactType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

impl ContactPatch {
    pub fn contact_type(mut self, contact_type: ContactType) -> Self {
        self.contact_type = Some(contact_type);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// True when the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.contact_type.is_none()
            && self.status.is_none()
            && self.name.is_none()
            && self.email.is_none()
            && self.company.is_none()
            && self.tags.is_none()
            && self.attributes.is_empty()
    }
}
