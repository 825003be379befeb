/**
 * Change Event System
 *
 * This module defines the normalized change events that flow into the
 * synchronized collection, and the classification step that turns a raw
 * change-feed payload into one of them.
 *
 * # Raw Payloads
 *
 * The upstream change feed delivers row-level notifications shaped like
 * `{ "eventType": "INSERT" | "UPDATE" | "DELETE", "old": {...}, "new": {...} }`.
 * The row objects are untyped JSON, so classification fails closed: an unknown
 * event type, a missing row, a missing id, or a row that does not decode into
 * a full `ContactRecord` is rejected with `InvalidEventError` and never reaches
 * the collection.
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::contact::ContactRecord;
use crate::shared::error::SyncError;

/// One mutation that happened upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A record was created; carries the full row
    Inserted(ContactRecord),
    /// A record was modified; carries the full merged row
    Updated(ContactRecord),
    /// A record was removed
    Deleted(String),
}

impl ChangeEvent {
    /// Id of the record this event concerns
    pub fn id(&self) -> &str {
        match self {
            Self::Inserted(record) | Self::Updated(record) => &record.id,
            Self::Deleted(id) => id,
        }
    }

    /// Record carried by the event, if any
    pub fn record(&self) -> Option<&ContactRecord> {
        match self {
            Self::Inserted(record) | Self::Updated(record) => Some(record),
            Self::Deleted(_) => None,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inserted(_) => "inserted",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
        }
    }

    /// Reject events the collection cannot index
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.id().trim().is_empty() {
            return Err(SyncError::invalid_event(format!(
                "{} event without an id",
                self.kind()
            )));
        }
        Ok(())
    }

    /// Classify a raw change-feed payload
    pub fn classify(raw: RawChangePayload) -> Result<Self, SyncError> {
        let event = match raw.event_type.as_str() {
            "INSERT" => Self::Inserted(decode_row(raw.new, "INSERT")?),
            "UPDATE" => Self::Updated(decode_row(raw.new, "UPDATE")?),
            "DELETE" => Self::Deleted(deleted_id(raw.old)?),
            other => {
                return Err(SyncError::invalid_event(format!(
                    "unsupported event type '{}'",
                    other
                )))
            }
        };

        event.validate()?;
        Ok(event)
    }
}

/// Raw notification as delivered by the change-event transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangePayload {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

impl RawChangePayload {
    pub fn insert(record: &ContactRecord) -> Result<Self, SyncError> {
        Ok(Self {
            event_type: "INSERT".to_string(),
            old: None,
            new: Some(serde_json::to_value(record)?),
        })
    }

    pub fn update(old: Option<&ContactRecord>, new: &ContactRecord) -> Result<Self, SyncError> {
        Ok(Self {
            event_type: "UPDATE".to_string(),
            old: old.map(serde_json::to_value).transpose()?,
            new: Some(serde_json::to_value(new)?),
        })
    }

    /// Delete notifications only guarantee the primary key in `old`
    pub fn delete(id: &str) -> Self {
        Self {
            event_type: "DELETE".to_string(),
            old: Some(serde_json::json!({ "id": id })),
            new: None,
        }
    }
}

fn decode_row(row: Option<Value>, event_type: &str) -> Result<ContactRecord, SyncError> {
    let row = row.ok_or_else(|| {
        SyncError::invalid_event(format!("{} payload without a new row", event_type))
    })?;
    if !row.is_object() {
        return Err(SyncError::invalid_event(format!(
            "{} payload row is not an object",
            event_type
        )));
    }
    Ok(serde_json::from_value(row)?)
}

fn deleted_id(row: Option<Value>) -> Result<String, SyncError> {
    row.as_ref()
        .and_then(|old| old.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SyncError::invalid_event("DELETE payload without old.id"))
}
