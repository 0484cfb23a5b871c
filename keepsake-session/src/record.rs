//! Persisted record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One stored session, as the backend sees it.
///
/// `session` is opaque to the backend: a JSON string in stringify mode or
/// when encrypted, a JSON object in structural mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Storage key
    #[serde(rename = "_id")]
    pub id: String,
    /// Serialized, possibly encrypted payload
    pub session: Value,
    /// Absolute expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    /// Idle-touch timestamp, only written when idle tracking is enabled
    #[serde(
        rename = "lastModified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Whether the record may be returned by a read at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_none_or(|expires| expires > now)
    }

    /// Whether the record is due for reclamation at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_live_at(now)
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &RecordUpdate) {
        self.expires = Some(update.expires);
        if let Some(last_modified) = update.last_modified {
            self.last_modified = Some(last_modified);
        }
        if let Some(session) = &update.session {
            self.session = session.clone();
        }
    }
}

/// Partial update issued by `touch`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    /// New absolute expiry
    pub expires: DateTime<Utc>,
    /// New idle-touch timestamp
    pub last_modified: Option<DateTime<Utc>>,
    /// Replacement payload, only when the cookie expiry changed
    pub session: Option<Value>,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed under the key
    Inserted,
    /// An existing record was fully replaced
    Replaced,
}
