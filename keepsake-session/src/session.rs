//! Session payload model.

use crate::error::{SessionError, SessionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What the store needs to know about a payload.
///
/// The store reads the cookie's explicit expiry to compute the record
/// expiry, and owns the `lastModified` slot used by idle touch.
pub trait SessionPayload: Clone + Send + Sync + 'static {
    /// Absolute expiry carried by the session cookie, if any.
    fn cookie_expires(&self) -> Option<DateTime<Utc>>;

    /// Last time the store freshened this session.
    fn last_modified(&self) -> Option<DateTime<Utc>>;

    /// Attach or strip the store-owned `lastModified` value.
    fn set_last_modified(&mut self, at: Option<DateTime<Utc>>);
}

/// Cookie settings travelling with a session.
///
/// Only this plain form is persisted. Anything richer the HTTP layer keeps
/// in memory has to be folded into these fields before `set`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionCookie {
    /// Max age in milliseconds the cookie was issued with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_max_age: Option<i64>,
    /// Absolute expiry, `None` for browser-session cookies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl SessionCookie {
    /// Cookie with an explicit absolute expiry.
    pub fn expiring_at(expires: DateTime<Utc>) -> Self {
        Self {
            expires: Some(expires),
            ..Default::default()
        }
    }
}

/// Default session payload.
///
/// Application values live in a flat key-value map next to the cookie.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Cookie settings
    #[serde(default)]
    pub cookie: SessionCookie,
    /// Store-owned idle-touch timestamp
    #[serde(
        rename = "lastModified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<DateTime<Utc>>,
    /// Session data as key-value pairs
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Session {
    /// Create an empty session with a browser-session cookie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty session with the given cookie.
    pub fn with_cookie(cookie: SessionCookie) -> Self {
        Self {
            cookie,
            ..Default::default()
        }
    }

    /// Get a value from the session data.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a value in the session data.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        let json_value =
            serde_json::to_value(value).map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.data.insert(key.to_string(), json_value);
        Ok(())
    }

    /// Builder-style variant of [`Session::set`].
    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> SessionResult<Self> {
        self.set(key, value)?;
        Ok(self)
    }

    /// Remove a value from the session data.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check if a key exists in the session data.
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Get all keys in the session data.
    pub fn keys(&self) -> Vec<&String> {
        self.data.keys().collect()
    }

    /// Clear all session data. The cookie is kept.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl SessionPayload for Session {
    fn cookie_expires(&self) -> Option<DateTime<Utc>> {
        self.cookie.expires
    }

    fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    fn set_last_modified(&mut self, at: Option<DateTime<Utc>>) {
        self.last_modified = at;
    }
}
