//! In-process session backend.

use super::{RecordStream, SessionBackend};
use crate::config::WriteOptions;
use crate::error::{SessionError, SessionResult};
use crate::record::{RecordUpdate, SessionRecord, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Session records held in a process-local map.
///
/// There is no background reclamation: expired records stay until
/// [`SessionBackend::delete_expired`] runs, which the store does when
/// configured with [`AutoRemove::Interval`](crate::config::AutoRemove).
///
/// # Examples
///
/// ```
/// use keepsake_session::{MemoryBackend, Session, SessionStore};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), keepsake_session::SessionError> {
/// let store = SessionStore::<Session>::builder()
///     .backend(Arc::new(MemoryBackend::new()))
///     .build()?;
///
/// store.set("abc", &Session::new()).await?;
/// assert_eq!(store.length().await?, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, SessionRecord>>,
    expiry_index: AtomicBool,
    closed: AtomicBool,
    last_write: RwLock<Option<WriteOptions>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an expiry index was requested.
    pub fn has_expiry_index(&self) -> bool {
        self.expiry_index.load(Ordering::SeqCst)
    }

    /// Whether the backend has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stored record under `id`, ignoring expiry.
    pub fn raw(&self, id: &str) -> Option<SessionRecord> {
        self.records.read().get(id).cloned()
    }

    /// Store a record as-is, bypassing the store's transforms.
    pub fn insert_raw(&self, record: SessionRecord) {
        self.records.write().insert(record.id.clone(), record);
    }

    /// Write options seen by the most recent write.
    pub fn last_write_options(&self) -> Option<WriteOptions> {
        self.last_write.read().clone()
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.is_closed() {
            return Err(SessionError::Connection(
                "memory backend is closed".to_string(),
            ));
        }
        Ok(())
    }

    fn note_write(&self, write: &WriteOptions) {
        *self.last_write.write() = Some(write.clone());
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn ensure_expiry_index(&self) -> SessionResult<()> {
        self.ensure_open()?;
        self.expiry_index.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn find_live(&self, id: &str, now: DateTime<Utc>) -> SessionResult<Option<SessionRecord>> {
        self.ensure_open()?;
        Ok(self
            .records
            .read()
            .get(id)
            .filter(|record| record.is_live_at(now))
            .cloned())
    }

    async fn find_all_live(&self, now: DateTime<Utc>) -> SessionResult<RecordStream<'_>> {
        self.ensure_open()?;
        let live: Vec<SessionResult<SessionRecord>> = self
            .records
            .read()
            .values()
            .filter(|record| record.is_live_at(now))
            .cloned()
            .map(Ok)
            .collect();
        Ok(Box::pin(futures::stream::iter(live)))
    }

    async fn upsert(
        &self,
        record: SessionRecord,
        write: &WriteOptions,
    ) -> SessionResult<UpsertOutcome> {
        self.ensure_open()?;
        self.note_write(write);
        let previous = self.records.write().insert(record.id.clone(), record);
        Ok(match previous {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn update_live(
        &self,
        id: &str,
        now: DateTime<Utc>,
        update: RecordUpdate,
        write: &WriteOptions,
    ) -> SessionResult<u64> {
        self.ensure_open()?;
        self.note_write(write);
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(record) if record.is_live_at(now) => {
                record.apply(&update);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete(&self, id: &str, write: &WriteOptions) -> SessionResult<()> {
        self.ensure_open()?;
        self.note_write(write);
        self.records.write().remove(id);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> SessionResult<u64> {
        self.ensure_open()?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }

    async fn count(&self) -> SessionResult<u64> {
        self.ensure_open()?;
        Ok(self.records.read().len() as u64)
    }

    async fn drop_all(&self) -> SessionResult<()> {
        self.ensure_open()?;
        self.records.write().clear();
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use futures::TryStreamExt;
    use serde_json::json;

    fn record(id: &str, expires: Option<DateTime<Utc>>) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            session: json!("{}"),
            expires,
            last_modified: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_reports_insert_then_replace() {
        let backend = MemoryBackend::new();
        let write = WriteOptions::default();

        let first = backend.upsert(record("a", None), &write).await.unwrap();
        let second = backend.upsert(record("a", None), &write).await.unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Replaced);
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_records_are_hidden_but_counted() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.insert_raw(record("old", Some(now - Duration::seconds(5))));
        backend.insert_raw(record("new", Some(now + Duration::seconds(5))));

        assert!(backend.find_live("old", now).await.unwrap().is_none());
        assert!(backend.find_live("new", now).await.unwrap().is_some());

        let live: Vec<SessionRecord> = backend
            .find_all_live(now)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(backend.count().await.unwrap(), 2);

        assert_eq!(backend.delete_expired(now).await.unwrap(), 1);
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_live_skips_missing_and_expired() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let write = WriteOptions::default();
        backend.insert_raw(record("old", Some(now - Duration::seconds(1))));

        let update = RecordUpdate {
            expires: now + Duration::seconds(60),
            last_modified: Some(now),
            session: None,
        };

        assert_eq!(backend.update_live("missing", now, update.clone(), &write).await.unwrap(), 0);
        assert_eq!(backend.update_live("old", now, update.clone(), &write).await.unwrap(), 0);

        backend.insert_raw(record("live", None));
        assert_eq!(backend.update_live("live", now, update, &write).await.unwrap(), 1);
        assert_eq!(backend.raw("live").unwrap().last_modified, Some(now));
    }

    #[tokio::test]
    async fn test_closed_backend_refuses_work() {
        let backend = MemoryBackend::new();
        backend.close().await.unwrap();

        let err = backend.count().await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
