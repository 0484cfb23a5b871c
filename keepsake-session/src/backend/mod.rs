//! Backing store interface and implementations.

use crate::config::WriteOptions;
use crate::error::SessionResult;
use crate::record::{RecordUpdate, SessionRecord, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryBackend;

#[cfg(feature = "redis")]
pub use self::redis::{RedisBackend, RedisConfig, RedisConfigBuilder};

/// Stream of records produced by [`SessionBackend::find_all_live`].
pub type RecordStream<'a> = BoxStream<'a, SessionResult<SessionRecord>>;

/// Durable keyed storage for session records.
///
/// A single `upsert` or `update_live` must be atomic per key. Nothing
/// orders two concurrent writes to the same key beyond that.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Request expiry-based reclamation of records whose `expires` passed.
    async fn ensure_expiry_index(&self) -> SessionResult<()>;

    /// The record stored under `id`, if it is live at `now`.
    async fn find_live(&self, id: &str, now: DateTime<Utc>) -> SessionResult<Option<SessionRecord>>;

    /// Every record live at `now`.
    async fn find_all_live(&self, now: DateTime<Utc>) -> SessionResult<RecordStream<'_>>;

    /// Insert the record, or fully replace the one under the same id.
    async fn upsert(
        &self,
        record: SessionRecord,
        write: &WriteOptions,
    ) -> SessionResult<UpsertOutcome>;

    /// Partially update the record under `id` if it is live at `now`.
    ///
    /// Returns the number of matched records (0 or 1).
    async fn update_live(
        &self,
        id: &str,
        now: DateTime<Utc>,
        update: RecordUpdate,
        write: &WriteOptions,
    ) -> SessionResult<u64>;

    /// Delete the record under `id`. Absent records are not an error.
    async fn delete(&self, id: &str, write: &WriteOptions) -> SessionResult<()>;

    /// Physically remove records expired at `now`, returning how many.
    async fn delete_expired(&self, now: DateTime<Utc>) -> SessionResult<u64>;

    /// Number of stored records, expired or not.
    async fn count(&self) -> SessionResult<u64>;

    /// Remove every record at once.
    async fn drop_all(&self) -> SessionResult<()>;

    /// Release the connection. Later calls fail with a connection error.
    async fn close(&self) -> SessionResult<()>;
}
