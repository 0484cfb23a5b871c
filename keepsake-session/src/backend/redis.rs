//! Redis session backend.
//!
//! Each record is a Redis hash under `"{collection}:{id}"`:
//!
//! | field | content |
//! |---|---|
//! | `session` | stored payload as JSON text |
//! | `expires` | epoch milliseconds, absent when the record never expires |
//! | `lastModified` | epoch milliseconds, idle tracking only |
//!
//! Upserts and partial updates run as Lua scripts so each one is atomic.
//! Once [`SessionBackend::ensure_expiry_index`] has been called, writes also
//! set `PEXPIREAT` so Redis reclaims expired records on its own.

use super::{RecordStream, SessionBackend};
use crate::config::WriteOptions;
use crate::error::{SessionError, SessionResult};
use crate::record::{RecordUpdate, SessionRecord, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const SCAN_BATCH: usize = 100;

const FIELD_SESSION: &str = "session";
const FIELD_EXPIRES: &str = "expires";
const FIELD_LAST_MODIFIED: &str = "lastModified";

// KEYS[1] key; ARGV session, expires|'', lastModified|'', '1' to set PEXPIREAT
const UPSERT_SCRIPT: &str = r#"
local existed = redis.call('EXISTS', KEYS[1])
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], 'session', ARGV[1])
if ARGV[2] ~= '' then
  redis.call('HSET', KEYS[1], 'expires', ARGV[2])
  if ARGV[4] == '1' then
    redis.call('PEXPIREAT', KEYS[1], ARGV[2])
  end
end
if ARGV[3] ~= '' then
  redis.call('HSET', KEYS[1], 'lastModified', ARGV[3])
end
return existed
"#;

// KEYS[1] key; ARGV now, expires, lastModified|'', session|'', '1' to set PEXPIREAT
const UPDATE_LIVE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local expires = redis.call('HGET', KEYS[1], 'expires')
if expires and tonumber(expires) <= tonumber(ARGV[1]) then
  return 0
end
redis.call('HSET', KEYS[1], 'expires', ARGV[2])
if ARGV[3] ~= '' then
  redis.call('HSET', KEYS[1], 'lastModified', ARGV[3])
end
if ARGV[4] ~= '' then
  redis.call('HSET', KEYS[1], 'session', ARGV[4])
end
if ARGV[5] == '1' then
  redis.call('PEXPIREAT', KEYS[1], ARGV[2])
end
return 1
"#;

// KEYS[1] key; ARGV now
const DELETE_EXPIRED_SCRIPT: &str = r#"
local expires = redis.call('HGET', KEYS[1], 'expires')
if expires and tonumber(expires) <= tonumber(ARGV[1]) then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis connection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port or rediss://host:port for TLS).
    pub url: String,
    /// Database number (0-15).
    pub database: Option<u8>,
    /// Username for Redis 6+ ACL.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Connection timeout.
    #[serde(with = "crate::config::duration_secs")]
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            database: None,
            username: None,
            password: None,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create a configuration for `url`, validating the scheme.
    pub fn new(url: impl Into<String>) -> SessionResult<Self> {
        let url = url.into();
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(SessionError::InvalidUrl(
                "Redis URL must start with redis:// or rediss://".to_string(),
            ));
        }
        Ok(Self {
            url,
            ..Default::default()
        })
    }

    /// Create a builder.
    pub fn builder() -> RedisConfigBuilder {
        RedisConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> RedisConfigBuilder {
        let mut builder = RedisConfigBuilder::new();

        if let Ok(url) = std::env::var("REDIS_URL") {
            builder = builder.url(url);
        }

        if let Ok(db) = std::env::var("REDIS_DATABASE")
            && let Ok(db_num) = db.parse() {
                builder = builder.database(db_num);
            }

        if let Ok(username) = std::env::var("REDIS_USERNAME") {
            builder = builder.username(username);
        }

        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            builder = builder.password(password);
        }

        if let Ok(timeout) = std::env::var("REDIS_CONNECTION_TIMEOUT")
            && let Ok(secs) = timeout.parse() {
                builder = builder.connection_timeout(Duration::from_secs(secs));
            }

        builder
    }

    /// Get the full Redis URL with auth and database.
    pub fn connection_url(&self) -> String {
        let (scheme, rest) = match self.url.split_once("://") {
            Some(parts) => parts,
            None => ("redis", self.url.as_str()),
        };

        let authority = rest.split('/').next().unwrap_or(rest);
        let authority = match (&self.username, &self.password) {
            (Some(username), Some(password)) => format!("{username}:{password}@{authority}"),
            (None, Some(password)) => format!(":{password}@{authority}"),
            _ => authority.to_string(),
        };

        match self.database {
            Some(db) => format!("{scheme}://{authority}/{db}"),
            None => match rest.split_once('/') {
                Some((_, path)) if !path.is_empty() => format!("{scheme}://{authority}/{path}"),
                _ => format!("{scheme}://{authority}"),
            },
        }
    }
}

/// Builder for Redis configuration.
#[derive(Default)]
pub struct RedisConfigBuilder {
    config: RedisConfig,
}

impl RedisConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RedisConfig::default(),
        }
    }

    /// Set the Redis URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = url.into();
        self
    }

    /// Set the database number.
    pub fn database(mut self, db: u8) -> Self {
        self.config.database = Some(db);
        self
    }

    /// Set the username (Redis 6+ ACL).
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RedisConfig {
        self.config
    }
}

/// Redis-backed session records.
///
/// # Examples
///
/// ```no_run
/// use keepsake_session::*;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), SessionError> {
///     let store = SessionStore::<Session>::builder()
///         .url("redis://localhost:6379")
///         .options(
///             StoreOptions::new()
///                 .with_collection("myapp_session")
///                 .with_ttl(Duration::from_secs(3600)),
///         )
///         .build()?;
///
///     store.set("sid-1", &Session::new().with("user_id", 123)?).await?;
///     store.close().await?;
///     Ok(())
/// }
/// ```
pub struct RedisBackend {
    conn: Mutex<Option<ConnectionManager>>,
    collection: String,
    upsert_script: redis::Script,
    update_script: redis::Script,
    sweep_script: redis::Script,
    expiry_index: AtomicBool,
}

impl RedisBackend {
    /// Connect to Redis and keep records under `collection`.
    pub async fn connect(config: &RedisConfig, collection: &str) -> SessionResult<Self> {
        let url = config.connection_url();
        let client =
            redis::Client::open(url.as_str()).map_err(|e| SessionError::Connection(e.to_string()))?;

        let conn = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                SessionError::Connection(format!(
                    "timed out after {:?} connecting to {}",
                    config.connection_timeout, config.url
                ))
            })?
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        info!(url = %config.url, collection = %collection, "Redis session backend connected");

        Ok(Self::from_connection(conn, collection))
    }

    /// Wrap an established connection.
    pub fn from_connection(conn: ConnectionManager, collection: &str) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            collection: collection.to_string(),
            upsert_script: redis::Script::new(UPSERT_SCRIPT),
            update_script: redis::Script::new(UPDATE_LIVE_SCRIPT),
            sweep_script: redis::Script::new(DELETE_EXPIRED_SCRIPT),
            expiry_index: AtomicBool::new(false),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{}", self.collection, id)
    }

    fn pattern(&self) -> String {
        scan_pattern(&self.collection)
    }

    fn connection(&self) -> SessionResult<ConnectionManager> {
        self.conn
            .lock()
            .clone()
            .ok_or_else(|| SessionError::Connection("redis backend is closed".to_string()))
    }

    fn native_expiry(&self) -> &'static str {
        if self.expiry_index.load(Ordering::SeqCst) {
            "1"
        } else {
            ""
        }
    }

    async fn scan_keys(&self) -> SessionResult<Vec<String>> {
        let mut conn = self.connection()?;
        let pattern = self.pattern();
        let mut seen = HashSet::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(seen.into_iter().collect())
    }

    async fn acknowledge(&self, conn: &mut ConnectionManager, write: &WriteOptions) -> SessionResult<()> {
        let Some(replicas) = write.replicas.filter(|_| write.requires_ack()) else {
            return Ok(());
        };
        let timeout_ms = write
            .timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        let acked: i64 = redis::cmd("WAIT")
            .arg(replicas)
            .arg(timeout_ms)
            .query_async(conn)
            .await?;

        if acked < i64::from(replicas) {
            return Err(SessionError::Connection(format!(
                "write acknowledged by {acked} of {replicas} replicas"
            )));
        }
        Ok(())
    }
}

/// Rebuild a record from its hash fields. An empty hash means no record.
fn decode_record(
    id: &str,
    mut fields: HashMap<String, String>,
) -> SessionResult<Option<SessionRecord>> {
    let Some(session) = fields.remove(FIELD_SESSION) else {
        return Ok(None);
    };
    let session = serde_json::from_str(&session)
        .map_err(|e| SessionError::Deserialization(format!("record {id}: {e}")))?;

    Ok(Some(SessionRecord {
        id: id.to_string(),
        session,
        expires: parse_millis(id, fields.get(FIELD_EXPIRES))?,
        last_modified: parse_millis(id, fields.get(FIELD_LAST_MODIFIED))?,
    }))
}

fn parse_millis(id: &str, raw: Option<&String>) -> SessionResult<Option<DateTime<Utc>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let millis: i64 = raw
        .parse()
        .map_err(|_| SessionError::Deserialization(format!("record {id}: bad timestamp {raw}")))?;
    DateTime::from_timestamp_millis(millis)
        .map(Some)
        .ok_or_else(|| SessionError::Deserialization(format!("record {id}: timestamp out of range")))
}

/// SCAN pattern matching exactly the keys of `collection`.
fn scan_pattern(collection: &str) -> String {
    let mut pattern = String::with_capacity(collection.len() + 2);
    for c in collection.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str(":*");
    pattern
}

fn millis_arg(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.timestamp_millis().to_string()).unwrap_or_default()
}

struct ScanState {
    conn: ConnectionManager,
    pattern: String,
    prefix_len: usize,
    now: DateTime<Utc>,
    cursor: u64,
    done: bool,
    pending: VecDeque<String>,
    seen: HashSet<String>,
}

/// Pull the next live record, scanning further when the buffer runs dry.
async fn next_live(mut st: ScanState) -> SessionResult<Option<(SessionRecord, ScanState)>> {
    loop {
        if let Some(key) = st.pending.pop_front() {
            let fields: HashMap<String, String> = st.conn.hgetall(&key).await?;
            let id = key.get(st.prefix_len..).unwrap_or_default().to_string();
            match decode_record(&id, fields)? {
                Some(record) if record.is_live_at(st.now) => return Ok(Some((record, st))),
                _ => continue,
            }
        }
        if st.done {
            return Ok(None);
        }

        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(st.cursor)
            .arg("MATCH")
            .arg(&st.pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(&mut st.conn)
            .await?;
        st.cursor = next;
        st.done = next == 0;
        for key in keys {
            if st.seen.insert(key.clone()) {
                st.pending.push_back(key);
            }
        }
    }
}

#[async_trait]
impl SessionBackend for RedisBackend {
    async fn ensure_expiry_index(&self) -> SessionResult<()> {
        self.connection()?;
        self.expiry_index.store(true, Ordering::SeqCst);
        debug!(collection = %self.collection, "Native expiry enabled");
        Ok(())
    }

    async fn find_live(&self, id: &str, now: DateTime<Utc>) -> SessionResult<Option<SessionRecord>> {
        let mut conn = self.connection()?;
        let fields: HashMap<String, String> = conn.hgetall(self.key(id)).await?;
        Ok(decode_record(id, fields)?.filter(|record| record.is_live_at(now)))
    }

    async fn find_all_live(&self, now: DateTime<Utc>) -> SessionResult<RecordStream<'_>> {
        let state = ScanState {
            conn: self.connection()?,
            pattern: self.pattern(),
            prefix_len: self.collection.len() + 1,
            now,
            cursor: 0,
            done: false,
            pending: VecDeque::new(),
            seen: HashSet::new(),
        };

        let stream = futures::stream::try_unfold(state, next_live);
        Ok(Box::pin(stream))
    }

    async fn upsert(
        &self,
        record: SessionRecord,
        write: &WriteOptions,
    ) -> SessionResult<UpsertOutcome> {
        let mut conn = self.connection()?;
        let session = serde_json::to_string(&record.session)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;

        let existed: i64 = self
            .upsert_script
            .key(self.key(&record.id))
            .arg(session)
            .arg(millis_arg(record.expires))
            .arg(millis_arg(record.last_modified))
            .arg(self.native_expiry())
            .invoke_async(&mut conn)
            .await?;

        self.acknowledge(&mut conn, write).await?;

        Ok(if existed == 1 {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn update_live(
        &self,
        id: &str,
        now: DateTime<Utc>,
        update: RecordUpdate,
        write: &WriteOptions,
    ) -> SessionResult<u64> {
        let mut conn = self.connection()?;
        let session = match &update.session {
            Some(session) => serde_json::to_string(session)
                .map_err(|e| SessionError::Serialization(e.to_string()))?,
            None => String::new(),
        };

        let matched: i64 = self
            .update_script
            .key(self.key(id))
            .arg(now.timestamp_millis())
            .arg(update.expires.timestamp_millis())
            .arg(millis_arg(update.last_modified))
            .arg(session)
            .arg(self.native_expiry())
            .invoke_async(&mut conn)
            .await?;

        if matched > 0 {
            self.acknowledge(&mut conn, write).await?;
        }
        Ok(matched.max(0) as u64)
    }

    async fn delete(&self, id: &str, write: &WriteOptions) -> SessionResult<()> {
        let mut conn = self.connection()?;
        let _: () = conn.del(self.key(id)).await?;
        self.acknowledge(&mut conn, write).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> SessionResult<u64> {
        let keys = self.scan_keys().await?;
        let mut conn = self.connection()?;
        let mut removed = 0;

        // Expiry check and delete are atomic per key
        for key in keys {
            let deleted: u64 = self
                .sweep_script
                .key(&key)
                .arg(now.timestamp_millis())
                .invoke_async(&mut conn)
                .await?;
            removed += deleted;
        }
        Ok(removed)
    }

    async fn count(&self) -> SessionResult<u64> {
        Ok(self.scan_keys().await?.len() as u64)
    }

    /// Deletes in batches of scanned keys, so records written while the
    /// drop runs may survive it.
    async fn drop_all(&self) -> SessionResult<()> {
        let keys = self.scan_keys().await?;
        let mut conn = self.connection()?;

        for chunk in keys.chunks(SCAN_BATCH) {
            let _: () = conn.del(chunk).await?;
        }

        debug!(collection = %self.collection, removed = keys.len(), "Dropped session collection");
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        if self.conn.lock().take().is_some() {
            info!(collection = %self.collection, "Redis session backend closed");
        }
        Ok(())
    }
}
