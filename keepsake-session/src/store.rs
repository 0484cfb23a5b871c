//! Session store engine.

use crate::backend::SessionBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::{AutoRemove, StoreOptions};
use crate::crypto::{AeadCipher, SessionCipher};
use crate::error::{SessionError, SessionResult};
use crate::events::{DEFAULT_EVENT_CAPACITY, EventEmitter, SessionEvent};
use crate::id::{IdTransform, IdentityId};
use crate::record::{RecordUpdate, SessionRecord, UpsertOutcome};
use crate::serializer::{self, SerializationMode, SessionSerializer};
use crate::session::{Session, SessionPayload};
use chrono::{DateTime, TimeDelta, Utc};
use futures::TryStreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{OnceCell, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[cfg(feature = "redis")]
use crate::backend::{RedisBackend, RedisConfig};

/// Where the store gets its backend from.
#[derive(Clone)]
pub enum ConnectionSource {
    /// A ready-to-use backend
    Backend(Arc<dyn SessionBackend>),
    /// Connection parameters, connected on first use
    #[cfg(feature = "redis")]
    Redis(RedisConfig),
}

/// Result of a [`SessionStore::touch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// Idle threshold not reached, nothing written
    Skipped,
    /// Expiry (and idle timestamp) written
    Refreshed,
}

struct Encryption {
    cipher: Arc<dyn SessionCipher>,
    secret: String,
}

/// Session persistence engine.
///
/// Sessions go through the id mapper, the serializer and, when a secret is
/// configured, the cipher before they reach the backend. Reads take the
/// reverse path and never return a record whose expiry has passed.
///
/// The engine does not serialize operations on the same session id;
/// concurrent writers are ordered by the backend alone.
///
/// # Examples
///
/// ```
/// use keepsake_session::{MemoryBackend, Session, SessionStore, StoreOptions};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), keepsake_session::SessionError> {
/// let store = SessionStore::<Session>::builder()
///     .backend(Arc::new(MemoryBackend::new()))
///     .options(StoreOptions::new().with_ttl(Duration::from_secs(3600)))
///     .build()?;
///
/// let mut session = Session::new();
/// session.set("user_id", 123)?;
/// store.set("sid-1", &session).await?;
///
/// if let Some(session) = store.get("sid-1").await? {
///     let user_id: Option<i32> = session.get("user_id");
///     println!("User ID: {:?}", user_id);
/// }
///
/// store.destroy("sid-1").await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionStore<P = Session> {
    options: StoreOptions,
    source: ConnectionSource,
    backend: OnceCell<Arc<dyn SessionBackend>>,
    serializer: Arc<dyn SessionSerializer<P>>,
    mode: SerializationMode,
    encryption: Option<Encryption>,
    id_transform: Arc<dyn IdTransform>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    touch_after: TimeDelta,
    events: EventEmitter<P>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<P> SessionStore<P>
where
    P: SessionPayload + Serialize + DeserializeOwned,
{
    /// Start configuring a store.
    pub fn builder() -> SessionStoreBuilder<P> {
        SessionStoreBuilder::new()
    }

    /// Store over a ready backend with the given options.
    pub fn with_backend(
        backend: Arc<dyn SessionBackend>,
        options: StoreOptions,
    ) -> SessionResult<Self> {
        Self::builder().backend(backend).options(options).build()
    }

    /// Options the store was built with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Which serializer is active.
    pub fn serialization_mode(&self) -> SerializationMode {
        self.mode
    }

    /// Whether payloads are encrypted at rest.
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Register a lifecycle listener.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent<P>> {
        self.events.subscribe()
    }

    /// Fetch a live session.
    ///
    /// Returns `Ok(None)` when no record exists or it has expired. When idle
    /// tracking is on, the record's `lastModified` is attached to the payload.
    pub async fn get(&self, sid: &str) -> SessionResult<Option<P>> {
        let backend = self.backend().await?;
        let key = self.id_transform.storage_key(sid);
        let now = self.clock.now();

        let Some(record) = backend.find_live(&key, now).await? else {
            debug!(sid = %sid, "Session not found");
            return Ok(None);
        };

        let mut session = self.decode(record.session)?;
        if self.options.tracks_idle()
            && let Some(last_modified) = record.last_modified
        {
            session.set_last_modified(Some(last_modified));
        }

        debug!(sid = %sid, "Session fetched");
        self.events.emit(SessionEvent::Get {
            sid: sid.to_string(),
        });
        Ok(Some(session))
    }

    /// Create or fully replace a session.
    pub async fn set(&self, sid: &str, payload: &P) -> SessionResult<()> {
        let backend = self.backend().await?;
        let key = self.id_transform.storage_key(sid);
        let now = self.clock.now();

        let record = SessionRecord {
            id: key,
            session: self.encode(payload)?,
            expires: Some(self.expiry_for(payload, now)?),
            last_modified: self.options.tracks_idle().then_some(now),
        };

        let outcome = backend.upsert(record, &self.options.write_options).await?;

        let sid = sid.to_string();
        match outcome {
            UpsertOutcome::Inserted => {
                debug!(sid = %sid, "Session created");
                self.events.emit(SessionEvent::Create { sid: sid.clone() });
            }
            UpsertOutcome::Replaced => {
                debug!(sid = %sid, "Session updated");
                self.events.emit(SessionEvent::Update { sid: sid.clone() });
            }
        }
        self.events.emit(SessionEvent::Set { sid });
        Ok(())
    }

    /// Extend a session's life without rewriting it.
    ///
    /// With idle tracking on, a session freshened less than `touch_after`
    /// ago is left alone and [`TouchOutcome::Skipped`] is returned. A touch
    /// that matches no live record fails with
    /// [`SessionError::TouchNotFound`].
    pub async fn touch(&self, sid: &str, payload: &P) -> SessionResult<TouchOutcome> {
        let now = self.clock.now();
        let mut update = RecordUpdate {
            expires: self.expiry_for(payload, now)?,
            last_modified: None,
            session: None,
        };

        if self.options.tracks_idle() {
            let last_modified = payload.last_modified().unwrap_or(DateTime::UNIX_EPOCH);
            if now - last_modified < self.touch_after {
                debug!(sid = %sid, "Touch skipped, session freshened recently");
                return Ok(TouchOutcome::Skipped);
            }
            update.last_modified = Some(now);
        }

        if payload.cookie_expires().is_some() {
            update.session = Some(self.encode(payload)?);
        }

        let backend = self.backend().await?;
        let key = self.id_transform.storage_key(sid);
        let matched = backend
            .update_live(&key, now, update, &self.options.write_options)
            .await?;

        if matched == 0 {
            return Err(SessionError::TouchNotFound(sid.to_string()));
        }

        debug!(sid = %sid, "Session touched");
        self.events.emit(SessionEvent::Touch {
            sid: sid.to_string(),
            session: payload.clone(),
        });
        Ok(TouchOutcome::Refreshed)
    }

    /// Every live session.
    pub async fn all(&self) -> SessionResult<Vec<P>> {
        let backend = self.backend().await?;
        let now = self.clock.now();

        let records: Vec<SessionRecord> = backend.find_all_live(now).await?.try_collect().await?;
        let sessions = records
            .into_iter()
            .map(|record| self.decode(record.session))
            .collect::<SessionResult<Vec<P>>>()?;

        debug!(count = sessions.len(), "Listed sessions");
        self.events.emit(SessionEvent::All {
            sessions: sessions.clone(),
        });
        Ok(sessions)
    }

    /// Delete a session. Missing sessions are not an error.
    pub async fn destroy(&self, sid: &str) -> SessionResult<()> {
        let backend = self.backend().await?;
        let key = self.id_transform.storage_key(sid);
        backend.delete(&key, &self.options.write_options).await?;

        debug!(sid = %sid, "Session destroyed");
        self.events.emit(SessionEvent::Destroy {
            sid: sid.to_string(),
        });
        Ok(())
    }

    /// Number of stored records, including expired ones the backend has
    /// not reclaimed yet.
    pub async fn length(&self) -> SessionResult<u64> {
        self.backend().await?.count().await
    }

    /// Remove every session at once.
    pub async fn clear(&self) -> SessionResult<()> {
        self.backend().await?.drop_all().await?;
        info!(collection = %self.options.collection_name, "Cleared all sessions");
        Ok(())
    }

    /// Stop background work and release the backend.
    ///
    /// The store is unusable afterwards. Closing twice is left to the
    /// backend and should be avoided.
    pub async fn close(&self) -> SessionResult<()> {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        match self.backend.get() {
            Some(backend) => backend.close().await,
            None => Ok(()),
        }
    }

    async fn backend(&self) -> SessionResult<&Arc<dyn SessionBackend>> {
        self.backend.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> SessionResult<Arc<dyn SessionBackend>> {
        let backend: Arc<dyn SessionBackend> = match &self.source {
            ConnectionSource::Backend(backend) => Arc::clone(backend),
            #[cfg(feature = "redis")]
            ConnectionSource::Redis(config) => {
                let mut config = config.clone();
                if let Some(db) = self.options.database {
                    config.database = Some(db);
                }
                Arc::new(RedisBackend::connect(&config, &self.options.collection_name).await?)
            }
        };

        match self.options.auto_remove {
            AutoRemove::Native => backend.ensure_expiry_index().await?,
            AutoRemove::Interval => self.start_sweeper(Arc::clone(&backend)),
            AutoRemove::Disabled => {}
        }

        info!(
            collection = %self.options.collection_name,
            auto_remove = ?self.options.auto_remove,
            "Session store ready"
        );
        Ok(backend)
    }

    fn start_sweeper(&self, backend: Arc<dyn SessionBackend>) {
        let clock = Arc::clone(&self.clock);
        let period = self.options.auto_remove_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match backend.delete_expired(clock.now()).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Removed expired sessions"),
                    Err(e) => warn!(error = %e, "Expired session sweep failed"),
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    fn expiry_for(&self, payload: &P, now: DateTime<Utc>) -> SessionResult<DateTime<Utc>> {
        if let Some(expires) = payload.cookie_expires() {
            return Ok(expires);
        }
        now.checked_add_signed(self.ttl)
            .ok_or_else(|| SessionError::Config(format!("ttl {} overflows the clock at {now}", self.ttl)))
    }

    /// Serialize, then encrypt when a secret is configured.
    fn encode(&self, payload: &P) -> SessionResult<Value> {
        let mut payload = payload.clone();
        payload.set_last_modified(None);
        let stored = self.serializer.serialize(&payload)?;

        let Some(encryption) = &self.encryption else {
            return Ok(stored);
        };
        let plaintext =
            serde_json::to_string(&stored).map_err(|e| SessionError::Serialization(e.to_string()))?;
        let ciphertext = encryption.cipher.encrypt(&encryption.secret, &plaintext)?;
        Ok(Value::String(ciphertext))
    }

    /// Decrypt when a secret is configured, then unserialize.
    fn decode(&self, stored: Value) -> SessionResult<P> {
        let stored = match &self.encryption {
            Some(encryption) => {
                let Value::String(ciphertext) = stored else {
                    return Err(SessionError::Crypto(
                        "stored payload is not ciphertext".to_string(),
                    ));
                };
                let plaintext = encryption.cipher.decrypt(&encryption.secret, &ciphertext)?;
                serde_json::from_str(&plaintext)
                    .map_err(|e| SessionError::Deserialization(e.to_string()))?
            }
            None => stored,
        };
        self.serializer.unserialize(stored)
    }
}

impl<P> Drop for SessionStore<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Builder for [`SessionStore`].
pub struct SessionStoreBuilder<P> {
    options: StoreOptions,
    backend: Option<Arc<dyn SessionBackend>>,
    #[cfg(feature = "redis")]
    redis: Option<RedisConfig>,
    #[cfg(feature = "redis")]
    redis_url: Option<String>,
    serializer: Option<Arc<dyn SessionSerializer<P>>>,
    id_transform: Option<Arc<dyn IdTransform>>,
    cipher: Option<Arc<dyn SessionCipher>>,
    clock: Option<Arc<dyn Clock>>,
    event_capacity: usize,
}

impl<P> SessionStoreBuilder<P>
where
    P: SessionPayload + Serialize + DeserializeOwned,
{
    /// Create a builder with default options and no connection source.
    pub fn new() -> Self {
        Self {
            options: StoreOptions::default(),
            backend: None,
            #[cfg(feature = "redis")]
            redis: None,
            #[cfg(feature = "redis")]
            redis_url: None,
            serializer: None,
            id_transform: None,
            cipher: None,
            clock: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Use a ready backend.
    pub fn backend(mut self, backend: Arc<dyn SessionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Connect to Redis lazily with these parameters.
    #[cfg(feature = "redis")]
    pub fn redis(mut self, config: RedisConfig) -> Self {
        self.redis = Some(config);
        self
    }

    /// Connect to Redis lazily at `url`.
    #[cfg(feature = "redis")]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Replace all options.
    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a custom serializer instead of the built-in ones.
    pub fn serializer(mut self, serializer: Arc<dyn SessionSerializer<P>>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Map session ids to storage keys.
    pub fn id_transform(mut self, transform: impl IdTransform + 'static) -> Self {
        self.id_transform = Some(Arc::new(transform));
        self
    }

    /// Use a custom cipher. Only consulted when a secret is configured.
    pub fn cipher(mut self, cipher: Arc<dyn SessionCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Use a custom time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Buffered events per listener.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate everything and build the store.
    ///
    /// Exactly one connection source must have been given.
    pub fn build(self) -> SessionResult<SessionStore<P>> {
        self.options.validate()?;
        let source = self.connection_source()?;

        let ttl = TimeDelta::from_std(self.options.ttl)
            .map_err(|e| SessionError::Config(format!("ttl out of range: {e}")))?;
        let touch_after = TimeDelta::from_std(self.options.touch_after)
            .map_err(|e| SessionError::Config(format!("touch_after out of range: {e}")))?;

        let encryption = match &self.options.crypto.secret {
            Some(secret) => {
                let cipher: Arc<dyn SessionCipher> = match self.cipher {
                    Some(cipher) => cipher,
                    None => Arc::new(AeadCipher::new(&self.options.crypto)?),
                };
                Some(Encryption {
                    cipher,
                    secret: secret.clone(),
                })
            }
            None => None,
        };

        let (serializer, mode) = serializer::select(self.serializer, self.options.stringify);

        Ok(SessionStore {
            source,
            backend: OnceCell::new(),
            serializer,
            mode,
            encryption,
            id_transform: self.id_transform.unwrap_or_else(|| Arc::new(IdentityId)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            ttl,
            touch_after,
            events: EventEmitter::new(self.event_capacity),
            sweeper: Mutex::new(None),
            options: self.options,
        })
    }

    #[cfg(feature = "redis")]
    fn connection_source(&self) -> SessionResult<ConnectionSource> {
        let given = usize::from(self.backend.is_some())
            + usize::from(self.redis.is_some())
            + usize::from(self.redis_url.is_some());
        if given != 1 {
            return Err(SessionError::Config(format!(
                "exactly one connection source is required, got {given}"
            )));
        }

        if let Some(backend) = &self.backend {
            return Ok(ConnectionSource::Backend(Arc::clone(backend)));
        }
        if let Some(config) = &self.redis {
            return Ok(ConnectionSource::Redis(config.clone()));
        }
        match &self.redis_url {
            Some(url) => Ok(ConnectionSource::Redis(RedisConfig::new(url.clone())?)),
            None => Err(SessionError::Config(
                "no connection source configured".to_string(),
            )),
        }
    }

    #[cfg(not(feature = "redis"))]
    fn connection_source(&self) -> SessionResult<ConnectionSource> {
        match &self.backend {
            Some(backend) => Ok(ConnectionSource::Backend(Arc::clone(backend))),
            None => Err(SessionError::Config(
                "exactly one connection source is required, got 0".to_string(),
            )),
        }
    }
}

impl<P> Default for SessionStoreBuilder<P>
where
    P: SessionPayload + Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}
