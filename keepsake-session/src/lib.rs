//! Session persistence with expiry, idle touch, encryption and pluggable
//! serialization.
//!
//! A [`SessionStore`] keeps one record per session id in a
//! [`SessionBackend`]. Records carry an absolute expiry taken from the
//! session cookie or from the configured TTL. Expired records are never
//! returned, even before the backend reclaims them.
//!
//! # Features
//!
//! - `redis` - Redis backend (enabled by default)
//!
//! # Expiry reclamation
//!
//! - [`AutoRemove::Native`] - the backend expires records itself
//! - [`AutoRemove::Interval`] - a background task sweeps expired records
//! - [`AutoRemove::Disabled`] - expired records stay until overwritten
//!
//! # Examples
//!
//! ## In-memory Session Store
//!
//! ```no_run
//! use keepsake_session::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let store = SessionStore::<Session>::builder()
//!         .backend(Arc::new(MemoryBackend::new()))
//!         .options(
//!             StoreOptions::new()
//!                 .with_collection("myapp_session")
//!                 .with_ttl(Duration::from_secs(3600))
//!                 .with_touch_after(Duration::from_secs(60)),
//!         )
//!         .build()?;
//!
//!     let mut session = Session::new();
//!     session.set("user_id", 123)?;
//!     store.set("sid-1", &session).await?;
//!
//!     if let Some(session) = store.get("sid-1").await? {
//!         store.touch("sid-1", &session).await?;
//!     }
//!
//!     store.destroy("sid-1").await?;
//!     store.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! See `RedisBackend` (feature `redis`) for
//! the Redis-backed setup.
//!
//! ## Encrypted payloads
//!
//! ```no_run
//! use keepsake_session::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), SessionError> {
//! let store = SessionStore::<Session>::builder()
//!     .backend(Arc::new(MemoryBackend::new()))
//!     .options(StoreOptions::new().with_secret("squirrel"))
//!     .id_transform(PrefixedId::new("app"))
//!     .build()?;
//!
//! store.set("sid-1", &Session::new().with("cart", vec![1, 2, 3])?).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod id;
pub mod record;
pub mod serializer;
pub mod session;
pub mod store;

pub use backend::{MemoryBackend, RecordStream, SessionBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AutoRemove, CipherAlgorithm, CryptoOptions, HashAlgorithm, StoreOptions, TextEncoding,
    WriteOptions,
};
pub use crypto::{AeadCipher, SessionCipher};
pub use error::{SessionError, SessionResult};
pub use events::{EventEmitter, SessionEvent};
pub use id::{IdTransform, IdentityId, PrefixedId};
pub use record::{RecordUpdate, SessionRecord, UpsertOutcome};
pub use serializer::{
    FnSerializer, JsonStringSerializer, SerializationMode, SessionSerializer,
    StructuralSerializer,
};
pub use session::{Session, SessionCookie, SessionPayload};
pub use store::{ConnectionSource, SessionStore, SessionStoreBuilder, TouchOutcome};

#[cfg(feature = "redis")]
pub use backend::{RedisBackend, RedisConfig, RedisConfigBuilder};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{MemoryBackend, SessionBackend};
    pub use crate::config::{AutoRemove, CryptoOptions, StoreOptions};
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::events::SessionEvent;
    pub use crate::id::PrefixedId;
    pub use crate::session::{Session, SessionCookie, SessionPayload};
    pub use crate::store::{SessionStore, SessionStoreBuilder, TouchOutcome};

    #[cfg(feature = "redis")]
    pub use crate::backend::{RedisBackend, RedisConfig};
}
