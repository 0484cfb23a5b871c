//! Session store configuration.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default session lifetime when the cookie carries no expiry: 14 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Default period of the interval sweeper: 10 minutes.
pub const DEFAULT_AUTO_REMOVE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Longest accepted `ttl` and `touch_after`: 100 years.
pub const MAX_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// How expired records get physically removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoRemove {
    /// Ask the backend for its own expiry-based reclamation
    #[default]
    Native,
    /// Run a periodic sweep from the store
    Interval,
    /// Leave expired records in place; reads still filter them out
    Disabled,
}

impl FromStr for AutoRemove {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "interval" => Ok(Self::Interval),
            "disabled" | "off" => Ok(Self::Disabled),
            other => Err(SessionError::Config(format!(
                "unknown auto-remove mode '{other}'"
            ))),
        }
    }
}

/// Authenticated cipher used for stored payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CipherAlgorithm {
    /// AES-128 in GCM mode
    Aes128Gcm,
    /// AES-256 in GCM mode
    #[default]
    Aes256Gcm,
}

impl CipherAlgorithm {
    /// Key length the cipher requires, in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm => 32,
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128Gcm => write!(f, "aes-128-gcm"),
            Self::Aes256Gcm => write!(f, "aes-256-gcm"),
        }
    }
}

/// Hash used for key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    #[default]
    Sha512,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Text encoding of ciphertext fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    #[default]
    Hex,
    Base64,
}

/// Payload encryption settings.
///
/// Encryption is active only when `secret` is set.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoOptions {
    /// Secret the per-message keys are derived from
    pub secret: Option<String>,
    pub algorithm: CipherAlgorithm,
    pub hashing: HashAlgorithm,
    pub encoding: TextEncoding,
    /// Key length in bytes, must match the algorithm
    pub key_size: usize,
    /// Nonce length in bytes (12 or 16)
    pub iv_size: usize,
    /// Authentication tag length in bytes
    pub at_size: usize,
}

impl Default for CryptoOptions {
    fn default() -> Self {
        Self {
            secret: None,
            algorithm: CipherAlgorithm::default(),
            hashing: HashAlgorithm::default(),
            encoding: TextEncoding::default(),
            key_size: 32,
            iv_size: 16,
            at_size: 16,
        }
    }
}

impl CryptoOptions {
    /// Default cipher settings with the given secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Whether payloads get encrypted.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }
}

impl fmt::Debug for CryptoOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoOptions")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("algorithm", &self.algorithm)
            .field("hashing", &self.hashing)
            .field("encoding", &self.encoding)
            .field("key_size", &self.key_size)
            .field("iv_size", &self.iv_size)
            .field("at_size", &self.at_size)
            .finish()
    }
}

/// Write acknowledgement settings forwarded to every backend write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Replicas that must acknowledge a write before it returns
    pub replicas: Option<u32>,
    /// Upper bound on the acknowledgement wait
    #[serde(with = "duration_millis_opt")]
    pub timeout: Option<Duration>,
}

impl WriteOptions {
    /// Whether any acknowledgement was requested.
    pub fn requires_ack(&self) -> bool {
        self.replicas.is_some_and(|n| n > 0)
    }
}

/// Session store options.
///
/// Every field has a documented default; the store never sees a
/// partially populated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Collection (key namespace) holding the records, without `:`
    pub collection_name: String,
    /// Database selector, backend default when `None`
    pub database: Option<u8>,
    /// Lifetime used when the cookie has no explicit expiry
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Removal strategy for expired records
    pub auto_remove: AutoRemove,
    /// Sweep period for [`AutoRemove::Interval`]
    #[serde(with = "duration_secs")]
    pub auto_remove_interval: Duration,
    /// Idle-touch threshold; zero disables idle tracking
    #[serde(with = "duration_secs")]
    pub touch_after: Duration,
    /// JSON text serialization when true, plain documents when false
    pub stringify: bool,
    /// Payload encryption
    pub crypto: CryptoOptions,
    /// Forwarded to backend writes
    pub write_options: WriteOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            collection_name: "sessions".to_string(),
            database: None,
            ttl: DEFAULT_TTL,
            auto_remove: AutoRemove::Native,
            auto_remove_interval: DEFAULT_AUTO_REMOVE_INTERVAL,
            touch_after: Duration::ZERO,
            stringify: true,
            crypto: CryptoOptions::default(),
            write_options: WriteOptions::default(),
        }
    }
}

impl StoreOptions {
    /// Create options with every default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from `KEEPSAKE_SESSION_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(name) = std::env::var("KEEPSAKE_SESSION_COLLECTION") {
            options.collection_name = name;
        }

        if let Ok(db) = std::env::var("KEEPSAKE_SESSION_DATABASE")
            && let Ok(db) = db.parse() {
                options.database = Some(db);
            }

        if let Ok(ttl) = std::env::var("KEEPSAKE_SESSION_TTL")
            && let Ok(secs) = ttl.parse() {
                options.ttl = Duration::from_secs(secs);
            }

        if let Ok(touch_after) = std::env::var("KEEPSAKE_SESSION_TOUCH_AFTER")
            && let Ok(secs) = touch_after.parse() {
                options.touch_after = Duration::from_secs(secs);
            }

        if let Ok(stringify) = std::env::var("KEEPSAKE_SESSION_STRINGIFY")
            && let Ok(stringify) = stringify.parse() {
                options.stringify = stringify;
            }

        if let Ok(mode) = std::env::var("KEEPSAKE_SESSION_AUTO_REMOVE")
            && let Ok(mode) = mode.parse() {
                options.auto_remove = mode;
            }

        if let Ok(interval) = std::env::var("KEEPSAKE_SESSION_AUTO_REMOVE_INTERVAL")
            && let Ok(secs) = interval.parse() {
                options.auto_remove_interval = Duration::from_secs(secs);
            }

        if let Ok(secret) = std::env::var("KEEPSAKE_SESSION_SECRET")
            && !secret.is_empty() {
                options.crypto.secret = Some(secret);
            }

        options
    }

    /// Set the collection name.
    pub fn with_collection(mut self, name: impl Into<String>) -> Self {
        self.collection_name = name.into();
        self
    }

    /// Set the database selector.
    pub fn with_database(mut self, db: u8) -> Self {
        self.database = Some(db);
        self
    }

    /// Set the default session TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the removal strategy for expired records.
    pub fn with_auto_remove(mut self, mode: AutoRemove) -> Self {
        self.auto_remove = mode;
        self
    }

    /// Set the sweep period used by [`AutoRemove::Interval`].
    pub fn with_auto_remove_interval(mut self, interval: Duration) -> Self {
        self.auto_remove_interval = interval;
        self
    }

    /// Set the idle-touch threshold.
    pub fn with_touch_after(mut self, touch_after: Duration) -> Self {
        self.touch_after = touch_after;
        self
    }

    /// Choose JSON text or plain document serialization.
    pub fn with_stringify(mut self, stringify: bool) -> Self {
        self.stringify = stringify;
        self
    }

    /// Set encryption options.
    pub fn with_crypto(mut self, crypto: CryptoOptions) -> Self {
        self.crypto = crypto;
        self
    }

    /// Enable encryption with default cipher settings.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.crypto.secret = Some(secret.into());
        self
    }

    /// Set write options forwarded to the backend.
    pub fn with_write_options(mut self, write_options: WriteOptions) -> Self {
        self.write_options = write_options;
        self
    }

    /// Whether idle-touch tracking is on.
    pub fn tracks_idle(&self) -> bool {
        !self.touch_after.is_zero()
    }

    /// Check values the store cannot work with.
    pub fn validate(&self) -> SessionResult<()> {
        if self.collection_name.is_empty() {
            return Err(SessionError::Config(
                "collection name must not be empty".to_string(),
            ));
        }
        if self.collection_name.contains(':') {
            return Err(SessionError::Config(format!(
                "collection name must not contain ':', got {:?}",
                self.collection_name
            )));
        }
        if self.ttl.is_zero() {
            return Err(SessionError::Config("ttl must be positive".to_string()));
        }
        if self.ttl > MAX_LIFETIME {
            return Err(SessionError::Config(format!(
                "ttl must be at most {}s, got {}s",
                MAX_LIFETIME.as_secs(),
                self.ttl.as_secs()
            )));
        }
        if self.touch_after > MAX_LIFETIME {
            return Err(SessionError::Config(format!(
                "touch_after must be at most {}s, got {}s",
                MAX_LIFETIME.as_secs(),
                self.touch_after.as_secs()
            )));
        }
        if self.auto_remove == AutoRemove::Interval && self.auto_remove_interval.is_zero() {
            return Err(SessionError::Config(
                "auto-remove interval must be positive".to_string(),
            ));
        }
        if let Some(secret) = &self.crypto.secret
            && secret.is_empty() {
                return Err(SessionError::Config(
                    "crypto secret must not be empty".to_string(),
                ));
            }
        Ok(())
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
