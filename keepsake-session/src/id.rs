//! Session id to storage key mapping.

/// Maps a caller-visible session id to the key used in the backend.
///
/// Mappings must be deterministic and injective. Nothing checks this at
/// runtime; two ids sharing a key would share a record.
pub trait IdTransform: Send + Sync {
    /// Storage key for `sid`.
    fn storage_key(&self, sid: &str) -> String;
}

/// Uses the session id unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityId;

impl IdTransform for IdentityId {
    fn storage_key(&self, sid: &str) -> String {
        sid.to_string()
    }
}

/// Prefixes the session id with a namespace, `"{prefix}:{sid}"`.
#[derive(Debug, Clone)]
pub struct PrefixedId {
    prefix: String,
}

impl PrefixedId {
    /// Create a prefixing mapper.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl IdTransform for PrefixedId {
    fn storage_key(&self, sid: &str) -> String {
        format!("{}:{}", self.prefix, sid)
    }
}

impl<F> IdTransform for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn storage_key(&self, sid: &str) -> String {
        self(sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert_eq!(IdentityId.storage_key("abc"), "abc");
    }

    #[test]
    fn test_prefixed() {
        let mapper = PrefixedId::new("myapp");
        assert_eq!(mapper.storage_key("abc"), "myapp:abc");
    }

    #[test]
    fn test_closure() {
        let mapper = |sid: &str| sid.to_uppercase();
        assert_eq!(mapper.storage_key("abc"), "ABC");
    }
}
