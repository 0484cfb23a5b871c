//! Payload serialization transforms.
//!
//! Exactly one transform is active per store. The store picks it at
//! construction:
//!
//! 1. a caller-supplied [`SessionSerializer`],
//! 2. [`StructuralSerializer`] when `stringify` is off,
//! 3. [`JsonStringSerializer`] otherwise.

use crate::error::{SessionError, SessionResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Converts a payload to and from its stored form.
///
/// Implementations must round-trip: `unserialize(serialize(p))` equals `p`.
pub trait SessionSerializer<P>: Send + Sync {
    /// Payload to stored form. Must not mutate the payload.
    fn serialize(&self, payload: &P) -> SessionResult<Value>;

    /// Stored form back to a payload.
    fn unserialize(&self, stored: Value) -> SessionResult<P>;
}

/// Stores the payload as JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStringSerializer;

impl<P> SessionSerializer<P> for JsonStringSerializer
where
    P: Serialize + DeserializeOwned,
{
    fn serialize(&self, payload: &P) -> SessionResult<Value> {
        serde_json::to_string(payload)
            .map(Value::String)
            .map_err(|e| SessionError::Serialization(e.to_string()))
    }

    fn unserialize(&self, stored: Value) -> SessionResult<P> {
        match stored {
            Value::String(text) => serde_json::from_str(&text)
                .map_err(|e| SessionError::Deserialization(e.to_string())),
            other => Err(SessionError::Deserialization(format!(
                "expected JSON text, found {}",
                kind_of(&other)
            ))),
        }
    }
}

/// Stores the payload as a plain JSON document.
///
/// Serializing flattens the payload to its serde form, which is also what
/// normalizes the cookie to its plain fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralSerializer;

impl<P> SessionSerializer<P> for StructuralSerializer
where
    P: Serialize + DeserializeOwned,
{
    fn serialize(&self, payload: &P) -> SessionResult<Value> {
        structural_serialize(payload)
    }

    fn unserialize(&self, stored: Value) -> SessionResult<P> {
        structural_unserialize(stored)
    }
}

type SerializeFn<P> = Arc<dyn Fn(&P) -> SessionResult<Value> + Send + Sync>;
type UnserializeFn<P> = Arc<dyn Fn(Value) -> SessionResult<P> + Send + Sync>;

/// Serializer assembled from closures.
///
/// A missing half falls back to the structural conversion.
///
/// # Examples
///
/// ```
/// use keepsake_session::{FnSerializer, Session, SessionSerializer};
/// use serde_json::Value;
///
/// let serializer = FnSerializer::<Session>::new()
///     .serialize_with(|s| Ok(Value::String(serde_json::to_string(s).unwrap())))
///     .unserialize_with(|v| Ok(serde_json::from_str(v.as_str().unwrap()).unwrap()));
///
/// let stored = serializer.serialize(&Session::new()).unwrap();
/// assert!(stored.is_string());
/// ```
pub struct FnSerializer<P> {
    serialize: Option<SerializeFn<P>>,
    unserialize: Option<UnserializeFn<P>>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> FnSerializer<P> {
    /// Create a serializer with both halves defaulted.
    pub fn new() -> Self {
        Self {
            serialize: None,
            unserialize: None,
            _payload: PhantomData,
        }
    }

    /// Set the serialize half.
    pub fn serialize_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&P) -> SessionResult<Value> + Send + Sync + 'static,
    {
        self.serialize = Some(Arc::new(f));
        self
    }

    /// Set the unserialize half.
    pub fn unserialize_with<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> SessionResult<P> + Send + Sync + 'static,
    {
        self.unserialize = Some(Arc::new(f));
        self
    }
}

impl<P> Default for FnSerializer<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> SessionSerializer<P> for FnSerializer<P>
where
    P: Serialize + DeserializeOwned,
{
    fn serialize(&self, payload: &P) -> SessionResult<Value> {
        match &self.serialize {
            Some(f) => f(payload),
            None => structural_serialize(payload),
        }
    }

    fn unserialize(&self, stored: Value) -> SessionResult<P> {
        match &self.unserialize {
            Some(f) => f(stored),
            None => structural_unserialize(stored),
        }
    }
}

/// Which transform a store ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationMode {
    /// JSON text
    Stringify,
    /// Plain JSON document
    Structural,
    /// Caller-supplied transform
    Custom,
}

/// Pick the active transform.
pub(crate) fn select<P>(
    custom: Option<Arc<dyn SessionSerializer<P>>>,
    stringify: bool,
) -> (Arc<dyn SessionSerializer<P>>, SerializationMode)
where
    P: Serialize + DeserializeOwned + 'static,
{
    match custom {
        Some(serializer) => (serializer, SerializationMode::Custom),
        None if !stringify => (Arc::new(StructuralSerializer), SerializationMode::Structural),
        None => (Arc::new(JsonStringSerializer), SerializationMode::Stringify),
    }
}

fn structural_serialize<P: Serialize>(payload: &P) -> SessionResult<Value> {
    serde_json::to_value(payload).map_err(|e| SessionError::Serialization(e.to_string()))
}

fn structural_unserialize<P: DeserializeOwned>(stored: Value) -> SessionResult<P> {
    serde_json::from_value(stored).map_err(|e| SessionError::Deserialization(e.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionCookie};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    fn sample() -> Session {
        let mut session = Session::with_cookie(SessionCookie {
            expires: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            http_only: Some(true),
            path: Some("/".to_string()),
            ..Default::default()
        });
        session.set("user", "u1").unwrap();
        session.set("cart", json!([{"sku": "A1", "qty": 2}])).unwrap();
        session
    }

    #[test]
    fn test_stringify_stores_text() {
        let stored = JsonStringSerializer.serialize(&sample()).unwrap();
        assert!(stored.is_string());

        let back: Session = JsonStringSerializer.unserialize(stored).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_stringify_rejects_documents() {
        let result: SessionResult<Session> = JsonStringSerializer.unserialize(json!({"cookie": {}}));
        assert!(matches!(result, Err(SessionError::Deserialization(_))));
    }

    #[test]
    fn test_structural_stores_document() {
        let stored = SessionSerializer::<Session>::serialize(&StructuralSerializer, &sample()).unwrap();
        assert!(stored.is_object());
        assert_eq!(stored["cookie"]["httpOnly"], json!(true));
        assert_eq!(stored["user"], json!("u1"));

        let back: Session = StructuralSerializer.unserialize(stored).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_fn_serializer_defaults_missing_half() {
        let serializer = FnSerializer::<Session>::new().serialize_with(|s| {
            let mut value = serde_json::to_value(s).unwrap();
            value["tagged"] = json!(true);
            Ok(value)
        });

        let stored = serializer.serialize(&sample()).unwrap();
        assert_eq!(stored["tagged"], json!(true));

        // Default unserialize keeps unknown keys in the data map
        let back = serializer.unserialize(stored).unwrap();
        assert_eq!(back.get::<bool>("tagged"), Some(true));
        assert_eq!(back.cookie, sample().cookie);
    }

    #[test]
    fn test_selection_priority() {
        let custom: Arc<dyn SessionSerializer<Session>> = Arc::new(FnSerializer::new());
        assert_eq!(select(Some(custom), false).1, SerializationMode::Custom);
        assert_eq!(select::<Session>(None, false).1, SerializationMode::Structural);
        assert_eq!(select::<Session>(None, true).1, SerializationMode::Stringify);
    }

    #[test]
    fn test_serialize_does_not_mutate_input() {
        let session = sample();
        let before = session.clone();
        let _ = JsonStringSerializer.serialize(&session).unwrap();
        let _ = SessionSerializer::<Session>::serialize(&StructuralSerializer, &session).unwrap();
        assert_eq!(session, before);
    }

    proptest! {
        #[test]
        fn prop_both_modes_round_trip(
            user in "[a-zA-Z0-9 ]{0,24}",
            visits in any::<u32>(),
            flags in proptest::collection::vec(any::<bool>(), 0..4),
            max_age in proptest::option::of(0i64..86_400_000),
        ) {
            let mut session = Session::with_cookie(SessionCookie {
                original_max_age: max_age,
                ..Default::default()
            });
            session.set("user", &user).unwrap();
            session.set("visits", visits).unwrap();
            session.set("flags", &flags).unwrap();

            let text = JsonStringSerializer.serialize(&session).unwrap();
            let back: Session = JsonStringSerializer.unserialize(text).unwrap();
            prop_assert_eq!(&back, &session);

            let doc = SessionSerializer::<Session>::serialize(&StructuralSerializer, &session).unwrap();
            let back: Session = StructuralSerializer.unserialize(doc).unwrap();
            prop_assert_eq!(&back, &session);
        }
    }
}
