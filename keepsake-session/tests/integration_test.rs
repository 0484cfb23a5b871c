//! Integration tests for keepsake-session

use chrono::{Duration, Utc};
use keepsake_session::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn memory_store(
    options: StoreOptions,
) -> (SessionStore<Session>, Arc<MemoryBackend>, Arc<ManualClock>) {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let store = SessionStore::builder()
        .backend(backend.clone())
        .clock(clock.clone())
        .options(options)
        .build()
        .unwrap();
    (store, backend, clock)
}

#[tokio::test]
async fn test_idle_touch_workflow() {
    let options = StoreOptions::new()
        .with_ttl(StdDuration::from_secs(60))
        .with_touch_after(StdDuration::from_secs(30));
    let (store, backend, clock) = memory_store(options);
    let start = clock.now();

    let session = Session::new().with("user", "u1").unwrap();
    store.set("abc", &session).await.unwrap();
    assert_eq!(
        backend.raw("abc").unwrap().expires,
        Some(start + Duration::seconds(60))
    );

    let fetched = store.get("abc").await.unwrap().unwrap();
    assert_eq!(fetched.get::<String>("user"), Some("u1".to_string()));
    assert_eq!(fetched.last_modified, Some(start));

    clock.advance(Duration::seconds(10));
    let outcome = store.touch("abc", &fetched).await.unwrap();
    assert_eq!(outcome, TouchOutcome::Skipped);
    assert_eq!(
        backend.raw("abc").unwrap().expires,
        Some(start + Duration::seconds(60))
    );

    clock.advance(Duration::seconds(30));
    let outcome = store.touch("abc", &fetched).await.unwrap();
    assert_eq!(outcome, TouchOutcome::Refreshed);

    let record = backend.raw("abc").unwrap();
    assert_eq!(record.expires, Some(start + Duration::seconds(100)));
    assert_eq!(record.last_modified, Some(start + Duration::seconds(40)));
}

#[tokio::test]
async fn test_stringify_wire_shape() {
    let (store, backend, _) = memory_store(StoreOptions::new());

    let session = Session::new().with("user", "u1").unwrap();
    store.set("abc", &session).await.unwrap();

    let stored = backend.raw("abc").unwrap().session;
    let text = stored.as_str().unwrap();
    let parsed: Value = serde_json::from_str(text).unwrap();
    assert_eq!(parsed, json!({"cookie": {}, "user": "u1"}));
    assert_eq!(store.serialization_mode(), SerializationMode::Stringify);
}

#[tokio::test]
async fn test_structural_mode_stores_documents() {
    let (store, backend, _) = memory_store(StoreOptions::new().with_stringify(false));

    let session = Session::new().with("count", 3).unwrap();
    store.set("abc", &session).await.unwrap();

    assert_eq!(
        backend.raw("abc").unwrap().session,
        json!({"cookie": {}, "count": 3})
    );
    assert_eq!(store.get("abc").await.unwrap(), Some(session));
    assert_eq!(store.serialization_mode(), SerializationMode::Structural);
}

#[tokio::test]
async fn test_expired_records_are_invisible() {
    let (store, _, clock) = memory_store(StoreOptions::new().with_ttl(StdDuration::from_secs(60)));

    store.set("old", &Session::new()).await.unwrap();
    clock.advance(Duration::seconds(30));
    store.set("new", &Session::new()).await.unwrap();
    clock.advance(Duration::seconds(31));

    assert!(store.get("old").await.unwrap().is_none());
    assert!(store.get("new").await.unwrap().is_some());
    assert_eq!(store.all().await.unwrap().len(), 1);
    // Not yet reclaimed records still count
    assert_eq!(store.length().await.unwrap(), 2);

    let err = store.touch("old", &Session::new()).await.unwrap_err();
    assert!(matches!(err, SessionError::TouchNotFound(_)));
}

#[tokio::test]
async fn test_events_follow_operations() {
    let (store, _, _) = memory_store(StoreOptions::new());
    let mut events = store.subscribe();

    store.set("abc", &Session::new()).await.unwrap();
    store.set("abc", &Session::new()).await.unwrap();
    store.get("abc").await.unwrap();
    store.get("missing").await.unwrap();
    store.touch("abc", &Session::new()).await.unwrap();
    store.all().await.unwrap();
    store.destroy("abc").await.unwrap();

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec!["create", "set", "update", "set", "get", "touch", "all", "destroy"]
    );
}

#[tokio::test]
async fn test_destroy_and_clear() {
    let (store, _, _) = memory_store(StoreOptions::new());

    for sid in ["a", "b", "c"] {
        store.set(sid, &Session::new()).await.unwrap();
    }
    store.destroy("a").await.unwrap();
    store.destroy("never-existed").await.unwrap();
    assert_eq!(store.length().await.unwrap(), 2);

    store.clear().await.unwrap();
    assert_eq!(store.length().await.unwrap(), 0);
    assert!(store.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_encrypted_round_trip() {
    let (store, backend, _) = memory_store(StoreOptions::new().with_secret("squirrel"));
    assert!(store.is_encrypted());

    let session = Session::new().with("card", "4111").unwrap();
    store.set("abc", &session).await.unwrap();

    let stored = backend.raw("abc").unwrap().session;
    let envelope: Value = serde_json::from_str(stored.as_str().unwrap()).unwrap();
    assert!(envelope.get("ct").is_some());
    assert!(envelope.get("iv").is_some());
    assert!(envelope.get("salt").is_some());
    assert!(!stored.as_str().unwrap().contains("4111"));

    assert_eq!(store.get("abc").await.unwrap(), Some(session.clone()));
    assert_eq!(store.all().await.unwrap(), vec![session]);
}

#[tokio::test]
async fn test_prefixed_storage_keys() {
    let backend = Arc::new(MemoryBackend::new());
    let store = SessionStore::<Session>::builder()
        .backend(backend.clone())
        .id_transform(PrefixedId::new("app"))
        .build()
        .unwrap();

    store.set("abc", &Session::new()).await.unwrap();

    assert!(backend.raw("app:abc").is_some());
    assert!(backend.raw("abc").is_none());
    assert!(store.get("abc").await.unwrap().is_some());
}

#[tokio::test]
async fn test_write_options_reach_backend() {
    let write_options = WriteOptions {
        replicas: Some(1),
        timeout: Some(StdDuration::from_millis(500)),
    };
    let (store, backend, _) =
        memory_store(StoreOptions::new().with_write_options(write_options.clone()));

    store.set("abc", &Session::new()).await.unwrap();
    assert_eq!(backend.last_write_options(), Some(write_options));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cart {
    items: Vec<u32>,
    #[serde(skip)]
    last_modified: Option<chrono::DateTime<Utc>>,
}

impl SessionPayload for Cart {
    fn cookie_expires(&self) -> Option<chrono::DateTime<Utc>> {
        None
    }

    fn last_modified(&self) -> Option<chrono::DateTime<Utc>> {
        self.last_modified
    }

    fn set_last_modified(&mut self, at: Option<chrono::DateTime<Utc>>) {
        self.last_modified = at;
    }
}

#[tokio::test]
async fn test_custom_payload_and_serializer() {
    let serializer = FnSerializer::<Cart>::new().serialize_with(|cart: &Cart| {
        Ok(Value::String(
            cart.items
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ))
    });
    let serializer = serializer.unserialize_with(|stored: Value| {
        let text = stored.as_str().unwrap_or_default();
        let items = text
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse()
                    .map_err(|_| SessionError::Deserialization(s.to_string()))
            })
            .collect::<SessionResult<Vec<u32>>>()?;
        Ok(Cart {
            items,
            last_modified: None,
        })
    });

    let backend = Arc::new(MemoryBackend::new());
    let store = SessionStore::<Cart>::builder()
        .backend(backend.clone())
        .serializer(Arc::new(serializer))
        .build()
        .unwrap();
    assert_eq!(store.serialization_mode(), SerializationMode::Custom);

    let cart = Cart {
        items: vec![1, 2, 3],
        last_modified: None,
    };
    store.set("abc", &cart).await.unwrap();

    assert_eq!(backend.raw("abc").unwrap().session, json!("1,2,3"));
    assert_eq!(store.get("abc").await.unwrap(), Some(cart));
}

#[tokio::test(start_paused = true)]
async fn test_interval_sweep_removes_expired() {
    let options = StoreOptions::new()
        .with_ttl(StdDuration::from_secs(60))
        .with_auto_remove(AutoRemove::Interval)
        .with_auto_remove_interval(StdDuration::from_secs(600));
    let (store, backend, clock) = memory_store(options);

    store.set("abc", &Session::new()).await.unwrap();
    assert!(!backend.has_expiry_index());

    clock.advance(Duration::seconds(120));
    assert_eq!(store.length().await.unwrap(), 1);

    tokio::time::sleep(StdDuration::from_secs(601)).await;
    assert_eq!(store.length().await.unwrap(), 0);

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_disabled_auto_remove_keeps_expired() {
    let options = StoreOptions::new()
        .with_ttl(StdDuration::from_secs(1))
        .with_auto_remove(AutoRemove::Disabled);
    let (store, backend, clock) = memory_store(options);

    store.set("abc", &Session::new()).await.unwrap();
    clock.advance(Duration::seconds(5));

    assert!(!backend.has_expiry_index());
    assert!(store.get("abc").await.unwrap().is_none());
    assert!(backend.raw("abc").is_some());
}

// These tests require a running Redis server
// Run with: cargo test -- --ignored

#[cfg(feature = "redis")]
#[tokio::test]
#[ignore]
async fn test_redis_session_lifecycle() {
    let store = SessionStore::<Session>::builder()
        .url("redis://localhost:6379")
        .options(
            StoreOptions::new()
                .with_collection("keepsake_test_lifecycle")
                .with_ttl(StdDuration::from_secs(60)),
        )
        .build()
        .unwrap();
    store.clear().await.unwrap();

    let session = Session::new().with("user", "u1").unwrap();
    store.set("abc", &session).await.unwrap();
    assert_eq!(store.get("abc").await.unwrap(), Some(session.clone()));
    assert_eq!(store.length().await.unwrap(), 1);

    assert_eq!(
        store.touch("abc", &session).await.unwrap(),
        TouchOutcome::Refreshed
    );
    assert_eq!(store.all().await.unwrap(), vec![session]);

    store.destroy("abc").await.unwrap();
    assert!(store.get("abc").await.unwrap().is_none());
    store.close().await.unwrap();
}

#[cfg(feature = "redis")]
#[tokio::test]
#[ignore]
async fn test_redis_touch_missing() {
    let store = SessionStore::<Session>::builder()
        .redis(RedisConfig::new("redis://localhost:6379").unwrap())
        .options(StoreOptions::new().with_collection("keepsake_test_missing"))
        .build()
        .unwrap();

    let err = store.touch("nope", &Session::new()).await.unwrap_err();
    assert!(matches!(err, SessionError::TouchNotFound(_)));
    store.close().await.unwrap();
}

#[cfg(feature = "redis")]
#[tokio::test]
#[ignore]
async fn test_redis_close_releases_connection() {
    let backend = RedisBackend::connect(
        &RedisConfig::new("redis://localhost:6379").unwrap(),
        "keepsake_test_close",
    )
    .await
    .unwrap();

    backend.count().await.unwrap();
    backend.close().await.unwrap();

    let err = backend.count().await.unwrap_err();
    assert!(err.is_connection_error());
    // Closing again is harmless
    backend.close().await.unwrap();
}

#[cfg(feature = "redis")]
#[tokio::test]
#[ignore]
async fn test_redis_sweep_spares_rewritten_records() {
    let backend = RedisBackend::connect(
        &RedisConfig::new("redis://localhost:6379").unwrap(),
        "keepsake_test_sweep",
    )
    .await
    .unwrap();
    backend.drop_all().await.unwrap();

    let now = Utc::now();
    let write = WriteOptions::default();
    let record = |id: &str, expires| SessionRecord {
        id: id.to_string(),
        session: json!("{}"),
        expires: Some(expires),
        last_modified: None,
    };

    backend
        .upsert(record("old", now - Duration::seconds(5)), &write)
        .await
        .unwrap();
    backend
        .upsert(record("fresh", now - Duration::seconds(5)), &write)
        .await
        .unwrap();
    backend
        .upsert(record("fresh", now + Duration::seconds(60)), &write)
        .await
        .unwrap();

    assert_eq!(backend.delete_expired(now).await.unwrap(), 1);
    assert!(backend.find_live("fresh", now).await.unwrap().is_some());
    assert_eq!(backend.count().await.unwrap(), 1);

    backend.drop_all().await.unwrap();
    backend.close().await.unwrap();
}
