//! Integration tests for common Keepsake workflows.
//!
//! These tests verify that the most common use cases work correctly.

use keepsake::prelude::*;
use keepsake::{ManualClock, SessionError};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Login / Logout
// =============================================================================

#[tokio::test]
async fn test_login_then_logout() {
    let store = SessionStore::<Session>::builder()
        .backend(Arc::new(MemoryBackend::new()))
        .build()
        .unwrap();

    // Login stores the user
    let mut session = Session::new();
    session.set("user_id", 42).unwrap();
    session.set("roles", vec!["admin"]).unwrap();
    store.set("sid", &session).await.unwrap();

    // Next request reads it back
    let loaded = store.get("sid").await.unwrap().unwrap();
    assert_eq!(loaded.get::<i32>("user_id"), Some(42));
    assert_eq!(loaded.get::<Vec<String>>("roles"), Some(vec!["admin".to_string()]));

    // Logout
    store.destroy("sid").await.unwrap();
    assert!(store.get("sid").await.unwrap().is_none());
}

// =============================================================================
// Cookie-driven expiry
// =============================================================================

#[tokio::test]
async fn test_remember_me_cookie_outlives_ttl() {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let store = SessionStore::<Session>::builder()
        .backend(Arc::new(MemoryBackend::new()))
        .clock(clock.clone())
        .options(StoreOptions::new().with_ttl(Duration::from_secs(60)))
        .build()
        .unwrap();

    let remember = SessionCookie::expiring_at(chrono::Utc::now() + chrono::Duration::days(30));
    store
        .set("long", &Session::with_cookie(remember))
        .await
        .unwrap();
    store.set("short", &Session::new()).await.unwrap();

    clock.advance(chrono::Duration::hours(1));

    assert!(store.get("long").await.unwrap().is_some());
    assert!(store.get("short").await.unwrap().is_none());
}

// =============================================================================
// Configuration errors
// =============================================================================

#[test]
fn test_missing_backend_is_config_error() {
    let err = SessionStore::<Session>::builder().build().err().unwrap();
    assert!(err.is_config_error());
}

#[test]
fn test_empty_collection_is_config_error() {
    let options = StoreOptions::new().with_collection("");
    let result = SessionStore::<Session>::builder()
        .backend(Arc::new(MemoryBackend::new()))
        .options(options)
        .build();
    assert!(matches!(result, Err(SessionError::Config(_))));
}

// =============================================================================
// Event listeners
// =============================================================================

#[tokio::test]
async fn test_listener_sees_touch_payload() {
    let store = SessionStore::<Session>::builder()
        .backend(Arc::new(MemoryBackend::new()))
        .build()
        .unwrap();
    let mut events = store.subscribe();

    let session = Session::new().with("theme", "dark").unwrap();
    store.set("sid", &session).await.unwrap();
    store.touch("sid", &session).await.unwrap();

    let mut touched = None;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Touch { sid, session } = event {
            touched = Some((sid, session));
        }
    }
    let (sid, payload) = touched.unwrap();
    assert_eq!(sid, "sid");
    assert_eq!(payload.get::<String>("theme"), Some("dark".to_string()));
}
