// Keepsake - session persistence for Rust web services
//
// This library stores web sessions in a durable backend with TTL expiry,
// lazy idle touch, optional at-rest encryption and pluggable serialization.

// Re-export the session engine
pub use keepsake_session::*;

// Re-export the session crate itself for fully qualified paths
pub use keepsake_session as session;
