//! Viewpool - coordinated pools of persistent viewer sessions.
//!
//! A coordinator process owns the global targets (channel identity, pool
//! limit, handshake concurrency) and fans them out to any number of worker
//! shards. Each worker grows a local pool of authenticated WebSocket
//! sessions toward its share of the global target, keeps a subset of them
//! presenting as live, and reports statistics back upstream.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML files
//! - [`coordinator`] - Global target state, settings fan-out, stat fan-in
//! - [`error`] - Error types for the crate
//! - [`notify`] - Operator notification seam
//! - [`pool`] - Per-worker session pool management
//! - [`protocol`] - Coordinator⇄worker control messages
//! - [`resolve`] - Channel resolution by human-readable name
//! - [`session`] - Single viewer session lifecycle and wire frames
//! - [`token`] - Credential acquisition from the issuing endpoint
//! - [`viewers`] - External viewer-count monitoring
//! - [`worker`] - Worker shard runtime

pub mod config;
pub mod coordinator;
pub mod error;
pub mod notify;
pub mod pool;
pub mod protocol;
pub mod resolve;
pub mod session;
pub mod token;
pub mod viewers;
pub mod worker;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
