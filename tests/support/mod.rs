//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

use viewpool::pool::PoolManager;
use viewpool::session::SessionEvent;
use viewpool::testkit::session::ScriptedConnector;
use viewpool::testkit::tokens::ScriptedTokens;

pub fn pool_with(
    tokens: ScriptedTokens,
    connector: Arc<ScriptedConnector>,
    limit: u32,
) -> (PoolManager, mpsc::UnboundedReceiver<SessionEvent>) {
    PoolManager::new("100".into(), limit, Arc::new(tokens), connector)
}

/// Apply every queued session event to the pool.
pub fn drain_events(pool: &mut PoolManager, events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        pool.handle_event(event);
    }
}
