//! Per-worker session pool.
//!
//! One task owns the pool; session lifecycle events and directives are
//! funneled into it, so every mutation is serialized. Growth batches run
//! on their own task and report back through the event channel, which
//! keeps ping and rebalance directives from queueing behind an in-flight
//! batch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::Stat;
use crate::session::{Session, SessionConnector, SessionEvent, SessionId};
use crate::token::TokenSource;

#[derive(Default)]
struct Counters {
    ok: AtomicU64,
    err: AtomicU64,
    dropped: AtomicU64,
}

pub struct PoolManager {
    channel_id: String,
    pool_limit: u32,
    /// Target live-presentation count. `None` until the first settings
    /// push; the first known value always forces a baseline rebalance.
    handshake_target: Option<u32>,
    /// Keyed by session id. A BTreeMap keeps iteration order stable so
    /// rebalance and reassertion touch a consistent subset.
    sessions: BTreeMap<SessionId, Session>,
    next_id: Arc<AtomicU64>,
    counters: Arc<Counters>,
    tokens: Arc<dyn TokenSource>,
    connector: Arc<dyn SessionConnector>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl PoolManager {
    /// Returns the manager plus the event stream its owner must drain
    /// into [`PoolManager::handle_event`].
    pub fn new(
        channel_id: String,
        pool_limit: u32,
        tokens: Arc<dyn TokenSource>,
        connector: Arc<dyn SessionConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            channel_id,
            pool_limit,
            handshake_target: None,
            sessions: BTreeMap::new(),
            next_id: Arc::new(AtomicU64::new(1)),
            counters: Arc::new(Counters::default()),
            tokens,
            connector,
            events_tx,
        };
        (manager, events_rx)
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn pool_limit(&self) -> u32 {
        self.pool_limit
    }

    pub fn set_pool_limit(&mut self, limit: u32) {
        self.pool_limit = limit;
    }

    pub fn pool_size(&self) -> usize {
        self.sessions.len()
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.values().filter(|s| s.connected()).count()
    }

    pub fn handshake_target(&self) -> Option<u32> {
        self.handshake_target
    }

    /// Issue one acquisition batch toward the pool limit. No-op when the
    /// pool already meets its target. The batch runs on its own task and
    /// settles as a unit; the returned handle completes once every
    /// acquisition and transport open has resolved.
    pub fn grow(&mut self, batch: usize) -> Option<JoinHandle<()>> {
        if self.sessions.len() as u32 >= self.pool_limit {
            debug!(
                pool = self.sessions.len(),
                limit = self.pool_limit,
                "pool at target, skipping growth"
            );
            return None;
        }

        let tokens = Arc::clone(&self.tokens);
        let connector = Arc::clone(&self.connector);
        let counters = Arc::clone(&self.counters);
        let next_id = Arc::clone(&self.next_id);
        let events = self.events_tx.clone();

        Some(tokio::spawn(async move {
            let results = tokens.acquire(batch).await;

            let mut opens = Vec::new();
            for result in results {
                match result {
                    Err(e) => {
                        counters.err.fetch_add(1, Ordering::Relaxed);
                        debug!(error = %e, "acquisition failed");
                    }
                    Ok(credential) => {
                        counters.ok.fetch_add(1, Ordering::Relaxed);
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        let connector = Arc::clone(&connector);
                        let events = events.clone();
                        opens.push(async move {
                            match connector.open(id, &credential, events.clone()).await {
                                Ok(link) => {
                                    let _ = events.send(SessionEvent::Opened {
                                        id,
                                        credential,
                                        link,
                                    });
                                }
                                Err(e) => {
                                    warn!(id, error = %e, "session transport failed to open");
                                    let _ = events.send(SessionEvent::Closed {
                                        id,
                                        reason: e.to_string(),
                                    });
                                }
                            }
                        });
                    }
                }
            }
            future::join_all(opens).await;
        }))
    }

    /// Apply one session lifecycle event. Must only be called by the task
    /// that owns the pool.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened {
                id,
                credential,
                link,
            } => {
                let session = Session::new(id, self.channel_id.clone(), credential, link);
                self.sessions.insert(id, session);
                debug!(id, pool = self.sessions.len(), "session open");
            }
            SessionEvent::Closed { id, reason } => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(mut session) = self.sessions.remove(&id) {
                    session.mark_closed();
                }
                warn!(id, %reason, pool = self.sessions.len(), "session dropped");

                // Keep the live-presentation count stable: promote exactly
                // one idle sibling, if any exists.
                if let Some(idle) = self.sessions.values_mut().find(|s| !s.connected()) {
                    if let Err(e) = idle.handshake() {
                        debug!(error = %e, "compensating handshake failed");
                    }
                }
            }
            SessionEvent::Errored { id, error } => {
                if error.contains("403") {
                    warn!(id, "session transport forbidden");
                } else {
                    warn!(id, %error, "session transport error");
                }
            }
        }
    }

    /// Move the live-presentation count toward `new_size`. Re-running
    /// with an unchanged known target is a no-op; the first known target
    /// is always applied as a baseline, measured from zero.
    pub fn rebalance_handshake(&mut self, new_size: u32) {
        if self.handshake_target == Some(new_size) {
            return;
        }
        let previous = self.handshake_target.unwrap_or(0);
        self.handshake_target = Some(new_size);

        if new_size > previous {
            let delta = (new_size - previous) as usize;
            for session in self
                .sessions
                .values_mut()
                .filter(|s| !s.connected())
                .take(delta)
            {
                if let Err(e) = session.handshake() {
                    debug!(error = %e, "handshake send failed");
                }
            }
        } else {
            let delta = (previous - new_size) as usize;
            for session in self
                .sessions
                .values_mut()
                .filter(|s| s.connected())
                .take(delta)
            {
                if let Err(e) = session.disconnect() {
                    debug!(error = %e, "disconnect send failed");
                }
            }
        }
        info!(from = previous, to = new_size, "handshake target change");
    }

    /// Re-assert handshake presence on the leading `handshake_target`
    /// sessions, compensating for silent drops between settings pushes.
    pub fn reassert_handshake(&mut self) {
        let Some(target) = self.handshake_target else {
            return;
        };
        if target == 0 || self.sessions.is_empty() {
            return;
        }
        for session in self.sessions.values_mut().take(target as usize) {
            if let Err(e) = session.handshake() {
                debug!(error = %e, "handshake send failed");
            }
        }
    }

    /// Liveness probe on every session.
    pub fn ping_all(&mut self) {
        for session in self.sessions.values() {
            if let Err(e) = session.ping() {
                debug!(id = session.id(), error = %e, "ping send failed");
            }
        }
    }

    /// Adopt a new channel: every session re-handshakes under the new id.
    pub fn set_channel(&mut self, channel_id: String) {
        info!(from = %self.channel_id, to = %channel_id, "channel change");
        self.channel_id = channel_id.clone();
        for session in self.sessions.values_mut() {
            session.set_channel(channel_id.clone());
            if let Err(e) = session.disconnect() {
                debug!(error = %e, "disconnect send failed");
            }
            if let Err(e) = session.handshake() {
                debug!(error = %e, "handshake send failed");
            }
        }
    }

    pub fn ok_count(&self) -> u64 {
        self.counters.ok.load(Ordering::Relaxed)
    }

    pub fn err_count(&self) -> u64 {
        self.counters.err.load(Ordering::Relaxed)
    }

    pub fn drop_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Snapshot for upstream reporting. Produced on demand, never cached.
    pub fn stat(&self) -> Stat {
        Stat {
            channel_id: Some(self.channel_id.clone()),
            handshake_size: self.handshake_target,
            pool_size: self.sessions.len() as u32,
            drop_count: self.drop_count(),
            ok_count: self.ok_count(),
            err_count: self.err_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Frame;
    use crate::testkit;
    use crate::testkit::session::FrameLog;

    fn pool(pool_limit: u32) -> PoolManager {
        let (manager, _events) = PoolManager::new(
            "100".into(),
            pool_limit,
            Arc::new(testkit::tokens::ScriptedTokens::new()),
            Arc::new(testkit::session::ScriptedConnector::new()),
        );
        manager
    }

    fn seed_sessions(manager: &mut PoolManager, n: u64) -> Vec<FrameLog> {
        (1..=n)
            .map(|id| {
                let (event, frames) = testkit::session::open_event(id);
                manager.handle_event(event);
                frames
            })
            .collect()
    }

    #[test]
    fn first_target_forces_baseline_rebalance() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 3);

        manager.rebalance_handshake(2);

        assert_eq!(manager.connected_count(), 2);
        assert_eq!(frames[0].handshakes(), 1);
        assert_eq!(frames[1].handshakes(), 1);
        assert_eq!(frames[2].handshakes(), 0);
    }

    #[test]
    fn unchanged_target_is_a_noop() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 3);

        manager.rebalance_handshake(2);
        let before: usize = frames.iter().map(|f| f.all().len()).sum();
        manager.rebalance_handshake(2);
        let after: usize = frames.iter().map(|f| f.all().len()).sum();

        assert_eq!(before, after);
    }

    #[test]
    fn shrink_disconnects_connected_sessions() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 4);

        manager.rebalance_handshake(3);
        manager.rebalance_handshake(1);

        assert_eq!(manager.connected_count(), 1);
        let disconnects: usize = frames.iter().map(|f| f.disconnects()).sum();
        assert_eq!(disconnects, 2);
    }

    #[test]
    fn shortfall_operates_on_available_sessions() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 2);

        manager.rebalance_handshake(5);

        assert_eq!(manager.connected_count(), 2);
        let handshakes: usize = frames.iter().map(|f| f.handshakes()).sum();
        assert_eq!(handshakes, 2);
        assert_eq!(manager.handshake_target(), Some(5));
    }

    #[test]
    fn rebalance_never_exceeds_pool_size() {
        let mut manager = pool(10);
        seed_sessions(&mut manager, 3);

        manager.rebalance_handshake(100);
        assert_eq!(manager.connected_count(), 3);

        manager.rebalance_handshake(0);
        assert_eq!(manager.connected_count(), 0);
    }

    #[test]
    fn drop_promotes_exactly_one_idle_sibling() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 3);
        manager.rebalance_handshake(2);

        manager.handle_event(SessionEvent::Closed {
            id: 1,
            reason: "test".into(),
        });

        assert_eq!(manager.pool_size(), 2);
        assert_eq!(manager.drop_count(), 1);
        // Session 3 was the only idle sibling.
        assert_eq!(frames[2].handshakes(), 1);
        assert_eq!(frames[1].handshakes(), 1);
    }

    #[test]
    fn drop_without_idle_sibling_makes_no_call() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 2);
        manager.rebalance_handshake(2);

        manager.handle_event(SessionEvent::Closed {
            id: 1,
            reason: "test".into(),
        });

        assert_eq!(frames[1].handshakes(), 1);
        assert_eq!(manager.drop_count(), 1);
    }

    #[test]
    fn channel_change_rehandshakes_every_session_under_new_id() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 3);
        manager.rebalance_handshake(3);

        manager.set_channel("200".into());

        for log in &frames {
            let all = log.all();
            // baseline handshake, then disconnect + handshake under "200"
            assert_eq!(all.len(), 3);
            assert_eq!(all[1], Frame::disconnect("200"));
            assert_eq!(all[2], Frame::handshake("200"));
        }
        assert_eq!(manager.connected_count(), 3);
    }

    #[test]
    fn reassert_touches_the_leading_target_sessions() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 3);
        manager.rebalance_handshake(2);

        manager.reassert_handshake();

        assert_eq!(frames[0].handshakes(), 2);
        assert_eq!(frames[1].handshakes(), 2);
        assert_eq!(frames[2].handshakes(), 0);
    }

    #[test]
    fn reassert_without_target_is_a_noop() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 2);

        manager.reassert_handshake();

        assert_eq!(frames[0].all().len(), 0);
        assert_eq!(frames[1].all().len(), 0);
    }

    #[test]
    fn ping_probes_every_session() {
        let mut manager = pool(10);
        let frames = seed_sessions(&mut manager, 3);

        manager.ping_all();

        for log in &frames {
            assert_eq!(log.all(), vec![Frame::ping()]);
        }
    }

    #[tokio::test]
    async fn grow_is_a_noop_at_the_pool_limit() {
        let mut manager = pool(2);
        seed_sessions(&mut manager, 2);

        assert!(manager.grow(10).is_none());
    }

    #[test]
    fn stat_reflects_pool_and_counters() {
        let mut manager = pool(10);
        seed_sessions(&mut manager, 2);
        manager.rebalance_handshake(1);
        manager.handle_event(SessionEvent::Closed {
            id: 2,
            reason: "test".into(),
        });

        let stat = manager.stat();
        assert_eq!(stat.channel_id.as_deref(), Some("100"));
        assert_eq!(stat.handshake_size, Some(1));
        assert_eq!(stat.pool_size, 1);
        assert_eq!(stat.drop_count, 1);
    }
}
