//! Worker shard runtime.
//!
//! One worker owns one pool. Its run loop multiplexes the coordinator
//! link, session lifecycle events, and the three local timers (backfill,
//! handshake reassertion, ping). Settings pushes are applied in a fixed
//! order: channel change first, handshake rebalance second, pool-limit
//! change last. Only the last of these restarts the backfill timer.

mod link;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::Result;
use crate::pool::PoolManager;
use crate::protocol::{ControlMessage, SettingMessage, StatMessage};
use crate::session::SessionEvent;

pub use link::{CoordinatorLink, LinkBackoff, LinkEvent};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub backfill_interval: Duration,
    pub reassert_interval: Duration,
    pub ping_interval: Duration,
}

impl From<&PoolConfig> for WorkerConfig {
    fn from(pool: &PoolConfig) -> Self {
        Self {
            batch_size: pool.batch_size,
            backfill_interval: Duration::from_millis(pool.backfill_interval_ms),
            reassert_interval: Duration::from_millis(pool.reassert_interval_ms),
            ping_interval: Duration::from_millis(pool.ping_interval_ms),
        }
    }
}

/// Outcome of one settings application, for the caller to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsOutcome {
    pub channel_changed: bool,
    pub pool_limit_changed: bool,
}

pub struct Worker {
    config: WorkerConfig,
    pool: PoolManager,
}

impl Worker {
    pub fn new(config: WorkerConfig, pool: PoolManager) -> Self {
        Self { config, pool }
    }

    pub fn pool(&self) -> &PoolManager {
        &self.pool
    }

    /// Apply a settings push in the fixed order the protocol requires.
    pub fn apply_settings(&mut self, msg: &SettingMessage) -> SettingsOutcome {
        let channel_changed = msg
            .channel_id
            .as_ref()
            .is_some_and(|id| id != self.pool.channel_id());
        if channel_changed {
            if let Some(id) = &msg.channel_id {
                self.pool.set_channel(id.clone());
            }
        }

        if let Some(size) = msg.handshake_size {
            self.pool.rebalance_handshake(size);
        }

        let pool_limit_changed = msg.pool_limit != self.pool.pool_limit();
        if pool_limit_changed {
            self.pool.set_pool_limit(msg.pool_limit);
        }

        debug!(
            channel_id = ?msg.channel_id,
            pool_limit = msg.pool_limit,
            handshake_size = ?msg.handshake_size,
            "settings applied"
        );
        SettingsOutcome {
            channel_changed,
            pool_limit_changed,
        }
    }

    /// Run until the process stops. Never returns under normal operation.
    pub async fn run(
        mut self,
        mut link: CoordinatorLink,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Result<()> {
        let mut backfill = interval(self.config.backfill_interval);
        let mut reassert = interval(self.config.reassert_interval);
        let mut ping = interval(self.config.ping_interval);

        loop {
            tokio::select! {
                event = link.next() => match event {
                    LinkEvent::Opened => self.report(&mut link).await,
                    LinkEvent::Message(ControlMessage::Setting(msg)) => {
                        let outcome = self.apply_settings(&msg);
                        if outcome.pool_limit_changed {
                            // The new limit takes effect now; the next
                            // scheduled backfill moves out a full period.
                            let _ = self.pool.grow(self.config.batch_size);
                            backfill = interval_at(
                                Instant::now() + self.config.backfill_interval,
                                self.config.backfill_interval,
                            );
                        }
                    }
                    LinkEvent::Message(ControlMessage::Ping) => self.report(&mut link).await,
                    LinkEvent::Message(_) => {}
                },
                Some(event) = events.recv() => self.pool.handle_event(event),
                _ = backfill.tick() => {
                    let _ = self.pool.grow(self.config.batch_size);
                }
                _ = reassert.tick() => self.pool.reassert_handshake(),
                _ = ping.tick() => self.pool.ping_all(),
            }
        }
    }

    async fn report(&mut self, link: &mut CoordinatorLink) {
        let stat = self.pool.stat();
        let msg = ControlMessage::Stat(StatMessage { stat });
        if let Err(e) = link.send(&msg).await {
            warn!(error = %e, "stat report failed");
        }
    }
}
