//! Coordinator: global targets, worker roster, stat aggregation.
//!
//! The coordinator owns the global channel and pool targets and divides
//! them across whatever workers are attached right now. Aggregate state
//! is pull-based: a collection round broadcasts a ping, gathers stat
//! reports inside a timeout window, and sums from scratch; nothing is
//! carried over between rounds.

mod listener;
mod runtime;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::notify::{Notice, Notifier};
use crate::protocol::{ControlMessage, SettingMessage, Stat};

pub use listener::serve;
pub use runtime::run;

pub type WorkerId = u64;

/// Events funneled into the coordinator task; worker connections and the
/// operator command line both feed this stream.
#[derive(Debug)]
pub enum CoordinatorEvent {
    Attached {
        worker_id: WorkerId,
        tx: mpsc::UnboundedSender<ControlMessage>,
    },
    Detached {
        worker_id: WorkerId,
    },
    Inbound {
        worker_id: WorkerId,
        message: ControlMessage,
    },
    Command(Command),
}

/// Operator commands, parsed off the control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Resolve a channel by name and adopt its ids.
    Init { channel_name: String },
    ResizePool(u32),
    ResizeHandshake(u32),
    SetChannelId(String),
    SetStreamId(String),
    /// Read-only: report the current channel id.
    ShowChannelId,
    /// Read-only: report the current stream id.
    ShowStreamId,
    Viewers,
    Status,
}

/// Parse one operator line. `None` means the line was not a command.
/// A bare `channel_id`/`stream_id` is a read-only query, never a clear.
pub fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?;
    let arg = parts.next();
    match (verb, arg) {
        ("init", Some(name)) => Some(Command::Init {
            channel_name: name.to_string(),
        }),
        ("resize", Some(target)) => {
            let n = parts.next()?.parse().ok()?;
            match target {
                "pool" => Some(Command::ResizePool(n)),
                "handshake" => Some(Command::ResizeHandshake(n)),
                _ => None,
            }
        }
        ("pool", Some(n)) => n.parse().ok().map(Command::ResizePool),
        ("handshake", Some(n)) => n.parse().ok().map(Command::ResizeHandshake),
        ("channel_id", Some(id)) => Some(Command::SetChannelId(id.to_string())),
        ("channel_id", None) => Some(Command::ShowChannelId),
        ("stream_id", Some(id)) => Some(Command::SetStreamId(id.to_string())),
        ("stream_id", None) => Some(Command::ShowStreamId),
        ("viewers", None) => Some(Command::Viewers),
        ("status", None) => Some(Command::Status),
        _ => None,
    }
}

struct WorkerHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
    last_stat: Option<Stat>,
}

/// One in-flight stat collection round.
struct CollectionRound {
    waiting: HashSet<WorkerId>,
    received: Vec<Stat>,
}

/// Aggregate of the last finished collection round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub pool_size: u32,
    pub drop_count: u64,
    pub ok_count: u64,
    pub err_count: u64,
    pub responders: usize,
}

pub struct Coordinator {
    channel_name: Option<String>,
    channel_id: Option<String>,
    stream_id: Option<String>,
    global_pool_limit: u32,
    /// `None` is the unknown sentinel: no handshake share is pushed until
    /// an operator sets one or a worker echo seeds it.
    global_handshake_size: Option<u32>,
    workers: BTreeMap<WorkerId, WorkerHandle>,
    round: Option<CollectionRound>,
    aggregate: Aggregate,
    notifier: Arc<dyn Notifier>,
    started_at: DateTime<Utc>,
}

impl Coordinator {
    pub fn new(
        default_channel_id: String,
        global_pool_limit: u32,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            channel_name: None,
            channel_id: Some(default_channel_id),
            stream_id: None,
            global_pool_limit,
            global_handshake_size: None,
            workers: BTreeMap::new(),
            round: None,
            aggregate: Aggregate::default(),
            notifier,
            started_at: Utc::now(),
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn channel_name(&self) -> Option<&str> {
        self.channel_name.as_deref()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn set_channel_name(&mut self, name: String) {
        self.channel_name = Some(name);
    }

    /// Setters report whether the value actually changed, so callers only
    /// republish settings on a real change.
    pub fn set_channel_id(&mut self, id: Option<String>) -> bool {
        if self.channel_id == id {
            return false;
        }
        info!(from = ?self.channel_id, to = ?id, "channel id change");
        self.channel_id = id;
        true
    }

    pub fn set_stream_id(&mut self, id: Option<String>) -> bool {
        if self.stream_id == id {
            return false;
        }
        self.stream_id = id;
        true
    }

    pub fn set_global_pool_limit(&mut self, limit: u32) -> bool {
        if self.global_pool_limit == limit {
            return false;
        }
        info!(from = self.global_pool_limit, to = limit, "pool limit change");
        self.global_pool_limit = limit;
        true
    }

    pub fn set_global_handshake_size(&mut self, size: u32) -> bool {
        if self.global_handshake_size == Some(size) {
            return false;
        }
        info!(
            from = ?self.global_handshake_size,
            to = size,
            "handshake size change"
        );
        self.global_handshake_size = Some(size);
        true
    }

    /// A worker connected. It gets the current settings immediately and
    /// every share is recomputed for the new roster size.
    pub fn attach(&mut self, worker_id: WorkerId, tx: mpsc::UnboundedSender<ControlMessage>) {
        self.workers.insert(
            worker_id,
            WorkerHandle {
                tx,
                last_stat: None,
            },
        );
        self.notifier.notify(Notice::WorkerAttached {
            worker_count: self.workers.len(),
        });
        self.publish_settings();
    }

    pub fn detach(&mut self, worker_id: WorkerId) {
        if self.workers.remove(&worker_id).is_none() {
            return;
        }
        if let Some(round) = self.round.as_mut() {
            round.waiting.remove(&worker_id);
        }
        self.notifier.notify(Notice::WorkerDetached {
            worker_id,
            worker_count: self.workers.len(),
        });
        self.publish_settings();
    }

    /// Push the per-worker shares to every attached worker. Shares are
    /// the ceiling division of the global target, so the roster always
    /// covers at least the global value.
    pub fn publish_settings(&mut self) {
        let count = self.workers.len() as u32;
        if count == 0 {
            return;
        }
        let msg = ControlMessage::Setting(SettingMessage {
            channel_id: self.channel_id.clone(),
            pool_limit: self.global_pool_limit.div_ceil(count),
            handshake_size: self.global_handshake_size.map(|s| s.div_ceil(count)),
        });
        debug!(workers = count, "settings push");
        for (worker_id, handle) in &self.workers {
            if handle.tx.send(msg.clone()).is_err() {
                warn!(worker_id, "settings push to dead worker link");
            }
        }
    }

    /// Record one inbound stat report. Returns `true` when this report
    /// completed an active collection round.
    pub fn on_stat(&mut self, worker_id: WorkerId, stat: Stat) -> bool {
        // A report from a restarted roster can re-seed global state the
        // coordinator lost: the echoed share times the roster size
        // recovers the global value.
        if self.global_handshake_size.is_none() {
            if let Some(share) = stat.handshake_size {
                let seeded = share * self.workers.len().max(1) as u32;
                info!(seeded, "handshake size seeded from worker echo");
                self.global_handshake_size = Some(seeded);
            }
        }
        if self.channel_id.is_none() {
            if let Some(id) = &stat.channel_id {
                info!(channel_id = %id, "channel id seeded from worker echo");
                self.channel_id = Some(id.clone());
            }
        }

        if let Some(handle) = self.workers.get_mut(&worker_id) {
            handle.last_stat = Some(stat.clone());
        }

        let Some(round) = self.round.as_mut() else {
            return false;
        };
        if round.waiting.remove(&worker_id) {
            round.received.push(stat);
        }
        round.waiting.is_empty()
    }

    /// Start a collection round: broadcast a ping and wait for reports.
    /// Returns `false` when the roster is empty and the round finished
    /// immediately (an empty round is not a timeout).
    pub fn begin_collection(&mut self) -> bool {
        let waiting: HashSet<WorkerId> = self.workers.keys().copied().collect();
        if waiting.is_empty() {
            self.aggregate = Aggregate::default();
            self.round = None;
            return false;
        }
        for handle in self.workers.values() {
            let _ = handle.tx.send(ControlMessage::Ping);
        }
        self.round = Some(CollectionRound {
            waiting,
            received: Vec::new(),
        });
        true
    }

    pub fn round_active(&self) -> bool {
        self.round.is_some()
    }

    /// Close the active round and sum whatever arrived. Zero responders
    /// inside the window is reported as a collection timeout.
    pub fn finish_round(&mut self) -> Aggregate {
        let round = self.round.take();
        let received = round.map(|r| r.received).unwrap_or_default();
        if received.is_empty() {
            self.notifier.notify(Notice::CollectionTimeout);
        }

        let mut aggregate = Aggregate {
            responders: received.len(),
            ..Aggregate::default()
        };
        for stat in &received {
            aggregate.pool_size += stat.pool_size;
            aggregate.drop_count += stat.drop_count;
            aggregate.ok_count += stat.ok_count;
            aggregate.err_count += stat.err_count;
        }
        self.aggregate = aggregate.clone();
        aggregate
    }

    /// Operator-facing status text from the last finished round.
    pub fn status_text(&self, viewer_count: Option<i64>) -> String {
        let uptime = Utc::now().signed_duration_since(self.started_at);
        format!(
            "channel: {} ({})\nstream: {}\nviewers: {}\npool: {} / {}\nhandshake: {}\nworkers: {} ({} reporting)\ndrops: {} | ok: {} | err: {}\nuptime: {}m",
            self.channel_name.as_deref().unwrap_or("-"),
            self.channel_id.as_deref().unwrap_or("-"),
            self.stream_id.as_deref().unwrap_or("-"),
            viewer_count.map_or_else(|| "-".into(), |v| v.to_string()),
            self.aggregate.pool_size,
            self.global_pool_limit,
            self.global_handshake_size
                .map_or_else(|| "-".into(), |v| v.to_string()),
            self.workers.len(),
            self.aggregate.responders,
            self.aggregate.drop_count,
            self.aggregate.ok_count,
            self.aggregate.err_count,
            uptime.num_minutes(),
        )
    }
}
