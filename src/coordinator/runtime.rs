//! Coordinator run loop.
//!
//! One task owns the coordinator state, the channel resolver, and the
//! viewer monitor. Worker links, operator commands, the viewer poll
//! timer, and the collection-round deadline all multiplex into it.

use std::future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::{info, warn};

use crate::error::Result;
use crate::notify::{Notice, Notifier};
use crate::protocol::ControlMessage;
use crate::resolve::ChannelResolver;
use crate::viewers::ViewerMonitor;

use super::{Command, Coordinator, CoordinatorEvent};

async fn maybe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}

pub async fn run(
    mut coordinator: Coordinator,
    resolver: ChannelResolver,
    mut monitor: ViewerMonitor,
    notifier: Arc<dyn Notifier>,
    stat_timeout: Duration,
    mut events: mpsc::UnboundedReceiver<CoordinatorEvent>,
) -> Result<()> {
    let mut round_deadline: Option<Instant> = None;
    let mut poll_timer = Box::pin(sleep(monitor.slow_interval()));

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                CoordinatorEvent::Attached { worker_id, tx } => {
                    coordinator.attach(worker_id, tx);
                }
                CoordinatorEvent::Detached { worker_id } => {
                    coordinator.detach(worker_id);
                }
                CoordinatorEvent::Inbound { worker_id, message } => match message {
                    ControlMessage::Stat(msg) => {
                        if coordinator.on_stat(worker_id, msg.stat) {
                            round_deadline = None;
                            coordinator.finish_round();
                            report_status(&coordinator, &monitor, notifier.as_ref()).await;
                        }
                    }
                    other => warn!(worker_id, ?other, "unexpected worker message"),
                },
                CoordinatorEvent::Command(command) => {
                    let outcome = handle_command(
                        command,
                        &mut coordinator,
                        &resolver,
                        &mut monitor,
                        notifier.as_ref(),
                        stat_timeout,
                        &mut round_deadline,
                    )
                    .await;
                    if outcome.restart_poll {
                        // A freshly adopted stream polls at the fast
                        // cadence until it stabilizes.
                        poll_timer
                            .as_mut()
                            .reset(Instant::now() + monitor.fast_interval());
                    }
                }
            },
            _ = maybe_deadline(round_deadline) => {
                round_deadline = None;
                coordinator.finish_round();
                report_status(&coordinator, &monitor, notifier.as_ref()).await;
            }
            _ = &mut poll_timer => {
                let next = poll_viewers(&mut monitor, notifier.as_ref()).await;
                poll_timer.as_mut().reset(Instant::now() + next);
            }
        }
    }
}

/// One viewer poll; the returned duration is the cadence until the next
/// one, fast after a change and slow once the metric holds still.
async fn poll_viewers(monitor: &mut ViewerMonitor, notifier: &dyn Notifier) -> Duration {
    if !monitor.ready() {
        return monitor.slow_interval();
    }
    match monitor.poll().await {
        Ok(Some(change)) => {
            notifier.notify(Notice::ViewerCountChange {
                value: change.value,
                delta: change.delta,
            });
            monitor.fast_interval()
        }
        Ok(None) => monitor.slow_interval(),
        Err(e) => {
            warn!(error = %e, "viewer poll failed");
            monitor.slow_interval()
        }
    }
}

#[derive(Default)]
struct CommandOutcome {
    restart_poll: bool,
}

async fn handle_command(
    command: Command,
    coordinator: &mut Coordinator,
    resolver: &ChannelResolver,
    monitor: &mut ViewerMonitor,
    notifier: &dyn Notifier,
    stat_timeout: Duration,
    round_deadline: &mut Option<Instant>,
) -> CommandOutcome {
    let mut outcome = CommandOutcome::default();
    let mut collect = false;
    match command {
        Command::Init { channel_name } => match resolver.resolve(&channel_name).await {
            Ok(info) => {
                coordinator.set_channel_name(channel_name);
                coordinator.set_channel_id(Some(info.channel_id));
                coordinator.set_stream_id(Some(info.stream_id.clone()));
                monitor.set_stream(info.stream_id);
                if let Some(count) = info.viewer_count {
                    monitor.seed(count);
                }
                coordinator.publish_settings();
                outcome.restart_poll = true;
                collect = true;
            }
            Err(e) => {
                warn!(%channel_name, error = %e, "channel resolution failed");
                notifier.notify(Notice::ResolutionFailed { channel_name });
            }
        },
        Command::ResizePool(limit) => {
            if coordinator.set_global_pool_limit(limit) {
                coordinator.publish_settings();
                collect = true;
            }
        }
        Command::ResizeHandshake(size) => {
            if coordinator.set_global_handshake_size(size) {
                coordinator.publish_settings();
                collect = true;
            }
        }
        Command::SetChannelId(id) => {
            if coordinator.set_channel_id(Some(id)) {
                coordinator.publish_settings();
            }
        }
        Command::SetStreamId(id) => {
            if coordinator.set_stream_id(Some(id.clone())) {
                monitor.set_stream(id);
                outcome.restart_poll = true;
            }
        }
        Command::ShowChannelId => notifier.notify(Notice::Status {
            text: format!("channel id: {}", coordinator.channel_id().unwrap_or("-")),
        }),
        Command::ShowStreamId => notifier.notify(Notice::Status {
            text: format!("stream id: {}", coordinator.stream_id().unwrap_or("-")),
        }),
        Command::Viewers => match monitor.fetch_once().await {
            Ok(count) => {
                info!(count, "viewer count read");
                notifier.notify(Notice::Status {
                    text: format!("viewer count: {count}"),
                });
            }
            Err(e) => warn!(error = %e, "viewer count read failed"),
        },
        Command::Status => collect = true,
    }

    if collect {
        if coordinator.begin_collection() {
            *round_deadline = Some(Instant::now() + stat_timeout);
        } else {
            report_status(coordinator, monitor, notifier).await;
        }
    }
    outcome
}

async fn report_status(
    coordinator: &Coordinator,
    monitor: &ViewerMonitor,
    notifier: &dyn Notifier,
) {
    let viewer_count = if monitor.ready() {
        monitor.fetch_once().await.ok()
    } else {
        None
    };
    notifier.notify(Notice::Status {
        text: coordinator.status_text(viewer_count),
    });
}
