//! Operator notification seam.
//!
//! The coordinator reports aggregate-level conditions through this trait;
//! the delivery channel behind it (Telegram here, anything chat-shaped in
//! general) stays replaceable. Sends are fire-and-forget.

#[cfg(feature = "telegram")]
pub mod telegram;

use tracing::{info, warn};

/// Conditions worth telling an operator about. Everything is data; no
/// error values cross this boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    WorkerAttached {
        worker_count: usize,
    },
    WorkerDetached {
        worker_id: u64,
        worker_count: usize,
    },
    ViewerCountChange {
        value: i64,
        delta: i64,
    },
    /// A stat collection round elapsed with zero responses.
    CollectionTimeout,
    ResolutionFailed {
        channel_name: String,
    },
    Status {
        text: String,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Renders a notice as operator-facing text.
pub fn render(notice: &Notice) -> String {
    match notice {
        Notice::WorkerAttached { worker_count } => {
            format!("worker attach | curr worker count: {worker_count}")
        }
        Notice::WorkerDetached {
            worker_id,
            worker_count,
        } => format!("worker({worker_id}) detach | curr worker count: {worker_count}"),
        Notice::ViewerCountChange { value, delta } => {
            let sign = if *delta >= 0 { "+" } else { "-" };
            format!("viewer count update: {value} | {sign}{}", delta.abs())
        }
        Notice::CollectionTimeout => "global stat collection timeout triggered".into(),
        Notice::ResolutionFailed { channel_name } => {
            format!("resolution error for \"{channel_name}\"")
        }
        Notice::Status { text } => text.clone(),
    }
}

/// Default notifier: routes notices into the log stream.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::CollectionTimeout | Notice::ResolutionFailed { .. } => {
                warn!("{}", render(&notice));
            }
            _ => info!("{}", render(&notice)),
        }
    }
}
