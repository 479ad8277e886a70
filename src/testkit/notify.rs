//! Recording notifier.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::notify::{Notice, Notifier};

/// Collects every notice for later assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn timeouts(&self) -> usize {
        self.notices
            .lock()
            .iter()
            .filter(|n| matches!(n, Notice::CollectionTimeout))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}
