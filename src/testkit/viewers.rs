//! Scripted viewer feed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::viewers::ViewerFeed;

/// Pops scripted fetch results; repeats the last scripted value once the
/// queue is exhausted.
#[derive(Default)]
pub struct ScriptedFeed {
    results: Mutex<VecDeque<Result<i64>>>,
    last: Mutex<Option<i64>>,
    fetches: AtomicU64,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, value: i64) -> Self {
        self.results.lock().push_back(Ok(value));
        self
    }

    pub fn with_failure(self) -> Self {
        self.results
            .lock()
            .push_back(Err(Error::Parse("scripted parse failure".into())));
        self
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ViewerFeed for ScriptedFeed {
    async fn fetch(&self, _stream_id: &str) -> Result<i64> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.results.lock().pop_front() {
            Some(Ok(value)) => {
                *self.last.lock() = Some(value);
                Ok(value)
            }
            Some(Err(e)) => Err(e),
            None => match *self.last.lock() {
                Some(value) => Ok(value),
                None => Err(Error::Parse("feed exhausted".into())),
            },
        }
    }
}
