//! Scripted token source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::token::{Credential, TokenSource};

/// Pops scripted results per acquisition; defaults to success when the
/// script is exhausted. Counts every attempt.
#[derive(Default)]
pub struct ScriptedTokens {
    results: Mutex<VecDeque<Result<Credential>>>,
    attempts: AtomicU64,
}

impl ScriptedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ok(self, n: usize) -> Self {
        for _ in 0..n {
            self.results.lock().push_back(Ok(super::credential()));
        }
        self
    }

    pub fn with_err(self, n: usize) -> Self {
        for _ in 0..n {
            self.results
                .lock()
                .push_back(Err(Error::Acquisition { status: 500 }));
        }
        self
    }

    /// Total acquisition attempts issued so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for ScriptedTokens {
    async fn acquire(&self, n: usize) -> Vec<Result<Credential>> {
        self.attempts.fetch_add(n as u64, Ordering::SeqCst);
        let mut results = self.results.lock();
        (0..n)
            .map(|_| results.pop_front().unwrap_or_else(|| Ok(super::credential())))
            .collect()
    }
}
