//! External viewer-count monitoring.
//!
//! The monitor owns the last accepted value and emits a change only when
//! a freshly parsed value differs from it. Parse failures retry after a
//! jittered delay so shards don't hammer the endpoint in lockstep; the
//! caller picks the retry budget. Poll cadence (fast while fresh, slow
//! once stable) is the coordinator runtime's concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::ViewersConfig;
use crate::error::{Error, Result};

/// One observed transition of the viewer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerChange {
    pub value: i64,
    /// Signed difference from the previously accepted value.
    pub delta: i64,
}

/// Reads the current viewer count for a stream.
#[async_trait]
pub trait ViewerFeed: Send + Sync {
    async fn fetch(&self, stream_id: &str) -> Result<i64>;
}

/// HTTP feed against the platform's read endpoint: a GET by stream id
/// returns an array whose first element carries a `viewers` field.
pub struct HttpViewerFeed {
    client: reqwest::Client,
    viewers_url: String,
}

#[derive(Deserialize)]
struct ViewerEntry {
    viewers: i64,
}

impl HttpViewerFeed {
    pub fn new(viewers_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            viewers_url,
        }
    }
}

#[async_trait]
impl ViewerFeed for HttpViewerFeed {
    async fn fetch(&self, stream_id: &str) -> Result<i64> {
        let url = format!("{}?ids[]={}", self.viewers_url, stream_id);
        let entries: Vec<ViewerEntry> = self
            .client
            .get(&url)
            .header("User-Agent", "Mozilla")
            .header("Accept", "application/json")
            .send()
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        entries
            .first()
            .map(|entry| entry.viewers)
            .ok_or_else(|| Error::Parse("empty viewers payload".into()))
    }
}

pub struct ViewerMonitor {
    feed: Box<dyn ViewerFeed>,
    config: ViewersConfig,
    stream_id: Option<String>,
    last_value: Option<i64>,
    last_seen: Option<DateTime<Utc>>,
}

impl ViewerMonitor {
    pub fn new(feed: Box<dyn ViewerFeed>, config: ViewersConfig) -> Self {
        Self {
            feed,
            config,
            stream_id: None,
            last_value: None,
            last_seen: None,
        }
    }

    /// Whether the monitor has a stream to poll.
    pub fn ready(&self) -> bool {
        self.stream_id.is_some()
    }

    /// Point the monitor at a stream; the accepted value resets.
    pub fn set_stream(&mut self, stream_id: String) {
        self.stream_id = Some(stream_id);
        self.last_value = None;
        self.last_seen = None;
    }

    /// Seed the accepted value (typically from channel resolution) so the
    /// first poll compares against it instead of establishing a baseline.
    pub fn seed(&mut self, value: i64) {
        self.last_value = Some(value);
        self.last_seen = Some(Utc::now());
    }

    pub fn last_value(&self) -> Option<i64> {
        self.last_value
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.config.fast_poll_ms)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_millis(self.config.slow_poll_ms)
    }

    /// One poll: fetch with the retry budget, then compare against the
    /// accepted value. `Ok(None)` means unchanged (or baseline-setting).
    pub async fn poll(&mut self) -> Result<Option<ViewerChange>> {
        let Some(stream_id) = self.stream_id.clone() else {
            return Ok(None);
        };

        let mut attempts = 0;
        let value = loop {
            match self.feed.fetch(&stream_id).await {
                Ok(value) => break value,
                Err(e) if attempts < self.config.retry_budget => {
                    attempts += 1;
                    let delay_ms = {
                        let mut rng = rand::thread_rng();
                        rng.gen_range(
                            self.config.retry_jitter_min_ms..=self.config.retry_jitter_max_ms,
                        )
                    };
                    debug!(error = %e, attempts, delay_ms, "viewer fetch failed, retrying");
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        };

        Ok(self.observe(value))
    }

    /// One fetch with no retry, for on-demand reads.
    pub async fn fetch_once(&self) -> Result<i64> {
        let Some(stream_id) = self.stream_id.as_deref() else {
            return Err(Error::Parse("no stream to poll".into()));
        };
        self.feed.fetch(stream_id).await
    }

    fn observe(&mut self, value: i64) -> Option<ViewerChange> {
        let previous = self.last_value.replace(value);
        self.last_seen = Some(Utc::now());
        match previous {
            Some(previous) if previous != value => Some(ViewerChange {
                value,
                delta: value - previous,
            }),
            Some(_) => None,
            // First observation establishes the baseline.
            None => None,
        }
    }
}
