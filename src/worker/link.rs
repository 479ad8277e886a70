//! Reconnecting link to the coordinator.
//!
//! A worker keeps dialing its coordinator forever, with exponential
//! backoff and jitter between attempts. Whenever the link (re)opens the
//! caller sees [`LinkEvent::Opened`] before any message, which is the cue
//! to report a fresh stat snapshot.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::protocol::ControlMessage;

#[derive(Debug)]
pub enum LinkEvent {
    /// The link just (re)connected.
    Opened,
    Message(ControlMessage),
}

#[derive(Debug, Clone)]
pub struct LinkBackoff {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for LinkBackoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

pub struct CoordinatorLink {
    url: String,
    backoff: LinkBackoff,
    current_delay_ms: u64,
    ws: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl CoordinatorLink {
    pub fn new(url: String) -> Self {
        Self::with_backoff(url, LinkBackoff::default())
    }

    pub fn with_backoff(url: String, backoff: LinkBackoff) -> Self {
        let initial = backoff.initial_delay_ms;
        Self {
            url,
            backoff,
            current_delay_ms: initial,
            ws: None,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let base_ms = self.current_delay_ms;
        let jitter_ms = {
            let range = base_ms / 5;
            if range == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=range)
            }
        };
        let next = (base_ms as f64 * self.backoff.multiplier) as u64;
        self.current_delay_ms = next.min(self.backoff.max_delay_ms);
        Duration::from_millis(base_ms + jitter_ms)
    }

    fn reset_backoff(&mut self) {
        self.current_delay_ms = self.backoff.initial_delay_ms;
    }

    /// Dial until connected. The first attempt is immediate; failures
    /// back off exponentially with jitter.
    async fn reconnect(&mut self) {
        loop {
            match connect_async(&self.url).await {
                Ok((ws, _response)) => {
                    info!(url = %self.url, "coordinator link open");
                    self.ws = Some(ws);
                    self.reset_backoff();
                    return;
                }
                Err(e) => {
                    let delay = self.next_delay();
                    warn!(
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "coordinator dial failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Next link event. Reconnects internally whenever the link drops.
    pub async fn next(&mut self) -> LinkEvent {
        loop {
            let Some(ws) = self.ws.as_mut() else {
                self.reconnect().await;
                return LinkEvent::Opened;
            };
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(msg) => return LinkEvent::Message(msg),
                    Err(e) => warn!(error = %e, raw = %text, "unparseable control message"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!("coordinator link closed");
                    self.ws = None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "coordinator link error");
                    self.ws = None;
                }
            }
        }
    }

    /// Fire-and-forget send toward the coordinator.
    pub async fn send(&mut self, msg: &ControlMessage) -> Result<()> {
        let Some(ws) = self.ws.as_mut() else {
            return Err(Error::Connection("coordinator link down".into()));
        };
        let json = serde_json::to_string(msg)?;
        ws.send(Message::Text(json)).await?;
        Ok(())
    }
}
