//! WebSocket session transport.
//!
//! Opens the viewer socket with the platform's upgrade headers, then runs
//! a writer task fed from an unbounded channel and a reader task that
//! answers protocol pings and reports the close. Transport errors are
//! reported but never force a close; the stream ending is the one
//! authoritative close signal.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::token::Credential;

use super::{Frame, SessionConnector, SessionEvent, SessionId, SessionLink};

pub struct WsConnector {
    connect_url: String,
}

impl WsConnector {
    pub fn new(connect_url: String) -> Self {
        Self { connect_url }
    }
}

#[async_trait]
impl SessionConnector for WsConnector {
    async fn open(
        &self,
        id: SessionId,
        credential: &Credential,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SessionLink>> {
        let url = format!("{}?token={}", self.connect_url, credential.token);
        let mut request = url.into_client_request()?;
        {
            let cookie = HeaderValue::from_str(&credential.cookie).map_err(|_| {
                Error::Connection("credential cookie is not a valid header value".into())
            })?;
            let headers = request.headers_mut();
            headers.insert("Cookie", cookie);
            headers.insert("Origin", HeaderValue::from_static("https://kick.com"));
            headers.insert("User-Agent", HeaderValue::from_static("mozilla"));
            headers.insert("Pragma", HeaderValue::from_static("no-cache"));
            headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
            headers.insert(
                "Accept-Language",
                HeaderValue::from_static("en-US,en;q=0.9"),
            );
        }

        let (stream, _response) = connect_async(request).await?;
        debug!(id, "viewer socket open");

        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<Message>();
        let (mut sink, mut source) = stream.split();

        tokio::spawn(async move {
            while let Some(msg) = sink_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let pong_tx = sink_tx.clone();
        tokio::spawn(async move {
            let mut reason = String::from("stream ended");
            while let Some(item) = source.next().await {
                match item {
                    Ok(Message::Ping(payload)) => {
                        let _ = pong_tx.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(frame)) => {
                        reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "remote close".into());
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Not authoritative; the stream ending is. 403-class
                        // rejections show up here during platform throttling.
                        let _ = events.send(SessionEvent::Errored {
                            id,
                            error: e.to_string(),
                        });
                    }
                }
            }
            let _ = events.send(SessionEvent::Closed { id, reason });
        });

        Ok(Box::new(WsLink { outbound: sink_tx }))
    }
}

struct WsLink {
    outbound: mpsc::UnboundedSender<Message>,
}

impl SessionLink for WsLink {
    fn send(&self, frame: &Frame) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        self.outbound
            .send(Message::Text(json))
            .map_err(|_| Error::Connection("session link closed".into()))
    }
}
