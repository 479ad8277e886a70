//! Worker-facing WebSocket listener.
//!
//! Each accepted connection becomes one worker in the roster. The
//! connection task owns the socket; the coordinator task only ever sees
//! events and a plain outbound channel, so a slow or dead worker link
//! never blocks coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::protocol::ControlMessage;

use super::{CoordinatorEvent, WorkerId};

/// Accept worker connections forever, funneling their lifecycle and
/// inbound messages into `events`.
pub async fn serve(listener: TcpListener, events: mpsc::UnboundedSender<CoordinatorEvent>) {
    let next_id = Arc::new(AtomicU64::new(1));
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let worker_id = next_id.fetch_add(1, Ordering::Relaxed);
                debug!(worker_id, %peer, "worker connection accepted");
                tokio::spawn(handle_worker(worker_id, stream, events.clone()));
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn handle_worker(
    worker_id: WorkerId,
    stream: TcpStream,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(worker_id, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let (tx, mut outbound) = mpsc::unbounded_channel::<ControlMessage>();
    if events
        .send(CoordinatorEvent::Attached { worker_id, tx })
        .is_err()
    {
        return;
    }
    info!(worker_id, "worker attached");

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "control message serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = source.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str(&text) {
                Ok(message) => {
                    let _ = events.send(CoordinatorEvent::Inbound { worker_id, message });
                }
                Err(e) => warn!(worker_id, error = %e, raw = %text, "unparseable worker message"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(worker_id, error = %e, "worker link error");
                break;
            }
        }
    }

    writer.abort();
    let _ = events.send(CoordinatorEvent::Detached { worker_id });
    info!(worker_id, "worker detached");
}
