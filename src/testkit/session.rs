//! Recording session links and a scripted connector.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::session::{Frame, SessionConnector, SessionEvent, SessionId, SessionLink};
use crate::token::Credential;

/// Shared log of every frame written to a [`RecordingLink`].
#[derive(Clone, Default)]
pub struct FrameLog(Arc<Mutex<Vec<Frame>>>);

impl FrameLog {
    pub fn all(&self) -> Vec<Frame> {
        self.0.lock().clone()
    }

    pub fn handshakes(&self) -> usize {
        self.count(|f| matches!(f, Frame::ChannelHandshake { .. }))
    }

    pub fn disconnects(&self) -> usize {
        self.count(|f| matches!(f, Frame::ChannelDisconnect { .. }))
    }

    pub fn pings(&self) -> usize {
        self.count(|f| matches!(f, Frame::Ping))
    }

    fn count(&self, predicate: impl Fn(&Frame) -> bool) -> usize {
        self.0.lock().iter().filter(|f| predicate(f)).count()
    }
}

/// A session link that records every frame instead of sending it.
pub struct RecordingLink {
    frames: FrameLog,
}

impl SessionLink for RecordingLink {
    fn send(&self, frame: &Frame) -> Result<()> {
        self.frames.0.lock().push(frame.clone());
        Ok(())
    }
}

pub fn recording_link() -> (Box<dyn SessionLink>, FrameLog) {
    let frames = FrameLog::default();
    (
        Box::new(RecordingLink {
            frames: frames.clone(),
        }),
        frames,
    )
}

/// A ready-made `Opened` event plus the frame log of its link, for
/// injecting sessions straight into a pool.
pub fn open_event(id: SessionId) -> (SessionEvent, FrameLog) {
    let (link, frames) = recording_link();
    (
        SessionEvent::Opened {
            id,
            credential: super::credential(),
            link,
        },
        frames,
    )
}

/// A connector whose opens succeed immediately with recording links.
/// Close events can be injected afterwards through [`ScriptedConnector::close`].
#[derive(Default)]
pub struct ScriptedConnector {
    links: Mutex<HashMap<SessionId, FrameLog>>,
    events: Mutex<HashMap<SessionId, mpsc::UnboundedSender<SessionEvent>>>,
    fail_opens: Mutex<usize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` opens fail with a connection error.
    pub fn fail_next_opens(&self, n: usize) {
        *self.fail_opens.lock() = n;
    }

    pub fn frames(&self, id: SessionId) -> Option<FrameLog> {
        self.links.lock().get(&id).cloned()
    }

    pub fn open_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Simulate the remote closing the given session's transport.
    pub fn close(&self, id: SessionId, reason: &str) {
        if let Some(tx) = self.events.lock().get(&id) {
            let _ = tx.send(SessionEvent::Closed {
                id,
                reason: reason.into(),
            });
        }
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn open(
        &self,
        id: SessionId,
        _credential: &Credential,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SessionLink>> {
        {
            let mut remaining = self.fail_opens.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Connection("scripted open failure".into()));
            }
        }
        let frames = FrameLog::default();
        self.links.lock().insert(id, frames.clone());
        self.events.lock().insert(id, events);
        Ok(Box::new(RecordingLink { frames }))
    }
}
