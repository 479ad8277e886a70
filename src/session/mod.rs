//! Single viewer session lifecycle.
//!
//! A session wraps one authenticated WebSocket connection. It only ever
//! presents as live after an explicit [`Session::handshake`]; an open
//! transport alone implies nothing. The transport's own close event is
//! authoritative and terminal.

mod ws;
pub mod wire;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::token::Credential;

pub use wire::Frame;
pub use ws::WsConnector;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open (or opening), not presenting.
    Pending,
    /// Handshake issued, presenting as live.
    Connected,
    /// Handshake withdrawn, transport still open.
    Disconnected,
    /// Terminal; the transport closed.
    Closed,
}

/// Lifecycle events reported to the owning pool.
pub enum SessionEvent {
    /// The transport opened; carries the outbound link and the credential
    /// pair that established it.
    Opened {
        id: SessionId,
        credential: Credential,
        link: Box<dyn SessionLink>,
    },
    /// The transport closed. Fires exactly once per session regardless of
    /// cause.
    Closed { id: SessionId, reason: String },
    /// A transport-level error. Does not imply close.
    Errored { id: SessionId, error: String },
}

/// Outbound half of a session transport. Sends are one-way and unbuffered
/// from the caller's point of view; "success" means the frame was handed
/// off, not that the remote accepted it.
pub trait SessionLink: Send {
    fn send(&self, frame: &Frame) -> Result<()>;
}

/// Opens transports for new sessions. Lifecycle events for the opened
/// transport are delivered on the channel passed to [`open`].
///
/// [`open`]: SessionConnector::open
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(
        &self,
        id: SessionId,
        credential: &Credential,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SessionLink>>;
}

pub struct Session {
    id: SessionId,
    channel_id: String,
    state: SessionState,
    credential: Credential,
    link: Box<dyn SessionLink>,
}

impl Session {
    pub fn new(
        id: SessionId,
        channel_id: String,
        credential: Credential,
        link: Box<dyn SessionLink>,
    ) -> Self {
        Self {
            id,
            channel_id,
            state: SessionState::Pending,
            credential,
            link,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Adopt a new channel id for subsequent frames.
    pub fn set_channel(&mut self, channel_id: String) {
        self.channel_id = channel_id;
    }

    /// Present as live. Idempotent at the protocol level; the frame is
    /// sent on every call.
    pub fn handshake(&mut self) -> Result<()> {
        self.state = SessionState::Connected;
        self.link.send(&Frame::handshake(&self.channel_id))
    }

    /// Withdraw the live presentation. The transport stays open.
    pub fn disconnect(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        self.link.send(&Frame::disconnect(&self.channel_id))
    }

    /// Liveness probe; does not alter connection state.
    pub fn ping(&self) -> Result<()> {
        self.link.send(&Frame::ping())
    }

    /// Fire a generic tracked interaction.
    pub fn send_event(&self, name: &str, livestream_id: &str) -> Result<()> {
        self.link
            .send(&Frame::user_event(name, &self.channel_id, livestream_id))
    }

    /// Report watching the given livestream.
    pub fn watch_event(&self, livestream_id: &str) -> Result<()> {
        self.send_event(wire::WATCH_EVENT_NAME, livestream_id)
    }

    /// Mark the terminal state. Only the pool calls this, in response to
    /// the transport's close event.
    pub(crate) fn mark_closed(&mut self) {
        debug!(id = self.id, "session closed");
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit;

    fn session() -> (Session, testkit::session::FrameLog) {
        let (link, frames) = testkit::session::recording_link();
        (
            Session::new(1, "100".into(), testkit::credential(), link),
            frames,
        )
    }

    #[test]
    fn starts_pending() {
        let (session, _) = session();
        assert_eq!(session.state(), SessionState::Pending);
        assert!(!session.connected());
    }

    #[test]
    fn handshake_marks_connected_and_sends_frame() {
        let (mut session, frames) = session();
        session.handshake().unwrap();
        assert!(session.connected());
        assert_eq!(frames.all(), vec![Frame::handshake("100")]);
    }

    #[test]
    fn disconnect_marks_disconnected() {
        let (mut session, frames) = session();
        session.handshake().unwrap();
        session.disconnect().unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            frames.all(),
            vec![Frame::handshake("100"), Frame::disconnect("100")]
        );
    }

    #[test]
    fn ping_leaves_state_alone() {
        let (mut session, frames) = session();
        session.handshake().unwrap();
        session.ping().unwrap();
        assert!(session.connected());
        assert_eq!(frames.all().last(), Some(&Frame::ping()));
    }

    #[test]
    fn channel_change_applies_to_subsequent_frames() {
        let (mut session, frames) = session();
        session.set_channel("200".into());
        session.handshake().unwrap();
        assert_eq!(frames.all(), vec![Frame::handshake("200")]);
    }

    #[test]
    fn watch_event_carries_channel_and_stream() {
        let (session, frames) = session();
        session.watch_event("555").unwrap();
        assert_eq!(
            frames.all(),
            vec![Frame::user_event(wire::WATCH_EVENT_NAME, "100", "555")]
        );
    }
}
