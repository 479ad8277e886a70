//! Session wire frames.
//!
//! One-way JSON messages written to the viewer socket. There is no
//! acknowledgment contract; success means the frame was handed to the
//! transport.

use serde::{Deserialize, Serialize};

pub const WATCH_EVENT_NAME: &str = "tracking.user.watch.livestream";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    ChannelHandshake { data: Payload<ChannelRef> },
    ChannelDisconnect { data: Payload<ChannelRef> },
    Ping,
    UserEvent { data: Payload<TrackedEvent> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payload<M> {
    pub message: M,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRef {
    #[serde(rename = "channelId")]
    pub channel_id: String,
}

/// A generic tracked interaction, fired to present viewer activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedEvent {
    pub name: String,
    pub channel_id: String,
    pub livestream_id: String,
}

impl Frame {
    pub fn handshake(channel_id: &str) -> Self {
        Frame::ChannelHandshake {
            data: Payload {
                message: ChannelRef {
                    channel_id: channel_id.into(),
                },
            },
        }
    }

    pub fn disconnect(channel_id: &str) -> Self {
        Frame::ChannelDisconnect {
            data: Payload {
                message: ChannelRef {
                    channel_id: channel_id.into(),
                },
            },
        }
    }

    pub fn ping() -> Self {
        Frame::Ping
    }

    pub fn user_event(name: &str, channel_id: &str, livestream_id: &str) -> Self {
        Frame::UserEvent {
            data: Payload {
                message: TrackedEvent {
                    name: name.into(),
                    channel_id: channel_id.into(),
                    livestream_id: livestream_id.into(),
                },
            },
        }
    }
}
