//! Coordinator⇄worker control messages.
//!
//! Everything that crosses the link is data; no error values travel over
//! the boundary. Settings flow down as immutable snapshots
//! (last-write-wins), stats flow up on link-open and on demand.

use serde::{Deserialize, Serialize};

/// Control messages exchanged over a worker link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Coordinator → worker settings push.
    Setting(SettingMessage),
    /// Worker → coordinator stat report.
    Stat(StatMessage),
    /// Coordinator → worker demand for an immediate stat report.
    Ping,
}

/// Per-worker share of the global targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingMessage {
    /// Target channel. Absent while the coordinator has not learned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// This worker's share of the global pool limit.
    pub pool_limit: u32,
    /// This worker's share of the global handshake size. Absent while the
    /// global value is still the unknown sentinel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatMessage {
    pub stat: Stat,
}

/// Snapshot of one worker's pool, produced on demand and never cached.
///
/// `channel_id` and `handshake_size` are echoed back so a coordinator that
/// restarted can re-seed its global state from the first report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Stat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_size: Option<u32>,
    pub pool_size: u32,
    pub drop_count: u64,
    pub ok_count: u64,
    pub err_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_wire_shape() {
        let json = serde_json::to_string(&ControlMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn setting_round_trip() {
        let msg = ControlMessage::Setting(SettingMessage {
            channel_id: Some("15108912".into()),
            pool_limit: 4_000,
            handshake_size: Some(250),
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: ControlMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn setting_omits_unknown_fields() {
        let msg = ControlMessage::Setting(SettingMessage {
            channel_id: None,
            pool_limit: 100,
            handshake_size: None,
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"setting","data":{"pool_limit":100}}"#);
    }

    #[test]
    fn stat_round_trip() {
        let msg = ControlMessage::Stat(StatMessage {
            stat: Stat {
                channel_id: None,
                handshake_size: Some(8),
                pool_size: 42,
                drop_count: 3,
                ok_count: 45,
                err_count: 5,
            },
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: ControlMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
