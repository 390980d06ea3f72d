//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::physics::{ActorClass, VehicleState};
use crate::timesync::TimeSyncUpdate;

/// Identifier of a simulated actor
pub type ActorId = Uuid;

/// Observed state of one actor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub id: ActorId,
    pub class: ActorClass,
    pub state: VehicleState,
}

/// Changes since the previous broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDiff {
    /// Server tick number
    pub tick: u64,
    /// Simulated clock (Unix milliseconds) at this tick
    pub simulated_ms: i64,
    /// Every live actor, changed or not
    pub roster: Vec<ActorId>,
    /// Actors whose state changed
    pub updated: Vec<ActorSnapshot>,
    /// Actors removed since the previous broadcast
    pub removed: Vec<ActorId>,
}

impl WorldDiff {
    pub fn has_changes(&self) -> bool {
        !self.updated.is_empty() || !self.removed.is_empty()
    }
}

/// Full world state persisted to the replay frame log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayFrame {
    pub tick: u64,
    pub simulated_ms: i64,
    pub actors: Vec<ActorSnapshot>,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { client_id: Uuid, server_time: u64 },

    /// Pong response to ping
    Pong { t: u64, server_time: u64 },

    /// World changes (sent at the snapshot rate)
    WorldDiff(WorldDiff),

    /// Clock baseline for the client's interpolation timeline
    TimeSync(TimeSyncUpdate),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_sync_wire_format() {
        let msg = ServerMsg::TimeSync(TimeSyncUpdate {
            server_timestamp_ms: 1_000,
            simulated_timestamp_ms: 990,
            recommended_offset_ms: -10,
        });
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "time_sync");
        assert_eq!(json["server_timestamp_ms"], 1_000);
        assert_eq!(json["recommended_offset_ms"], -10);
    }

    #[test]
    fn test_client_ping_parses() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"ping","t":42}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Ping { t: 42 }));
    }

    #[test]
    fn test_empty_diff_has_no_changes() {
        let diff = WorldDiff {
            tick: 1,
            simulated_ms: 0,
            roster: vec![Uuid::new_v4()],
            updated: Vec::new(),
            removed: Vec::new(),
        };
        assert!(!diff.has_changes());
    }
}
