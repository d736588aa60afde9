use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::state::{GameState, Player};
use crate::shared::PeerId;

/// Message taxonomy for peer-to-peer state replication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    // Joiner -> host
    JoinRequest,

    // Host -> joiner
    JoinResponse,

    // Host -> everyone
    PlayerJoined,
    GameStart,

    // Any peer -> everyone
    PlayerLeft,
    PlayerReady,
    StateSync,
}

/// Wire envelope carried over the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub sender_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequestPayload {
    pub name: String,
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponsePayload {
    pub success: bool,
    /// Full state snapshot with the new player seated.
    pub game: Option<GameState>,
    /// The peer this response is addressed to.
    pub target_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerJoinedPayload {
    pub player: Player,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerLeftPayload {
    pub player_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerReadyPayload {
    pub player_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStartPayload {
    pub game: GameState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSyncPayload {
    pub game: GameState,
}

/// Helper constructors for envelopes
impl Envelope {
    pub fn new(message_type: MessageType, payload: serde_json::Value, sender_id: PeerId) -> Self {
        Self {
            message_type,
            payload,
            timestamp: Utc::now(),
            sender_id,
        }
    }

    /// Create a JOIN_REQUEST envelope
    pub fn join_request(name: String, peer_id: PeerId) -> Self {
        let payload = JoinRequestPayload {
            name,
            peer_id: peer_id.clone(),
        };
        Self::new(
            MessageType::JoinRequest,
            serde_json::to_value(payload).unwrap(),
            peer_id,
        )
    }

    /// Create a JOIN_RESPONSE envelope
    pub fn join_response(
        success: bool,
        game: Option<GameState>,
        target_id: PeerId,
        sender_id: PeerId,
    ) -> Self {
        let payload = JoinResponsePayload {
            success,
            game,
            target_id,
        };
        Self::new(
            MessageType::JoinResponse,
            serde_json::to_value(payload).unwrap(),
            sender_id,
        )
    }

    /// Create a PLAYER_JOINED envelope
    pub fn player_joined(player: Player, sender_id: PeerId) -> Self {
        let payload = PlayerJoinedPayload { player };
        Self::new(
            MessageType::PlayerJoined,
            serde_json::to_value(payload).unwrap(),
            sender_id,
        )
    }

    /// Create a PLAYER_LEFT envelope
    pub fn player_left(player_id: PeerId, sender_id: PeerId) -> Self {
        let payload = PlayerLeftPayload { player_id };
        Self::new(
            MessageType::PlayerLeft,
            serde_json::to_value(payload).unwrap(),
            sender_id,
        )
    }

    /// Create a PLAYER_READY envelope
    pub fn player_ready(player_id: PeerId, sender_id: PeerId) -> Self {
        let payload = PlayerReadyPayload { player_id };
        Self::new(
            MessageType::PlayerReady,
            serde_json::to_value(payload).unwrap(),
            sender_id,
        )
    }

    /// Create a GAME_START envelope
    pub fn game_start(game: GameState, sender_id: PeerId) -> Self {
        let payload = GameStartPayload { game };
        Self::new(
            MessageType::GameStart,
            serde_json::to_value(payload).unwrap(),
            sender_id,
        )
    }

    /// Create a STATE_SYNC envelope
    pub fn state_sync(game: GameState, sender_id: PeerId) -> Self {
        let payload = StateSyncPayload { game };
        Self::new(
            MessageType::StateSync,
            serde_json::to_value(payload).unwrap(),
            sender_id,
        )
    }
}
