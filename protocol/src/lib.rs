//! The wire protocol between game clients and the server.
//! Every frame on the WebSocket is one JSON document, tagged with a `type`
//! field. The same types are used on the server and on any native client.
//!
//! The general flow of a session is:
//! Client -> Server: [`ClientCommand::Authenticate`] as the very first frame.
//! Server -> Client: [`ServerMessage::Authenticated`] or a close.
//! Afterwards the client issues commands and the server answers with the
//! matching result message plus any number of pushed room messages.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything a client may send to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Must be the first frame of a session. The token is issued by the
    /// external auth service; the server only verifies it.
    Authenticate {
        user_id: Uuid,
        user_name: String,
        token: String,
    },
    /// Opens a new room from a named template.
    CreateRoom { template: String },
    /// Takes a seat in an existing room. The entry fee is reserved before
    /// the seat is assigned.
    JoinRoom { room_id: String },
    /// Gives up the seat in the room.
    LeaveRoom { room_id: String },
    /// A game action. The payload is opaque to the server core and handed
    /// to the game engine as-is. The optional command id makes retries safe.
    PerformAction {
        room_id: String,
        action: String,
        #[serde(default)]
        payload: serde_json::Value,
        #[serde(default)]
        command_id: Option<String>,
    },
    /// Asks for a full state snapshot of the room.
    GetState { room_id: String },
    /// Asks which actions are currently legal for the caller.
    GetLegalActions { room_id: String },
    /// Relays a chat line to the room.
    SendChatMessage { room_id: String, message: String },
    /// Subscribes to a room's broadcasts without taking a seat.
    Spectate { room_id: String },
    /// Drops the spectator subscription again.
    StopSpectating { room_id: String },
}

/// One domain event inside a [`ServerMessage::ActionResult`] answer. The
/// same events also go out to the room group as
/// [`ServerMessage::GameEvent`] pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    pub name: String,
    pub data: serde_json::Value,
}

/// Everything the server may push or answer to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// The handshake went through, the session is live.
    Authenticated { user_id: Uuid },
    /// Answer to [`ClientCommand::CreateRoom`].
    RoomCreated {
        success: bool,
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Answer to [`ClientCommand::JoinRoom`].
    RoomJoined {
        success: bool,
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        seat_index: Option<u8>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Answer to [`ClientCommand::PerformAction`]. Carries the fresh state
    /// snapshot and the emitted events so the caller does not depend on
    /// the room broadcast arriving.
    ActionResult {
        action: String,
        success: bool,
        should_broadcast: bool,
        #[serde(default)]
        new_state: Option<serde_json::Value>,
        #[serde(default)]
        events: Vec<ActionEvent>,
        #[serde(default)]
        error: Option<String>,
    },
    /// A full authoritative state snapshot of a room. Sent as the answer to
    /// [`ClientCommand::GetState`] and broadcast after every state change.
    GameState {
        room_id: String,
        state: serde_json::Value,
    },
    /// One domain event out of an engine step (dice rolled, token moved, ...).
    GameEvent {
        room_id: String,
        name: String,
        data: serde_json::Value,
        ts: i64,
    },
    /// Answer to [`ClientCommand::GetLegalActions`].
    LegalActions {
        room_id: String,
        actions: Vec<String>,
    },
    /// Someone took a seat in the room.
    PlayerJoined {
        room_id: String,
        user_id: Uuid,
        user_name: String,
        seat_index: u8,
    },
    /// Someone gave up their seat (voluntarily or after the grace window).
    PlayerLeft { room_id: String, user_id: Uuid },
    /// A seated player lost the connection; the seat is held for the grace
    /// window before it is released.
    PlayerDisconnected {
        room_id: String,
        user_id: Uuid,
        grace_seconds: u64,
    },
    /// The disconnected player came back within the grace window.
    PlayerReconnected { room_id: String, user_id: Uuid },
    /// A relayed chat line.
    ChatMessage {
        room_id: String,
        user_id: Uuid,
        user_name: String,
        message: String,
        ts: i64,
    },
    /// An action was rejected. Sent only to the caller, never broadcast.
    ActionError { action: String, message: String },
    /// The caller exceeded the per-minute command budget.
    RateLimited,
    /// A protocol level problem (bad frame, unauthenticated command, ...).
    ProtocolError { message: String },
}

impl ServerMessage {
    /// Serializes the message for a text frame. Infallible for the enum as
    /// declared, so a serialization error is reduced to an empty object.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perform_action_round_trips() {
        let cmd = ClientCommand::PerformAction {
            room_id: "a3f9c2".into(),
            action: "move".into(),
            payload: serde_json::json!({"tokenIndex": 2}),
            command_id: Some("cmd-17".into()),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"performAction\""));
        assert!(json.contains("\"commandId\":\"cmd-17\""));
        let back: ClientCommand = serde_json::from_str(&json).unwrap();
        match back {
            ClientCommand::PerformAction {
                room_id, action, ..
            } => {
                assert_eq!(room_id, "a3f9c2");
                assert_eq!(action, "move");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn payload_and_command_id_are_optional() {
        let raw = r#"{"type":"performAction","roomId":"b4","action":"roll"}"#;
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            ClientCommand::PerformAction {
                payload,
                command_id,
                ..
            } => {
                assert!(payload.is_null());
                assert!(command_id.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn action_results_carry_state_and_events() {
        let msg = ServerMessage::ActionResult {
            action: "roll".into(),
            success: true,
            should_broadcast: true,
            new_state: Some(serde_json::json!({"turnId": 3})),
            events: vec![ActionEvent {
                name: "DiceRolled".into(),
                data: serde_json::json!({"value": 6, "player": 0}),
            }],
            error: None,
        };
        let json = msg.to_json();
        assert!(json.contains("\"newState\":{\"turnId\":3}"));
        assert!(json.contains("\"name\":\"DiceRolled\""));

        // Older answers without the fields still parse.
        let raw = r#"{"type":"actionResult","action":"roll","success":false,
                      "shouldBroadcast":false,"error":"not your turn"}"#;
        let back: ServerMessage = serde_json::from_str(raw).unwrap();
        match back {
            ServerMessage::ActionResult {
                new_state, events, ..
            } => {
                assert!(new_state.is_none());
                assert!(events.is_empty());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn server_messages_use_camel_case_tags() {
        let msg = ServerMessage::PlayerDisconnected {
            room_id: "c1d2e3".into(),
            user_id: Uuid::nil(),
            grace_seconds: 15,
        };
        let json = msg.to_json();
        assert!(json.contains("\"type\":\"playerDisconnected\""));
        assert!(json.contains("\"graceSeconds\":15"));
    }
}
