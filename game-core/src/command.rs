//! The command handed to an engine for one step.

use serde_json::Value;
use uuid::Uuid;

/// A resolved action request. The dispatcher has already mapped the caller
/// to a seat; engines never see connection details.
#[derive(Debug, Clone)]
pub struct ActionCommand {
    pub user_id: Uuid,
    /// The caller's seat in the room.
    pub seat: u8,
    /// Short action verb (`roll`, `move`, `reveal`, `cashout`).
    pub action: String,
    /// Opaque action arguments, interpreted by the engine only.
    pub payload: Value,
    /// Set for scheduler/admin driven calls. Engines use this to authorize
    /// operations a player may not trigger directly.
    pub system: bool,
}

impl ActionCommand {
    pub fn player(user_id: Uuid, seat: u8, action: impl Into<String>, payload: Value) -> Self {
        Self {
            user_id,
            seat,
            action: action.into(),
            payload,
            system: false,
        }
    }

    /// Reads a small unsigned integer out of the payload bag.
    pub fn payload_u8(&self, key: &str) -> Option<u8> {
        self.payload.get(key)?.as_u64().and_then(|v| u8::try_from(v).ok())
    }
}
