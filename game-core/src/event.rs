//! Domain events emitted by engine steps.

use serde::Serialize;

/// One event out of an engine step, broadcast to the room group verbatim.
/// The name is a stable PascalCase identifier (`DiceRolled`, `TokenMoved`,
/// ...), the data bag is event specific.
#[derive(Debug, Clone, Serialize)]
pub struct GameEvent {
    pub name: &'static str,
    pub data: serde_json::Value,
}

impl GameEvent {
    pub fn new(name: &'static str, data: serde_json::Value) -> Self {
        Self { name, data }
    }

    /// An event produced on behalf of a player by the timeout path. Carries
    /// the `autoPlay` marker so clients can render it differently.
    pub fn auto(name: &'static str, mut data: serde_json::Value) -> Self {
        if let Some(map) = data.as_object_mut() {
            map.insert("autoPlay".to_string(), serde_json::Value::Bool(true));
        }
        Self { name, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auto_marks_the_payload() {
        let event = GameEvent::auto("DiceRolled", json!({"value": 4, "player": 1}));
        assert_eq!(event.data["autoPlay"], json!(true));
        assert_eq!(event.data["value"], json!(4));
    }
}
