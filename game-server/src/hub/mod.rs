//! The client hub: broadcast groups and the WebSocket dispatcher.
//!
//! Every room has one broadcast channel; sessions subscribe by spawning a
//! forwarder task from the channel into their outbound queue, so a single
//! connection can follow its seat room, spectated rooms and the lobby at
//! the same time. Broadcasts to a room happen while the sender holds the
//! room lock, which keeps a single room's sequence ordered on the wire.

pub mod connection;
pub mod dispatch;
pub mod session;

use crate::app::{AppState, now_secs};
use game_core::{RoomMeta, StepResult};
use protocol::ServerMessage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

/// Buffer of the per-room and lobby broadcast channels.
const CHANNEL_BUFFER_SIZE: usize = 256;

pub struct Hub {
    groups: Mutex<HashMap<String, broadcast::Sender<Arc<str>>>>,
    lobby: broadcast::Sender<Arc<str>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (lobby, _) = broadcast::channel(CHANNEL_BUFFER_SIZE);
        Self {
            groups: Mutex::new(HashMap::new()),
            lobby,
        }
    }

    /// Subscribes to a room group, creating the channel on first use.
    pub async fn subscribe_room(&self, room_id: &str) -> broadcast::Receiver<Arc<str>> {
        let mut groups = self.groups.lock().await;
        groups
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_BUFFER_SIZE).0)
            .subscribe()
    }

    pub fn subscribe_lobby(&self) -> broadcast::Receiver<Arc<str>> {
        self.lobby.subscribe()
    }

    pub async fn broadcast_room(&self, room_id: &str, message: &ServerMessage) {
        let serialized: Arc<str> = message.to_json().into();
        let groups = self.groups.lock().await;
        if let Some(group) = groups.get(room_id) {
            // An error only means there is no subscriber right now.
            if let Err(err) = group.send(serialized) {
                tracing::trace!(?err, room_id, "Broadcast without subscribers.");
            }
        }
    }

    pub async fn broadcast_lobby(&self, message: &ServerMessage) {
        let serialized: Arc<str> = message.to_json().into();
        if self.lobby.send(serialized).is_err() {
            tracing::trace!("Lobby broadcast without subscribers.");
        }
    }

    /// Drops room channels nobody listens to anymore. Runs from a
    /// watchdog task; groups are recreated on demand.
    pub async fn sweep_idle_groups(&self) {
        let mut groups = self.groups.lock().await;
        groups.retain(|room_id, group| {
            let alive = group.receiver_count() > 0;
            if !alive {
                tracing::debug!(room_id, "Dropping idle room group.");
            }
            alive
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn room_broadcasts_reach_every_subscriber() {
        let hub = Hub::new();
        let mut first = hub.subscribe_room("ab12cd").await;
        let mut second = hub.subscribe_room("ab12cd").await;
        let mut other_room = hub.subscribe_room("ffffff").await;

        hub.broadcast_room("ab12cd", &ServerMessage::RateLimited).await;

        let payload = first.recv().await.unwrap();
        assert!(payload.contains("rateLimited"));
        assert_eq!(second.recv().await.unwrap(), payload);
        assert!(other_room.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcasting_into_the_void_is_harmless() {
        let hub = Hub::new();
        // No group and no subscriber; both calls just return.
        hub.broadcast_room("nobody", &ServerMessage::RateLimited)
            .await;
        hub.broadcast_lobby(&ServerMessage::RateLimited).await;
    }

    #[tokio::test]
    async fn idle_groups_are_swept_and_recreated_on_demand() {
        let hub = Hub::new();
        {
            let _receiver = hub.subscribe_room("ab12cd").await;
            hub.sweep_idle_groups().await;
            assert_eq!(hub.groups.lock().await.len(), 1);
        }
        // The receiver is gone, the group follows on the next sweep.
        hub.sweep_idle_groups().await;
        assert!(hub.groups.lock().await.is_empty());

        let _again = hub.subscribe_room("ab12cd").await;
        assert_eq!(hub.groups.lock().await.len(), 1);
    }
}

/// Broadcasts the result of one engine step: the fresh snapshot when the
/// step asks for one, then every emitted event. The two are independent;
/// an outcome may carry events without a snapshot refresh.
pub async fn broadcast_step(
    app: &Arc<AppState>,
    game_type: &str,
    room_id: &str,
    meta: &RoomMeta,
    step: &StepResult,
) {
    if step.should_broadcast {
        let view: Option<serde_json::Value> = match app.module(game_type) {
            Ok(module) => match module.view(&step.state, meta) {
                Ok(view) => Some(view),
                Err(err) => {
                    tracing::error!(?err, room_id, "Could not render the state view.");
                    None
                }
            },
            Err(err) => {
                tracing::error!(?err, game_type, "Module vanished mid-broadcast.");
                None
            }
        };
        if let Some(view) = view {
            app.hub
                .broadcast_room(
                    room_id,
                    &ServerMessage::GameState {
                        room_id: room_id.to_string(),
                        state: view,
                    },
                )
                .await;
        }
    }

    let ts = now_secs();
    for event in &step.events {
        app.hub
            .broadcast_room(
                room_id,
                &ServerMessage::GameEvent {
                    room_id: room_id.to_string(),
                    name: event.name.to_string(),
                    data: event.data.clone(),
                    ts,
                },
            )
            .await;
    }
}
