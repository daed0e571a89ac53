//! The command dispatcher.
//!
//! Every inbound command passes the rate limiter first. Game actions then
//! run the full pipeline: duplicate-command check, room resolution, room
//! lock, engine step, persist, broadcast, activity touch, and on a
//! terminal step the settlement hand-off to the outbox. The lock is
//! released on every exit path; state is saved only when the engine
//! succeeded, so a failed action leaves no trace.

use crate::app::{AppState, now_secs};
use crate::error::AppError;
use crate::hub::{broadcast_step, session::Session};
use crate::outbox;
use crate::rooms::{self, LIFECYCLE_LOCK_TIMEOUT};
use game_core::ActionCommand;
use protocol::{ActionEvent, ClientCommand, ServerMessage};
use std::sync::Arc;

pub async fn handle_command(app: &Arc<AppState>, session: &mut Session, command: ClientCommand) {
    // Backpressure before anything else.
    match app
        .registry
        .rate_limit_allow(
            session.user_id,
            now_secs(),
            app.config.rate_limit.messages_per_minute,
        )
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            session.send(&ServerMessage::RateLimited).await;
            return;
        }
        Err(err) => {
            // Best effort: an unreachable limiter must not take the
            // platform down with it.
            tracing::warn!(?err, "Rate limiter unavailable.");
        }
    }

    match command {
        ClientCommand::Authenticate { .. } => {
            session
                .send(&ServerMessage::ProtocolError {
                    message: "already authenticated".into(),
                })
                .await;
        }
        ClientCommand::CreateRoom { template } => create_room(app, session, &template).await,
        ClientCommand::JoinRoom { room_id } => join_room(app, session, &room_id).await,
        ClientCommand::LeaveRoom { room_id } => leave_room(app, session, &room_id).await,
        ClientCommand::PerformAction {
            room_id,
            action,
            payload,
            command_id,
        } => perform_action(app, session, &room_id, &action, payload, command_id).await,
        ClientCommand::GetState { room_id } => get_state(app, session, &room_id).await,
        ClientCommand::GetLegalActions { room_id } => legal_actions(app, session, &room_id).await,
        ClientCommand::SendChatMessage { room_id, message } => {
            send_chat(app, session, &room_id, message).await
        }
        ClientCommand::Spectate { room_id } => spectate(app, session, &room_id).await,
        ClientCommand::StopSpectating { room_id } => {
            session.unsubscribe(&room_id);
        }
    }
}

async fn create_room(app: &Arc<AppState>, session: &Session, template: &str) {
    match rooms::create_room(app, template).await {
        Ok(meta) => {
            session
                .send(&ServerMessage::RoomCreated {
                    success: true,
                    room_id: Some(meta.room_id),
                    error: None,
                })
                .await;
        }
        Err(err) => {
            tracing::debug!(?err, template, "Room creation rejected.");
            session
                .send(&ServerMessage::RoomCreated {
                    success: false,
                    room_id: None,
                    error: Some(err.client_message()),
                })
                .await;
        }
    }
}

async fn join_room(app: &Arc<AppState>, session: &mut Session, room_id: &str) {
    // Subscribe first so the joiner sees their own PlayerJoined.
    session.subscribe(&app.hub, room_id).await;
    match rooms::join_room(app, session.user_id, &session.user_name, room_id).await {
        Ok((seat_index, _meta)) => {
            session
                .send(&ServerMessage::RoomJoined {
                    success: true,
                    room_id: Some(room_id.to_string()),
                    seat_index: Some(seat_index),
                    error: None,
                })
                .await;
        }
        Err(err) => {
            session.unsubscribe(room_id);
            session
                .send(&ServerMessage::RoomJoined {
                    success: false,
                    room_id: Some(room_id.to_string()),
                    seat_index: None,
                    error: Some(err.client_message()),
                })
                .await;
        }
    }
}

async fn leave_room(app: &Arc<AppState>, session: &mut Session, room_id: &str) {
    match rooms::leave_room(app, session.user_id, room_id, LIFECYCLE_LOCK_TIMEOUT).await {
        Ok(()) => session.unsubscribe(room_id),
        Err(err) => {
            session
                .send(&ServerMessage::ActionError {
                    action: "leaveRoom".into(),
                    message: err.client_message(),
                })
                .await;
        }
    }
}

async fn perform_action(
    app: &Arc<AppState>,
    session: &Session,
    room_id: &str,
    action: &str,
    payload: serde_json::Value,
    command_id: Option<String>,
) {
    // Duplicate retries are dropped silently; the first delivery already
    // answered.
    if let Some(command_id) = &command_id {
        match app.registry.command_seen(command_id).await {
            Ok(true) => {
                tracing::debug!(command_id, "Dropping duplicate command.");
                return;
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(?err, "Command dedup check unavailable."),
        }
    }

    let game_type = match app.registry.game_type_of(room_id).await {
        Ok(Some(game_type)) => game_type,
        Ok(None) => {
            send_action_error(session, action, "room not found").await;
            return;
        }
        Err(err) => {
            tracing::error!(?err, room_id, "Registry lookup failed.");
            send_action_error(session, action, "internal error").await;
            return;
        }
    };

    if let Err(err) = app
        .registry
        .lock_room(room_id, LIFECYCLE_LOCK_TIMEOUT)
        .await
    {
        let message = match err {
            AppError::LockBusy => {
                // The action never ran, so it does not count against the
                // caller's budget.
                if let Err(err) = app
                    .registry
                    .rate_limit_refund(session.user_id, now_secs())
                    .await
                {
                    tracing::debug!(?err, "Rate limit refund failed.");
                }
                "room is busy, retry"
            }
            _ => "internal error",
        };
        send_action_error(session, action, message).await;
        return;
    }

    let result = locked_action(app, session, &game_type, room_id, action, payload).await;
    if let Err(err) = app.registry.unlock_room(room_id).await {
        tracing::error!(?err, room_id, "Could not release room lock.");
    }

    match result {
        Ok(true) => {
            // Only a processed action consumes the command id.
            if let Some(command_id) = &command_id {
                if let Err(err) = app.registry.mark_command(command_id).await {
                    tracing::warn!(?err, command_id, "Could not mark command processed.");
                }
            }
        }
        Ok(false) => {}
        Err(err) => {
            tracing::error!(?err, room_id, action, "Action pipeline failed.");
            send_action_error(session, action, "internal error").await;
        }
    }
}

/// The engine step under the lock. Returns whether the action succeeded.
async fn locked_action(
    app: &Arc<AppState>,
    session: &Session,
    game_type: &str,
    room_id: &str,
    action: &str,
    payload: serde_json::Value,
) -> Result<bool, AppError> {
    let module = app.module(game_type)?;
    let Some((state, mut meta)) = app.store.load(game_type, room_id).await? else {
        send_action_error(session, action, "room not found").await;
        return Ok(false);
    };
    let Some(seat) = meta.seat_of(&session.user_id) else {
        send_action_error(session, action, "not seated in this room").await;
        return Ok(false);
    };

    let command = ActionCommand::player(session.user_id, seat, action, payload);
    let step = match module.execute(&state, &meta, &command) {
        Ok(step) => step,
        Err(game_core::ModuleError::Action(failure)) => {
            // Expected rejection: tell the caller, touch nothing.
            send_action_error(session, action, &failure.to_string()).await;
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    };

    // Every successful step persists; only the snapshot broadcast and the
    // turn clock follow the broadcast flag (a no-op must not push the
    // timeout out).
    if step.should_broadcast {
        meta.turn_started_at = now_secs();
    }
    app.store
        .save(game_type, room_id, &step.state, &meta)
        .await?;

    // The caller gets the new state and the events in the direct answer;
    // the room broadcast is a courtesy for everyone else.
    let new_state = match module.view(&step.state, &meta) {
        Ok(view) => Some(view),
        Err(err) => {
            tracing::error!(?err, room_id, "Could not render the state view.");
            None
        }
    };
    let events = step
        .events
        .iter()
        .map(|event| ActionEvent {
            name: event.name.to_string(),
            data: event.data.clone(),
        })
        .collect();
    session
        .send(&ServerMessage::ActionResult {
            action: action.to_string(),
            success: true,
            should_broadcast: step.should_broadcast,
            new_state,
            events,
            error: None,
        })
        .await;
    broadcast_step(app, game_type, room_id, &meta, &step).await;
    app.registry
        .touch_activity(game_type, room_id, now_secs())
        .await?;

    if step.terminal {
        let payload = rooms::game_ended_payload(&meta, &step.state, &step);
        outbox::enqueue_game_ended(&app.db, &payload).await?;
    }
    Ok(true)
}

async fn send_action_error(session: &Session, action: &str, message: &str) {
    session
        .send(&ServerMessage::ActionError {
            action: action.to_string(),
            message: message.to_string(),
        })
        .await;
}

async fn get_state(app: &Arc<AppState>, session: &Session, room_id: &str) {
    match room_view(app, room_id).await {
        Ok(Some(view)) => {
            session
                .send(&ServerMessage::GameState {
                    room_id: room_id.to_string(),
                    state: view,
                })
                .await;
        }
        Ok(None) => send_action_error(session, "getState", "room not found").await,
        Err(err) => {
            tracing::error!(?err, room_id, "State lookup failed.");
            send_action_error(session, "getState", "internal error").await;
        }
    }
}

async fn room_view(
    app: &Arc<AppState>,
    room_id: &str,
) -> Result<Option<serde_json::Value>, AppError> {
    let Some(game_type) = app.registry.game_type_of(room_id).await? else {
        return Ok(None);
    };
    let module = app.module(&game_type)?;
    let Some((state, meta)) = app.store.load(&game_type, room_id).await? else {
        return Ok(None);
    };
    Ok(Some(module.view(&state, &meta)?))
}

async fn legal_actions(app: &Arc<AppState>, session: &Session, room_id: &str) {
    let result: Result<Option<Vec<String>>, AppError> = async {
        let Some(game_type) = app.registry.game_type_of(room_id).await? else {
            return Ok(None);
        };
        let module = app.module(&game_type)?;
        let Some((state, meta)) = app.store.load(&game_type, room_id).await? else {
            return Ok(None);
        };
        let actions = match meta.seat_of(&session.user_id) {
            Some(seat) => module.legal_actions(&state, seat)?,
            // Spectators have nothing to play.
            None => Vec::new(),
        };
        Ok(Some(actions))
    }
    .await;

    match result {
        Ok(Some(actions)) => {
            session
                .send(&ServerMessage::LegalActions {
                    room_id: room_id.to_string(),
                    actions,
                })
                .await;
        }
        Ok(None) => send_action_error(session, "getLegalActions", "room not found").await,
        Err(err) => {
            tracing::error!(?err, room_id, "Legal action lookup failed.");
            send_action_error(session, "getLegalActions", "internal error").await;
        }
    }
}

async fn send_chat(app: &Arc<AppState>, session: &Session, room_id: &str, message: String) {
    // Chat is relayed, never interpreted; only membership is checked.
    if !session.is_subscribed(room_id) {
        send_action_error(session, "sendChatMessage", "not in this room").await;
        return;
    }
    app.hub
        .broadcast_room(
            room_id,
            &ServerMessage::ChatMessage {
                room_id: room_id.to_string(),
                user_id: session.user_id,
                user_name: session.user_name.clone(),
                message,
                ts: now_secs(),
            },
        )
        .await;
}

async fn spectate(app: &Arc<AppState>, session: &mut Session, room_id: &str) {
    match app.registry.game_type_of(room_id).await {
        Ok(Some(_)) => session.subscribe(&app.hub, room_id).await,
        Ok(None) => send_action_error(session, "spectate", "room not found").await,
        Err(err) => {
            tracing::error!(?err, room_id, "Registry lookup failed.");
            send_action_error(session, "spectate", "internal error").await;
        }
    }
}
