//! Room lifecycle: create from template, join with entry-fee handling,
//! leave with forfeit semantics.
//!
//! Joining runs under the room lock and brackets the seat insert with the
//! entry-fee reservation: reserve -> seat -> commit, compensating with a
//! keyed refund when anything after the reservation fails. Leaving also
//! runs under the lock; room state is only ever mutated while holding it.

use crate::app::{AppState, now_secs};
use crate::error::AppError;
use crate::outbox::{self, GameEndedPayload, hex_encode};
use game_core::{GameModule, RoomMeta, StepResult};
use protocol::ServerMessage;
use rand::Rng;
use sqlx::Row;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lock deadline for player driven lifecycle commands.
pub const LIFECYCLE_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// A named room blueprint from the `room_template` table.
#[derive(Debug, Clone)]
pub struct RoomTemplate {
    pub name: String,
    pub game_type: String,
    pub max_players: u8,
    pub entry_fee: i64,
    pub config: HashMap<String, String>,
}

pub async fn load_templates(db: &PgPool) -> Result<HashMap<String, RoomTemplate>, AppError> {
    let rows = sqlx::query(
        "SELECT name, game_type, max_players, entry_fee, config_json FROM room_template",
    )
    .fetch_all(db)
    .await?;

    let mut templates = HashMap::new();
    for row in rows {
        let name: String = row.get("name");
        let config_json: Option<String> = row.get("config_json");
        let config = match config_json {
            Some(raw) => serde_json::from_str(&raw)?,
            None => HashMap::new(),
        };
        templates.insert(
            name.clone(),
            RoomTemplate {
                name,
                game_type: row.get("game_type"),
                max_players: row.get::<i32, _>("max_players") as u8,
                entry_fee: row.get("entry_fee"),
                config,
            },
        );
    }
    Ok(templates)
}

/// Opaque short room id, 6 to 8 lowercase hex chars.
pub fn new_room_id() -> String {
    let mut rng = rand::rng();
    let len = rng.random_range(6..=8);
    (0..len)
        .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// Builds the settlement payload for a finished room.
pub fn game_ended_payload(meta: &RoomMeta, final_state: &[u8], step: &StepResult) -> GameEndedPayload {
    let winner_user_id = step
        .winner_ranking
        .first()
        .and_then(|seat| meta.user_at_seat(*seat));
    GameEndedPayload {
        room_id: meta.room_id.clone(),
        game_type: meta.game_type.clone(),
        final_state_hex: hex_encode(final_state),
        seats: meta.player_seats.clone(),
        winner_user_id,
        winner_ranking: step.winner_ranking.clone(),
        total_pot: meta.pot,
        started_at: meta.created_at,
        ended_at: now_secs(),
    }
}

/// Creates a fresh room from a template. The creator still joins like
/// everyone else.
pub async fn create_room(
    app: &Arc<AppState>,
    template_name: &str,
) -> Result<RoomMeta, AppError> {
    let template = app
        .templates
        .get(template_name)
        .ok_or_else(|| AppError::UnknownTemplate(template_name.to_string()))?;
    let module = app.module(&template.game_type)?;

    // Collisions on the short id are possible, just retry a few times.
    let mut room_id = new_room_id();
    for _ in 0..5 {
        if app.registry.game_type_of(&room_id).await?.is_none() {
            break;
        }
        room_id = new_room_id();
    }

    let now = now_secs();
    let meta = RoomMeta {
        room_id: room_id.clone(),
        game_type: template.game_type.clone(),
        max_players: template.max_players,
        entry_fee: template.entry_fee,
        config: template.config.clone(),
        is_public: true,
        player_seats: HashMap::new(),
        pot: 0,
        turn_started_at: now,
        created_at: now,
    };

    let seed = rand::rng().random::<u64>();
    let state = module.new_room_state(&meta, seed)?;
    app.store
        .save(&meta.game_type, &room_id, &state, &meta)
        .await?;
    app.registry
        .register_room(&room_id, &meta.game_type, now)
        .await?;
    tracing::info!(room_id, game_type = %meta.game_type, template = template_name, "Room created.");
    Ok(meta)
}

/// Takes a seat in the room. Runs under the room lock.
pub async fn join_room(
    app: &Arc<AppState>,
    user_id: Uuid,
    user_name: &str,
    room_id: &str,
) -> Result<(u8, RoomMeta), AppError> {
    let game_type = app
        .registry
        .game_type_of(room_id)
        .await?
        .ok_or_else(|| AppError::RoomNotFound(room_id.to_string()))?;
    let module = app.module(&game_type)?;

    if app.registry.user_room(user_id).await?.is_some() {
        return Err(AppError::AlreadyInRoom);
    }

    app.registry
        .lock_room(room_id, LIFECYCLE_LOCK_TIMEOUT)
        .await?;
    let result = join_locked(app, &module, user_id, user_name, &game_type, room_id).await;
    if let Err(err) = app.registry.unlock_room(room_id).await {
        tracing::error!(?err, room_id, "Could not release room lock after join.");
    }
    result
}

async fn join_locked(
    app: &Arc<AppState>,
    module: &Arc<dyn GameModule>,
    user_id: Uuid,
    user_name: &str,
    game_type: &str,
    room_id: &str,
) -> Result<(u8, RoomMeta), AppError> {
    let Some((state, mut meta)) = app.store.load(game_type, room_id).await? else {
        return Err(AppError::RoomNotFound(room_id.to_string()));
    };
    if meta.is_full() {
        return Err(AppError::RoomFull);
    }
    let seat = module.assign_seat(&meta).ok_or(AppError::RoomFull)?;

    // Reserve the entry fee before the seat exists; compensate afterwards
    // when the seat insert does not stick.
    let reservation = if meta.entry_fee > 0 {
        Some(
            app.economy
                .reserve_entry_fee(user_id, meta.entry_fee, room_id)
                .await?,
        )
    } else {
        None
    };

    let joined = async {
        meta.claim_seat(user_id, seat)
            .map_err(|_| AppError::RoomFull)?;
        meta.pot += meta.entry_fee;
        let state = module.player_joined(&state, &meta, seat)?;
        app.store.save(game_type, room_id, &state, &meta).await?;
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(err) = joined {
        if let Some(reservation) = &reservation {
            if let Err(refund_err) = app.economy.refund_reservation(reservation).await {
                tracing::error!(?refund_err, room_id, %user_id, "Entry fee refund failed.");
            }
        }
        return Err(err);
    }

    if let Some(reservation) = &reservation {
        if let Err(err) = app.economy.commit_reservation(reservation).await {
            // The debit stands either way; only the ledger label is stale.
            tracing::warn!(?err, room_id, %user_id, "Reservation commit failed.");
        }
    }

    app.registry.set_user_room(user_id, room_id).await?;
    app.registry
        .touch_activity(game_type, room_id, now_secs())
        .await?;

    app.hub
        .broadcast_room(
            room_id,
            &ServerMessage::PlayerJoined {
                room_id: room_id.to_string(),
                user_id,
                user_name: user_name.to_string(),
                seat_index: seat,
            },
        )
        .await;

    Ok((seat, meta))
}

/// Gives the seat up. Shared by the leave command and the grace-window
/// eviction; runs under the room lock with the caller's deadline.
pub async fn leave_room(
    app: &Arc<AppState>,
    user_id: Uuid,
    room_id: &str,
    lock_timeout: Duration,
) -> Result<(), AppError> {
    let Some(game_type) = app.registry.game_type_of(room_id).await? else {
        // The room is already gone (archived); just drop the pointer.
        app.registry.clear_user_room(user_id).await?;
        return Ok(());
    };
    let module = app.module(&game_type)?;

    app.registry.lock_room(room_id, lock_timeout).await?;
    let result = leave_locked(app, &module, user_id, &game_type, room_id).await;
    if let Err(err) = app.registry.unlock_room(room_id).await {
        tracing::error!(?err, room_id, "Could not release room lock after leave.");
    }
    result
}

async fn leave_locked(
    app: &Arc<AppState>,
    module: &Arc<dyn GameModule>,
    user_id: Uuid,
    game_type: &str,
    room_id: &str,
) -> Result<(), AppError> {
    let Some((state, mut meta)) = app.store.load(game_type, room_id).await? else {
        app.registry.clear_user_room(user_id).await?;
        return Ok(());
    };
    let Some(seat) = meta.release_seat(&user_id) else {
        return Err(AppError::NotInRoom);
    };

    let step = module.player_left(&state, &meta, seat)?;
    app.store
        .save(game_type, room_id, &step.state, &meta)
        .await?;
    app.registry.clear_user_room(user_id).await?;
    app.registry
        .touch_activity(game_type, room_id, now_secs())
        .await?;

    app.hub
        .broadcast_room(
            room_id,
            &ServerMessage::PlayerLeft {
                room_id: room_id.to_string(),
                user_id,
            },
        )
        .await;
    crate::hub::broadcast_step(app, game_type, room_id, &meta, &step).await;

    if step.terminal {
        let payload = game_ended_payload(&meta, &step.state, &step);
        outbox::enqueue_game_ended(&app.db, &payload).await?;
    }
    Ok(())
}
