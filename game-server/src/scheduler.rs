//! The turn-timeout scheduler.
//!
//! A periodic sweep over every turn-based game: the registry serves the
//! stalest rooms first (activity score at or below now − 5 s, capped at 50
//! per game per tick, so work per tick is bounded and the oldest rooms are
//! never starved). Each room is driven through the engine's timeout path
//! under its lock; a busy lock just means someone else is playing there,
//! so the room is skipped until the next tick.

use crate::app::{AppState, now_secs};
use crate::error::AppError;
use crate::hub::broadcast_step;
use crate::outbox;
use crate::rooms;
use game_core::GameModule;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Rooms older than this many seconds of inactivity are examined.
const STALE_AFTER_SECS: i64 = 5;
/// Per game type, per tick.
const ROOMS_PER_TICK: isize = 50;
/// Lock deadline for the sweep; shorter than the action path on purpose.
const SWEEP_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn run(app: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(app.config.game_loop.tick_interval_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::info!("Turn-timeout scheduler shutting down.");
                return;
            }
        }
        for module in app.modules.turn_based() {
            if let Err(err) = sweep_game(&app, &module).await {
                tracing::error!(?err, game_type = module.game_type(), "Timeout sweep failed.");
            }
        }
    }
}

async fn sweep_game(app: &Arc<AppState>, module: &Arc<dyn GameModule>) -> Result<(), AppError> {
    let game_type = module.game_type();
    let cutoff = now_secs() - STALE_AFTER_SECS;
    let stale = app
        .registry
        .stale_rooms(game_type, cutoff, ROOMS_PER_TICK)
        .await?;

    for room_id in stale {
        // One bad room must not stall the sweep.
        if let Err(err) = sweep_room(app, module, game_type, &room_id).await {
            tracing::warn!(?err, room_id, "Timeout handling failed for room.");
        }
    }
    Ok(())
}

async fn sweep_room(
    app: &Arc<AppState>,
    module: &Arc<dyn GameModule>,
    game_type: &str,
    room_id: &str,
) -> Result<(), AppError> {
    match app.registry.lock_room(room_id, SWEEP_LOCK_TIMEOUT).await {
        Ok(()) => {}
        Err(AppError::LockBusy) => return Ok(()),
        Err(err) => return Err(err),
    }

    let result = sweep_room_locked(app, module, game_type, room_id).await;
    if let Err(err) = app.registry.unlock_room(room_id).await {
        tracing::error!(?err, room_id, "Could not release room lock after sweep.");
    }
    result
}

async fn sweep_room_locked(
    app: &Arc<AppState>,
    module: &Arc<dyn GameModule>,
    game_type: &str,
    room_id: &str,
) -> Result<(), AppError> {
    let Some((state, mut meta)) = app.store.load(game_type, room_id).await? else {
        // The room vanished between listing and lock; drop the index entry.
        app.registry.unregister_room(room_id, game_type).await?;
        return Ok(());
    };

    let step = module.check_timeouts(&state, &meta, now_secs())?;
    // Persist every successful step. The turn clock only moves when the
    // engine actually played; refreshing it on a quiet check would keep
    // pushing the timeout away.
    if step.should_broadcast {
        meta.turn_started_at = now_secs();
    }
    app.store
        .save(game_type, room_id, &step.state, &meta)
        .await?;
    broadcast_step(app, game_type, room_id, &meta, &step).await;
    app.registry
        .touch_activity(game_type, room_id, now_secs())
        .await?;

    if step.terminal {
        let payload = rooms::game_ended_payload(&meta, &step.state, &step);
        outbox::enqueue_game_ended(&app.db, &payload).await?;
    }
    Ok(())
}
