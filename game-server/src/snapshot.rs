//! The state snapshot worker.
//!
//! Copies every live room's `(state, meta)` pair into Postgres at a coarse
//! interval. The snapshot is purely a fall-back recovery source after a
//! shared-store loss; nothing reads it at runtime, and rooms that ended
//! between two passes simply stop being refreshed.

use crate::app::AppState;
use crate::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Upper bound of rooms copied per game per pass.
const ROOMS_PER_PASS: isize = 500;

pub async fn run(app: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let interval_secs = app.config.game_loop.snapshot_interval_secs;
    if interval_secs == 0 {
        tracing::info!("Snapshotting disabled.");
        return;
    }
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::info!("Snapshot worker shutting down.");
                return;
            }
        }
        for game_type in app.modules.game_types() {
            if let Err(err) = snapshot_game(&app, game_type).await {
                tracing::error!(?err, game_type, "Snapshot pass failed.");
            }
        }
    }
}

async fn snapshot_game(app: &Arc<AppState>, game_type: &str) -> Result<(), AppError> {
    let room_ids = app.registry.rooms_page(game_type, 0, ROOMS_PER_PASS).await?;
    let rooms = app.store.load_many(game_type, &room_ids).await?;
    for (room_id, state, meta) in rooms {
        let meta_json = serde_json::to_string(&meta)?;
        sqlx::query(
            "INSERT INTO game_state_snapshot (room_id, game_type, state, meta_json, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (room_id) DO UPDATE
                 SET state = EXCLUDED.state,
                     meta_json = EXCLUDED.meta_json,
                     updated_at = now()",
        )
        .bind(&room_id)
        .bind(game_type)
        .bind(state.as_ref())
        .bind(meta_json)
        .execute(&app.db)
        .await?;
    }
    Ok(())
}
