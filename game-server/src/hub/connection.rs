//! Connection lifecycle: caps, the disconnected-grace window and the
//! deferred seat eviction.
//!
//! All bookkeeping lives in the shared registry, so a reconnect may land
//! on a different server instance and still reclaim its seat. The grace
//! slot is consumed with an atomic get-and-clear; exactly one of the
//! reclaim and the eviction wins.

use crate::app::AppState;
use crate::rooms;
use protocol::ServerMessage;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Lock deadline for the deferred disconnect cleanup.
const DISCONNECT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Counts the connection against the per-user cap.
pub async fn register_connection(app: &Arc<AppState>, user_id: Uuid) -> Result<(), &'static str> {
    match app.registry.incr_connections(user_id).await {
        Ok(count) if count > app.config.session.max_connections_per_user as i64 => {
            if let Err(err) = app.registry.decr_connections(user_id).await {
                tracing::warn!(?err, %user_id, "Could not undo the connection count.");
            }
            Err("too many connections")
        }
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::error!(?err, %user_id, "Connection tracking unavailable.");
            Err("connection tracking unavailable")
        }
    }
}

/// Gives a reconnecting user their room back if the grace window is still
/// open. Returns the room to resubscribe.
pub async fn reclaim_grace(app: &Arc<AppState>, user_id: Uuid) -> Option<String> {
    match app.registry.take_grace(user_id).await {
        Ok(Some(room_id)) => {
            tracing::info!(%user_id, room_id, "Player reclaimed their seat.");
            app.hub
                .broadcast_room(
                    &room_id,
                    &ServerMessage::PlayerReconnected {
                        room_id: room_id.clone(),
                        user_id,
                    },
                )
                .await;
            Some(room_id)
        }
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(?err, %user_id, "Grace lookup failed.");
            None
        }
    }
}

/// Runs when a session ends: open the grace window for a seated user and
/// schedule the eviction check.
pub async fn handle_disconnect(app: &Arc<AppState>, user_id: Uuid) {
    if let Err(err) = app.registry.decr_connections(user_id).await {
        tracing::warn!(?err, %user_id, "Could not decrement the connection count.");
    }

    let room_id = match app.registry.user_room(user_id).await {
        Ok(Some(room_id)) => room_id,
        Ok(None) => return,
        Err(err) => {
            tracing::error!(?err, %user_id, "Room lookup on disconnect failed.");
            return;
        }
    };

    let grace = app.config.session.reconnection_grace_period_seconds;
    if let Err(err) = app.registry.set_grace(user_id, &room_id, grace + 1).await {
        tracing::error!(?err, %user_id, "Could not open the grace window.");
        return;
    }
    app.hub
        .broadcast_room(
            &room_id,
            &ServerMessage::PlayerDisconnected {
                room_id: room_id.clone(),
                user_id,
                grace_seconds: grace,
            },
        )
        .await;

    let app = app.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(grace + 2)).await;
        evict_if_still_gone(&app, user_id).await;
    });
}

/// The deferred check: if the grace slot is still there the user never
/// came back, so the seat is released. The disconnect lock keeps this
/// from racing a reconnect that is being processed right now.
async fn evict_if_still_gone(app: &Arc<AppState>, user_id: Uuid) {
    match app
        .registry
        .lock_disconnect(user_id, DISCONNECT_LOCK_TIMEOUT_MS)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(%user_id, "Disconnect cleanup already in progress elsewhere.");
            return;
        }
        Err(err) => {
            tracing::error!(?err, %user_id, "Could not take the disconnect lock.");
            return;
        }
    }

    match app.registry.take_grace(user_id).await {
        Ok(Some(room_id)) => {
            tracing::info!(%user_id, room_id, "Grace expired, releasing the seat.");
            if let Err(err) =
                rooms::leave_room(app, user_id, &room_id, Duration::from_secs(5)).await
            {
                tracing::error!(?err, %user_id, room_id, "Grace eviction failed.");
            }
        }
        Ok(None) => {} // Reclaimed in time.
        Err(err) => tracing::error!(?err, %user_id, "Grace check failed."),
    }

    if let Err(err) = app.registry.unlock_disconnect(user_id).await {
        tracing::warn!(?err, %user_id, "Could not release the disconnect lock.");
    }
}
