//! The transactional outbox.
//!
//! Domain events are appended to `outbox_message` inside the transaction
//! that produced them and delivered by a background dispatcher, so every
//! committed event is published at least once. Consumers are idempotent
//! (payouts and archival key by room/user), so redelivery is harmless.

use crate::archive::ArchivalService;
use crate::error::AppError;
use crate::registry::RoomRegistry;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

pub const EVENT_PLAYER_UPDATED: &str = "PlayerUpdated";
pub const EVENT_GAME_ENDED: &str = "GameEnded";

/// The pub/sub channel wallet changes are announced on.
pub const PLAYER_UPDATES_CHANNEL: &str = "player_updates";

/// Batch size per dispatch pass.
const BATCH_SIZE: i64 = 100;
/// Rows are parked once they failed this often.
const MAX_ATTEMPTS: i32 = 5;
/// Dispatch pass cadence.
const PROCESS_INTERVAL: Duration = Duration::from_secs(5);
/// Cleanup cadence and retention.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Updated,
    Deleted,
}

/// Payload of a `PlayerUpdated` event, mirrored on the pub/sub channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdatedPayload {
    pub user_id: Uuid,
    pub new_coins: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub change_type: ChangeType,
}

impl PlayerUpdatedPayload {
    pub fn updated(user_id: Uuid, new_coins: i64) -> Self {
        Self {
            user_id,
            new_coins,
            username: None,
            email: None,
            change_type: ChangeType::Updated,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Payload of a `GameEnded` event; everything archival and payouts need.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedPayload {
    pub room_id: String,
    pub game_type: String,
    /// Final state image, hex encoded for the JSON payload.
    pub final_state_hex: String,
    pub seats: HashMap<Uuid, u8>,
    pub winner_user_id: Option<Uuid>,
    pub winner_ranking: Vec<u8>,
    pub total_pot: i64,
    pub started_at: i64,
    pub ended_at: i64,
}

impl GameEndedPayload {
    pub fn final_state_bytes(&self) -> Vec<u8> {
        hex_decode(&self.final_state_hex)
    }
}

pub fn hex_encode(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() * 2);
    for byte in raw {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn hex_decode(raw: &str) -> Vec<u8> {
    raw.as_bytes()
        .chunks(2)
        .filter_map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// Appends an event inside the caller's transaction.
pub async fn enqueue_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_type: &str,
    payload: &str,
) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO outbox_message (event_type, payload) VALUES ($1, $2) RETURNING id",
    )
    .bind(event_type)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

/// Enqueues a `GameEnded` event once per room, no matter how often the
/// terminal transition is observed.
pub async fn enqueue_game_ended(db: &PgPool, payload: &GameEndedPayload) -> Result<(), AppError> {
    let json = serde_json::to_string(payload)?;
    sqlx::query(
        "INSERT INTO outbox_message (event_type, payload)
         SELECT $1, $2
         WHERE NOT EXISTS (
             SELECT 1 FROM outbox_message
             WHERE event_type = $1 AND payload::jsonb ->> 'roomId' = $3
         )",
    )
    .bind(EVENT_GAME_ENDED)
    .bind(&json)
    .bind(&payload.room_id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn mark_processed(db: &PgPool, id: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE outbox_message SET processed_at = now(), last_error = NULL WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// The background dispatcher: picks up unprocessed rows in insertion
/// order, hands them to their consumer and keeps retry bookkeeping.
pub struct OutboxDispatcher {
    db: PgPool,
    registry: RoomRegistry,
    archive: ArchivalService,
    /// Ledger idempotency keys older than this are released.
    idempotency_retention_days: i64,
}

impl OutboxDispatcher {
    pub fn new(
        db: PgPool,
        registry: RoomRegistry,
        archive: ArchivalService,
        idempotency_retention_days: i64,
    ) -> Self {
        Self {
            db,
            registry,
            archive,
            idempotency_retention_days,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(PROCESS_INTERVAL);
        let mut last_cleanup = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    tracing::info!("Outbox dispatcher shutting down.");
                    return;
                }
            }
            if let Err(err) = self.process_batch().await {
                tracing::error!(?err, "Outbox pass failed.");
            }
            if last_cleanup.elapsed() >= CLEANUP_INTERVAL {
                last_cleanup = tokio::time::Instant::now();
                if let Err(err) = self.cleanup().await {
                    tracing::error!(?err, "Outbox cleanup failed.");
                }
            }
        }
    }

    async fn process_batch(&self) -> Result<(), AppError> {
        let rows = sqlx::query(
            "SELECT id, event_type, payload FROM outbox_message
             WHERE processed_at IS NULL AND attempts < $1
             ORDER BY created_at ASC
             LIMIT $2",
        )
        .bind(MAX_ATTEMPTS)
        .bind(BATCH_SIZE)
        .fetch_all(&self.db)
        .await?;

        for row in rows {
            let id: i64 = row.get("id");
            let event_type: String = row.get("event_type");
            let payload: String = row.get("payload");

            match self.deliver(&event_type, &payload).await {
                Ok(()) => {
                    mark_processed(&self.db, id).await?;
                }
                Err(err) => {
                    let mut message = err.to_string();
                    message.truncate(500);
                    tracing::warn!(id, event_type, error = %message, "Outbox delivery failed.");
                    sqlx::query(
                        "UPDATE outbox_message
                         SET attempts = attempts + 1, last_error = $2
                         WHERE id = $1",
                    )
                    .bind(id)
                    .bind(message)
                    .execute(&self.db)
                    .await?;
                }
            }
        }
        Ok(())
    }

    async fn deliver(&self, event_type: &str, payload: &str) -> Result<(), AppError> {
        match event_type {
            EVENT_PLAYER_UPDATED => {
                self.registry.publish(PLAYER_UPDATES_CHANNEL, payload).await
            }
            EVENT_GAME_ENDED => {
                let decoded: GameEndedPayload = serde_json::from_str(payload)?;
                self.archive.settle(&decoded).await
            }
            other => {
                tracing::error!(event_type = other, "Unknown outbox event type.");
                Err(AppError::UnknownEvent(other.to_string()))
            }
        }
    }

    /// Deletes delivered rows and parked rows once they are a week old,
    /// and releases expired ledger idempotency keys.
    async fn cleanup(&self) -> Result<(), AppError> {
        let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);
        sqlx::query(
            "DELETE FROM outbox_message WHERE processed_at IS NOT NULL AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.db)
        .await?;
        sqlx::query("DELETE FROM outbox_message WHERE attempts >= $1 AND created_at < $2")
            .bind(MAX_ATTEMPTS)
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        let key_cutoff = Utc::now() - chrono::Duration::days(self.idempotency_retention_days);
        sqlx::query(
            "UPDATE wallet_transaction SET idempotency_key = NULL
             WHERE idempotency_key IS NOT NULL AND created_at < $1",
        )
        .bind(key_cutoff)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips_state_images() {
        let raw: Vec<u8> = (0..=255).collect();
        assert_eq!(hex_decode(&hex_encode(&raw)), raw);
    }

    #[test]
    fn game_ended_payload_round_trips() {
        let user = Uuid::new_v4();
        let payload = GameEndedPayload {
            room_id: "ab12cd".into(),
            game_type: "ludo".into(),
            final_state_hex: hex_encode(&[1, 2, 3]),
            seats: HashMap::from([(user, 0)]),
            winner_user_id: Some(user),
            winner_ranking: vec![0, 2],
            total_pot: 200,
            started_at: 100,
            ended_at: 160,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"roomId\":\"ab12cd\""));
        let back: GameEndedPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.final_state_bytes(), vec![1, 2, 3]);
        assert_eq!(back.winner_ranking, vec![0, 2]);
    }

    #[test]
    fn player_updated_payload_uses_the_channel_shape() {
        let payload = PlayerUpdatedPayload::updated(Uuid::nil(), 150);
        let json = payload.to_json().unwrap();
        assert!(json.contains("\"newCoins\":150"));
        assert!(json.contains("\"changeType\":\"Updated\""));
        assert!(!json.contains("username"));
    }
}
