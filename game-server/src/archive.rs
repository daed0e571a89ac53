//! Post-game settlement and archival.
//!
//! Driven by the outbox's `GameEnded` events: pay the room out, persist
//! the immutable archive row, then drop the room from the ephemeral
//! stores. Every step is idempotent (payout keys, unique room id, plain
//! deletes), so the at-least-once outbox can redeliver safely.

use crate::economy::EconomyService;
use crate::error::AppError;
use crate::outbox::GameEndedPayload;
use crate::registry::RoomRegistry;
use crate::state_store::GameStateStore;
use chrono::DateTime;

#[derive(Clone)]
pub struct ArchivalService {
    economy: EconomyService,
    store: GameStateStore,
    registry: RoomRegistry,
}

impl ArchivalService {
    pub fn new(economy: EconomyService, store: GameStateStore, registry: RoomRegistry) -> Self {
        Self {
            economy,
            store,
            registry,
        }
    }

    /// Settles one finished room. Any error leaves the outbox row
    /// unprocessed and the whole settlement runs again later.
    pub async fn settle(&self, ended: &GameEndedPayload) -> Result<(), AppError> {
        self.economy
            .process_game_payouts(
                &ended.room_id,
                ended.total_pot,
                &ended.seats,
                ended.winner_user_id,
                Some(&ended.winner_ranking),
            )
            .await?;

        self.insert_archive(ended).await?;
        self.drop_room(ended).await?;
        tracing::info!(
            room_id = %ended.room_id,
            game_type = %ended.game_type,
            total_pot = ended.total_pot,
            "Room settled and archived."
        );
        Ok(())
    }

    async fn insert_archive(&self, ended: &GameEndedPayload) -> Result<(), AppError> {
        let seats_json = serde_json::to_string(&ended.seats)?;
        let ranking_json = serde_json::to_string(&ended.winner_ranking)?;
        let started_at = DateTime::from_timestamp(ended.started_at, 0).unwrap_or(DateTime::UNIX_EPOCH);
        let ended_at = DateTime::from_timestamp(ended.ended_at, 0).unwrap_or(DateTime::UNIX_EPOCH);

        sqlx::query(
            "INSERT INTO archived_game
                 (room_id, game_type, final_state, player_seats_json, winner_user_id,
                  winner_ranking, total_pot, started_at, ended_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (room_id) DO NOTHING",
        )
        .bind(&ended.room_id)
        .bind(&ended.game_type)
        .bind(ended.final_state_bytes())
        .bind(seats_json)
        .bind(ended.winner_user_id)
        .bind(ranking_json)
        .bind(ended.total_pot)
        .bind(started_at)
        .bind(ended_at)
        .execute(self.economy.db())
        .await?;
        Ok(())
    }

    /// Removes the room from the ephemeral stores. A user who already
    /// moved on to another room keeps their new pointer.
    async fn drop_room(&self, ended: &GameEndedPayload) -> Result<(), AppError> {
        self.store.delete(&ended.game_type, &ended.room_id).await?;
        self.registry
            .unregister_room(&ended.room_id, &ended.game_type)
            .await?;
        for user_id in ended.seats.keys() {
            if let Some(current) = self.registry.user_room(*user_id).await?
                && current == ended.room_id
            {
                self.registry.clear_user_room(*user_id).await?;
            }
        }
        Ok(())
    }
}
