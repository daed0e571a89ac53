//! The game state store.
//!
//! One Redis hash per room, `game:{gameType}:{roomId}`, with the encoded
//! state image and the JSON metadata as its two fields. Both are written
//! in a single `HSET`, so state and meta can never drift apart. Keys are
//! namespaced by game type so a cluster can shard per game.
//!
//! Typing lives one layer up: the module that owns the game type decodes
//! the image; the store moves opaque bytes.

use crate::error::AppError;
use bytes::Bytes;
use game_core::RoomMeta;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

#[derive(Clone)]
pub struct GameStateStore {
    conn: ConnectionManager,
}

fn room_key(game_type: &str, room_id: &str) -> String {
    format!("game:{game_type}:{room_id}")
}

impl GameStateStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn load(
        &self,
        game_type: &str,
        room_id: &str,
    ) -> Result<Option<(Bytes, RoomMeta)>, AppError> {
        let mut conn = self.conn.clone();
        let (state, meta): (Option<Vec<u8>>, Option<String>) = redis::cmd("HMGET")
            .arg(room_key(game_type, room_id))
            .arg("state")
            .arg("meta")
            .query_async(&mut conn)
            .await?;
        match (state, meta) {
            (Some(state), Some(meta)) => {
                let meta: RoomMeta = serde_json::from_str(&meta)?;
                Ok(Some((Bytes::from(state), meta)))
            }
            _ => Ok(None),
        }
    }

    /// Pipelined bulk load; rooms that are missing or half-written are
    /// skipped.
    pub async fn load_many(
        &self,
        game_type: &str,
        room_ids: &[String],
    ) -> Result<Vec<(String, Bytes, RoomMeta)>, AppError> {
        if room_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for room_id in room_ids {
            pipe.cmd("HMGET")
                .arg(room_key(game_type, room_id))
                .arg("state")
                .arg("meta");
        }
        let rows: Vec<(Option<Vec<u8>>, Option<String>)> = pipe.query_async(&mut conn).await?;

        let mut out = Vec::with_capacity(rows.len());
        for (room_id, (state, meta)) in room_ids.iter().zip(rows) {
            if let (Some(state), Some(meta)) = (state, meta) {
                match serde_json::from_str(&meta) {
                    Ok(meta) => out.push((room_id.clone(), Bytes::from(state), meta)),
                    Err(err) => {
                        tracing::error!(?err, room_id, "Unreadable room meta, skipping.");
                    }
                }
            }
        }
        Ok(out)
    }

    /// Writes state and meta atomically.
    pub async fn save(
        &self,
        game_type: &str,
        room_id: &str,
        state: &[u8],
        meta: &RoomMeta,
    ) -> Result<(), AppError> {
        let meta_json = serde_json::to_string(meta)?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("HSET")
            .arg(room_key(game_type, room_id))
            .arg("state")
            .arg(state)
            .arg("meta")
            .arg(meta_json)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, game_type: &str, room_id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(room_key(game_type, room_id)).await?;
        Ok(())
    }
}
