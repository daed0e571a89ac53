//! The room registry: shared O(1) indices over rooms and users.
//!
//! Everything in here lives in Redis so several server instances
//! coordinate through the same view; process-local maps are never
//! authoritative. Key surface:
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `room:{roomId}:game` | roomId -> gameType |
//! | `rooms:{game}:created` | zset, score = creation time, for paged listing |
//! | `rooms:{game}:activity` | zset, score = last activity, for the timeout sweep |
//! | `user:{userId}:room` | the user's current room |
//! | `user:{userId}:conns` | live connection count |
//! | `user:{userId}:grace` | disconnected-grace slot, expires on its own |
//! | `rl:{userId}:{minute}` | rate-limit bucket, expires after a minute |
//! | `lock:room:{roomId}` | distributed room lock (SET NX PX) |
//! | `lock:disconnect:{userId}` | guards the deferred disconnect cleanup |
//! | `cmd:{commandId}` | processed-command marker, 5 minute TTL |
//!
//! All operations are best effort against the shared store: a transient
//! failure surfaces as an error and callers must treat lock acquisition as
//! possibly failed without holding the lock.

use crate::error::AppError;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use uuid::Uuid;

/// TTL a room lock survives without release, so a crashed holder frees it.
const ROOM_LOCK_TTL_MS: u64 = 10_000;
/// Pause between lock acquisition attempts.
const LOCK_RETRY_MS: u64 = 50;
/// Processed-command markers expire after five minutes.
const COMMAND_TTL_SECS: i64 = 300;

#[derive(Clone)]
pub struct RoomRegistry {
    conn: ConnectionManager,
}

impl RoomRegistry {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    // ---- room indices ----

    pub async fn register_room(
        &self,
        room_id: &str,
        game_type: &str,
        now: i64,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .set(format!("room:{room_id}:game"), game_type)
            .zadd(format!("rooms:{game_type}:created"), room_id, now)
            .zadd(format!("rooms:{game_type}:activity"), room_id, now)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn unregister_room(&self, room_id: &str, game_type: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(format!("room:{room_id}:game"))
            .zrem(format!("rooms:{game_type}:created"), room_id)
            .zrem(format!("rooms:{game_type}:activity"), room_id)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn game_type_of(&self, room_id: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(format!("room:{room_id}:game")).await?)
    }

    /// One page of a game's rooms, oldest first.
    pub async fn rooms_page(
        &self,
        game_type: &str,
        offset: isize,
        limit: isize,
    ) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.clone();
        Ok(conn
            .zrange(
                format!("rooms:{game_type}:created"),
                offset,
                offset + limit - 1,
            )
            .await?)
    }

    /// Rooms whose activity score is at or below the cutoff, stalest
    /// first. This drives the timeout scheduler.
    pub async fn stale_rooms(
        &self,
        game_type: &str,
        cutoff: i64,
        limit: isize,
    ) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.clone();
        Ok(conn
            .zrangebyscore_limit(
                format!("rooms:{game_type}:activity"),
                "-inf",
                cutoff,
                0,
                limit,
            )
            .await?)
    }

    pub async fn touch_activity(
        &self,
        game_type: &str,
        room_id: &str,
        now: i64,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(format!("rooms:{game_type}:activity"), room_id, now)
            .await?;
        Ok(())
    }

    // ---- user indices ----

    pub async fn set_user_room(&self, user_id: Uuid, room_id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(format!("user:{user_id}:room"), room_id).await?;
        Ok(())
    }

    pub async fn user_room(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(format!("user:{user_id}:room")).await?)
    }

    pub async fn clear_user_room(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(format!("user:{user_id}:room")).await?;
        Ok(())
    }

    pub async fn incr_connections(&self, user_id: Uuid) -> Result<i64, AppError> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(format!("user:{user_id}:conns"), 1).await?)
    }

    pub async fn decr_connections(&self, user_id: Uuid) -> Result<i64, AppError> {
        let mut conn = self.conn.clone();
        Ok(conn.decr(format!("user:{user_id}:conns"), 1).await?)
    }

    // ---- disconnected grace ----

    pub async fn set_grace(
        &self,
        user_id: Uuid,
        room_id: &str,
        ttl_secs: u64,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(format!("user:{user_id}:grace"), room_id, ttl_secs)
            .await?;
        Ok(())
    }

    /// Atomic get-and-clear of the grace slot. Whoever gets the room id
    /// owns the transition; a racing reclaim and eviction cannot both win.
    pub async fn take_grace(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        Ok(conn.get_del(format!("user:{user_id}:grace")).await?)
    }

    // ---- rate limiting ----

    /// Counts one command against the user's current minute bucket and
    /// reports whether they are still within budget.
    pub async fn rate_limit_allow(
        &self,
        user_id: Uuid,
        now: i64,
        max_per_minute: u32,
    ) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let minute = now / 60;
        let key = format!("rl:{user_id}:{minute}");
        let count: i64 = conn.incr(&key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&key, 60).await?;
        }
        Ok(count <= max_per_minute as i64)
    }

    /// Hands one counted command back, for commands that never ran (for
    /// example a busy room lock, where the client has to retry anyway).
    pub async fn rate_limit_refund(&self, user_id: Uuid, now: i64) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let minute = now / 60;
        let _: i64 = conn.decr(format!("rl:{user_id}:{minute}"), 1).await?;
        Ok(())
    }

    // ---- distributed locks ----

    async fn try_set_lock(&self, key: &str, ttl_ms: u64) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Acquires the room lock within the given timeout. Returns
    /// [`AppError::LockBusy`] when the deadline passes; the caller holds
    /// nothing in that case.
    pub async fn lock_room(&self, room_id: &str, timeout: Duration) -> Result<(), AppError> {
        let key = format!("lock:room:{room_id}");
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_set_lock(&key, ROOM_LOCK_TTL_MS).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::LockBusy);
            }
            tokio::time::sleep(Duration::from_millis(LOCK_RETRY_MS)).await;
        }
    }

    /// Releasing is an unconditional delete, so it is idempotent and safe
    /// to call on every exit path.
    pub async fn unlock_room(&self, room_id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(format!("lock:room:{room_id}")).await?;
        Ok(())
    }

    /// One-shot lock for the deferred disconnect cleanup.
    pub async fn lock_disconnect(&self, user_id: Uuid, ttl_ms: u64) -> Result<bool, AppError> {
        self.try_set_lock(&format!("lock:disconnect:{user_id}"), ttl_ms)
            .await
    }

    pub async fn unlock_disconnect(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(format!("lock:disconnect:{user_id}")).await?;
        Ok(())
    }

    // ---- command idempotency ----

    pub async fn command_seen(&self, command_id: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(format!("cmd:{command_id}")).await?)
    }

    pub async fn mark_command(&self, command_id: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(format!("cmd:{command_id}"), 1, COMMAND_TTL_SECS as u64)
            .await?;
        Ok(())
    }

    /// Liveness probe against the shared store.
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    // ---- pub/sub ----

    /// Publishes onto a domain channel (`player_updates`).
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }
}
