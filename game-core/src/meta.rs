//! Room metadata, persisted as JSON next to the encoded game state.

use crate::error::SeatError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Default turn clock when the room template does not set one.
pub const DEFAULT_TURN_TIMEOUT_SECS: i64 = 30;

/// Everything about a room that is not game state. The `game_type` and the
/// capacity never change over the life of the room; the seat map does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMeta {
    pub room_id: String,
    pub game_type: String,
    pub max_players: u8,
    /// Entry fee in coins, reserved at join time.
    pub entry_fee: i64,
    #[serde(default)]
    pub config: HashMap<String, String>,
    pub is_public: bool,
    /// userId -> seat index, seat values unique and `< max_players`.
    #[serde(default)]
    pub player_seats: HashMap<Uuid, u8>,
    /// Committed entry fees currently in the room.
    #[serde(default)]
    pub pot: i64,
    /// Unix seconds when the current turn started. Refreshed on every
    /// successful engine step.
    pub turn_started_at: i64,
    pub created_at: i64,
}

impl RoomMeta {
    pub fn seat_of(&self, user_id: &Uuid) -> Option<u8> {
        self.player_seats.get(user_id).copied()
    }

    pub fn user_at_seat(&self, seat: u8) -> Option<Uuid> {
        self.player_seats
            .iter()
            .find(|(_, s)| **s == seat)
            .map(|(u, _)| *u)
    }

    /// The taken seats in ascending order.
    pub fn occupied_seats(&self) -> Vec<u8> {
        let mut seats: Vec<u8> = self.player_seats.values().copied().collect();
        seats.sort_unstable();
        seats
    }

    pub fn is_full(&self) -> bool {
        self.player_seats.len() >= self.max_players as usize
    }

    /// The number of addressable seats. Defaults to the capacity; games
    /// with a fixed board (Ludo seats two players on opposite corners of a
    /// four-seat board) raise it via the `boardSeats` template key.
    pub fn seat_limit(&self) -> u8 {
        self.config
            .get("boardSeats")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.max_players)
    }

    /// Inserts the user on the given seat, enforcing capacity, seat range
    /// and uniqueness.
    pub fn claim_seat(&mut self, user_id: Uuid, seat: u8) -> Result<(), SeatError> {
        if self.player_seats.contains_key(&user_id) {
            return Err(SeatError::AlreadySeated);
        }
        if self.is_full() {
            return Err(SeatError::RoomFull);
        }
        if seat >= self.seat_limit() {
            return Err(SeatError::NoSuchSeat(seat));
        }
        if self.player_seats.values().any(|s| *s == seat) {
            return Err(SeatError::SeatTaken(seat));
        }
        self.player_seats.insert(user_id, seat);
        Ok(())
    }

    /// Removes the user's seat and returns it, if there was one.
    pub fn release_seat(&mut self, user_id: &Uuid) -> Option<u8> {
        self.player_seats.remove(user_id)
    }

    /// The turn clock for this room, from the template config.
    pub fn turn_timeout_secs(&self) -> i64 {
        self.config
            .get("turnTimeoutSeconds")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TURN_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(max_players: u8) -> RoomMeta {
        RoomMeta {
            room_id: "ab12cd".into(),
            game_type: "ludo".into(),
            max_players,
            entry_fee: 100,
            config: HashMap::new(),
            is_public: true,
            player_seats: HashMap::new(),
            pot: 0,
            turn_started_at: 0,
            created_at: 0,
        }
    }

    #[test]
    fn seats_stay_unique_and_bounded() {
        let mut m = meta(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        m.claim_seat(a, 0).unwrap();
        assert_eq!(m.claim_seat(b, 0), Err(SeatError::SeatTaken(0)));
        assert_eq!(m.claim_seat(a, 1), Err(SeatError::AlreadySeated));
        m.claim_seat(b, 1).unwrap();
        assert_eq!(m.claim_seat(c, 1), Err(SeatError::RoomFull));
        assert!(m.player_seats.len() <= m.max_players as usize);
    }

    #[test]
    fn seat_range_is_enforced() {
        let mut m = meta(4);
        let a = Uuid::new_v4();
        assert_eq!(m.claim_seat(a, 4), Err(SeatError::NoSuchSeat(4)));
        m.claim_seat(a, 3).unwrap();
        assert_eq!(m.seat_of(&a), Some(3));
        assert_eq!(m.user_at_seat(3), Some(a));
    }

    #[test]
    fn board_seats_widen_the_seat_range() {
        let mut m = meta(2);
        m.config.insert("boardSeats".into(), "4".into());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        m.claim_seat(a, 0).unwrap();
        m.claim_seat(b, 2).unwrap();
        assert_eq!(m.occupied_seats(), vec![0, 2]);
    }

    #[test]
    fn turn_timeout_reads_the_config() {
        let mut m = meta(4);
        assert_eq!(m.turn_timeout_secs(), DEFAULT_TURN_TIMEOUT_SECS);
        m.config
            .insert("turnTimeoutSeconds".into(), "45".into());
        assert_eq!(m.turn_timeout_secs(), 45);
    }
}
