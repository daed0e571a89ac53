//! The Ludo state and its byte image.
//!
//! Positions are stored in seat-local coordinates:
//! - `0`: the token sits in its base.
//! - `1..=51`: the main track, relative to the seat's entry square.
//! - `52..=56`: the seat's home column.
//! - `57`: home, the token is done.
//!
//! The global track has 52 cells; seat `s` enters at global cell `s * 13`,
//! and every 13th global cell (the four entry squares) is safe from
//! capture.
//!
//! # Byte layout (36 bytes, little-endian, no padding)
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0      | 16   | token positions, seat-local |
//! | 16     | 4    | finish order (seat indices, `0xFF` = unset) |
//! | 20     | 1    | current player |
//! | 21     | 1    | last dice roll (`0` = must roll) |
//! | 22     | 1    | consecutive sixes |
//! | 23     | 1    | finished seat mask |
//! | 24     | 1    | winners count |
//! | 25     | 1    | active seat mask |
//! | 26     | 4    | turn id |
//! | 30     | 4    | dice rng word (xorshift32, never zero) |
//! | 34     | 1    | game over flag |
//! | 35     | 1    | last moved token (`0xFF` = none) |
//!
//! This image is the wire representation between the state store and the
//! engine; the layout is part of the protocol and must stay stable.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use game_core::{CodecError, StateCodec};

pub const SEATS: usize = 4;
pub const TOKENS_PER_SEAT: usize = 4;
pub const TOKEN_COUNT: usize = SEATS * TOKENS_PER_SEAT;

/// Seat-local coordinates.
pub const BASE: u8 = 0;
pub const TRACK_FIRST: u8 = 1;
pub const TRACK_LAST: u8 = 51;
pub const HOME: u8 = 57;

/// The global main track.
pub const TRACK_LEN: u8 = 52;
/// Rotation between neighboring seats' entry squares.
pub const SEAT_STRIDE: u8 = 13;

/// Sentinel for "unset" in the finish order and the last-moved slot.
pub const UNSET: u8 = 0xFF;

pub const ENCODED_LEN: usize = 36;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LudoState {
    pub token_positions: [u8; TOKEN_COUNT],
    pub finish_order: [u8; SEATS],
    pub current_player: u8,
    pub last_dice_roll: u8,
    pub consecutive_sixes: u8,
    pub finished_mask: u8,
    pub winners_count: u8,
    pub active_seats_mask: u8,
    pub turn_id: u32,
    pub rng: u32,
    pub game_over: bool,
    pub last_moved_token: u8,
}

impl LudoState {
    /// A fresh board. The seed feeds the dice rng; a zero seed is nudged
    /// because xorshift has a zero fixed point.
    pub fn new(seed: u64) -> Self {
        let rng = ((seed as u32) ^ ((seed >> 32) as u32)) | 1;
        Self {
            token_positions: [BASE; TOKEN_COUNT],
            finish_order: [UNSET; SEATS],
            current_player: 0,
            last_dice_roll: 0,
            consecutive_sixes: 0,
            finished_mask: 0,
            winners_count: 0,
            active_seats_mask: 0,
            turn_id: 0,
            rng,
            game_over: false,
            last_moved_token: UNSET,
        }
    }

    /// Draws the next dice value in `1..=6` and advances the rng word.
    pub fn roll_dice(&mut self) -> u8 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        (x % 6) as u8 + 1
    }

    /// The first token index of a seat in [`Self::token_positions`].
    pub fn token_base(seat: u8) -> usize {
        seat as usize * TOKENS_PER_SEAT
    }

    /// Maps a seat-local track position (`1..=51`) to its global cell.
    pub fn global_cell(seat: u8, local: u8) -> u8 {
        debug_assert!((TRACK_FIRST..=TRACK_LAST).contains(&local));
        (local - 1 + seat * SEAT_STRIDE) % TRACK_LEN
    }

    /// Entry squares (every 13th global cell) are safe from capture.
    pub fn is_safe_cell(global: u8) -> bool {
        global % SEAT_STRIDE == 0
    }

    pub fn seat_active(&self, seat: u8) -> bool {
        self.active_seats_mask & (1 << seat) != 0
    }

    pub fn seat_finished(&self, seat: u8) -> bool {
        self.finished_mask & (1 << seat) != 0
    }

    /// A seat that started the game and has not finished yet.
    pub fn seat_in_play(&self, seat: u8) -> bool {
        self.seat_active(seat) && !self.seat_finished(seat)
    }

    pub fn seats_in_play(&self) -> u32 {
        (self.active_seats_mask & !self.finished_mask).count_ones()
    }

    /// The 4-bit legal-move mask of a seat for a given dice value.
    pub fn legal_moves_mask(&self, seat: u8, dice: u8) -> u8 {
        let mut mask = 0;
        for idx in 0..TOKENS_PER_SEAT {
            let pos = self.token_positions[Self::token_base(seat) + idx];
            let legal = match pos {
                BASE => dice == 6,
                HOME => false,
                _ => pos + dice <= HOME,
            };
            if legal {
                mask |= 1 << idx;
            }
        }
        mask
    }

    /// The winner ranking accumulated so far, in finishing order.
    pub fn ranking(&self) -> Vec<u8> {
        self.finish_order[..self.winners_count as usize].to_vec()
    }

    /// Advances the turn pointer round-robin, skipping seats that are
    /// inactive or already finished. Bounded rotation so a fully drained
    /// board cannot spin.
    pub fn advance_turn(&mut self) {
        self.turn_id += 1;
        let mut cand = self.current_player;
        for _ in 0..5 {
            cand = (cand + 1) % SEATS as u8;
            if self.seat_in_play(cand) {
                self.current_player = cand;
                return;
            }
        }
    }
}

impl StateCodec for crate::LudoEngine {
    type State = LudoState;

    const ENCODED_LEN: usize = ENCODED_LEN;

    fn encode(state: &LudoState) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENCODED_LEN);
        buf.put_slice(&state.token_positions);
        buf.put_slice(&state.finish_order);
        buf.put_u8(state.current_player);
        buf.put_u8(state.last_dice_roll);
        buf.put_u8(state.consecutive_sixes);
        buf.put_u8(state.finished_mask);
        buf.put_u8(state.winners_count);
        buf.put_u8(state.active_seats_mask);
        buf.put_u32_le(state.turn_id);
        buf.put_u32_le(state.rng);
        buf.put_u8(state.game_over as u8);
        buf.put_u8(state.last_moved_token);
        buf.freeze()
    }

    fn decode(raw: &[u8]) -> Result<LudoState, CodecError> {
        Self::check_len(raw)?;
        let mut buf = raw;

        let mut token_positions = [0u8; TOKEN_COUNT];
        buf.copy_to_slice(&mut token_positions);
        if token_positions.iter().any(|p| *p > HOME) {
            return Err(CodecError::Range {
                field: "token_positions",
            });
        }

        let mut finish_order = [0u8; SEATS];
        buf.copy_to_slice(&mut finish_order);
        if finish_order
            .iter()
            .any(|s| *s != UNSET && *s >= SEATS as u8)
        {
            return Err(CodecError::Range {
                field: "finish_order",
            });
        }

        let current_player = buf.get_u8();
        if current_player >= SEATS as u8 {
            return Err(CodecError::Range {
                field: "current_player",
            });
        }
        let last_dice_roll = buf.get_u8();
        if last_dice_roll > 6 {
            return Err(CodecError::Range {
                field: "last_dice_roll",
            });
        }
        let consecutive_sixes = buf.get_u8();
        if consecutive_sixes > 2 {
            return Err(CodecError::Range {
                field: "consecutive_sixes",
            });
        }
        let finished_mask = buf.get_u8();
        if finished_mask & 0xF0 != 0 {
            return Err(CodecError::Range {
                field: "finished_mask",
            });
        }
        let winners_count = buf.get_u8();
        if winners_count > SEATS as u8 {
            return Err(CodecError::Range {
                field: "winners_count",
            });
        }
        let active_seats_mask = buf.get_u8();
        if active_seats_mask & 0xF0 != 0 {
            return Err(CodecError::Range {
                field: "active_seats_mask",
            });
        }
        let turn_id = buf.get_u32_le();
        let rng = buf.get_u32_le();
        if rng == 0 {
            return Err(CodecError::Range { field: "rng" });
        }
        let game_over = match buf.get_u8() {
            0 => false,
            1 => true,
            _ => return Err(CodecError::Range { field: "game_over" }),
        };
        let last_moved_token = buf.get_u8();
        if last_moved_token != UNSET && last_moved_token >= TOKEN_COUNT as u8 {
            return Err(CodecError::Range {
                field: "last_moved_token",
            });
        }

        Ok(LudoState {
            token_positions,
            finish_order,
            current_player,
            last_dice_roll,
            consecutive_sixes,
            finished_mask,
            winners_count,
            active_seats_mask,
            turn_id,
            rng,
            game_over,
            last_moved_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LudoEngine;
    use game_core::StateCodec;

    #[test]
    fn image_is_exactly_36_bytes() {
        let state = LudoState::new(7);
        assert_eq!(LudoEngine::encode(&state).len(), 36);
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let mut state = LudoState::new(0xDEAD_BEEF_0123_4567);
        state.active_seats_mask = 0b0101;
        state.current_player = 2;
        state.token_positions[0] = 14;
        state.token_positions[8] = HOME;
        state.finish_order[0] = 2;
        state.winners_count = 1;
        state.finished_mask = 0b0100;
        state.last_dice_roll = 6;
        state.consecutive_sixes = 2;
        state.turn_id = 1234;
        state.last_moved_token = 8;

        let image = LudoEngine::encode(&state);
        let back = LudoEngine::decode(&image).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let state = LudoState::new(1);
        let image = LudoEngine::encode(&state);
        assert!(LudoEngine::decode(&image[..35]).is_err());
    }

    #[test]
    fn corrupt_positions_are_rejected() {
        let state = LudoState::new(1);
        let mut image = LudoEngine::encode(&state).to_vec();
        image[3] = HOME + 1;
        assert!(LudoEngine::decode(&image).is_err());
    }

    #[test]
    fn global_cells_rotate_by_thirteen() {
        assert_eq!(LudoState::global_cell(0, 1), 0);
        assert_eq!(LudoState::global_cell(1, 1), 13);
        assert_eq!(LudoState::global_cell(2, 1), 26);
        assert_eq!(LudoState::global_cell(3, 1), 39);
        // Seat 1 at local 40 wraps onto seat 0's entry square.
        assert_eq!(LudoState::global_cell(1, 40), 0);
    }

    #[test]
    fn entry_squares_are_safe() {
        for cell in [0, 13, 26, 39] {
            assert!(LudoState::is_safe_cell(cell));
        }
        assert!(!LudoState::is_safe_cell(1));
        assert!(!LudoState::is_safe_cell(12));
    }

    #[test]
    fn dice_stay_in_range_and_depend_on_the_seed() {
        let mut state = LudoState::new(42);
        for _ in 0..200 {
            let v = state.roll_dice();
            assert!((1..=6).contains(&v));
        }
        let mut a = LudoState::new(42);
        let mut b = LudoState::new(42);
        assert_eq!(a.roll_dice(), b.roll_dice());
    }
}
