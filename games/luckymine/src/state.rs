//! The LuckyMine state and its byte image.
//!
//! The board is at most 128 tiles, held as two 64-bit masks for the mine
//! layout and the revealed set. The mine layout is fixed at room creation
//! and never leaves the server (the client view only shows revealed tiles).
//!
//! # Byte layout (54 bytes, little-endian, no padding)
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0      | 16   | mine mask (two u64 words, low tiles first) |
//! | 16     | 16   | revealed mask (two u64 words) |
//! | 32     | 1    | current player |
//! | 33     | 1    | total mines |
//! | 34     | 1    | total tiles |
//! | 35     | 1    | status (0 active, 1 all-mines-hit, 2 game over) |
//! | 36     | 4    | entry cost |
//! | 40     | 4    | reward slope, milli-units |
//! | 44     | 1    | active seat mask |
//! | 45     | 1    | dead seat mask |
//! | 46     | 8    | cumulative winnings |

use bytes::{Buf, BufMut, Bytes, BytesMut};
use game_core::{CodecError, StateCodec};

pub const MAX_TILES: u8 = 128;
pub const SEATS: u8 = 8;

pub const ENCODED_LEN: usize = 54;

/// Round status, stored as one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MineStatus {
    Active,
    AllMinesHit,
    GameOver,
}

impl MineStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            MineStatus::Active => 0,
            MineStatus::AllMinesHit => 1,
            MineStatus::GameOver => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Result<Self, CodecError> {
        match raw {
            0 => Ok(MineStatus::Active),
            1 => Ok(MineStatus::AllMinesHit),
            2 => Ok(MineStatus::GameOver),
            _ => Err(CodecError::Range { field: "status" }),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, MineStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MineState {
    pub mine_mask: [u64; 2],
    pub revealed_mask: [u64; 2],
    pub current_player: u8,
    pub total_mines: u8,
    pub total_tiles: u8,
    pub status: MineStatus,
    pub entry_cost: u32,
    pub reward_slope_milli: u32,
    pub active_mask: u8,
    pub dead_mask: u8,
    pub winnings: u64,
}

impl MineState {
    pub fn is_mine(&self, tile: u8) -> bool {
        self.mine_mask[(tile / 64) as usize] & (1 << (tile % 64)) != 0
    }

    pub fn is_revealed(&self, tile: u8) -> bool {
        self.revealed_mask[(tile / 64) as usize] & (1 << (tile % 64)) != 0
    }

    pub fn reveal(&mut self, tile: u8) {
        self.revealed_mask[(tile / 64) as usize] |= 1 << (tile % 64);
    }

    /// Revealed tiles that were not mines.
    pub fn safe_count(&self) -> u32 {
        let safe0 = self.revealed_mask[0] & !self.mine_mask[0];
        let safe1 = self.revealed_mask[1] & !self.mine_mask[1];
        safe0.count_ones() + safe1.count_ones()
    }

    /// The reward curve: winnings grow linearly with every safe reveal.
    pub fn current_winnings(&self) -> u64 {
        let per_tile = self.entry_cost as u64 * self.reward_slope_milli as u64 / 1000;
        per_tile * self.safe_count() as u64
    }

    pub fn seat_alive(&self, seat: u8) -> bool {
        self.active_mask & (1 << seat) != 0 && self.dead_mask & (1 << seat) == 0
    }

    pub fn alive_count(&self) -> u32 {
        (self.active_mask & !self.dead_mask).count_ones()
    }

    /// Rotates to the next alive seat after the current one.
    pub fn advance_turn(&mut self) {
        let mut cand = self.current_player;
        for _ in 0..SEATS {
            cand = (cand + 1) % SEATS;
            if self.seat_alive(cand) {
                self.current_player = cand;
                return;
            }
        }
    }
}

impl StateCodec for crate::MineEngine {
    type State = MineState;

    const ENCODED_LEN: usize = ENCODED_LEN;

    fn encode(state: &MineState) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENCODED_LEN);
        buf.put_u64_le(state.mine_mask[0]);
        buf.put_u64_le(state.mine_mask[1]);
        buf.put_u64_le(state.revealed_mask[0]);
        buf.put_u64_le(state.revealed_mask[1]);
        buf.put_u8(state.current_player);
        buf.put_u8(state.total_mines);
        buf.put_u8(state.total_tiles);
        buf.put_u8(state.status.as_u8());
        buf.put_u32_le(state.entry_cost);
        buf.put_u32_le(state.reward_slope_milli);
        buf.put_u8(state.active_mask);
        buf.put_u8(state.dead_mask);
        buf.put_u64_le(state.winnings);
        buf.freeze()
    }

    fn decode(raw: &[u8]) -> Result<MineState, CodecError> {
        Self::check_len(raw)?;
        let mut buf = raw;

        let mine_mask = [buf.get_u64_le(), buf.get_u64_le()];
        let revealed_mask = [buf.get_u64_le(), buf.get_u64_le()];
        let current_player = buf.get_u8();
        if current_player >= SEATS {
            return Err(CodecError::Range {
                field: "current_player",
            });
        }
        let total_mines = buf.get_u8();
        let total_tiles = buf.get_u8();
        if total_tiles > MAX_TILES || total_mines >= total_tiles {
            return Err(CodecError::Range {
                field: "total_tiles",
            });
        }
        let status = MineStatus::from_u8(buf.get_u8())?;
        let entry_cost = buf.get_u32_le();
        let reward_slope_milli = buf.get_u32_le();
        let active_mask = buf.get_u8();
        let dead_mask = buf.get_u8();
        let winnings = buf.get_u64_le();

        Ok(MineState {
            mine_mask,
            revealed_mask,
            current_player,
            total_mines,
            total_tiles,
            status,
            entry_cost,
            reward_slope_milli,
            active_mask,
            dead_mask,
            winnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MineEngine;
    use game_core::StateCodec;

    fn sample() -> MineState {
        MineState {
            mine_mask: [0b1010_0001, 1 << 60],
            revealed_mask: [0b0000_0110, 0],
            current_player: 1,
            total_mines: 3,
            total_tiles: 100,
            status: MineStatus::Active,
            entry_cost: 50,
            reward_slope_milli: 150,
            active_mask: 0b0011,
            dead_mask: 0,
            winnings: 14,
        }
    }

    #[test]
    fn image_is_exactly_54_bytes() {
        assert_eq!(MineEngine::encode(&sample()).len(), 54);
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let state = sample();
        let image = MineEngine::encode(&state);
        assert_eq!(MineEngine::decode(&image).unwrap(), state);
    }

    #[test]
    fn status_bytes_are_validated() {
        let state = sample();
        let mut image = MineEngine::encode(&state).to_vec();
        image[35] = 9;
        assert!(MineEngine::decode(&image).is_err());
    }

    #[test]
    fn safe_count_excludes_mines() {
        let mut state = sample();
        state.revealed_mask = [0b1010_0111, 0];
        // Revealed: tiles 0,1,2,5,7. Mines among them: 0,5,7.
        assert_eq!(state.safe_count(), 2);
    }

    #[test]
    fn winnings_follow_the_slope() {
        let mut state = sample();
        state.revealed_mask = [0, 0];
        assert_eq!(state.current_winnings(), 0);
        state.reveal(1);
        state.reveal(2);
        // 50 coins * 150/1000 per tile = 7 coins per safe tile.
        assert_eq!(state.current_winnings(), 14);
    }
}
