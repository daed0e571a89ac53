//! The LuckyMine rules as a pure state machine.
//!
//! Player actions are `reveal` (with a `tileIndex` payload) and `cashout`.
//! Revealing a safe tile grows the winnings and passes the turn; revealing
//! a mine ends the round with the revealer ranked last. A cashout ends the
//! round with the caller ranked first.

use crate::state::{MAX_TILES, MineState, MineStatus, SEATS};
use game_core::{
    ActionCommand, ActionFailure, EngineOutcome, GameEngine, GameEvent, RoomHooks, RoomMeta,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;

pub struct MineEngine;

impl MineEngine {
    fn require_turn(state: &MineState, seat: u8) -> Result<(), ActionFailure> {
        if !state.seat_alive(seat) {
            return Err(ActionFailure::NotSeated);
        }
        if seat != state.current_player {
            return Err(ActionFailure::NotYourTurn);
        }
        Ok(())
    }

    /// Survivors in seat order, then the dead seats. Used for both terminal
    /// paths so payouts and archival always get a full ranking.
    fn ranking_with_first(state: &MineState, first: Option<u8>) -> Vec<u8> {
        let mut ranking = Vec::new();
        if let Some(seat) = first {
            ranking.push(seat);
        }
        for seat in 0..SEATS {
            if state.seat_alive(seat) && Some(seat) != first {
                ranking.push(seat);
            }
        }
        for seat in 0..SEATS {
            if state.active_mask & (1 << seat) != 0 && !state.seat_alive(seat) {
                ranking.push(seat);
            }
        }
        ranking
    }

    fn do_reveal(
        &self,
        mut state: MineState,
        cmd: &ActionCommand,
    ) -> Result<EngineOutcome<MineState>, ActionFailure> {
        let seat = cmd.seat;
        Self::require_turn(&state, seat)?;
        let tile = cmd
            .payload_u8("tileIndex")
            .ok_or(ActionFailure::BadPayload("tileIndex"))?;
        if tile >= state.total_tiles {
            return Err(ActionFailure::BadPayload("tileIndex"));
        }
        // Revealing a tile twice is not an error, just nothing.
        if state.is_revealed(tile) {
            return Ok(EngineOutcome::noop(state));
        }

        state.reveal(tile);

        if state.is_mine(tile) {
            state.dead_mask |= 1 << seat;
            state.status = MineStatus::AllMinesHit;
            let events = vec![
                GameEvent::new("HitMine", json!({ "player": seat, "tileIndex": tile })),
                GameEvent::new("GameEnded", json!({})),
            ];
            let ranking = Self::ranking_with_first(&state, None);
            return Ok(EngineOutcome::finished(state, events, ranking));
        }

        state.winnings = state.current_winnings();
        let mut events = vec![GameEvent::new(
            "Revealed",
            json!({
                "player": seat,
                "tileIndex": tile,
                "safeCount": state.safe_count(),
                "winnings": state.winnings,
            }),
        )];
        if state.alive_count() > 1 {
            state.advance_turn();
            events.push(GameEvent::new(
                "TurnChanged",
                json!({ "newPlayer": state.current_player }),
            ));
        }
        Ok(EngineOutcome::changed(state, events))
    }

    fn do_cashout(
        &self,
        mut state: MineState,
        cmd: &ActionCommand,
    ) -> Result<EngineOutcome<MineState>, ActionFailure> {
        let seat = cmd.seat;
        Self::require_turn(&state, seat)?;
        state.status = MineStatus::GameOver;
        let events = vec![
            GameEvent::new(
                "CashedOut",
                json!({ "player": seat, "amount": state.winnings }),
            ),
            GameEvent::new("GameEnded", json!({})),
        ];
        let ranking = Self::ranking_with_first(&state, Some(seat));
        Ok(EngineOutcome::finished(state, events, ranking))
    }
}

impl GameEngine for MineEngine {
    fn execute(
        &self,
        state: MineState,
        _meta: &RoomMeta,
        cmd: &ActionCommand,
    ) -> Result<EngineOutcome<MineState>, ActionFailure> {
        if state.status.is_terminal() {
            return Err(ActionFailure::GameOver);
        }
        match cmd.action.as_str() {
            "reveal" => self.do_reveal(state, cmd),
            "cashout" => self.do_cashout(state, cmd),
            other => Err(ActionFailure::UnknownAction(other.to_string())),
        }
    }

    /// LuckyMine has no turn clock; the module registers as instant and
    /// this stays a no-op for robustness.
    fn check_timeouts(
        &self,
        state: MineState,
        _meta: &RoomMeta,
        _now: i64,
    ) -> EngineOutcome<MineState> {
        EngineOutcome::noop(state)
    }

    fn legal_actions(&self, state: &MineState, seat: u8) -> Vec<String> {
        if state.status.is_terminal()
            || !state.seat_alive(seat)
            || seat != state.current_player
        {
            return Vec::new();
        }
        vec!["reveal".to_string(), "cashout".to_string()]
    }

    fn view(&self, state: &MineState, meta: &RoomMeta) -> serde_json::Value {
        // The mine layout stays on the server; clients only see revealed
        // tiles and whether each one was a mine.
        let revealed: Vec<serde_json::Value> = (0..state.total_tiles)
            .filter(|t| state.is_revealed(*t))
            .map(|t| json!({ "tileIndex": t, "mine": state.is_mine(t) }))
            .collect();
        json!({
            "revealed": revealed,
            "currentPlayer": state.current_player,
            "totalMines": state.total_mines,
            "totalTiles": state.total_tiles,
            "status": state.status.as_u8(),
            "safeCount": state.safe_count(),
            "winnings": state.winnings,
            "activeSeatsMask": state.active_mask,
            "deadSeatsMask": state.dead_mask,
            "players": meta.player_seats,
        })
    }
}

impl RoomHooks for MineEngine {
    /// Lays out the board. The mines are placed by a Fisher–Yates pass over
    /// the tile indices with a seeded rng, so the layout is reproducible
    /// from the room seed.
    fn initial_state(&self, meta: &RoomMeta, seed: u64) -> MineState {
        let total_tiles: u8 = meta
            .config
            .get("tiles")
            .and_then(|v| v.parse().ok())
            .unwrap_or(25)
            .clamp(2, MAX_TILES);
        let total_mines: u8 = meta
            .config
            .get("mines")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5)
            .min(total_tiles.saturating_sub(1));
        let reward_slope_milli: u32 = meta
            .config
            .get("rewardSlopeMilli")
            .and_then(|v| v.parse().ok())
            .unwrap_or(150);

        let mut tiles: Vec<u8> = (0..total_tiles).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        for i in (1..tiles.len()).rev() {
            let j = rng.random_range(0..=i);
            tiles.swap(i, j);
        }

        let mut mine_mask = [0u64; 2];
        for tile in tiles.into_iter().take(total_mines as usize) {
            mine_mask[(tile / 64) as usize] |= 1 << (tile % 64);
        }

        MineState {
            mine_mask,
            revealed_mask: [0; 2],
            current_player: 0,
            total_mines,
            total_tiles,
            status: MineStatus::Active,
            entry_cost: meta.entry_fee.max(0) as u32,
            reward_slope_milli,
            active_mask: 0,
            dead_mask: 0,
            winnings: 0,
        }
    }

    fn assign_seat(&self, meta: &RoomMeta) -> Option<u8> {
        let taken = meta.occupied_seats();
        (0..meta.max_players.min(SEATS)).find(|s| !taken.contains(s))
    }

    fn player_joined(&self, mut state: MineState, _meta: &RoomMeta, seat: u8) -> MineState {
        state.active_mask |= 1 << seat;
        if !state.seat_alive(state.current_player) {
            if let Some(first) = (0..SEATS).find(|s| state.seat_alive(*s)) {
                state.current_player = first;
            }
        }
        state
    }

    fn player_left(
        &self,
        mut state: MineState,
        _meta: &RoomMeta,
        seat: u8,
    ) -> EngineOutcome<MineState> {
        if state.status.is_terminal() || state.active_mask & (1 << seat) == 0 {
            return EngineOutcome::noop(state);
        }
        let started = state.revealed_mask != [0, 0];
        state.active_mask &= !(1 << seat);

        let mut events = Vec::new();
        if state.current_player == seat && state.alive_count() > 0 {
            state.advance_turn();
            events.push(GameEvent::new(
                "TurnChanged",
                json!({ "newPlayer": state.current_player }),
            ));
        }

        if started && state.alive_count() == 0 {
            // Everyone walked away from a running round.
            state.status = MineStatus::GameOver;
            events.push(GameEvent::new("GameEnded", json!({})));
            return EngineOutcome::finished(state, events, Vec::new());
        }
        EngineOutcome::changed(state, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_core::StateCodec;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn meta() -> RoomMeta {
        RoomMeta {
            room_id: "feed42".into(),
            game_type: "luckymine".into(),
            max_players: 4,
            entry_fee: 50,
            config: HashMap::from([
                ("tiles".into(), "25".into()),
                ("mines".into(), "5".into()),
            ]),
            is_public: true,
            player_seats: HashMap::new(),
            pot: 0,
            turn_started_at: 0,
            created_at: 0,
        }
    }

    fn two_player_state() -> MineState {
        let engine = MineEngine;
        let m = meta();
        let mut state = engine.initial_state(&m, 1234);
        state = engine.player_joined(state, &m, 0);
        state = engine.player_joined(state, &m, 1);
        state
    }

    fn reveal(seat: u8, tile: u8) -> ActionCommand {
        ActionCommand::player(Uuid::new_v4(), seat, "reveal", json!({ "tileIndex": tile }))
    }

    #[test]
    fn placement_is_deterministic_and_counts_match() {
        let engine = MineEngine;
        let m = meta();
        let a = engine.initial_state(&m, 777);
        let b = engine.initial_state(&m, 777);
        let c = engine.initial_state(&m, 778);
        assert_eq!(a.mine_mask, b.mine_mask);
        assert_ne!(a.mine_mask, c.mine_mask);

        let mines = a.mine_mask[0].count_ones() + a.mine_mask[1].count_ones();
        assert_eq!(mines, 5);
        // All mines inside the board.
        for tile in 25..128u8 {
            assert!(!a.is_mine(tile));
        }
    }

    #[test]
    fn safe_reveal_grows_winnings_and_passes_the_turn() {
        let engine = MineEngine;
        let m = meta();
        let state = two_player_state();
        let tile = (0..25).find(|t| !state.is_mine(*t)).unwrap();

        let out = engine.execute(state, &m, &reveal(0, tile)).unwrap();
        assert!(!out.terminal);
        assert_eq!(out.state.safe_count(), 1);
        // 50 * 150/1000 = 7 per safe tile.
        assert_eq!(out.state.winnings, 7);
        assert_eq!(out.state.current_player, 1);
        assert_eq!(out.events[0].name, "Revealed");
    }

    #[test]
    fn revealing_a_mine_ends_the_round() {
        let engine = MineEngine;
        let m = meta();
        let state = two_player_state();
        let tile = (0..25).find(|t| state.is_mine(*t)).unwrap();

        let out = engine.execute(state, &m, &reveal(0, tile)).unwrap();
        assert!(out.terminal);
        assert_eq!(out.state.status, MineStatus::AllMinesHit);
        assert_eq!(out.events[0].name, "HitMine");
        // Survivor first, revealer last.
        assert_eq!(out.winner_ranking, vec![1, 0]);
    }

    #[test]
    fn revealing_the_same_tile_twice_is_ignored() {
        let engine = MineEngine;
        let m = meta();
        let state = two_player_state();
        let tile = (0..25).find(|t| !state.is_mine(*t)).unwrap();
        let out = engine.execute(state, &m, &reveal(0, tile)).unwrap();
        let again = engine.execute(out.state, &m, &reveal(1, tile)).unwrap();
        assert!(again.events.is_empty());
        assert!(!again.should_broadcast);
    }

    #[test]
    fn cashout_ends_the_round_with_the_caller_on_top() {
        let engine = MineEngine;
        let m = meta();
        let state = two_player_state();
        let tile = (0..25).find(|t| !state.is_mine(*t)).unwrap();
        let out = engine.execute(state, &m, &reveal(0, tile)).unwrap();

        let cmd = ActionCommand::player(Uuid::new_v4(), 1, "cashout", json!({}));
        let out = engine.execute(out.state, &m, &cmd).unwrap();
        assert!(out.terminal);
        assert_eq!(out.state.status, MineStatus::GameOver);
        assert_eq!(out.winner_ranking, vec![1, 0]);
        assert_eq!(out.events[0].name, "CashedOut");
        assert_eq!(out.events[0].data["amount"], json!(7));
    }

    #[test]
    fn acting_out_of_turn_is_rejected() {
        let engine = MineEngine;
        let m = meta();
        let state = two_player_state();
        let tile = (0..25).find(|t| !state.is_mine(*t)).unwrap();
        let err = engine.execute(state, &m, &reveal(1, tile)).unwrap_err();
        assert_eq!(err, ActionFailure::NotYourTurn);
    }

    #[test]
    fn the_view_never_leaks_the_mine_layout() {
        let engine = MineEngine;
        let m = meta();
        let state = two_player_state();
        let view = engine.view(&state, &m);

        assert_eq!(view["totalMines"], json!(5));
        assert_eq!(view["revealed"], json!([]));
        // Nothing in the view encodes unrevealed mine positions.
        assert!(view.get("mineMask").is_none());
        let rendered = view.to_string();
        assert!(!rendered.contains("mineMask"));
    }

    #[test]
    fn a_leaving_player_passes_the_turn() {
        let engine = MineEngine;
        let m = meta();
        let mut state = two_player_state();
        state = engine.player_joined(state, &m, 2);
        // Reveal once so the round counts as started.
        let tile = (0..25).find(|t| !state.is_mine(*t)).unwrap();
        let mut state = engine.execute(state, &m, &reveal(0, tile)).unwrap().state;
        assert_eq!(state.current_player, 1);

        state.current_player = 1;
        let out = engine.player_left(state, &m, 1);
        assert!(!out.terminal);
        assert_eq!(out.state.current_player, 2);
        assert!(
            out.events
                .iter()
                .any(|e| e.name == "TurnChanged")
        );
    }

    #[test]
    fn a_deserted_round_ends() {
        let engine = MineEngine;
        let m = meta();
        let state = two_player_state();
        let tile = (0..25).find(|t| !state.is_mine(*t)).unwrap();
        let state = engine.execute(state, &m, &reveal(0, tile)).unwrap().state;

        let out = engine.player_left(state, &m, 0);
        assert!(!out.terminal);
        let out = engine.player_left(out.state, &m, 1);
        assert!(out.terminal);
        assert_eq!(out.state.status, MineStatus::GameOver);
    }

    #[test]
    fn state_round_trips_through_the_codec() {
        let engine = MineEngine;
        let m = meta();
        let state = two_player_state();
        let tile = (0..25).find(|t| !state.is_mine(*t)).unwrap();
        let out = engine.execute(state, &m, &reveal(0, tile)).unwrap();

        let image = MineEngine::encode(&out.state);
        assert_eq!(MineEngine::decode(&image).unwrap(), out.state);
    }
}
