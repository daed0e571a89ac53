//! The Ludo rules as a pure state machine.
//!
//! Player actions are `roll` and `move` (with a `tokenIndex` payload).
//! Privileged callers may additionally force a dice value on `roll` and
//! trigger the auto-play path via `forceTimeout`; both require the system
//! flag on the command.
//!
//! Dice rules: a six may be re-rolled before moving, three sixes in a row
//! forfeit the whole turn. A six or a capture grants an extra turn after a
//! successful move. A roll without a legal move passes the turn.

use crate::state::{
    BASE, HOME, LudoState, SEATS, TOKENS_PER_SEAT, TRACK_FIRST, TRACK_LAST, UNSET,
};
use game_core::{
    ActionCommand, ActionFailure, EngineOutcome, GameEngine, GameEvent, RoomHooks, RoomMeta,
};
use serde_json::json;

/// The stateless engine. All game data lives in [`LudoState`].
pub struct LudoEngine;

struct MoveEffect {
    captured: bool,
    seat_finished: bool,
}

fn turn_changed(state: &LudoState) -> GameEvent {
    GameEvent::new("TurnChanged", json!({ "newPlayer": state.current_player }))
}

impl LudoEngine {
    /// Common guards for player actions.
    fn require_turn(state: &LudoState, seat: u8) -> Result<(), ActionFailure> {
        if !state.seat_in_play(seat) {
            return Err(ActionFailure::NotSeated);
        }
        if state.seats_in_play() < 2 {
            return Err(ActionFailure::NotReady);
        }
        if seat != state.current_player {
            return Err(ActionFailure::NotYourTurn);
        }
        Ok(())
    }

    fn do_roll(
        &self,
        mut state: LudoState,
        cmd: &ActionCommand,
    ) -> Result<EngineOutcome<LudoState>, ActionFailure> {
        let seat = cmd.seat;
        Self::require_turn(&state, seat)?;
        // A six may be re-rolled before it is used; anything else has to be
        // played first.
        if state.last_dice_roll != 0 && state.last_dice_roll != 6 {
            return Err(ActionFailure::AlreadyRolled);
        }

        let value = match cmd.payload_u8("value") {
            Some(_) if !cmd.system => return Err(ActionFailure::NotPrivileged),
            Some(v) if (1..=6).contains(&v) => v,
            Some(_) => return Err(ActionFailure::BadPayload("value")),
            None => state.roll_dice(),
        };

        let mut events = vec![GameEvent::new(
            "DiceRolled",
            json!({ "value": value, "player": seat }),
        )];

        if value == 6 {
            state.consecutive_sixes += 1;
        } else {
            state.consecutive_sixes = 0;
        }

        if state.consecutive_sixes >= 3 {
            // Three sixes forfeit the whole turn.
            state.consecutive_sixes = 0;
            state.last_dice_roll = 0;
            state.advance_turn();
            events.push(turn_changed(&state));
        } else {
            state.last_dice_roll = value;
            if state.legal_moves_mask(seat, value) == 0 {
                // Nothing to play with this roll, the turn passes.
                state.last_dice_roll = 0;
                state.consecutive_sixes = 0;
                state.advance_turn();
                events.push(turn_changed(&state));
            }
        }

        Ok(EngineOutcome::changed(state, events))
    }

    fn do_move(
        &self,
        mut state: LudoState,
        cmd: &ActionCommand,
    ) -> Result<EngineOutcome<LudoState>, ActionFailure> {
        let seat = cmd.seat;
        Self::require_turn(&state, seat)?;
        let dice = state.last_dice_roll;
        if dice == 0 {
            return Err(ActionFailure::MustRollFirst);
        }
        let idx = cmd
            .payload_u8("tokenIndex")
            .ok_or(ActionFailure::BadPayload("tokenIndex"))?;
        if idx as usize >= TOKENS_PER_SEAT {
            return Err(ActionFailure::BadPayload("tokenIndex"));
        }

        let dest = Self::predict(&state, seat, idx, dice)?;
        let mut events = Vec::new();
        let effect = Self::apply_move(&mut state, seat, idx, dest, false, &mut events);

        if state.game_over {
            let ranking = state.ranking();
            return Ok(EngineOutcome::finished(state, events, ranking));
        }

        if effect.seat_finished {
            // Finishing always ends the turn.
            state.last_dice_roll = 0;
            state.consecutive_sixes = 0;
            state.advance_turn();
            events.push(turn_changed(&state));
        } else if dice == 6 || effect.captured {
            // Extra turn: the same player rolls again. The sixes counter
            // keeps counting across extra turns.
            state.last_dice_roll = 0;
        } else {
            state.last_dice_roll = 0;
            state.consecutive_sixes = 0;
            state.advance_turn();
            events.push(turn_changed(&state));
        }

        Ok(EngineOutcome::changed(state, events))
    }

    /// Predicted destination of a move, or why it is illegal.
    fn predict(state: &LudoState, seat: u8, idx: u8, dice: u8) -> Result<u8, ActionFailure> {
        let pos = state.token_positions[LudoState::token_base(seat) + idx as usize];
        match pos {
            HOME => Err(ActionFailure::IllegalMove("token is already home")),
            BASE => {
                if dice == 6 {
                    Ok(TRACK_FIRST)
                } else {
                    Err(ActionFailure::IllegalMove("a six is needed to leave base"))
                }
            }
            _ => {
                let dest = pos + dice;
                if dest > HOME {
                    Err(ActionFailure::IllegalMove("move overshoots home"))
                } else {
                    Ok(dest)
                }
            }
        }
    }

    /// Moves the token, resolves captures and finishing, and may end the
    /// game. The caller decides what happens to the turn pointer.
    fn apply_move(
        state: &mut LudoState,
        seat: u8,
        idx: u8,
        dest: u8,
        auto: bool,
        events: &mut Vec<GameEvent>,
    ) -> MoveEffect {
        let token = LudoState::token_base(seat) + idx as usize;
        state.token_positions[token] = dest;
        state.last_moved_token = token as u8;

        let moved = json!({ "player": seat, "tokenIndex": idx, "newPosition": dest });
        events.push(if auto {
            GameEvent::auto("TokenMoved", moved)
        } else {
            GameEvent::new("TokenMoved", moved)
        });

        // Capture: an opponent token on the same non-safe global cell goes
        // back to its base.
        let mut captured = false;
        if (TRACK_FIRST..=TRACK_LAST).contains(&dest) {
            let cell = LudoState::global_cell(seat, dest);
            if !LudoState::is_safe_cell(cell) {
                for other in 0..SEATS as u8 {
                    if other == seat || !state.seat_active(other) {
                        continue;
                    }
                    for other_idx in 0..TOKENS_PER_SEAT {
                        let other_token = LudoState::token_base(other) + other_idx;
                        let other_pos = state.token_positions[other_token];
                        if (TRACK_FIRST..=TRACK_LAST).contains(&other_pos)
                            && LudoState::global_cell(other, other_pos) == cell
                        {
                            state.token_positions[other_token] = BASE;
                            events.push(GameEvent::new(
                                "TokenCaptured",
                                json!({
                                    "capturedPlayer": other,
                                    "capturedToken": other_idx,
                                }),
                            ));
                            captured = true;
                        }
                    }
                }
            }
        }

        let mut seat_finished = false;
        if dest == HOME {
            let all_home = (0..TOKENS_PER_SEAT)
                .all(|i| state.token_positions[LudoState::token_base(seat) + i] == HOME);
            if all_home {
                Self::finish_seat(state, seat);
                events.push(GameEvent::new("PlayerFinished", json!({ "player": seat })));
                seat_finished = true;
                Self::close_if_decided(state, events);
            }
        }

        MoveEffect {
            captured,
            seat_finished,
        }
    }

    fn finish_seat(state: &mut LudoState, seat: u8) {
        state.finished_mask |= 1 << seat;
        state.finish_order[state.winners_count as usize] = seat;
        state.winners_count += 1;
    }

    /// When a single seat is left in play it is appended to the ranking as
    /// the loser and the game is over.
    fn close_if_decided(state: &mut LudoState, events: &mut Vec<GameEvent>) {
        if state.game_over || state.seats_in_play() != 1 {
            return;
        }
        if let Some(last) = (0..SEATS as u8).find(|s| state.seat_in_play(*s)) {
            Self::finish_seat(state, last);
        }
        state.game_over = true;
        events.push(GameEvent::new("GameEnded", json!({})));
    }

    /// Plays the current player's turn deterministically: auto-roll when
    /// needed, lowest-indexed legal move if any, then pass the turn. The
    /// auto path never grants extra turns.
    fn auto_play(&self, mut state: LudoState) -> EngineOutcome<LudoState> {
        let seat = state.current_player;
        let mut events = vec![GameEvent::new("TurnTimeout", json!({ "player": seat }))];

        let mut dice = state.last_dice_roll;
        if dice == 0 {
            dice = state.roll_dice();
            events.push(GameEvent::auto(
                "DiceRolled",
                json!({ "value": dice, "player": seat }),
            ));
        }

        let mask = state.legal_moves_mask(seat, dice);
        if mask != 0 {
            let idx = mask.trailing_zeros() as u8;
            if let Ok(dest) = Self::predict(&state, seat, idx, dice) {
                Self::apply_move(&mut state, seat, idx, dest, true, &mut events);
            }
        }

        if state.game_over {
            let ranking = state.ranking();
            return EngineOutcome::finished(state, events, ranking);
        }

        state.last_dice_roll = 0;
        state.consecutive_sixes = 0;
        state.advance_turn();
        events.push(turn_changed(&state));
        EngineOutcome::changed(state, events)
    }
}

impl GameEngine for LudoEngine {
    fn execute(
        &self,
        state: LudoState,
        _meta: &RoomMeta,
        cmd: &ActionCommand,
    ) -> Result<EngineOutcome<LudoState>, ActionFailure> {
        if state.game_over {
            return Err(ActionFailure::GameOver);
        }
        match cmd.action.as_str() {
            "roll" => self.do_roll(state, cmd),
            "move" => self.do_move(state, cmd),
            "forceTimeout" => {
                if !cmd.system {
                    return Err(ActionFailure::NotPrivileged);
                }
                Ok(self.auto_play(state))
            }
            other => Err(ActionFailure::UnknownAction(other.to_string())),
        }
    }

    fn check_timeouts(
        &self,
        state: LudoState,
        meta: &RoomMeta,
        now: i64,
    ) -> EngineOutcome<LudoState> {
        if state.game_over {
            return EngineOutcome::noop(state);
        }
        if now - meta.turn_started_at < meta.turn_timeout_secs() {
            return EngineOutcome::noop(state);
        }
        if state.seats_in_play() < 2 {
            return EngineOutcome::noop(state);
        }
        self.auto_play(state)
    }

    fn legal_actions(&self, state: &LudoState, seat: u8) -> Vec<String> {
        if state.game_over
            || !state.seat_in_play(seat)
            || state.seats_in_play() < 2
            || seat != state.current_player
        {
            return Vec::new();
        }
        match state.last_dice_roll {
            0 => vec!["roll".to_string()],
            6 => vec!["roll".to_string(), "move".to_string()],
            _ => vec!["move".to_string()],
        }
    }

    fn view(&self, state: &LudoState, meta: &RoomMeta) -> serde_json::Value {
        let legal_mask = if state.last_dice_roll != 0 {
            state.legal_moves_mask(state.current_player, state.last_dice_roll)
        } else {
            0
        };
        json!({
            "tokenPositions": state.token_positions.to_vec(),
            "currentPlayer": state.current_player,
            "lastDiceRoll": state.last_dice_roll,
            "consecutiveSixes": state.consecutive_sixes,
            "activeSeatsMask": state.active_seats_mask,
            "finishedMask": state.finished_mask,
            "winnerRanking": state.ranking(),
            "turnId": state.turn_id,
            "gameOver": state.game_over,
            "legalMovesMask": legal_mask,
            "lastMovedToken": if state.last_moved_token == UNSET {
                serde_json::Value::Null
            } else {
                json!(state.last_moved_token)
            },
            "players": meta.player_seats,
        })
    }
}

impl RoomHooks for LudoEngine {
    fn initial_state(&self, _meta: &RoomMeta, seed: u64) -> LudoState {
        LudoState::new(seed)
    }

    /// Two players sit on opposite corners; larger rooms fill in order.
    fn assign_seat(&self, meta: &RoomMeta) -> Option<u8> {
        let order: &[u8] = match meta.max_players {
            2 => &[0, 2],
            3 => &[0, 1, 2],
            _ => &[0, 1, 2, 3],
        };
        let taken = meta.occupied_seats();
        order.iter().copied().find(|s| !taken.contains(s))
    }

    fn player_joined(&self, mut state: LudoState, _meta: &RoomMeta, seat: u8) -> LudoState {
        state.active_seats_mask |= 1 << seat;
        if !state.seat_in_play(state.current_player) {
            if let Some(first) = (0..SEATS as u8).find(|s| state.seat_in_play(*s)) {
                state.current_player = first;
            }
        }
        state
    }

    fn player_left(
        &self,
        mut state: LudoState,
        _meta: &RoomMeta,
        seat: u8,
    ) -> EngineOutcome<LudoState> {
        if state.game_over || !state.seat_active(seat) {
            return EngineOutcome::noop(state);
        }
        // A finished seat keeps its place in the ranking; leaving changes
        // nothing on the board.
        if state.seat_finished(seat) {
            return EngineOutcome::noop(state);
        }

        let started = state.turn_id > 0
            || state.last_dice_roll != 0
            || state.token_positions.iter().any(|p| *p != BASE);

        state.active_seats_mask &= !(1 << seat);
        for i in 0..TOKENS_PER_SEAT {
            state.token_positions[LudoState::token_base(seat) + i] = BASE;
        }

        let mut events = Vec::new();
        if state.current_player == seat {
            state.last_dice_roll = 0;
            state.consecutive_sixes = 0;
            state.advance_turn();
            events.push(turn_changed(&state));
        }

        if started {
            Self::close_if_decided(&mut state, &mut events);
        }

        if state.game_over {
            let ranking = state.ranking();
            return EngineOutcome::finished(state, events, ranking);
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

    fn meta_with_seats(seats: &[(Uuid, u8)], max_players: u8) -> RoomMeta {
        RoomMeta {
            room_id: "abc123".into(),
            game_type: "ludo".into(),
            max_players,
            entry_fee: 100,
            config: HashMap::from([("boardSeats".into(), "4".into())]),
            is_public: true,
            player_seats: seats.iter().copied().collect(),
            pot: 0,
            turn_started_at: 0,
            created_at: 0,
        }
    }

    /// A started two-player game on the given seats.
    fn started_state(seats: &[u8]) -> LudoState {
        let engine = LudoEngine;
        let meta = meta_with_seats(&[], 2);
        let mut state = engine.initial_state(&meta, 99);
        for seat in seats {
            state = engine.player_joined(state, &meta, *seat);
        }
        state
    }

    fn roll(user: Uuid, seat: u8, value: u8) -> ActionCommand {
        ActionCommand {
            user_id: user,
            seat,
            action: "roll".into(),
            payload: json!({ "value": value }),
            system: true,
        }
    }

    fn player_move(user: Uuid, seat: u8, token: u8) -> ActionCommand {
        ActionCommand::player(user, seat, "move", json!({ "tokenIndex": token }))
    }

    fn event_names(events: &[GameEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.name).collect()
    }

    #[test]
    fn three_sixes_forfeit_the_turn() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let mut state = started_state(&[0, 2]);
        assert_eq!(state.active_seats_mask, 0b0101);

        let mut all_events = Vec::new();
        for _ in 0..3 {
            let out = engine.execute(state, &meta, &roll(a, 0, 6)).unwrap();
            state = out.state;
            all_events.extend(out.events);
        }

        let dice_rolled = all_events.iter().filter(|e| e.name == "DiceRolled").count();
        assert_eq!(dice_rolled, 3);
        let turn = all_events
            .iter()
            .find(|e| e.name == "TurnChanged")
            .expect("turn must change");
        assert_eq!(turn.data["newPlayer"], json!(2));
        assert_eq!(state.current_player, 2);
        assert_eq!(state.consecutive_sixes, 0);
        assert_eq!(state.last_dice_roll, 0);
    }

    #[test]
    fn entering_on_a_safe_square_does_not_capture() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 1)], 2);
        let mut state = started_state(&[0, 1]);
        // Seat 1 sits on seat 0's entry square: local 40 -> global 0.
        state.token_positions[LudoState::token_base(1)] = 40;

        let out = engine.execute(state, &meta, &roll(a, 0, 6)).unwrap();
        let out = engine.execute(out.state, &meta, &player_move(a, 0, 0)).unwrap();

        assert!(!event_names(&out.events).contains(&"TokenCaptured"));
        // The opponent token is untouched on the shared cell.
        assert_eq!(out.state.token_positions[LudoState::token_base(1)], 40);
        assert_eq!(out.state.token_positions[0], 1);
    }

    #[test]
    fn landing_on_an_opponent_captures_and_grants_an_extra_turn() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 1)], 2);
        let mut state = started_state(&[0, 1]);
        // Seat 0 token 0 at local 16 will land on local 21 -> global 20;
        // seat 1 token 0 at local 8 sits on global 20 as well, and 20 is
        // not a 13-multiple.
        state.token_positions[0] = 16;
        state.token_positions[LudoState::token_base(1)] = 8;

        let out = engine.execute(state, &meta, &roll(a, 0, 5)).unwrap();
        let out = engine.execute(out.state, &meta, &player_move(a, 0, 0)).unwrap();

        let captured = out
            .events
            .iter()
            .find(|e| e.name == "TokenCaptured")
            .expect("the opponent token is captured");
        assert_eq!(captured.data["capturedPlayer"], json!(1));
        assert_eq!(captured.data["capturedToken"], json!(0));
        assert_eq!(out.state.token_positions[LudoState::token_base(1)], BASE);
        assert_eq!(out.state.token_positions[0], 21);
        // Extra turn: still seat 0, fresh roll pending, no turn change.
        assert_eq!(out.state.current_player, 0);
        assert_eq!(out.state.last_dice_roll, 0);
        assert!(!event_names(&out.events).contains(&"TurnChanged"));
    }

    #[test]
    fn overshooting_home_is_rejected() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let mut state = started_state(&[0, 2]);
        state.token_positions[0] = 55;
        state.token_positions[1] = 30;
        let out = engine.execute(state, &meta, &roll(a, 0, 5)).unwrap();
        let err = engine
            .execute(out.state, &meta, &player_move(a, 0, 0))
            .unwrap_err();
        assert_eq!(err, ActionFailure::IllegalMove("move overshoots home"));
    }

    #[test]
    fn leaving_base_requires_a_six() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let mut state = started_state(&[0, 2]);
        state.token_positions[1] = 20; // keep a legal move so the roll sticks
        let out = engine.execute(state, &meta, &roll(a, 0, 3)).unwrap();
        let err = engine
            .execute(out.state, &meta, &player_move(a, 0, 0))
            .unwrap_err();
        assert_eq!(err, ActionFailure::IllegalMove("a six is needed to leave base"));
    }

    #[test]
    fn a_roll_without_legal_moves_passes_the_turn() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let mut state = started_state(&[0, 2]);
        // Everything home except one runner that would overshoot.
        for i in 0..TOKENS_PER_SEAT {
            state.token_positions[i] = HOME;
        }
        state.token_positions[3] = 56;
        state.finished_mask = 0; // not finished, one token still out
        let out = engine.execute(state, &meta, &roll(a, 0, 4)).unwrap();
        assert!(event_names(&out.events).contains(&"TurnChanged"));
        assert_eq!(out.state.current_player, 2);
        assert_eq!(out.state.last_dice_roll, 0);
    }

    #[test]
    fn finishing_all_tokens_ends_a_two_player_game() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let mut state = started_state(&[0, 2]);
        state.token_positions[0] = HOME;
        state.token_positions[1] = HOME;
        state.token_positions[2] = HOME;
        state.token_positions[3] = 52;
        let out = engine.execute(state, &meta, &roll(a, 0, 5)).unwrap();
        let out = engine.execute(out.state, &meta, &player_move(a, 0, 3)).unwrap();

        assert!(out.terminal);
        assert_eq!(out.winner_ranking, vec![0, 2]);
        let names = event_names(&out.events);
        assert!(names.contains(&"PlayerFinished"));
        assert!(names.contains(&"GameEnded"));
        assert!(out.state.game_over);
    }

    #[test]
    fn turn_rotation_skips_empty_and_finished_seats() {
        let mut state = started_state(&[0, 1, 3]);
        state.current_player = 0;
        state.finished_mask = 0b0010; // seat 1 finished
        state.advance_turn();
        assert_eq!(state.current_player, 3);
        assert_eq!(state.turn_id, 1);
    }

    #[test]
    fn timeout_auto_plays_the_stale_turn() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut meta = meta_with_seats(&[(a, 0), (b, 1)], 2);
        meta.turn_started_at = 1_000;
        let mut state = started_state(&[0, 1]);
        state.current_player = 1;
        state.last_dice_roll = 0;
        let turn_before = state.turn_id;

        // 60 seconds later with a 30 second clock.
        let out = engine.check_timeouts(state, &meta, 1_060);

        let names = event_names(&out.events);
        assert!(names.contains(&"TurnTimeout"));
        assert!(names.contains(&"TurnChanged"));
        let rolled = out
            .events
            .iter()
            .find(|e| e.name == "DiceRolled")
            .expect("the scheduler rolls for the player");
        assert_eq!(rolled.data["autoPlay"], json!(true));
        assert!(out.state.turn_id > turn_before || out.state.current_player != 1);
        assert!(out.should_broadcast);
    }

    #[test]
    fn timeout_is_a_noop_before_the_clock_runs_out() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut meta = meta_with_seats(&[(a, 0), (b, 1)], 2);
        meta.turn_started_at = 1_000;
        let state = started_state(&[0, 1]);
        let out = engine.check_timeouts(state, &meta, 1_010);
        assert!(out.events.is_empty());
        assert!(!out.should_broadcast);
    }

    #[test]
    fn leaving_mid_game_hands_the_win_to_the_last_seat() {
        let engine = LudoEngine;
        let meta = meta_with_seats(&[], 2);
        let mut state = started_state(&[0, 2]);
        state.turn_id = 5; // game has started
        let out = engine.player_left(state, &meta, 2);
        assert!(out.terminal);
        assert_eq!(out.winner_ranking, vec![0]);
        assert!(out.state.game_over);
    }

    #[test]
    fn forced_dice_require_the_system_flag() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let state = started_state(&[0, 2]);
        let mut cmd = roll(a, 0, 6);
        cmd.system = false;
        assert_eq!(
            engine.execute(state, &meta, &cmd).unwrap_err(),
            ActionFailure::NotPrivileged
        );
    }

    #[test]
    fn sixes_keep_counting_across_extra_turns() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let mut state = started_state(&[0, 2]);

        // Roll a six, play it, twice; the third six forfeits the turn even
        // though two moves happened in between.
        for _ in 0..2 {
            let out = engine.execute(state, &meta, &roll(a, 0, 6)).unwrap();
            let out = engine
                .execute(out.state, &meta, &player_move(a, 0, 0))
                .unwrap();
            state = out.state;
            assert_eq!(state.current_player, 0);
        }
        assert_eq!(state.consecutive_sixes, 2);
        let out = engine.execute(state, &meta, &roll(a, 0, 6)).unwrap();
        assert!(event_names(&out.events).contains(&"TurnChanged"));
        assert_eq!(out.state.current_player, 2);
        assert_eq!(out.state.consecutive_sixes, 0);
    }

    #[test]
    fn tokens_in_the_home_column_cannot_be_captured() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 1)], 2);
        let mut state = started_state(&[0, 1]);
        // Seat 1 token at local 54 sits in its home column; read as a track
        // coordinate it would land on global 14, exactly where seat 0 is
        // about to move (local 15). Home-column tokens are out of reach.
        state.token_positions[LudoState::token_base(1)] = 54;
        state.token_positions[0] = 10;

        let out = engine.execute(state, &meta, &roll(a, 0, 5)).unwrap();
        let out = engine
            .execute(out.state, &meta, &player_move(a, 0, 0))
            .unwrap();
        assert!(!event_names(&out.events).contains(&"TokenCaptured"));
        assert_eq!(out.state.token_positions[LudoState::token_base(1)], 54);
        assert_eq!(out.state.token_positions[0], 15);
    }

    #[test]
    fn force_timeout_requires_the_system_flag() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let state = started_state(&[0, 2]);

        let cmd = ActionCommand::player(a, 0, "forceTimeout", json!({}));
        assert_eq!(
            engine.execute(state, &meta, &cmd).unwrap_err(),
            ActionFailure::NotPrivileged
        );

        let mut cmd = ActionCommand::player(a, 0, "forceTimeout", json!({}));
        cmd.system = true;
        let state = started_state(&[0, 2]);
        let out = engine.execute(state, &meta, &cmd).unwrap();
        assert!(event_names(&out.events).contains(&"TurnTimeout"));
    }

    #[test]
    fn legal_actions_follow_the_turn_state() {
        let engine = LudoEngine;
        let mut state = started_state(&[0, 2]);
        assert_eq!(engine.legal_actions(&state, 0), vec!["roll"]);
        assert!(engine.legal_actions(&state, 2).is_empty());

        state.last_dice_roll = 4;
        assert_eq!(engine.legal_actions(&state, 0), vec!["move"]);
        state.last_dice_roll = 6;
        assert_eq!(engine.legal_actions(&state, 0), vec!["roll", "move"]);

        state.game_over = true;
        assert!(engine.legal_actions(&state, 0).is_empty());
    }

    #[test]
    fn the_view_exposes_the_masks_and_hides_nothing_extra() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let mut state = started_state(&[0, 2]);
        state.last_dice_roll = 6;

        let view = engine.view(&state, &meta);
        assert_eq!(view["currentPlayer"], json!(0));
        assert_eq!(view["lastDiceRoll"], json!(6));
        assert_eq!(view["activeSeatsMask"], json!(0b0101));
        // Everything is in base and the dice show six: all four may leave.
        assert_eq!(view["legalMovesMask"], json!(0b1111));
        assert_eq!(view["winnerRanking"], json!([]));
        assert!(view["lastMovedToken"].is_null());
    }

    /// Drives a whole two-player game through the auto-play path and checks
    /// the terminal invariants: the ranking is a permutation of the active
    /// seats and the turn counter only ever grows.
    #[test]
    fn auto_play_finishes_a_game_with_a_consistent_ranking() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        meta.turn_started_at = 0;
        let mut state = started_state(&[0, 2]);
        let mut last_turn_id = state.turn_id;

        let mut terminal = false;
        for _ in 0..50_000 {
            let out = engine.check_timeouts(state, &meta, 1_000_000);
            assert!(out.state.turn_id >= last_turn_id);
            last_turn_id = out.state.turn_id;
            state = out.state;
            if out.terminal {
                let mut ranking = out.winner_ranking.clone();
                ranking.sort_unstable();
                assert_eq!(ranking, vec![0, 2]);
                terminal = true;
                break;
            }
        }
        assert!(terminal, "the game must finish under auto-play");
        assert!(state.game_over);
    }

    #[test]
    fn state_round_trips_after_play() {
        let engine = LudoEngine;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let meta = meta_with_seats(&[(a, 0), (b, 2)], 2);
        let state = started_state(&[0, 2]);
        let out = engine.execute(state, &meta, &roll(a, 0, 6)).unwrap();
        let out = engine.execute(out.state, &meta, &player_move(a, 0, 0)).unwrap();

        let image = LudoEngine::encode(&out.state);
        assert_eq!(LudoEngine::decode(&image).unwrap(), out.state);
    }
}
