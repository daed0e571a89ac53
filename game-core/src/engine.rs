//! The typed engine and room-lifecycle traits games implement.

use crate::codec::StateCodec;
use crate::command::ActionCommand;
use crate::error::ActionFailure;
use crate::event::GameEvent;
use crate::meta::RoomMeta;

/// The result of one engine step. The state inside is the complete next
/// state; engines never mutate in place, the dispatcher persists whatever
/// comes back here.
#[derive(Debug)]
pub struct EngineOutcome<S> {
    pub state: S,
    pub events: Vec<GameEvent>,
    /// Whether the room group should receive a fresh state snapshot.
    pub should_broadcast: bool,
    /// The game reached its end with this step.
    pub terminal: bool,
    /// Seats in finishing order, filled when `terminal` is set.
    pub winner_ranking: Vec<u8>,
}

impl<S> EngineOutcome<S> {
    /// Nothing happened; nothing is broadcast or persisted differently.
    pub fn noop(state: S) -> Self {
        Self {
            state,
            events: Vec::new(),
            should_broadcast: false,
            terminal: false,
            winner_ranking: Vec::new(),
        }
    }

    /// A regular state transition with its events.
    pub fn changed(state: S, events: Vec<GameEvent>) -> Self {
        Self {
            state,
            events,
            should_broadcast: true,
            terminal: false,
            winner_ranking: Vec::new(),
        }
    }

    /// A transition that ended the game.
    pub fn finished(state: S, events: Vec<GameEvent>, winner_ranking: Vec<u8>) -> Self {
        Self {
            state,
            events,
            should_broadcast: true,
            terminal: true,
            winner_ranking,
        }
    }
}

/// A pure, deterministic game state machine. No I/O in here; the server
/// wraps every call with load/save and holds the room lock for the
/// duration, so a single call is atomic from the caller's view.
pub trait GameEngine: StateCodec {
    /// Validates and applies one action. A rejection leaves no trace; the
    /// dispatcher only persists on `Ok`.
    fn execute(
        &self,
        state: Self::State,
        meta: &RoomMeta,
        cmd: &ActionCommand,
    ) -> Result<EngineOutcome<Self::State>, ActionFailure>;

    /// The scheduler's entry point. Must return a no-op when the game is
    /// terminal or the turn clock has not run out yet; otherwise advances
    /// the game deterministically on behalf of the current player.
    fn check_timeouts(
        &self,
        state: Self::State,
        meta: &RoomMeta,
        now: i64,
    ) -> EngineOutcome<Self::State>;

    /// The actions the given seat could legally perform right now.
    fn legal_actions(&self, state: &Self::State, seat: u8) -> Vec<String>;

    /// The client-facing snapshot of the state.
    fn view(&self, state: &Self::State, meta: &RoomMeta) -> serde_json::Value;
}

/// Room lifecycle hooks. Seat selection and the join/leave state mutations
/// are game specific (Ludo places two players on opposite corners, a mine
/// field is laid out at creation), so they live next to the engine.
pub trait RoomHooks: StateCodec {
    /// Builds the initial state for a fresh room. The seed feeds whatever
    /// randomness the game fixes at creation time.
    fn initial_state(&self, meta: &RoomMeta, seed: u64) -> Self::State;

    /// Picks the seat for the next joiner, `None` when no seat fits.
    fn assign_seat(&self, meta: &RoomMeta) -> Option<u8>;

    /// Marks the seat active in the game state.
    fn player_joined(&self, state: Self::State, meta: &RoomMeta, seat: u8) -> Self::State;

    /// Removes the seat from play. May end the game (last opponent left),
    /// which the outcome reports like any other terminal transition.
    fn player_left(
        &self,
        state: Self::State,
        meta: &RoomMeta,
        seat: u8,
    ) -> EngineOutcome<Self::State>;
}
