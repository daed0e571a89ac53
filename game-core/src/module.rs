//! The erased module surface and the registry the server works with.
//!
//! The server core is generic over games: it stores byte images and calls
//! through [`GameModule`], which decodes, steps the typed engine and
//! re-encodes. [`TypedModule`] is the only bridge between the typed traits
//! and this surface. Modules are registered once at process start; lookup
//! is a plain string key.

use crate::codec::StateCodec;
use crate::command::ActionCommand;
use crate::engine::{EngineOutcome, GameEngine, RoomHooks};
use crate::error::ModuleError;
use crate::event::GameEvent;
use crate::meta::RoomMeta;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// The capability tag of a module. Turn-based games get the scheduler's
/// timeout sweep; instant games are never visited by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    TurnBased,
    Instant,
}

/// One engine step over byte images.
#[derive(Debug)]
pub struct StepResult {
    pub state: Bytes,
    pub events: Vec<GameEvent>,
    pub should_broadcast: bool,
    pub terminal: bool,
    pub winner_ranking: Vec<u8>,
}

/// The erased capability set of one game, as seen by the server.
pub trait GameModule: Send + Sync {
    fn game_type(&self) -> &'static str;
    fn kind(&self) -> EngineKind;
    fn encoded_state_len(&self) -> usize;

    fn new_room_state(&self, meta: &RoomMeta, seed: u64) -> Result<Bytes, ModuleError>;
    fn assign_seat(&self, meta: &RoomMeta) -> Option<u8>;
    fn player_joined(&self, raw: &[u8], meta: &RoomMeta, seat: u8) -> Result<Bytes, ModuleError>;
    fn player_left(&self, raw: &[u8], meta: &RoomMeta, seat: u8)
    -> Result<StepResult, ModuleError>;

    fn execute(
        &self,
        raw: &[u8],
        meta: &RoomMeta,
        cmd: &ActionCommand,
    ) -> Result<StepResult, ModuleError>;
    fn check_timeouts(
        &self,
        raw: &[u8],
        meta: &RoomMeta,
        now: i64,
    ) -> Result<StepResult, ModuleError>;
    fn legal_actions(&self, raw: &[u8], seat: u8) -> Result<Vec<String>, ModuleError>;
    fn view(&self, raw: &[u8], meta: &RoomMeta) -> Result<serde_json::Value, ModuleError>;
}

/// Wraps a typed engine into the erased surface.
pub struct TypedModule<G> {
    game_type: &'static str,
    kind: EngineKind,
    engine: G,
}

impl<G> TypedModule<G> {
    pub fn new(game_type: &'static str, kind: EngineKind, engine: G) -> Self {
        Self {
            game_type,
            kind,
            engine,
        }
    }
}

fn seal<G: StateCodec>(outcome: EngineOutcome<G::State>) -> StepResult {
    StepResult {
        state: G::encode(&outcome.state),
        events: outcome.events,
        should_broadcast: outcome.should_broadcast,
        terminal: outcome.terminal,
        winner_ranking: outcome.winner_ranking,
    }
}

impl<G> GameModule for TypedModule<G>
where
    G: GameEngine + RoomHooks + Send + Sync,
{
    fn game_type(&self) -> &'static str {
        self.game_type
    }

    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn encoded_state_len(&self) -> usize {
        G::ENCODED_LEN
    }

    fn new_room_state(&self, meta: &RoomMeta, seed: u64) -> Result<Bytes, ModuleError> {
        let state = self.engine.initial_state(meta, seed);
        Ok(G::encode(&state))
    }

    fn assign_seat(&self, meta: &RoomMeta) -> Option<u8> {
        RoomHooks::assign_seat(&self.engine, meta)
    }

    fn player_joined(&self, raw: &[u8], meta: &RoomMeta, seat: u8) -> Result<Bytes, ModuleError> {
        let state = G::decode(raw)?;
        let state = self.engine.player_joined(state, meta, seat);
        Ok(G::encode(&state))
    }

    fn player_left(
        &self,
        raw: &[u8],
        meta: &RoomMeta,
        seat: u8,
    ) -> Result<StepResult, ModuleError> {
        let state = G::decode(raw)?;
        Ok(seal::<G>(self.engine.player_left(state, meta, seat)))
    }

    fn execute(
        &self,
        raw: &[u8],
        meta: &RoomMeta,
        cmd: &ActionCommand,
    ) -> Result<StepResult, ModuleError> {
        let state = G::decode(raw)?;
        let outcome = self.engine.execute(state, meta, cmd)?;
        Ok(seal::<G>(outcome))
    }

    fn check_timeouts(
        &self,
        raw: &[u8],
        meta: &RoomMeta,
        now: i64,
    ) -> Result<StepResult, ModuleError> {
        let state = G::decode(raw)?;
        Ok(seal::<G>(self.engine.check_timeouts(state, meta, now)))
    }

    fn legal_actions(&self, raw: &[u8], seat: u8) -> Result<Vec<String>, ModuleError> {
        let state = G::decode(raw)?;
        Ok(self.engine.legal_actions(&state, seat))
    }

    fn view(&self, raw: &[u8], meta: &RoomMeta) -> Result<serde_json::Value, ModuleError> {
        let state = G::decode(raw)?;
        Ok(self.engine.view(&state, meta))
    }
}

/// The immutable module set, populated at startup and shared read-only.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<&'static str, Arc<dyn GameModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module under its game type. Later registrations of the
    /// same key replace earlier ones, which only matters in tests.
    pub fn register(&mut self, module: Arc<dyn GameModule>) {
        self.modules.insert(module.game_type(), module);
    }

    pub fn get(&self, game_type: &str) -> Option<Arc<dyn GameModule>> {
        self.modules.get(game_type).cloned()
    }

    pub fn game_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.modules.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// The modules the timeout scheduler sweeps.
    pub fn turn_based(&self) -> Vec<Arc<dyn GameModule>> {
        let mut modules: Vec<Arc<dyn GameModule>> = self
            .modules
            .values()
            .filter(|m| m.kind() == EngineKind::TurnBased)
            .cloned()
            .collect();
        modules.sort_by_key(|m| m.game_type());
        modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ActionFailure, CodecError};
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    /// A one-byte counter game: `bump` increments, ten ends the game.
    struct CounterEngine;

    impl crate::codec::StateCodec for CounterEngine {
        type State = u8;
        const ENCODED_LEN: usize = 1;

        fn encode(state: &u8) -> Bytes {
            Bytes::copy_from_slice(&[*state])
        }

        fn decode(raw: &[u8]) -> Result<u8, CodecError> {
            Self::check_len(raw)?;
            Ok(raw[0])
        }
    }

    impl crate::engine::GameEngine for CounterEngine {
        fn execute(
            &self,
            state: u8,
            _meta: &RoomMeta,
            cmd: &ActionCommand,
        ) -> Result<EngineOutcome<u8>, ActionFailure> {
            if cmd.action != "bump" {
                return Err(ActionFailure::UnknownAction(cmd.action.clone()));
            }
            let state = state + 1;
            if state >= 10 {
                return Ok(EngineOutcome::finished(state, Vec::new(), vec![cmd.seat]));
            }
            Ok(EngineOutcome::changed(state, Vec::new()))
        }

        fn check_timeouts(&self, state: u8, _meta: &RoomMeta, _now: i64) -> EngineOutcome<u8> {
            EngineOutcome::noop(state)
        }

        fn legal_actions(&self, _state: &u8, _seat: u8) -> Vec<String> {
            vec!["bump".to_string()]
        }

        fn view(&self, state: &u8, _meta: &RoomMeta) -> serde_json::Value {
            json!({ "count": state })
        }
    }

    impl crate::engine::RoomHooks for CounterEngine {
        fn initial_state(&self, _meta: &RoomMeta, _seed: u64) -> u8 {
            0
        }
        fn assign_seat(&self, meta: &RoomMeta) -> Option<u8> {
            (meta.player_seats.len() as u8).into()
        }
        fn player_joined(&self, state: u8, _meta: &RoomMeta, _seat: u8) -> u8 {
            state
        }
        fn player_left(&self, state: u8, _meta: &RoomMeta, _seat: u8) -> EngineOutcome<u8> {
            EngineOutcome::noop(state)
        }
    }

    fn counter_meta() -> RoomMeta {
        RoomMeta {
            room_id: "c0ffee".into(),
            game_type: "counter".into(),
            max_players: 2,
            entry_fee: 0,
            config: HashMap::new(),
            is_public: true,
            player_seats: HashMap::new(),
            pot: 0,
            turn_started_at: 0,
            created_at: 0,
        }
    }

    #[test]
    fn the_typed_adapter_round_trips_through_bytes() {
        let module = TypedModule::new("counter", EngineKind::Instant, CounterEngine);
        let meta = counter_meta();
        let raw = module.new_room_state(&meta, 7).unwrap();
        assert_eq!(raw.as_ref(), &[0]);

        let cmd = ActionCommand::player(Uuid::new_v4(), 0, "bump", json!({}));
        let step = module.execute(&raw, &meta, &cmd).unwrap();
        assert_eq!(step.state.as_ref(), &[1]);
        assert!(step.should_broadcast);
        assert!(!step.terminal);

        let view = module.view(&step.state, &meta).unwrap();
        assert_eq!(view["count"], json!(1));
    }

    #[test]
    fn adapter_surfaces_rejections_and_codec_errors() {
        let module = TypedModule::new("counter", EngineKind::Instant, CounterEngine);
        let meta = counter_meta();
        let raw = module.new_room_state(&meta, 7).unwrap();

        let bad = ActionCommand::player(Uuid::new_v4(), 0, "jump", json!({}));
        assert!(matches!(
            module.execute(&raw, &meta, &bad),
            Err(ModuleError::Action(ActionFailure::UnknownAction(_)))
        ));

        // A truncated image is a codec error, not an action rejection.
        assert!(matches!(
            module.execute(&[], &meta, &bad),
            Err(ModuleError::Codec(CodecError::Length { .. }))
        ));
    }

    struct FakeModule {
        game_type: &'static str,
        kind: EngineKind,
    }

    impl GameModule for FakeModule {
        fn game_type(&self) -> &'static str {
            self.game_type
        }
        fn kind(&self) -> EngineKind {
            self.kind
        }
        fn encoded_state_len(&self) -> usize {
            1
        }
        fn new_room_state(&self, _meta: &RoomMeta, _seed: u64) -> Result<Bytes, ModuleError> {
            Ok(Bytes::from_static(&[0]))
        }
        fn assign_seat(&self, _meta: &RoomMeta) -> Option<u8> {
            Some(0)
        }
        fn player_joined(
            &self,
            raw: &[u8],
            _meta: &RoomMeta,
            _seat: u8,
        ) -> Result<Bytes, ModuleError> {
            Ok(Bytes::copy_from_slice(raw))
        }
        fn player_left(
            &self,
            raw: &[u8],
            _meta: &RoomMeta,
            _seat: u8,
        ) -> Result<StepResult, ModuleError> {
            Ok(StepResult {
                state: Bytes::copy_from_slice(raw),
                events: Vec::new(),
                should_broadcast: false,
                terminal: false,
                winner_ranking: Vec::new(),
            })
        }
        fn execute(
            &self,
            raw: &[u8],
            _meta: &RoomMeta,
            _cmd: &ActionCommand,
        ) -> Result<StepResult, ModuleError> {
            Ok(StepResult {
                state: Bytes::copy_from_slice(raw),
                events: Vec::new(),
                should_broadcast: true,
                terminal: false,
                winner_ranking: Vec::new(),
            })
        }
        fn check_timeouts(
            &self,
            raw: &[u8],
            _meta: &RoomMeta,
            _now: i64,
        ) -> Result<StepResult, ModuleError> {
            self.player_left(raw, _meta, 0)
        }
        fn legal_actions(&self, _raw: &[u8], _seat: u8) -> Result<Vec<String>, ModuleError> {
            Ok(Vec::new())
        }
        fn view(&self, _raw: &[u8], _meta: &RoomMeta) -> Result<serde_json::Value, ModuleError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn lookup_is_by_game_type() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(FakeModule {
            game_type: "chess",
            kind: EngineKind::TurnBased,
        }));
        registry.register(Arc::new(FakeModule {
            game_type: "slots",
            kind: EngineKind::Instant,
        }));

        assert!(registry.get("chess").is_some());
        assert!(registry.get("poker").is_none());
        assert_eq!(registry.game_types(), vec!["chess", "slots"]);
    }

    #[test]
    fn the_scheduler_only_sees_turn_based_modules() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(FakeModule {
            game_type: "chess",
            kind: EngineKind::TurnBased,
        }));
        registry.register(Arc::new(FakeModule {
            game_type: "slots",
            kind: EngineKind::Instant,
        }));

        let swept = registry.turn_based();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].game_type(), "chess");
    }
}
