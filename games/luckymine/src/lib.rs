//! The LuckyMine game module: a tile-reveal risk game.
//!
//! Players take turns revealing tiles on a shared board. Safe tiles grow
//! the pot along a reward slope; hitting a mine ends the round for the
//! room. The current player may cash out instead of revealing.

pub mod engine;
pub mod state;

pub use engine::MineEngine;
pub use state::MineState;

use game_core::{EngineKind, TypedModule};

/// The registry key of this module.
pub const GAME_TYPE: &str = "luckymine";

/// Builds the module for registration at server start. LuckyMine has no
/// turn clock, so it registers as an instant game and the timeout sweep
/// skips it.
pub fn module() -> TypedModule<MineEngine> {
    TypedModule::new(GAME_TYPE, EngineKind::Instant, MineEngine)
}
