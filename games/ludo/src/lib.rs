//! The Ludo game module: a four seat race game with dice and capture.
//!
//! The crate provides the pure state machine ([`LudoEngine`]) plus the
//! 36-byte state codec. The server wires it into its module registry as a
//! turn-based game; nothing in here performs I/O.

pub mod engine;
pub mod state;

pub use engine::LudoEngine;
pub use state::LudoState;

use game_core::{EngineKind, TypedModule};

/// The registry key of this module.
pub const GAME_TYPE: &str = "ludo";

/// Builds the module for registration at server start.
pub fn module() -> TypedModule<LudoEngine> {
    TypedModule::new(GAME_TYPE, EngineKind::TurnBased, LudoEngine)
}
