//! Core abstractions between the server runtime and the game modules.
//!
//! A game module is a pure, deterministic state machine plus a byte codec
//! for its state. The server never interprets game rules; it loads the
//! state image, hands it to the module together with the room metadata and
//! a command, and persists whatever comes back. Per-room serialization is
//! the server's job (distributed room lock), so a module call is atomic
//! from the caller's point of view.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         game-server                          │
//! │  ┌────────────┐   ┌────────────────┐   ┌─────────────────┐   │
//! │  │ Dispatcher │──►│ ModuleRegistry │──►│ dyn GameModule  │   │
//! │  │ (lock+I/O) │   │ (string key)   │   │ (decode/step/   │   │
//! │  └────────────┘   └────────────────┘   │  encode)        │   │
//! │                                        └───────┬─────────┘   │
//! └────────────────────────────────────────────────┼─────────────┘
//!                                                  │ typed traits
//!                                       ┌──────────▼──────────┐
//!                                       │  games/* crates     │
//!                                       │  GameEngine + hooks │
//!                                       └─────────────────────┘
//! ```
//!
//! Games implement the typed traits ([`GameEngine`], [`RoomHooks`],
//! [`StateCodec`]) and are wrapped by [`TypedModule`] into the erased
//! [`GameModule`] surface the server works with. Modules are registered
//! explicitly at process start; lookup is a string key, there is no
//! runtime discovery.

pub mod codec;
pub mod command;
pub mod engine;
pub mod error;
pub mod event;
pub mod meta;
pub mod module;

pub use codec::StateCodec;
pub use command::ActionCommand;
pub use engine::{EngineOutcome, GameEngine, RoomHooks};
pub use error::{ActionFailure, CodecError, ModuleError, SeatError};
pub use event::GameEvent;
pub use meta::RoomMeta;
pub use module::{EngineKind, GameModule, ModuleRegistry, StepResult, TypedModule};
