//! Error types shared between the server and the game modules.

use thiserror::Error;

/// A rejected game action. These are expected outcomes; the dispatcher
/// reports them to the caller only and leaves the room state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionFailure {
    #[error("not your turn")]
    NotYourTurn,
    #[error("the game is already over")]
    GameOver,
    #[error("roll the dice first")]
    MustRollFirst,
    #[error("the dice were already rolled")]
    AlreadyRolled,
    #[error("illegal move: {0}")]
    IllegalMove(&'static str),
    #[error("unknown action {0}")]
    UnknownAction(String),
    #[error("malformed payload: {0}")]
    BadPayload(&'static str),
    #[error("caller holds no seat in this room")]
    NotSeated,
    #[error("the room is not ready to play")]
    NotReady,
    #[error("only the system caller may do this")]
    NotPrivileged,
}

/// A state image that does not decode. Unlike [`ActionFailure`] this points
/// at corruption or a version mismatch and is surfaced as an internal error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("state image has {got} bytes, expected {want}")]
    Length { want: usize, got: usize },
    #[error("state field {field} is out of range")]
    Range { field: &'static str },
}

/// Everything a module call can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Action(#[from] ActionFailure),
}

/// Seat bookkeeping violations on the room metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeatError {
    #[error("the room is full")]
    RoomFull,
    #[error("seat {0} is already taken")]
    SeatTaken(u8),
    #[error("user is already seated")]
    AlreadySeated,
    #[error("seat {0} does not exist in this room")]
    NoSuchSeat(u8),
}
