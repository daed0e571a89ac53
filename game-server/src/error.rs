//! The server wide error type.
//!
//! Infrastructure failures carry their source; domain rejections are their
//! own variants so the dispatcher can map them to categorical client
//! strings without leaking details. Operator detail goes to the logs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Module(#[from] game_core::ModuleError),

    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("unknown game type {0}")]
    UnknownGameType(String),
    #[error("unknown room template {0}")]
    UnknownTemplate(String),
    #[error("room is busy, retry")]
    LockBusy,
    #[error("too many requests")]
    RateLimited,
    #[error("the room is full")]
    RoomFull,
    #[error("already seated in a room")]
    AlreadyInRoom,
    #[error("not seated in this room")]
    NotInRoom,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("transaction amount must not be zero")]
    ZeroAmount,
    #[error("wallet transaction conflicted, retry")]
    WalletConflict,
    #[error("unknown outbox event type {0}")]
    UnknownEvent(String),
}

impl AppError {
    /// The categorical string shown to clients. Never includes backend
    /// detail; the full error is logged server side.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Redis(_) | AppError::Database(_) | AppError::Serialization(_) => {
                "internal error".to_string()
            }
            AppError::Module(game_core::ModuleError::Action(failure)) => failure.to_string(),
            AppError::Module(game_core::ModuleError::Codec(_)) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}
