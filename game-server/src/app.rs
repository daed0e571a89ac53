//! The shared application state.

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::economy::EconomyService;
use crate::error::AppError;
use crate::hub::Hub;
use crate::registry::RoomRegistry;
use crate::rooms::RoomTemplate;
use crate::state_store::GameStateStore;
use chrono::Utc;
use game_core::{GameModule, ModuleRegistry};
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

/// Wall clock in unix seconds; the single time source of the runtime.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub struct AppState {
    pub config: ServerConfig,
    pub db: PgPool,
    pub modules: ModuleRegistry,
    pub registry: RoomRegistry,
    pub store: GameStateStore,
    pub hub: Hub,
    pub economy: EconomyService,
    /// Room blueprints, loaded once at startup.
    pub templates: HashMap<String, RoomTemplate>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn module(&self, game_type: &str) -> Result<Arc<dyn GameModule>, AppError> {
        self.modules
            .get(game_type)
            .ok_or_else(|| AppError::UnknownGameType(game_type.to_string()))
    }
}
