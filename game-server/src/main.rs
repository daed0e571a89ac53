mod app;
mod archive;
mod auth;
mod config;
mod db;
mod economy;
mod error;
mod hub;
mod outbox;
mod registry;
mod rooms;
mod scheduler;
mod snapshot;
mod state_store;

use crate::app::AppState;
use crate::archive::ArchivalService;
use crate::auth::ApiKeyVerifier;
use crate::config::{Endpoints, ServerConfig};
use crate::economy::EconomyService;
use crate::hub::Hub;
use crate::outbox::OutboxDispatcher;
use crate::registry::RoomRegistry;
use crate::state_store::GameStateStore;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use game_core::ModuleRegistry;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ROOM_LIST_PAGE_SIZE: isize = 20;

#[tokio::main]
/// Activates error tracing, wires the shared stores and the module
/// registry, spawns the background workers (outbox, turn-timeout sweep,
/// snapshotting, idle-group cleanup), then serves the WebSocket and the
/// auxiliary GET routes until a shutdown signal arrives.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    dotenvy::dotenv().ok();
    let endpoints = Endpoints::from_env().expect("endpoint configuration");
    let config = ServerConfig::load("ServerConfig.json")
        .await
        .expect("server configuration");
    if !config.security.require_https_in_production {
        // TLS termination happens in front of this process; the knob only
        // silences the reminder for local setups.
        tracing::warn!("HTTPS enforcement is disabled by configuration.");
    }

    let pool = db::connect(&endpoints.database_url)
        .await
        .expect("database connection");
    db::ensure_schema(&pool).await.expect("database schema");
    db::seed_default_templates(&pool)
        .await
        .expect("template seed");
    let templates = rooms::load_templates(&pool).await.expect("room templates");

    let redis_client = redis::Client::open(endpoints.redis_url.as_str()).expect("redis client");
    let redis_conn = redis_client
        .get_connection_manager()
        .await
        .expect("redis connection");

    // The module set is fixed at startup; lookup is a plain string key.
    let mut modules = ModuleRegistry::new();
    modules.register(Arc::new(ludo::module()));
    modules.register(Arc::new(luckymine::module()));
    tracing::info!(games = ?modules.game_types(), "Game modules registered.");

    let registry = RoomRegistry::new(redis_conn.clone());
    let store = GameStateStore::new(redis_conn);
    let economy = EconomyService::new(pool.clone(), registry.clone(), config.economy.initial_coins);
    let verifier = Arc::new(ApiKeyVerifier::new(config.security.clone()));

    let app_state = Arc::new(AppState {
        config,
        db: pool.clone(),
        modules,
        registry: registry.clone(),
        store: store.clone(),
        hub: Hub::new(),
        economy: economy.clone(),
        templates,
        verifier,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let archive = ArchivalService::new(economy, store, registry.clone());
    let dispatcher = OutboxDispatcher::new(
        pool,
        registry,
        archive,
        app_state.config.economy.idempotency_key_retention_days,
    );
    tokio::spawn(dispatcher.run(shutdown_rx.clone()));
    tokio::spawn(scheduler::run(app_state.clone(), shutdown_rx.clone()));
    tokio::spawn(snapshot::run(app_state.clone(), shutdown_rx.clone()));

    // Watchdog for broadcast groups nobody listens to anymore.
    let sweeper_state = app_state.clone();
    let mut sweeper_shutdown = shutdown_rx;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => sweeper_state.hub.sweep_idle_groups().await,
                _ = sweeper_shutdown.changed() => return,
            }
        }
    });

    let router = Router::new()
        .route("/ws", get(hub::session::websocket_handler))
        .route("/healthz", get(health_handler))
        .route("/rooms/{game_type}", get(rooms_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&endpoints.bind_addr)
        .await
        .expect("listener bind");
    tracing::info!(addr = %endpoints.bind_addr, "Server listening.");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received.");
            let _ = shutdown_tx.send(true);
        })
        .await
        .expect("server run");
}

/// Pings both backing stores.
async fn health_handler(State(app): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    if sqlx::query("SELECT 1").execute(&app.db).await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "database unavailable");
    }
    if app.registry.ping().await.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "registry unavailable");
    }
    (StatusCode::OK, "ok")
}

/// One page of a game's public rooms, oldest first.
async fn rooms_handler(
    Path(game_type): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(app): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if app.modules.get(&game_type).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let page: isize = params
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
        .max(0);

    let ids = app
        .registry
        .rooms_page(&game_type, page * ROOM_LIST_PAGE_SIZE, ROOM_LIST_PAGE_SIZE)
        .await
        .map_err(|err| {
            tracing::error!(?err, game_type, "Room listing failed.");
            StatusCode::SERVICE_UNAVAILABLE
        })?;
    let rooms = app
        .store
        .load_many(&game_type, &ids)
        .await
        .map_err(|err| {
            tracing::error!(?err, game_type, "Room listing load failed.");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    let listing: Vec<serde_json::Value> = rooms
        .iter()
        .filter(|(_, _, meta)| meta.is_public)
        .map(|(room_id, _, meta)| {
            json!({
                "roomId": room_id,
                "gameType": meta.game_type,
                "players": meta.player_seats.len(),
                "maxPlayers": meta.max_players,
                "entryFee": meta.entry_fee,
            })
        })
        .collect();
    Ok(Json(json!({ "page": page, "rooms": listing })))
}
