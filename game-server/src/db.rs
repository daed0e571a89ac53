//! Postgres pool setup and schema bootstrap.
//!
//! Full migration tooling is outside this repo; `ensure_schema` issues
//! idempotent DDL at startup so a fresh database works out of the box and
//! an existing one is left alone.

use crate::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};

pub async fn connect(database_url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS wallet_account (
        user_id    UUID PRIMARY KEY,
        coins      BIGINT NOT NULL CHECK (coins >= 0),
        version    UUID NOT NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS wallet_transaction (
        id              UUID PRIMARY KEY,
        user_id         UUID NOT NULL,
        amount          BIGINT NOT NULL CHECK (amount <> 0),
        balance_after   BIGINT NOT NULL,
        tx_type         TEXT NOT NULL,
        description     TEXT NOT NULL,
        reference_id    TEXT,
        idempotency_key TEXT UNIQUE,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS wallet_transaction_user_created
        ON wallet_transaction (user_id, created_at)"#,
    r#"CREATE INDEX IF NOT EXISTS wallet_transaction_user_reference
        ON wallet_transaction (user_id, reference_id)"#,
    r#"CREATE TABLE IF NOT EXISTS outbox_message (
        id           BIGSERIAL PRIMARY KEY,
        event_type   TEXT NOT NULL,
        payload      TEXT NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
        processed_at TIMESTAMPTZ,
        attempts     INT NOT NULL DEFAULT 0,
        last_error   TEXT
    )"#,
    r#"CREATE INDEX IF NOT EXISTS outbox_message_pending
        ON outbox_message (created_at) WHERE processed_at IS NULL"#,
    r#"CREATE TABLE IF NOT EXISTS archived_game (
        id                BIGSERIAL PRIMARY KEY,
        room_id           TEXT NOT NULL UNIQUE,
        game_type         TEXT NOT NULL,
        final_state       BYTEA NOT NULL,
        player_seats_json TEXT NOT NULL,
        winner_user_id    UUID,
        winner_ranking    TEXT NOT NULL,
        total_pot         BIGINT NOT NULL,
        started_at        TIMESTAMPTZ NOT NULL,
        ended_at          TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS global_setting (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        description TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS room_template (
        id          BIGSERIAL PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        game_type   TEXT NOT NULL,
        max_players INT NOT NULL,
        entry_fee   BIGINT NOT NULL,
        config_json TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS game_state_snapshot (
        room_id    TEXT PRIMARY KEY,
        game_type  TEXT NOT NULL,
        state      BYTEA NOT NULL,
        meta_json  TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
];

pub async fn ensure_schema(pool: &PgPool) -> Result<(), AppError> {
    for ddl in SCHEMA {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

/// Seeds the built-in room templates when the table is empty, so a fresh
/// deployment has something to create rooms from.
pub async fn seed_default_templates(pool: &PgPool) -> Result<(), AppError> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM room_template")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let defaults: &[(&str, &str, i32, i64, &str)] = &[
        (
            "ludo-duel",
            "ludo",
            2,
            100,
            r#"{"boardSeats":"4","turnTimeoutSeconds":"30"}"#,
        ),
        (
            "ludo-classic",
            "ludo",
            4,
            100,
            r#"{"boardSeats":"4","turnTimeoutSeconds":"30"}"#,
        ),
        (
            "luckymine-casual",
            "luckymine",
            4,
            50,
            r#"{"tiles":"25","mines":"5","rewardSlopeMilli":"150"}"#,
        ),
    ];
    for (name, game_type, max_players, entry_fee, config) in defaults {
        sqlx::query(
            "INSERT INTO room_template (name, game_type, max_players, entry_fee, config_json)
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(game_type)
        .bind(max_players)
        .bind(entry_fee)
        .bind(config)
        .execute(pool)
        .await?;
    }
    tracing::info!(templates = defaults.len(), "Seeded default room templates.");
    Ok(())
}
