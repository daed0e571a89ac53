//! Wallet transactions and entry-fee reservations.

use crate::error::AppError;
use crate::outbox::{self, PlayerUpdatedPayload};
use crate::registry::RoomRegistry;
use rand::Rng;
use sqlx::Row;
use sqlx::postgres::PgPool;
use std::time::Duration;
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 3;

/// Ledger row classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerType {
    Credit,
    Debit,
    AdminAdjust,
}

impl LedgerType {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerType::Credit => "Credit",
            LedgerType::Debit => "Debit",
            LedgerType::AdminAdjust => "AdminAdjust",
        }
    }
}

/// One requested wallet mutation.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub user_id: Uuid,
    /// Signed amount; never zero.
    pub amount: i64,
    pub tx_type: LedgerType,
    pub description: String,
    pub reference_id: Option<String>,
    /// Caller supplied at-most-once key.
    pub idempotency_key: Option<String>,
}

impl TransactionRequest {
    pub fn new(user_id: Uuid, amount: i64, description: impl Into<String>) -> Self {
        let tx_type = if amount >= 0 {
            LedgerType::Credit
        } else {
            LedgerType::Debit
        };
        Self {
            user_id,
            amount,
            tx_type,
            description: description.into(),
            reference_id: None,
            idempotency_key: None,
        }
    }

    pub fn reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    pub fn idempotent(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// The tagged result of a wallet mutation. Retries are driven by case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Ok { balance_after: i64 },
    InsufficientFunds,
    /// The idempotency key was already recorded; carries the balance the
    /// earlier transaction left behind.
    Duplicate { balance_after: i64 },
    Concurrency,
    Unknown,
}

/// An entry fee held against a seat. Committed after the seat is taken,
/// refunded when the join falls apart.
#[derive(Debug, Clone)]
pub struct FeeReservation {
    pub reservation_id: Uuid,
    pub user_id: Uuid,
    pub room_id: String,
    pub amount: i64,
}

enum TryOutcome {
    Committed { balance_after: i64, outbox_id: i64 },
    Insufficient,
    Concurrency,
    DuplicateRace { balance_after: i64 },
}

#[derive(Clone)]
pub struct EconomyService {
    db: PgPool,
    registry: RoomRegistry,
    initial_coins_default: i64,
}

fn is_concurrency_conflict(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        // serialization_failure / deadlock_detected
        matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
    } else {
        false
    }
}

fn is_idempotency_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        db.constraint() == Some("wallet_transaction_idempotency_key_key")
    } else {
        false
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db) = err {
        db.code().as_deref() == Some("23505")
    } else {
        false
    }
}

impl EconomyService {
    pub fn new(db: PgPool, registry: RoomRegistry, initial_coins_default: i64) -> Self {
        Self {
            db,
            registry,
            initial_coins_default,
        }
    }

    /// Applies one wallet mutation. Row-locked transaction, three attempts
    /// on concurrency conflicts with a short jittered backoff, idempotency
    /// by key, and a `PlayerUpdated` outbox row on success.
    pub async fn process_transaction(
        &self,
        req: &TransactionRequest,
    ) -> Result<TransactionOutcome, AppError> {
        if req.amount == 0 {
            return Err(AppError::ZeroAmount);
        }

        if let Some(key) = &req.idempotency_key
            && let Some(balance_after) = self.find_by_idempotency_key(key).await?
        {
            return Ok(TransactionOutcome::Duplicate { balance_after });
        }

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_apply(req).await? {
                TryOutcome::Committed {
                    balance_after,
                    outbox_id,
                } => {
                    self.publish_player_update(req.user_id, balance_after, outbox_id)
                        .await;
                    return Ok(TransactionOutcome::Ok { balance_after });
                }
                TryOutcome::Insufficient => return Ok(TransactionOutcome::InsufficientFunds),
                TryOutcome::DuplicateRace { balance_after } => {
                    return Ok(TransactionOutcome::Duplicate { balance_after });
                }
                TryOutcome::Concurrency if attempt < MAX_ATTEMPTS => {
                    let backoff = rand::rng().random_range(10..=50);
                    tracing::debug!(
                        user_id = %req.user_id,
                        attempt,
                        backoff_ms = backoff,
                        "Wallet transaction conflicted, retrying."
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                TryOutcome::Concurrency => return Ok(TransactionOutcome::Concurrency),
            }
        }
        // The loop always returns; this is unreachable in practice.
        Ok(TransactionOutcome::Unknown)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<i64>, AppError> {
        let row =
            sqlx::query("SELECT balance_after FROM wallet_transaction WHERE idempotency_key = $1")
                .bind(key)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.map(|r| r.get("balance_after")))
    }

    async fn initial_coins(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT value FROM global_setting WHERE key = 'Economy:InitialCoins'")
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row
            .and_then(|r| r.get::<String, _>("value").parse().ok())
            .unwrap_or(self.initial_coins_default))
    }

    async fn try_apply(&self, req: &TransactionRequest) -> Result<TryOutcome, AppError> {
        let mut tx = self.db.begin().await?;

        let account = match sqlx::query(
            "SELECT coins FROM wallet_account WHERE user_id = $1 AND NOT is_deleted FOR UPDATE",
        )
        .bind(req.user_id)
        .fetch_optional(&mut *tx)
        .await
        {
            Ok(row) => row,
            Err(err) if is_concurrency_conflict(&err) => return Ok(TryOutcome::Concurrency),
            Err(err) => return Err(err.into()),
        };

        let balance_after = match account {
            Some(row) => {
                let coins: i64 = row.get("coins");
                if req.amount < 0 && coins + req.amount < 0 {
                    return Ok(TryOutcome::Insufficient);
                }
                let balance_after = coins + req.amount;
                sqlx::query(
                    "UPDATE wallet_account
                     SET coins = $2, version = $3, updated_at = now()
                     WHERE user_id = $1",
                )
                .bind(req.user_id)
                .bind(balance_after)
                .bind(Uuid::new_v4())
                .execute(&mut *tx)
                .await?;
                balance_after
            }
            None => {
                // Wallets are born lazily on first use.
                let initial = self.initial_coins(&mut tx).await?;
                let balance_after = initial + req.amount;
                if balance_after < 0 {
                    return Ok(TryOutcome::Insufficient);
                }
                let inserted = sqlx::query(
                    "INSERT INTO wallet_account (user_id, coins, version) VALUES ($1, $2, $3)",
                )
                .bind(req.user_id)
                .bind(balance_after)
                .bind(Uuid::new_v4())
                .execute(&mut *tx)
                .await;
                if let Err(err) = inserted {
                    if is_unique_violation(&err) {
                        // Another writer created the wallet first.
                        return Ok(TryOutcome::Concurrency);
                    }
                    return Err(err.into());
                }
                balance_after
            }
        };

        let ledger = sqlx::query(
            "INSERT INTO wallet_transaction
                 (id, user_id, amount, balance_after, tx_type, description,
                  reference_id, idempotency_key)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(req.user_id)
        .bind(req.amount)
        .bind(balance_after)
        .bind(req.tx_type.as_str())
        .bind(&req.description)
        .bind(&req.reference_id)
        .bind(&req.idempotency_key)
        .execute(&mut *tx)
        .await;
        if let Err(err) = ledger {
            if is_idempotency_violation(&err) {
                // A concurrent call with the same key won the race; report
                // the balance that call recorded.
                drop(tx);
                if let Some(key) = &req.idempotency_key
                    && let Some(balance_after) = self.find_by_idempotency_key(key).await?
                {
                    return Ok(TryOutcome::DuplicateRace { balance_after });
                }
                return Ok(TryOutcome::Concurrency);
            }
            return Err(err.into());
        }

        let payload = PlayerUpdatedPayload::updated(req.user_id, balance_after);
        let outbox_id =
            outbox::enqueue_tx(&mut tx, outbox::EVENT_PLAYER_UPDATED, &payload.to_json()?).await?;

        match tx.commit().await {
            Ok(()) => Ok(TryOutcome::Committed {
                balance_after,
                outbox_id,
            }),
            Err(err) if is_concurrency_conflict(&err) => Ok(TryOutcome::Concurrency),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort immediate publish. When it works the outbox row is
    /// marked processed; when it does not, the dispatcher delivers later.
    async fn publish_player_update(&self, user_id: Uuid, new_coins: i64, outbox_id: i64) {
        let payload = PlayerUpdatedPayload::updated(user_id, new_coins);
        let Ok(json) = payload.to_json() else { return };
        match self.registry.publish(outbox::PLAYER_UPDATES_CHANNEL, &json).await {
            Ok(()) => {
                if let Err(err) = outbox::mark_processed(&self.db, outbox_id).await {
                    tracing::warn!(?err, outbox_id, "Could not mark outbox row processed.");
                }
            }
            Err(err) => {
                tracing::debug!(?err, %user_id, "Immediate publish failed, outbox will retry.");
            }
        }
    }

    // ---- entry fees ----

    /// Reserves the entry fee as a debit tagged with a fresh reservation
    /// id. The id doubles as the idempotency key of the debit.
    pub async fn reserve_entry_fee(
        &self,
        user_id: Uuid,
        amount: i64,
        room_id: &str,
    ) -> Result<FeeReservation, AppError> {
        let reservation_id = Uuid::new_v4();
        let req = TransactionRequest::new(
            user_id,
            -amount,
            format!("ROOM:{room_id}:ENTRY_RESERVE"),
        )
        .reference(format!("ROOM:{room_id}:ENTRY_RESERVE"))
        .idempotent(reservation_id.to_string());

        match self.process_transaction(&req).await? {
            TransactionOutcome::Ok { .. } => Ok(FeeReservation {
                reservation_id,
                user_id,
                room_id: room_id.to_string(),
                amount,
            }),
            TransactionOutcome::InsufficientFunds => Err(AppError::InsufficientFunds),
            _ => Err(AppError::WalletConflict),
        }
    }

    /// Finalizes a reservation: the ledger row is rewritten to a plain
    /// entry fee. No balance change.
    pub async fn commit_reservation(&self, reservation: &FeeReservation) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE wallet_transaction
             SET description = $1, reference_id = $2
             WHERE idempotency_key = $3",
        )
        .bind(format!("ROOM:{}:ENTRY", reservation.room_id))
        .bind(format!("ROOM:{}:ENTRY", reservation.room_id))
        .bind(reservation.reservation_id.to_string())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Compensates a failed join. Keyed by the reservation id, so calling
    /// it twice produces a single credit.
    pub async fn refund_reservation(&self, reservation: &FeeReservation) -> Result<(), AppError> {
        let req = TransactionRequest::new(
            reservation.user_id,
            reservation.amount,
            format!("ROOM:{}:ENTRY_REFUND", reservation.room_id),
        )
        .reference(format!("ROOM:{}:ENTRY_REFUND", reservation.room_id))
        .idempotent(format!("refund:{}", reservation.reservation_id));

        match self.process_transaction(&req).await? {
            TransactionOutcome::Ok { .. } | TransactionOutcome::Duplicate { .. } => Ok(()),
            TransactionOutcome::InsufficientFunds => Err(AppError::InsufficientFunds),
            _ => Err(AppError::WalletConflict),
        }
    }

    pub fn db(&self) -> &PgPool {
        &self.db
    }
}
