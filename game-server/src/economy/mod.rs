//! The economy core: wallet mutations with idempotency, entry-fee
//! reserve/commit/refund and ranked payouts.
//!
//! Wallet rows are only ever touched inside a row-locked database
//! transaction; concurrency conflicts surface as a tagged outcome and are
//! retried by case, never by catching exceptions. Every mutation appends
//! exactly one ledger row and one `PlayerUpdated` outbox row in the same
//! transaction.

pub mod payout;
pub mod wallet;

pub use payout::PayoutPolicy;
pub use wallet::{
    EconomyService, FeeReservation, LedgerType, TransactionOutcome, TransactionRequest,
};
