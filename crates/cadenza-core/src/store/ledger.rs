//! BudgetLedger trait and reservation types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AtomicAmount;

/// Ledger error types
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient budget: wallet {wallet} holds {available} {token}, requested {requested}")]
    InsufficientBudget {
        wallet: String,
        token: String,
        requested: AtomicAmount,
        available: AtomicAmount,
    },

    #[error("a reservation already exists for run {0}")]
    ReservationExists(String),

    #[error("no reservation found for run {0}")]
    ReservationNotFound(String),

    #[error("reservation for run {run_id} is already {status:?}")]
    ReservationClosed {
        run_id: String,
        status: ReservationStatus,
    },

    #[error("run {run_id} spent {spent} which exceeds the reserved {reserved}")]
    OverSpend {
        run_id: String,
        spent: AtomicAmount,
        reserved: AtomicAmount,
    },

    #[error("internal ledger error: {0}")]
    Internal(String),
}

/// Reservation lifecycle: reserved → released | settled, monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Reserved,
    Released,
    Settled,
}

/// An atomic debit of a wallet tied to a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub run_id: String,
    pub wallet: String,
    pub amount: AtomicAmount,
    pub token: String,
    pub chain: String,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wallet balances and per-run reservations.
///
/// Balances are non-negative atomic integers. A reserve must be a
/// test-and-set: the observation that `balance >= amount` and the debit
/// happen under the same lock, so concurrent reserves can never overdraw.
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Current balance; absent wallets hold zero.
    async fn balance(&self, wallet: &str, token: &str) -> Result<AtomicAmount, LedgerError>;

    /// Credit a wallet and return its new balance.
    async fn deposit(
        &self,
        wallet: &str,
        token: &str,
        amount: AtomicAmount,
    ) -> Result<AtomicAmount, LedgerError>;

    /// Atomically debit `amount` from the wallet and create a reservation
    /// keyed by `run_id`. At most one live reservation per run.
    async fn reserve(
        &self,
        run_id: &str,
        wallet: &str,
        amount: AtomicAmount,
        token: &str,
        chain: &str,
    ) -> Result<Reservation, LedgerError>;

    /// Refund `reserved - spent` to the wallet and mark the reservation
    /// released. Not idempotent; callers release exactly once.
    async fn release(&self, run_id: &str, spent: AtomicAmount) -> Result<Reservation, LedgerError>;

    /// Mark the reservation settled, consuming the remaining funds.
    async fn settle(&self, run_id: &str) -> Result<Reservation, LedgerError>;

    /// Look up the reservation for a run, if any.
    async fn reservation(&self, run_id: &str) -> Result<Option<Reservation>, LedgerError>;
}
