//! BudgetLedger in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use cadenza_core::store::{BudgetLedger, LedgerError, Reservation, ReservationStatus};
use cadenza_core::types::AtomicAmount;

#[derive(Default)]
struct LedgerState {
    /// (wallet, token) → balance in atomic units
    balances: HashMap<(String, String), AtomicAmount>,
    /// run id → reservation
    reservations: HashMap<String, Reservation>,
}

/// In-memory wallet ledger.
///
/// Every mutation takes the single write lock, so a reserve observes the
/// balance and debits it atomically; concurrent reserves against one wallet
/// can never overdraw.
pub struct InMemoryBudgetLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryBudgetLedger {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
        }
    }
}

impl Default for InMemoryBudgetLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BudgetLedger for InMemoryBudgetLedger {
    async fn balance(&self, wallet: &str, token: &str) -> Result<AtomicAmount, LedgerError> {
        let state = self
            .state
            .read()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        Ok(state
            .balances
            .get(&(wallet.to_string(), token.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn deposit(
        &self,
        wallet: &str,
        token: &str,
        amount: AtomicAmount,
    ) -> Result<AtomicAmount, LedgerError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        let balance = state
            .balances
            .entry((wallet.to_string(), token.to_string()))
            .or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Internal("balance overflow".to_string()))?;
        Ok(*balance)
    }

    async fn reserve(
        &self,
        run_id: &str,
        wallet: &str,
        amount: AtomicAmount,
        token: &str,
        chain: &str,
    ) -> Result<Reservation, LedgerError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        if state.reservations.contains_key(run_id) {
            return Err(LedgerError::ReservationExists(run_id.to_string()));
        }

        let key = (wallet.to_string(), token.to_string());
        let available = state.balances.get(&key).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientBudget {
                wallet: wallet.to_string(),
                token: token.to_string(),
                requested: amount,
                available,
            });
        }
        state.balances.insert(key, available - amount);

        let now = Utc::now();
        let reservation = Reservation {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            wallet: wallet.to_string(),
            amount,
            token: token.to_string(),
            chain: chain.to_string(),
            status: ReservationStatus::Reserved,
            created_at: now,
            updated_at: now,
        };
        state
            .reservations
            .insert(run_id.to_string(), reservation.clone());
        Ok(reservation)
    }

    async fn release(&self, run_id: &str, spent: AtomicAmount) -> Result<Reservation, LedgerError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        let reservation = state
            .reservations
            .get(run_id)
            .cloned()
            .ok_or_else(|| LedgerError::ReservationNotFound(run_id.to_string()))?;
        if reservation.status != ReservationStatus::Reserved {
            return Err(LedgerError::ReservationClosed {
                run_id: run_id.to_string(),
                status: reservation.status,
            });
        }
        if spent > reservation.amount {
            return Err(LedgerError::OverSpend {
                run_id: run_id.to_string(),
                spent,
                reserved: reservation.amount,
            });
        }

        let refund = reservation.amount - spent;
        let key = (reservation.wallet.clone(), reservation.token.clone());
        let balance = state.balances.entry(key).or_insert(0);
        *balance = balance
            .checked_add(refund)
            .ok_or_else(|| LedgerError::Internal("balance overflow".to_string()))?;

        let reservation = {
            let stored = state
                .reservations
                .get_mut(run_id)
                .expect("reservation present under lock");
            stored.status = ReservationStatus::Released;
            stored.updated_at = Utc::now();
            stored.clone()
        };
        Ok(reservation)
    }

    async fn settle(&self, run_id: &str) -> Result<Reservation, LedgerError> {
        let mut state = self
            .state
            .write()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        let reservation = state
            .reservations
            .get_mut(run_id)
            .ok_or_else(|| LedgerError::ReservationNotFound(run_id.to_string()))?;
        if reservation.status != ReservationStatus::Reserved {
            return Err(LedgerError::ReservationClosed {
                run_id: run_id.to_string(),
                status: reservation.status,
            });
        }
        reservation.status = ReservationStatus::Settled;
        reservation.updated_at = Utc::now();
        Ok(reservation.clone())
    }

    async fn reservation(&self, run_id: &str) -> Result<Option<Reservation>, LedgerError> {
        let state = self
            .state
            .read()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        Ok(state.reservations.get(run_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_reserve_release_refunds_unspent() {
        let ledger = InMemoryBudgetLedger::new();
        ledger.deposit("0xwallet", "USDC", 10).await.unwrap();

        ledger
            .reserve("run-1", "0xwallet", 5, "USDC", "base")
            .await
            .unwrap();
        assert_eq!(ledger.balance("0xwallet", "USDC").await.unwrap(), 5);

        let released = ledger.release("run-1", 2).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Released);
        assert_eq!(ledger.balance("0xwallet", "USDC").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_insufficient_budget_leaves_balance_unchanged() {
        let ledger = InMemoryBudgetLedger::new();
        ledger.deposit("0xwallet", "USDC", 3).await.unwrap();

        let err = ledger
            .reserve("run-1", "0xwallet", 5, "USDC", "base")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBudget {
                requested: 5,
                available: 3,
                ..
            }
        ));
        assert_eq!(ledger.balance("0xwallet", "USDC").await.unwrap(), 3);
        assert!(ledger.reservation("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_reservation_for_same_run_rejected() {
        let ledger = InMemoryBudgetLedger::new();
        ledger.deposit("0xwallet", "USDC", 10).await.unwrap();
        ledger
            .reserve("run-1", "0xwallet", 2, "USDC", "base")
            .await
            .unwrap();
        let err = ledger
            .reserve("run-1", "0xwallet", 2, "USDC", "base")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ReservationExists(_)));
    }

    #[tokio::test]
    async fn test_release_is_single_shot() {
        let ledger = InMemoryBudgetLedger::new();
        ledger.deposit("0xwallet", "USDC", 10).await.unwrap();
        ledger
            .reserve("run-1", "0xwallet", 5, "USDC", "base")
            .await
            .unwrap();
        ledger.release("run-1", 0).await.unwrap();

        let err = ledger.release("run-1", 0).await.unwrap_err();
        assert!(matches!(err, LedgerError::ReservationClosed { .. }));
        // The double release must not mint funds.
        assert_eq!(ledger.balance("0xwallet", "USDC").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_settle_consumes_remaining_funds() {
        let ledger = InMemoryBudgetLedger::new();
        ledger.deposit("0xwallet", "USDC", 10).await.unwrap();
        ledger
            .reserve("run-1", "0xwallet", 6, "USDC", "base")
            .await
            .unwrap();

        let settled = ledger.settle("run-1").await.unwrap();
        assert_eq!(settled.status, ReservationStatus::Settled);
        // No refund on settle.
        assert_eq!(ledger.balance("0xwallet", "USDC").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_overspend_rejected() {
        let ledger = InMemoryBudgetLedger::new();
        ledger.deposit("0xwallet", "USDC", 10).await.unwrap();
        ledger
            .reserve("run-1", "0xwallet", 5, "USDC", "base")
            .await
            .unwrap();
        let err = ledger.release("run-1", 6).await.unwrap_err();
        assert!(matches!(err, LedgerError::OverSpend { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_reserves_never_overdraw() {
        let ledger = Arc::new(InMemoryBudgetLedger::new());
        ledger.deposit("0xwallet", "USDC", 5).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .reserve(&format!("run-{i}"), "0xwallet", 1, "USDC", "base")
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 5);
        assert_eq!(ledger.balance("0xwallet", "USDC").await.unwrap(), 0);
    }
}
