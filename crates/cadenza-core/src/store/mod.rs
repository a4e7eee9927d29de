//! Store module
//!
//! Storage abstractions the engine and scheduler depend on:
//! - AgentRegistry: typed directory of callable agents
//! - BudgetLedger: wallet balances and per-run reservations
//! - RunStore: run and node-run persistence
//! - RunQueue: FIFO of runs awaiting a worker
//!
//! Implementations live in the cadenza-stores crate; everything here is a
//! trait seam so durable backends can be substituted.

mod ledger;
mod registry;
mod run_store;

pub use ledger::{BudgetLedger, LedgerError, Reservation, ReservationStatus};
pub use registry::{AgentFilter, AgentPatch, AgentRegistry, RegistryError};
pub use run_store::{RunQueue, RunStore};

use thiserror::Error;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}
