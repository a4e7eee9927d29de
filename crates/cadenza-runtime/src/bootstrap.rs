//! Stack wiring.
//!
//! Composes the execution engine from its collaborators. When a chain
//! client is supplied, paywalled agents dispatch through a
//! `PaymentCoordinator` wrapped around the plain transport; without one,
//! the coordinator is absent and paywalled agents fail with a payment
//! error, as configured.

use std::sync::Arc;

use cadenza_core::engine::ExecutionEngine;
use cadenza_core::store::{AgentRegistry, BudgetLedger, RunStore};
use cadenza_core::transport::AgentTransport;
use cadenza_payments::{ChainClient, PaymentCoordinator, PaymentCoordinatorConfig};

/// Build the execution engine, wiring the payment coordinator when a chain
/// client is available.
pub fn build_engine(
    registry: Arc<dyn AgentRegistry>,
    ledger: Arc<dyn BudgetLedger>,
    run_store: Arc<dyn RunStore>,
    transport: Arc<dyn AgentTransport>,
    chain: Option<Arc<dyn ChainClient>>,
    payments: PaymentCoordinatorConfig,
) -> ExecutionEngine {
    let engine = ExecutionEngine::new(registry, ledger, run_store, transport.clone());
    match chain {
        Some(chain) => {
            tracing::info!(payer = %chain.address(), "payment coordinator enabled");
            let coordinator = Arc::new(PaymentCoordinator::new(transport, chain, payments));
            engine.with_paid_caller(coordinator)
        }
        None => {
            tracing::info!("no chain client configured, paywalled agents will fail");
            engine
        }
    }
}
