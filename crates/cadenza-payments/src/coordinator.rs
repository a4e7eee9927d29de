//! Payment coordinator.
//!
//! Wraps an inner agent transport so payment challenges are satisfied
//! transparently: attempt the call, and on a 402 challenge sign an
//! authorization, settle on chain, and retry with the proof attached to the
//! message metadata.
//!
//! At most one transfer ever happens per (run, node): settled payments are
//! remembered, a retried node reuses its recorded proof, and a second
//! transfer requires the agent to issue a fresh challenge after having seen
//! that proof.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use cadenza_core::transport::{
    AgentTransport, CallOutcome, CallReply, CallRequest, TransportError,
};
use cadenza_core::types::{
    AtomicAmount, PaymentChallenge, PaymentProof, PaymentRequirement, SettlementReceipt,
};

use crate::authorization::build_proof;
use crate::chain::{erc20, ChainClient, ChainError};

/// Payment flow errors
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("challenge carries no payment requirements")]
    EmptyChallenge,

    #[error("unsupported payment scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("required amount {required} exceeds the per-call cap {cap}")]
    AmountOverCap {
        required: AtomicAmount,
        cap: AtomicAmount,
    },

    #[error("approval transaction {0} reverted")]
    ApproveReverted(String),

    #[error("transfer transaction {0} reverted")]
    TransferReverted(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Coordinator settings, typically read from the environment.
#[derive(Debug, Clone)]
pub struct PaymentCoordinatorConfig {
    /// Hard per-call cap in atomic units; challenges above it are refused
    pub max_payment: AtomicAmount,
    /// When false, challenges pass through unpaid and the node fails
    pub auto_payment: bool,
}

impl Default for PaymentCoordinatorConfig {
    fn default() -> Self {
        Self {
            max_payment: 1_000_000,
            auto_payment: true,
        }
    }
}

/// A payment that already settled for one (run, node)
#[derive(Debug, Clone)]
struct SettledPayment {
    proof: PaymentProof,
    requirement: PaymentRequirement,
    receipt: SettlementReceipt,
}

/// Transport decorator that answers payment challenges.
pub struct PaymentCoordinator {
    inner: Arc<dyn AgentTransport>,
    chain: Arc<dyn ChainClient>,
    config: PaymentCoordinatorConfig,
    settled: Mutex<HashMap<(String, String), SettledPayment>>,
}

impl PaymentCoordinator {
    pub fn new(
        inner: Arc<dyn AgentTransport>,
        chain: Arc<dyn ChainClient>,
        config: PaymentCoordinatorConfig,
    ) -> Self {
        Self {
            inner,
            chain,
            config,
            settled: Mutex::new(HashMap::new()),
        }
    }

    fn settled_for(&self, request: &CallRequest) -> Option<SettledPayment> {
        let settled = self.settled.lock().unwrap_or_else(|e| e.into_inner());
        settled
            .get(&(request.run_id.clone(), request.node_id.clone()))
            .cloned()
    }

    fn remember(&self, request: &CallRequest, payment: SettledPayment) {
        let mut settled = self.settled.lock().unwrap_or_else(|e| e.into_inner());
        settled.insert(
            (request.run_id.clone(), request.node_id.clone()),
            payment,
        );
    }

    fn forget(&self, request: &CallRequest) {
        let mut settled = self.settled.lock().unwrap_or_else(|e| e.into_inner());
        settled.remove(&(request.run_id.clone(), request.node_id.clone()));
    }

    /// Attach the proof metadata keys to a request.
    fn with_proof(&self, request: &CallRequest, payment: &SettledPayment) -> CallRequest {
        request
            .clone()
            .with_metadata("paymentProvided", json!(true))
            .with_metadata(
                "paymentProof",
                serde_json::to_value(&payment.proof).unwrap_or(Value::Null),
            )
            .with_metadata(
                "paymentRequirements",
                serde_json::to_value(&payment.requirement).unwrap_or(Value::Null),
            )
            .with_metadata(
                "transactionHash",
                json!(payment.receipt.transaction_hash),
            )
            .with_metadata("network", json!(payment.requirement.network))
            .with_metadata("payer", json!(self.chain.address()))
    }

    /// Vet a challenge and pick the requirement to satisfy.
    fn accept_requirement(
        &self,
        challenge: &PaymentChallenge,
    ) -> Result<PaymentRequirement, PaymentError> {
        let requirement = challenge
            .accepts
            .first()
            .cloned()
            .ok_or(PaymentError::EmptyChallenge)?;
        if !requirement.is_exact() {
            return Err(PaymentError::UnsupportedScheme(requirement.scheme));
        }
        if requirement.max_amount_required > self.config.max_payment {
            return Err(PaymentError::AmountOverCap {
                required: requirement.max_amount_required,
                cap: self.config.max_payment,
            });
        }
        Ok(requirement)
    }

    /// Sign, ensure allowance, transfer, and await confirmation.
    async fn settle(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<SettledPayment, PaymentError> {
        let chain = self.chain.as_ref();
        let signer = chain.address();
        let value = requirement.max_amount_required;

        let now = chrono::Utc::now().timestamp();
        let proof = build_proof(chain, requirement, value, now).await?;

        // The recipient must be approved to move the stablecoin before the
        // transfer settles; approve 110% of the value when short.
        let current = erc20::allowance(chain, &requirement.asset, &signer, &requirement.pay_to)
            .await?;
        if current < value {
            let approve_amount = value.saturating_add(value / 10);
            let tx_hash =
                erc20::approve(chain, &requirement.asset, &requirement.pay_to, approve_amount)
                    .await?;
            let receipt = chain.wait_for_receipt(&tx_hash).await?;
            if !receipt.success {
                return Err(PaymentError::ApproveReverted(tx_hash));
            }
            tracing::info!(
                asset = %requirement.asset,
                spender = %requirement.pay_to,
                amount = approve_amount,
                tx = %tx_hash,
                "allowance approved"
            );
        }

        let tx_hash =
            erc20::transfer(chain, &requirement.asset, &requirement.pay_to, value).await?;
        let receipt = chain.wait_for_receipt(&tx_hash).await?;
        if !receipt.success {
            return Err(PaymentError::TransferReverted(tx_hash));
        }
        tracing::info!(
            network = %requirement.network,
            recipient = %requirement.pay_to,
            value,
            tx = %receipt.transaction_hash,
            "payment settled"
        );

        Ok(SettledPayment {
            proof,
            requirement: requirement.clone(),
            receipt: SettlementReceipt {
                transaction_hash: receipt.transaction_hash,
                block_number: receipt.block_number,
                network: requirement.network.clone(),
            },
        })
    }
}

#[async_trait]
impl AgentTransport for PaymentCoordinator {
    async fn send(&self, request: CallRequest) -> Result<CallReply, TransportError> {
        // A node retried after its payment settled reuses the proof; it
        // never pays twice for the same (run, node).
        if let Some(payment) = self.settled_for(&request) {
            let reply = self.inner.send(self.with_proof(&request, &payment)).await?;
            match reply.outcome {
                CallOutcome::PaymentRequired { .. } => {
                    // The agent saw our proof and challenged again: treat it
                    // as fresh and fall through to a new settlement below.
                    tracing::warn!(
                        run_id = %request.run_id,
                        node_id = %request.node_id,
                        "recorded payment rejected, agent issued a fresh challenge"
                    );
                    self.forget(&request);
                }
                outcome => {
                    return Ok(CallReply {
                        outcome,
                        settlement: Some(payment.receipt),
                    });
                }
            }
        }

        let CallReply {
            outcome,
            settlement,
        } = self.inner.send(request.clone()).await?;
        let challenge = match outcome {
            CallOutcome::PaymentRequired { challenge } => challenge,
            outcome => {
                return Ok(CallReply {
                    outcome,
                    settlement,
                })
            }
        };

        if !self.config.auto_payment {
            // Pass the challenge through; the engine reports the node as a
            // payment failure.
            return Ok(CallOutcome::PaymentRequired { challenge }.into());
        }

        let requirement = self
            .accept_requirement(&challenge)
            .map_err(|e| TransportError::Payment(e.to_string()))?;
        let payment = self
            .settle(&requirement)
            .await
            .map_err(|e| TransportError::Payment(e.to_string()))?;
        self.remember(&request, payment.clone());

        let paid = self.with_proof(&request, &payment);
        let reply = self.inner.send(paid).await.map_err(|e| {
            // The transfer went through; record the hash with the failure so
            // operators can reconcile. The remembered proof guarantees a
            // retry will not pay again.
            TransportError::Payment(format!(
                "payment settled in tx {} but the paid retry failed: {e}",
                payment.receipt.transaction_hash
            ))
        })?;

        match reply.outcome {
            CallOutcome::PaymentRequired { .. } => Err(TransportError::Payment(format!(
                "agent rejected settled payment (tx {})",
                payment.receipt.transaction_hash
            ))),
            outcome => Ok(CallReply {
                outcome,
                settlement: Some(payment.receipt),
            }),
        }
    }

    async fn available(&self, endpoint: &str) -> bool {
        self.inner.available(endpoint).await
    }
}
