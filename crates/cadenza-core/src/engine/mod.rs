//! Execution engine module
//!
//! The engine walks a validated workflow in topological order, resolves each
//! node's inputs against the dataflow context, invokes the agent through the
//! injected transport, charges the run's budget reservation, and drives the
//! run to a terminal status. Within a run, nodes are serialized; across
//! runs, many engines may execute concurrently.
//!
//! Cancellation is cooperative: the run status (and the worker's
//! cancellation token) are checked at every node boundary, and an in-flight
//! agent call is never interrupted.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::store::{AgentRegistry, BudgetLedger, LedgerError, RegistryError, RunStore, StoreError};
use crate::template;
use crate::transport::{extract_output, AgentTransport, CallOutcome, CallRequest, TransportError};
use crate::types::{
    AgentDescriptor, NodeRun, NodeRunStatus, Run, RunStatus, StateError, WorkflowNode, WorkflowSpec,
};

const MAX_ERROR_CHARS: usize = 500;

fn truncate_error(message: &str) -> String {
    let char_count = message.chars().count();
    if char_count <= MAX_ERROR_CHARS {
        return message.to_string();
    }
    let mut preview: String = message.chars().take(MAX_ERROR_CHARS).collect();
    preview.push_str("... [truncated]");
    preview
}

/// Engine infrastructure errors.
///
/// Node-level failures do not surface here; they mark the run failed and the
/// engine still returns the terminal run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {run_id} is {status:?} and cannot be executed")]
    RunNotRunnable { run_id: String, status: RunStatus },

    #[error("workflow contains a cycle")]
    Cycle,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Compute a deterministic topological order of the spec's nodes with Kahn's
/// algorithm, breaking ties lexicographically by node id. Fails when the
/// edge set contains a cycle.
pub fn topological_order(spec: &WorkflowSpec) -> Result<Vec<String>, EngineError> {
    let mut in_degree: HashMap<&str, usize> =
        spec.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &spec.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
            *degree += 1;
        }
    }

    // BTreeSet keeps the ready frontier sorted, which makes the tie-break
    // lexicographic and the order reproducible.
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(spec.nodes.len());
    while let Some(&id) = ready.iter().next() {
        ready.remove(id);
        order.push(id.to_string());
        if let Some(next) = adjacency.get(id) {
            for &succ in next {
                // Edges to unknown nodes are a validator concern; skip here.
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(succ);
                    }
                }
            }
        }
    }

    if order.len() != spec.nodes.len() {
        return Err(EngineError::Cycle);
    }
    Ok(order)
}

/// Outcome of one node attempt sequence.
enum NodeOutcome {
    Completed {
        output: Value,
        transaction_hash: Option<String>,
        retries: u32,
    },
    Failed {
        error: String,
        retries: u32,
    },
}

/// Drives one run of a workflow to a terminal status.
pub struct ExecutionEngine {
    registry: Arc<dyn AgentRegistry>,
    ledger: Arc<dyn BudgetLedger>,
    run_store: Arc<dyn RunStore>,
    caller: Arc<dyn AgentTransport>,
    /// Payment-aware transport; absent when no signer is configured
    paid_caller: Option<Arc<dyn AgentTransport>>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        ledger: Arc<dyn BudgetLedger>,
        run_store: Arc<dyn RunStore>,
        caller: Arc<dyn AgentTransport>,
    ) -> Self {
        Self {
            registry,
            ledger,
            run_store,
            caller,
            paid_caller: None,
        }
    }

    /// Attach the payment-aware transport used for paywalled agents.
    pub fn with_paid_caller(mut self, paid_caller: Arc<dyn AgentTransport>) -> Self {
        self.paid_caller = Some(paid_caller);
        self
    }

    /// Execute a queued run to a terminal status and return it.
    ///
    /// Node failures (retries exhausted, payment refused, unresolved inputs,
    /// budget exhausted) mark the run failed and return `Ok`; only
    /// infrastructure faults return `Err`.
    pub async fn execute(
        &self,
        spec: &WorkflowSpec,
        run_id: &str,
        inputs: Value,
        cancel: CancellationToken,
    ) -> Result<Run, EngineError> {
        let mut run = self
            .run_store
            .load_run(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;
        if run.status != RunStatus::Queued {
            return Err(EngineError::RunNotRunnable {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        let order = topological_order(spec)?;

        run.transition(RunStatus::Running)?;
        self.run_store.save_run(&run).await?;
        tracing::info!(
            run_id = %run.id,
            workflow_id = %run.workflow_id,
            nodes = order.len(),
            "run execution started"
        );

        let mut context = Map::new();
        context.insert("input".to_string(), inputs);

        for (position, node_id) in order.iter().enumerate() {
            // Node boundary: refuse to start further nodes once the run is
            // terminal (cancellation) and fold in external status changes.
            match self.observe_cancellation(&mut run, &cancel).await? {
                Some(terminal) => {
                    self.skip_remaining(&terminal, &order[position..]).await?;
                    self.release_reservation(&terminal).await;
                    return Ok(terminal);
                }
                None => {}
            }

            let node = spec.get_node(node_id).expect("node from topological order");
            let mut node_run = NodeRun::pending(&run.id, node_id);
            node_run.status = NodeRunStatus::Running;
            node_run.started_at = Some(chrono::Utc::now());
            node_run.agent_ref = node.agent_ref.clone().unwrap_or_default();

            let outcome = self
                .run_node(&run, node, &context, &mut node_run)
                .await;

            match outcome {
                NodeOutcome::Completed {
                    output,
                    transaction_hash,
                    retries,
                } => {
                    node_run.retries = retries;
                    node_run.transaction_hash = transaction_hash;

                    // Charge the agent's price against the reservation.
                    let cost = node_run.cost;
                    if let Err(available) = run.charge(cost) {
                        let message = format!(
                            "node '{}' costs {} but only {} of the reservation remains",
                            node_id, cost, available
                        );
                        node_run.status = NodeRunStatus::Failed;
                        node_run.error = Some(message.clone());
                        node_run.ended_at = Some(chrono::Utc::now());
                        self.run_store.save_node_run(&node_run).await?;
                        return self
                            .fail_run(run, message, &order[position + 1..])
                            .await;
                    }

                    node_run.status = NodeRunStatus::Completed;
                    node_run.output = Some(output.clone());
                    node_run.ended_at = Some(chrono::Utc::now());
                    node_run.push_log(format!("completed with cost {cost}"));
                    self.run_store.save_node_run(&node_run).await?;
                    self.run_store.save_run(&run).await?;

                    tracing::info!(
                        run_id = %run.id,
                        node_id = %node_id,
                        cost,
                        retries,
                        "node execution completed"
                    );
                    context.insert(node_id.clone(), output);
                }
                NodeOutcome::Failed { error, retries } => {
                    node_run.retries = retries;
                    node_run.status = NodeRunStatus::Failed;
                    node_run.error = Some(truncate_error(&error));
                    node_run.ended_at = Some(chrono::Utc::now());
                    self.run_store.save_node_run(&node_run).await?;

                    tracing::warn!(
                        run_id = %run.id,
                        node_id = %node_id,
                        retries,
                        error = %truncate_error(&error),
                        "node execution failed"
                    );
                    let message = format!("node '{node_id}' failed: {error}");
                    return self.fail_run(run, message, &order[position + 1..]).await;
                }
            }
        }

        // A cancel may have landed while the last node was in flight.
        if let Some(terminal) = self.observe_cancellation(&mut run, &cancel).await? {
            self.release_reservation(&terminal).await;
            return Ok(terminal);
        }

        // Validation guarantees at least one node; stay total regardless.
        if let Some(last_node) = order.last() {
            run.output = Some(self.resolve_run_output(spec, &context, last_node));
            run.output_node = Some(last_node.clone());
        }
        run.transition(RunStatus::Completed)?;
        self.run_store.save_run(&run).await?;
        self.release_reservation(&run).await;

        tracing::info!(
            run_id = %run.id,
            spent = run.spent_budget,
            reserved = run.reserved_budget,
            "run completed"
        );
        Ok(run)
    }

    /// The run output: the explicit output mapping when the workflow
    /// declares one, otherwise the last node's output.
    fn resolve_run_output(
        &self,
        spec: &WorkflowSpec,
        context: &Map<String, Value>,
        last_node: &str,
    ) -> Value {
        match &spec.output {
            Some(mapping) => template::resolve(mapping, context),
            None => context.get(last_node).cloned().unwrap_or(Value::Null),
        }
    }

    /// Check the cancellation token and the stored run status at a node
    /// boundary. Returns the terminal run when execution must stop.
    async fn observe_cancellation(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> Result<Option<Run>, EngineError> {
        if let Some(stored) = self.run_store.load_run(&run.id).await? {
            if stored.status.is_terminal() {
                tracing::info!(run_id = %run.id, status = ?stored.status, "run became terminal externally");
                let mut terminal = stored;
                // Keep our budget bookkeeping, which is ahead of the store's.
                terminal.spent_budget = run.spent_budget;
                return Ok(Some(terminal));
            }
        }
        if cancel.is_cancelled() {
            run.transition(RunStatus::Cancelled)?;
            self.run_store.save_run(run).await?;
            tracing::info!(run_id = %run.id, "run cancelled at node boundary");
            return Ok(Some(run.clone()));
        }
        Ok(None)
    }

    /// Execute one node, including its retry loop.
    async fn run_node(
        &self,
        run: &Run,
        node: &WorkflowNode,
        context: &Map<String, Value>,
        node_run: &mut NodeRun,
    ) -> NodeOutcome {
        let resolved = template::resolve(&Value::Object(node.inputs.clone()), context);
        node_run.inputs = resolved.clone();

        let unresolved = template::unresolved_tokens(&resolved);
        if !unresolved.is_empty() {
            return NodeOutcome::Failed {
                error: format!("unresolved input templates: {}", unresolved.join(", ")),
                retries: 0,
            };
        }

        let agent = match self.registry.get(node_run.agent_ref.as_str()).await {
            Ok(agent) => agent,
            Err(e) => {
                return NodeOutcome::Failed {
                    error: e.to_string(),
                    retries: 0,
                }
            }
        };
        let Some(endpoint) = agent.endpoint.clone() else {
            return NodeOutcome::Failed {
                error: format!("agent '{}' has no endpoint", agent.reference),
                retries: 0,
            };
        };
        node_run.cost = agent.pricing.amount;

        let transport = match self.transport_for(&agent) {
            Ok(t) => t,
            Err(error) => return NodeOutcome::Failed { error, retries: 0 },
        };

        let policy = node.retry.unwrap_or_default();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            node_run.push_log(format!("attempt {attempt} started"));
            let request = CallRequest::new(endpoint.clone(), resolved.clone())
                .with_context_id(run.id.clone())
                .for_node(run.id.clone(), node.id.clone());

            let error = match transport.send(request).await {
                Ok(reply) => match reply.outcome {
                    CallOutcome::PaymentRequired { challenge } => {
                        // An unsatisfied challenge that reached the engine is
                        // terminal: either the agent is unexpectedly paywalled
                        // or the coordinator declined to pay.
                        let detail = challenge
                            .accepts
                            .first()
                            .map(|r| format!("{} {} on {}", r.max_amount_required, r.asset, r.network))
                            .unwrap_or_else(|| "no accepted payment methods".to_string());
                        TransportError::Payment(format!(
                            "agent demanded unsatisfied payment ({detail})"
                        ))
                    }
                    outcome => {
                        if let Some(settlement) = &reply.settlement {
                            node_run.push_log(format!(
                                "payment settled in tx {}",
                                settlement.transaction_hash
                            ));
                        }
                        return NodeOutcome::Completed {
                            output: extract_output(&outcome),
                            transaction_hash: reply
                                .settlement
                                .map(|s| s.transaction_hash),
                            retries: attempt - 1,
                        };
                    }
                },
                Err(e) => e,
            };

            node_run.push_log(format!("attempt {attempt} failed: {}", truncate_error(&error.to_string())));
            if error.is_retriable() && attempt < max_attempts {
                // Linear backoff: attempt n waits n × backoff_ms.
                let delay = Duration::from_millis(policy.backoff_ms.saturating_mul(attempt as u64));
                tracing::warn!(
                    run_id = %run.id,
                    node_id = %node.id,
                    attempt,
                    max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %truncate_error(&error.to_string()),
                    "retrying node after transient failure"
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                attempt += 1;
                continue;
            }

            let retries = attempt - 1;
            let error = if retries > 0 {
                format!("{error} (retries exhausted after {attempt} attempts)")
            } else {
                error.to_string()
            };
            return NodeOutcome::Failed { error, retries };
        }
    }

    /// Pick the transport for an agent based on its pricing policy.
    fn transport_for(&self, agent: &AgentDescriptor) -> Result<Arc<dyn AgentTransport>, String> {
        if !agent.pricing.requires_payment {
            return Ok(self.caller.clone());
        }
        match &self.paid_caller {
            Some(paid) => Ok(paid.clone()),
            None => Err(format!(
                "agent '{}' requires payment but no payment signer is configured",
                agent.reference
            )),
        }
    }

    /// Mark the run failed, skip what never started, and release the budget.
    async fn fail_run(
        &self,
        mut run: Run,
        error: String,
        remaining: &[String],
    ) -> Result<Run, EngineError> {
        self.skip_remaining(&run, remaining).await?;
        run.error = Some(truncate_error(&error));
        run.transition(RunStatus::Failed)?;
        self.run_store.save_run(&run).await?;
        self.release_reservation(&run).await;
        tracing::warn!(run_id = %run.id, error = %truncate_error(&error), "run failed");
        Ok(run)
    }

    /// Record skipped node runs for nodes that never started.
    async fn skip_remaining(&self, run: &Run, remaining: &[String]) -> Result<(), EngineError> {
        for node_id in remaining {
            let mut node_run = NodeRun::pending(&run.id, node_id);
            node_run.status = NodeRunStatus::Skipped;
            self.run_store.save_node_run(&node_run).await?;
        }
        Ok(())
    }

    /// Release the unspent part of the reservation. Called exactly once per
    /// run that the engine drives to a terminal state; a failure here is
    /// logged, not fatal, so the terminal run is still reported.
    async fn release_reservation(&self, run: &Run) {
        if let Err(e) = self.ledger.release(&run.id, run.spent_budget).await {
            tracing::warn!(run_id = %run.id, error = %e, "failed to release budget reservation");
        }
    }
}
