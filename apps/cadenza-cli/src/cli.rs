use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};

use cadenza_agents::HttpAgentTransport;
use cadenza_config::CadenzaConfig;
use cadenza_core::engine::ExecutionEngine;
use cadenza_core::store::{AgentFilter, AgentRegistry, BudgetLedger, LedgerError};
use cadenza_core::types::{format_units, RunStatus, WorkflowSpec};
use cadenza_core::validator::WorkflowValidator;
use cadenza_runtime::{build_engine, RunWorkerPool, SchedulerError, WorkflowScheduler};
use cadenza_stores::{
    InMemoryAgentRegistry, InMemoryBudgetLedger, InMemoryRunQueue, InMemoryRunStore,
};

use crate::manifest::{seed_registry, AgentManifest};

// Exit codes: 0 success, 2 validation failure, 3 insufficient budget,
// 4 execution failure, 5 cancellation.
const EXIT_OK: i32 = 0;
const EXIT_VALIDATION: i32 = 2;
const EXIT_BUDGET: i32 = 3;
const EXIT_EXECUTION: i32 = 4;
const EXIT_CANCELLED: i32 = 5;

#[derive(Debug, Parser)]
#[command(name = "cadenza", about = "Cadenza workflow orchestrator CLI")]
pub struct Cli {
    /// Configuration file; falls back to defaults + environment when absent
    #[arg(long, default_value = "configs/cadenza.yaml")]
    config: PathBuf,
    /// Agent manifest seeding the in-process registry
    #[arg(long)]
    agents: Option<PathBuf>,
    #[arg(long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered agents
    ListAgents,
    /// Validate a workflow document
    Validate(WorkflowArgs),
    /// Schedule a workflow run and wait for it to finish
    Schedule(ScheduleArgs),
    /// Show a run
    Status { run_id: String },
    /// Cancel a run
    Cancel { run_id: String },
}

#[derive(Debug, Args, Clone)]
struct WorkflowArgs {
    /// Workflow document (YAML)
    workflow: PathBuf,
}

#[derive(Debug, Args, Clone)]
struct ScheduleArgs {
    /// Workflow document (YAML)
    workflow: PathBuf,
    /// Run inputs as inline JSON
    #[arg(long, default_value = "{}")]
    inputs: String,
    /// Wallet funding the run
    #[arg(long)]
    wallet: String,
    /// Credit the wallet with this many atomic units before scheduling
    #[arg(long)]
    deposit: Option<u64>,
    /// Token decimals used for display formatting
    #[arg(long, default_value_t = 6)]
    decimals: u32,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<i32> {
        ensure_log_filter(self.verbose);
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();

        let config = load_config(&self.config)?;
        let stack = Stack::build(&config, self.agents.as_deref()).await?;

        match self.command {
            Command::ListAgents => stack.list_agents().await,
            Command::Validate(args) => stack.validate(&args.workflow).await,
            Command::Schedule(args) => stack.schedule(&config, args).await,
            Command::Status { run_id } => stack.status(&run_id).await,
            Command::Cancel { run_id } => stack.cancel(&run_id).await,
        }
    }
}

fn ensure_log_filter(verbose: bool) {
    if verbose {
        env::set_var("RUST_LOG", "debug");
        return;
    }
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
}

fn load_config(path: &Path) -> anyhow::Result<CadenzaConfig> {
    if path.exists() {
        Ok(cadenza_config::load_config(path)?)
    } else {
        tracing::debug!(path = %path.display(), "config file absent, using defaults");
        Ok(CadenzaConfig::from_env()?)
    }
}

/// The in-process component stack behind every command.
struct Stack {
    registry: Arc<InMemoryAgentRegistry>,
    ledger: Arc<InMemoryBudgetLedger>,
    scheduler: Arc<WorkflowScheduler>,
    engine: Arc<ExecutionEngine>,
}

impl Stack {
    async fn build(config: &CadenzaConfig, agents: Option<&Path>) -> anyhow::Result<Self> {
        let registry = Arc::new(InMemoryAgentRegistry::new());
        let ledger = Arc::new(InMemoryBudgetLedger::new());
        let run_store = Arc::new(InMemoryRunStore::new());
        let queue = Arc::new(InMemoryRunQueue::new());

        if let Some(path) = agents {
            let manifest = AgentManifest::from_file(path)?;
            let count = seed_registry(registry.as_ref(), &manifest).await?;
            tracing::info!(count, "registry seeded from manifest");
        }

        let transport = Arc::new(HttpAgentTransport::with_timeout(Duration::from_secs(
            config.agents.call_timeout_secs,
        ))?);

        // On-chain signing is delegated to an external chain client; the CLI
        // runs without one, so paywalled agents fail with a payment error.
        if config.payments.payments_enabled() {
            tracing::warn!(
                "SIGNER_KEY is set but the CLI has no chain client; paywalled agents will fail"
            );
        }
        let engine = Arc::new(build_engine(
            registry.clone(),
            ledger.clone(),
            run_store.clone(),
            transport,
            None,
            cadenza_payments_config(config),
        ));

        let scheduler = Arc::new(WorkflowScheduler::new(
            WorkflowValidator::new(registry.clone()),
            ledger.clone(),
            run_store,
            queue,
        ));

        Ok(Self {
            registry,
            ledger,
            scheduler,
            engine,
        })
    }

    async fn list_agents(&self) -> anyhow::Result<i32> {
        let agents = self.registry.list(&AgentFilter::default()).await?;
        if agents.is_empty() {
            println!("no agents registered (seed with --agents <manifest.yaml>)");
            return Ok(EXIT_OK);
        }
        for agent in agents {
            println!(
                "{:<24} {:<12} {:?}  {}  {} {} on {}",
                agent.reference,
                format!("{:?}", agent.status).to_lowercase(),
                agent.category,
                agent.endpoint.as_deref().unwrap_or("-"),
                agent.pricing.amount,
                agent.pricing.token,
                agent.pricing.chain,
            );
        }
        Ok(EXIT_OK)
    }

    async fn validate(&self, workflow: &Path) -> anyhow::Result<i32> {
        let spec = read_workflow(workflow)?;
        let validator = WorkflowValidator::new(self.registry.clone());
        match validator.validate(&spec).await {
            Ok(()) => {
                println!("workflow '{}' is valid", spec.name);
                Ok(EXIT_OK)
            }
            Err(errors) => {
                eprintln!("workflow '{}' is invalid:", spec.name);
                for error in errors {
                    eprintln!("  - {error}");
                }
                Ok(EXIT_VALIDATION)
            }
        }
    }

    async fn schedule(&self, config: &CadenzaConfig, args: ScheduleArgs) -> anyhow::Result<i32> {
        let spec = read_workflow(&args.workflow)?;
        let inputs: Value = serde_json::from_str(&args.inputs)
            .map_err(|e| anyhow::anyhow!("--inputs is not valid JSON: {e}"))?;

        if let Some(amount) = args.deposit {
            let balance = self.ledger.deposit(&args.wallet, &spec.token, amount).await?;
            tracing::info!(
                wallet = %args.wallet,
                balance = %format_units(balance, args.decimals),
                "wallet funded"
            );
        }

        let run = match self.scheduler.schedule(&spec, &args.wallet, inputs).await {
            Ok(run) => run,
            Err(SchedulerError::Validation { reasons }) => {
                eprintln!("workflow '{}' is invalid:", spec.name);
                for reason in reasons {
                    eprintln!("  - {reason}");
                }
                return Ok(EXIT_VALIDATION);
            }
            Err(SchedulerError::Ledger(e @ LedgerError::InsufficientBudget { .. })) => {
                eprintln!("{e}");
                return Ok(EXIT_BUDGET);
            }
            Err(e) => return Err(e.into()),
        };
        println!("run {} scheduled", run.id);

        let pool = RunWorkerPool::new(self.scheduler.clone(), self.engine.clone())
            .with_workers(config.runtime.workers)
            .with_poll_interval(Duration::from_millis(config.runtime.poll_interval_ms));
        let handle = pool.spawn();

        let done = loop {
            let current = self.scheduler.status(&run.id).await?;
            if current.status.is_terminal() {
                break current;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        };
        handle.shutdown().await;

        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "runId": done.id,
                "status": done.status,
                "output": done.output,
                "spent": format_units(done.spent_budget, args.decimals),
                "error": done.error,
            }))?
        );
        Ok(match done.status {
            RunStatus::Completed => EXIT_OK,
            RunStatus::Cancelled => EXIT_CANCELLED,
            _ => EXIT_EXECUTION,
        })
    }

    async fn status(&self, run_id: &str) -> anyhow::Result<i32> {
        match self.scheduler.status(run_id).await {
            Ok(run) => {
                println!("{}", serde_json::to_string_pretty(&run)?);
                Ok(EXIT_OK)
            }
            Err(SchedulerError::RunNotFound(_)) => {
                eprintln!("run {run_id} not found");
                Ok(EXIT_EXECUTION)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel(&self, run_id: &str) -> anyhow::Result<i32> {
        match self.scheduler.cancel(run_id).await {
            Ok(run) => {
                println!("run {} cancelled", run.id);
                Ok(EXIT_CANCELLED)
            }
            Err(SchedulerError::RunNotFound(_)) => {
                eprintln!("run {run_id} not found");
                Ok(EXIT_EXECUTION)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn cadenza_payments_config(
    config: &CadenzaConfig,
) -> cadenza_payments::PaymentCoordinatorConfig {
    cadenza_payments::PaymentCoordinatorConfig {
        max_payment: config.payments.max_payment_atomic,
        auto_payment: config.payments.auto_payment,
    }
}

fn read_workflow(path: &Path) -> anyhow::Result<WorkflowSpec> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading workflow {}: {e}", path.display()))?;
    serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("parsing workflow {}: {e}", path.display()))
}
