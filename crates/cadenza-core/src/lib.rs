//! # Cadenza Core
//!
//! Core abstractions and deterministic logic for the Cadenza workflow
//! orchestrator.
//!
//! This crate contains:
//! - Agent / Workflow / Run / Payment type definitions
//! - Template resolution, workflow validation, and the execution engine
//! - Store and transport trait seams
//!
//! This crate does NOT care about:
//! - How agents are reached over the network (cadenza-agents)
//! - How payments settle on chain (cadenza-payments)
//! - How runs are scheduled onto workers (cadenza-runtime)
//! - Where state is persisted (cadenza-stores)

pub mod engine;
pub mod store;
pub mod template;
pub mod transport;
pub mod types;
pub mod validator;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{topological_order, EngineError, ExecutionEngine};
    pub use crate::store::{
        AgentFilter, AgentPatch, AgentRegistry, BudgetLedger, LedgerError, RegistryError,
        Reservation, ReservationStatus, RunQueue, RunStore, StoreError,
    };
    pub use crate::template::{resolve, resolve_str, unresolved_tokens};
    pub use crate::transport::{
        extract_output, AgentTransport, Artifact, CallOutcome, CallReply, CallRequest, Part,
        TransportError,
    };
    pub use crate::types::{
        format_units, AgentCategory, AgentDescriptor, AgentStatus, AtomicAmount, NodeKind,
        NodeRun, NodeRunStatus, PaymentAuthorization, PaymentChallenge, PaymentProof,
        PaymentRequirement, PricingModel, PricingPolicy, RetryPolicy, Run, RunStatus,
        SettlementReceipt, StateError, WorkflowEdge, WorkflowNode, WorkflowSpec,
    };
    pub use crate::validator::{ValidationError, WorkflowValidator};
}

// Re-export key types at crate root
pub use engine::{EngineError, ExecutionEngine};
pub use store::{AgentRegistry, BudgetLedger, RunQueue, RunStore, StoreError};
pub use transport::{AgentTransport, CallOutcome, CallReply, CallRequest, TransportError};
pub use types::{
    AgentDescriptor, AtomicAmount, NodeRun, Run, RunStatus, StateError, WorkflowSpec,
};
pub use validator::{ValidationError, WorkflowValidator};
