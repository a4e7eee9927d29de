//! Core type definitions
//!
//! Agents, workflows, runs, and payment wire shapes. Money is always a
//! non-negative integer count of a token's atomic base units; formatting to
//! decimal strings happens only at presentation boundaries.

mod agent;
mod payment;
mod run;
mod workflow;

pub use agent::{AgentCategory, AgentDescriptor, AgentStatus, PricingModel, PricingPolicy};
pub use payment::{
    PaymentAuthorization, PaymentChallenge, PaymentProof, PaymentRequirement, SettlementReceipt,
};
pub use run::{NodeRun, NodeRunStatus, Run, RunStatus, StateError};
pub use workflow::{NodeKind, RetryPolicy, WorkflowEdge, WorkflowNode, WorkflowSpec};

/// Atomic base-unit amount of a token (1 USDC = 1_000_000 for 6 decimals)
pub type AtomicAmount = u64;

/// Format an atomic amount as a decimal token string, e.g. 1_500_000 with 6
/// decimals → "1.5". Presentation only; never feed the result back into
/// arithmetic.
pub fn format_units(amount: AtomicAmount, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let divisor = 10u64.saturating_pow(decimals);
    let whole = amount / divisor;
    let frac = amount % divisor;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}
