//! Agent transport abstraction
//!
//! The engine talks to agents through the `AgentTransport` trait. The wire
//! protocol (JSON-RPC 2.0 `message/send` over HTTP) lives in the
//! cadenza-agents crate; this module defines the request/outcome shapes, the
//! error taxonomy with its retriable/non-retriable split, and the output
//! extraction rules shared by every transport.
//!
//! A 402 payment challenge is a first-class outcome variant, not an error:
//! the payment coordinator pattern-matches on `CallOutcome::PaymentRequired`
//! to decide whether to settle and retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{PaymentChallenge, SettlementReceipt};

/// Transport error types.
///
/// `is_retriable` encodes the node-retry classification: transport flakiness
/// (timeouts, connection failures, 5xx, JSON-RPC server errors) may be
/// retried; protocol and payment failures may not.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("agent call timed out after {0}s")]
    Timeout(u64),

    #[error("connection to agent failed: {0}")]
    Connect(String),

    #[error("agent returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("agent returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed agent response: {0}")]
    Malformed(String),

    #[error("agent descriptor unavailable at {0}")]
    CardUnavailable(String),

    #[error("payment failed: {0}")]
    Payment(String),

    #[error("call cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether a node-level retry may help.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) => true,
            Self::Http { status, .. } => *status >= 500,
            // JSON-RPC reserves -32099..=-32000 for server errors.
            Self::Rpc { code, .. } => (-32099..=-32000).contains(code),
            _ => false,
        }
    }
}

/// One part of an agent message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text {
        text: String,
    },
    Data {
        data: Value,
    },
    Artifact {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        parts: Vec<Part>,
    },
    Error {
        message: String,
    },
}

/// A task artifact: a named bundle of parts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// What an agent answered
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// Immediate message response
    Message { parts: Vec<Part> },
    /// Deferred task handle with whatever artifacts exist so far
    Task {
        id: String,
        status: String,
        artifacts: Vec<Artifact>,
    },
    /// 402 challenge: the agent wants payment before executing
    PaymentRequired { challenge: PaymentChallenge },
}

/// An outcome plus how it was paid for, if it was
#[derive(Debug, Clone)]
pub struct CallReply {
    pub outcome: CallOutcome,
    /// Present when an on-chain payment settled this call
    pub settlement: Option<SettlementReceipt>,
}

impl From<CallOutcome> for CallReply {
    fn from(outcome: CallOutcome) -> Self {
        Self {
            outcome,
            settlement: None,
        }
    }
}

/// A single agent invocation request
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Agent endpoint base URL (the descriptor document hangs off this)
    pub endpoint: String,
    /// Resolved node inputs
    pub inputs: Value,
    /// Conversation continuity across nodes of one run
    pub context_id: Option<String>,
    /// Identity of the invocation, used as the payment idempotence key
    pub run_id: String,
    pub node_id: String,
    /// Extra message metadata (payment proofs attach here)
    pub metadata: Map<String, Value>,
}

impl CallRequest {
    pub fn new(endpoint: impl Into<String>, inputs: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            inputs,
            context_id: None,
            run_id: String::new(),
            node_id: String::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn for_node(mut self, run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self.node_id = node_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Speaks to a remote agent.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Invoke the agent and decode its answer.
    async fn send(&self, request: CallRequest) -> Result<CallReply, TransportError>;

    /// Probe the agent's descriptor document.
    async fn available(&self, endpoint: &str) -> bool;
}

/// Derive the node output value from an agent outcome.
///
/// Messages: one text part → that string; several text parts → array of
/// strings; no text → shallow merge of all data parts (later parts win);
/// nothing informative → null. Tasks: `{taskId, status}` plus `output`
/// derived from the first artifact's parts by the same rules. A payment
/// challenge has no output.
pub fn extract_output(outcome: &CallOutcome) -> Value {
    match outcome {
        CallOutcome::Message { parts } => extract_from_parts(parts),
        CallOutcome::Task {
            id,
            status,
            artifacts,
        } => {
            let mut out = Map::new();
            out.insert("taskId".to_string(), Value::String(id.clone()));
            out.insert("status".to_string(), Value::String(status.clone()));
            if let Some(first) = artifacts.first() {
                out.insert("output".to_string(), extract_from_parts(&first.parts));
            }
            Value::Object(out)
        }
        CallOutcome::PaymentRequired { .. } => Value::Null,
    }
}

fn extract_from_parts(parts: &[Part]) -> Value {
    let texts: Vec<&str> = parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    match texts.len() {
        1 => return Value::String(texts[0].to_string()),
        n if n > 1 => {
            return Value::Array(texts.into_iter().map(|t| Value::String(t.into())).collect())
        }
        _ => {}
    }

    let mut merged = Map::new();
    let mut saw_data = false;
    for part in parts {
        if let Part::Data { data } = part {
            saw_data = true;
            if let Value::Object(map) = data {
                for (k, v) in map {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
    }
    if saw_data {
        Value::Object(merged)
    } else {
        Value::Null
    }
}
