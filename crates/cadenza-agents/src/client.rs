//! HTTP JSON-RPC agent client.
//!
//! Speaks the `message/send` envelope: the node's resolved inputs travel as
//! a single data part of a user message, the call is blocking, and the
//! answer is either a Message, a Task, or a 402 payment challenge. The
//! JSON-RPC base URL comes from the agent card (the root path — requests
//! never POST to a method-named path).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use cadenza_core::transport::{
    AgentTransport, Artifact, CallOutcome, CallReply, CallRequest, Part, TransportError,
};
use cadenza_core::types::PaymentChallenge;

use crate::card::{card_url, AgentCard, CardCache};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP transport for remote agents.
pub struct HttpAgentTransport {
    client: reqwest::Client,
    cards: CardCache,
    timeout: Duration,
    next_id: AtomicI64,
}

impl HttpAgentTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Build a transport with a per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            cards: CardCache::new(),
            timeout,
            next_id: AtomicI64::new(1),
        })
    }

    /// Drop every memoized agent card. Testing hook.
    pub fn clear_card_cache(&self) {
        self.cards.clear();
    }

    /// Fetch (or reuse) the agent card for an endpoint base.
    async fn card(&self, endpoint: &str) -> Result<AgentCard, TransportError> {
        if let Some(card) = self.cards.get(endpoint) {
            return Ok(card);
        }

        let url = card_url(endpoint);
        tracing::debug!(endpoint, url = %url, "fetching agent card");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify_reqwest(e))?;
        if !response.status().is_success() {
            return Err(TransportError::CardUnavailable(endpoint.to_string()));
        }
        let card: AgentCard = response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(format!("agent card: {e}")))?;
        Ok(self.cards.insert(endpoint, card))
    }

    fn classify_reqwest(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout(self.timeout.as_secs());
        }
        if error.is_connect() {
            return TransportError::Connect(error.to_string());
        }
        TransportError::Connect(error.to_string())
    }

    fn build_envelope(&self, request: &CallRequest) -> Value {
        let mut message = json!({
            "kind": "message",
            "messageId": uuid::Uuid::new_v4().to_string(),
            "role": "user",
            "parts": [ { "kind": "data", "data": request.inputs } ],
        });
        if let Some(context_id) = &request.context_id {
            message["contextId"] = Value::String(context_id.clone());
        }
        if !request.metadata.is_empty() {
            message["metadata"] = Value::Object(request.metadata.clone());
        }
        json!({
            "jsonrpc": "2.0",
            "method": "message/send",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "params": {
                "message": message,
                "configuration": { "blocking": true },
            },
        })
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn send(&self, request: CallRequest) -> Result<CallReply, TransportError> {
        let card = self.card(&request.endpoint).await?;
        let url = card.rpc_url(&request.endpoint);
        let envelope = self.build_envelope(&request);

        tracing::debug!(
            endpoint = %request.endpoint,
            url = %url,
            node_id = %request.node_id,
            "sending message/send"
        );
        let response = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| self.classify_reqwest(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Malformed(format!("response body: {e}")))?;

        // Some paywalled agents answer at the HTTP layer before JSON-RPC.
        if status.as_u16() == 402 {
            if let Ok(challenge) = serde_json::from_str::<PaymentChallenge>(&body) {
                if !challenge.accepts.is_empty() {
                    return Ok(CallOutcome::PaymentRequired { challenge }.into());
                }
            }
        }
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: truncate(&body, 300),
            });
        }

        let outcome = decode_response(&body)?;
        Ok(outcome.into())
    }

    async fn available(&self, endpoint: &str) -> bool {
        self.card(endpoint).await.is_ok()
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum WireResult {
    Message {
        #[serde(default)]
        parts: Vec<Part>,
    },
    Task {
        id: String,
        #[serde(default = "unknown_status")]
        status: TaskStatusWire,
        #[serde(default)]
        artifacts: Vec<Artifact>,
    },
}

/// Task status arrives either as `{"state": "..."}` or a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskStatusWire {
    Object { state: String },
    Text(String),
}

fn unknown_status() -> TaskStatusWire {
    TaskStatusWire::Text("unknown".to_string())
}

impl TaskStatusWire {
    fn into_state(self) -> String {
        match self {
            Self::Object { state } => state,
            Self::Text(state) => state,
        }
    }
}

/// Decode a JSON-RPC response body into a call outcome.
///
/// A JSON-RPC error with code 402, or any error whose data carries a
/// non-empty `accepts` array, is a payment challenge and decodes as
/// `PaymentRequired`; other errors are `TransportError::Rpc`.
pub(crate) fn decode_response(body: &str) -> Result<CallOutcome, TransportError> {
    let response: RpcResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::Malformed(format!("JSON-RPC response: {e}")))?;

    if let Some(error) = response.error {
        let challenge = error
            .data
            .as_ref()
            .and_then(|d| serde_json::from_value::<PaymentChallenge>(d.clone()).ok())
            .filter(|c| !c.accepts.is_empty());
        if error.code == 402 || challenge.is_some() {
            let mut challenge = challenge.unwrap_or_default();
            if challenge.message.is_empty() {
                challenge.message = error.message;
            }
            return Ok(CallOutcome::PaymentRequired { challenge });
        }
        return Err(TransportError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    let result = response
        .result
        .ok_or_else(|| TransportError::Malformed("response has neither result nor error".into()))?;
    let wire: WireResult = serde_json::from_value(result)
        .map_err(|e| TransportError::Malformed(format!("result: {e}")))?;

    Ok(match wire {
        WireResult::Message { parts } => CallOutcome::Message { parts },
        WireResult::Task {
            id,
            status,
            artifacts,
        } => CallOutcome::Task {
            id,
            status: status.into_state(),
            artifacts,
        },
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut preview: String = s.chars().take(max_chars).collect();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let transport = HttpAgentTransport::new().unwrap();
        let request = CallRequest::new("https://agents.example/echo", json!({ "m": "hi" }))
            .with_context_id("run-1")
            .for_node("run-1", "a")
            .with_metadata("paymentProvided", json!(true));
        let envelope = transport.build_envelope(&request);

        assert_eq!(envelope["jsonrpc"], json!("2.0"));
        assert_eq!(envelope["method"], json!("message/send"));
        assert!(envelope["id"].is_i64());
        let message = &envelope["params"]["message"];
        assert_eq!(message["kind"], json!("message"));
        assert_eq!(message["role"], json!("user"));
        assert_eq!(message["parts"][0]["kind"], json!("data"));
        assert_eq!(message["parts"][0]["data"], json!({ "m": "hi" }));
        assert_eq!(message["contextId"], json!("run-1"));
        assert_eq!(message["metadata"]["paymentProvided"], json!(true));
        assert!(message["messageId"].is_string());
        assert_eq!(envelope["params"]["configuration"]["blocking"], json!(true));
    }

    #[test]
    fn test_envelope_ids_increment() {
        let transport = HttpAgentTransport::new().unwrap();
        let request = CallRequest::new("https://agents.example/echo", json!({}));
        let first = transport.build_envelope(&request)["id"].as_i64().unwrap();
        let second = transport.build_envelope(&request)["id"].as_i64().unwrap();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_decode_message_result() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "kind": "message",
                "parts": [ { "kind": "text", "text": "hi" } ]
            }
        })
        .to_string();
        let outcome = decode_response(&body).unwrap();
        match outcome {
            CallOutcome::Message { parts } => {
                assert_eq!(parts, vec![Part::Text { text: "hi".into() }])
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_task_result_with_status_object() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "kind": "task",
                "id": "t-1",
                "status": { "state": "completed" },
                "artifacts": [
                    { "artifactId": "art-1", "parts": [ { "kind": "text", "text": "done" } ] }
                ]
            }
        })
        .to_string();
        match decode_response(&body).unwrap() {
            CallOutcome::Task { id, status, artifacts } => {
                assert_eq!(id, "t-1");
                assert_eq!(status, "completed");
                assert_eq!(artifacts.len(), 1);
            }
            other => panic!("expected task, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_402_error_as_payment_challenge() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {
                "code": 402,
                "message": "payment required",
                "data": {
                    "accepts": [{
                        "scheme": "exact",
                        "network": "base-sepolia",
                        "asset": "0xasset",
                        "payTo": "0xmerchant",
                        "maxAmountRequired": "100"
                    }]
                }
            }
        })
        .to_string();
        match decode_response(&body).unwrap() {
            CallOutcome::PaymentRequired { challenge } => {
                assert_eq!(challenge.accepts.len(), 1);
                assert_eq!(challenge.accepts[0].max_amount_required, 100);
            }
            other => panic!("expected challenge, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_accepts_data_without_402_code_is_still_challenge() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 4,
            "error": {
                "code": -32000,
                "message": "payment required",
                "data": {
                    "accepts": [{
                        "scheme": "exact",
                        "network": "base",
                        "asset": "0xasset",
                        "payTo": "0xmerchant",
                        "maxAmountRequired": 42
                    }]
                }
            }
        })
        .to_string();
        assert!(matches!(
            decode_response(&body).unwrap(),
            CallOutcome::PaymentRequired { .. }
        ));
    }

    #[test]
    fn test_decode_plain_error() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "error": { "code": -32601, "message": "method not found" }
        })
        .to_string();
        let err = decode_response(&body).unwrap_err();
        assert!(matches!(err, TransportError::Rpc { code: -32601, .. }));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_decode_malformed_response() {
        assert!(matches!(
            decode_response("not json").unwrap_err(),
            TransportError::Malformed(_)
        ));
        let body = json!({ "jsonrpc": "2.0", "id": 6 }).to_string();
        assert!(matches!(
            decode_response(&body).unwrap_err(),
            TransportError::Malformed(_)
        ));
    }
}
