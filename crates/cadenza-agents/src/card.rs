//! Agent card discovery.
//!
//! Every agent publishes a descriptor document at
//! `<endpointBase>/.well-known/agent-card.json`. It names the agent,
//! declares its JSON-RPC base URL (defaulting to the endpoint base), and
//! lists capabilities. Cards are memoized per endpoint for the process
//! lifetime; the first writer wins.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known path of the descriptor document
pub const CARD_PATH: &str = "/.well-known/agent-card.json";

/// Agent descriptor document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON-RPC base URL; absent means the endpoint base itself
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Declared capabilities; object or array depending on the vendor
    #[serde(default)]
    pub capabilities: Value,
    /// Whether the agent offers streaming responses (informational; the
    /// orchestrator always calls blocking)
    #[serde(default)]
    pub streaming: Option<bool>,
    #[serde(default)]
    pub endpoints: Option<Value>,
    /// Vendor metadata the card may carry beyond the known fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentCard {
    /// The URL JSON-RPC requests POST to.
    pub fn rpc_url(&self, endpoint_base: &str) -> String {
        match self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => url.to_string(),
            None => endpoint_base.trim_end_matches('/').to_string(),
        }
    }

    /// Whether the card advertises a streaming capability.
    pub fn supports_streaming(&self) -> bool {
        if self.streaming == Some(true) {
            return true;
        }
        match &self.capabilities {
            Value::Object(map) => map.get("streaming").and_then(Value::as_bool) == Some(true),
            Value::Array(items) => items.iter().any(|v| v.as_str() == Some("streaming")),
            _ => false,
        }
    }
}

/// Process-lifetime card cache keyed by endpoint base.
pub struct CardCache {
    cards: RwLock<HashMap<String, AgentCard>>,
}

impl CardCache {
    pub fn new() -> Self {
        Self {
            cards: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, endpoint: &str) -> Option<AgentCard> {
        let cards = self.cards.read().unwrap_or_else(|e| e.into_inner());
        cards.get(endpoint).cloned()
    }

    /// Memoize a card. The first writer wins; the stored card is returned.
    pub fn insert(&self, endpoint: &str, card: AgentCard) -> AgentCard {
        let mut cards = self.cards.write().unwrap_or_else(|e| e.into_inner());
        cards.entry(endpoint.to_string()).or_insert(card).clone()
    }

    /// Drop every memoized card. Testing hook.
    pub fn clear(&self) {
        let mut cards = self.cards.write().unwrap_or_else(|e| e.into_inner());
        cards.clear();
    }
}

impl Default for CardCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The card URL for an endpoint base.
pub fn card_url(endpoint_base: &str) -> String {
    format!("{}{}", endpoint_base.trim_end_matches('/'), CARD_PATH)
}
