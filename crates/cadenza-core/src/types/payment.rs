//! Payment protocol wire types
//!
//! A paywalled agent answers with a 402 challenge listing what it accepts;
//! the orchestrator answers with a signed authorization and an on-chain
//! transfer hash. These structs are the wire shapes, camelCase to match the
//! JSON-RPC envelope. Amounts travel as either JSON numbers or decimal
//! strings; both deserialize into atomic units.

use serde::{Deserialize, Serialize};

use super::AtomicAmount;

/// One acceptable way to pay, as advertised in a 402 challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    /// Payment scheme identifier; "exact" is the recognized value
    pub scheme: String,
    /// Settlement network name (e.g. "base-sepolia")
    pub network: String,
    /// Stablecoin contract address
    pub asset: String,
    /// Recipient wallet
    pub pay_to: String,
    /// Maximum atomic amount the agent may claim
    #[serde(with = "amount_serde")]
    pub max_amount_required: AtomicAmount,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    /// Validity window granted to the authorization, seconds
    #[serde(default = "default_timeout_secs")]
    pub max_timeout_seconds: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

impl PaymentRequirement {
    /// The scheme value this implementation understands.
    pub const SCHEME_EXACT: &'static str = "exact";

    pub fn is_exact(&self) -> bool {
        self.scheme == Self::SCHEME_EXACT
    }
}

/// The full 402 challenge body: everything the agent accepts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentChallenge {
    #[serde(default)]
    pub accepts: Vec<PaymentRequirement>,
    #[serde(default)]
    pub message: String,
}

/// The values a signed authorization binds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub from: String,
    pub to: String,
    #[serde(with = "amount_serde")]
    pub value: AtomicAmount,
    /// Unix timestamps bounding validity
    pub valid_after: i64,
    pub valid_before: i64,
    /// 32 random bytes, hex encoded
    pub nonce: String,
}

/// Authorization plus its signature — what travels on the retried request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub authorization: PaymentAuthorization,
    pub signature: String,
}

/// Confirmation of an on-chain transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub network: String,
}

/// Accepts atomic amounts as JSON numbers or decimal strings.
pub(crate) mod amount_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::AtomicAmount;

    pub fn serialize<S>(amount: &AtomicAmount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<AtomicAmount, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.trim().parse::<AtomicAmount>().map_err(|_| {
                serde::de::Error::custom(format!("invalid atomic amount: '{s}'"))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requirement_accepts_string_and_number_amounts() {
        let from_string: PaymentRequirement = serde_json::from_value(json!({
            "scheme": "exact",
            "network": "base-sepolia",
            "asset": "0xasset",
            "payTo": "0xmerchant",
            "maxAmountRequired": "100"
        }))
        .unwrap();
        assert_eq!(from_string.max_amount_required, 100);
        assert!(from_string.is_exact());

        let from_number: PaymentRequirement = serde_json::from_value(json!({
            "scheme": "exact",
            "network": "base-sepolia",
            "asset": "0xasset",
            "payTo": "0xmerchant",
            "maxAmountRequired": 250
        }))
        .unwrap();
        assert_eq!(from_number.max_amount_required, 250);
        assert_eq!(from_number.max_timeout_seconds, 300);
    }

    #[test]
    fn test_proof_round_trips_camel_case() {
        let proof = PaymentProof {
            authorization: PaymentAuthorization {
                from: "0xfrom".into(),
                to: "0xto".into(),
                value: 100,
                valid_after: 1_700_000_000,
                valid_before: 1_700_000_300,
                nonce: "ab".repeat(32),
            },
            signature: "0xsig".into(),
        };
        let value = serde_json::to_value(&proof).unwrap();
        assert!(value["authorization"]["validBefore"].is_i64());
        assert_eq!(value["authorization"]["value"], json!("100"));

        let back: PaymentProof = serde_json::from_value(value).unwrap();
        assert_eq!(back.authorization, proof.authorization);
    }
}
