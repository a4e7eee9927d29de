//! Payment authorizations.
//!
//! An authorization binds sender, recipient, amount, a validity window, and
//! a random nonce, and is signed over a canonical text message. The same
//! canonical form is reconstructed by the receiving side to recover and
//! check the signer.

use rand::Rng;
use serde_json::{json, Value};
use thiserror::Error;

use cadenza_core::types::{
    AtomicAmount, PaymentAuthorization, PaymentChallenge, PaymentProof, PaymentRequirement,
};

use crate::chain::{ChainClient, ChainError};

/// Verification failures. Rendered back to callers as a 402-preserving
/// error; the signature itself never appears in the text.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("authorization pays {found}, expected {expected}")]
    WrongRecipient { expected: String, found: String },

    #[error("authorized value {value} is below the required {required}")]
    InsufficientValue {
        value: AtomicAmount,
        required: AtomicAmount,
    },

    #[error("authorization is not valid yet")]
    NotYetValid,

    #[error("authorization expired")]
    Expired,

    #[error("declared network '{declared}' does not match the requirement's '{expected}'")]
    WrongNetwork { expected: String, declared: String },

    #[error("recovered signer does not match the authorization sender")]
    SignerMismatch,

    #[error("signature recovery failed: {0}")]
    Recover(#[from] ChainError),
}

/// The canonical text an authorization signs.
pub fn canonical_message(
    network: &str,
    asset: &str,
    from: &str,
    to: &str,
    value: AtomicAmount,
) -> String {
    format!("Chain ID: {network}\nContract: {asset}\nUser: {from}\nReceiver: {to}\nAmount: {value}\n")
}

/// A fresh 32-byte nonce, hex encoded.
pub fn random_nonce() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Build and sign an authorization satisfying `requirement`.
///
/// The window opens now and closes after the requirement's timeout.
pub async fn build_proof(
    chain: &dyn ChainClient,
    requirement: &PaymentRequirement,
    value: AtomicAmount,
    now: i64,
) -> Result<PaymentProof, ChainError> {
    let from = chain.address();
    let message = canonical_message(
        &requirement.network,
        &requirement.asset,
        &from,
        &requirement.pay_to,
        value,
    );
    let signature = chain.sign_message(&message).await?;
    Ok(PaymentProof {
        authorization: PaymentAuthorization {
            from,
            to: requirement.pay_to.clone(),
            value,
            valid_after: now,
            valid_before: now + requirement.max_timeout_seconds as i64,
            nonce: random_nonce(),
        },
        signature,
    })
}

/// Server-side proof verification for agents gated by the orchestrator's
/// middleware: recipient, value, validity window, network, and recovered
/// signer must all line up.
pub async fn verify_authorization(
    chain: &dyn ChainClient,
    proof: &PaymentProof,
    requirement: &PaymentRequirement,
    expected_pay_to: &str,
    declared_network: &str,
    now: i64,
) -> Result<(), VerifyError> {
    let auth = &proof.authorization;

    if auth.to != expected_pay_to {
        return Err(VerifyError::WrongRecipient {
            expected: expected_pay_to.to_string(),
            found: auth.to.clone(),
        });
    }
    if auth.value < requirement.max_amount_required {
        return Err(VerifyError::InsufficientValue {
            value: auth.value,
            required: requirement.max_amount_required,
        });
    }
    if now < auth.valid_after {
        return Err(VerifyError::NotYetValid);
    }
    if now > auth.valid_before {
        return Err(VerifyError::Expired);
    }
    if declared_network != requirement.network {
        return Err(VerifyError::WrongNetwork {
            expected: requirement.network.clone(),
            declared: declared_network.to_string(),
        });
    }

    let message = canonical_message(
        &requirement.network,
        &requirement.asset,
        &auth.from,
        &auth.to,
        auth.value,
    );
    let recovered = chain.recover_message(&message, &proof.signature).await?;
    if !recovered.eq_ignore_ascii_case(&auth.from) {
        return Err(VerifyError::SignerMismatch);
    }
    Ok(())
}

/// Render a verification failure as the JSON-RPC error body an agent
/// answers with: code 402, the original payment challenge preserved in
/// `data` so a compliant caller can try again.
pub fn verification_failure_response(
    id: Value,
    challenge: &PaymentChallenge,
    error: &VerifyError,
) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": 402,
            "message": error.to_string(),
            "data": challenge,
        },
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::chain::TxReceipt;

    /// Signer stub: signatures encode the signer address so recovery is a
    /// string parse.
    struct StubSigner {
        address: String,
    }

    #[async_trait]
    impl ChainClient for StubSigner {
        fn address(&self) -> String {
            self.address.clone()
        }

        async fn sign_message(&self, _message: &str) -> Result<String, ChainError> {
            Ok(format!("0xsigned-by-{}", self.address))
        }

        async fn recover_message(
            &self,
            _message: &str,
            signature: &str,
        ) -> Result<String, ChainError> {
            signature
                .strip_prefix("0xsigned-by-")
                .map(str::to_string)
                .ok_or_else(|| ChainError::Signing("unrecognized signature".into()))
        }

        async fn call_contract(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[Value],
        ) -> Result<String, ChainError> {
            unimplemented!("not used by authorization tests")
        }

        async fn read_contract(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[Value],
        ) -> Result<Value, ChainError> {
            unimplemented!("not used by authorization tests")
        }

        async fn wait_for_receipt(&self, _: &str) -> Result<TxReceipt, ChainError> {
            unimplemented!("not used by authorization tests")
        }
    }

    fn requirement() -> PaymentRequirement {
        PaymentRequirement {
            scheme: "exact".into(),
            network: "base-sepolia".into(),
            asset: "0xasset".into(),
            pay_to: "0xmerchant".into(),
            max_amount_required: 100,
            resource: String::new(),
            description: String::new(),
            mime_type: String::new(),
            max_timeout_seconds: 300,
        }
    }

    #[test]
    fn test_canonical_message_format() {
        let message = canonical_message("base-sepolia", "0xasset", "0xfrom", "0xto", 100);
        assert_eq!(
            message,
            "Chain ID: base-sepolia\nContract: 0xasset\nUser: 0xfrom\nReceiver: 0xto\nAmount: 100\n"
        );
    }

    #[test]
    fn test_nonces_are_32_bytes_and_unique() {
        let a = random_nonce();
        let b = random_nonce();
        assert_eq!(hex::decode(&a).unwrap().len(), 32);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_build_then_verify_round_trip() {
        let signer = StubSigner {
            address: "0xpayer".into(),
        };
        let now = 1_700_000_000;
        let proof = build_proof(&signer, &requirement(), 100, now).await.unwrap();

        assert_eq!(proof.authorization.from, "0xpayer");
        assert_eq!(proof.authorization.valid_before, now + 300);

        verify_authorization(&signer, &proof, &requirement(), "0xmerchant", "base-sepolia", now)
            .await
            .unwrap();
    }

    #[test]
    fn test_verification_failure_preserves_challenge() {
        let challenge = PaymentChallenge {
            accepts: vec![requirement()],
            message: "payment required".into(),
        };
        let error = VerifyError::Expired;
        let body = verification_failure_response(json!(7), &challenge, &error);

        assert_eq!(body["error"]["code"], json!(402));
        assert_eq!(body["id"], json!(7));
        assert_eq!(body["error"]["data"]["accepts"][0]["payTo"], json!("0xmerchant"));
        assert!(!body["error"]["message"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify_rejects_each_violation() {
        let signer = StubSigner {
            address: "0xpayer".into(),
        };
        let now = 1_700_000_000;
        let proof = build_proof(&signer, &requirement(), 100, now).await.unwrap();
        let req = requirement();

        let err = verify_authorization(&signer, &proof, &req, "0xother", "base-sepolia", now)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::WrongRecipient { .. }));

        let err = verify_authorization(&signer, &proof, &req, "0xmerchant", "base", now)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::WrongNetwork { .. }));

        let err = verify_authorization(
            &signer,
            &proof,
            &req,
            "0xmerchant",
            "base-sepolia",
            now + 301,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerifyError::Expired));

        let err = verify_authorization(
            &signer,
            &proof,
            &req,
            "0xmerchant",
            "base-sepolia",
            now - 1,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VerifyError::NotYetValid));

        let mut short = proof.clone();
        short.authorization.value = 99;
        let err = verify_authorization(&signer, &short, &req, "0xmerchant", "base-sepolia", now)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::InsufficientValue { .. }));

        let mut forged = proof.clone();
        forged.signature = "0xsigned-by-0xmallory".into();
        let err = verify_authorization(&signer, &forged, &req, "0xmerchant", "base-sepolia", now)
            .await
            .unwrap_err();
        assert!(matches!(err, VerifyError::SignerMismatch));
    }
}
