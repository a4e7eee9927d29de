//! Chain client abstraction.
//!
//! The orchestrator never links a signing or RPC library directly; it
//! depends on this narrow capability trait, injected by the embedder. The
//! stablecoin is a standard ERC-20 reached through `call_contract` /
//! `read_contract` with the method names below.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use cadenza_core::types::AtomicAmount;

/// Chain interaction errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("contract call failed: {0}")]
    Call(String),

    #[error("contract read failed: {0}")]
    Read(String),

    #[error("transaction {0} reverted")]
    Reverted(String),

    #[error("no receipt for transaction {0}")]
    ReceiptUnavailable(String),
}

/// Confirmation data for a mined transaction
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    /// False when the transaction reverted
    pub success: bool,
}

/// Narrow signer/RPC capability the payment flow composes with.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The signer's wallet address.
    fn address(&self) -> String;

    /// Sign an arbitrary text message; returns the hex signature.
    async fn sign_message(&self, message: &str) -> Result<String, ChainError>;

    /// Recover the signer address of a signed text message.
    async fn recover_message(&self, message: &str, signature: &str)
        -> Result<String, ChainError>;

    /// Submit a state-changing contract call; returns the transaction hash.
    async fn call_contract(
        &self,
        contract: &str,
        abi: &str,
        method: &str,
        args: &[Value],
    ) -> Result<String, ChainError>;

    /// Read a contract view method.
    async fn read_contract(
        &self,
        contract: &str,
        abi: &str,
        method: &str,
        args: &[Value],
    ) -> Result<Value, ChainError>;

    /// Block until the transaction is mined.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, ChainError>;
}

/// Standard ERC-20 surface used for settlement.
pub mod erc20 {
    use super::*;

    pub const ABI: &str = "erc20";
    pub const BALANCE_OF: &str = "balanceOf";
    pub const ALLOWANCE: &str = "allowance";
    pub const APPROVE: &str = "approve";
    pub const TRANSFER: &str = "transfer";

    /// Read the owner → spender allowance.
    pub async fn allowance(
        chain: &dyn ChainClient,
        asset: &str,
        owner: &str,
        spender: &str,
    ) -> Result<AtomicAmount, ChainError> {
        let value = chain
            .read_contract(
                asset,
                ABI,
                ALLOWANCE,
                &[Value::String(owner.into()), Value::String(spender.into())],
            )
            .await?;
        parse_amount(&value)
            .ok_or_else(|| ChainError::Read(format!("allowance returned {value}")))
    }

    /// Approve `spender` for `amount`; returns the transaction hash.
    pub async fn approve(
        chain: &dyn ChainClient,
        asset: &str,
        spender: &str,
        amount: AtomicAmount,
    ) -> Result<String, ChainError> {
        chain
            .call_contract(
                asset,
                ABI,
                APPROVE,
                &[
                    Value::String(spender.into()),
                    Value::String(amount.to_string()),
                ],
            )
            .await
    }

    /// Transfer `amount` to `recipient`; returns the transaction hash.
    pub async fn transfer(
        chain: &dyn ChainClient,
        asset: &str,
        recipient: &str,
        amount: AtomicAmount,
    ) -> Result<String, ChainError> {
        chain
            .call_contract(
                asset,
                ABI,
                TRANSFER,
                &[
                    Value::String(recipient.into()),
                    Value::String(amount.to_string()),
                ],
            )
            .await
    }

    /// Amounts come back as JSON numbers or decimal strings depending on the
    /// RPC layer.
    fn parse_amount(value: &Value) -> Option<AtomicAmount> {
        match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
