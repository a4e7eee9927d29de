//! # Cadenza Payments
//!
//! The payment half of the orchestrator: a chain client capability trait
//! (sign / call / read / receipt), the signed payment authorization and its
//! verification, and the `PaymentCoordinator` transport decorator that
//! recognizes 402 challenges, settles an ERC-20 transfer, and retries the
//! call with the proof attached.

mod authorization;
mod chain;
mod coordinator;

pub use authorization::{
    build_proof, canonical_message, random_nonce, verification_failure_response,
    verify_authorization, VerifyError,
};
pub use chain::{erc20, ChainClient, ChainError, TxReceipt};
pub use coordinator::{PaymentCoordinator, PaymentCoordinatorConfig, PaymentError};
