//! # OP_VAULT: Covenant Vault Library
//!
//! Vaults built on the `OP_VAULT` / `OP_UNVAULT` covenant opcodes: a vault
//! output can only be triggered towards a committed set of withdrawal outputs,
//! which become spendable after a relative timelock, and can be swept to a
//! recovery script at any time before that.
//!
//! The crate holds both sides of the covenant: the builders that produce vault
//! transactions and the validator a node runs on them.

pub mod config;
pub mod error;
pub mod hashes;
pub mod interpreter;
pub mod script;
pub mod services;
pub mod utils;
pub mod validator;
pub mod vaults;

// Re-export commonly used types
pub use error::{VaultError, VaultResult};
pub use services::{CoinSource, FundingCoin, MemoryNode, Node, RpcNode};
pub use validator::{validate_transaction, SpentCoin, ValidatedTransaction, VaultState};
pub use vaults::{RecoveryAuthorization, UnvaultTrigger, VaultSpec};
