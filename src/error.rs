//! # Error Types for OP_VAULT Covenants
//!
//! One error enum covers the three places things go wrong: building a vault
//! transaction (caller mistakes), validating one (covenant rule violations) and
//! talking to a node. Validation variants carry stable reason strings so a
//! rejection can be matched on by substring, the way node reject reasons are.

use bitcoin::OutPoint;
use thiserror::Error;

/// Main error type for all vault-related operations
#[derive(Debug, Error)]
pub enum VaultError {
    /// Configuration errors during vault setup
    #[error("Vault configuration error: {message}")]
    Configuration { message: String },

    /// Errors during transaction construction
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// Batch trigger over vaults with different recovery params or spend delay
    #[error("Incompatible vault batch: {reason}")]
    IncompatibleBatch { reason: String },

    /// Sweep from an OP_UNVAULT output without the trigger record
    #[error("Sweeping {outpoint} requires the unvault trigger transaction")]
    MissingTriggerTransaction { outpoint: OutPoint },

    /// Insufficient funds for operations
    #[error("Insufficient funds: required {required} sats, available {available} sats")]
    InsufficientFunds { required: u64, available: u64 },

    /// Cryptographic operation failures
    #[error("Cryptographic operation failed: {message}")]
    Cryptography { message: String },

    /// Trigger output does not match the covenant, or the trigger value falls short
    #[error("OP_UNVAULT outputs not compatible: {reason}")]
    IncompatibleUnvaultOutputs { reason: String },

    /// Outputs claim more value than the inputs provide
    #[error("bad-txns-in-belowout: outputs {outputs} sats exceed inputs {inputs} sats")]
    BelowOutValue { inputs: u64, outputs: u64 },

    /// The input's own nSequence does not encode the covenant spend delay
    #[error("non-final relative lock: input {input} nSequence {sequence:#x} below spend delay {spend_delay}")]
    NonFinalRelativeLock {
        input: usize,
        sequence: u32,
        spend_delay: u16,
    },

    /// BIP68: the spent output has not been buried deep enough yet
    #[error("non-BIP68-final: input {input} needs {needed} confirmations, has {confirmations}")]
    TimelockNotMatured {
        input: usize,
        needed: u32,
        confirmations: u32,
    },

    /// Withdrawal outputs differ from the set committed at trigger time
    #[error("target hash mismatch: committed {expected}, transaction hashes to {actual}")]
    TargetHashMismatch { expected: String, actual: String },

    /// Script evaluation nested beyond the interpreter's depth bound
    #[error("Too many recursive calls (depth {depth})")]
    RecursionLimitExceeded { depth: usize },

    /// Spend delay outside the BIP68 block range
    #[error("invalid spend delay {delay}")]
    InvalidSpendDelay { delay: i64 },

    /// Recovery output carries less than the value recovering into it
    #[error("vault-insufficient-recovery-value: output {vout} pays {actual} sats, needs {required} sats")]
    InsufficientRecoveryValue { vout: u32, required: u64, actual: u64 },

    /// Claimed recovery output is not the committed recovery script
    #[error("recovery output mismatch: input {input} claims output {vout}")]
    RecoveryOutputMismatch { input: usize, vout: u32 },

    /// Unauthenticated recovery with anything beyond recovery + anchor
    #[error("recovery transaction has bad output structure: {reason}")]
    BadRecoveryStructure { reason: String },

    /// Recovery inputs must signal replaceability
    #[error("Vault recovery inputs must be replaceable (input {input})")]
    NonReplaceableRecovery { input: usize },

    /// Generic script failure while evaluating an input
    #[error("script-verify-flag-failed (input {input}: {reason})")]
    ScriptVerify { input: usize, reason: String },

    /// Spent output unknown to the node
    #[error("bad-txns-inputs-missingorspent: {outpoint}")]
    MissingInputs { outpoint: OutPoint },

    /// Input already spent by a mempool transaction
    #[error("txn-mempool-conflict: {outpoint}")]
    MempoolConflict { outpoint: OutPoint },

    /// Structurally invalid transaction
    #[error("Malformed transaction: {message}")]
    MalformedTransaction { message: String },

    /// Bitcoin RPC communication failures
    #[error("RPC communication failed: {source}")]
    Rpc {
        #[from]
        source: bitcoincore_rpc::Error,
    },

    /// Node rejected a submitted transaction
    #[error("Transaction rejected ({code}): {message}")]
    Rejected { code: i32, message: String },

    /// File I/O operations
    #[error("File operation failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON processing error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Result type alias for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// Create a configuration error with a message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a cryptography error with a message
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Cryptography {
            message: message.into(),
        }
    }

    /// Create a transaction construction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a script failure for an input
    pub fn script(input: usize, reason: impl Into<String>) -> Self {
        Self::ScriptVerify {
            input,
            reason: reason.into(),
        }
    }

    /// Create a trigger incompatibility with a node-style reason
    pub fn incompatible(reason: impl Into<String>) -> Self {
        Self::IncompatibleUnvaultOutputs {
            reason: reason.into(),
        }
    }

    /// Caller mistakes surfaced by the builders
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            VaultError::Configuration { .. }
                | VaultError::Transaction { .. }
                | VaultError::IncompatibleBatch { .. }
                | VaultError::MissingTriggerTransaction { .. }
                | VaultError::InsufficientFunds { .. }
        )
    }

    /// Consensus or policy rejections produced by the validator
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            VaultError::IncompatibleUnvaultOutputs { .. }
                | VaultError::BelowOutValue { .. }
                | VaultError::NonFinalRelativeLock { .. }
                | VaultError::TimelockNotMatured { .. }
                | VaultError::TargetHashMismatch { .. }
                | VaultError::RecursionLimitExceeded { .. }
                | VaultError::InvalidSpendDelay { .. }
                | VaultError::InsufficientRecoveryValue { .. }
                | VaultError::RecoveryOutputMismatch { .. }
                | VaultError::BadRecoveryStructure { .. }
                | VaultError::NonReplaceableRecovery { .. }
                | VaultError::ScriptVerify { .. }
                | VaultError::MissingInputs { .. }
                | VaultError::MempoolConflict { .. }
                | VaultError::MalformedTransaction { .. }
                | VaultError::Rejected { .. }
        )
    }

    /// Check if this error is retryable (network/temporary issues)
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Rpc { .. })
    }

    /// Check if this error indicates someone tried to move vaulted funds illegitimately
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::Cryptography { .. }
                | VaultError::IncompatibleUnvaultOutputs { .. }
                | VaultError::TargetHashMismatch { .. }
                | VaultError::RecursionLimitExceeded { .. }
                | VaultError::NonFinalRelativeLock { .. }
                | VaultError::TimelockNotMatured { .. }
        )
    }
}
