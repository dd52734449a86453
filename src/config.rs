//! # Configuration Constants
//!
//! Constants shared by the covenant validator, the builders and the node
//! collaborators. Consensus values live in [`consensus`]; everything else is a
//! default that callers may override.

/// Network and RPC configuration
pub mod network {
    /// Default regtest RPC host
    pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";

    /// Default regtest RPC port
    pub const DEFAULT_RPC_PORT: &str = "18443";

    /// Default RPC username
    pub const DEFAULT_RPC_USER: &str = "user";

    /// Default RPC password
    pub const DEFAULT_RPC_PASSWORD: &str = "password";

    /// Default wallet name for funding and mining
    pub const DEFAULT_WALLET_NAME: &str = "opvault";

    /// RPC error code for transactions rejected by mempool policy or consensus
    pub const RPC_VERIFY_REJECTED: i32 = -26;

    /// RPC error code for unknown transactions, among others
    pub const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
}

/// Vault operation defaults
///
/// The defaults reproduce the canonical vault lifecycle: a 10 block spend delay,
/// a 10,000 sat funding fee and deterministic keys so transaction ids are
/// reproducible between runs.
pub mod vault {
    /// Default relative timelock in blocks between trigger and withdrawal.
    pub const DEFAULT_SPEND_DELAY: i64 = 10;

    /// Fee taken from the funding coin when initializing a vault.
    pub const DEFAULT_INIT_FEE_SATS: u64 = 10_000;

    /// Fee kept by an optional fee-coin input; the rest returns as change.
    pub const FEE_INPUT_SATS: u64 = 10_000;

    /// Secret scalar of the default recovery key.
    pub const DEFAULT_RECOVERY_SECRET: u64 = 2;

    /// Secret scalar of the default unvault trigger key.
    pub const DEFAULT_UNVAULT_SECRET: u64 = 3;

    /// Target withdrawal keys use secrets `TARGET_SECRET_BASE + i`.
    pub const TARGET_SECRET_BASE: u64 = 4;

    /// Default number of withdrawal targets produced by `split_vault_value`.
    pub const DEFAULT_SPLIT_COUNT: usize = 3;

    /// Value of each coin handed out by the in-memory node.
    ///
    /// Chosen so that a default vault locks exactly 1,000,000 sats.
    pub const DEFAULT_COIN_SATS: u64 = 1_010_000;
}

/// Consensus limits and encodings enforced by the validator
pub mod consensus {
    /// Deepest witness-program evaluation allowed. The input spend is depth 0,
    /// an authorization evaluated from a covenant opcode is depth 1.
    pub const MAX_RECURSION_DEPTH: usize = 1;

    /// Maximum number of stack elements during script execution.
    pub const MAX_STACK_SIZE: usize = 1_000;

    /// Largest spend delay expressible in a BIP68 block-based lock.
    pub const MAX_SPEND_DELAY: i64 = 0xffff;

    /// Highest nSequence that still signals BIP125 replaceability.
    pub const MAX_BIP125_RBF_SEQUENCE: u32 = 0xffff_fffd;

    /// BIP68: relative lock disabled when set.
    pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

    /// BIP68: lock measured in 512 second units when set.
    pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

    /// BIP68: lock value bits.
    pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

    /// Provably unspendable internal key for OP_UNVAULT outputs.
    pub const UNVAULT_NUMS_INTERNAL_KEY: &str =
        "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";
}

/// Tagged hash domains
pub mod tags {
    /// Commits the recovery output script inside recovery params.
    pub const RECOVERY_SPK: &str = "VaultRecoverySPK";

    /// Commits the unvault trigger key script inside the vault script.
    pub const UNVAULT_SPK: &str = "VaultUnvaultSPK";
}

/// File paths and names
pub mod files {
    /// Default vault plan file written by `create-vault`
    pub const DEFAULT_VAULT_FILE: &str = "vault_plan.json";
}

/// Environment variable names
pub mod env {
    /// RPC URL override
    pub const RPC_URL: &str = "RPC_URL";

    /// RPC port override
    pub const RPC_PORT: &str = "RPC_PORT";

    /// RPC username override
    pub const RPC_USER: &str = "RPC_USER";

    /// RPC password override
    pub const RPC_PASSWORD: &str = "RPC_PASSWORD";

    /// Wallet name override
    pub const RPC_WALLET: &str = "RPC_WALLET";
}
