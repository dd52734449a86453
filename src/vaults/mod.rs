//! # Vaults Module
//!
//! Vault parameters and the transactions that move a vault through its
//! lifecycle.
//!
//! ## Components
//!
//! - **Spec**: keys, spend delay, recovery authorization and the vault output
//! - **Builders**: initialize, trigger, withdrawal and recovery sweep
//! - **Taproot**: output construction and signing shared by both

pub mod builders;
pub mod spec;
pub mod taproot;

mod tests;

pub use builders::{
    build_final_withdrawal, build_initialize_vault, build_sweep_to_recovery, build_sweep_to_recovery_with,
    build_trigger_unvault, build_trigger_unvault_with, SweepOptions, TriggerOptions, UnvaultTrigger,
};
pub use spec::{RecoveryAuthorization, VaultKeys, VaultPlan, VaultSpec};
