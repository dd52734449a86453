//! # Vault Parameters
//!
//! A [`VaultSpec`] bundles everything needed to create, trigger and recover one
//! vault UTXO: the recovery and unvault keys, the spend delay, the optional
//! recovery authorization and, once funded, the vault's outpoint and output.
//!
//! The vault output is a taproot output keyed by the recovery key with the
//! `OP_VAULT` covenant as its single leaf, so the recovery key can always spend
//! it directly while everybody else has to go through the covenant.

use super::builders::UnvaultTrigger;
use super::taproot;
use crate::config::vault as vault_config;
use crate::error::{VaultError, VaultResult};
use crate::hashes;
use crate::script::{CovenantScript, RecoveryParams};
use bitcoin::{
    secp256k1::{SecretKey, XOnlyPublicKey},
    taproot::TaprootSpendInfo,
    Amount, OutPoint, ScriptBuf, Transaction, TxOut,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, str::FromStr};

/// Extra spending condition gating the recovery sweep.
#[derive(Debug, Clone)]
pub enum RecoveryAuthorization {
    /// No authorization; anyone may broadcast the (tightly shaped) recovery
    AnyoneCanSpend,
    /// Key-path spend of a taproot output keyed by `secret`
    TaprootKey { secret: SecretKey },
    /// Script-path spend revealing `script` under `internal_key`
    ScriptPath {
        script: ScriptBuf,
        internal_key: XOnlyPublicKey,
        witness_stack: Vec<Vec<u8>>,
    },
}

impl RecoveryAuthorization {
    pub fn taproot_key(secret: SecretKey) -> Self {
        Self::TaprootKey { secret }
    }

    pub fn script_path(script: ScriptBuf, internal_key: XOnlyPublicKey) -> Self {
        Self::ScriptPath {
            script,
            internal_key,
            witness_stack: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AnyoneCanSpend => "none",
            Self::TaprootKey { .. } => "taproot-key",
            Self::ScriptPath { .. } => "script-path",
        }
    }

    /// Script the recovery witness is checked against; empty for none.
    pub fn script_pubkey(&self) -> VaultResult<ScriptBuf> {
        match self {
            Self::AnyoneCanSpend => Ok(ScriptBuf::new()),
            Self::TaprootKey { secret } => {
                Ok(taproot::p2tr_spk(&taproot::key_spend_info(taproot::x_only(secret))))
            }
            Self::ScriptPath {
                script,
                internal_key,
                ..
            } => Ok(taproot::p2tr_spk(&taproot::single_leaf_info(*internal_key, script)?)),
        }
    }

    /// Replace the fixed stack revealed before a script-path authorization.
    pub fn set_witness_stack(&mut self, stack: Vec<Vec<u8>>) -> VaultResult<()> {
        match self {
            Self::ScriptPath { witness_stack, .. } => {
                *witness_stack = stack;
                Ok(())
            }
            other => Err(VaultError::config(format!(
                "{} authorization has no fixed witness stack",
                other.name()
            ))),
        }
    }

    /// Witness elements satisfying `script_pubkey()` for input `input_index`.
    pub fn witness_stack(
        &self,
        tx: &Transaction,
        prevouts: &[TxOut],
        input_index: usize,
    ) -> VaultResult<Vec<Vec<u8>>> {
        match self {
            Self::AnyoneCanSpend => Ok(Vec::new()),
            Self::TaprootKey { secret } => {
                let info = taproot::key_spend_info(taproot::x_only(secret));
                let signature = taproot::sign_key_spend(tx, prevouts, input_index, secret, &info)?;
                Ok(vec![signature])
            }
            Self::ScriptPath {
                script,
                internal_key,
                witness_stack,
            } => {
                let info = taproot::single_leaf_info(*internal_key, script)?;
                let mut stack = witness_stack.clone();
                stack.push(script.to_bytes());
                stack.push(taproot::control_block(&info, script)?);
                Ok(stack)
            }
        }
    }
}

/// Deterministic or random key pair for one vault.
#[derive(Debug, Clone, Copy)]
pub struct VaultKeys {
    pub recovery: SecretKey,
    pub unvault: SecretKey,
}

impl VaultKeys {
    pub fn from_scalars(recovery: u64, unvault: u64) -> VaultResult<Self> {
        Ok(Self {
            recovery: taproot::secret_from_u64(recovery)?,
            unvault: taproot::secret_from_u64(unvault)?,
        })
    }

    /// Keys 2 (recovery) and 3 (unvault), shared by all default vaults
    pub fn default_keys() -> VaultResult<Self> {
        Self::from_scalars(
            vault_config::DEFAULT_RECOVERY_SECRET,
            vault_config::DEFAULT_UNVAULT_SECRET,
        )
    }

    pub fn generate() -> VaultResult<Self> {
        Ok(Self {
            recovery: taproot::random_secret()?,
            unvault: taproot::random_secret()?,
        })
    }
}

/// One vault's parameters and, once initialized, its on-chain location.
#[derive(Debug, Clone)]
pub struct VaultSpec {
    pub keys: VaultKeys,
    pub spend_delay: i64,
    pub recovery_auth: RecoveryAuthorization,
    pub recovery_params: RecoveryParams,
    /// The OP_VAULT leaf hidden in the vault output
    pub vault_script: ScriptBuf,
    vault_taproot: TaprootSpendInfo,
    /// Set when the vault is initialized
    pub total_amount: Option<Amount>,
    pub vault_outpoint: Option<OutPoint>,
    pub vault_output: Option<TxOut>,
}

impl VaultSpec {
    pub fn new(keys: VaultKeys, spend_delay: i64, recovery_auth: RecoveryAuthorization) -> VaultResult<Self> {
        let recovery_spk = Self::recovery_spk_for(&keys.recovery);
        let recovery_params = RecoveryParams::new(&recovery_spk, recovery_auth.script_pubkey()?);
        let unvault_spk = Self::unvault_spk_for(&keys.unvault);

        let vault_script = CovenantScript::vault(
            recovery_params.clone(),
            spend_delay,
            hashes::unvault_spk_hash(&unvault_spk),
        )
        .to_script()?;
        let vault_taproot = taproot::single_leaf_info(taproot::x_only(&keys.recovery), &vault_script)?;

        Ok(Self {
            keys,
            spend_delay,
            recovery_auth,
            recovery_params,
            vault_script,
            vault_taproot,
            total_amount: None,
            vault_outpoint: None,
            vault_output: None,
        })
    }

    /// Default keys and the given spend delay and authorization
    pub fn with_delay(spend_delay: i64, recovery_auth: RecoveryAuthorization) -> VaultResult<Self> {
        Self::new(VaultKeys::default_keys()?, spend_delay, recovery_auth)
    }

    fn recovery_spk_for(recovery: &SecretKey) -> ScriptBuf {
        taproot::p2tr_spk(&taproot::key_spend_info(taproot::x_only(recovery)))
    }

    fn unvault_spk_for(unvault: &SecretKey) -> ScriptBuf {
        taproot::p2tr_spk(&taproot::key_spend_info(taproot::x_only(unvault)))
    }

    /// Where recovered funds go
    pub fn recovery_spk(&self) -> ScriptBuf {
        Self::recovery_spk_for(&self.keys.recovery)
    }

    /// Key-path output whose witness authorizes a trigger
    pub fn unvault_spk(&self) -> ScriptBuf {
        Self::unvault_spk_for(&self.keys.unvault)
    }

    /// Script of the vault output itself
    pub fn vault_spk(&self) -> ScriptBuf {
        taproot::p2tr_spk(&self.vault_taproot)
    }

    pub fn vault_control_block(&self) -> VaultResult<Vec<u8>> {
        taproot::control_block(&self.vault_taproot, &self.vault_script)
    }

    pub fn is_initialized(&self) -> bool {
        self.vault_outpoint.is_some() && self.vault_output.is_some()
    }

    /// Outpoint and output of the funded vault
    pub fn funded_output(&self) -> VaultResult<(OutPoint, TxOut)> {
        match (self.vault_outpoint, &self.vault_output) {
            (Some(outpoint), Some(output)) => Ok((outpoint, output.clone())),
            _ => Err(VaultError::config("vault has not been initialized")),
        }
    }

    /// Signature by the tweaked unvault key over input `input_index`.
    pub fn sign_trigger(&self, tx: &Transaction, prevouts: &[TxOut], input_index: usize) -> VaultResult<Vec<u8>> {
        let info = taproot::key_spend_info(taproot::x_only(&self.keys.unvault));
        taproot::sign_key_spend(tx, prevouts, input_index, &self.keys.unvault, &info)
    }

    /// Record the funding transaction's vault output, e.g. after a wallet re-signs it.
    pub fn set_funding(&mut self, funding_tx: &Transaction, vout: u32) -> VaultResult<()> {
        let output = funding_tx
            .output
            .get(vout as usize)
            .cloned()
            .ok_or_else(|| VaultError::transaction(format!("funding transaction has no output {vout}")))?;
        if output.script_pubkey != self.vault_spk() {
            return Err(VaultError::transaction("funding output does not pay to this vault"));
        }
        self.total_amount = Some(output.value);
        self.vault_outpoint = Some(OutPoint::new(funding_tx.compute_txid(), vout));
        self.vault_output = Some(output);
        Ok(())
    }

    /// The vault continued by a trigger's revault output.
    pub fn revaulted(&self, trigger: &UnvaultTrigger) -> VaultResult<VaultSpec> {
        let vout = trigger
            .revault_vout
            .ok_or_else(|| VaultError::transaction("trigger transaction has no revault output"))?;
        let mut spec = self.clone();
        spec.set_funding(&trigger.tx, vout)?;
        Ok(spec)
    }

    pub fn to_plan(&self) -> VaultPlan {
        VaultPlan {
            recovery_secret: self.keys.recovery.display_secret().to_string(),
            unvault_secret: self.keys.unvault.display_secret().to_string(),
            spend_delay: self.spend_delay,
            recovery_auth: self.recovery_auth.name().to_string(),
            vault_spk: hex::encode(self.vault_spk().as_bytes()),
            recovery_params: hex::encode(self.recovery_params.to_bytes()),
            total_amount: self.total_amount.map(Amount::to_sat),
            vault_outpoint: self.vault_outpoint.map(|o| o.to_string()),
        }
    }

    /// Rebuild a spec from a saved plan. Script-path authorizations are not persisted.
    pub fn from_plan(plan: &VaultPlan) -> VaultResult<Self> {
        let parse_secret = |hex_str: &str| {
            SecretKey::from_str(hex_str).map_err(|e| VaultError::config(format!("invalid secret key: {e}")))
        };
        let keys = VaultKeys {
            recovery: parse_secret(&plan.recovery_secret)?,
            unvault: parse_secret(&plan.unvault_secret)?,
        };
        let auth = match plan.recovery_auth.as_str() {
            "none" => RecoveryAuthorization::AnyoneCanSpend,
            "taproot-key" => RecoveryAuthorization::taproot_key(keys.recovery),
            other => {
                return Err(VaultError::config(format!(
                    "recovery authorization '{other}' cannot be restored from a plan"
                )))
            }
        };
        let mut spec = Self::new(keys, plan.spend_delay, auth)?;
        if hex::encode(spec.vault_spk().as_bytes()) != plan.vault_spk {
            return Err(VaultError::config("plan vault script does not match its keys"));
        }
        if let (Some(sats), Some(outpoint)) = (plan.total_amount, &plan.vault_outpoint) {
            let outpoint = OutPoint::from_str(outpoint)
                .map_err(|e| VaultError::config(format!("invalid vault outpoint: {e}")))?;
            spec.total_amount = Some(Amount::from_sat(sats));
            spec.vault_outpoint = Some(outpoint);
            spec.vault_output = Some(TxOut {
                value: Amount::from_sat(sats),
                script_pubkey: spec.vault_spk(),
            });
        }
        Ok(spec)
    }
}

/// Serializable vault description written by the CLI.
///
/// Secrets are stored in hex; plans are demo material, not wallet backups.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VaultPlan {
    pub recovery_secret: String,
    pub unvault_secret: String,
    pub spend_delay: i64,
    pub recovery_auth: String,
    pub vault_spk: String,
    pub recovery_params: String,
    pub total_amount: Option<u64>,
    pub vault_outpoint: Option<String>,
}

impl VaultPlan {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> VaultResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> VaultResult<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}
