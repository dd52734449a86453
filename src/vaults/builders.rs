//! # Vault Transaction Builders
//!
//! Builders for the four lifecycle transactions:
//!
//! 1. **Initialize**: a funding coin into the vault output
//! 2. **Trigger**: one or more vaults into a shared `OP_UNVAULT` output,
//!    optionally returning change to a revault output
//! 3. **Withdrawal**: the `OP_UNVAULT` output into its committed targets once
//!    the spend delay has passed
//! 4. **Sweep**: vault or triggered outputs straight to recovery
//!
//! Builders only check what the caller controls. Everything else is left to the
//! validator, so the options below can produce transactions it will reject.

use super::spec::VaultSpec;
use super::taproot;
use crate::config::vault::FEE_INPUT_SATS;
use crate::error::{VaultError, VaultResult};
use crate::script::{script_num, CovenantScript, RecoveryParams};
use crate::services::node::FundingCoin;
use bitcoin::{
    absolute::LockTime, opcodes::all::OP_PUSHNUM_2, script::Builder, transaction::Version, Amount, OutPoint,
    ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use log::{debug, info};
use std::collections::HashSet;

/// Hook run on a transaction after it is assembled and before it is signed.
pub type PresignHook<'a> = &'a dyn Fn(&mut Transaction);

/// Everything later transactions need to know about a trigger.
#[derive(Debug, Clone)]
pub struct UnvaultTrigger {
    pub tx: Transaction,
    pub spend_delay: i64,
    pub recovery_params: RecoveryParams,
    pub target_outputs_hash: [u8; 32],
    pub trigger_vout: u32,
    pub revault_vout: Option<u32>,
    /// `[unvault script, control block]`, the tail of every spend of the trigger output
    pub spend_witness: Vec<Vec<u8>>,
}

impl UnvaultTrigger {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn trigger_outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid(), self.trigger_vout)
    }

    pub fn trigger_output(&self) -> VaultResult<TxOut> {
        self.tx
            .output
            .get(self.trigger_vout as usize)
            .cloned()
            .ok_or_else(|| VaultError::transaction("trigger transaction lost its trigger output"))
    }

    pub fn revault_outpoint(&self) -> Option<OutPoint> {
        self.revault_vout.map(|vout| OutPoint::new(self.txid(), vout))
    }
}

#[derive(Default, Clone, Copy)]
pub struct TriggerOptions<'a> {
    /// Value returned to the vault script at output 1
    pub revault_amount: Option<Amount>,
    /// Build batches over mismatched vaults instead of refusing
    pub allow_incompatible: bool,
    pub presign: Option<PresignHook<'a>>,
}

#[derive(Default, Clone, Copy)]
pub struct SweepOptions<'a> {
    /// Extra OP_TRUE input paying the fee, appended last
    pub fee_coin: Option<&'a FundingCoin>,
    /// Return the fee coin minus the fee reserve as change at output 0
    pub fee_change: bool,
    pub presign: Option<PresignHook<'a>>,
}

fn unsigned_tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

fn txin(previous_output: OutPoint, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::new(),
    }
}

/// Spend `coin` into a new vault output, recording it on `spec`.
pub fn build_initialize_vault(spec: &mut VaultSpec, coin: &FundingCoin, fee: Amount) -> VaultResult<Transaction> {
    if fee >= coin.value {
        return Err(VaultError::InsufficientFunds {
            required: fee.to_sat() + 1,
            available: coin.value.to_sat(),
        });
    }
    let tx = unsigned_tx(
        vec![txin(coin.outpoint, Sequence::MAX)],
        vec![TxOut {
            value: coin.value - fee,
            script_pubkey: spec.vault_spk(),
        }],
    );
    spec.set_funding(&tx, 0)?;
    info!(
        "Built vault initialization {} locking {} sats",
        tx.compute_txid(),
        (coin.value - fee).to_sat()
    );
    Ok(tx)
}

pub fn build_trigger_unvault(
    target_outputs_hash: [u8; 32],
    vaults: &[&VaultSpec],
    revault_amount: Option<Amount>,
) -> VaultResult<UnvaultTrigger> {
    build_trigger_unvault_with(
        target_outputs_hash,
        vaults,
        &TriggerOptions {
            revault_amount,
            ..TriggerOptions::default()
        },
    )
}

/// Trigger `vaults` towards the outputs hashing to `target_outputs_hash`.
///
/// Output 0 is the trigger output, output 1 the optional revault. The first
/// vault's parameters shape the trigger output.
pub fn build_trigger_unvault_with(
    target_outputs_hash: [u8; 32],
    vaults: &[&VaultSpec],
    options: &TriggerOptions<'_>,
) -> VaultResult<UnvaultTrigger> {
    let first = *vaults
        .first()
        .ok_or_else(|| VaultError::config("trigger needs at least one vault"))?;

    if !options.allow_incompatible {
        for spec in &vaults[1..] {
            if spec.spend_delay != first.spend_delay {
                return Err(VaultError::IncompatibleBatch {
                    reason: format!("spend delay {} differs from {}", spec.spend_delay, first.spend_delay),
                });
            }
            if spec.recovery_params != first.recovery_params {
                return Err(VaultError::IncompatibleBatch {
                    reason: "recovery params differ".to_string(),
                });
            }
        }
    }

    let mut prevouts = Vec::with_capacity(vaults.len());
    let mut inputs = Vec::with_capacity(vaults.len());
    let mut seen = HashSet::new();
    for spec in vaults {
        let (outpoint, output) = spec.funded_output()?;
        if !seen.insert(outpoint) {
            return Err(VaultError::config(format!("vault {outpoint} triggered twice")));
        }
        inputs.push(txin(outpoint, Sequence::ZERO));
        prevouts.push(output);
    }
    let total = prevouts.iter().map(|o| o.value).sum::<Amount>();

    let unvault_script = CovenantScript::unvault(first.recovery_params.clone(), first.spend_delay, target_outputs_hash)
        .to_script()?;
    let unvault_info = taproot::single_leaf_info(taproot::nums_point()?, &unvault_script)?;

    let revault = match options.revault_amount {
        Some(amount) if amount >= total || amount == Amount::ZERO => {
            return Err(VaultError::transaction(format!(
                "revault amount {} sats must be between 1 and {} sats",
                amount.to_sat(),
                total.to_sat().saturating_sub(1)
            )))
        }
        other => other,
    };
    let mut outputs = vec![TxOut {
        value: total - revault.unwrap_or(Amount::ZERO),
        script_pubkey: taproot::p2tr_spk(&unvault_info),
    }];
    if let Some(amount) = revault {
        outputs.push(TxOut {
            value: amount,
            script_pubkey: first.vault_spk(),
        });
    }

    let mut tx = unsigned_tx(inputs, outputs);
    if let Some(presign) = options.presign {
        presign(&mut tx);
    }

    let trigger_vout = 0u32;
    for (index, spec) in vaults.iter().enumerate() {
        let signature = spec.sign_trigger(&tx, &prevouts, index)?;
        tx.input[index].witness = Witness::from_slice(&[
            signature,
            spec.unvault_spk().to_bytes(),
            target_outputs_hash.to_vec(),
            script_num::encode(i64::from(trigger_vout)),
            script_num::encode(-1),
            spec.vault_script.to_bytes(),
            spec.vault_control_block()?,
        ]);
    }

    info!(
        "Built trigger {} for {} vault(s), {} sats",
        tx.compute_txid(),
        vaults.len(),
        total.to_sat()
    );
    Ok(UnvaultTrigger {
        tx,
        spend_delay: first.spend_delay,
        recovery_params: first.recovery_params.clone(),
        target_outputs_hash,
        trigger_vout,
        revault_vout: revault.map(|_| 1),
        spend_witness: vec![
            unvault_script.to_bytes(),
            taproot::control_block(&unvault_info, &unvault_script)?,
        ],
    })
}

/// Spend the trigger output at `unvault_outpoint` to `targets`.
pub fn build_final_withdrawal(
    unvault_outpoint: OutPoint,
    targets: &[TxOut],
    trigger: &UnvaultTrigger,
) -> VaultResult<Transaction> {
    if targets.is_empty() {
        return Err(VaultError::config("withdrawal needs at least one target output"));
    }
    let delay = u32::try_from(trigger.spend_delay)
        .map_err(|_| VaultError::config(format!("spend delay {} cannot be a relative lock", trigger.spend_delay)))?;

    let mut tx = unsigned_tx(vec![txin(unvault_outpoint, Sequence(delay))], targets.to_vec());
    let mut witness = vec![script_num::encode(-1)];
    witness.extend(trigger.spend_witness.iter().cloned());
    tx.input[0].witness = Witness::from_slice(&witness);

    info!("Built withdrawal {} with nSequence {delay}", tx.compute_txid());
    Ok(tx)
}

pub fn build_sweep_to_recovery(
    vaults: &[(&VaultSpec, OutPoint)],
    trigger: Option<&UnvaultTrigger>,
) -> VaultResult<Transaction> {
    build_sweep_to_recovery_with(vaults, trigger, &SweepOptions::default())
}

/// Where a swept outpoint sits in its lifecycle.
enum SweepSource {
    Vault,
    Triggered,
}

/// Sweep each `(vault, outpoint)` pair to its recovery output.
///
/// Vaults sharing a recovery script share one output. A zero-value `OP_2`
/// anchor follows the recovery outputs for fee bumping.
pub fn build_sweep_to_recovery_with(
    vaults: &[(&VaultSpec, OutPoint)],
    trigger: Option<&UnvaultTrigger>,
    options: &SweepOptions<'_>,
) -> VaultResult<Transaction> {
    if vaults.is_empty() {
        return Err(VaultError::config("sweep needs at least one vault"));
    }
    let mut seen = HashSet::new();
    for (_, outpoint) in vaults {
        if !seen.insert(*outpoint) {
            return Err(VaultError::config(format!("outpoint {outpoint} swept twice")));
        }
    }

    let mut prevouts = Vec::with_capacity(vaults.len() + 1);
    let mut sources = Vec::with_capacity(vaults.len());
    for (spec, outpoint) in vaults {
        if spec.vault_outpoint == Some(*outpoint) {
            let (_, output) = spec.funded_output()?;
            prevouts.push(output);
            sources.push(SweepSource::Vault);
            continue;
        }
        let trigger = trigger.ok_or(VaultError::MissingTriggerTransaction { outpoint: *outpoint })?;
        if trigger.trigger_outpoint() != *outpoint {
            return Err(VaultError::config(format!(
                "{outpoint} is neither the vault output nor the trigger output"
            )));
        }
        prevouts.push(trigger.trigger_output()?);
        sources.push(SweepSource::Triggered);
    }

    // One output per distinct recovery script, in first-seen order
    let mut recovery_outputs: Vec<TxOut> = Vec::new();
    let mut recovery_index = Vec::with_capacity(vaults.len());
    for ((spec, _), prevout) in vaults.iter().zip(&prevouts) {
        let spk = spec.recovery_spk();
        match recovery_outputs.iter().position(|o| o.script_pubkey == spk) {
            Some(index) => {
                recovery_outputs[index].value += prevout.value;
                recovery_index.push(index);
            }
            None => {
                recovery_outputs.push(TxOut {
                    value: prevout.value,
                    script_pubkey: spk,
                });
                recovery_index.push(recovery_outputs.len() - 1);
            }
        }
    }

    let mut inputs: Vec<TxIn> = vaults
        .iter()
        .map(|(_, outpoint)| txin(*outpoint, Sequence::ENABLE_RBF_NO_LOCKTIME))
        .collect();
    let mut outputs = recovery_outputs;
    outputs.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: Builder::new().push_opcode(OP_PUSHNUM_2).into_script(),
    });

    let mut shift = 0;
    if let Some(coin) = options.fee_coin {
        inputs.push(txin(coin.outpoint, Sequence::ENABLE_RBF_NO_LOCKTIME));
        prevouts.push(TxOut {
            value: coin.value,
            script_pubkey: coin.claim_script.clone(),
        });
        if options.fee_change {
            let reserve = Amount::from_sat(FEE_INPUT_SATS);
            if coin.value <= reserve {
                return Err(VaultError::InsufficientFunds {
                    required: FEE_INPUT_SATS + 1,
                    available: coin.value.to_sat(),
                });
            }
            outputs.insert(
                0,
                TxOut {
                    value: coin.value - reserve,
                    script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
                },
            );
            shift = 1;
        }
    }

    let mut tx = unsigned_tx(inputs, outputs);
    if let Some(presign) = options.presign {
        presign(&mut tx);
    }

    for (index, (((spec, _), source), vout)) in vaults.iter().zip(&sources).zip(&recovery_index).enumerate() {
        let mut witness = spec.recovery_auth.witness_stack(&tx, &prevouts, index)?;
        witness.push(script_num::encode((vout + shift) as i64));
        match source {
            SweepSource::Vault => {
                witness.push(spec.vault_script.to_bytes());
                witness.push(spec.vault_control_block()?);
            }
            SweepSource::Triggered => {
                let trigger = trigger.ok_or(VaultError::MissingTriggerTransaction {
                    outpoint: tx.input[index].previous_output,
                })?;
                witness.extend(trigger.spend_witness.iter().cloned());
            }
        }
        tx.input[index].witness = Witness::from_slice(&witness);
    }

    debug!("sweep prevouts: {:?}", prevouts.iter().map(|o| o.value.to_sat()).collect::<Vec<_>>());
    info!("Built recovery sweep {} over {} input(s)", tx.compute_txid(), tx.input.len());
    Ok(tx)
}
