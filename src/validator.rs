//! # Covenant Validator
//!
//! Transaction-level consensus for vault covenants. Inputs are evaluated one by
//! one by the [`interpreter`](crate::interpreter); the claims they make are then
//! checked together, since a trigger output or a recovery output can be shared
//! by several inputs.
//!
//! ```text
//!   Vaulted ──trigger──▶ Triggered ──withdraw (after delay)──▶ Withdrawn
//!      │                     │
//!      └──────recover────────┴──────────recover──────────────▶ Recovered
//! ```

use crate::config::consensus::{
    MAX_BIP125_RBF_SEQUENCE, SEQUENCE_LOCKTIME_DISABLE_FLAG, SEQUENCE_LOCKTIME_MASK,
    SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use crate::error::{VaultError, VaultResult};
use crate::interpreter::{self, CovenantClaim, RecoveryClaim, TriggerClaim, UnvaultCommitment};
use crate::script::{CovenantScript, RecoveryParams};
use crate::vaults::taproot::{nums_point, p2tr_spk, single_leaf_info};
use bitcoin::{Amount, ScriptBuf, Transaction, TxOut, Txid};
use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Covenant state of one vault UTXO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VaultState {
    Vaulted,
    Triggered {
        #[serde(with = "hex_bytes")]
        target_outputs_hash: [u8; 32],
        spend_delay: u16,
        /// Blocks until the withdrawal becomes valid
        remaining: u32,
    },
    Withdrawn,
    Recovered,
}

impl VaultState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VaultState::Withdrawn | VaultState::Recovered)
    }
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}

/// State change of the vault UTXO spent by `input`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub input: usize,
    pub from: VaultState,
    pub to: VaultState,
}

/// The output spent by an input, with the height it confirmed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentCoin {
    pub output: TxOut,
    /// `None` while the creating transaction is unconfirmed
    pub height: Option<u32>,
}

impl SpentCoin {
    pub fn confirmed(output: TxOut, height: u32) -> Self {
        Self {
            output,
            height: Some(height),
        }
    }

    pub fn unconfirmed(output: TxOut) -> Self {
        Self { output, height: None }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedTransaction {
    pub txid: Txid,
    pub fee: Amount,
    /// One entry per covenant input, in input order
    pub transitions: Vec<Transition>,
}

/// Validate `tx` for inclusion in block `next_height`.
///
/// `coins[i]` is the output spent by input `i`.
pub fn validate_transaction(
    tx: &Transaction,
    coins: &[SpentCoin],
    next_height: u32,
) -> VaultResult<ValidatedTransaction> {
    let txid = tx.compute_txid();
    check_structure(tx, coins)?;
    let fee = check_value(tx, coins)?;
    let confirmations = check_sequence_locks(tx, coins, next_height)?;

    let prevouts: Vec<TxOut> = coins.iter().map(|coin| coin.output.clone()).collect();
    let mut claims = Vec::new();
    for index in 0..tx.input.len() {
        claims.extend(interpreter::verify_input(tx, &prevouts, index)?);
    }

    check_triggers(tx, &claims)?;
    check_recoveries(tx, &claims)?;

    let transitions = claims
        .iter()
        .map(|claim| transition(claim, &confirmations))
        .collect();

    debug!("validated {txid}: fee {fee}, {} covenant inputs", claims.len());
    Ok(ValidatedTransaction {
        txid,
        fee,
        transitions,
    })
}

fn check_structure(tx: &Transaction, coins: &[SpentCoin]) -> VaultResult<()> {
    let malformed = |message: String| Err(VaultError::MalformedTransaction { message });
    if tx.input.is_empty() {
        return malformed("no inputs".into());
    }
    if tx.output.is_empty() {
        return malformed("no outputs".into());
    }
    if coins.len() != tx.input.len() {
        return malformed(format!("{} spent coins for {} inputs", coins.len(), tx.input.len()));
    }
    let mut seen = HashSet::with_capacity(tx.input.len());
    for input in &tx.input {
        if !seen.insert(input.previous_output) {
            return malformed(format!("bad-txns-inputs-duplicate: {}", input.previous_output));
        }
    }
    Ok(())
}

/// Returns the fee.
fn check_value(tx: &Transaction, coins: &[SpentCoin]) -> VaultResult<Amount> {
    let overflow = || VaultError::MalformedTransaction {
        message: "value out of range".into(),
    };
    let inputs = coins
        .iter()
        .try_fold(0u64, |acc, coin| acc.checked_add(coin.output.value.to_sat()))
        .ok_or_else(overflow)?;
    let outputs = tx
        .output
        .iter()
        .try_fold(0u64, |acc, out| acc.checked_add(out.value.to_sat()))
        .ok_or_else(overflow)?;
    if outputs > inputs {
        return Err(VaultError::BelowOutValue { inputs, outputs });
    }
    Ok(Amount::from_sat(inputs - outputs))
}

/// BIP68 with block-based locks; returns each input's confirmation count.
fn check_sequence_locks(tx: &Transaction, coins: &[SpentCoin], next_height: u32) -> VaultResult<Vec<u32>> {
    let mut confirmations = Vec::with_capacity(coins.len());
    for (input, (txin, coin)) in tx.input.iter().zip(coins).enumerate() {
        let coin_height = coin.height.unwrap_or(next_height);
        let confs = next_height.saturating_sub(coin_height);
        confirmations.push(confs);

        let sequence = txin.sequence.0;
        if tx.version.0 < 2 || sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            continue;
        }
        if sequence & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
            return Err(VaultError::MalformedTransaction {
                message: format!("input {input}: time-based relative locks are unsupported"),
            });
        }
        let needed = sequence & SEQUENCE_LOCKTIME_MASK;
        if confs < needed {
            return Err(VaultError::TimelockNotMatured {
                input,
                needed,
                confirmations: confs,
            });
        }
    }
    Ok(confirmations)
}

fn check_triggers(tx: &Transaction, claims: &[CovenantClaim]) -> VaultResult<()> {
    let mut groups: BTreeMap<u32, Vec<&TriggerClaim>> = BTreeMap::new();
    for claim in claims {
        if let CovenantClaim::Trigger(trigger) = claim {
            groups.entry(trigger.vout).or_default().push(trigger);
        }
    }

    let mut used_revaults = HashSet::new();
    for (vout, group) in groups {
        let first = group[0];
        if let Some(other) = group.iter().find(|t| t.recovery_params != first.recovery_params) {
            return Err(VaultError::incompatible(format!(
                "input {} recovery params differ from input {}",
                other.input, first.input
            )));
        }
        if let Some(other) = group.iter().find(|t| t.spend_delay != first.spend_delay) {
            return Err(VaultError::incompatible(format!(
                "input {} spend delay {} differs from {}",
                other.input, other.spend_delay, first.spend_delay
            )));
        }
        if let Some(other) = group.iter().find(|t| t.target_outputs_hash != first.target_outputs_hash) {
            return Err(VaultError::incompatible(format!(
                "input {} commits to a different target hash",
                other.input
            )));
        }

        let trigger_output = tx
            .output
            .get(vout as usize)
            .ok_or_else(|| VaultError::incompatible(format!("missing trigger output {vout}")))?;
        let expected = expected_unvault_spk(&first.recovery_params, first.spend_delay, first.target_outputs_hash)?;
        if trigger_output.script_pubkey != expected {
            return Err(VaultError::incompatible(format!(
                "trigger output {vout} does not commit to the vault's unvault script"
            )));
        }

        let vault_spks: HashSet<&ScriptBuf> = group.iter().map(|t| &t.vault_spk).collect();
        let revaults: Vec<usize> = tx
            .output
            .iter()
            .enumerate()
            .filter(|(index, out)| *index != vout as usize && vault_spks.contains(&out.script_pubkey))
            .map(|(index, _)| index)
            .collect();
        if revaults.len() > 1 {
            return Err(VaultError::incompatible("more than one revault output"));
        }
        if let Some(index) = revaults.first() {
            if !used_revaults.insert(*index) {
                return Err(VaultError::incompatible(format!(
                    "revault output {index} claimed by two trigger groups"
                )));
            }
        }

        let total: u64 = group.iter().map(|t| t.value.to_sat()).sum();
        let revault_value = revaults.first().map_or(0, |index| tx.output[*index].value.to_sat());
        let out_value = trigger_output.value.to_sat() + revault_value;
        if out_value > total {
            return Err(VaultError::BelowOutValue {
                inputs: total,
                outputs: out_value,
            });
        }
        if out_value < total {
            warn!("trigger output {vout} carries {out_value} sats of {total} triggered");
            return Err(VaultError::incompatible(format!(
                "vault-insufficient-trigger-value (outputs {out_value} sats, vaults {total} sats)"
            )));
        }
    }
    Ok(())
}

/// Script of the `OP_UNVAULT` output a trigger must create.
pub fn expected_unvault_spk(
    recovery_params: &RecoveryParams,
    spend_delay: u16,
    target_outputs_hash: [u8; 32],
) -> VaultResult<ScriptBuf> {
    let script = CovenantScript::unvault(recovery_params.clone(), i64::from(spend_delay), target_outputs_hash)
        .to_script()?;
    Ok(p2tr_spk(&single_leaf_info(nums_point()?, &script)?))
}

fn check_recoveries(tx: &Transaction, claims: &[CovenantClaim]) -> VaultResult<()> {
    let recoveries: Vec<&RecoveryClaim> = claims
        .iter()
        .filter_map(|claim| match claim {
            CovenantClaim::Recovery(recovery) => Some(recovery),
            _ => None,
        })
        .collect();
    if recoveries.is_empty() {
        return Ok(());
    }

    for recovery in &recoveries {
        if tx.input[recovery.input].sequence.0 > MAX_BIP125_RBF_SEQUENCE {
            return Err(VaultError::NonReplaceableRecovery {
                input: recovery.input,
            });
        }
    }

    let mut per_vout: BTreeMap<u32, u64> = BTreeMap::new();
    for recovery in &recoveries {
        let output = &tx.output[recovery.vout as usize];
        if !recovery.recovery_params.commits_to(&output.script_pubkey) {
            return Err(VaultError::RecoveryOutputMismatch {
                input: recovery.input,
                vout: recovery.vout,
            });
        }
        *per_vout.entry(recovery.vout).or_default() += recovery.value.to_sat();
    }
    for (vout, required) in per_vout {
        let actual = tx.output[vout as usize].value.to_sat();
        if actual < required {
            return Err(VaultError::InsufficientRecoveryValue { vout, required, actual });
        }
    }

    let unauthenticated = recoveries.iter().find(|r| !r.recovery_params.is_authenticated());
    if let Some(first) = unauthenticated {
        check_unauthenticated_shape(tx, claims, first)?;
    }
    Ok(())
}

/// Anyone can broadcast an unauthenticated recovery, so it may only sweep
/// vaults with identical params into the recovery output plus one anchor.
fn check_unauthenticated_shape(tx: &Transaction, claims: &[CovenantClaim], first: &RecoveryClaim) -> VaultResult<()> {
    let bad = |reason: &str| {
        Err(VaultError::BadRecoveryStructure {
            reason: reason.to_string(),
        })
    };
    for claim in claims {
        match claim {
            CovenantClaim::Recovery(r) if r.recovery_params == first.recovery_params => {}
            CovenantClaim::Recovery(_) => return bad("recovering vaults with different recovery params"),
            _ => return bad("recovery combined with a non-recovery vault spend"),
        }
    }
    if tx.output.len() != 2 {
        return bad("expected exactly a recovery output and an anchor output");
    }
    let anchor_index = if first.vout == 0 { 1 } else { 0 };
    if tx.output[anchor_index].value != Amount::ZERO {
        return bad("the output beside the recovery output must be a zero-value anchor");
    }
    Ok(())
}

fn transition(claim: &CovenantClaim, confirmations: &[u32]) -> Transition {
    let triggered = |commitment: &UnvaultCommitment, remaining: u32| VaultState::Triggered {
        target_outputs_hash: commitment.target_outputs_hash,
        spend_delay: commitment.spend_delay,
        remaining,
    };
    match claim {
        CovenantClaim::Trigger(trigger) => Transition {
            input: trigger.input,
            from: VaultState::Vaulted,
            to: VaultState::Triggered {
                target_outputs_hash: trigger.target_outputs_hash,
                spend_delay: trigger.spend_delay,
                remaining: u32::from(trigger.spend_delay),
            },
        },
        CovenantClaim::Withdrawal { input, commitment } => Transition {
            input: *input,
            from: triggered(commitment, 0),
            to: VaultState::Withdrawn,
        },
        CovenantClaim::Recovery(recovery) => {
            let from = match &recovery.source {
                None => VaultState::Vaulted,
                Some(commitment) => {
                    let confs = confirmations.get(recovery.input).copied().unwrap_or(0);
                    triggered(commitment, u32::from(commitment.spend_delay).saturating_sub(confs))
                }
            };
            Transition {
                input: recovery.input,
                from,
                to: VaultState::Recovered,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{absolute::LockTime, hashes::Hash, transaction::Version, OutPoint, Sequence, TxIn, Witness};

    fn op_true() -> ScriptBuf {
        ScriptBuf::from_bytes(vec![0x51])
    }

    /// Transaction spending `n` OP_TRUE coins with the given sequence
    fn tx_with(n: usize, sequence: Sequence, outputs: Vec<u64>) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: (0..n)
                .map(|i| TxIn {
                    previous_output: OutPoint::new(Txid::all_zeros(), i as u32),
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs
                .into_iter()
                .map(|sats| TxOut {
                    value: Amount::from_sat(sats),
                    script_pubkey: op_true(),
                })
                .collect(),
        }
    }

    fn coin(sats: u64, height: Option<u32>) -> SpentCoin {
        SpentCoin {
            output: TxOut {
                value: Amount::from_sat(sats),
                script_pubkey: op_true(),
            },
            height,
        }
    }

    #[test]
    fn test_fee_and_conservation() {
        let tx = tx_with(2, Sequence::MAX, vec![1_500]);
        let coins = vec![coin(1_000, Some(1)), coin(1_000, Some(1))];
        let validated = validate_transaction(&tx, &coins, 2).unwrap();
        assert_eq!(validated.fee, Amount::from_sat(500));
        assert!(validated.transitions.is_empty());

        let tx = tx_with(1, Sequence::MAX, vec![1_001]);
        let err = validate_transaction(&tx, &[coin(1_000, Some(1))], 2).unwrap_err();
        assert!(matches!(err, VaultError::BelowOutValue { inputs: 1_000, outputs: 1_001 }));
        assert!(err.to_string().contains("bad-txns-in-belowout"));
    }

    #[test]
    fn test_structure() {
        let tx = tx_with(1, Sequence::MAX, vec![]);
        assert!(matches!(
            validate_transaction(&tx, &[coin(1, Some(1))], 2),
            Err(VaultError::MalformedTransaction { .. })
        ));
        let tx = tx_with(2, Sequence::MAX, vec![1]);
        assert!(matches!(
            validate_transaction(&tx, &[coin(1, Some(1))], 2),
            Err(VaultError::MalformedTransaction { .. })
        ));
    }

    #[test]
    fn test_duplicate_inputs_rejected() {
        // Counting the same coin twice would let the outputs exceed the real input value
        let mut tx = tx_with(2, Sequence::MAX, vec![1_500]);
        tx.input[1].previous_output = tx.input[0].previous_output;
        let coins = vec![coin(1_000, Some(1)), coin(1_000, Some(1))];
        let err = validate_transaction(&tx, &coins, 2).unwrap_err();
        assert!(matches!(err, VaultError::MalformedTransaction { .. }));
        assert!(err.to_string().contains("bad-txns-inputs-duplicate"));
    }

    #[test]
    fn test_relative_lock_maturity() {
        let tx = tx_with(1, Sequence(10), vec![500]);
        // Coin mined at 100; the next block is 100 + confirmations
        assert!(matches!(
            validate_transaction(&tx, &[coin(1_000, Some(100))], 109),
            Err(VaultError::TimelockNotMatured {
                needed: 10,
                confirmations: 9,
                ..
            })
        ));
        assert!(validate_transaction(&tx, &[coin(1_000, Some(100))], 110).is_ok());
        assert!(matches!(
            validate_transaction(&tx, &[coin(1_000, None)], 110),
            Err(VaultError::TimelockNotMatured { confirmations: 0, .. })
        ));

        let mut v1 = tx.clone();
        v1.version = Version::ONE;
        assert!(validate_transaction(&v1, &[coin(1_000, None)], 110).is_ok());
    }

    #[test]
    fn test_state_terminality() {
        assert!(VaultState::Withdrawn.is_terminal());
        assert!(VaultState::Recovered.is_terminal());
        assert!(!VaultState::Vaulted.is_terminal());
        let triggered = VaultState::Triggered {
            target_outputs_hash: [0u8; 32],
            spend_delay: 10,
            remaining: 3,
        };
        assert!(!triggered.is_terminal());

        let json = serde_json::to_value(triggered).unwrap();
        assert_eq!(json["state"], "triggered");
        assert_eq!(json["remaining"], 3);
    }

    #[test]
    fn test_recovery_transition_tracks_remaining_delay() {
        let claim = CovenantClaim::Recovery(RecoveryClaim {
            input: 0,
            vout: 0,
            recovery_params: RecoveryParams::from_bytes(&[0u8; 32]).unwrap(),
            value: Amount::from_sat(1),
            source: Some(UnvaultCommitment {
                spend_delay: 10,
                target_outputs_hash: [1u8; 32],
            }),
        });
        let t = transition(&claim, &[4]);
        assert_eq!(t.to, VaultState::Recovered);
        assert!(matches!(t.from, VaultState::Triggered { remaining: 6, .. }));
    }
}
