//! Lifecycle scenarios run against the in-memory node.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::vault::DEFAULT_INIT_FEE_SATS;
    use crate::error::VaultError;
    use crate::hashes;
    use crate::script::{script_num, CovenantKind, CovenantScript, RecoveryParams, OP_VAULT};
    use crate::services::{CoinSource, MemoryNode, Node};
    use crate::utils::{amount, targets};
    use crate::validator::{expected_unvault_spk, VaultState};
    use bitcoin::{
        opcodes::all::{OP_DROP, OP_PICK},
        script::Builder,
        Amount, ScriptBuf, Sequence, Transaction, TxOut,
    };

    /// Fund and confirm a vault from a fresh node coin
    fn new_vault(node: &mut MemoryNode, delay: i64, auth: RecoveryAuthorization) -> VaultSpec {
        let spec = VaultSpec::with_delay(delay, auth).unwrap();
        fund(node, spec)
    }

    fn fund(node: &mut MemoryNode, mut spec: VaultSpec) -> VaultSpec {
        let coin = node.spendable_coin().unwrap();
        let tx = build_initialize_vault(&mut spec, &coin, Amount::from_sat(DEFAULT_INIT_FEE_SATS)).unwrap();
        node.submit(&tx).unwrap();
        node.mine(1).unwrap();
        spec
    }

    fn single_target(sats: u64) -> Vec<TxOut> {
        targets::deterministic(&[Amount::from_sat(sats)]).unwrap()
    }

    fn vault_pair(spec: &VaultSpec) -> (&VaultSpec, bitcoin::OutPoint) {
        (spec, spec.vault_outpoint.unwrap())
    }

    #[test]
    fn test_withdrawal_waits_for_spend_delay() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);
        assert_eq!(spec.total_amount, Some(Amount::from_sat(1_000_000)));

        let targets = single_target(900_000);
        let trigger = build_trigger_unvault(hashes::target_outputs_hash(&targets), &[&spec], None).unwrap();
        node.submit(&trigger.tx).unwrap();
        node.mine(1).unwrap();
        assert_eq!(node.confirmations(&trigger.txid()).unwrap(), 1);

        let withdrawal = build_final_withdrawal(trigger.trigger_outpoint(), &targets, &trigger).unwrap();
        node.mine(8).unwrap();

        // 9 confirmations at the next block
        let err = node.submit(&withdrawal).unwrap_err();
        assert!(err.to_string().contains("non-BIP68-final"));
        assert!(matches!(
            err,
            VaultError::TimelockNotMatured {
                needed: 10,
                confirmations: 9,
                ..
            }
        ));

        // Matured for nSequence 9, but the covenant wants 10
        let mut short = withdrawal.clone();
        short.input[0].sequence = Sequence(9);
        assert!(matches!(
            node.submit(&short),
            Err(VaultError::NonFinalRelativeLock { spend_delay: 10, .. })
        ));

        node.mine(1).unwrap();
        node.submit(&withdrawal).unwrap();
        node.mine(1).unwrap();
        assert!(!node.is_unspent(&spec.vault_outpoint.unwrap()));
        assert!(!node.is_unspent(&trigger.trigger_outpoint()));
        assert!(node.is_unspent(&bitcoin::OutPoint::new(withdrawal.compute_txid(), 0)));
    }

    #[test]
    fn test_withdrawal_to_other_outputs_rejected() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);
        let targets = single_target(900_000);
        let trigger = build_trigger_unvault(hashes::target_outputs_hash(&targets), &[&spec], None).unwrap();
        node.submit(&trigger.tx).unwrap();
        node.mine(10).unwrap();

        let thief = targets::deterministic(&[Amount::from_sat(899_999)]).unwrap();
        let withdrawal = build_final_withdrawal(trigger.trigger_outpoint(), &thief, &trigger).unwrap();
        assert!(matches!(
            node.submit(&withdrawal),
            Err(VaultError::TargetHashMismatch { .. })
        ));
    }

    #[test]
    fn test_recover_from_vault() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);

        let sweep = build_sweep_to_recovery(&[vault_pair(&spec)], None).unwrap();
        let validated = node.test_accept(&sweep).unwrap();
        assert_eq!(validated.transitions[0].from, VaultState::Vaulted);
        assert_eq!(validated.transitions[0].to, VaultState::Recovered);

        node.submit(&sweep).unwrap();
        assert_eq!(sweep.output[0].script_pubkey, spec.recovery_spk());
        assert_eq!(sweep.output[0].value, Amount::from_sat(1_000_000));
    }

    #[test]
    fn test_recover_from_trigger_before_delay() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);
        let targets = single_target(900_000);
        let trigger = build_trigger_unvault(hashes::target_outputs_hash(&targets), &[&spec], None).unwrap();
        node.submit(&trigger.tx).unwrap();
        node.mine(1).unwrap();

        let sweep = build_sweep_to_recovery(&[(&spec, trigger.trigger_outpoint())], Some(&trigger)).unwrap();
        let validated = node.test_accept(&sweep).unwrap();
        assert!(matches!(
            validated.transitions[0].from,
            VaultState::Triggered {
                spend_delay: 10,
                remaining: 9,
                ..
            }
        ));
        node.submit(&sweep).unwrap();

        // The withdrawal can no longer happen
        node.mine(10).unwrap();
        let withdrawal = build_final_withdrawal(trigger.trigger_outpoint(), &targets, &trigger).unwrap();
        assert!(matches!(
            node.submit(&withdrawal),
            Err(VaultError::MissingInputs { .. })
        ));
    }

    #[test]
    fn test_recover_from_unconfirmed_trigger() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);
        let trigger = build_trigger_unvault([5u8; 32], &[&spec], None).unwrap();
        node.submit(&trigger.tx).unwrap();

        let sweep = build_sweep_to_recovery(&[(&spec, trigger.trigger_outpoint())], Some(&trigger)).unwrap();
        node.submit(&sweep).unwrap();
        assert_eq!(node.mempool_size().unwrap(), 2);
    }

    #[test]
    fn test_trigger_amount_must_match_exactly() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);

        let low = |tx: &mut Transaction| tx.output[0].value -= Amount::from_sat(1);
        let options = TriggerOptions {
            presign: Some(&low),
            ..TriggerOptions::default()
        };
        let trigger = build_trigger_unvault_with([1u8; 32], &[&spec], &options).unwrap();
        let err = node.submit(&trigger.tx).unwrap_err();
        assert!(matches!(err, VaultError::IncompatibleUnvaultOutputs { .. }));
        assert!(err.to_string().contains("vault-insufficient-trigger-value"));

        let high = |tx: &mut Transaction| tx.output[0].value += Amount::from_sat(1);
        let options = TriggerOptions {
            presign: Some(&high),
            ..TriggerOptions::default()
        };
        let trigger = build_trigger_unvault_with([1u8; 32], &[&spec], &options).unwrap();
        assert!(matches!(
            node.submit(&trigger.tx),
            Err(VaultError::BelowOutValue { .. })
        ));

        let exact = build_trigger_unvault([1u8; 32], &[&spec], None).unwrap();
        node.submit(&exact.tx).unwrap();
    }

    #[test]
    fn test_trigger_output_script_is_rigid() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);
        let target_hash = [2u8; 32];

        let other_params = RecoveryParams::new(&ScriptBuf::from_bytes(vec![0x51]), ScriptBuf::new());
        let mutated = vec![
            expected_unvault_spk(&other_params, 10, target_hash).unwrap(),
            expected_unvault_spk(&spec.recovery_params, 11, target_hash).unwrap(),
            expected_unvault_spk(&spec.recovery_params, 10, [3u8; 32]).unwrap(),
            {
                // OP_VAULT where OP_UNVAULT belongs
                let mut covenant = CovenantScript::unvault(spec.recovery_params.clone(), 10, target_hash);
                covenant.kind = CovenantKind::Vault;
                let script = covenant.to_script().unwrap();
                taproot::p2tr_spk(&taproot::single_leaf_info(taproot::nums_point().unwrap(), &script).unwrap())
            },
        ];

        for spk in mutated {
            let swap = move |tx: &mut Transaction| tx.output[0].script_pubkey = spk.clone();
            let options = TriggerOptions {
                presign: Some(&swap),
                ..TriggerOptions::default()
            };
            let trigger = build_trigger_unvault_with(target_hash, &[&spec], &options).unwrap();
            assert!(matches!(
                node.submit(&trigger.tx),
                Err(VaultError::IncompatibleUnvaultOutputs { .. })
            ));
        }
    }

    #[test]
    fn test_revault_continues_vault() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);
        let targets = single_target(800_000);
        let trigger = build_trigger_unvault(
            hashes::target_outputs_hash(&targets),
            &[&spec],
            Some(Amount::from_sat(100_000)),
        )
        .unwrap();
        assert_eq!(trigger.tx.output[0].value, Amount::from_sat(900_000));
        node.submit(&trigger.tx).unwrap();
        node.mine(1).unwrap();

        // The revault is an ordinary vault, triggerable right away
        let revaulted = spec.revaulted(&trigger).unwrap();
        assert_eq!(revaulted.total_amount, Some(Amount::from_sat(100_000)));
        assert_eq!(revaulted.vault_outpoint, trigger.revault_outpoint());
        let again = build_trigger_unvault([9u8; 32], &[&revaulted], None).unwrap();
        node.submit(&again.tx).unwrap();
    }

    #[test]
    fn test_revault_amount_must_match_exactly() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);

        let low = |tx: &mut Transaction| tx.output[1].value -= Amount::from_sat(1);
        let options = TriggerOptions {
            revault_amount: Some(Amount::from_sat(100_000)),
            presign: Some(&low),
            ..TriggerOptions::default()
        };
        let trigger = build_trigger_unvault_with([1u8; 32], &[&spec], &options).unwrap();
        assert!(matches!(
            node.submit(&trigger.tx),
            Err(VaultError::IncompatibleUnvaultOutputs { .. })
        ));

        let high = |tx: &mut Transaction| tx.output[1].value += Amount::from_sat(1);
        let options = TriggerOptions {
            revault_amount: Some(Amount::from_sat(100_000)),
            presign: Some(&high),
            ..TriggerOptions::default()
        };
        let trigger = build_trigger_unvault_with([1u8; 32], &[&spec], &options).unwrap();
        assert!(matches!(
            node.submit(&trigger.tx),
            Err(VaultError::BelowOutValue { .. })
        ));
    }

    #[test]
    fn test_multiple_revault_outputs_rejected() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);

        let split = |tx: &mut Transaction| {
            tx.output[1].value = Amount::from_sat(50_000);
            let second = tx.output[1].clone();
            tx.output.push(second);
        };
        let options = TriggerOptions {
            revault_amount: Some(Amount::from_sat(100_000)),
            presign: Some(&split),
            ..TriggerOptions::default()
        };
        let trigger = build_trigger_unvault_with([1u8; 32], &[&spec], &options).unwrap();
        let err = node.submit(&trigger.tx).unwrap_err();
        assert!(err.to_string().contains("more than one revault output"));
    }

    #[test]
    fn test_batch_requires_shared_delay() {
        let mut node = MemoryNode::new();
        let vaults: Vec<VaultSpec> = [10, 11, 12]
            .into_iter()
            .map(|delay| new_vault(&mut node, delay, RecoveryAuthorization::AnyoneCanSpend))
            .collect();
        let refs: Vec<&VaultSpec> = vaults.iter().collect();
        let total = Amount::from_sat(3_000_000);
        let targets = targets::deterministic(&amount::split_vault_value(total, 3).unwrap()).unwrap();
        let target_hash = hashes::target_outputs_hash(&targets);

        assert!(matches!(
            build_trigger_unvault(target_hash, &refs, None),
            Err(VaultError::IncompatibleBatch { .. })
        ));

        let options = TriggerOptions {
            allow_incompatible: true,
            ..TriggerOptions::default()
        };
        let trigger = build_trigger_unvault_with(target_hash, &refs, &options).unwrap();
        assert!(matches!(
            node.submit(&trigger.tx),
            Err(VaultError::IncompatibleUnvaultOutputs { .. })
        ));

        // One triggered and two untouched vaults swept together
        let single = build_trigger_unvault([4u8; 32], &refs[..1], None).unwrap();
        node.submit(&single.tx).unwrap();
        node.mine(1).unwrap();
        let sweep = build_sweep_to_recovery(
            &[
                (&vaults[0], single.trigger_outpoint()),
                vault_pair(&vaults[1]),
                vault_pair(&vaults[2]),
            ],
            Some(&single),
        )
        .unwrap();
        assert_eq!(sweep.output[0].value, total);
        let validated = node.test_accept(&sweep).unwrap();
        assert!(matches!(validated.transitions[0].from, VaultState::Triggered { .. }));
        assert_eq!(validated.transitions[1].from, VaultState::Vaulted);
        node.submit(&sweep).unwrap();
    }

    #[test]
    fn test_batch_with_shared_delay_withdraws() {
        let mut node = MemoryNode::new();
        let vaults: Vec<VaultSpec> = (0..3)
            .map(|_| new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend))
            .collect();
        let refs: Vec<&VaultSpec> = vaults.iter().collect();
        let targets = targets::deterministic(&amount::split_vault_value(Amount::from_sat(2_990_000), 3).unwrap())
            .unwrap();

        let trigger = build_trigger_unvault(hashes::target_outputs_hash(&targets), &refs, None).unwrap();
        assert_eq!(trigger.tx.input.len(), 3);
        node.submit(&trigger.tx).unwrap();
        node.mine(10).unwrap();

        let withdrawal = build_final_withdrawal(trigger.trigger_outpoint(), &targets, &trigger).unwrap();
        let validated = node.test_accept(&withdrawal).unwrap();
        assert_eq!(validated.fee, Amount::from_sat(10_000));
        assert_eq!(validated.transitions[0].to, VaultState::Withdrawn);
        node.submit(&withdrawal).unwrap();
    }

    #[test]
    fn test_batch_refuses_mixed_recovery_key() {
        let mut node = MemoryNode::new();
        let mut vaults: Vec<VaultSpec> = (0..2)
            .map(|_| new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend))
            .collect();
        vaults.push(fund(
            &mut node,
            VaultSpec::new(VaultKeys::from_scalars(12, 3).unwrap(), 10, RecoveryAuthorization::AnyoneCanSpend)
                .unwrap(),
        ));
        let refs: Vec<&VaultSpec> = vaults.iter().collect();
        let targets = targets::deterministic(&amount::split_vault_value(Amount::from_sat(2_990_000), 3).unwrap())
            .unwrap();
        let target_hash = hashes::target_outputs_hash(&targets);

        assert!(matches!(
            build_trigger_unvault(target_hash, &refs, None),
            Err(VaultError::IncompatibleBatch { .. })
        ));

        let options = TriggerOptions {
            allow_incompatible: true,
            ..TriggerOptions::default()
        };
        let trigger = build_trigger_unvault_with(target_hash, &refs, &options).unwrap();
        let err = node.submit(&trigger.tx).unwrap_err();
        assert!(matches!(err, VaultError::IncompatibleUnvaultOutputs { .. }));
        assert!(err.to_string().contains("recovery params differ"));
    }

    #[test]
    fn test_same_vault_cannot_fund_a_trigger_twice() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);
        assert!(build_trigger_unvault([5u8; 32], &[&spec, &spec], None).is_err());

        // Repeat the signed input and double the trigger value
        let trigger = build_trigger_unvault([5u8; 32], &[&spec], None).unwrap();
        let mut doubled = trigger.tx.clone();
        doubled.input.push(doubled.input[0].clone());
        doubled.output[0].value = Amount::from_sat(2_000_000);
        let err = node.submit(&doubled).unwrap_err();
        assert!(matches!(err, VaultError::MalformedTransaction { .. }));
        assert!(err.to_string().contains("bad-txns-inputs-duplicate"));
        assert!(node.is_unspent(&spec.vault_outpoint.unwrap()));
    }

    #[test]
    fn test_authenticated_batch_recovery() {
        let mut node = MemoryNode::new();
        let auth_key = taproot::secret_from_u64(20).unwrap();
        let authed = |keys: VaultKeys| {
            VaultSpec::new(keys, 10, RecoveryAuthorization::taproot_key(auth_key)).unwrap()
        };
        let vaults: Vec<VaultSpec> = (0..3)
            .map(|_| fund(&mut node, authed(VaultKeys::default_keys().unwrap())))
            .collect();
        let diff_recovery = fund(&mut node, authed(VaultKeys::from_scalars(12, 3).unwrap()));
        assert_ne!(diff_recovery.recovery_spk(), vaults[0].recovery_spk());

        let trigger = build_trigger_unvault([6u8; 32], &[&vaults[0]], None).unwrap();
        node.submit(&trigger.tx).unwrap();
        node.mine(1).unwrap();

        let pairs = [
            (&vaults[0], trigger.trigger_outpoint()),
            vault_pair(&vaults[1]),
            vault_pair(&vaults[2]),
            vault_pair(&diff_recovery),
        ];
        let fee_coin = node.spendable_coin().unwrap();

        // Second recovery output one sat short
        let short = |tx: &mut Transaction| tx.output[2].value -= Amount::from_sat(1);
        let options = SweepOptions {
            fee_coin: Some(&fee_coin),
            fee_change: true,
            presign: Some(&short),
        };
        let sweep = build_sweep_to_recovery_with(&pairs, Some(&trigger), &options).unwrap();
        let err = node.submit(&sweep).unwrap_err();
        assert!(matches!(
            err,
            VaultError::InsufficientRecoveryValue {
                vout: 2,
                required: 1_000_000,
                actual: 999_999
            }
        ));

        let options = SweepOptions {
            presign: None,
            ..options
        };
        let sweep = build_sweep_to_recovery_with(&pairs, Some(&trigger), &options).unwrap();
        // change, shared recovery, distinct recovery, anchor
        assert_eq!(sweep.output.len(), 4);
        assert_eq!(sweep.output[1].script_pubkey, vaults[0].recovery_spk());
        assert_eq!(sweep.output[1].value, Amount::from_sat(3_000_000));
        assert_eq!(sweep.output[2].script_pubkey, diff_recovery.recovery_spk());
        assert_eq!(sweep.output[2].value, Amount::from_sat(1_000_000));

        let validated = node.test_accept(&sweep).unwrap();
        assert_eq!(validated.transitions.len(), 4);
        assert!(matches!(validated.transitions[0].from, VaultState::Triggered { .. }));
        assert!(validated.transitions.iter().all(|t| t.to == VaultState::Recovered));
        node.submit(&sweep).unwrap();
    }

    #[test]
    fn test_recovery_must_be_replaceable() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);
        let final_seq = |tx: &mut Transaction| tx.input[0].sequence = Sequence::MAX;
        let options = SweepOptions {
            presign: Some(&final_seq),
            ..SweepOptions::default()
        };
        let sweep = build_sweep_to_recovery_with(&[vault_pair(&spec)], None, &options).unwrap();
        let err = node.submit(&sweep).unwrap_err();
        assert!(matches!(err, VaultError::NonReplaceableRecovery { input: 0 }));
    }

    #[test]
    fn test_unauthenticated_recovery_shape() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);

        // Vault with a different recovery key
        let stranger = fund(
            &mut node,
            VaultSpec::new(VaultKeys::from_scalars(12, 13).unwrap(), 10, RecoveryAuthorization::AnyoneCanSpend)
                .unwrap(),
        );
        let mixed = build_sweep_to_recovery(&[vault_pair(&spec), vault_pair(&stranger)], None).unwrap();
        assert!(matches!(
            node.submit(&mixed),
            Err(VaultError::BadRecoveryStructure { .. })
        ));

        let no_anchor = |tx: &mut Transaction| {
            tx.output.pop();
        };
        let options = SweepOptions {
            presign: Some(&no_anchor),
            ..SweepOptions::default()
        };
        let sweep = build_sweep_to_recovery_with(&[vault_pair(&spec)], None, &options).unwrap();
        let err = node.submit(&sweep).unwrap_err();
        assert!(err.to_string().contains("recovery transaction has bad output structure"));

        let fee_coin = node.spendable_coin().unwrap();
        let with_change = SweepOptions {
            fee_coin: Some(&fee_coin),
            fee_change: true,
            presign: None,
        };
        let sweep = build_sweep_to_recovery_with(&[vault_pair(&spec)], None, &with_change).unwrap();
        assert!(matches!(
            node.submit(&sweep),
            Err(VaultError::BadRecoveryStructure { .. })
        ));

        let fee_only = SweepOptions {
            fee_coin: Some(&fee_coin),
            fee_change: false,
            presign: None,
        };
        let sweep = build_sweep_to_recovery_with(&[vault_pair(&spec)], None, &fee_only).unwrap();
        let validated = node.test_accept(&sweep).unwrap();
        assert_eq!(validated.fee, fee_coin.value);
        node.submit(&sweep).unwrap();
    }

    #[test]
    fn test_recovery_output_checks() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, 10, RecoveryAuthorization::AnyoneCanSpend);

        let short = |tx: &mut Transaction| tx.output[0].value -= Amount::from_sat(1);
        let options = SweepOptions {
            presign: Some(&short),
            ..SweepOptions::default()
        };
        let sweep = build_sweep_to_recovery_with(&[vault_pair(&spec)], None, &options).unwrap();
        let err = node.submit(&sweep).unwrap_err();
        assert!(matches!(
            err,
            VaultError::InsufficientRecoveryValue {
                vout: 0,
                required: 1_000_000,
                actual: 999_999
            }
        ));
        assert!(err.to_string().contains("vault-insufficient-recovery-value"));

        let elsewhere = |tx: &mut Transaction| tx.output[0].script_pubkey = ScriptBuf::from_bytes(vec![0x51]);
        let options = SweepOptions {
            presign: Some(&elsewhere),
            ..SweepOptions::default()
        };
        let sweep = build_sweep_to_recovery_with(&[vault_pair(&spec)], None, &options).unwrap();
        assert!(matches!(
            node.submit(&sweep),
            Err(VaultError::RecoveryOutputMismatch { input: 0, vout: 0 })
        ));
    }

    #[test]
    fn test_authenticated_recovery() {
        let mut node = MemoryNode::new();
        let keys = VaultKeys::default_keys().unwrap();
        let auth_key = taproot::secret_from_u64(20).unwrap();
        let spec = fund(
            &mut node,
            VaultSpec::new(keys, 10, RecoveryAuthorization::taproot_key(auth_key)).unwrap(),
        );

        let fee_coin = node.spendable_coin().unwrap();
        let options = SweepOptions {
            fee_coin: Some(&fee_coin),
            fee_change: true,
            presign: None,
        };
        let sweep = build_sweep_to_recovery_with(&[vault_pair(&spec)], None, &options).unwrap();

        let mut tampered = sweep.clone();
        let mut witness = tampered.input[0].witness.to_vec();
        witness[0][5] ^= 0x01;
        tampered.input[0].witness = bitcoin::Witness::from_slice(&witness);
        assert!(matches!(
            node.submit(&tampered),
            Err(VaultError::ScriptVerify { input: 0, .. })
        ));

        // Authenticated recoveries may carry change
        node.submit(&sweep).unwrap();
    }

    #[test]
    fn test_script_path_recovery() {
        let mut node = MemoryNode::new();
        let keys = VaultKeys::default_keys().unwrap();
        let leaf = Builder::new().push_opcode(OP_DROP).push_int(1).into_script();
        let mut auth = RecoveryAuthorization::script_path(leaf, taproot::x_only(&keys.recovery));
        auth.set_witness_stack(vec![vec![0x07]]).unwrap();
        let spec = fund(&mut node, VaultSpec::new(keys, 10, auth).unwrap());

        let sweep = build_sweep_to_recovery(&[vault_pair(&spec)], None).unwrap();
        node.submit(&sweep).unwrap();
    }

    #[test]
    fn test_negative_spend_delay_rejected() {
        let mut node = MemoryNode::new();
        let spec = new_vault(&mut node, -50, RecoveryAuthorization::AnyoneCanSpend);

        let sweep = build_sweep_to_recovery(&[vault_pair(&spec)], None).unwrap();
        assert!(matches!(
            node.submit(&sweep),
            Err(VaultError::InvalidSpendDelay { delay: -50 })
        ));

        let trigger = build_trigger_unvault([1u8; 32], &[&spec], None).unwrap();
        assert!(matches!(
            node.submit(&trigger.tx),
            Err(VaultError::InvalidSpendDelay { delay: -50 })
        ));
    }

    #[test]
    fn test_recursive_authorization_hits_depth_limit() {
        let mut node = MemoryNode::new();
        let keys = VaultKeys::default_keys().unwrap();

        // Copies four stack items into OP_VAULT arguments, re-entering recovery
        let mut builder = Builder::new();
        for _ in 0..4 {
            builder = builder.push_int(3).push_opcode(OP_PICK);
        }
        let leaf = builder.push_opcode(OP_VAULT).into_script();
        let auth = RecoveryAuthorization::script_path(leaf, taproot::x_only(&keys.recovery));

        let mut spec = VaultSpec::new(keys, 10, auth).unwrap();
        let stack = vec![
            spec.recovery_spk().to_bytes(),
            Vec::new(),
            spec.recovery_params.to_bytes(),
            script_num::encode(spec.spend_delay),
            vec![0u8; 32],
        ];
        spec.recovery_auth.set_witness_stack(stack).unwrap();
        let spec = fund(&mut node, spec);

        let sweep = build_sweep_to_recovery(&[vault_pair(&spec)], None).unwrap();
        let err = node.submit(&sweep).unwrap_err();
        assert!(matches!(err, VaultError::RecursionLimitExceeded { depth: 2 }));
        assert!(err.to_string().contains("Too many recursive calls"));
    }
}
