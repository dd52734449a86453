//! # Covenant Script Interpreter
//!
//! Evaluates the witness of one transaction input against the output it spends.
//! Only the tapscript subset vault outputs need is implemented; any other
//! opcode fails closed.
//!
//! Covenant opcodes cannot judge a transaction on their own (a trigger output is
//! shared by every vault in a batch), so instead of deciding they record a
//! [`CovenantClaim`]. The validator checks all claims of a transaction together.

use crate::config::consensus::{
    MAX_RECURSION_DEPTH, MAX_SPEND_DELAY, MAX_STACK_SIZE, SEQUENCE_LOCKTIME_DISABLE_FLAG,
    SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE_FLAG,
};
use crate::error::{VaultError, VaultResult};
use crate::hashes;
use crate::script::{script_num, small_int, RecoveryParams, OP_UNVAULT, OP_VAULT};
use bitcoin::{
    hashes::Hash,
    opcodes::all::{
        OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_DROP, OP_DUP, OP_EQUAL, OP_EQUALVERIFY, OP_PICK,
        OP_VERIFY,
    },
    script::Instruction,
    secp256k1::{Message, Secp256k1, VerifyOnly, XOnlyPublicKey},
    sighash::{Prevouts, SighashCache},
    taproot::{self, ControlBlock, LeafVersion, TapLeafHash},
    Amount, Script, ScriptBuf, Transaction, TxOut,
};
use log::trace;

/// What a triggered output committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnvaultCommitment {
    pub spend_delay: u16,
    pub target_outputs_hash: [u8; 32],
}

/// A vault input moving into the trigger output at `vout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerClaim {
    pub input: usize,
    pub vout: u32,
    pub recovery_params: RecoveryParams,
    pub spend_delay: u16,
    pub target_outputs_hash: [u8; 32],
    /// Script of the spent vault output; a revault must reproduce it
    pub vault_spk: ScriptBuf,
    pub value: Amount,
}

/// A vault or triggered input swept to the recovery output at `vout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryClaim {
    pub input: usize,
    pub vout: u32,
    pub recovery_params: RecoveryParams,
    pub value: Amount,
    /// `None` when recovering straight from a vault output
    pub source: Option<UnvaultCommitment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CovenantClaim {
    Trigger(TriggerClaim),
    Withdrawal {
        input: usize,
        commitment: UnvaultCommitment,
    },
    Recovery(RecoveryClaim),
}

impl CovenantClaim {
    pub fn input(&self) -> usize {
        match self {
            CovenantClaim::Trigger(claim) => claim.input,
            CovenantClaim::Withdrawal { input, .. } => *input,
            CovenantClaim::Recovery(claim) => claim.input,
        }
    }
}

/// The input being evaluated and everything its sighash commits to.
#[derive(Debug, Clone, Copy)]
pub struct SpendContext<'a> {
    pub tx: &'a Transaction,
    pub prevouts: &'a [TxOut],
    pub input_index: usize,
}

/// Evaluate input `input_index` of `tx`, returning the covenant claims it makes.
pub fn verify_input(
    tx: &Transaction,
    prevouts: &[TxOut],
    input_index: usize,
) -> VaultResult<Vec<CovenantClaim>> {
    let mut interpreter = Interpreter::new(SpendContext {
        tx,
        prevouts,
        input_index,
    })?;
    interpreter.run()?;
    Ok(interpreter.claims)
}

pub struct Interpreter<'a> {
    ctx: SpendContext<'a>,
    secp: Secp256k1<VerifyOnly>,
    claims: Vec<CovenantClaim>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: SpendContext<'a>) -> VaultResult<Self> {
        if ctx.prevouts.len() != ctx.tx.input.len() {
            return Err(VaultError::MalformedTransaction {
                message: format!(
                    "{} prevouts for {} inputs",
                    ctx.prevouts.len(),
                    ctx.tx.input.len()
                ),
            });
        }
        if ctx.input_index >= ctx.tx.input.len() {
            return Err(VaultError::MalformedTransaction {
                message: format!("no input {}", ctx.input_index),
            });
        }
        Ok(Self {
            ctx,
            secp: Secp256k1::verification_only(),
            claims: Vec::new(),
        })
    }

    fn fail(&self, reason: impl Into<String>) -> VaultError {
        VaultError::script(self.ctx.input_index, reason)
    }

    fn prevout(&self) -> &'a TxOut {
        &self.ctx.prevouts[self.ctx.input_index]
    }

    /// Evaluate the input's witness against its prevout.
    pub fn run(&mut self) -> VaultResult<()> {
        let spk = &self.prevout().script_pubkey;
        let witness = self.ctx.tx.input[self.ctx.input_index].witness.to_vec();

        if spk.as_bytes() == [0x51] {
            // Bare OP_TRUE coins from the coin source
            if witness.is_empty() && self.ctx.tx.input[self.ctx.input_index].script_sig.is_empty() {
                return Ok(());
            }
            return Err(self.fail("OP_TRUE coin spent with a non-empty witness"));
        }
        if !spk.is_p2tr() {
            return Err(self.fail(format!("unsupported output type {}", spk)));
        }
        self.verify_witness_program(witness, spk, 0)
    }

    fn verify_witness_program(&mut self, mut stack: Vec<Vec<u8>>, spk: &Script, depth: usize) -> VaultResult<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(VaultError::RecursionLimitExceeded { depth });
        }
        if !spk.is_p2tr() {
            return Err(self.fail(format!("unsupported witness program {}", spk)));
        }
        let output_key = XOnlyPublicKey::from_slice(&spk.as_bytes()[2..34])
            .map_err(|e| self.fail(format!("invalid taproot output key: {e}")))?;

        if stack.len() >= 2 && stack.last().is_some_and(|e| e.first() == Some(&0x50)) {
            return Err(self.fail("annex is not supported"));
        }

        match stack.len() {
            0 => Err(self.fail("witness program witness empty")),
            1 => {
                trace!("input {} key path spend at depth {depth}", self.ctx.input_index);
                if self.check_key_spend(&stack[0], &output_key)? {
                    Ok(())
                } else {
                    Err(self.fail("Invalid Schnorr signature"))
                }
            }
            _ => {
                let control = stack.pop().unwrap_or_default();
                let leaf = ScriptBuf::from_bytes(stack.pop().unwrap_or_default());
                let control = ControlBlock::decode(&control)
                    .map_err(|e| self.fail(format!("invalid control block: {e}")))?;
                if control.leaf_version != LeafVersion::TapScript {
                    return Err(self.fail("unknown leaf version"));
                }
                if !control.verify_taproot_commitment(&self.secp, output_key, &leaf) {
                    return Err(self.fail("witness program hash mismatch"));
                }
                trace!(
                    "input {} script path spend at depth {depth}: {}",
                    self.ctx.input_index,
                    leaf
                );
                self.execute(&leaf, stack, depth)
            }
        }
    }

    fn check_key_spend(&self, sig: &[u8], output_key: &XOnlyPublicKey) -> VaultResult<bool> {
        let Ok(sig) = taproot::Signature::from_slice(sig) else {
            return Ok(false);
        };
        let sighash = SighashCache::new(self.ctx.tx)
            .taproot_key_spend_signature_hash(
                self.ctx.input_index,
                &Prevouts::All(self.ctx.prevouts),
                sig.sighash_type,
            )
            .map_err(|e| self.fail(format!("sighash failed: {e}")))?;
        let message = Message::from_digest(sighash.to_byte_array());
        Ok(self.secp.verify_schnorr(&sig.signature, &message, output_key).is_ok())
    }

    /// Tapscript `OP_CHECKSIG`: empty signature is false, a bad one fails the script.
    fn check_script_sig(&self, sig: &[u8], pubkey: &[u8], leaf_hash: TapLeafHash) -> VaultResult<bool> {
        if pubkey.len() != 32 {
            return Err(self.fail("unsupported public key type"));
        }
        if sig.is_empty() {
            return Ok(false);
        }
        let pubkey = XOnlyPublicKey::from_slice(pubkey).map_err(|e| self.fail(format!("invalid public key: {e}")))?;
        let sig = taproot::Signature::from_slice(sig).map_err(|_| self.fail("Invalid Schnorr signature"))?;
        let sighash = SighashCache::new(self.ctx.tx)
            .taproot_script_spend_signature_hash(
                self.ctx.input_index,
                &Prevouts::All(self.ctx.prevouts),
                leaf_hash,
                sig.sighash_type,
            )
            .map_err(|e| self.fail(format!("sighash failed: {e}")))?;
        let message = Message::from_digest(sighash.to_byte_array());
        self.secp
            .verify_schnorr(&sig.signature, &message, &pubkey)
            .map(|_| true)
            .map_err(|_| self.fail("Invalid Schnorr signature"))
    }

    fn execute(&mut self, script: &Script, mut stack: Vec<Vec<u8>>, depth: usize) -> VaultResult<()> {
        let leaf_hash = TapLeafHash::from_script(script, LeafVersion::TapScript);

        for instruction in script.instructions() {
            let instruction = instruction.map_err(|e| self.fail(format!("bad script: {e}")))?;
            match instruction {
                Instruction::PushBytes(bytes) => stack.push(bytes.as_bytes().to_vec()),
                Instruction::Op(op) => {
                    if let Some(n) = small_int(op) {
                        stack.push(script_num::encode(n));
                        continue;
                    }
                    match op {
                        OP_DUP => {
                            let top = stack.last().cloned().ok_or_else(|| self.fail("stack underflow"))?;
                            stack.push(top);
                        }
                        OP_DROP => {
                            self.pop(&mut stack)?;
                        }
                        OP_PICK => {
                            let n = self.pop_num(&mut stack)?;
                            let n = usize::try_from(n)
                                .ok()
                                .filter(|n| *n < stack.len())
                                .ok_or_else(|| self.fail("OP_PICK index out of range"))?;
                            let item = stack[stack.len() - 1 - n].clone();
                            stack.push(item);
                        }
                        OP_EQUAL | OP_EQUALVERIFY => {
                            let a = self.pop(&mut stack)?;
                            let b = self.pop(&mut stack)?;
                            if op == OP_EQUALVERIFY {
                                if a != b {
                                    return Err(self.fail("OP_EQUALVERIFY failed"));
                                }
                            } else {
                                stack.push(bool_element(a == b));
                            }
                        }
                        OP_VERIFY => {
                            let top = self.pop(&mut stack)?;
                            if !script_num::cast_to_bool(&top) {
                                return Err(self.fail("OP_VERIFY failed"));
                            }
                        }
                        OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                            let pubkey = self.pop(&mut stack)?;
                            let sig = self.pop(&mut stack)?;
                            let ok = self.check_script_sig(&sig, &pubkey, leaf_hash)?;
                            if op == OP_CHECKSIGVERIFY {
                                if !ok {
                                    return Err(self.fail("OP_CHECKSIGVERIFY failed"));
                                }
                            } else {
                                stack.push(bool_element(ok));
                            }
                        }
                        OP_VAULT => {
                            let rest = std::mem::take(&mut stack);
                            self.op_vault(rest, depth)?;
                            stack.push(vec![1]);
                        }
                        OP_UNVAULT => {
                            let rest = std::mem::take(&mut stack);
                            self.op_unvault(rest, depth)?;
                            stack.push(vec![1]);
                        }
                        other => return Err(self.fail(format!("unsupported opcode {other}"))),
                    }
                }
            }
            if stack.len() > MAX_STACK_SIZE {
                return Err(self.fail("stack size limit exceeded"));
            }
        }

        match stack.as_slice() {
            [top] if script_num::cast_to_bool(top) => Ok(()),
            [_] => Err(self.fail("script evaluated to false")),
            _ => Err(self.fail("stack not clean after execution")),
        }
    }

    fn pop(&self, stack: &mut Vec<Vec<u8>>) -> VaultResult<Vec<u8>> {
        stack.pop().ok_or_else(|| self.fail("stack underflow"))
    }

    fn pop_num(&self, stack: &mut Vec<Vec<u8>>) -> VaultResult<i64> {
        let bytes = self.pop(stack)?;
        script_num::decode(&bytes, 4).ok_or_else(|| self.fail("non-minimal or oversized number"))
    }

    fn pop_hash(&self, stack: &mut Vec<Vec<u8>>) -> VaultResult<[u8; 32]> {
        let bytes = self.pop(stack)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| self.fail("commitment must be 32 bytes"))
    }

    /// Pops the four arguments shared by both covenant opcodes.
    fn pop_covenant_args(&self, stack: &mut Vec<Vec<u8>>) -> VaultResult<([u8; 32], u16, RecoveryParams, Option<u32>)> {
        let commitment = self.pop_hash(stack)?;
        let delay = self.pop_num(stack)?;
        let params = RecoveryParams::from_bytes(&self.pop(stack)?).map_err(|e| self.fail(e.to_string()))?;
        let vout = self.pop_vout(stack)?;

        if !(1..=MAX_SPEND_DELAY).contains(&delay) {
            return Err(VaultError::InvalidSpendDelay { delay });
        }
        // Range checked above
        let delay = u16::try_from(delay).map_err(|_| VaultError::InvalidSpendDelay { delay })?;
        Ok((commitment, delay, params, vout))
    }

    /// Output index argument; `-1` selects the non-recovery path.
    fn pop_vout(&self, stack: &mut Vec<Vec<u8>>) -> VaultResult<Option<u32>> {
        match self.pop_num(stack)? {
            -1 => Ok(None),
            n if n >= 0 && (n as usize) < self.ctx.tx.output.len() => Ok(Some(n as u32)),
            n => Err(self.fail(format!("output index {n} out of range"))),
        }
    }

    fn op_vault(&mut self, mut stack: Vec<Vec<u8>>, depth: usize) -> VaultResult<()> {
        let (unvault_spk_hash, spend_delay, recovery_params, recovery_vout) = self.pop_covenant_args(&mut stack)?;

        if let Some(vout) = recovery_vout {
            return self.recover(stack, recovery_params, vout, None, depth);
        }

        let trigger_vout = self
            .pop_vout(&mut stack)?
            .ok_or_else(|| self.fail("trigger output index must not be -1"))?;
        let target_outputs_hash = self.pop_hash(&mut stack)?;
        let trigger_spk = ScriptBuf::from_bytes(self.pop(&mut stack)?);

        if hashes::unvault_spk_hash(&trigger_spk) != unvault_spk_hash {
            return Err(self.fail("trigger key script does not match the vault commitment"));
        }
        self.verify_witness_program(stack, &trigger_spk, depth + 1)?;

        let prevout = self.prevout();
        self.claims.push(CovenantClaim::Trigger(TriggerClaim {
            input: self.ctx.input_index,
            vout: trigger_vout,
            recovery_params,
            spend_delay,
            target_outputs_hash,
            vault_spk: prevout.script_pubkey.clone(),
            value: prevout.value,
        }));
        Ok(())
    }

    fn op_unvault(&mut self, stack: Vec<Vec<u8>>, depth: usize) -> VaultResult<()> {
        let mut stack = stack;
        let (target_outputs_hash, spend_delay, recovery_params, recovery_vout) =
            self.pop_covenant_args(&mut stack)?;
        let commitment = UnvaultCommitment {
            spend_delay,
            target_outputs_hash,
        };

        if let Some(vout) = recovery_vout {
            return self.recover(stack, recovery_params, vout, Some(commitment), depth);
        }
        if !stack.is_empty() {
            return Err(self.fail("withdrawal takes no extra witness elements"));
        }

        let input = &self.ctx.tx.input[self.ctx.input_index];
        let sequence = input.sequence.0;
        let lock_ok = self.ctx.tx.version.0 >= 2
            && sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG == 0
            && sequence & SEQUENCE_LOCKTIME_TYPE_FLAG == 0
            && sequence & SEQUENCE_LOCKTIME_MASK >= u32::from(spend_delay);
        if !lock_ok {
            return Err(VaultError::NonFinalRelativeLock {
                input: self.ctx.input_index,
                sequence,
                spend_delay,
            });
        }

        let actual = hashes::target_outputs_hash(&self.ctx.tx.output);
        if actual != target_outputs_hash {
            return Err(VaultError::TargetHashMismatch {
                expected: hex::encode(target_outputs_hash),
                actual: hex::encode(actual),
            });
        }

        self.claims.push(CovenantClaim::Withdrawal {
            input: self.ctx.input_index,
            commitment,
        });
        Ok(())
    }

    fn recover(
        &mut self,
        stack: Vec<Vec<u8>>,
        recovery_params: RecoveryParams,
        vout: u32,
        source: Option<UnvaultCommitment>,
        depth: usize,
    ) -> VaultResult<()> {
        if recovery_params.is_authenticated() {
            let auth_spk = recovery_params.auth_spk.clone();
            self.verify_witness_program(stack, &auth_spk, depth + 1)?;
        } else if !stack.is_empty() {
            return Err(self.fail("unauthenticated recovery takes no extra witness elements"));
        }

        self.claims.push(CovenantClaim::Recovery(RecoveryClaim {
            input: self.ctx.input_index,
            vout,
            recovery_params,
            value: self.prevout().value,
            source,
        }));
        Ok(())
    }
}

fn bool_element(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}
