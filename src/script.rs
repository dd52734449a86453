//! # Covenant Script Encoding
//!
//! Vault and unvault covenants are three pushes terminated by a single opcode:
//!
//! ```text
//! vault:   <recovery-params> <spend-delay> <unvault-spk-hash>   OP_VAULT
//! unvault: <recovery-params> <spend-delay> <target-outputs-hash> OP_UNVAULT
//! ```
//!
//! Recovery params are `recovery-spk-hash || recovery-auth-spk`. Decoding is
//! strict: anything that is not exactly this shape is rejected.

use crate::error::{VaultError, VaultResult};
use crate::hashes;
use bitcoin::{
    opcodes::{
        all::{OP_PUSHNUM_1, OP_PUSHNUM_16, OP_PUSHNUM_NEG1, OP_RETURN_187, OP_RETURN_188},
        Opcode,
    },
    script::{Builder, Instruction, PushBytesBuf},
    Script, ScriptBuf,
};

/// Covenant opcode guarding vault outputs (former OP_SUCCESS187).
pub const OP_VAULT: Opcode = OP_RETURN_187;

/// Covenant opcode guarding triggered outputs (former OP_SUCCESS188).
pub const OP_UNVAULT: Opcode = OP_RETURN_188;

/// Minimally encoded script numbers, as used on the stack and in witnesses.
pub mod script_num {
    /// Encode as little-endian sign-magnitude; zero is the empty vector.
    pub fn encode(value: i64) -> Vec<u8> {
        if value == 0 {
            return Vec::new();
        }
        let negative = value < 0;
        let mut abs = value.unsigned_abs();
        let mut out = Vec::with_capacity(9);
        while abs > 0 {
            out.push((abs & 0xff) as u8);
            abs >>= 8;
        }
        let last = out.len() - 1;
        if out[last] & 0x80 != 0 {
            out.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            out[last] |= 0x80;
        }
        out
    }

    /// Decode a minimally encoded number of at most `max_len` bytes.
    pub fn decode(bytes: &[u8], max_len: usize) -> Option<i64> {
        if bytes.len() > max_len || bytes.len() > 8 {
            return None;
        }
        let Some((&last, rest)) = bytes.split_last() else {
            return Some(0);
        };
        // Reject a redundant trailing sign byte
        if last & 0x7f == 0 && rest.last().map_or(true, |b| b & 0x80 == 0) {
            return None;
        }
        let mut value: i64 = 0;
        for (i, byte) in bytes.iter().enumerate() {
            let byte = if i == bytes.len() - 1 { byte & 0x7f } else { *byte };
            value |= i64::from(byte) << (8 * i);
        }
        Some(if last & 0x80 != 0 { -value } else { value })
    }

    /// Stack truthiness: anything but (negative) zero.
    pub fn cast_to_bool(bytes: &[u8]) -> bool {
        match bytes.split_last() {
            None => false,
            Some((&last, rest)) => rest.iter().any(|b| *b != 0) || (last != 0 && last != 0x80),
        }
    }
}

/// Recovery commitment carried by both covenant scripts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecoveryParams {
    /// Tagged hash of the script recovered funds must be sent to
    pub recovery_spk_hash: [u8; 32],
    /// Script whose witness must authorize a recovery; empty for none
    pub auth_spk: ScriptBuf,
}

impl RecoveryParams {
    pub fn new(recovery_spk: &Script, auth_spk: ScriptBuf) -> Self {
        Self {
            recovery_spk_hash: hashes::recovery_spk_hash(recovery_spk),
            auth_spk,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.recovery_spk_hash.to_vec();
        bytes.extend_from_slice(self.auth_spk.as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        if bytes.len() < 32 {
            return Err(VaultError::transaction(format!(
                "recovery params must be at least 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut recovery_spk_hash = [0u8; 32];
        recovery_spk_hash.copy_from_slice(&bytes[..32]);
        Ok(Self {
            recovery_spk_hash,
            auth_spk: ScriptBuf::from_bytes(bytes[32..].to_vec()),
        })
    }

    /// Whether recoveries must present a witness for `auth_spk`
    pub fn is_authenticated(&self) -> bool {
        !self.auth_spk.is_empty()
    }

    /// Whether `spk` is the recovery destination committed here
    pub fn commits_to(&self, spk: &Script) -> bool {
        hashes::recovery_spk_hash(spk) == self.recovery_spk_hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovenantKind {
    Vault,
    Unvault,
}

impl CovenantKind {
    pub fn opcode(self) -> Opcode {
        match self {
            CovenantKind::Vault => OP_VAULT,
            CovenantKind::Unvault => OP_UNVAULT,
        }
    }
}

/// A decoded vault or unvault covenant script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovenantScript {
    pub kind: CovenantKind,
    pub recovery_params: RecoveryParams,
    /// Kept signed so out-of-range delays can still be committed and rejected
    pub spend_delay: i64,
    /// Unvault spk hash for vaults, target outputs hash for unvaults
    pub commitment: [u8; 32],
}

impl CovenantScript {
    pub fn vault(recovery_params: RecoveryParams, spend_delay: i64, unvault_spk_hash: [u8; 32]) -> Self {
        Self {
            kind: CovenantKind::Vault,
            recovery_params,
            spend_delay,
            commitment: unvault_spk_hash,
        }
    }

    pub fn unvault(
        recovery_params: RecoveryParams,
        spend_delay: i64,
        target_outputs_hash: [u8; 32],
    ) -> Self {
        Self {
            kind: CovenantKind::Unvault,
            recovery_params,
            spend_delay,
            commitment: target_outputs_hash,
        }
    }

    pub fn to_script(&self) -> VaultResult<ScriptBuf> {
        let params = PushBytesBuf::try_from(self.recovery_params.to_bytes())
            .map_err(|e| VaultError::transaction(format!("recovery params too large: {e}")))?;
        Ok(Builder::new()
            .push_slice(params)
            .push_int(self.spend_delay)
            .push_slice(self.commitment)
            .push_opcode(self.kind.opcode())
            .into_script())
    }

    /// Strictly decode a covenant script.
    pub fn parse(script: &Script) -> VaultResult<Self> {
        let malformed = |reason: &str| VaultError::transaction(format!("not a covenant script: {reason}"));
        let instructions = script
            .instructions()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| malformed(&e.to_string()))?;

        let [params, delay, commitment, Instruction::Op(op)] = instructions.as_slice() else {
            return Err(malformed("expected three pushes and an opcode"));
        };
        let kind = if *op == OP_VAULT {
            CovenantKind::Vault
        } else if *op == OP_UNVAULT {
            CovenantKind::Unvault
        } else {
            return Err(malformed("trailing opcode is not OP_VAULT or OP_UNVAULT"));
        };

        let Instruction::PushBytes(params) = params else {
            return Err(malformed("recovery params must be a push"));
        };
        let recovery_params = RecoveryParams::from_bytes(params.as_bytes())?;

        let spend_delay = match delay {
            Instruction::PushBytes(bytes) => script_num::decode(bytes.as_bytes(), 4)
                .ok_or_else(|| malformed("spend delay is not a minimal number"))?,
            Instruction::Op(op) => small_int(*op).ok_or_else(|| malformed("spend delay is not a number"))?,
        };

        let commitment: [u8; 32] = match commitment {
            Instruction::PushBytes(bytes) => bytes
                .as_bytes()
                .try_into()
                .map_err(|_| malformed("commitment must be 32 bytes"))?,
            Instruction::Op(_) => return Err(malformed("commitment must be a push")),
        };

        Ok(Self {
            kind,
            recovery_params,
            spend_delay,
            commitment,
        })
    }
}

/// Value pushed by `OP_1NEGATE` and `OP_1`..`OP_16`.
pub fn small_int(op: Opcode) -> Option<i64> {
    let code = op.to_u8();
    if op == OP_PUSHNUM_NEG1 {
        Some(-1)
    } else if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&code) {
        Some(i64::from(code - OP_PUSHNUM_1.to_u8()) + 1)
    } else {
        None
    }
}
