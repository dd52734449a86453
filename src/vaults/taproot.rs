//! Taproot commitments and BIP340 signing used by vault outputs.

use crate::config::consensus::UNVAULT_NUMS_INTERNAL_KEY;
use crate::error::{VaultError, VaultResult};
use bitcoin::{
    hashes::{hash160, Hash},
    key::{Keypair, TapTweak},
    opcodes::all::OP_PUSHBYTES_0,
    script::Builder,
    secp256k1::{Message, PublicKey, Secp256k1, SecretKey, XOnlyPublicKey},
    sighash::{Prevouts, SighashCache, TapSighashType},
    taproot::{LeafVersion, TapLeafHash, TaprootBuilder, TaprootSpendInfo},
    Script, ScriptBuf, Transaction, TxOut,
};

/// Provably unspendable internal key; OP_UNVAULT outputs are script-path only.
pub fn nums_point() -> VaultResult<XOnlyPublicKey> {
    let bytes = hex::decode(UNVAULT_NUMS_INTERNAL_KEY)
        .map_err(|e| VaultError::crypto(format!("invalid NUMS hex: {e}")))?;
    XOnlyPublicKey::from_slice(&bytes)
        .map_err(|e| VaultError::crypto(format!("invalid NUMS point: {e}")))
}

/// Secret key from a small integer scalar, big-endian in 32 bytes.
pub fn secret_from_u64(scalar: u64) -> VaultResult<SecretKey> {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&scalar.to_be_bytes());
    SecretKey::from_slice(&bytes).map_err(|e| VaultError::crypto(format!("invalid secret {scalar}: {e}")))
}

/// Fresh random secret key.
pub fn random_secret() -> VaultResult<SecretKey> {
    // Rejection sampling; out-of-range scalars are astronomically rare
    for _ in 0..8 {
        let bytes: [u8; 32] = rand::random();
        if let Ok(secret) = SecretKey::from_slice(&bytes) {
            return Ok(secret);
        }
    }
    Err(VaultError::crypto("failed to sample a valid secret key"))
}

pub fn x_only(secret: &SecretKey) -> XOnlyPublicKey {
    let secp = Secp256k1::new();
    Keypair::from_secret_key(&secp, secret).x_only_public_key().0
}

/// Key-path-only taproot output for `internal_key`.
pub fn key_spend_info(internal_key: XOnlyPublicKey) -> TaprootSpendInfo {
    let secp = Secp256k1::new();
    TaprootSpendInfo::new_key_spend(&secp, internal_key, None)
}

/// Taproot output with `script` as its only leaf.
pub fn single_leaf_info(internal_key: XOnlyPublicKey, script: &Script) -> VaultResult<TaprootSpendInfo> {
    let secp = Secp256k1::new();
    TaprootBuilder::new()
        .add_leaf(0, script.to_owned())
        .map_err(|e| VaultError::crypto(format!("failed to add taproot leaf: {e:?}")))?
        .finalize(&secp, internal_key)
        .map_err(|e| VaultError::crypto(format!("failed to finalize taproot: {e:?}")))
}

pub fn p2tr_spk(info: &TaprootSpendInfo) -> ScriptBuf {
    ScriptBuf::new_p2tr_tweaked(info.output_key())
}

/// Serialized control block revealing `script` under `info`.
pub fn control_block(info: &TaprootSpendInfo, script: &Script) -> VaultResult<Vec<u8>> {
    info.control_block(&(script.to_owned(), LeafVersion::TapScript))
        .map(|cb| cb.serialize())
        .ok_or_else(|| VaultError::crypto("script is not a leaf of this taproot output"))
}

/// BIP341 key-path signature with the tweaked key of `info`.
pub fn sign_key_spend(
    tx: &Transaction,
    prevouts: &[TxOut],
    input_index: usize,
    secret: &SecretKey,
    info: &TaprootSpendInfo,
) -> VaultResult<Vec<u8>> {
    let secp = Secp256k1::new();
    let sighash = SighashCache::new(tx)
        .taproot_key_spend_signature_hash(input_index, &Prevouts::All(prevouts), TapSighashType::Default)
        .map_err(|e| VaultError::crypto(format!("key spend sighash failed: {e}")))?;
    let tweaked = Keypair::from_secret_key(&secp, secret).tap_tweak(&secp, info.merkle_root());
    let message = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_schnorr_no_aux_rand(&message, &tweaked.to_inner());
    Ok(signature.serialize().to_vec())
}

/// BIP342 signature for a `<key> OP_CHECKSIG` style leaf.
pub fn sign_script_spend(
    tx: &Transaction,
    prevouts: &[TxOut],
    input_index: usize,
    secret: &SecretKey,
    leaf: &Script,
) -> VaultResult<Vec<u8>> {
    let secp = Secp256k1::new();
    let leaf_hash = TapLeafHash::from_script(leaf, LeafVersion::TapScript);
    let sighash = SighashCache::new(tx)
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| VaultError::crypto(format!("script spend sighash failed: {e}")))?;
    let keypair = Keypair::from_secret_key(&secp, secret);
    let message = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_schnorr_no_aux_rand(&message, &keypair);
    Ok(signature.serialize().to_vec())
}

/// `OP_0 <hash160(pubkey)>` withdrawal destination.
pub fn segwit_v0_spk(secret: &SecretKey) -> ScriptBuf {
    let secp = Secp256k1::new();
    let pubkey = PublicKey::from_secret_key(&secp, secret);
    let hash = hash160::Hash::hash(&pubkey.serialize());
    Builder::new()
        .push_opcode(OP_PUSHBYTES_0)
        .push_slice(hash.to_byte_array())
        .into_script()
}
