//! Commitment hashes used by the vault covenant.
//!
//! Two different primitives live here and must not be mixed up: BIP340-style
//! tagged hashes commit to output scripts inside covenant scripts, while the
//! target outputs hash is the plain double-SHA256 `hashOutputs` construction.

use crate::config::tags;
use bitcoin::{
    consensus::encode::serialize,
    hashes::{sha256, sha256d, Hash, HashEngine},
    Script, TxOut,
};

/// `SHA256(SHA256(tag) || SHA256(tag) || data)`
pub fn tagged_hash(tag: &str, data: &[u8]) -> [u8; 32] {
    let tag_hash = sha256::Hash::hash(tag.as_bytes());
    let mut engine = sha256::Hash::engine();
    engine.input(tag_hash.as_byte_array());
    engine.input(tag_hash.as_byte_array());
    engine.input(data);
    sha256::Hash::from_engine(engine).to_byte_array()
}

/// Length-prefixed script bytes, as scripts appear inside a transaction.
fn ser_string(script: &Script) -> Vec<u8> {
    serialize(&script.to_owned())
}

/// Commitment to the script funds are swept to on recovery.
pub fn recovery_spk_hash(recovery_spk: &Script) -> [u8; 32] {
    tagged_hash(tags::RECOVERY_SPK, &ser_string(recovery_spk))
}

/// Commitment to the script whose witness authorizes a trigger.
pub fn unvault_spk_hash(unvault_spk: &Script) -> [u8; 32] {
    tagged_hash(tags::UNVAULT_SPK, &ser_string(unvault_spk))
}

/// Double-SHA256 over the serialized outputs, in order.
pub fn target_outputs_hash(outputs: &[TxOut]) -> [u8; 32] {
    let mut data = Vec::new();
    for output in outputs {
        data.extend_from_slice(&serialize(output));
    }
    sha256d::Hash::hash(&data).to_byte_array()
}
