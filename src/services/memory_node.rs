//! # In-Memory Node
//!
//! A single-process chain: a UTXO set, a mempool and a block height. Every
//! submitted transaction runs through the covenant validator against the next
//! block's height, so timelock and covenant rules behave as they would on a
//! node with the vault soft fork active.

use super::node::{CoinSource, FundingCoin, Node};
use crate::config::vault::DEFAULT_COIN_SATS;
use crate::error::{VaultError, VaultResult};
use crate::validator::{self, SpentCoin, ValidatedTransaction};
use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Transaction, TxOut, Txid,
};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct MemoryNode {
    utxos: HashMap<OutPoint, SpentCoin>,
    mempool: Vec<Transaction>,
    /// Outpoints spent by mempool transactions
    mempool_spent: HashSet<OutPoint>,
    height: u32,
    confirmed: HashMap<Txid, u32>,
    coin_value: Amount,
    coins_issued: u32,
}

impl Default for MemoryNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::with_coin_value(Amount::from_sat(DEFAULT_COIN_SATS))
    }

    /// Node whose coin source hands out coins of `coin_value`
    pub fn with_coin_value(coin_value: Amount) -> Self {
        Self {
            utxos: HashMap::new(),
            mempool: Vec::new(),
            mempool_spent: HashSet::new(),
            height: 0,
            confirmed: HashMap::new(),
            coin_value,
            coins_issued: 0,
        }
    }

    /// Whether `outpoint` is unspent, counting mempool spends
    pub fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint) && !self.mempool_spent.contains(outpoint)
    }

    /// Create a confirmed bare `OP_TRUE` coin out of thin air.
    pub fn faucet(&mut self, value: Amount) -> FundingCoin {
        self.coins_issued += 1;
        let output = TxOut {
            value,
            script_pubkey: ScriptBuf::from_bytes(vec![0x51]),
        };
        // Distinct lock times keep the synthetic txids unique
        let coinbase = Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(self.coins_issued),
            input: vec![],
            output: vec![output.clone()],
        };
        let outpoint = OutPoint::new(coinbase.compute_txid(), 0);
        self.utxos.insert(outpoint, SpentCoin::confirmed(output.clone(), self.height));
        self.confirmed.insert(outpoint.txid, self.height);
        debug!("faucet coin {outpoint} for {} sats", value.to_sat());

        FundingCoin {
            outpoint,
            value,
            claim_script: output.script_pubkey,
        }
    }

    /// Run the validator without touching node state.
    pub fn test_accept(&self, tx: &Transaction) -> VaultResult<ValidatedTransaction> {
        let mut coins = Vec::with_capacity(tx.input.len());
        for input in &tx.input {
            let outpoint = input.previous_output;
            if self.mempool_spent.contains(&outpoint) {
                return Err(VaultError::MempoolConflict { outpoint });
            }
            let coin = self
                .utxos
                .get(&outpoint)
                .cloned()
                .ok_or(VaultError::MissingInputs { outpoint })?;
            coins.push(coin);
        }
        validator::validate_transaction(tx, &coins, self.height + 1)
    }
}

impl Node for MemoryNode {
    fn submit(&mut self, tx: &Transaction) -> VaultResult<Txid> {
        let validated = match self.test_accept(tx) {
            Ok(validated) => validated,
            Err(e) => {
                warn!("Rejected {}: {e}", tx.compute_txid());
                return Err(e);
            }
        };

        for input in &tx.input {
            self.mempool_spent.insert(input.previous_output);
        }
        for (vout, output) in tx.output.iter().enumerate() {
            self.utxos.insert(
                OutPoint::new(validated.txid, vout as u32),
                SpentCoin::unconfirmed(output.clone()),
            );
        }
        self.mempool.push(tx.clone());

        for transition in &validated.transitions {
            debug!(
                "{} input {}: {:?} -> {:?}",
                validated.txid, transition.input, transition.from, transition.to
            );
        }
        info!("Accepted {} (fee {} sats)", validated.txid, validated.fee.to_sat());
        Ok(validated.txid)
    }

    fn mine(&mut self, blocks: u32) -> VaultResult<u32> {
        if blocks == 0 {
            return Ok(self.height);
        }
        self.height += 1;
        let block: Vec<Transaction> = std::mem::take(&mut self.mempool);
        for tx in &block {
            let txid = tx.compute_txid();
            for input in &tx.input {
                self.utxos.remove(&input.previous_output);
            }
            for vout in 0..tx.output.len() {
                if let Some(coin) = self.utxos.get_mut(&OutPoint::new(txid, vout as u32)) {
                    coin.height = Some(self.height);
                }
            }
            self.confirmed.insert(txid, self.height);
        }
        self.mempool_spent.clear();
        self.height += blocks - 1;

        info!(
            "Mined {blocks} block(s) with {} transaction(s), tip at {}",
            block.len(),
            self.height
        );
        Ok(self.height)
    }

    fn mempool_size(&self) -> VaultResult<usize> {
        Ok(self.mempool.len())
    }

    fn confirmations(&self, txid: &Txid) -> VaultResult<u32> {
        Ok(self
            .confirmed
            .get(txid)
            .map_or(0, |height| self.height - height + 1))
    }
}

impl CoinSource for MemoryNode {
    fn spendable_coin(&mut self) -> VaultResult<FundingCoin> {
        let value = self.coin_value;
        Ok(self.faucet(value))
    }
}
