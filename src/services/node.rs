//! Interfaces to the chain the vaults live on.

use crate::error::VaultResult;
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, Txid};

/// A spendable coin handed out by a [`CoinSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingCoin {
    pub outpoint: OutPoint,
    pub value: Amount,
    /// Script the coin pays to; bare `OP_TRUE` coins need no witness
    pub claim_script: ScriptBuf,
}

/// Broadcast and chain advance.
pub trait Node {
    /// Validate and accept `tx` into the mempool.
    fn submit(&mut self, tx: &Transaction) -> VaultResult<Txid>;

    /// Mine `blocks` blocks, returning the new tip height.
    fn mine(&mut self, blocks: u32) -> VaultResult<u32>;

    fn mempool_size(&self) -> VaultResult<usize>;

    /// Confirmations of `txid`, 0 while unconfirmed or unknown.
    fn confirmations(&self, txid: &Txid) -> VaultResult<u32>;
}

/// Wallet-like source of funding coins.
pub trait CoinSource {
    fn spendable_coin(&mut self) -> VaultResult<FundingCoin>;

    /// Add whatever the coin's owner must sign to a funding transaction.
    fn sign_funding(&self, tx: Transaction) -> VaultResult<Transaction> {
        Ok(tx)
    }
}
