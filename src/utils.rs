//! # Utility Functions
//!
//! Value splitting, withdrawal target helpers and display formatting.

use crate::error::{VaultError, VaultResult};

/// Amount utilities
pub mod amount {
    use super::*;
    use bitcoin::Amount;

    /// Split `total` into `n` shares: `n - 1` equal shares of `total / n`, the
    /// last one taking the remainder.
    pub fn split_vault_value(total: Amount, n: usize) -> VaultResult<Vec<Amount>> {
        if n == 0 {
            return Err(VaultError::config("cannot split a vault value into zero outputs"));
        }
        let share = total.to_sat() / n as u64;
        let mut shares = vec![Amount::from_sat(share); n - 1];
        shares.push(Amount::from_sat(total.to_sat() - share * (n as u64 - 1)));
        Ok(shares)
    }

    /// Convert satoshis to BTC with 8 decimal places
    pub fn sats_to_btc(sats: u64) -> f64 {
        sats as f64 / 100_000_000.0
    }

    /// Format amount with both sats and BTC
    pub fn format_dual(sats: u64) -> String {
        format!("{} sats ({:.8} BTC)", sats, sats_to_btc(sats))
    }
}

/// Withdrawal target utilities
pub mod targets {
    use super::*;
    use crate::config::vault::TARGET_SECRET_BASE;
    use crate::vaults::taproot::{secret_from_u64, segwit_v0_spk};
    use bitcoin::{Amount, ScriptBuf, TxOut};

    /// One segwit v0 output per value, paying to the deterministic target keys.
    pub fn deterministic(values: &[Amount]) -> VaultResult<Vec<TxOut>> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                Ok(TxOut {
                    value: *value,
                    script_pubkey: segwit_v0_spk(&secret_from_u64(TARGET_SECRET_BASE + i as u64)?),
                })
            })
            .collect()
    }

    /// Parse `sats:scripthex`.
    pub fn parse(spec: &str) -> VaultResult<TxOut> {
        let (sats, script) = spec
            .split_once(':')
            .ok_or_else(|| VaultError::config(format!("target '{spec}' is not sats:scripthex")))?;
        let sats: u64 = sats
            .parse()
            .map_err(|e| VaultError::config(format!("invalid target amount '{sats}': {e}")))?;
        let script = hex::decode(script).map_err(|e| VaultError::config(format!("invalid target script: {e}")))?;
        Ok(TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: ScriptBuf::from_bytes(script),
        })
    }
}

/// Transaction ID formatting utilities
pub mod txid {
    const DISPLAY_PREFIX: usize = 8;
    const DISPLAY_SUFFIX: usize = 8;

    /// Format a transaction ID for display
    pub fn format_short(txid: &str) -> String {
        if txid.len() <= DISPLAY_PREFIX + DISPLAY_SUFFIX + 3 {
            txid.to_string()
        } else {
            format!(
                "{}...{}",
                &txid[..DISPLAY_PREFIX],
                &txid[txid.len() - DISPLAY_SUFFIX..]
            )
        }
    }
}
