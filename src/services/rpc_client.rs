use super::node::{CoinSource, FundingCoin, Node};
use crate::config::{env as config_env, network};
use crate::error::{VaultError, VaultResult};
use bitcoin::{consensus::encode, Amount, OutPoint, ScriptBuf, Transaction, Txid};
use bitcoincore_rpc::{jsonrpc, Auth, Client, RpcApi};
use log::{info, warn};
use serde_json::Value;
use std::{collections::HashSet, env, str::FromStr};

/// Bitcoin Core node (regtest, with the vault soft fork) reached over JSON-RPC.
#[derive(Debug)]
pub struct RpcNode {
    client: Client,
    wallet_name: String,
    /// Coins already handed out; listunspent still reports them until spent
    handed_out: HashSet<OutPoint>,
}

impl RpcNode {
    /// Create a client with configuration from the environment or defaults
    pub fn new() -> VaultResult<Self> {
        dotenv::dotenv().ok();

        let rpc_url = env::var(config_env::RPC_URL).unwrap_or_else(|_| network::DEFAULT_RPC_HOST.to_string());
        let rpc_port = env::var(config_env::RPC_PORT).unwrap_or_else(|_| network::DEFAULT_RPC_PORT.to_string());
        let rpc_user = env::var(config_env::RPC_USER).unwrap_or_else(|_| network::DEFAULT_RPC_USER.to_string());
        let rpc_password =
            env::var(config_env::RPC_PASSWORD).unwrap_or_else(|_| network::DEFAULT_RPC_PASSWORD.to_string());
        let wallet_name =
            env::var(config_env::RPC_WALLET).unwrap_or_else(|_| network::DEFAULT_WALLET_NAME.to_string());

        let auth = Auth::UserPass(rpc_user, rpc_password);
        let url = format!("http://{}:{}/wallet/{}", rpc_url, rpc_port, wallet_name);
        let client = Client::new(&url, auth)?;

        Ok(RpcNode {
            client,
            wallet_name,
            handed_out: HashSet::new(),
        })
    }

    pub fn wallet_name(&self) -> &str {
        &self.wallet_name
    }

    pub fn block_count(&self) -> VaultResult<u64> {
        Ok(self.client.get_block_count()?)
    }
}

/// Node-side rejections become [`VaultError::Rejected`]; transport failures stay RPC errors.
fn map_rejection(error: bitcoincore_rpc::Error) -> VaultError {
    match error {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::error::Error::Rpc(rpc)) => VaultError::Rejected {
            code: rpc.code,
            message: rpc.message,
        },
        other => VaultError::Rpc { source: other },
    }
}

/// "No such mempool or blockchain transaction"
fn is_unknown_transaction(error: &bitcoincore_rpc::Error) -> bool {
    matches!(
        error,
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::error::Error::Rpc(rpc))
            if rpc.code == network::RPC_INVALID_ADDRESS_OR_KEY
    )
}

impl Node for RpcNode {
    fn submit(&mut self, tx: &Transaction) -> VaultResult<Txid> {
        match self.client.send_raw_transaction(tx) {
            Ok(txid) => {
                info!("Broadcast {txid}");
                Ok(txid)
            }
            Err(e) => {
                let error = map_rejection(e);
                warn!("Node rejected {}: {error}", tx.compute_txid());
                Err(error)
            }
        }
    }

    fn mine(&mut self, blocks: u32) -> VaultResult<u32> {
        let address = self.client.call::<String>("getnewaddress", &[])?;
        self.client
            .call::<Vec<String>>("generatetoaddress", &[blocks.into(), address.into()])?;
        let height = self.block_count()?;
        info!("Mined {blocks} block(s), tip at {height}");
        u32::try_from(height).map_err(|_| VaultError::config(format!("block height {height} out of range")))
    }

    fn mempool_size(&self) -> VaultResult<usize> {
        let info = self.client.call::<Value>("getmempoolinfo", &[])?;
        let size = info["size"].as_u64().unwrap_or(0);
        usize::try_from(size).map_err(|_| VaultError::config(format!("mempool size {size} out of range")))
    }

    fn confirmations(&self, txid: &Txid) -> VaultResult<u32> {
        let tx_info = match self
            .client
            .call::<Value>("getrawtransaction", &[txid.to_string().into(), true.into()])
        {
            Ok(tx_info) => tx_info,
            Err(e) if is_unknown_transaction(&e) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let confirmations = tx_info["confirmations"].as_u64().unwrap_or(0);
        u32::try_from(confirmations)
            .map_err(|_| VaultError::config(format!("confirmation count {confirmations} out of range")))
    }
}

impl CoinSource for RpcNode {
    fn spendable_coin(&mut self) -> VaultResult<FundingCoin> {
        let unspent = self.client.call::<Vec<Value>>("listunspent", &[1.into()])?;
        for entry in unspent {
            let (Some(txid), Some(vout), Some(amount), Some(spk)) = (
                entry["txid"].as_str(),
                entry["vout"].as_u64(),
                entry["amount"].as_f64(),
                entry["scriptPubKey"].as_str(),
            ) else {
                continue;
            };
            let txid = Txid::from_str(txid).map_err(|e| VaultError::transaction(format!("bad txid: {e}")))?;
            let outpoint = OutPoint::new(txid, vout as u32);
            if !self.handed_out.insert(outpoint) {
                continue;
            }
            let value = Amount::from_btc(amount).map_err(|e| VaultError::transaction(format!("bad amount: {e}")))?;
            let claim_script = ScriptBuf::from_hex(spk)
                .map_err(|e| VaultError::transaction(format!("bad scriptPubKey: {e}")))?;
            return Ok(FundingCoin {
                outpoint,
                value,
                claim_script,
            });
        }
        Err(VaultError::InsufficientFunds {
            required: 1,
            available: 0,
        })
    }

    fn sign_funding(&self, tx: Transaction) -> VaultResult<Transaction> {
        let result = self
            .client
            .call::<Value>("signrawtransactionwithwallet", &[encode::serialize_hex(&tx).into()])?;
        if !result["complete"].as_bool().unwrap_or(false) {
            return Err(VaultError::transaction(format!(
                "wallet could not sign funding transaction: {}",
                result["errors"]
            )));
        }
        let signed = result["hex"]
            .as_str()
            .ok_or_else(|| VaultError::transaction("wallet returned no signed hex"))?;
        let bytes = hex::decode(signed).map_err(|e| VaultError::transaction(format!("bad signed hex: {e}")))?;
        encode::deserialize(&bytes).map_err(|e| VaultError::transaction(format!("bad signed transaction: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_errors_map_to_rejections() {
        let rpc = jsonrpc::error::RpcError {
            code: network::RPC_VERIFY_REJECTED,
            message: "OP_UNVAULT outputs not compatible".to_string(),
            data: None,
        };
        let error = map_rejection(bitcoincore_rpc::Error::JsonRpc(jsonrpc::error::Error::Rpc(rpc)));
        assert!(matches!(error, VaultError::Rejected { code: -26, .. }));
        assert!(error.is_validation_failure());

        let transport = map_rejection(bitcoincore_rpc::Error::ReturnedError("boom".to_string()));
        assert!(transport.is_retryable());
    }

    #[test]
    fn test_only_unknown_transactions_count_as_unconfirmed() {
        let unknown = jsonrpc::error::RpcError {
            code: network::RPC_INVALID_ADDRESS_OR_KEY,
            message: "No such mempool or blockchain transaction".to_string(),
            data: None,
        };
        assert!(is_unknown_transaction(&bitcoincore_rpc::Error::JsonRpc(
            jsonrpc::error::Error::Rpc(unknown)
        )));

        let auth = jsonrpc::error::RpcError {
            code: -1,
            message: "unauthorized".to_string(),
            data: None,
        };
        assert!(!is_unknown_transaction(&bitcoincore_rpc::Error::JsonRpc(
            jsonrpc::error::Error::Rpc(auth)
        )));
        assert!(!is_unknown_transaction(&bitcoincore_rpc::Error::ReturnedError(
            "connection refused".to_string()
        )));
    }
}
