//! # opvault: OP_VAULT Covenant Vaults
//!
//! Command line front end for the vault library: create and inspect vault
//! plans, compute withdrawal commitments, and run the full vault lifecycle
//! against either the in-memory node or a regtest node over RPC.
//!
//! ## Vault Flow
//!
//! ```text
//! ┌─────────────┐  Initialize  ┌─────────────┐   Trigger   ┌─────────────┐
//! │ Funding     │  ──────────> │    Vault    │  ────────>  │ OP_UNVAULT  │
//! │ Coin        │              │   Output    │             │   Output    │
//! └─────────────┘              └─────────────┘             └─────────────┘
//!                                     │                           │
//!                                     │ Recover        ┌──────────┴──────────┐
//!                                     │                │                     │
//!                                     ▼                ▼                     ▼
//!                              ┌─────────────┐  ┌─────────────┐      ┌─────────────┐
//!                              │  Recovery   │  │  Recovery   │      │  Targets    │
//!                              │   Output    │  │ (any time)  │      │(after delay)│
//!                              └─────────────┘  └─────────────┘      └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Write a vault plan with a 144 block spend delay
//! opvault create-vault --delay 144
//!
//! # Walk through a withdrawal on the in-memory node
//! opvault demo --scenario withdraw
//!
//! # Same, against a regtest node with the vault soft fork
//! opvault demo --scenario recover-unvault --rpc
//! ```

use anyhow::{bail, Context, Result};
use bitcoin::Amount;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use opvault::{
    config::{files, vault as vault_config},
    hashes,
    script::CovenantScript,
    services::{CoinSource, MemoryNode, Node, RpcNode},
    utils::{amount, targets, txid},
    vaults::{
        build_final_withdrawal, build_initialize_vault, build_sweep_to_recovery, build_trigger_unvault,
        RecoveryAuthorization, VaultKeys, VaultPlan, VaultSpec,
    },
    VaultError,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AuthKind {
    /// Anyone may broadcast the recovery
    None,
    /// Recovery needs a signature from the recovery key
    TaprootKey,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Trigger, wait out the spend delay, withdraw
    Withdraw,
    /// Sweep an untouched vault to recovery
    RecoverVault,
    /// Trigger, then sweep the triggered output to recovery
    RecoverUnvault,
    /// Trigger three vaults in one transaction and withdraw
    Batch,
    /// Trigger part of a vault and re-trigger the remainder
    Revault,
}

#[derive(Parser)]
#[command(name = "opvault")]
#[command(about = "Bitcoin vaults on the OP_VAULT covenant")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a vault plan and write it to a file
    CreateVault {
        /// Spend delay in blocks
        #[arg(short, long, default_value_t = vault_config::DEFAULT_SPEND_DELAY)]
        delay: i64,
        /// Recovery authorization
        #[arg(long, value_enum, default_value = "none")]
        auth: AuthKind,
        /// Use fresh random keys instead of the deterministic demo keys
        #[arg(long)]
        random_keys: bool,
        /// Output file
        #[arg(short, long, default_value = files::DEFAULT_VAULT_FILE)]
        output: String,
    },
    /// Show the scripts and commitments of a saved vault plan
    Inspect {
        #[arg(short, long, default_value = files::DEFAULT_VAULT_FILE)]
        vault_file: String,
    },
    /// Compute the target outputs hash of `sats:scripthex` outputs
    TargetHash {
        #[arg(required = true)]
        outputs: Vec<String>,
    },
    /// Split a vault value into withdrawal shares
    Split {
        /// Total in satoshis
        total: u64,
        #[arg(short, long, default_value_t = vault_config::DEFAULT_SPLIT_COUNT)]
        count: usize,
    },
    /// Run a vault lifecycle scenario
    Demo {
        #[arg(short, long, value_enum, default_value = "withdraw")]
        scenario: Scenario,
        #[arg(short, long, default_value_t = vault_config::DEFAULT_SPEND_DELAY)]
        delay: i64,
        /// Use a regtest node over RPC instead of the in-memory node
        #[arg(long)]
        rpc: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::CreateVault {
            delay,
            auth,
            random_keys,
            output,
        } => create_vault(delay, auth, random_keys, &output),
        Commands::Inspect { vault_file } => inspect(&vault_file),
        Commands::TargetHash { outputs } => target_hash(&outputs),
        Commands::Split { total, count } => split(total, count),
        Commands::Demo { scenario, delay, rpc } => {
            if rpc {
                let mut node = RpcNode::new().context("Failed to connect to the regtest node")?;
                println!("🔗 Using RPC wallet '{}'", node.wallet_name());
                run_demo(&mut node, scenario, delay)
            } else {
                run_demo(&mut MemoryNode::new(), scenario, delay)
            }
        }
    }
}

fn create_vault(delay: i64, auth: AuthKind, random_keys: bool, output: &str) -> Result<()> {
    let keys = if random_keys {
        VaultKeys::generate()?
    } else {
        VaultKeys::default_keys()?
    };
    let auth = match auth {
        AuthKind::None => RecoveryAuthorization::AnyoneCanSpend,
        AuthKind::TaprootKey => RecoveryAuthorization::taproot_key(keys.recovery),
    };
    let spec = VaultSpec::new(keys, delay, auth)?;
    spec.to_plan()
        .save_to_file(output)
        .with_context(|| format!("Failed to write vault plan to {output}"))?;

    println!("🏦 Vault created");
    println!("Vault script:     {}", hex::encode(spec.vault_spk().as_bytes()));
    println!("Recovery script:  {}", hex::encode(spec.recovery_spk().as_bytes()));
    println!("Spend delay:      {} blocks", spec.spend_delay);
    println!("📁 Plan saved to {output}");
    Ok(())
}

fn inspect(vault_file: &str) -> Result<()> {
    let plan = VaultPlan::load_from_file(vault_file).with_context(|| format!("Failed to load {vault_file}"))?;
    let spec = VaultSpec::from_plan(&plan)?;
    let covenant = CovenantScript::parse(&spec.vault_script)?;

    println!("Vault leaf:        {}", spec.vault_script);
    println!("Vault output:      {}", hex::encode(spec.vault_spk().as_bytes()));
    println!("Unvault key spk:   {}", hex::encode(spec.unvault_spk().as_bytes()));
    println!("Unvault spk hash:  {}", hex::encode(covenant.commitment));
    println!("Recovery params:   {}", plan.recovery_params);
    println!("Recovery auth:     {}", spec.recovery_auth.name());
    println!("Spend delay:       {} blocks", covenant.spend_delay);
    match (spec.total_amount, spec.vault_outpoint) {
        (Some(total), Some(outpoint)) => println!("Funded:            {} at {outpoint}", amount::format_dual(total.to_sat())),
        _ => println!("Funded:            no"),
    }
    Ok(())
}

fn target_hash(outputs: &[String]) -> Result<()> {
    let outputs = outputs
        .iter()
        .map(|spec| targets::parse(spec))
        .collect::<Result<Vec<_>, VaultError>>()?;
    println!("{}", hex::encode(hashes::target_outputs_hash(&outputs)));
    Ok(())
}

fn split(total: u64, count: usize) -> Result<()> {
    for (i, share) in amount::split_vault_value(Amount::from_sat(total), count)?.iter().enumerate() {
        println!("{i}: {}", amount::format_dual(share.to_sat()));
    }
    Ok(())
}

/// Fund a fresh default vault from the node's coin source.
fn initialize<N: Node + CoinSource>(node: &mut N, delay: i64) -> Result<VaultSpec> {
    let mut spec = VaultSpec::with_delay(delay, RecoveryAuthorization::AnyoneCanSpend)?;
    let coin = node.spendable_coin().context("No spendable coin")?;
    let tx = build_initialize_vault(&mut spec, &coin, Amount::from_sat(vault_config::DEFAULT_INIT_FEE_SATS))?;
    let signed = node.sign_funding(tx)?;
    spec.set_funding(&signed, 0)?;
    let txid = node.submit(&signed)?;
    node.mine(1)?;
    println!(
        "🔒 Vaulted {} in {}",
        amount::format_dual(spec.total_amount.map_or(0, Amount::to_sat)),
        txid::format_short(&txid.to_string())
    );
    Ok(spec)
}

fn run_demo<N: Node + CoinSource>(node: &mut N, scenario: Scenario, delay: i64) -> Result<()> {
    if delay < 1 {
        bail!("the demo needs a spend delay of at least one block");
    }
    info!("Running {scenario:?} scenario with a {delay} block delay");
    let fee = Amount::from_sat(vault_config::DEFAULT_INIT_FEE_SATS);

    match scenario {
        Scenario::Withdraw | Scenario::Batch => {
            let count = if scenario == Scenario::Batch { 3 } else { 1 };
            let vaults = (0..count)
                .map(|_| initialize(node, delay))
                .collect::<Result<Vec<_>>>()?;
            let refs: Vec<&VaultSpec> = vaults.iter().collect();
            let total: Amount = vaults.iter().filter_map(|v| v.total_amount).sum();
            let shares = amount::split_vault_value(
                total.checked_sub(fee).context("vault too small to pay the withdrawal fee")?,
                vault_config::DEFAULT_SPLIT_COUNT,
            )?;
            let outputs = targets::deterministic(&shares)?;

            let trigger = build_trigger_unvault(hashes::target_outputs_hash(&outputs), &refs, None)?;
            let trigger_txid = node.submit(&trigger.tx)?;
            node.mine(1)?;
            println!("⏳ Triggered {} vault(s) in {}", refs.len(), txid::format_short(&trigger_txid.to_string()));

            let withdrawal = build_final_withdrawal(trigger.trigger_outpoint(), &outputs, &trigger)?;
            if delay > 1 {
                node.mine((delay - 2) as u32)?;
                match node.submit(&withdrawal) {
                    Err(e) => println!("🚫 Early withdrawal rejected: {e}"),
                    Ok(_) => bail!("withdrawal accepted before the spend delay"),
                }
                node.mine(1)?;
            }
            let txid = node.submit(&withdrawal)?;
            node.mine(1)?;
            println!("✅ Withdrew {} to {} targets in {}", amount::format_dual((total - fee).to_sat()), outputs.len(), txid::format_short(&txid.to_string()));
        }
        Scenario::RecoverVault => {
            let spec = initialize(node, delay)?;
            let (outpoint, _) = spec.funded_output()?;
            let sweep = build_sweep_to_recovery(&[(&spec, outpoint)], None)?;
            let txid = node.submit(&sweep)?;
            node.mine(1)?;
            println!("🛡️  Swept vault to recovery in {}", txid::format_short(&txid.to_string()));
        }
        Scenario::RecoverUnvault => {
            let spec = initialize(node, delay)?;
            let total = spec.total_amount.context("vault not funded")?;
            let outputs = targets::deterministic(&[total.checked_sub(fee).context("vault too small")?])?;
            let trigger = build_trigger_unvault(hashes::target_outputs_hash(&outputs), &[&spec], None)?;
            node.submit(&trigger.tx)?;
            node.mine(1)?;
            println!("⚠️  Unexpected trigger {} detected", txid::format_short(&trigger.txid().to_string()));

            let sweep = build_sweep_to_recovery(&[(&spec, trigger.trigger_outpoint())], Some(&trigger))?;
            let txid = node.submit(&sweep)?;
            node.mine(1)?;
            println!("🛡️  Swept triggered funds to recovery in {}", txid::format_short(&txid.to_string()));
        }
        Scenario::Revault => {
            let spec = initialize(node, delay)?;
            let total = spec.total_amount.context("vault not funded")?;
            let keep = Amount::from_sat(total.to_sat() / 2);
            let outputs = targets::deterministic(&[(total - keep).checked_sub(fee).context("vault too small")?])?;
            let trigger = build_trigger_unvault(hashes::target_outputs_hash(&outputs), &[&spec], Some(keep))?;
            node.submit(&trigger.tx)?;
            node.mine(1)?;
            println!("⏳ Triggered {}, revaulted {}", amount::format_dual((total - keep).to_sat()), amount::format_dual(keep.to_sat()));

            let revaulted = spec.revaulted(&trigger)?;
            let remaining = targets::deterministic(&[keep.checked_sub(fee).context("revault too small")?])?;
            let again = build_trigger_unvault(hashes::target_outputs_hash(&remaining), &[&revaulted], None)?;
            let txid = node.submit(&again.tx)?;
            node.mine(1)?;
            println!("⏳ Re-triggered the revault in {}", txid::format_short(&txid.to_string()));
        }
    }

    println!("📦 Mempool holds {} transaction(s)", node.mempool_size()?);
    Ok(())
}
