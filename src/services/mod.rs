//! # Services Module
//!
//! Node collaborators the vault lifecycle talks to.
//!
//! ## Components
//!
//! - **Node traits**: broadcast, mining and coin source interfaces
//! - **Memory Node**: in-process chain running the covenant validator
//! - **RPC Client**: Bitcoin Core regtest node over JSON-RPC

pub mod memory_node;
pub mod node;
pub mod rpc_client;

pub use memory_node::MemoryNode;
pub use node::{CoinSource, FundingCoin, Node};
pub use rpc_client::RpcNode;
