//! Full-node JSON-RPC client and chain monitoring
//!
//! Solo mode talks to a local Bitcoin-family node over JSON-RPC 1.0:
//! `getblocktemplate` for work, `submitblock` when a miner finds a
//! block, and `getbestblockhash` polling to notice new chain tips.

mod client;
mod monitor;
mod types;

pub use client::{ChainRpc, NodeClient, NodeClientConfig};
pub use monitor::{ChainMonitor, ChainMonitorEvents};
pub use types::{
    AddressInfo, BlockTemplate, BlockchainInfo, CoinbaseTxnInfo, MandatoryOutput, MiningInfo,
    NetworkInfo, PayoutScript, TemplateTransaction,
};
