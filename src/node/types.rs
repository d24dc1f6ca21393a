//! Node RPC response types

use serde::{Deserialize, Serialize};

/// A block template as returned by `getblocktemplate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockTemplate {
    /// Block version
    pub version: i64,
    /// Previous block hash in display order
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: String,
    /// Non-coinbase transactions, in block order
    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,
    /// Total coinbase reward in base units (subsidy + fees)
    #[serde(rename = "coinbasevalue", default)]
    pub coinbase_value: i64,
    /// Full 256-bit target, display order
    #[serde(default)]
    pub target: String,
    /// Minimum allowed block time
    #[serde(rename = "mintime", default)]
    pub min_time: i64,
    /// Current node time
    #[serde(rename = "curtime")]
    pub cur_time: i64,
    /// Compact target
    pub bits: String,
    /// Height of the block being built
    pub height: i64,
    /// SegWit witness commitment script, raw hex (SegWit chains only)
    #[serde(rename = "default_witness_commitment", default)]
    pub default_witness_commitment: String,
    /// Active consensus rules
    #[serde(default)]
    pub rules: Vec<String>,
    /// Long-poll identifier
    #[serde(rename = "longpollid", default)]
    pub long_poll_id: String,
    /// eCash-style mandatory coinbase output info
    #[serde(rename = "coinbasetxn", default, skip_serializing_if = "Option::is_none")]
    pub coinbase_txn: Option<CoinbaseTxnInfo>,
}

/// One template transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateTransaction {
    /// Raw transaction bytes, hex
    pub data: String,
    /// Transaction id in display order
    pub txid: String,
    /// Witness hash in display order
    #[serde(default)]
    pub hash: String,
    /// Fee in base units
    #[serde(default)]
    pub fee: i64,
    /// Transaction weight
    #[serde(default)]
    pub weight: i64,
}

/// Mandatory coinbase output info (eCash miner fund / staking rewards).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoinbaseTxnInfo {
    /// Miner fund requirement
    #[serde(rename = "minerfund", default, skip_serializing_if = "Option::is_none")]
    pub miner_fund: Option<MandatoryOutput>,
    /// Staking rewards requirement
    #[serde(
        rename = "stakingrewards",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub staking_rewards: Option<MandatoryOutput>,
}

/// A required coinbase output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MandatoryOutput {
    /// Destination addresses
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Minimum value in base units
    #[serde(rename = "minimumvalue")]
    pub minimum_value: i64,
    /// Raw scriptPubKey, preferred over address decoding when present
    #[serde(rename = "payoutscript", default, skip_serializing_if = "Option::is_none")]
    pub payout_script: Option<PayoutScript>,
}

/// Raw hex script for a mandatory output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutScript {
    /// scriptPubKey bytes, hex
    pub hex: String,
}

/// `getblockchaininfo` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockchainInfo {
    /// Network name (main/test/regtest)
    pub chain: String,
    /// Validated block count
    pub blocks: i64,
    /// Known header count
    #[serde(default)]
    pub headers: i64,
    /// Tip hash, display order
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
    /// Network difficulty
    pub difficulty: f64,
    /// Sync progress 0..1
    #[serde(rename = "verificationprogress", default)]
    pub verification_progress: f64,
    /// Whether the node is still in IBD
    #[serde(rename = "initialblockdownload", default)]
    pub initial_block_download: bool,
}

/// `getmininginfo` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MiningInfo {
    /// Validated block count
    pub blocks: i64,
    /// Network difficulty
    pub difficulty: f64,
    /// Estimated network hashrate
    #[serde(rename = "networkhashps", default)]
    pub network_hash_ps: f64,
    /// Mempool transaction count
    #[serde(rename = "pooledtx", default)]
    pub pooled_tx: i64,
    /// Network name
    #[serde(default)]
    pub chain: String,
}

/// `getnetworkinfo` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkInfo {
    /// Node version number
    pub version: i64,
    /// Node user-agent
    #[serde(rename = "subversion", default)]
    pub sub_version: String,
    /// P2P protocol version
    #[serde(rename = "protocolversion", default)]
    pub protocol_version: i64,
    /// Peer count
    #[serde(default)]
    pub connections: i64,
}

/// `validateaddress` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressInfo {
    /// Whether the address parses for this chain
    #[serde(rename = "isvalid")]
    pub is_valid: bool,
    /// Normalized address
    #[serde(default)]
    pub address: String,
    /// Whether the address is a script hash
    #[serde(rename = "isscript", default)]
    pub is_script: bool,
    /// Whether the address is a witness program
    #[serde(rename = "iswitness", default)]
    pub is_witness: bool,
}
