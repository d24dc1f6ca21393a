//! Chain definitions
//!
//! Static per-coin parameters for the supported Bitcoin-family chains,
//! plus the [`AddressCodec`] seam that turns a configured payout address
//! into a scriptPubKey. Full base58/bech32/CashAddr codecs are external
//! collaborators; the built-in [`HexScriptCodec`] accepts a raw
//! scriptPubKey in hex so the server runs standalone.

use crate::error::{Error, Result};

/// Parameters of a supported chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinDef {
    /// Human-readable name
    pub name: &'static str,
    /// Ticker symbol
    pub symbol: &'static str,
    /// Registry key
    pub coin_id: &'static str,
    /// Whether blocks carry SegWit commitments/witness data
    pub segwit: bool,
    /// Rules to request from `getblocktemplate`
    pub gbt_rules: &'static [&'static str],
    /// Target block interval in seconds
    pub target_block_time_secs: u64,
    /// eCash-style mandatory miner fund output
    pub has_miner_fund: bool,
    /// eCash-style mandatory staking reward output
    pub has_staking_reward: bool,
}

const BTC: CoinDef = CoinDef {
    name: "Bitcoin",
    symbol: "BTC",
    coin_id: "btc",
    segwit: true,
    gbt_rules: &["segwit"],
    target_block_time_secs: 600,
    has_miner_fund: false,
    has_staking_reward: false,
};

const BCH: CoinDef = CoinDef {
    name: "Bitcoin Cash",
    symbol: "BCH",
    coin_id: "bch",
    segwit: false,
    gbt_rules: &[],
    target_block_time_secs: 600,
    has_miner_fund: false,
    has_staking_reward: false,
};

const DGB: CoinDef = CoinDef {
    name: "DigiByte",
    symbol: "DGB",
    coin_id: "dgb",
    segwit: true,
    gbt_rules: &["segwit"],
    target_block_time_secs: 60,
    has_miner_fund: false,
    has_staking_reward: false,
};

const XEC: CoinDef = CoinDef {
    name: "eCash",
    symbol: "XEC",
    coin_id: "xec",
    segwit: false,
    gbt_rules: &[],
    target_block_time_secs: 600,
    has_miner_fund: true,
    has_staking_reward: true,
};

/// Look up a coin definition, defaulting to BTC for unknown ids.
pub fn get(coin_id: &str) -> &'static CoinDef {
    match coin_id {
        "btc" => &BTC,
        "bch" => &BCH,
        "dgb" => &DGB,
        "xec" => &XEC,
        _ => &BTC,
    }
}

/// Supported coin ids in stable display order.
pub fn list() -> &'static [&'static str] {
    &["btc", "bch", "dgb", "xec"]
}

/// Turns a payout address into the scriptPubKey the coinbase pays to.
///
/// Implementations plug in real address codecs per chain. The coinbase
/// builder calls this for the configured payout address and for
/// mandatory-output addresses that arrive without a raw script.
pub trait AddressCodec: Send + Sync {
    /// Produce the scriptPubKey bytes for `address`.
    fn script_pubkey(&self, address: &str) -> Result<Vec<u8>>;
}

/// Codec that expects the "address" to already be a scriptPubKey in hex.
pub struct HexScriptCodec;

impl AddressCodec for HexScriptCodec {
    fn script_pubkey(&self, address: &str) -> Result<Vec<u8>> {
        let script =
            hex::decode(address).map_err(|e| Error::invalid_hex("payout_script", e.to_string()))?;
        if script.is_empty() {
            return Err(Error::config_missing_field("payout_script"));
        }
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(get("btc").symbol, "BTC");
        assert_eq!(get("xec").symbol, "XEC");
        assert!(get("xec").has_miner_fund);
        assert!(!get("btc").has_miner_fund);
    }

    #[test]
    fn test_unknown_defaults_to_btc() {
        assert_eq!(get("nope").coin_id, "btc");
    }

    #[test]
    fn test_segwit_rules_consistent() {
        for id in list() {
            let coin = get(id);
            assert_eq!(coin.coin_id, *id);
            // SegWit chains must request the segwit GBT rule
            assert_eq!(coin.segwit, coin.gbt_rules.contains(&"segwit"));
        }
    }

    #[test]
    fn test_hex_codec() {
        let codec = HexScriptCodec;
        let script = codec
            .script_pubkey("76a914000000000000000000000000000000000000000088ac")
            .unwrap();
        assert_eq!(script[0], 0x76);
        assert_eq!(script.len(), 25);

        assert!(codec.script_pubkey("not-hex").is_err());
        assert!(codec.script_pubkey("").is_err());
    }
}
