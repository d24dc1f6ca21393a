//! Coinbase transaction assembly
//!
//! Produces the `(coinb1, coinb2)` halves of a stripped coinbase
//! transaction so a miner's `extranonce1 || extranonce2` lands exactly at
//! the split point inside the scriptSig. The stripped (non-witness)
//! layout is mandatory here: hashing the reassembled bytes must yield the
//! TXID, not the WTXID, for the merkle root to come out right. Witness
//! marker/flag/stack are re-added only at block submission.

use crate::chain::{AddressCodec, CoinDef};
use crate::error::{Error, Result, ValidationError};
use crate::node::{BlockTemplate, MandatoryOutput};

/// Coinbase tags longer than this are truncated.
const MAX_TAG_LEN: usize = 80;

/// The two hex halves of the stripped coinbase transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinbaseParts {
    /// Everything before the extranonce insertion point
    pub coinb1: String,
    /// Everything after it
    pub coinb2: String,
}

/// Assemble the coinbase for a block template.
///
/// `extranonce_len` is the total byte count the miner side inserts
/// (|extranonce1| + |extranonce2|); it is reserved inside the scriptSig
/// length byte but the bytes themselves are supplied per share.
pub fn build_coinbase(
    tmpl: &BlockTemplate,
    coin: &CoinDef,
    codec: &dyn AddressCodec,
    payout_address: &str,
    coinbase_tag: &str,
    extranonce_len: usize,
) -> Result<CoinbaseParts> {
    if payout_address.is_empty() {
        return Err(Error::Validation(ValidationError::NoPayoutAddress));
    }

    let mut tx = Vec::with_capacity(128);

    // Version (little-endian, version 2 for BIP68)
    tx.extend_from_slice(&2u32.to_le_bytes());

    // The SegWit marker/flag pair is intentionally absent: this is the
    // stripped serialization whose hash is the TXID. See build_full_block.

    // One input: the coinbase outpoint
    tx.push(0x01);
    tx.extend_from_slice(&[0u8; 32]);
    tx.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);

    // scriptSig: BIP34 height push, then the pool tag; the extranonce
    // space follows at the split point. The length byte covers all of
    // it: height (max 9) + tag (max 80) + extranonce stays well under 255.
    let script_sig = build_script_sig(tmpl.height, coinbase_tag);
    tx.push((script_sig.len() + extranonce_len) as u8);
    tx.extend_from_slice(&script_sig);

    let coinb1 = hex::encode(&tx);

    // Suffix: everything after the extranonce space
    let mut tx2 = Vec::with_capacity(128);

    // Input sequence
    tx2.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);

    let witness_commitment = if coin.segwit && !tmpl.default_witness_commitment.is_empty() {
        Some(
            hex::decode(&tmpl.default_witness_commitment)
                .map_err(|e| Error::invalid_hex("default_witness_commitment", e.to_string()))?,
        )
    } else {
        None
    };

    let miner_fund = mandatory_output(coin.has_miner_fund, tmpl, |c| c.miner_fund.as_ref());
    let staking_reward =
        mandatory_output(coin.has_staking_reward, tmpl, |c| c.staking_rewards.as_ref());

    let output_count = 1
        + witness_commitment.is_some() as u64
        + miner_fund.is_some() as u64
        + staking_reward.is_some() as u64;
    append_compact_size(&mut tx2, output_count);

    // Primary payout: template value minus whatever the chain earmarks
    let mut payout_value = tmpl.coinbase_value;
    if let Some(fund) = miner_fund {
        payout_value -= fund.minimum_value;
    }
    if let Some(stake) = staking_reward {
        payout_value -= stake.minimum_value;
    }

    tx2.extend_from_slice(&(payout_value as u64).to_le_bytes());
    let payout_script = codec.script_pubkey(payout_address)?;
    append_var_bytes(&mut tx2, &payout_script);

    // Witness commitment output: zero value, raw script from the template
    if let Some(script) = witness_commitment {
        tx2.extend_from_slice(&0u64.to_le_bytes());
        append_var_bytes(&mut tx2, &script);
    }

    if let Some(fund) = miner_fund {
        tx2.extend_from_slice(&(fund.minimum_value as u64).to_le_bytes());
        let script = mandatory_output_script(codec, fund)?;
        append_var_bytes(&mut tx2, &script);
    }

    if let Some(stake) = staking_reward {
        tx2.extend_from_slice(&(stake.minimum_value as u64).to_le_bytes());
        let script = mandatory_output_script(codec, stake)?;
        append_var_bytes(&mut tx2, &script);
    }

    // Locktime
    tx2.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

    Ok(CoinbaseParts {
        coinb1,
        coinb2: hex::encode(&tx2),
    })
}

fn mandatory_output<'a>(
    enabled: bool,
    tmpl: &'a BlockTemplate,
    select: impl Fn(&'a crate::node::CoinbaseTxnInfo) -> Option<&'a MandatoryOutput>,
) -> Option<&'a MandatoryOutput> {
    if !enabled {
        return None;
    }
    tmpl.coinbase_txn.as_ref().and_then(select)
}

/// scriptPubKey for a mandatory output: raw hex when the template
/// provides it, otherwise the first listed address through the codec.
fn mandatory_output_script(codec: &dyn AddressCodec, output: &MandatoryOutput) -> Result<Vec<u8>> {
    if let Some(script) = &output.payout_script {
        if !script.hex.is_empty() {
            return hex::decode(&script.hex)
                .map_err(|e| Error::invalid_hex("payout_script", e.to_string()));
        }
    }

    if let Some(address) = output.addresses.first() {
        return codec.script_pubkey(address);
    }

    Err(Error::coinbase(
        "no script or address available for mandatory output",
    ))
}

/// scriptSig prefix: BIP34 height then the (truncated) coinbase tag.
fn build_script_sig(height: i64, coinbase_tag: &str) -> Vec<u8> {
    let mut script = encode_height(height);

    let tag = coinbase_tag.as_bytes();
    let tag = &tag[..tag.len().min(MAX_TAG_LEN)];
    script.extend_from_slice(tag);

    script
}

/// BIP34 minimal height push.
///
/// Heights up to 16 use the small-number opcodes; larger heights are a
/// length-prefixed minimal little-endian integer with a trailing zero
/// when the top bit would flip the sign.
pub fn encode_height(height: i64) -> Vec<u8> {
    if height <= 16 {
        return vec![0x50 + height as u8];
    }

    let mut bytes = Vec::with_capacity(5);
    let mut h = height;
    while h > 0 {
        bytes.push((h & 0xff) as u8);
        h >>= 8;
    }
    if bytes.last().map_or(false, |b| b & 0x80 != 0) {
        bytes.push(0x00);
    }

    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(bytes.len() as u8);
    out.extend_from_slice(&bytes);
    out
}

/// Append a Bitcoin compact size.
pub fn append_compact_size(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Append a compact-size-prefixed byte string.
pub fn append_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    append_compact_size(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{self, HexScriptCodec};

    const P2PKH: &str = "76a914000102030405060708090a0b0c0d0e0f1011121388ac";

    fn template(height: i64) -> BlockTemplate {
        BlockTemplate {
            version: 0x2000_0000,
            previous_block_hash: "00".repeat(32),
            coinbase_value: 625_000_000,
            cur_time: 1_700_000_600,
            bits: "207fffff".to_string(),
            height,
            ..Default::default()
        }
    }

    fn assemble(parts: &CoinbaseParts, en: &str) -> Vec<u8> {
        hex::decode(format!("{}{}{}", parts.coinb1, en, parts.coinb2)).unwrap()
    }

    #[test]
    fn test_encode_height_small() {
        assert_eq!(encode_height(1), vec![0x51]);
        assert_eq!(encode_height(16), vec![0x60]);
    }

    #[test]
    fn test_encode_height_minimal_push() {
        // 17 -> single byte push
        assert_eq!(encode_height(17), vec![0x01, 0x11]);
        // 300 -> 0x012c little-endian
        assert_eq!(encode_height(300), vec![0x02, 0x2c, 0x01]);
        // 128 has the high bit set -> trailing zero
        assert_eq!(encode_height(128), vec![0x02, 0x80, 0x00]);
        // 840000 = 0x0cd140
        assert_eq!(encode_height(840_000), vec![0x03, 0x40, 0xd1, 0x0c]);
    }

    #[test]
    fn test_compact_size_encodings() {
        let mut buf = Vec::new();
        append_compact_size(&mut buf, 0xfc);
        assert_eq!(buf, vec![0xfc]);

        buf.clear();
        append_compact_size(&mut buf, 0xfd);
        assert_eq!(buf, vec![0xfd, 0xfd, 0x00]);

        buf.clear();
        append_compact_size(&mut buf, 0x10000);
        assert_eq!(buf, vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_coinbase_layout() {
        let tmpl = template(840_000);
        let parts = build_coinbase(&tmpl, chain::get("bch"), &HexScriptCodec, P2PKH, "/pool/", 8)
            .unwrap();

        // Reassemble with an 8-byte extranonce (en1 4 + en2 4)
        let tx = assemble(&parts, &"ab".repeat(8));

        // Version 2 LE
        assert_eq!(&tx[0..4], &[0x02, 0x00, 0x00, 0x00]);
        // Input count 1
        assert_eq!(tx[4], 0x01);
        // Null outpoint
        assert_eq!(&tx[5..37], &[0u8; 32]);
        assert_eq!(&tx[37..41], &[0xff; 4]);

        // scriptSig length byte covers height push + tag + extranonce
        let script_len = tx[41] as usize;
        let height_push = encode_height(840_000);
        assert_eq!(script_len, height_push.len() + "/pool/".len() + 8);
        // Height push comes first
        assert_eq!(&tx[42..42 + height_push.len()], &height_push[..]);

        // After the scriptSig: sequence
        let seq_off = 42 + script_len;
        assert_eq!(&tx[seq_off..seq_off + 4], &[0xff; 4]);

        // One output for a non-SegWit chain without mandatory outputs
        assert_eq!(tx[seq_off + 4], 0x01);
        // Payout value
        let value = u64::from_le_bytes(tx[seq_off + 5..seq_off + 13].try_into().unwrap());
        assert_eq!(value, 625_000_000);

        // Locktime closes the transaction
        assert_eq!(&tx[tx.len() - 4..], &[0x00; 4]);
    }

    #[test]
    fn test_witness_commitment_output() {
        let mut tmpl = template(840_000);
        tmpl.default_witness_commitment =
            format!("6a24aa21a9ed{}", "00".repeat(32));

        let parts =
            build_coinbase(&tmpl, chain::get("btc"), &HexScriptCodec, P2PKH, "", 8).unwrap();
        let tx = assemble(&parts, &"00".repeat(8));

        // Two outputs: payout + commitment
        let script_len = tx[41] as usize;
        let outputs_off = 42 + script_len + 4;
        assert_eq!(tx[outputs_off], 0x02);

        // The commitment output is zero-valued and carries the raw script
        let commitment = hex::decode(&tmpl.default_witness_commitment).unwrap();
        let hex_tx = hex::encode(&tx);
        assert!(hex_tx.contains(&hex::encode(&commitment)));
    }

    #[test]
    fn test_mandatory_outputs_reduce_payout() {
        use crate::node::{CoinbaseTxnInfo, PayoutScript};

        let mut tmpl = template(800_000);
        tmpl.coinbase_value = 312_500_000;
        tmpl.coinbase_txn = Some(CoinbaseTxnInfo {
            miner_fund: Some(MandatoryOutput {
                addresses: vec![],
                minimum_value: 100_000,
                payout_script: Some(PayoutScript {
                    hex: "76a914aa88ac".to_string(),
                }),
            }),
            staking_rewards: None,
        });

        let parts =
            build_coinbase(&tmpl, chain::get("xec"), &HexScriptCodec, P2PKH, "", 8).unwrap();
        let tx = assemble(&parts, &"00".repeat(8));

        let script_len = tx[41] as usize;
        let outputs_off = 42 + script_len + 4;
        assert_eq!(tx[outputs_off], 0x02);

        // Primary payout is reduced by the fund value
        let value = u64::from_le_bytes(tx[outputs_off + 1..outputs_off + 9].try_into().unwrap());
        assert_eq!(value, 312_500_000 - 100_000);
    }

    #[test]
    fn test_long_tag_truncated() {
        let tmpl = template(100);
        let tag = "x".repeat(200);
        let parts =
            build_coinbase(&tmpl, chain::get("bch"), &HexScriptCodec, P2PKH, &tag, 8).unwrap();
        let tx = assemble(&parts, &"00".repeat(8));

        let height_push = encode_height(100);
        assert_eq!(tx[41] as usize, height_push.len() + MAX_TAG_LEN + 8);
    }

    #[test]
    fn test_missing_payout_address() {
        let tmpl = template(100);
        let err = build_coinbase(&tmpl, chain::get("btc"), &HexScriptCodec, "", "", 8);
        assert!(err.is_err());
    }
}
