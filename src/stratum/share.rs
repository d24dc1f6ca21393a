//! Share validation
//!
//! Rebuilds the exact 80-byte header a miner hashed from the job plus its
//! submission, hashes it, and scores the result. Duplicate fingerprints
//! are tracked per job. When the hash meets the network target the full
//! block is reconstructed (SegWit-aware) for submission.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::job::{Job, JobManager};
use super::protocol::{StratumError, StratumErrorCode};
use crate::core::{
    build_block_header, compact_to_target, compute_merkle_root, double_sha256, hash_to_int,
    reversed, share_difficulty,
};

/// Fields of one `mining.submit`, normalized by the session.
#[derive(Debug, Clone)]
pub struct ShareSubmission {
    /// Worker name from param 0
    pub worker_name: String,
    /// Job id (numeric forms already rendered as hex)
    pub job_id: String,
    /// Extranonce2 hex, already padded/truncated to the session width
    pub extranonce2: String,
    /// Block time, 8 hex chars
    pub ntime: String,
    /// Header nonce, 8 hex chars
    pub nonce: String,
    /// Version-rolling bits from param 5, when negotiated
    pub version_bits: Option<String>,
    /// The session's negotiated rolling mask (zero disables rolling)
    pub version_mask: u32,
}

/// Outcome of a valid share.
#[derive(Debug, Clone)]
pub struct ShareOutcome {
    /// Issuance order of the job the share was mined on
    pub job_seq: u64,
    /// Share difficulty (pdiff1 / hash)
    pub difficulty: f64,
    /// Whether the hash meets the network target
    pub block_found: bool,
    /// Block hash in display order (set when `block_found`)
    pub block_hash: String,
    /// Full serialized block hex (solo mode only, set when `block_found`)
    pub block_hex: String,
    /// Template height (solo mode), 0 for upstream jobs
    pub height: i64,
}

/// Validates submissions against live jobs.
///
/// For a solo pool no share is rejected for low difficulty: any hash
/// meeting the network target wins the block regardless of what session
/// difficulty it was mined at.
pub struct ShareValidator {
    jobs: Arc<JobManager>,
    duplicates: Mutex<HashMap<String, HashSet<String>>>,
}

impl ShareValidator {
    /// Create a validator over the given job table.
    pub fn new(jobs: Arc<JobManager>) -> Self {
        Self {
            jobs,
            duplicates: Mutex::new(HashMap::new()),
        }
    }

    /// Validate one submission.
    pub fn validate(
        &self,
        extranonce1: &str,
        sub: &ShareSubmission,
    ) -> Result<ShareOutcome, StratumError> {
        let job = self
            .jobs
            .get(&sub.job_id)
            .ok_or_else(|| StratumError::new(StratumErrorCode::StaleJob, "job not found"))?;

        // Fingerprint includes version bits so version-rolling miners
        // exploring the same (en2, ntime, nonce) point are distinct
        let fingerprint = format!(
            "{}{}{}{}",
            sub.extranonce2,
            sub.ntime,
            sub.nonce,
            sub.version_bits.as_deref().unwrap_or("")
        );
        {
            let mut duplicates = self.duplicates.lock();
            let seen = duplicates.entry(sub.job_id.clone()).or_default();
            if !seen.insert(fingerprint) {
                return Err(StratumError::new(
                    StratumErrorCode::Duplicate,
                    "duplicate share",
                ));
            }
        }

        // Reassemble the coinbase exactly as the miner hashed it
        let coinbase_hex = format!(
            "{}{}{}{}",
            job.coinb1, extranonce1, sub.extranonce2, job.coinb2
        );
        let coinbase = hex::decode(&coinbase_hex)
            .map_err(|_| StratumError::new(StratumErrorCode::Other, "invalid coinbase hex"))?;
        let coinbase_hash = double_sha256(&coinbase);

        let mut branches = Vec::with_capacity(job.merkle_branches.len());
        for branch_hex in &job.merkle_branches {
            let branch: [u8; 32] = hex::decode(branch_hex)
                .map_err(|_| StratumError::new(StratumErrorCode::Other, "invalid merkle branch"))?
                .try_into()
                .map_err(|_| StratumError::new(StratumErrorCode::Other, "invalid merkle branch"))?;
            branches.push(branch);
        }
        let merkle_root = compute_merkle_root(coinbase_hash, &branches);

        let header = build_block_header(
            &job.version,
            &job.prev_hash,
            &merkle_root,
            &sub.ntime,
            &job.nbits,
            &sub.nonce,
            sub.version_bits.as_deref(),
            sub.version_mask,
        )
        .map_err(|e| StratumError::new(StratumErrorCode::Other, format!("build header: {}", e)))?;

        let hash = double_sha256(&header);
        let hash_int = hash_to_int(&hash);
        let difficulty = share_difficulty(&hash_int);

        let mut outcome = ShareOutcome {
            job_seq: job.seq,
            difficulty,
            block_found: false,
            block_hash: String::new(),
            block_hex: String::new(),
            height: job.template.as_ref().map_or(0, |t| t.height),
        };

        let network_target = compact_to_target(&job.nbits);
        if hash_int <= network_target {
            outcome.block_found = true;
            outcome.block_hash = hex::encode(reversed(&hash));
            if job.template.is_some() {
                match build_full_block(&job, &coinbase, &header) {
                    Ok(block_hex) => outcome.block_hex = block_hex,
                    Err(e) => debug!(error = %e.message, "full block reconstruction failed"),
                }
            }
        }

        Ok(outcome)
    }

    /// Drop duplicate tracking for jobs no longer live.
    pub fn clean_duplicates(&self, keep: &HashSet<String>) {
        self.duplicates.lock().retain(|id, _| keep.contains(id));
    }

    /// Number of jobs with duplicate tracking (test visibility).
    pub fn tracked_jobs(&self) -> usize {
        self.duplicates.lock().len()
    }
}

/// Serialize the complete block: header, tx count, coinbase, template
/// transactions.
///
/// For SegWit chains the stripped coinbase gets its marker/flag and the
/// reserved-value witness stack re-inserted:
/// `version(4) || 00 01 || body || 01 20 || 32*00 || locktime(4)`.
fn build_full_block(
    job: &Job,
    coinbase: &[u8],
    header: &[u8; 80],
) -> Result<String, StratumError> {
    let template = job
        .template
        .as_ref()
        .ok_or_else(|| StratumError::new(StratumErrorCode::Other, "no template for job"))?;

    let mut block = Vec::with_capacity(coinbase.len() + 128);
    block.extend_from_slice(header);

    super::coinbase::append_compact_size(&mut block, 1 + template.transactions.len() as u64);

    if job.segwit {
        if coinbase.len() < 8 {
            return Err(StratumError::new(
                StratumErrorCode::Other,
                "coinbase too short",
            ));
        }
        let version = &coinbase[0..4];
        let body = &coinbase[4..coinbase.len() - 4];
        let locktime = &coinbase[coinbase.len() - 4..];

        block.extend_from_slice(version);
        block.extend_from_slice(&[0x00, 0x01]); // SegWit marker + flag
        block.extend_from_slice(body);
        block.push(0x01); // one witness stack item
        block.push(0x20); // 32 bytes
        block.extend_from_slice(&[0u8; 32]); // reserved value
        block.extend_from_slice(locktime);
    } else {
        block.extend_from_slice(coinbase);
    }

    for tx in &template.transactions {
        let tx_bytes = hex::decode(&tx.data)
            .map_err(|_| StratumError::new(StratumErrorCode::Other, "invalid template tx hex"))?;
        block.extend_from_slice(&tx_bytes);
    }

    Ok(hex::encode(block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{self, HexScriptCodec};
    use crate::node::BlockTemplate;

    const P2PKH: &str = "76a914000102030405060708090a0b0c0d0e0f1011121388ac";
    const EN1: &str = "00000001";

    /// nBits whose target exceeds every 256-bit hash: exponent 0x23,
    /// mantissa 1 -> target = 1 << 256. Every share is a block.
    const ALWAYS_WIN_BITS: &str = "23000001";
    /// Target of 1: no real hash can meet it.
    const NEVER_WIN_BITS: &str = "03000001";

    fn setup(bits: &str, coin: &'static str) -> (Arc<JobManager>, ShareValidator, Arc<Job>) {
        let jm = Arc::new(JobManager::new(
            chain::get(coin),
            Arc::new(HexScriptCodec),
            P2PKH,
            "/pool/",
            4,
        ));
        let tmpl = Arc::new(BlockTemplate {
            version: 0x2000_0000,
            previous_block_hash:
                "000000000000000000021a2b3c4d5e6f000000000000000000000000aabbccdd".to_string(),
            coinbase_value: 625_000_000,
            cur_time: 1_700_000_600,
            bits: bits.to_string(),
            height: 840_000,
            ..Default::default()
        });
        let job = jm.create_job(tmpl, 4).unwrap();
        let validator = ShareValidator::new(jm.clone());
        (jm, validator, job)
    }

    fn submission(job_id: &str, nonce: &str) -> ShareSubmission {
        ShareSubmission {
            worker_name: "worker".to_string(),
            job_id: job_id.to_string(),
            extranonce2: "00000000".to_string(),
            ntime: "65abcdef".to_string(),
            nonce: nonce.to_string(),
            version_bits: None,
            version_mask: 0,
        }
    }

    #[test]
    fn test_stale_job_rejected() {
        let (_jm, validator, _job) = setup(NEVER_WIN_BITS, "btc");
        let err = validator.validate(EN1, &submission("ffff", "00000000")).unwrap_err();
        assert_eq!(err.code, StratumErrorCode::StaleJob);
    }

    #[test]
    fn test_duplicate_detected_by_fingerprint() {
        let (_jm, validator, job) = setup(NEVER_WIN_BITS, "btc");

        validator.validate(EN1, &submission(&job.id, "00000001")).unwrap();
        let err = validator
            .validate(EN1, &submission(&job.id, "00000001"))
            .unwrap_err();
        assert_eq!(err.code, StratumErrorCode::Duplicate);

        // A different nonce is a different fingerprint
        validator.validate(EN1, &submission(&job.id, "00000002")).unwrap();

        // Same nonce with version bits is also distinct
        let mut rolled = submission(&job.id, "00000001");
        rolled.version_bits = Some("1fffe000".to_string());
        rolled.version_mask = 0x1fffe000;
        validator.validate(EN1, &rolled).unwrap();
    }

    #[test]
    fn test_share_scored_but_no_block_on_hard_target() {
        let (_jm, validator, job) = setup(NEVER_WIN_BITS, "btc");
        let outcome = validator.validate(EN1, &submission(&job.id, "12345678")).unwrap();
        assert!(outcome.difficulty > 0.0);
        assert!(!outcome.block_found);
        assert!(outcome.block_hex.is_empty());
        assert_eq!(outcome.job_seq, job.seq);
    }

    #[test]
    fn test_block_found_reconstructs_segwit_block() {
        let (_jm, validator, job) = setup(ALWAYS_WIN_BITS, "btc");
        let outcome = validator.validate(EN1, &submission(&job.id, "deadbeef")).unwrap();

        assert!(outcome.block_found);
        assert_eq!(outcome.block_hash.len(), 64);
        assert_eq!(outcome.height, 840_000);
        assert!(!outcome.block_hex.is_empty());

        let block = hex::decode(&outcome.block_hex).unwrap();
        // Header (80) then tx count (1)
        assert_eq!(block[80], 0x01);
        // Coinbase version then SegWit marker/flag
        assert_eq!(&block[81..85], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&block[85..87], &[0x00, 0x01]);
        // Witness stack (01 20 || 32 zeros) sits before the locktime
        let tail = &block[block.len() - 38..];
        assert_eq!(tail[0], 0x01);
        assert_eq!(tail[1], 0x20);
        assert_eq!(&tail[2..34], &[0u8; 32]);
        assert_eq!(&tail[34..], &[0x00; 4]);
    }

    #[test]
    fn test_block_found_non_segwit_passes_coinbase_through() {
        let (_jm, validator, job) = setup(ALWAYS_WIN_BITS, "bch");
        let outcome = validator.validate(EN1, &submission(&job.id, "deadbeef")).unwrap();

        assert!(outcome.block_found);
        let block = hex::decode(&outcome.block_hex).unwrap();
        assert_eq!(block[80], 0x01);
        // Stripped coinbase directly after the count: version 2 then input count
        assert_eq!(&block[81..85], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(block[85], 0x01);
        // No marker/flag: next is the null outpoint
        assert_eq!(&block[86..118], &[0u8; 32]);
    }

    #[test]
    fn test_header_hash_matches_block_hash() {
        // The reported display-order block hash must be the double-SHA256
        // of the header we rebuilt, reversed
        let (_jm, validator, job) = setup(ALWAYS_WIN_BITS, "btc");
        let outcome = validator.validate(EN1, &submission(&job.id, "deadbeef")).unwrap();

        let block = hex::decode(&outcome.block_hex).unwrap();
        let header: [u8; 80] = block[0..80].try_into().unwrap();
        let hash = double_sha256(&header);
        assert_eq!(outcome.block_hash, hex::encode(reversed(&hash)));
    }

    #[test]
    fn test_malformed_extranonce2_is_other_error() {
        let (_jm, validator, job) = setup(NEVER_WIN_BITS, "btc");
        let mut sub = submission(&job.id, "00000000");
        sub.extranonce2 = "zzzz".to_string();
        let err = validator.validate(EN1, &sub).unwrap_err();
        assert_eq!(err.code, StratumErrorCode::Other);
    }

    #[test]
    fn test_clean_duplicates_drops_dead_jobs() {
        let (jm, validator, job) = setup(NEVER_WIN_BITS, "btc");
        validator.validate(EN1, &submission(&job.id, "00000001")).unwrap();
        assert_eq!(validator.tracked_jobs(), 1);

        jm.clean();
        validator.clean_duplicates(&jm.active_ids());
        assert_eq!(validator.tracked_jobs(), 0);

        // After cleanup the same fingerprint would be fresh again, but
        // the job is gone so it reports stale instead
        let err = validator
            .validate(EN1, &submission(&job.id, "00000001"))
            .unwrap_err();
        assert_eq!(err.code, StratumErrorCode::StaleJob);
    }
}
