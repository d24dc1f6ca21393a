//! Mining job creation and tracking
//!
//! Solo jobs are built from a node block template: coinbase halves,
//! Stratum merkle branches, and big-endian hex header fields. Proxy jobs
//! store the upstream notify fields untouched. Either way the table is
//! bounded and evicts in issuance order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::coinbase::build_coinbase;
use super::protocol::JobParams;
use crate::chain::{AddressCodec, CoinDef};
use crate::core::{merkle_branches_for_stratum, stratum_prev_hash};
use crate::error::{Error, Result};
use crate::node::BlockTemplate;

/// Live-job window size.
const DEFAULT_MAX_JOBS: usize = 10;

/// A mining job as sent to miners via `mining.notify`. Immutable once
/// created.
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier: lowercase hex counter (solo) or opaque upstream id
    pub id: String,
    /// Issuance order, used for eviction and grace-period comparison
    pub seq: u64,
    /// Previous block hash in Stratum transport form
    pub prev_hash: String,
    /// Coinbase prefix, hex
    pub coinb1: String,
    /// Coinbase suffix, hex
    pub coinb2: String,
    /// Merkle branch hashes, internal order hex
    pub merkle_branches: Vec<String>,
    /// Block version, 8 hex chars big-endian
    pub version: String,
    /// Compact target, 8 hex chars
    pub nbits: String,
    /// Block time, 8 hex chars big-endian
    pub ntime: String,
    /// Whether the chain carries witness data in full blocks
    pub segwit: bool,
    /// Source template; present only in solo mode, needed to rebuild a
    /// full block on a block-win
    pub template: Option<Arc<BlockTemplate>>,
}

impl Job {
    /// Render the `mining.notify` params for this job.
    pub fn to_params(&self, clean_jobs: bool) -> JobParams {
        JobParams {
            job_id: self.id.clone(),
            prev_hash: self.prev_hash.clone(),
            coinb1: self.coinb1.clone(),
            coinb2: self.coinb2.clone(),
            merkle_branches: self.merkle_branches.clone(),
            version: self.version.clone(),
            nbits: self.nbits.clone(),
            ntime: self.ntime.clone(),
            clean_jobs,
        }
    }
}

/// Creates, registers, and evicts jobs.
pub struct JobManager {
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    max_jobs: usize,

    coin: &'static CoinDef,
    codec: Arc<dyn AddressCodec>,
    payout_address: RwLock<String>,
    coinbase_tag: String,
    extranonce2_size: usize,
}

impl JobManager {
    /// Create a manager for solo coinbase assembly. `extranonce2_size`
    /// is the per-miner EN2 width reserved in the coinbase.
    pub fn new(
        coin: &'static CoinDef,
        codec: Arc<dyn AddressCodec>,
        payout_address: impl Into<String>,
        coinbase_tag: impl Into<String>,
        extranonce2_size: usize,
    ) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            next_seq: AtomicU64::new(0),
            max_jobs: DEFAULT_MAX_JOBS,
            coin,
            codec,
            payout_address: RwLock::new(payout_address.into()),
            coinbase_tag: coinbase_tag.into(),
            extranonce2_size,
        }
    }

    /// Update the payout address used by future jobs.
    pub fn set_payout_address(&self, address: impl Into<String>) {
        *self.payout_address.write() = address.into();
    }

    /// The currently configured payout address.
    pub fn payout_address(&self) -> String {
        self.payout_address.read().clone()
    }

    /// Build a solo job from a block template.
    pub fn create_job(
        &self,
        tmpl: Arc<BlockTemplate>,
        extranonce1_size: usize,
    ) -> Result<Arc<Job>> {
        let payout_address = self.payout_address();

        let parts = build_coinbase(
            &tmpl,
            self.coin,
            self.codec.as_ref(),
            &payout_address,
            &self.coinbase_tag,
            extranonce1_size + self.extranonce2_size,
        )?;

        // TxIDs from getblocktemplate are in display order; reverse to
        // internal byte order before building the tree
        let mut tx_hashes = Vec::with_capacity(tmpl.transactions.len());
        for tx in &tmpl.transactions {
            let mut hash: [u8; 32] = hex::decode(&tx.txid)
                .map_err(|e| Error::invalid_hex("txid", e.to_string()))?
                .try_into()
                .map_err(|v: Vec<u8>| Error::invalid_length("txid", 32, v.len()))?;
            hash.reverse();
            tx_hashes.push(hash);
        }
        let branches: Vec<String> = merkle_branches_for_stratum(&tx_hashes)
            .into_iter()
            .map(hex::encode)
            .collect();

        let id = format!("{:x}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let job = Arc::new(Job {
            id: id.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            prev_hash: stratum_prev_hash(&tmpl.previous_block_hash)?,
            coinb1: parts.coinb1,
            coinb2: parts.coinb2,
            merkle_branches: branches,
            version: format!("{:08x}", tmpl.version as u32),
            nbits: tmpl.bits.clone(),
            ntime: format!("{:08x}", tmpl.cur_time as u32),
            segwit: self.coin.segwit,
            template: Some(tmpl),
        });

        self.insert(job.clone(), false);
        Ok(job)
    }

    /// Register a job from raw upstream notify fields. No coinbase or
    /// merkle work happens here; the upstream values pass through.
    pub fn register_upstream_job(&self, params: &JobParams) -> Arc<Job> {
        let job = Arc::new(Job {
            id: params.job_id.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            prev_hash: params.prev_hash.clone(),
            coinb1: params.coinb1.clone(),
            coinb2: params.coinb2.clone(),
            merkle_branches: params.merkle_branches.clone(),
            version: params.version.clone(),
            nbits: params.nbits.clone(),
            ntime: params.ntime.clone(),
            segwit: false,
            template: None,
        });

        self.insert(job.clone(), params.clean_jobs);
        job
    }

    fn insert(&self, job: Arc<Job>, clean_jobs: bool) {
        let mut jobs = self.jobs.lock();
        if clean_jobs {
            jobs.clear();
        }
        let new_id = job.id.clone();
        jobs.insert(new_id.clone(), job);

        // Evict the oldest issued job, never the one just inserted
        while jobs.len() > self.max_jobs {
            let oldest = jobs
                .values()
                .filter(|j| j.id != new_id)
                .min_by_key(|j| j.seq)
                .map(|j| j.id.clone());
            match oldest {
                Some(id) => {
                    debug!(job_id = %id, "evicting oldest job");
                    jobs.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Look up a live job.
    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.lock().get(id).cloned()
    }

    /// Ids of all live jobs.
    pub fn active_ids(&self) -> HashSet<String> {
        self.jobs.lock().keys().cloned().collect()
    }

    /// Number of live jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Wipe the table.
    pub fn clean(&self) {
        self.jobs.lock().clear();
    }
}
