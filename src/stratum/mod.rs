//! Stratum V1 mining server
//!
//! Job construction, share validation, per-session vardiff, the
//! miner-facing line protocol, and the TCP server that ties them
//! together.

mod coinbase;
mod job;
mod protocol;
mod server;
mod session;
mod share;
mod vardiff;

pub use coinbase::{build_coinbase, encode_height, CoinbaseParts};
pub use job::{Job, JobManager};
pub use protocol::{
    encode_notification, encode_response, param_f64, param_job_id, param_str, parse_request,
    JobParams, StratumError, StratumErrorCode, StratumRequest,
};
pub use server::{
    MiningConfig, ProxyState, ServerEvents, ShareForward, ShareForwardHandler, StratumConfig,
    StratumServer,
};
pub use session::{MinerInfo, Session, DEFAULT_VERSION_MASK};
pub use share::{ShareOutcome, ShareSubmission, ShareValidator};
pub use vardiff::{VardiffConfig, VardiffController, VardiffState};
