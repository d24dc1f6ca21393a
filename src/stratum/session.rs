//! Per-connection miner session
//!
//! One task per TCP connection: a line-oriented read loop whose deadline
//! doubles as the vardiff pulse, a JSON-RPC dispatcher for the handshake
//! state machine (`configure? -> subscribe -> authorize -> submit`), and
//! the submit path that validates shares, applies vardiff with a
//! grace-period window across difficulty changes, forwards qualifying
//! shares upstream in proxy mode, and submits found blocks in solo mode.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, error, info, warn};

use super::protocol::{
    encode_notification, encode_response, param_f64, param_job_id, param_str, parse_request,
    StratumError, StratumErrorCode, StratumRequest,
};
use super::server::{ServerInner, ShareForward};
use super::share::ShareSubmission;
use super::vardiff::VardiffState;
use crate::stratum::job::Job;

/// Standard BIP320 version-rolling mask offered in solo mode.
pub const DEFAULT_VERSION_MASK: u32 = 0x1fffe000;

/// Outbound write deadline.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sessions with no traffic at all for this long are dropped.
const IDLE_DISCONNECT: Duration = Duration::from_secs(300);

/// Public snapshot of a session for dashboards and callbacks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerInfo {
    /// Session id (`s_<extranonce1>`)
    pub id: String,
    /// Authorized worker name
    pub worker_name: String,
    /// Miner user-agent from subscribe
    pub user_agent: String,
    /// Remote address
    pub ip_address: String,
    /// Connect time, unix seconds
    pub connected_at: u64,
    /// Current session difficulty
    pub current_diff: f64,
    /// Accepted share count
    pub shares_accepted: u64,
    /// Rejected share count
    pub shares_rejected: u64,
    /// Best share difficulty seen
    pub best_difficulty: f64,
}

pub(crate) struct SessionState {
    pub(crate) extranonce1: String,
    pub(crate) subscribed: bool,
    pub(crate) authorized: bool,
    pub(crate) extranonce_subscribed: bool,
    pub(crate) worker_name: String,
    pub(crate) user_agent: String,
    pub(crate) current_diff: f64,
    pub(crate) suggested_diff: f64,
    /// Difficulty before the most recent change (grace-period window)
    pub(crate) old_diff: f64,
    /// Issuance order of the job current at the change
    pub(crate) diff_change_seq: Option<u64>,
    /// Negotiated version-rolling mask; zero disables rolling
    pub(crate) version_mask: u32,
    pub(crate) vardiff: VardiffState,
    pub(crate) shares_accepted: u64,
    pub(crate) shares_rejected: u64,
    pub(crate) best_difficulty: f64,
    pub(crate) last_activity: Instant,
}

/// A single miner connection.
pub struct Session {
    /// Session identifier, also the subscription id on the wire
    pub id: String,
    remote_addr: SocketAddr,
    connected_at: SystemTime,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pub(crate) state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(
        id: String,
        remote_addr: SocketAddr,
        writer: OwnedWriteHalf,
        extranonce1: String,
        start_diff: f64,
        vardiff: VardiffState,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            remote_addr,
            connected_at: SystemTime::now(),
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(SessionState {
                extranonce1,
                subscribed: false,
                authorized: false,
                extranonce_subscribed: false,
                worker_name: String::new(),
                user_agent: String::new(),
                current_diff: start_diff,
                suggested_diff: 0.0,
                old_diff: 0.0,
                diff_change_seq: None,
                version_mask: 0,
                vardiff,
                shares_accepted: 0,
                shares_rejected: 0,
                best_difficulty: 0.0,
                last_activity: Instant::now(),
            }),
        })
    }

    /// Whether `mining.authorize` completed.
    pub fn is_authorized(&self) -> bool {
        self.state.lock().authorized
    }

    /// The session's assigned extranonce1.
    pub fn extranonce1(&self) -> String {
        self.state.lock().extranonce1.clone()
    }

    pub(crate) fn supports_set_extranonce(&self) -> bool {
        self.state.lock().extranonce_subscribed
    }

    pub(crate) fn set_extranonce1(&self, extranonce1: String) {
        self.state.lock().extranonce1 = extranonce1;
    }

    /// Snapshot for dashboards and callbacks.
    pub fn to_miner_info(&self) -> MinerInfo {
        let state = self.state.lock();
        MinerInfo {
            id: self.id.clone(),
            worker_name: state.worker_name.clone(),
            user_agent: state.user_agent.clone(),
            ip_address: self.remote_addr.to_string(),
            connected_at: self
                .connected_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            current_diff: state.current_diff,
            shares_accepted: state.shares_accepted,
            shares_rejected: state.shares_rejected,
            best_difficulty: state.best_difficulty,
        }
    }

    /// Main read loop. Returns when the connection dies or the server
    /// shuts down; the caller removes the session from the registry.
    pub(crate) async fn run(&self, server: &Arc<ServerInner>, reader: OwnedReadHalf) {
        let mut reader = BufReader::with_capacity(4096, reader);
        let mut line = String::new();

        loop {
            if !server.is_running() {
                return;
            }
            line.clear();

            // The retarget interval doubles as the read deadline so idle
            // sessions still pulse vardiff
            let deadline = server.vardiff.retarget_interval();
            let read = tokio::select! {
                _ = server.shutdown.notified() => return,
                r = tokio::time::timeout(deadline, reader.read_line(&mut line)) => r,
            };

            match read {
                Err(_) => {
                    // Read deadline: no message, maybe no miner either
                    let idle = self.state.lock().last_activity.elapsed();
                    if idle > IDLE_DISCONNECT {
                        info!(session = %self.id, "disconnecting idle session");
                        return;
                    }
                    self.idle_retarget(server).await;
                    continue;
                }
                Ok(Ok(0)) => {
                    debug!(session = %self.id, "connection closed by miner");
                    return;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(session = %self.id, error = %e, "read error");
                    return;
                }
            }

            self.state.lock().last_activity = Instant::now();

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request = match parse_request(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    debug!(session = %self.id, error = %e, "bad request line");
                    continue;
                }
            };

            self.handle_request(server, request).await;
        }
    }

    async fn handle_request(&self, server: &Arc<ServerInner>, req: StratumRequest) {
        match req.method.as_str() {
            "mining.configure" => self.handle_configure(server, req).await,
            "mining.subscribe" => self.handle_subscribe(server, req).await,
            "mining.authorize" => self.handle_authorize(server, req).await,
            "mining.submit" => self.handle_submit(server, req).await,
            "mining.suggest_difficulty" => self.handle_suggest_difficulty(server, req).await,
            "mining.extranonce.subscribe" => {
                self.state.lock().extranonce_subscribed = true;
                self.send_response(&req.id, json!(true), None).await;
            }
            other => {
                debug!(session = %self.id, method = other, "unknown method");
                self.send_response(
                    &req.id,
                    Value::Null,
                    Some(&StratumError::new(StratumErrorCode::Other, "unknown method")),
                )
                .await;
            }
        }
    }

    /// `mining.configure`: extension negotiation (BIP310).
    async fn handle_configure(&self, server: &Arc<ServerInner>, req: StratumRequest) {
        let extensions: Vec<String> = req
            .params
            .first()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let ext_params = req
            .params
            .get(1)
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();

        let mut result = serde_json::Map::new();

        for ext in &extensions {
            match ext.as_str() {
                "version-rolling" => {
                    // In proxy mode local miners are constrained to the
                    // upstream-negotiated mask so forwarded shares don't
                    // trip mask-violation rejections upstream. A zero
                    // upstream mask means the feature isn't available.
                    let proxy = server.proxy_state();
                    let pool_mask = match &proxy {
                        Some(p) if p.version_mask == 0 => {
                            result.insert("version-rolling".to_string(), json!(false));
                            info!(session = %self.id, "version-rolling denied (upstream lacks it)");
                            continue;
                        }
                        Some(p) => p.version_mask,
                        None => DEFAULT_VERSION_MASK,
                    };

                    let mut mask = pool_mask;
                    if let Some(requested) = ext_params
                        .get("version-rolling.mask")
                        .and_then(|v| v.as_str())
                    {
                        if let Ok(bytes) = hex::decode(requested) {
                            if let Ok(arr) = <[u8; 4]>::try_from(bytes.as_slice()) {
                                mask = pool_mask & u32::from_be_bytes(arr);
                            }
                        }
                    }

                    self.state.lock().version_mask = mask;
                    result.insert("version-rolling".to_string(), json!(true));
                    result.insert(
                        "version-rolling.mask".to_string(),
                        json!(format!("{:08x}", mask)),
                    );
                    info!(session = %self.id, mask = %format!("{:08x}", mask), "version-rolling enabled");
                }
                "minimum-difficulty" => {
                    let value = ext_params
                        .get("minimum-difficulty.value")
                        .and_then(|v| v.as_f64())
                        .filter(|v| *v > 0.0);
                    match value {
                        Some(mut min_diff) => {
                            let config = server.vardiff.config();
                            min_diff = min_diff.max(config.min_diff);
                            if config.max_diff > 0.0 {
                                min_diff = min_diff.min(config.max_diff);
                            }
                            self.state.lock().current_diff = min_diff;
                            result.insert("minimum-difficulty".to_string(), json!(true));
                            info!(session = %self.id, diff = min_diff, "minimum-difficulty set");
                        }
                        None => {
                            result.insert("minimum-difficulty".to_string(), json!(false));
                        }
                    }
                }
                other => {
                    result.insert(other.to_string(), json!(false));
                }
            }
        }

        self.send_response(&req.id, Value::Object(result), None).await;

        let current_diff = self.state.lock().current_diff;
        if current_diff != server.vardiff.start_diff() {
            self.send_set_difficulty(current_diff).await;
        }
    }

    /// `mining.subscribe`: reply subscriptions + extranonce1 + EN2 size.
    async fn handle_subscribe(&self, server: &Arc<ServerInner>, req: StratumRequest) {
        let user_agent = param_str(&req.params, 0).unwrap_or_default();

        let (extranonce1, current_diff) = {
            let mut state = self.state.lock();
            state.subscribed = true;
            if !user_agent.is_empty() {
                state.user_agent = user_agent.clone();
                // UA-based start difficulty, unless an explicit
                // suggest_difficulty already took priority
                if state.suggested_diff == 0.0 {
                    let ua_diff = server.vardiff.start_diff_for_user_agent(&user_agent);
                    if ua_diff != state.current_diff {
                        info!(session = %self.id, ua = %user_agent, diff = ua_diff, "user-agent start difficulty");
                        state.current_diff = ua_diff;
                    }
                }
            }
            (state.extranonce1.clone(), state.current_diff)
        };

        let result = json!([
            [
                ["mining.set_difficulty", self.id.clone()],
                ["mining.notify", self.id.clone()],
            ],
            extranonce1.clone(),
            server.extranonce2_size(),
        ]);
        self.send_response(&req.id, result, None).await;
        self.send_set_difficulty(current_diff).await;

        info!(
            session = %self.id,
            remote = %self.remote_addr,
            extranonce1 = %extranonce1,
            ua = %user_agent,
            "miner subscribed"
        );
    }

    /// `mining.authorize`: record the worker and start feeding it work.
    async fn handle_authorize(&self, server: &Arc<ServerInner>, req: StratumRequest) {
        if !self.state.lock().subscribed {
            self.send_response(
                &req.id,
                json!(false),
                Some(&StratumError::new(
                    StratumErrorCode::NotSubscribed,
                    "not subscribed",
                )),
            )
            .await;
            return;
        }

        let worker_name = param_str(&req.params, 0).unwrap_or_default();
        if worker_name.is_empty() {
            self.send_response(
                &req.id,
                json!(false),
                Some(&StratumError::new(
                    StratumErrorCode::Unauthorized,
                    "empty worker name",
                )),
            )
            .await;
            return;
        }

        {
            let mut state = self.state.lock();
            state.worker_name = worker_name.clone();
            state.authorized = true;
        }

        self.send_response(&req.id, json!(true), None).await;
        info!(session = %self.id, worker = %worker_name, remote = %self.remote_addr, "miner authorized");

        if server.is_proxy() {
            // Sessions track the upstream pool's difficulty; local
            // vardiff is disabled in proxy mode
            let upstream_diff = server.upstream_difficulty();
            if upstream_diff > 0.0 {
                self.state.lock().current_diff = upstream_diff;
                self.send_set_difficulty(upstream_diff).await;
            }
        } else {
            // Restore the worker's last known difficulty, unless
            // configure/suggest already picked one
            let restored = {
                let events = server.events.read();
                events
                    .lookup_worker_diff
                    .as_ref()
                    .and_then(|lookup| lookup(&worker_name))
            };
            if let Some(mut stored) = restored.filter(|d| *d > 0.0) {
                let config = server.vardiff.config();
                stored = stored.max(config.min_diff);
                if config.max_diff > 0.0 {
                    stored = stored.min(config.max_diff);
                }
                let apply = {
                    let mut state = self.state.lock();
                    if state.current_diff == server.vardiff.start_diff() {
                        state.current_diff = stored;
                        true
                    } else {
                        false
                    }
                };
                if apply {
                    self.send_set_difficulty(stored).await;
                    info!(worker = %worker_name, diff = stored, "restored worker difficulty");
                }
            }
        }

        {
            let events = server.events.read();
            if let Some(cb) = &events.on_miner_connected {
                cb(self.to_miner_info());
            }
        }

        server.send_current_job(self).await;
    }

    /// `mining.submit`: the critical path.
    async fn handle_submit(&self, server: &Arc<ServerInner>, req: StratumRequest) {
        if !self.state.lock().authorized {
            self.send_response(
                &req.id,
                json!(false),
                Some(&StratumError::new(
                    StratumErrorCode::Unauthorized,
                    "not authorized",
                )),
            )
            .await;
            return;
        }

        let worker = param_str(&req.params, 0).unwrap_or_default();
        let job_id = param_job_id(&req.params, 1).unwrap_or_default();
        let mut extranonce2 = param_str(&req.params, 2).unwrap_or_default();
        let ntime = param_str(&req.params, 3).unwrap_or_default();
        let nonce = param_str(&req.params, 4).unwrap_or_default();
        let version_bits = param_str(&req.params, 5).filter(|s| !s.is_empty());

        // Fix extranonce2 width: silently pad or truncate broken
        // firmware instead of rejecting
        let expected_len = server.extranonce2_size() * 2;
        if extranonce2.len() != expected_len {
            if extranonce2.len() > expected_len {
                debug!(session = %self.id, from = extranonce2.len(), to = expected_len, "truncated extranonce2");
                extranonce2.truncate(expected_len);
            } else if !extranonce2.is_empty() {
                debug!(session = %self.id, en2 = %extranonce2, "padding extranonce2");
                extranonce2 = format!("{:0>width$}", extranonce2, width = expected_len);
            }
        }

        let (extranonce1, version_mask, worker_name) = {
            let state = self.state.lock();
            (
                state.extranonce1.clone(),
                state.version_mask,
                state.worker_name.clone(),
            )
        };

        let submission = ShareSubmission {
            worker_name: worker,
            job_id: job_id.clone(),
            extranonce2: extranonce2.clone(),
            ntime: ntime.clone(),
            nonce: nonce.clone(),
            version_bits: version_bits.clone(),
            version_mask,
        };

        debug!(
            session = %self.id,
            job = %job_id,
            en1 = %extranonce1,
            en2 = %extranonce2,
            ntime = %ntime,
            nonce = %nonce,
            vbits = version_bits.as_deref().unwrap_or(""),
            "share submit"
        );

        let outcome = match server.validator.validate(&extranonce1, &submission) {
            Err(stratum_err) => {
                self.send_response(&req.id, json!(false), Some(&stratum_err)).await;

                // Duplicates are normal ASIC result-buffer re-reads:
                // reply with the error but don't count a rejection or
                // fire the reject callback
                if stratum_err.code == StratumErrorCode::Duplicate {
                    debug!(session = %self.id, job = %job_id, nonce = %nonce, "duplicate share");
                    return;
                }

                self.state.lock().shares_rejected += 1;
                {
                    let events = server.events.read();
                    if let Some(cb) = &events.on_share_rejected {
                        cb(&self.id, &stratum_err.message);
                    }
                }
                info!(
                    session = %self.id,
                    worker = %worker_name,
                    job = %job_id,
                    reason = %stratum_err.message,
                    "share rejected"
                );
                return;
            }
            Ok(outcome) => outcome,
        };

        {
            let mut state = self.state.lock();
            state.shares_accepted += 1;
            if outcome.difficulty > state.best_difficulty {
                state.best_difficulty = outcome.difficulty;
            }
        }
        self.send_response(&req.id, json!(true), None).await;

        // Difficulty the share must meet: upstream's in proxy mode; in
        // solo mode the pre-change difficulty applies to jobs issued
        // before the change (the grace-period window)
        let (meets_target, current_diff) = {
            let state = self.state.lock();
            let effective = if server.is_proxy() {
                server.upstream_difficulty().max(0.0)
            } else {
                match (state.old_diff > 0.0, state.diff_change_seq) {
                    (true, Some(change_seq)) if outcome.job_seq <= change_seq => state.old_diff,
                    _ => state.current_diff,
                }
            };
            (outcome.difficulty >= effective, state.current_diff)
        };

        if meets_target {
            let mut state = self.state.lock();
            server.vardiff.record_qualifying_share(&mut state.vardiff);
        }

        // Local vardiff runs in solo mode only; proxy sessions are
        // pinned to the upstream difficulty
        if !server.is_proxy() {
            self.apply_retarget(server).await;
        }

        {
            let events = server.events.read();
            if let Some(cb) = &events.on_share_accepted {
                let hashrate_diff = if meets_target {
                    outcome.difficulty.min(current_diff)
                } else {
                    0.0
                };
                cb(&self.id, hashrate_diff, outcome.difficulty);
            }
        }

        // Proxy forwarding: qualifying shares that also meet the
        // upstream difficulty go up with the full extranonce2 (miner
        // prefix prepended)
        if let Some(proxy) = server.proxy_state() {
            if meets_target && outcome.difficulty >= server.upstream_difficulty() {
                let miner_prefix = extranonce1
                    .strip_prefix(proxy.upstream_en1.as_str())
                    .unwrap_or_default()
                    .to_string();
                let full_en2 = format!("{}{}", miner_prefix, extranonce2);

                let forward = {
                    let events = server.events.read();
                    events.on_share_forward.as_ref().map(|f| {
                        f(ShareForward {
                            worker: worker_name.clone(),
                            job_id: job_id.clone(),
                            extranonce2: full_en2,
                            ntime: ntime.clone(),
                            nonce: nonce.clone(),
                            version_bits: version_bits.clone(),
                        })
                    })
                };
                if let Some(forward) = forward {
                    let (accepted, reason) = forward.await;
                    if accepted {
                        debug!(session = %self.id, job = %job_id, "share forwarded upstream");
                    } else {
                        info!(session = %self.id, worker = %worker_name, reason = %reason, "upstream rejected share");
                    }
                }
            }
        }

        if outcome.block_found {
            self.handle_block_found(server, &worker_name, &outcome).await;
        }
    }

    async fn handle_block_found(
        &self,
        server: &Arc<ServerInner>,
        worker_name: &str,
        outcome: &super::share::ShareOutcome,
    ) {
        if server.is_proxy() {
            // The share already went upstream; the pool owns submission
            info!(
                worker = %worker_name,
                hash = %outcome.block_hash,
                "BLOCK CANDIDATE (forwarded upstream)"
            );
            let events = server.events.read();
            if let Some(cb) = &events.on_block_found {
                cb(&outcome.block_hash, 0, true);
            }
            return;
        }

        info!(
            worker = %worker_name,
            hash = %outcome.block_hash,
            height = outcome.height,
            "BLOCK CANDIDATE - submitting to node"
        );

        let mut accepted = false;
        match (&server.node, outcome.block_hex.is_empty()) {
            (Some(node), false) => {
                let node = Arc::clone(node);
                match node.submit_block(&outcome.block_hex).await {
                    Ok(()) => {
                        info!(hash = %outcome.block_hash, height = outcome.height, "BLOCK ACCEPTED by node");
                        accepted = true;
                    }
                    Err(e) => {
                        error!(error = %e, "block rejected by node");
                    }
                }
            }
            _ => {
                error!("block candidate but no node client or block hex available");
            }
        }

        let events = server.events.read();
        if let Some(cb) = &events.on_block_found {
            cb(&outcome.block_hash, outcome.height, accepted);
        }
    }

    /// `mining.suggest_difficulty`: a floor chosen by the miner.
    async fn handle_suggest_difficulty(
        &self,
        server: &Arc<ServerInner>,
        req: StratumRequest,
    ) {
        let Some(mut diff) = param_f64(&req.params, 0) else {
            self.send_response(
                &req.id,
                json!(false),
                Some(&StratumError::new(
                    StratumErrorCode::Other,
                    "invalid difficulty",
                )),
            )
            .await;
            return;
        };

        let config = server.vardiff.config();
        diff = diff.max(config.min_diff);
        if config.max_diff > 0.0 {
            diff = diff.min(config.max_diff);
        }

        let worker_name = {
            let mut state = self.state.lock();
            state.suggested_diff = diff;
            state.old_diff = state.current_diff;
            state.diff_change_seq = server.current_job().map(|j| j.seq);
            state.current_diff = diff;
            state.worker_name.clone()
        };

        self.send_set_difficulty(diff).await;
        self.send_response(&req.id, json!(true), None).await;
        info!(session = %self.id, worker = %worker_name, diff, "miner suggested difficulty");
    }

    /// Vardiff pulse from the read-deadline path: halves difficulty for
    /// sessions that stopped producing qualifying shares.
    async fn idle_retarget(&self, server: &Arc<ServerInner>) {
        if server.is_proxy() || !self.state.lock().authorized {
            return;
        }
        self.apply_retarget(server).await;
    }

    /// Run a retarget check; on change record the grace window, emit
    /// `mining.set_difficulty`, and fire the diff-changed callback.
    async fn apply_retarget(&self, server: &Arc<ServerInner>) {
        let changed = {
            let current_job_seq = server.current_job().map(|j| j.seq);
            let mut state = self.state.lock();
            let (current, floor) = (state.current_diff, state.suggested_diff);
            match server.vardiff.check_retarget(&mut state.vardiff, current, floor) {
                Some(new_diff) => {
                    state.old_diff = state.current_diff;
                    state.diff_change_seq = current_job_seq;
                    state.current_diff = new_diff;
                    Some((new_diff, state.worker_name.clone()))
                }
                None => None,
            }
        };

        if let Some((new_diff, worker_name)) = changed {
            self.send_set_difficulty(new_diff).await;
            info!(session = %self.id, worker = %worker_name, diff = new_diff, "vardiff retarget");
            if !worker_name.is_empty() {
                let events = server.events.read();
                if let Some(cb) = &events.on_diff_changed {
                    cb(&worker_name, new_diff);
                }
            }
        }
    }

    // --- outbound ---

    pub(crate) async fn send_notify(&self, job: &Job, clean_jobs: bool) {
        let params = job.to_params(clean_jobs).to_params();
        self.send_line(encode_notification("mining.notify", params))
            .await;
    }

    pub(crate) async fn send_set_difficulty(&self, diff: f64) {
        self.send_line(encode_notification("mining.set_difficulty", json!([diff])))
            .await;
    }

    /// Tell the miner to drop the connection and come back after
    /// `wait_secs`. Understood by cgminer, BFGminer, and most firmware.
    pub(crate) async fn send_reconnect(&self, wait_secs: u32) {
        self.send_line(encode_notification(
            "client.reconnect",
            json!(["", 0, wait_secs]),
        ))
        .await;
    }

    /// Distribute a new extranonce1 to a miner that negotiated
    /// `mining.extranonce.subscribe`.
    pub(crate) async fn send_set_extranonce(&self, extranonce1: &str, extranonce2_size: usize) {
        self.send_line(encode_notification(
            "mining.set_extranonce",
            json!([extranonce1, extranonce2_size]),
        ))
        .await;
    }

    async fn send_response(&self, id: &Value, result: Value, error: Option<&StratumError>) {
        self.send_line(encode_response(id, result, error)).await;
    }

    async fn send_line(&self, line: String) {
        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(line.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = %self.id, error = %e, "write failed"),
            Err(_) => warn!(session = %self.id, "write timed out"),
        }
    }
}
