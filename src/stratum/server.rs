//! Stratum V1 TCP server
//!
//! Owns the listener, the session registry, the current-job cache, and
//! extranonce1 allocation. Solo mode wires a node client for templates
//! and block submission; proxy mode carves per-miner extranonce1 values
//! out of the upstream pool's extranonce2 space and relays jobs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobManager};
use super::protocol::JobParams;
use super::session::{MinerInfo, Session};
use super::share::ShareValidator;
use super::vardiff::{VardiffConfig, VardiffController};
use crate::chain::{AddressCodec, CoinDef};
use crate::error::Result;
use crate::node::{BlockTemplate, ChainRpc};
use crate::utils::net::tune_mining_socket;

/// Extranonce2 width advertised to miners in solo mode.
const SOLO_EXTRANONCE2_SIZE: usize = 4;

/// Extranonce1 width in solo mode, in bytes.
const SOLO_EXTRANONCE1_SIZE: usize = 4;

/// Reconnect delay handed to miners on shutdown.
const SHUTDOWN_RECONNECT_SECS: u32 = 3;

/// Listener configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StratumConfig {
    /// TCP port to listen on
    pub port: u16,
    /// Connection cap; further connects are dropped
    pub max_connections: usize,
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self {
            port: 10333,
            max_connections: 100,
        }
    }
}

/// Mining-side configuration for job construction.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MiningConfig {
    /// Coin id (see [`crate::chain`])
    pub coin: String,
    /// Payout destination, interpreted by the configured [`AddressCodec`]
    pub payout_address: String,
    /// Tag placed in the coinbase scriptSig
    pub coinbase_tag: String,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            coin: "btc".to_string(),
            payout_address: String::new(),
            coinbase_tag: "/minevault/".to_string(),
        }
    }
}

/// A share queued for upstream submission.
#[derive(Debug, Clone)]
pub struct ShareForward {
    /// Local worker that mined the share
    pub worker: String,
    /// Upstream job id
    pub job_id: String,
    /// Full upstream extranonce2 (miner prefix already prepended)
    pub extranonce2: String,
    /// Share ntime, hex
    pub ntime: String,
    /// Share nonce, hex
    pub nonce: String,
    /// Version-rolling bits, when used
    pub version_bits: Option<String>,
}

/// Async handler forwarding a share upstream; resolves to
/// `(accepted, reason)`.
pub type ShareForwardHandler =
    Box<dyn Fn(ShareForward) -> BoxFuture<'static, (bool, String)> + Send + Sync>;

/// Observable server events. Handlers run on I/O tasks and must not
/// block; spawn if there is real work to do.
#[derive(Default)]
pub struct ServerEvents {
    /// A miner completed authorization
    pub on_miner_connected: Option<Box<dyn Fn(MinerInfo) + Send + Sync>>,
    /// An authorized session disconnected (argument: session id)
    pub on_miner_disconnected: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// A share was accepted: `(session_id, hashrate_diff, actual_diff)`
    pub on_share_accepted: Option<Box<dyn Fn(&str, f64, f64) + Send + Sync>>,
    /// A share was rejected: `(session_id, reason)`
    pub on_share_rejected: Option<Box<dyn Fn(&str, &str) + Send + Sync>>,
    /// A block candidate ran its course: `(hash, height, accepted)`
    pub on_block_found: Option<Box<dyn Fn(&str, i64, bool) + Send + Sync>>,
    /// A session's difficulty changed: `(worker, diff)`
    pub on_diff_changed: Option<Box<dyn Fn(&str, f64) + Send + Sync>>,
    /// Persisted per-worker difficulty lookup, consulted on authorize
    pub lookup_worker_diff: Option<Box<dyn Fn(&str) -> Option<f64> + Send + Sync>>,
    /// Proxy-mode share relay
    pub on_share_forward: Option<ShareForwardHandler>,
}

/// Upstream-facing state in proxy mode.
#[derive(Debug, Clone)]
pub struct ProxyState {
    /// The pool-assigned extranonce1 all local EN1s are prefixed with
    pub upstream_en1: String,
    /// Bytes carved from the upstream EN2 for the per-miner prefix
    pub prefix_bytes: usize,
    /// Upstream-negotiated version-rolling mask (zero: unsupported)
    pub version_mask: u32,
}

pub(crate) struct ServerInner {
    config: StratumConfig,
    pub(crate) vardiff: VardiffController,
    pub(crate) jobs: Arc<JobManager>,
    pub(crate) validator: ShareValidator,
    pub(crate) node: Option<Arc<dyn ChainRpc>>,
    pub(crate) events: RwLock<ServerEvents>,
    pub(crate) shutdown: Notify,

    sessions: DashMap<String, Arc<Session>>,
    current_job: RwLock<Option<Arc<Job>>>,
    next_en1: AtomicU32,
    extranonce2_size: AtomicUsize,
    proxy: RwLock<Option<ProxyState>>,
    upstream_diff: Mutex<f64>,
    running: AtomicBool,
    local_addr: RwLock<Option<SocketAddr>>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ServerInner {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn current_job(&self) -> Option<Arc<Job>> {
        self.current_job.read().clone()
    }

    pub(crate) fn extranonce2_size(&self) -> usize {
        self.extranonce2_size.load(Ordering::Relaxed)
    }

    pub(crate) fn is_proxy(&self) -> bool {
        self.proxy.read().is_some()
    }

    pub(crate) fn proxy_state(&self) -> Option<ProxyState> {
        self.proxy.read().clone()
    }

    pub(crate) fn upstream_difficulty(&self) -> f64 {
        *self.upstream_diff.lock()
    }

    pub(crate) async fn send_current_job(&self, session: &Session) {
        match self.current_job() {
            Some(job) => {
                session.send_notify(&job, true).await;
                info!(session = %session.id, job = %job.id, "sent current job");
            }
            None => {
                info!(session = %session.id, "no current job yet (waiting for work)");
            }
        }
    }

    fn remove_session(&self, session: &Session) {
        self.sessions.remove(&session.id);

        let info = session.to_miner_info();
        info!(session = %session.id, worker = %info.worker_name, "session disconnected");

        let authorized = session.is_authorized();
        let events = self.events.read();
        if authorized && !info.worker_name.is_empty() {
            if let Some(cb) = &events.on_diff_changed {
                cb(&info.worker_name, info.current_diff);
            }
        }
        if authorized {
            if let Some(cb) = &events.on_miner_disconnected {
                cb(&session.id);
            }
        }
    }

    fn generate_extranonce1(&self) -> String {
        if let Some(proxy) = self.proxy.read().as_ref() {
            let counter = self.next_en1.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & 0xffff;
            format!("{}{:04x}", proxy.upstream_en1, counter)
        } else {
            let value = self.next_en1.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            format!("{:08x}", value)
        }
    }

    fn authorized_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_authorized())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

/// The Stratum V1 server.
pub struct StratumServer {
    inner: Arc<ServerInner>,
}

impl StratumServer {
    /// Create a server. `node` is required for solo mode and unused in
    /// proxy mode.
    pub fn new(
        config: StratumConfig,
        mining: &MiningConfig,
        vardiff: VardiffConfig,
        coin: &'static CoinDef,
        codec: Arc<dyn AddressCodec>,
        node: Option<Arc<dyn ChainRpc>>,
    ) -> Self {
        let jobs = Arc::new(JobManager::new(
            coin,
            codec,
            mining.payout_address.clone(),
            mining.coinbase_tag.clone(),
            SOLO_EXTRANONCE2_SIZE,
        ));
        let validator = ShareValidator::new(Arc::clone(&jobs));

        let inner = Arc::new(ServerInner {
            config,
            vardiff: VardiffController::new(vardiff),
            jobs,
            validator,
            node,
            events: RwLock::new(ServerEvents::default()),
            shutdown: Notify::new(),
            sessions: DashMap::new(),
            current_job: RwLock::new(None),
            // Random upper 16 bits so extranonce1 values (and session
            // ids) don't recycle across restarts
            next_en1: AtomicU32::new(rand::random::<u32>() & 0xffff_0000),
            extranonce2_size: AtomicUsize::new(SOLO_EXTRANONCE2_SIZE),
            proxy: RwLock::new(None),
            upstream_diff: Mutex::new(0.0),
            running: AtomicBool::new(false),
            local_addr: RwLock::new(None),
            handles: tokio::sync::Mutex::new(Vec::new()),
        });

        Self { inner }
    }

    /// Install event handlers. Call before `start`.
    pub fn set_events(&self, events: ServerEvents) {
        *self.inner.events.write() = events;
    }

    /// Whether the accept loop is live.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    /// Bound address, available after `start` (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.read()
    }

    /// Bind the listener and spawn the accept loop.
    pub async fn start(&self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.inner.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;
        *self.inner.local_addr.write() = Some(local);
        self.inner.running.store(true, Ordering::Relaxed);
        info!(addr = %local, "stratum server started");

        let inner = Arc::clone(&self.inner);
        let accept = tokio::spawn(async move {
            accept_loop(inner, listener).await;
        });
        self.inner.handles.lock().await.push(accept);

        Ok(())
    }

    /// Graceful stop: tell miners to reconnect, give the notification
    /// time to flush, then tear everything down and wait for handlers.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::Relaxed) {
            return;
        }

        for session in self.inner.authorized_sessions() {
            session.send_reconnect(SHUTDOWN_RECONNECT_SECS).await;
        }
        // Let the reconnect notification reach miners before the
        // connections drop
        tokio::time::sleep(Duration::from_millis(200)).await;

        self.inner.shutdown.notify_waiters();

        // Take the handles first: joining while holding the lock would
        // deadlock against a handler registering itself
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.handles.lock().await;
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.sessions.clear();
        info!("stratum server stopped");
    }

    /// Configure proxy operation after the upstream handshake.
    pub fn set_proxy_mode(
        &self,
        upstream_en1: &str,
        local_en2_size: usize,
        prefix_bytes: usize,
        version_mask: u32,
    ) {
        *self.inner.proxy.write() = Some(ProxyState {
            upstream_en1: upstream_en1.to_string(),
            prefix_bytes,
            version_mask,
        });
        self.inner
            .extranonce2_size
            .store(local_en2_size, Ordering::Relaxed);
        info!(
            upstream_en1,
            local_en2_size, prefix_bytes, "proxy mode enabled"
        );
    }

    /// Apply a new upstream handshake after a reconnect. Sessions that
    /// negotiated `mining.extranonce.subscribe` get the new extranonce1
    /// pushed; the rest are told to reconnect and re-handshake.
    pub async fn update_proxy_state(
        &self,
        upstream_en1: &str,
        local_en2_size: usize,
        prefix_bytes: usize,
        version_mask: u32,
    ) {
        let old_en1 = match self.inner.proxy_state() {
            Some(p) => p.upstream_en1,
            None => {
                self.set_proxy_mode(upstream_en1, local_en2_size, prefix_bytes, version_mask);
                return;
            }
        };

        *self.inner.proxy.write() = Some(ProxyState {
            upstream_en1: upstream_en1.to_string(),
            prefix_bytes,
            version_mask,
        });
        self.inner
            .extranonce2_size
            .store(local_en2_size, Ordering::Relaxed);

        for session in self.inner.all_sessions() {
            let current = session.extranonce1();
            let suffix = current.strip_prefix(old_en1.as_str()).unwrap_or(&current);
            let new_en1 = format!("{}{}", upstream_en1, suffix);

            if session.supports_set_extranonce() {
                session.set_extranonce1(new_en1.clone());
                session.send_set_extranonce(&new_en1, local_en2_size).await;
                debug!(session = %session.id, en1 = %new_en1, "pushed new extranonce1");
            } else {
                // No way to move this miner onto the new search space
                // in place; kick it so it re-handshakes
                session.send_reconnect(1).await;
            }
        }
        info!(upstream_en1, "proxy state updated");
    }

    /// Record the upstream pool difficulty.
    pub fn set_upstream_difficulty(&self, diff: f64) {
        *self.inner.upstream_diff.lock() = diff;
    }

    /// The current upstream pool difficulty.
    pub fn upstream_difficulty(&self) -> f64 {
        self.inner.upstream_difficulty()
    }

    /// Register an upstream job and fan it out.
    pub async fn broadcast_upstream_job(&self, params: &JobParams) {
        let job = self.inner.jobs.register_upstream_job(params);
        self.inner
            .validator
            .clean_duplicates(&self.inner.jobs.active_ids());
        self.broadcast_job(job, params.clean_jobs).await;
    }

    /// A new chain tip: build a job and broadcast with `clean_jobs`.
    pub async fn new_block_template(&self, tmpl: BlockTemplate) {
        let job = match self.inner.jobs.create_job(Arc::new(tmpl), SOLO_EXTRANONCE1_SIZE) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "create job failed");
                return;
            }
        };
        self.inner
            .validator
            .clean_duplicates(&self.inner.jobs.active_ids());
        self.broadcast_job(job, true).await;
    }

    /// Refresh the template (fresh ntime/fees, same block): miners keep
    /// outstanding work.
    pub async fn refresh_block_template(&self, tmpl: BlockTemplate) {
        let job = match self.inner.jobs.create_job(Arc::new(tmpl), SOLO_EXTRANONCE1_SIZE) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "refresh job failed");
                return;
            }
        };
        self.inner
            .validator
            .clean_duplicates(&self.inner.jobs.active_ids());
        self.broadcast_job(job, false).await;
    }

    /// Fan a job out to every authorized session.
    pub async fn broadcast_job(&self, job: Arc<Job>, clean_jobs: bool) {
        *self.inner.current_job.write() = Some(Arc::clone(&job));

        let sessions = self.inner.authorized_sessions();
        let count = sessions.len();
        for session in sessions {
            session.send_notify(&job, clean_jobs).await;
        }

        info!(job = %job.id, miners = count, clean = clean_jobs, "broadcast job");
    }

    /// Snapshots of all authorized sessions.
    pub fn sessions(&self) -> Vec<MinerInfo> {
        self.inner
            .authorized_sessions()
            .iter()
            .map(|s| s.to_miner_info())
            .collect()
    }

    /// Number of connected sessions (authorized or not).
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Update the payout address used for future jobs.
    pub fn update_payout_address(&self, address: &str) {
        self.inner.jobs.set_payout_address(address);
    }
}

async fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    loop {
        if !inner.is_running() {
            return;
        }
        let accepted = tokio::select! {
            _ = inner.shutdown.notified() => return,
            accepted = listener.accept() => accepted,
        };

        let (stream, remote_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                if inner.running.load(Ordering::Relaxed) {
                    error!(error = %e, "accept error");
                }
                return;
            }
        };

        if inner.sessions.len() >= inner.config.max_connections {
            warn!(remote = %remote_addr, "connection cap reached, rejecting");
            continue;
        }

        tune_mining_socket(&stream);

        let extranonce1 = inner.generate_extranonce1();
        let session_id = format!("s_{}", extranonce1);
        let (read_half, write_half) = stream.into_split();

        let session = Session::new(
            session_id.clone(),
            remote_addr,
            write_half,
            extranonce1,
            inner.vardiff.start_diff(),
            inner.vardiff.new_state(),
        );
        inner.sessions.insert(session_id.clone(), Arc::clone(&session));
        info!(remote = %remote_addr, session = %session_id, "new connection");

        let inner_for_task = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            // Contain panics from the handler so one bad session can't
            // take the registry entry down with it unrecorded
            let run = std::panic::AssertUnwindSafe(session.run(&inner_for_task, read_half));
            if run.catch_unwind().await.is_err() {
                error!(session = %session.id, "session handler panicked");
            }
            inner_for_task.remove_session(&session);
        });
        inner.handles.lock().await.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{self, HexScriptCodec};

    fn server() -> StratumServer {
        StratumServer::new(
            StratumConfig {
                port: 0,
                max_connections: 4,
            },
            &MiningConfig {
                coin: "btc".to_string(),
                payout_address: "76a914000102030405060708090a0b0c0d0e0f1011121388ac".to_string(),
                coinbase_tag: "/pool/".to_string(),
            },
            VardiffConfig::default(),
            chain::get("btc"),
            Arc::new(HexScriptCodec),
            None,
        )
    }

    #[test]
    fn test_solo_extranonce1_allocation() {
        let srv = server();
        let a = srv.inner.generate_extranonce1();
        let b = srv.inner.generate_extranonce1();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        // Sequential counter in the low bits
        let a_val = u32::from_str_radix(&a, 16).unwrap();
        let b_val = u32::from_str_radix(&b, 16).unwrap();
        assert_eq!(b_val, a_val + 1);
    }

    #[test]
    fn test_proxy_extranonce1_carving() {
        let srv = server();
        srv.set_proxy_mode("a1b2c3d4", 6, 2, 0);

        let en1 = srv.inner.generate_extranonce1();
        assert!(en1.starts_with("a1b2c3d4"));
        assert_eq!(en1.len(), 8 + 4);
        assert_eq!(srv.inner.extranonce2_size(), 6);
        assert!(srv.inner.is_proxy());
    }

    #[test]
    fn test_upstream_difficulty_roundtrip() {
        let srv = server();
        assert_eq!(srv.upstream_difficulty(), 0.0);
        srv.set_upstream_difficulty(8192.0);
        assert_eq!(srv.upstream_difficulty(), 8192.0);
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let srv = server();
        srv.start().await.unwrap();
        let addr = srv.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(srv.is_running());
        srv.stop().await;
        assert!(!srv.is_running());
    }
}
