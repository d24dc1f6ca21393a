//! Outbound Stratum V1 client

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{Error, ProtocolError, Result};
use crate::stratum::{param_job_id, JobParams, DEFAULT_VERSION_MASK};
use crate::utils::net::tune_mining_socket;

/// Dial timeout for connect and reconnect attempts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Response wait for correlated calls.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream read deadline; a silent pool this long counts as dead.
const READ_DEADLINE: Duration = Duration::from_secs(300);

/// Reconnect backoff bounds.
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Most bytes we reserve from the upstream EN2 for per-miner prefixes.
const MAX_PREFIX_BYTES: usize = 2;

/// Never advertise less than this EN2 width to local miners; common
/// firmware refuses smaller rolling space.
const MIN_LOCAL_EN2_BYTES: usize = 4;

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Pool endpoint, `host:port` (a `stratum+tcp://` prefix is fine)
    pub url: String,
    /// Pool worker/account name
    pub worker: String,
    /// Pool password (most pools ignore it; "x" is customary)
    pub password: String,
}

/// Handlers for upstream events. Invoked from the reader task; must not
/// block.
#[derive(Default)]
pub struct UpstreamEvents {
    /// A `mining.notify` arrived
    pub on_job: Option<Box<dyn Fn(JobParams) + Send + Sync>>,
    /// A `mining.set_difficulty` arrived
    pub on_difficulty: Option<Box<dyn Fn(f64) + Send + Sync>>,
    /// The connection dropped (the reconnect loop is already working)
    pub on_disconnect: Option<Box<dyn Fn() + Send + Sync>>,
    /// A reconnect handshake completed; extranonce state may have changed
    pub on_reconnect: Option<Box<dyn Fn() + Send + Sync>>,
}

type PendingMap = HashMap<u64, oneshot::Sender<std::result::Result<Value, Value>>>;

struct ClientInner {
    config: UpstreamConfig,
    addr: String,

    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    pending: Mutex<PendingMap>,
    next_id: AtomicU64,

    extranonce1: RwLock<String>,
    extranonce2_size: AtomicUsize,
    prefix_bytes: AtomicUsize,
    local_en2_size: AtomicUsize,

    version_rolling: AtomicBool,
    version_mask: AtomicU32,

    upstream_diff: Mutex<f64>,
    last_nbits: RwLock<String>,

    connected: AtomicBool,
    authorized: AtomicBool,
    running: AtomicBool,
    reconnect_started: AtomicBool,
    /// Bumped per established connection so a stale reader exiting late
    /// can't mark the replacement connection dead
    generation: AtomicU64,

    events: RwLock<UpstreamEvents>,
    early_job: Mutex<Option<JobParams>>,
    shutdown: Notify,
}

/// Stratum V1 client for the upstream pool.
pub struct UpstreamClient {
    inner: Arc<ClientInner>,
}

impl UpstreamClient {
    /// Create a client; call [`connect`](Self::connect) to go live.
    pub fn new(config: UpstreamConfig) -> Self {
        let addr = normalize_url(&config.url);
        Self {
            inner: Arc::new(ClientInner {
                config,
                addr,
                writer: tokio::sync::Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                extranonce1: RwLock::new(String::new()),
                extranonce2_size: AtomicUsize::new(0),
                prefix_bytes: AtomicUsize::new(0),
                local_en2_size: AtomicUsize::new(0),
                version_rolling: AtomicBool::new(false),
                version_mask: AtomicU32::new(0),
                upstream_diff: Mutex::new(0.0),
                last_nbits: RwLock::new(String::new()),
                connected: AtomicBool::new(false),
                authorized: AtomicBool::new(false),
                running: AtomicBool::new(false),
                reconnect_started: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                events: RwLock::new(UpstreamEvents::default()),
                early_job: Mutex::new(None),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Install event handlers (typically right after `connect`, before
    /// draining the early job).
    pub fn set_events(&self, events: UpstreamEvents) {
        *self.inner.events.write() = events;
    }

    /// Dial the pool and run the configure/subscribe/authorize
    /// handshake, then start the reconnect watcher.
    pub async fn connect(&self) -> Result<()> {
        self.inner.running.store(true, Ordering::Relaxed);
        Arc::clone(&self.inner).establish().await?;

        if !self.inner.reconnect_started.swap(true, Ordering::Relaxed) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.reconnect_loop().await;
            });
        }
        Ok(())
    }

    /// Disconnect and stop the reconnect watcher.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::Relaxed) {
            return;
        }
        self.inner.shutdown.notify_waiters();
        self.inner.close_conn().await;
        info!("upstream client stopped");
    }

    /// Whether the TCP connection is up.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Whether the pool accepted our worker.
    pub fn is_authorized(&self) -> bool {
        self.inner.authorized.load(Ordering::Relaxed)
    }

    /// The pool-assigned extranonce1, hex.
    pub fn extranonce1(&self) -> String {
        self.inner.extranonce1.read().clone()
    }

    /// The pool-advertised extranonce2 size, bytes.
    pub fn extranonce2_size(&self) -> usize {
        self.inner.extranonce2_size.load(Ordering::Relaxed)
    }

    /// Bytes reserved from the upstream EN2 for per-miner prefixes.
    pub fn prefix_bytes(&self) -> usize {
        self.inner.prefix_bytes.load(Ordering::Relaxed)
    }

    /// EN2 width advertised to local miners.
    pub fn local_en2_size(&self) -> usize {
        self.inner.local_en2_size.load(Ordering::Relaxed)
    }

    /// Whether the pool granted version rolling.
    pub fn version_rolling(&self) -> bool {
        self.inner.version_rolling.load(Ordering::Relaxed)
    }

    /// The pool-negotiated version-rolling mask (zero when denied).
    pub fn version_mask(&self) -> u32 {
        self.inner.version_mask.load(Ordering::Relaxed)
    }

    /// The pool's worker name (used on forwarded shares).
    pub fn worker_name(&self) -> &str {
        &self.inner.config.worker
    }

    /// Latest `mining.set_difficulty` value.
    pub fn upstream_difficulty(&self) -> f64 {
        *self.inner.upstream_diff.lock()
    }

    /// nBits of the most recent job, for network-difficulty display.
    pub fn last_nbits(&self) -> String {
        self.inner.last_nbits.read().clone()
    }

    /// Take the job that arrived during the handshake, if any. Jobs
    /// received before `set_events` land here so the first
    /// `mining.notify` is not lost.
    pub fn drain_early_job(&self) -> Option<JobParams> {
        self.inner.early_job.lock().take()
    }

    /// Forward a share. Returns `(accepted, reason)`; never retries:
    /// the miner will send more shares.
    pub async fn submit_share(
        &self,
        worker: &str,
        job_id: &str,
        extranonce2: &str,
        ntime: &str,
        nonce: &str,
        version_bits: Option<&str>,
    ) -> (bool, String) {
        if !self.is_connected() {
            return (false, "upstream disconnected".to_string());
        }

        let mut params = vec![
            json!(worker),
            json!(job_id),
            json!(extranonce2),
            json!(ntime),
            json!(nonce),
        ];
        if let Some(bits) = version_bits {
            params.push(json!(bits));
        }

        match self.inner.call("mining.submit", Value::Array(params)).await {
            Ok(result) => {
                if result == json!(true) {
                    (true, String::new())
                } else {
                    (false, result.to_string())
                }
            }
            Err(e) => (false, format!("submit error: {}", e)),
        }
    }
}

impl ClientInner {
    /// Dial and run the full handshake. Shared by first connect and
    /// reconnects.
    async fn establish(self: Arc<Self>) -> Result<()> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| Error::timeout("upstream connect", CONNECT_TIMEOUT))??;
        tune_mining_socket(&stream);

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::Relaxed);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let inner = Arc::clone(&self);
        tokio::spawn(async move {
            inner.read_loop(read_half, generation).await;
        });

        // Version rolling is best-effort; a pool that ignores
        // mining.configure still serves us fine
        if let Err(e) = self.configure().await {
            warn!(error = %e, "upstream version-rolling negotiation failed");
        }

        if let Err(e) = self.subscribe().await {
            self.close_conn().await;
            return Err(e);
        }
        if let Err(e) = self.authorize().await {
            self.close_conn().await;
            return Err(e);
        }

        info!(
            addr = %self.addr,
            en1 = %self.extranonce1.read(),
            en2_size = self.extranonce2_size.load(Ordering::Relaxed),
            local_en2 = self.local_en2_size.load(Ordering::Relaxed),
            "connected to upstream pool"
        );
        Ok(())
    }

    async fn configure(&self) -> Result<()> {
        let params = json!([
            ["version-rolling"],
            {
                "version-rolling.mask": format!("{:08x}", DEFAULT_VERSION_MASK),
                "version-rolling.min-bit-count": 2,
            }
        ]);
        let result = self.call("mining.configure", params).await?;

        if result.get("version-rolling") == Some(&json!(true)) {
            let mask = result
                .get("version-rolling.mask")
                .and_then(|v| v.as_str())
                .and_then(|s| u32::from_str_radix(s, 16).ok())
                .unwrap_or(0);
            self.version_rolling.store(mask != 0, Ordering::Relaxed);
            self.version_mask.store(mask, Ordering::Relaxed);
            info!(mask = %format!("{:08x}", mask), "upstream version-rolling enabled");
        } else {
            self.version_rolling.store(false, Ordering::Relaxed);
            self.version_mask.store(0, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<()> {
        let user_agent = format!("minevault/{}", env!("CARGO_PKG_VERSION"));
        let result = self.call("mining.subscribe", json!([user_agent])).await?;

        let fields = result
            .as_array()
            .ok_or_else(|| Error::protocol_response_parse("subscribe", "not an array"))?;
        if fields.len() < 3 {
            return Err(Error::protocol_response_parse(
                "subscribe",
                "result too short",
            ));
        }

        let extranonce1 = fields[1]
            .as_str()
            .ok_or_else(|| Error::protocol_response_parse("extranonce1", "not a string"))?;
        let extranonce2_size = fields[2]
            .as_u64()
            .ok_or_else(|| Error::protocol_response_parse("extranonce2_size", "not a number"))?
            as usize;

        // Carve per-miner prefix space out of the upstream EN2, but
        // never shrink the local EN2 below what firmware tolerates
        let prefix_bytes = MAX_PREFIX_BYTES.min(extranonce2_size.saturating_sub(MIN_LOCAL_EN2_BYTES));
        let local_en2_size = (extranonce2_size - prefix_bytes).max(1);

        *self.extranonce1.write() = extranonce1.to_string();
        self.extranonce2_size.store(extranonce2_size, Ordering::Relaxed);
        self.prefix_bytes.store(prefix_bytes, Ordering::Relaxed);
        self.local_en2_size.store(local_en2_size, Ordering::Relaxed);
        Ok(())
    }

    async fn authorize(&self) -> Result<()> {
        let result = self
            .call(
                "mining.authorize",
                json!([self.config.worker.clone(), self.config.password.clone()]),
            )
            .await?;

        if result != json!(true) {
            return Err(Error::Protocol(ProtocolError::AuthorizeFailed {
                reason: result.to_string(),
            }));
        }
        self.authorized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, read_half: OwnedReadHalf, generation: u64) {
        let mut reader = BufReader::with_capacity(8192, read_half);
        let mut line = String::new();

        loop {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            line.clear();

            let read = tokio::select! {
                _ = self.shutdown.notified() => break,
                read = tokio::time::timeout(READ_DEADLINE, reader.read_line(&mut line)) => read,
            };
            match read {
                Err(_) => {
                    error!("upstream read deadline exceeded");
                    break;
                }
                Ok(Ok(0)) => {
                    debug!("upstream closed connection");
                    break;
                }
                Ok(Err(e)) => {
                    if self.running.load(Ordering::Relaxed) {
                        error!(error = %e, "upstream read error");
                    }
                    break;
                }
                Ok(Ok(_)) => {}
            }

            let message: Value = match serde_json::from_str(line.trim()) {
                Ok(v) => v,
                Err(_) => continue,
            };

            let method = message.get("method").and_then(|m| m.as_str());
            match method {
                Some(method) => {
                    let params = message.get("params").cloned().unwrap_or(Value::Null);
                    self.handle_notification(method, params);
                }
                None => {
                    let Some(id) = message.get("id").and_then(|i| i.as_u64()) else {
                        continue;
                    };
                    let waiter = self.pending.lock().remove(&id);
                    if let Some(tx) = waiter {
                        let error = message.get("error").cloned().unwrap_or(Value::Null);
                        let outcome = if error.is_null() {
                            Ok(message.get("result").cloned().unwrap_or(Value::Null))
                        } else {
                            Err(error)
                        };
                        let _ = tx.send(outcome);
                    }
                }
            }
        }

        // A newer connection may already be live; only the reader of
        // the current generation tears state down
        if self.generation.load(Ordering::Relaxed) != generation {
            return;
        }

        let was_connected = self.connected.swap(false, Ordering::Relaxed);
        self.authorized.store(false, Ordering::Relaxed);
        self.drain_pending();
        if was_connected && self.running.load(Ordering::Relaxed) {
            let events = self.events.read();
            if let Some(cb) = &events.on_disconnect {
                cb();
            }
        }
    }

    fn handle_notification(&self, method: &str, params: Value) {
        match method {
            "mining.notify" => self.handle_job_notify(params),
            "mining.set_difficulty" => self.handle_set_difficulty(params),
            other => debug!(method = other, "unhandled upstream notification"),
        }
    }

    fn handle_job_notify(&self, params: Value) {
        let Some(fields) = params.as_array().filter(|a| a.len() >= 9) else {
            error!("invalid mining.notify params");
            return;
        };

        // Job ids may arrive as JSON numbers; normalize to hex
        let Some(job_id) = param_job_id(fields, 0) else {
            error!("mining.notify without job id");
            return;
        };

        let str_field = |i: usize| fields[i].as_str().unwrap_or_default().to_string();
        let prev_hash = str_field(1);
        let version = str_field(5);
        let nbits = str_field(6);
        let ntime = str_field(7);

        if prev_hash.len() != 64 || version.len() != 8 || nbits.len() != 8 || ntime.len() != 8 {
            error!(
                job = %job_id,
                "mining.notify field lengths invalid, dropping job"
            );
            return;
        }

        let merkle_branches: Vec<String> = fields[4]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        *self.last_nbits.write() = nbits.clone();

        let job = JobParams {
            job_id: job_id.clone(),
            prev_hash,
            coinb1: str_field(2),
            coinb2: str_field(3),
            merkle_branches,
            version,
            nbits,
            ntime,
            clean_jobs: fields[8].as_bool().unwrap_or(false),
        };

        info!(job = %job_id, clean = job.clean_jobs, "upstream job");

        let events = self.events.read();
        match &events.on_job {
            Some(cb) => cb(job),
            None => {
                // Handler not wired yet (mid-handshake); keep the most
                // recent job so it can be replayed
                *self.early_job.lock() = Some(job);
            }
        }
    }

    fn handle_set_difficulty(&self, params: Value) {
        let Some(diff) = params.as_array().and_then(|a| a.first()).and_then(|v| v.as_f64()) else {
            return;
        };

        *self.upstream_diff.lock() = diff;
        info!(diff, "upstream difficulty");

        let events = self.events.read();
        if let Some(cb) = &events.on_difficulty {
            cb(diff);
        }
    }

    /// Send a correlated request and wait for its response.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let request = json!({ "id": id, "method": method, "params": params });
        if let Err(e) = self.send_json(&request).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(Error::other(method, error.to_string())),
            Ok(Err(_closed)) => Err(Error::Protocol(ProtocolError::Disconnected)),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::timeout(method, CALL_TIMEOUT))
            }
        }
    }

    async fn send_json(&self, value: &Value) -> Result<()> {
        let mut line = value.to_string();
        line.push('\n');

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(Error::Protocol(ProtocolError::Disconnected));
        };
        tokio::time::timeout(CALL_TIMEOUT, writer.write_all(line.as_bytes()))
            .await
            .map_err(|_| Error::timeout("upstream write", CALL_TIMEOUT))??;
        Ok(())
    }

    fn drain_pending(&self) {
        // Dropping the senders wakes every waiter with a closed error
        self.pending.lock().clear();
    }

    async fn close_conn(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.authorized.store(false, Ordering::Relaxed);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.drain_pending();
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let mut backoff = BACKOFF_START;

        loop {
            // Wait for the connection to drop
            while self.connected.load(Ordering::Relaxed) {
                tokio::select! {
                    _ = self.shutdown.notified() => return,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
            if !self.running.load(Ordering::Relaxed) {
                return;
            }

            info!(delay = ?backoff, "reconnecting to upstream");
            tokio::select! {
                _ = self.shutdown.notified() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            if !self.running.load(Ordering::Relaxed) {
                return;
            }

            match Arc::clone(&self).establish().await {
                Ok(()) => {
                    backoff = BACKOFF_START;
                    info!(addr = %self.addr, "reconnected to upstream");
                    let events = self.events.read();
                    if let Some(cb) = &events.on_reconnect {
                        cb();
                    }
                }
                Err(e) => {
                    error!(error = %e, "reconnect failed");
                    backoff = (backoff * 2).min(BACKOFF_MAX);
                    // Jitter so a fleet of proxies doesn't thundering-herd
                    backoff += Duration::from_millis(rand::thread_rng().gen_range(0..1000));
                }
            }
        }
    }
}

/// Strip stratum URL schemes down to `host:port`.
fn normalize_url(url: &str) -> String {
    url.trim_start_matches("stratum+tcp://")
        .trim_start_matches("stratum://")
        .trim_end_matches('/')
        .to_string()
}
