//! JSON-RPC 1.0 client for the local full node

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::types::{AddressInfo, BlockTemplate, BlockchainInfo, MiningInfo, NetworkInfo};
use crate::error::{Error, Result, RpcError};

/// Node client configuration
#[derive(Debug, Clone)]
pub struct NodeClientConfig {
    /// RPC host
    pub host: String,
    /// RPC port
    pub port: u16,
    /// Basic auth username
    pub username: String,
    /// Basic auth password
    pub password: String,
    /// Use HTTPS (self-signed certificates accepted)
    pub use_ssl: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Attempts per call, with exponential backoff between them
    pub max_retries: u32,
}

impl NodeClientConfig {
    fn url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// The node RPC surface the stratum server depends on.
///
/// A trait seam so tests (and embedders) can substitute a fake node.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Fetch a block template for the given consensus rules.
    async fn get_block_template(&self, rules: &[&str]) -> Result<BlockTemplate>;
    /// Submit a serialized block; `Ok(())` means the node accepted it.
    async fn submit_block(&self, block_hex: &str) -> Result<()>;
    /// Current chain tip hash in display order.
    async fn get_best_block_hash(&self) -> Result<String>;
}

/// JSON-RPC client over HTTP with basic auth and bounded retries.
pub struct NodeClient {
    config: NodeClientConfig,
    client: Client,
    next_id: AtomicI64,
    connected: AtomicBool,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl NodeClient {
    /// Create a client with the standard timeout and retry policy.
    pub fn new(config: NodeClientConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.timeout);
        if config.use_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;

        Ok(Self {
            config,
            client,
            next_id: AtomicI64::new(1),
            connected: AtomicBool::new(false),
        })
    }

    /// Create a client suitable for interactive connection tests:
    /// short timeout, single attempt.
    pub fn quick(mut config: NodeClientConfig) -> Result<Self> {
        config.timeout = Duration::from_secs(8);
        config.max_retries = 1;
        Self::new(config)
    }

    /// Whether the most recent call reached the node.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Cheap liveness probe.
    pub async fn ping(&self) -> Result<()> {
        self.call("getbestblockhash", json!([])).await.map(|_| ())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let mut last_err: Option<Error> = None;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }

            let sent = self
                .client
                .post(self.config.url())
                .basic_auth(&self.config.username, Some(&self.config.password))
                .json(&body)
                .send()
                .await;

            let response = match sent {
                Ok(r) => r,
                Err(e) => {
                    debug!(method, attempt, error = %e, "node RPC transport error");
                    self.connected.store(false, Ordering::Relaxed);
                    last_err = Some(e.into());
                    continue;
                }
            };

            let parsed: RpcResponse = match response.json().await {
                Ok(p) => p,
                Err(e) => {
                    last_err = Some(Error::Rpc(RpcError::ResponseParse {
                        field: method.to_string(),
                        message: e.to_string(),
                    }));
                    continue;
                }
            };

            self.connected.store(true, Ordering::Relaxed);

            if let Some(err) = parsed.error {
                // Node-level errors are definitive, not transient
                return Err(Error::Rpc(RpcError::Node {
                    code: err.code,
                    message: err.message,
                }));
            }

            return Ok(parsed.result);
        }

        Err(Error::Rpc(RpcError::Exhausted {
            method: method.to_string(),
            attempts: self.config.max_retries,
            message: last_err.map(|e| e.to_string()).unwrap_or_default(),
        }))
    }

    /// Full blockchain state summary.
    pub async fn get_blockchain_info(&self) -> Result<BlockchainInfo> {
        let result = self.call("getblockchaininfo", json!([])).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Mining-related node state.
    pub async fn get_mining_info(&self) -> Result<MiningInfo> {
        let result = self.call("getmininginfo", json!([])).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Node networking state.
    pub async fn get_network_info(&self) -> Result<NetworkInfo> {
        let result = self.call("getnetworkinfo", json!([])).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Ask the node whether it considers an address valid.
    pub async fn validate_address(&self, address: &str) -> Result<AddressInfo> {
        let result = self.call("validateaddress", json!([address])).await?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl ChainRpc for NodeClient {
    async fn get_block_template(&self, rules: &[&str]) -> Result<BlockTemplate> {
        let result = self
            .call("getblocktemplate", json!([{ "rules": rules }]))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn submit_block(&self, block_hex: &str) -> Result<()> {
        let result = self.call("submitblock", json!([block_hex])).await?;

        // submitblock returns null on success, or a rejection string
        if let Some(reason) = result.as_str() {
            if !reason.is_empty() {
                warn!(reason, "node rejected submitted block");
                return Err(Error::Rpc(RpcError::BlockRejected {
                    reason: reason.to_string(),
                }));
            }
        }
        Ok(())
    }

    async fn get_best_block_hash(&self) -> Result<String> {
        let result = self.call("getbestblockhash", json!([])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::protocol_response_parse("getbestblockhash", "not a string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NodeClientConfig {
        NodeClientConfig {
            host: "127.0.0.1".to_string(),
            port: 8332,
            username: "bitcoin".to_string(),
            password: "secret".to_string(),
            use_ssl: false,
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }

    #[test]
    fn test_url_building() {
        assert_eq!(config().url(), "http://127.0.0.1:8332");

        let mut ssl = config();
        ssl.use_ssl = true;
        assert_eq!(ssl.url(), "https://127.0.0.1:8332");
    }

    #[test]
    fn test_quick_client_policy() {
        let client = NodeClient::quick(config()).unwrap();
        assert_eq!(client.config.max_retries, 1);
        assert_eq!(client.config.timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_rpc_error_body_parses() {
        let raw = r#"{"result": null, "error": {"code": -32601, "message": "Method not found"}}"#;
        let resp: RpcResponse = serde_json::from_str(raw).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
    }
}
