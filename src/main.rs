//! minevault
//!
//! Solo/proxy Stratum V1 mining server for Bitcoin-family chains.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use minevault::chain::{self, HexScriptCodec};
use minevault::config::{Args, Config, MiningMode};
use minevault::error::Result;
use minevault::node::{ChainMonitor, ChainMonitorEvents, ChainRpc, NodeClient, NodeClientConfig};
use minevault::stratum::{ServerEvents, ShareForward, StratumServer};
use minevault::upstream::{UpstreamClient, UpstreamConfig, UpstreamEvents};
use minevault::utils;

/// Template poll interval against the local node.
const TIP_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_args(&args)?;

    if args.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    utils::init_logging(&config.logging.level, &config.logging.format);
    info!(version = minevault::VERSION, "starting minevault");

    match config.mode {
        MiningMode::Solo => run_solo(config).await,
        MiningMode::Proxy => run_proxy(config).await,
    }
}

fn build_server(
    config: &Config,
    node: Option<Arc<dyn ChainRpc>>,
) -> Arc<StratumServer> {
    let coin = chain::get(&config.mining.coin);
    Arc::new(StratumServer::new(
        config.stratum.clone(),
        &config.mining,
        config.vardiff.clone(),
        coin,
        Arc::new(HexScriptCodec),
        node,
    ))
}

/// Shared observability wiring: share and block logging.
fn base_events() -> ServerEvents {
    ServerEvents {
        on_share_accepted: Some(Box::new(|session_id, hashrate_diff, actual_diff| {
            debug!(
                session = session_id,
                hashrate_diff,
                diff = %utils::format_difficulty(actual_diff),
                "share accepted"
            );
        })),
        on_share_rejected: Some(Box::new(|session_id, reason| {
            debug!(session = session_id, reason, "share rejected");
        })),
        on_block_found: Some(Box::new(|hash, height, accepted| {
            if accepted {
                info!(hash, height, "block accepted");
            } else {
                warn!(hash, height, "block candidate rejected");
            }
        })),
        ..Default::default()
    }
}

async fn run_solo(config: Config) -> Result<()> {
    let coin = chain::get(&config.mining.coin);
    info!(coin = coin.name, symbol = coin.symbol, "starting stratum (solo)");

    let node = Arc::new(NodeClient::new(NodeClientConfig {
        host: config.node.host.clone(),
        port: config.node.port,
        username: config.node.username.clone(),
        password: config.node.password.clone(),
        use_ssl: config.node.use_ssl,
        timeout: Duration::from_secs(30),
        max_retries: 3,
    })?);

    let chain_info = node.get_blockchain_info().await?;
    info!(
        chain = %chain_info.chain,
        blocks = chain_info.blocks,
        "connected to node"
    );
    if chain_info.initial_block_download {
        warn!("node is still syncing; templates may be stale");
    }

    let server = build_server(&config, Some(node.clone() as Arc<dyn ChainRpc>));
    server.set_events(base_events());

    // Fetch the first template before accepting miners so the first
    // device to connect gets work immediately
    match node.get_block_template(coin.gbt_rules).await {
        Ok(tmpl) => {
            info!(height = tmpl.height, "initial block template ready");
            server.new_block_template(tmpl).await;
        }
        Err(e) => {
            error!(error = %e, "initial template fetch failed; miners wait for next poll");
        }
    }

    server.start().await?;

    let monitor_events = ChainMonitorEvents {
        on_new_block: Some(Box::new({
            let server = Arc::clone(&server);
            move |tmpl| {
                info!(height = tmpl.height, txs = tmpl.transactions.len(), "new block template");
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server.new_block_template(tmpl).await;
                });
            }
        })),
        on_template_refresh: Some(Box::new({
            let server = Arc::clone(&server);
            move |tmpl| {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server.refresh_block_template(tmpl).await;
                });
            }
        })),
        on_error: Some(Box::new(|e| {
            warn!(error = %e, "chain monitor error");
        })),
    };
    let monitor = ChainMonitor::new(
        node.clone() as Arc<dyn ChainRpc>,
        TIP_POLL_INTERVAL,
        coin.gbt_rules,
        monitor_events,
    );
    let monitor_handle = monitor.start();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    monitor.stop();
    let _ = monitor_handle.await;
    server.stop().await;
    Ok(())
}

async fn run_proxy(config: Config) -> Result<()> {
    let password = if config.proxy.password.is_empty() {
        "x".to_string()
    } else {
        config.proxy.password.clone()
    };
    info!(
        url = %config.proxy.url,
        worker = %config.proxy.worker_name,
        "starting stratum (proxy)"
    );

    let upstream = Arc::new(UpstreamClient::new(UpstreamConfig {
        url: config.proxy.url.clone(),
        worker: config.proxy.worker_name.clone(),
        password,
    }));
    upstream.connect().await?;

    let server = build_server(&config, None);
    server.set_proxy_mode(
        &upstream.extranonce1(),
        upstream.local_en2_size(),
        upstream.prefix_bytes(),
        upstream.version_mask(),
    );
    server.set_upstream_difficulty(upstream.upstream_difficulty());

    let mut events = base_events();
    events.on_share_forward = Some(Box::new({
        let upstream = Arc::clone(&upstream);
        move |share: ShareForward| {
            let upstream = Arc::clone(&upstream);
            async move {
                // Shares go up under the pool account's worker name,
                // not the local miner's
                let worker = upstream.worker_name().to_string();
                upstream
                    .submit_share(
                        &worker,
                        &share.job_id,
                        &share.extranonce2,
                        &share.ntime,
                        &share.nonce,
                        share.version_bits.as_deref(),
                    )
                    .await
            }
            .boxed()
        }
    }));
    server.set_events(events);

    upstream.set_events(UpstreamEvents {
        on_job: Some(Box::new({
            let server = Arc::clone(&server);
            move |params| {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server.broadcast_upstream_job(&params).await;
                });
            }
        })),
        on_difficulty: Some(Box::new({
            let server = Arc::clone(&server);
            move |diff| {
                server.set_upstream_difficulty(diff);
            }
        })),
        on_disconnect: Some(Box::new(|| {
            error!("upstream disconnected (reconnecting)");
        })),
        on_reconnect: Some(Box::new({
            let server = Arc::clone(&server);
            let upstream_for_reconnect = Arc::clone(&upstream);
            move || {
                // A reconnect may have produced a new extranonce1;
                // push the new search space out to local miners
                let server = Arc::clone(&server);
                let upstream = Arc::clone(&upstream_for_reconnect);
                tokio::spawn(async move {
                    server
                        .update_proxy_state(
                            &upstream.extranonce1(),
                            upstream.local_en2_size(),
                            upstream.prefix_bytes(),
                            upstream.version_mask(),
                        )
                        .await;
                    server.set_upstream_difficulty(upstream.upstream_difficulty());
                });
            }
        })),
    });

    server.start().await?;

    // Replay a job that arrived during the handshake, before the
    // handlers were wired; without this the first notify is lost and
    // miners idle until the next one
    if let Some(early_job) = upstream.drain_early_job() {
        info!(job = %early_job.job_id, "replaying early upstream job");
        server.broadcast_upstream_job(&early_job).await;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    server.stop().await;
    upstream.stop().await;
    Ok(())
}
