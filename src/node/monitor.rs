//! Chain tip monitoring
//!
//! Polls the node for tip changes and periodically refreshes the block
//! template so miners keep receiving fresh `ntime`/fee sets between
//! blocks. A tip change fires `on_new_block` (the clean-jobs path); a
//! refresh fires `on_template_refresh` (miners keep in-flight work).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::client::ChainRpc;
use super::types::BlockTemplate;

/// Handlers invoked from the monitor task. Must not block.
#[derive(Default)]
pub struct ChainMonitorEvents {
    /// A new chain tip appeared; the template builds on it.
    pub on_new_block: Option<Box<dyn Fn(BlockTemplate) + Send + Sync>>,
    /// Periodic refresh of the current template.
    pub on_template_refresh: Option<Box<dyn Fn(BlockTemplate) + Send + Sync>>,
    /// Poll errors (the monitor keeps running).
    pub on_error: Option<Box<dyn Fn(&crate::error::Error) + Send + Sync>>,
}

/// Polls `getbestblockhash` and drives template updates.
pub struct ChainMonitor {
    client: Arc<dyn ChainRpc>,
    poll_interval: Duration,
    refresh_interval: Duration,
    rules: Vec<String>,
    events: Arc<ChainMonitorEvents>,
    shutdown: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl ChainMonitor {
    /// Create a monitor polling at `poll_interval`.
    pub fn new(
        client: Arc<dyn ChainRpc>,
        poll_interval: Duration,
        rules: &[&str],
        events: ChainMonitorEvents,
    ) -> Self {
        Self {
            client,
            poll_interval,
            refresh_interval: Duration::from_secs(10),
            rules: rules.iter().map(|r| r.to_string()).collect(),
            events: Arc::new(events),
            shutdown: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the template refresh interval (default 10 s).
    pub fn set_refresh_interval(&mut self, interval: Duration) {
        self.refresh_interval = interval;
    }

    /// Spawn the polling task.
    pub fn start(&self) -> JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let events = Arc::clone(&self.events);
        let shutdown = Arc::clone(&self.shutdown);
        let stopped = Arc::clone(&self.stopped);
        let poll_interval = self.poll_interval;
        let refresh_interval = self.refresh_interval;
        let rules = self.rules.clone();

        tokio::spawn(async move {
            let mut last_hash = String::new();
            let mut last_refresh = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                // The stop flag covers a notification that fires while a
                // poll is in flight
                if stopped.load(Ordering::Relaxed) {
                    debug!("chain monitor stopped");
                    return;
                }
                tokio::select! {
                    _ = shutdown.notified() => {
                        debug!("chain monitor stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let rule_refs: Vec<&str> = rules.iter().map(String::as_str).collect();

                match client.get_best_block_hash().await {
                    Ok(hash) => {
                        if hash != last_hash {
                            let first = last_hash.is_empty();
                            last_hash = hash;
                            match client.get_block_template(&rule_refs).await {
                                Ok(tmpl) => {
                                    debug!(height = tmpl.height, first, "new chain tip");
                                    last_refresh = tokio::time::Instant::now();
                                    if let Some(cb) = &events.on_new_block {
                                        cb(tmpl);
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "template fetch after tip change failed");
                                    if let Some(cb) = &events.on_error {
                                        cb(&e);
                                    }
                                }
                            }
                            continue;
                        }

                        if last_refresh.elapsed() >= refresh_interval {
                            match client.get_block_template(&rule_refs).await {
                                Ok(tmpl) => {
                                    last_refresh = tokio::time::Instant::now();
                                    if let Some(cb) = &events.on_template_refresh {
                                        cb(tmpl);
                                    }
                                }
                                Err(e) => {
                                    if let Some(cb) = &events.on_error {
                                        cb(&e);
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        if let Some(cb) = &events.on_error {
                            cb(&e);
                        }
                    }
                }
            }
        })
    }

    /// Stop the polling task.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeNode {
        hashes: Mutex<Vec<String>>,
        templates: AtomicUsize,
    }

    #[async_trait]
    impl ChainRpc for FakeNode {
        async fn get_block_template(&self, _rules: &[&str]) -> Result<BlockTemplate> {
            self.templates.fetch_add(1, Ordering::SeqCst);
            Ok(BlockTemplate {
                height: 100,
                bits: "207fffff".to_string(),
                cur_time: 1_700_000_000,
                previous_block_hash: "00".repeat(32),
                ..Default::default()
            })
        }

        async fn submit_block(&self, _block_hex: &str) -> Result<()> {
            Ok(())
        }

        async fn get_best_block_hash(&self) -> Result<String> {
            let mut hashes = self.hashes.lock();
            if hashes.len() > 1 {
                Ok(hashes.remove(0))
            } else {
                Ok(hashes[0].clone())
            }
        }
    }

    #[tokio::test]
    async fn test_tip_change_fires_new_block() {
        let node = Arc::new(FakeNode {
            hashes: Mutex::new(vec!["aa".to_string(), "bb".to_string()]),
            templates: AtomicUsize::new(0),
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let events = ChainMonitorEvents {
            on_new_block: Some(Box::new(move |tmpl| {
                let _ = tx.send(tmpl.height);
            })),
            ..Default::default()
        };

        let monitor = ChainMonitor::new(node.clone(), Duration::from_millis(10), &[], events);
        let handle = monitor.start();

        // Two distinct hashes -> two new-block events
        assert_eq!(rx.recv().await, Some(100));
        assert_eq!(rx.recv().await, Some(100));

        monitor.stop();
        let _ = handle.await;
        assert!(node.templates.load(Ordering::SeqCst) >= 2);
    }
}
