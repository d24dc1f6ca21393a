//! Upstream client tests against a scripted fake pool.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use minevault::upstream::{UpstreamClient, UpstreamConfig, UpstreamEvents};

/// Every method name the fake pool saw, in order.
type MethodLog = Arc<Mutex<Vec<String>>>;

/// A fake pool connection: answers the handshake, pushes a difficulty
/// and (optionally) a job, accepts submits, and dies on `kill`.
async fn serve_connection(
    stream: TcpStream,
    methods: MethodLog,
    send_early_job: bool,
    kill: Arc<Notify>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = kill.notified() => return,
            read = reader.read_line(&mut line) => read,
        };
        match read {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let request: Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default().to_string();
        methods.lock().push(method.clone());

        let response = match method.as_str() {
            "mining.configure" => json!({
                "id": id,
                "result": {"version-rolling": true, "version-rolling.mask": "1fffe000"},
                "error": null
            }),
            "mining.subscribe" => json!({
                "id": id,
                "result": [
                    [["mining.set_difficulty", "1"], ["mining.notify", "1"]],
                    "a1b2c3d4",
                    8
                ],
                "error": null
            }),
            "mining.authorize" => json!({"id": id, "result": true, "error": null}),
            "mining.submit" => json!({"id": id, "result": true, "error": null}),
            _ => json!({"id": id, "result": null, "error": [20, "unknown", null]}),
        };
        let frame = response.to_string() + "\n";
        if writer.write_all(frame.as_bytes()).await.is_err() {
            return;
        }

        if method == "mining.authorize" {
            // Post-handshake notifications, the way real pools do
            let diff = json!({"id": null, "method": "mining.set_difficulty", "params": [16384.0]})
                .to_string()
                + "\n";
            let _ = writer.write_all(diff.as_bytes()).await;

            if send_early_job {
                let notify = json!({
                    "id": null,
                    "method": "mining.notify",
                    "params": [
                        1234,
                        "00".repeat(32),
                        "0200",
                        "ffff",
                        [],
                        "20000000",
                        "17057e19",
                        "65abcdef",
                        true
                    ]
                })
                .to_string()
                    + "\n";
                let _ = writer.write_all(notify.as_bytes()).await;
            }
        }
    }
}

async fn fake_pool(send_early_job: bool) -> (std::net::SocketAddr, MethodLog, Arc<Notify>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let methods: MethodLog = Arc::new(Mutex::new(Vec::new()));
    let kill = Arc::new(Notify::new());

    let log = Arc::clone(&methods);
    let kill_for_pool = Arc::clone(&kill);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let log = Arc::clone(&log);
            let kill = Arc::clone(&kill_for_pool);
            tokio::spawn(async move {
                serve_connection(stream, log, send_early_job, kill).await;
            });
        }
    });

    (addr, methods, kill)
}

fn client_for(addr: std::net::SocketAddr) -> UpstreamClient {
    UpstreamClient::new(UpstreamConfig {
        url: format!("stratum+tcp://{}", addr),
        worker: "wallet.proxy".to_string(),
        password: "x".to_string(),
    })
}

#[tokio::test]
async fn test_handshake_order_and_negotiated_state() {
    let (addr, methods, _kill) = fake_pool(false).await;
    let client = client_for(addr);
    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert!(client.is_authorized());
    assert_eq!(client.extranonce1(), "a1b2c3d4");
    assert_eq!(client.extranonce2_size(), 8);
    // 2 bytes carved for miner prefixes, 6 left locally
    assert_eq!(client.prefix_bytes(), 2);
    assert_eq!(client.local_en2_size(), 6);
    assert!(client.version_rolling());
    assert_eq!(client.version_mask(), 0x1fffe000);

    assert_eq!(
        *methods.lock(),
        vec!["mining.configure", "mining.subscribe", "mining.authorize"]
    );

    client.stop().await;
}

#[tokio::test]
async fn test_difficulty_notification_updates_cache() {
    let (addr, _methods, _kill) = fake_pool(false).await;
    let client = client_for(addr);

    let (diff_tx, mut diff_rx) = tokio::sync::mpsc::unbounded_channel();
    client.set_events(UpstreamEvents {
        on_difficulty: Some(Box::new(move |d| {
            let _ = diff_tx.send(d);
        })),
        ..Default::default()
    });

    client.connect().await.unwrap();

    let diff = tokio::time::timeout(Duration::from_secs(5), diff_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(diff, 16384.0);
    assert_eq!(client.upstream_difficulty(), 16384.0);

    client.stop().await;
}

#[tokio::test]
async fn test_early_job_buffered_until_drained() {
    let (addr, _methods, _kill) = fake_pool(true).await;
    let client = client_for(addr);
    // No handlers wired: the notify that follows authorize must land in
    // the early-job slot instead of vanishing
    client.connect().await.unwrap();

    let mut early = None;
    for _ in 0..50 {
        early = client.drain_early_job();
        if early.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let job = early.expect("early job was lost");
    // Numeric job id rendered as hex
    assert_eq!(job.job_id, "4d2");
    assert_eq!(job.nbits, "17057e19");
    assert!(job.clean_jobs);
    assert_eq!(client.last_nbits(), "17057e19");

    // One-slot buffer: a second drain is empty
    assert!(client.drain_early_job().is_none());

    client.stop().await;
}

#[tokio::test]
async fn test_submit_share_round_trip() {
    let (addr, methods, _kill) = fake_pool(false).await;
    let client = client_for(addr);
    client.connect().await.unwrap();

    let (accepted, reason) = client
        .submit_share(
            "wallet.proxy",
            "4d2",
            "0002112233445566",
            "65abcdef",
            "00000001",
            Some("1fffe000"),
        )
        .await;
    assert!(accepted, "reason: {}", reason);
    assert!(methods.lock().contains(&"mining.submit".to_string()));

    client.stop().await;
}

#[tokio::test]
async fn test_reconnect_after_pool_drop() {
    let (addr, _methods, kill) = fake_pool(false).await;
    let client = client_for(addr);

    let (reconnect_tx, mut reconnect_rx) = tokio::sync::mpsc::unbounded_channel();
    let (disconnect_tx, mut disconnect_rx) = tokio::sync::mpsc::unbounded_channel();
    client.set_events(UpstreamEvents {
        on_reconnect: Some(Box::new(move || {
            let _ = reconnect_tx.send(());
        })),
        on_disconnect: Some(Box::new(move || {
            let _ = disconnect_tx.send(());
        })),
        ..Default::default()
    });

    client.connect().await.unwrap();
    assert!(client.is_connected());

    // The pool drops the connection mid-mine
    kill.notify_waiters();

    tokio::time::timeout(Duration::from_secs(5), disconnect_rx.recv())
        .await
        .expect("no disconnect event")
        .unwrap();

    // Shares during the outage fail fast instead of hanging
    if !client.is_connected() {
        let (accepted, reason) = client
            .submit_share("wallet.proxy", "1", "0000", "65abcdef", "00000000", None)
            .await;
        assert!(!accepted);
        assert_eq!(reason, "upstream disconnected");
    }

    // The watcher re-dials (1 s backoff) and re-runs the handshake
    tokio::time::timeout(Duration::from_secs(10), reconnect_rx.recv())
        .await
        .expect("no reconnect event")
        .unwrap();
    assert!(client.is_connected());
    assert!(client.is_authorized());
    assert_eq!(client.extranonce1(), "a1b2c3d4");

    // And shares flow again
    let (accepted, _) = client
        .submit_share("wallet.proxy", "4d2", "0000112233445566", "65abcdef", "00000002", None)
        .await;
    assert!(accepted);

    client.stop().await;
}
