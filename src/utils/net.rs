//! TCP socket tuning shared by the miner-facing server and the upstream client

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::debug;

/// Keepalive idle time. Dead ASIC connections are detected within a
/// couple of probe intervals instead of lingering for hours.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(45);

/// Enable keepalive (45 s idle) and disable Nagle on a mining connection.
///
/// Failures are logged and ignored: a socket without keepalive still
/// mines, it just detects dead peers more slowly.
pub fn tune_mining_socket(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }

    let sock = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(Duration::from_secs(30));
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        debug!(error = %e, "set_tcp_keepalive failed");
    }
}
