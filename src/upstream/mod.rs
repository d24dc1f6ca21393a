//! Upstream pool client (proxy mode)
//!
//! An outbound Stratum V1 client: configures version-rolling, subscribes,
//! authorizes, receives job/difficulty notifications, and forwards
//! qualifying shares. On disconnect it reconnects with exponential
//! backoff and re-runs the handshake; the server is then told about the
//! new extranonce1 via `update_proxy_state`.

mod client;

pub use client::{UpstreamClient, UpstreamConfig, UpstreamEvents};
