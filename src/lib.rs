//! # minevault
//!
//! A solo/proxy Stratum V1 mining server for Bitcoin-family chains.
//!
//! ## Features
//!
//! - **Solo mining**: builds jobs from a local node's block templates,
//!   validates shares bit-exactly against the 80-byte header, and
//!   submits winning blocks over JSON-RPC
//! - **Proxy mining**: re-serves an upstream pool's work to local
//!   miners, carving unique extranonce1 prefixes out of the upstream
//!   extranonce2 space, and forwards qualifying shares
//! - **Per-session vardiff** with warmup, flood fast-path, and idle
//!   halving
//! - **Version rolling (BIP320)** negotiation on both sides
//!
//! ## Architecture
//!
//! The stratum server runs one task per miner connection over
//! newline-delimited JSON-RPC. Job construction, share validation, and
//! difficulty control live in [`stratum`]; node RPC and chain-tip
//! monitoring in [`node`]; the upstream pool client in [`upstream`].

#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_lifetimes,
    unused_qualifications,
    clippy::all
)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod config;
pub mod core;
pub mod error;
pub mod node;
pub mod stratum;
pub mod upstream;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use stratum::StratumServer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export of commonly used types
pub mod prelude {
    pub use crate::chain::{AddressCodec, CoinDef, HexScriptCodec};
    pub use crate::config::{Config, MiningMode};
    pub use crate::error::{Error, Result};
    pub use crate::node::{ChainMonitor, ChainRpc, NodeClient};
    pub use crate::stratum::{ServerEvents, StratumServer, VardiffConfig};
    pub use crate::upstream::{UpstreamClient, UpstreamConfig, UpstreamEvents};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
