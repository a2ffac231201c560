//! Composes identity, transports, LAN discovery, the peer manager, the
//! file engine, and the virtual LAN overlay into one running mesh node.

pub mod config;
pub mod error;
pub mod node;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::{Node, NodeEvent};

/// Install a `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `info`. Library crates in this workspace only emit `tracing` events;
/// this is the one place a subscriber gets installed.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
