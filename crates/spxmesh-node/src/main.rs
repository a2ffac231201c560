//! Minimal standalone runner: starts one node with a fresh identity
//! (or one loaded from `--identity <path>`) and keeps it alive until
//! Ctrl-C. Host applications embedding this crate drive `Node` directly
//! instead of going through this binary.

use std::path::PathBuf;

use spxmesh_crypto::KeyPair;
use spxmesh_node::{init_tracing, Node, NodeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    let mut identity_path: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = args.next().map(PathBuf::from),
            "--identity" => identity_path = args.next().map(PathBuf::from),
            other => tracing::warn!(arg = other, "ignoring unrecognized argument"),
        }
    }

    let config = NodeConfig::load(config_path.as_deref())?;
    let identity = match identity_path {
        Some(path) if path.exists() => {
            let seed_hex = std::fs::read_to_string(&path)?;
            let mut seed = [0u8; 32];
            hex::decode_to_slice(seed_hex.trim(), &mut seed)?;
            KeyPair::from_seed(seed)
        }
        _ => KeyPair::generate(),
    };

    let (node, mut events) = Node::start(config, identity).await?;
    tracing::info!(shareable = %node.shareable_address()?, "node listening");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                node.stop().await;
                break;
            }
            event = events.recv() => {
                match event {
                    Some(event) => tracing::debug!(?event, "node event"),
                    None => break,
                }
            }
        }
    }
    Ok(())
}
