//! Kademlia-style routing table over the 160-bit address space: K=20
//! buckets with replacement caches, XOR-distance closest-node lookup,
//! and staleness tracking for periodic bucket refresh.

pub mod bucket;
pub mod node;
pub mod table;

pub use bucket::{Bucket, K};
pub use node::{DhtNode, DEFAULT_STALE_AGE, STALE_FAIL_COUNT};
pub use table::RoutingTable;
