use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spxmesh_identity::{Address, ADDRESS_LEN};

use crate::bucket::Bucket;
use crate::node::DhtNode;

const BUCKET_COUNT: usize = ADDRESS_LEN * 8;

/// A Kademlia-style routing table: `160` K-buckets indexed by the length
/// of the XOR-distance prefix shared with `self.local`.
pub struct RoutingTable {
    local: Address,
    buckets: Vec<Mutex<Bucket>>,
}

impl RoutingTable {
    pub fn new(local: Address) -> Self {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        buckets.resize_with(BUCKET_COUNT, || Mutex::new(Bucket::default()));
        RoutingTable { local, buckets }
    }

    pub fn local(&self) -> Address {
        self.local
    }

    fn bucket_index_for(&self, address: &Address) -> Option<usize> {
        if *address == self.local {
            return None;
        }
        Some(self.local.bucket_index(address))
    }

    /// Insert or refresh a contact. Adding `self.local` is a no-op.
    pub fn add(&self, address: Address, endpoint: SocketAddr) {
        let Some(idx) = self.bucket_index_for(&address) else {
            return;
        };
        self.buckets[idx].lock().add(DhtNode::new(address, endpoint));
    }

    pub fn remove(&self, address: &Address) {
        if let Some(idx) = self.bucket_index_for(address) {
            self.buckets[idx].lock().remove(address);
        }
    }

    pub fn record_failure(&self, address: &Address) {
        if let Some(idx) = self.bucket_index_for(address) {
            self.buckets[idx].lock().record_failure(address);
        }
    }

    /// Collect up to `n` contacts closest to `target` by XOR distance,
    /// expanding outward from `target`'s own bucket when it is sparse.
    pub fn closest(&self, target: &Address, n: usize) -> Vec<DhtNode> {
        let mut candidates: Vec<DhtNode> = Vec::new();

        let start = self.bucket_index_for(target).unwrap_or(0);
        let mut offset = 0usize;
        while candidates.len() < n && offset <= BUCKET_COUNT {
            let mut hit = false;
            if offset == 0 {
                candidates.extend(self.buckets[start].lock().contacts().cloned());
                hit = true;
            } else {
                if start >= offset {
                    candidates.extend(self.buckets[start - offset].lock().contacts().cloned());
                    hit = true;
                }
                if start + offset < BUCKET_COUNT {
                    candidates.extend(self.buckets[start + offset].lock().contacts().cloned());
                    hit = true;
                }
            }
            if !hit {
                break;
            }
            offset += 1;
        }

        candidates.sort_by_key(|node| target.distance(&node.address));
        candidates.truncate(n);
        candidates
    }

    /// Non-empty buckets whose last update is older than `max_age`. The
    /// caller should refresh each by issuing a lookup for a random id
    /// drawn from that bucket's range.
    pub fn stale_buckets(&self, max_age: Duration) -> Vec<usize> {
        let now = Instant::now();
        self.buckets
            .iter()
            .enumerate()
            .filter_map(|(idx, bucket)| {
                let bucket = bucket.lock();
                if !bucket.is_empty() && now.duration_since(bucket.last_updated()) > max_age {
                    Some(idx)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn random_id_for_bucket(&self, bucket_idx: usize) -> Address {
        self.local.random_id_in_bucket(bucket_idx)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn add_rejects_self() {
        let local = Address([7u8; 20]);
        let table = RoutingTable::new(local);
        table.add(local, endpoint(1));
        assert_eq!(table.len(), 0);
    }

    fn derived(seed: u8) -> Address {
        Address::derive(&[seed; 32])
    }

    #[test]
    fn closest_sorted_by_distance() {
        let local = Address([0u8; 20]);
        let table = RoutingTable::new(local);
        let a = derived(1);
        let b = derived(2);
        let c = derived(3);
        table.add(a, endpoint(1));
        table.add(b, endpoint(2));
        table.add(c, endpoint(3));

        let target = derived(4);
        let closest = table.closest(&target, 2);
        assert_eq!(closest.len(), 2);
        assert!(target.distance(&closest[0].address) <= target.distance(&closest[1].address));
    }

    #[test]
    fn remove_promotes_replacement() {
        let local = Address([0u8; 20]);
        let table = RoutingTable::new(local);
        let a = derived(5);
        table.add(a, endpoint(1));
        table.remove(&a);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn stale_buckets_empty_for_fresh_table() {
        let local = Address([0u8; 20]);
        let table = RoutingTable::new(local);
        table.add(derived(6), endpoint(1));
        assert!(table.stale_buckets(Duration::from_secs(900)).is_empty());
    }
}
