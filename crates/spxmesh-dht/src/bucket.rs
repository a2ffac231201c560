use std::collections::VecDeque;
use std::time::Instant;

use spxmesh_identity::Address;

use crate::node::DhtNode;

pub const K: usize = 20;

/// One K-bucket: up to `K` live contacts (ordered least-recently-seen at
/// the front, most-recently-seen at the back) plus a `K`-deep
/// replacement cache for contacts bumped by a full bucket.
pub struct Bucket {
    contacts: VecDeque<DhtNode>,
    replacement: VecDeque<DhtNode>,
    last_updated: Instant,
}

impl Default for Bucket {
    fn default() -> Self {
        Bucket {
            contacts: VecDeque::with_capacity(K),
            replacement: VecDeque::with_capacity(K),
            last_updated: Instant::now(),
        }
    }
}

impl Bucket {
    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn contacts(&self) -> impl Iterator<Item = &DhtNode> {
        self.contacts.iter()
    }

    /// Insert or refresh `node`. If the bucket is full and `node` is new,
    /// it is pushed to the replacement cache instead.
    pub fn add(&mut self, node: DhtNode) {
        self.last_updated = Instant::now();
        if let Some(pos) = self.contacts.iter().position(|n| n.address == node.address) {
            let mut existing = self.contacts.remove(pos).unwrap();
            existing.touch();
            existing.endpoint = node.endpoint;
            self.contacts.push_back(existing);
            return;
        }
        if self.contacts.len() < K {
            self.contacts.push_back(node);
            return;
        }
        if let Some(pos) = self.replacement.iter().position(|n| n.address == node.address) {
            self.replacement.remove(pos);
        }
        if self.replacement.len() >= K {
            self.replacement.pop_front();
        }
        self.replacement.push_back(node);
    }

    /// Remove `address` from the live contacts, promoting the oldest
    /// replacement-cache entry if one is available.
    pub fn remove(&mut self, address: &Address) {
        if let Some(pos) = self.contacts.iter().position(|n| &n.address == address) {
            self.contacts.remove(pos);
            if let Some(promoted) = self.replacement.pop_front() {
                self.contacts.push_back(promoted);
            }
            self.last_updated = Instant::now();
        }
    }

    pub fn record_failure(&mut self, address: &Address) {
        if let Some(node) = self.contacts.iter_mut().find(|n| &n.address == address) {
            node.record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddr, SocketAddrV4, Ipv4Addr};

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
    }

    #[test]
    fn overflow_goes_to_replacement_cache() {
        let mut bucket = Bucket::default();
        for i in 0..K as u8 {
            bucket.add(DhtNode::new(addr(i), endpoint(1000 + i as u16)));
        }
        assert_eq!(bucket.len(), K);
        bucket.add(DhtNode::new(addr(200), endpoint(9999)));
        assert_eq!(bucket.len(), K);
        assert!(!bucket.contacts().any(|n| n.address == addr(200)));
    }

    #[test]
    fn remove_promotes_from_replacement_cache() {
        let mut bucket = Bucket::default();
        for i in 0..K as u8 {
            bucket.add(DhtNode::new(addr(i), endpoint(1000 + i as u16)));
        }
        bucket.add(DhtNode::new(addr(201), endpoint(9998)));
        bucket.remove(&addr(0));
        assert_eq!(bucket.len(), K);
        assert!(bucket.contacts().any(|n| n.address == addr(201)));
    }

    #[test]
    fn readd_moves_to_most_recent() {
        let mut bucket = Bucket::default();
        bucket.add(DhtNode::new(addr(1), endpoint(1)));
        bucket.add(DhtNode::new(addr(2), endpoint(2)));
        bucket.add(DhtNode::new(addr(1), endpoint(1)));
        let order: Vec<_> = bucket.contacts().map(|n| n.address).collect();
        assert_eq!(order, vec![addr(2), addr(1)]);
    }
}
