use std::net::SocketAddr;
use std::time::{Duration, Instant};

use spxmesh_identity::Address;

pub const DEFAULT_STALE_AGE: Duration = Duration::from_secs(15 * 60);
pub const STALE_FAIL_COUNT: u32 = 2;

/// One routing-table entry.
#[derive(Debug, Clone)]
pub struct DhtNode {
    pub address: Address,
    pub endpoint: SocketAddr,
    pub last_seen: Instant,
    pub fail_count: u32,
}

impl DhtNode {
    pub fn new(address: Address, endpoint: SocketAddr) -> Self {
        DhtNode {
            address,
            endpoint,
            last_seen: Instant::now(),
            fail_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
        self.fail_count = 0;
    }

    pub fn record_failure(&mut self) {
        self.fail_count += 1;
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.fail_count > STALE_FAIL_COUNT || self.last_seen.elapsed() > max_age
    }
}
