//! In-flight and completed multi-peer downloads. One `Download` per
//! file hash being fetched; the scheduler task in `engine` is the only
//! writer of the destination file, so the bitsets here only ever need to
//! coordinate readers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use spxmesh_identity::Address;

use crate::shared_file::SharedFile;
use crate::speed::SpeedEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

pub struct Download {
    pub file: SharedFile,
    pub destination_path: PathBuf,
    state: Mutex<DownloadState>,
    source_peers: Mutex<Vec<Address>>,
    chunks_completed: Mutex<Vec<bool>>,
    chunks_in_progress: Mutex<HashSet<u32>>,
    bytes_downloaded: AtomicU64,
    speed: Mutex<SpeedEstimator>,
    started_at: Instant,
    error: Mutex<Option<String>>,
    provider_cursor: Mutex<usize>,
}

/// Point-in-time view handed out with `download_progress`/`download_completed`.
#[derive(Debug, Clone)]
pub struct DownloadSnapshot {
    pub file_hash: [u8; 32],
    pub state: DownloadState,
    pub bytes_downloaded: u64,
    pub total_size: u64,
    pub chunks_completed: u32,
    pub total_chunks: u32,
    pub speed_bps: u64,
    pub source_peers: Vec<Address>,
    pub error: Option<String>,
}

impl Download {
    pub fn new(file: SharedFile, destination_path: PathBuf) -> Self {
        let total_chunks = file.total_chunks as usize;
        Download {
            file,
            destination_path,
            state: Mutex::new(DownloadState::Pending),
            source_peers: Mutex::new(Vec::new()),
            chunks_completed: Mutex::new(vec![false; total_chunks]),
            chunks_in_progress: Mutex::new(HashSet::new()),
            bytes_downloaded: AtomicU64::new(0),
            speed: Mutex::new(SpeedEstimator::default()),
            started_at: Instant::now(),
            error: Mutex::new(None),
            provider_cursor: Mutex::new(0),
        }
    }

    /// Round-robin pick among the currently known source peers.
    pub fn next_provider(&self) -> Option<Address> {
        let peers = self.source_peers.lock();
        if peers.is_empty() {
            return None;
        }
        let mut cursor = self.provider_cursor.lock();
        let peer = peers[*cursor % peers.len()];
        *cursor = (*cursor + 1) % peers.len();
        Some(peer)
    }

    pub fn state(&self) -> DownloadState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: DownloadState) {
        *self.state.lock() = state;
    }

    pub fn fail(&self, message: impl Into<String>) {
        *self.error.lock() = Some(message.into());
        self.set_state(DownloadState::Failed);
    }

    pub fn add_source_peer(&self, peer: Address) {
        let mut peers = self.source_peers.lock();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    pub fn source_peers(&self) -> Vec<Address> {
        self.source_peers.lock().clone()
    }

    /// Pick the next chunk that is neither completed nor currently
    /// in-flight, up to `per_file_cap` simultaneous in-flight chunks.
    /// Marks it in-progress before returning.
    pub fn claim_next_chunk(&self, per_file_cap: usize) -> Option<u32> {
        let completed = self.chunks_completed.lock();
        let mut in_progress = self.chunks_in_progress.lock();
        if in_progress.len() >= per_file_cap {
            return None;
        }
        let index = completed
            .iter()
            .enumerate()
            .position(|(i, done)| !done && !in_progress.contains(&(i as u32)))?;
        in_progress.insert(index as u32);
        Some(index as u32)
    }

    pub fn release_chunk(&self, chunk_index: u32) {
        self.chunks_in_progress.lock().remove(&chunk_index);
    }

    /// Record a verified chunk write: sets the completed bit, releases
    /// the in-flight slot, and feeds the speed estimator.
    pub fn complete_chunk(&self, chunk_index: u32, bytes: u64) {
        self.chunks_completed.lock()[chunk_index as usize] = true;
        self.chunks_in_progress.lock().remove(&chunk_index);
        self.bytes_downloaded.fetch_add(bytes, Ordering::AcqRel);
        self.speed.lock().record(bytes);
    }

    pub fn is_complete(&self) -> bool {
        self.chunks_completed.lock().iter().all(|done| *done)
    }

    pub fn chunks_completed_count(&self) -> u32 {
        self.chunks_completed.lock().iter().filter(|done| **done).count() as u32
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn snapshot(&self) -> DownloadSnapshot {
        DownloadSnapshot {
            file_hash: self.file.file_hash,
            state: self.state(),
            bytes_downloaded: self.bytes_downloaded(),
            total_size: self.file.size,
            chunks_completed: self.chunks_completed_count(),
            total_chunks: self.file.total_chunks,
            speed_bps: self.speed.lock().bps(),
            source_peers: self.source_peers(),
            error: self.error.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(total_chunks: u32) -> SharedFile {
        SharedFile {
            file_hash: [1u8; 32],
            name: "f".into(),
            extension: "bin".into(),
            size: total_chunks as u64 * 1024,
            description: None,
            category: "other".into(),
            tags: vec![],
            thumbnail: None,
            chunk_size: 1024,
            total_chunks,
            chunk_hashes: vec![[0u8; 32]; total_chunks as usize],
            shared_at: 0,
            owner_address: Address::derive(&[9u8; 32]),
            local_path: None,
        }
    }

    #[test]
    fn completes_when_every_chunk_done() {
        let download = Download::new(file(2), PathBuf::from("/tmp/f"));
        assert!(!download.is_complete());
        let a = download.claim_next_chunk(10).unwrap();
        download.complete_chunk(a, 1024);
        assert!(!download.is_complete());
        let b = download.claim_next_chunk(10).unwrap();
        download.complete_chunk(b, 1024);
        assert!(download.is_complete());
        assert_eq!(download.bytes_downloaded(), 2048);
    }

    #[test]
    fn respects_in_flight_cap() {
        let download = Download::new(file(5), PathBuf::from("/tmp/f"));
        let claimed: Vec<u32> = (0..3).filter_map(|_| download.claim_next_chunk(2)).collect();
        assert_eq!(claimed.len(), 2);
    }
}
