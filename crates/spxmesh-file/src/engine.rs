//! Content-addressed catalog of locally shared files plus the multi-peer
//! chunk download scheduler: discovers providers, dispatches bounded
//! concurrent chunk requests round-robin across them, verifies every
//! chunk hash before it's written, and seeds completed downloads back
//! into the local catalog.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use spxmesh_identity::Address;
use spxmesh_peer::PeerManager;
use spxmesh_protocol::{CatalogFileEntry, MessageBody};
use spxmesh_transport::DeliveryMode;

use crate::catalog::{build_response, Catalog};
use crate::download::{Download, DownloadState};
use crate::error::{FileError, Result};
use crate::events::FileEvent;
use crate::shared_file::{hash_chunk, SharedFile, DEFAULT_CHUNK_SIZE};

/// Global cap on simultaneous in-flight chunk requests across every
/// download this node is running.
const GLOBAL_CHUNK_CONCURRENCY: usize = 5;
/// Per-download cap, so one large download can't starve the others of
/// the global semaphore's permits.
const PER_FILE_CHUNK_CONCURRENCY: usize = 10;
const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);
const PROVIDER_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

struct Inner {
    local_address: Address,
    peer_manager: PeerManager,
    share_dir: PathBuf,
    shares: Mutex<HashMap<[u8; 32], SharedFile>>,
    catalogs: Mutex<HashMap<Address, Catalog>>,
    providers: Mutex<HashMap<[u8; 32], HashSet<Address>>>,
    downloads: Mutex<HashMap<[u8; 32], Arc<Download>>>,
    chunk_waiters: Mutex<HashMap<Uuid, oneshot::Sender<ChunkResult>>>,
    global_semaphore: Arc<Semaphore>,
    events: mpsc::UnboundedSender<FileEvent>,
}

struct ChunkResult {
    chunk_index: u32,
    data: Vec<u8>,
    chunk_hash: [u8; 32],
}

/// Owns the shared-file catalog and drives every in-flight download.
/// Cheaply cloneable; clones share the same state and can be handed to
/// spawned download tasks.
#[derive(Clone)]
pub struct FileEngine {
    inner: Arc<Inner>,
}

impl FileEngine {
    pub fn new(peer_manager: PeerManager, share_dir: PathBuf) -> (Self, mpsc::UnboundedReceiver<FileEvent>) {
        let local_address = peer_manager.local_address();
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = FileEngine {
            inner: Arc::new(Inner {
                local_address,
                peer_manager,
                share_dir,
                shares: Mutex::new(HashMap::new()),
                catalogs: Mutex::new(HashMap::new()),
                providers: Mutex::new(HashMap::new()),
                downloads: Mutex::new(HashMap::new()),
                chunk_waiters: Mutex::new(HashMap::new()),
                global_semaphore: Arc::new(Semaphore::new(GLOBAL_CHUNK_CONCURRENCY)),
                events,
            }),
        };
        (engine, events_rx)
    }

    /// Hash, chunk, and register `path` as a local share, persisting its
    /// metadata alongside the share index directory.
    pub async fn share_file(
        &self,
        path: &Path,
        description: Option<String>,
        category: Option<String>,
        tags: Vec<String>,
    ) -> Result<SharedFile> {
        let shared = SharedFile::from_path(
            path,
            self.inner.local_address,
            description,
            category,
            tags,
            DEFAULT_CHUNK_SIZE,
        )
        .await?;
        self.persist_metadata(&shared).await?;
        self.inner.shares.lock().insert(shared.file_hash, shared.clone());
        let _ = self.inner.events.send(FileEvent::FileShared { file: shared.clone() });
        Ok(shared)
    }

    /// Share every file directly in `path`, recursing into
    /// subdirectories when `recursive` is set.
    pub async fn share_folder(&self, path: &Path, recursive: bool) -> Result<Vec<SharedFile>> {
        let mut shared = Vec::new();
        let mut stack = vec![path.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if recursive {
                        stack.push(entry_path);
                    }
                    continue;
                }
                match self.share_file(&entry_path, None, None, Vec::new()).await {
                    Ok(file) => shared.push(file),
                    Err(err) => warn!(path = %entry_path.display(), %err, "skipping file during share_folder"),
                }
            }
        }
        Ok(shared)
    }

    pub async fn unshare(&self, file_hash: [u8; 32]) -> Result<()> {
        self.inner
            .shares
            .lock()
            .remove(&file_hash)
            .ok_or(FileError::FileNotFound(file_hash))?;
        let metadata_path = self.metadata_path(file_hash);
        if tokio::fs::metadata(&metadata_path).await.is_ok() {
            tokio::fs::remove_file(&metadata_path).await?;
        }
        let _ = self.inner.events.send(FileEvent::FileUnshared { file_hash });
        Ok(())
    }

    async fn persist_metadata(&self, shared: &SharedFile) -> Result<()> {
        tokio::fs::create_dir_all(&self.inner.share_dir).await?;
        let bytes = serde_json::to_vec_pretty(shared)?;
        tokio::fs::write(self.metadata_path(shared.file_hash), bytes).await?;
        Ok(())
    }

    fn metadata_path(&self, file_hash: [u8; 32]) -> PathBuf {
        self.inner.share_dir.join(format!("{}.json", hex::encode(file_hash)))
    }

    pub fn local_shares(&self) -> Vec<SharedFile> {
        self.inner.shares.lock().values().cloned().collect()
    }

    pub fn catalog_for(&self, peer: &Address) -> Option<Catalog> {
        self.inner.catalogs.lock().get(peer).cloned()
    }

    /// Send a `CatalogRequest` to `peer`; the response arrives later
    /// through `handle_message` and is surfaced as `catalog_received`.
    pub fn request_catalog(&self, peer: Address, filter: Option<String>, query: Option<String>) -> Result<()> {
        self.send_catalog_request(peer, filter, query, 0, 100)
    }

    fn send_catalog_request(
        &self,
        peer: Address,
        filter: Option<String>,
        query: Option<String>,
        page: u32,
        page_size: u32,
    ) -> Result<()> {
        self.inner.peer_manager.send_message(
            peer,
            MessageBody::CatalogRequest { filter, query, page, page_size },
            DeliveryMode::Reliable,
        )?;
        Ok(())
    }

    /// Entry point for every inbound application message. Returns `true`
    /// if this engine consumed the message (file-related tag); `false`
    /// means the caller should forward it on as a generic event.
    pub fn handle_message(&self, from: Address, body: &MessageBody) -> bool {
        match body {
            MessageBody::CatalogRequest { filter, query, page, page_size } => {
                self.on_catalog_request(from, filter.clone(), query.clone(), *page, *page_size);
                true
            }
            MessageBody::CatalogResponse { peer_name, total_files, total_size, files } => {
                self.on_catalog_response(from, peer_name.clone(), *total_files, *total_size, files.clone());
                true
            }
            MessageBody::P2PChunkRequest { request_id, file_hash, chunk_indices } => {
                self.on_chunk_request(from, *request_id, *file_hash, chunk_indices.clone());
                true
            }
            MessageBody::P2PChunkResponse { request_id, chunk_index, data, chunk_hash, .. } => {
                self.on_chunk_response(*request_id, *chunk_index, data.clone(), *chunk_hash);
                true
            }
            MessageBody::FileAvailability { file_hash, available_chunks } => {
                if !available_chunks.is_empty() {
                    self.inner.providers.lock().entry(*file_hash).or_default().insert(from);
                }
                true
            }
            _ => false,
        }
    }

    fn on_catalog_request(&self, from: Address, filter: Option<String>, query: Option<String>, page: u32, page_size: u32) {
        let entries: Vec<CatalogFileEntry> = self.inner.shares.lock().values().map(CatalogFileEntry::from).collect();
        let (files, total_files, total_size) = build_response(&entries, filter.as_deref(), query.as_deref(), page, page_size);
        let response = MessageBody::CatalogResponse {
            peer_name: None,
            total_files,
            total_size,
            files,
        };
        if let Err(err) = self.inner.peer_manager.send_message(from, response, DeliveryMode::Reliable) {
            debug!(%from, %err, "failed to reply to catalog request");
        }
    }

    fn on_catalog_response(
        &self,
        from: Address,
        peer_name: Option<String>,
        total_files: u32,
        total_size: u64,
        files: Vec<CatalogFileEntry>,
    ) {
        let mut providers = self.inner.providers.lock();
        for entry in &files {
            providers.entry(entry.file_hash).or_default().insert(from);
        }
        drop(providers);

        let catalog = Catalog { peer_name, total_files, total_size, files };
        self.inner.catalogs.lock().insert(from, catalog.clone());
        let _ = self.inner.events.send(FileEvent::CatalogReceived { peer: from, catalog });
    }

    fn on_chunk_request(&self, from: Address, request_id: Uuid, file_hash: [u8; 32], chunk_indices: Vec<u32>) {
        let Some(shared) = self.inner.shares.lock().get(&file_hash).cloned() else {
            debug!(%from, file_hash = %hex::encode(file_hash), "chunk request for unknown file, ignoring");
            return;
        };
        let peer_manager = self.inner.peer_manager.clone();
        tokio::spawn(async move {
            let Some(local_path) = shared.local_path.clone() else { return };
            let Ok(mut file) = tokio::fs::File::open(&local_path).await else { return };
            let count = chunk_indices.len();
            for (i, chunk_index) in chunk_indices.into_iter().enumerate() {
                let (start, end) = shared.chunk_range(chunk_index);
                if file.seek(std::io::SeekFrom::Start(start)).await.is_err() {
                    continue;
                }
                let mut buf = vec![0u8; (end - start) as usize];
                use tokio::io::AsyncReadExt;
                if file.read_exact(&mut buf).await.is_err() {
                    continue;
                }
                let chunk_hash = hash_chunk(&buf);
                let response = MessageBody::P2PChunkResponse {
                    request_id,
                    file_hash,
                    chunk_index,
                    data: buf,
                    chunk_hash,
                    has_more: i + 1 < count,
                };
                let _ = peer_manager.send_message(from, response, DeliveryMode::Reliable);
            }
        });
    }

    fn on_chunk_response(&self, request_id: Uuid, chunk_index: u32, data: Vec<u8>, chunk_hash: [u8; 32]) {
        if let Some(waiter) = self.inner.chunk_waiters.lock().remove(&request_id) {
            let _ = waiter.send(ChunkResult { chunk_index, data, chunk_hash });
        }
    }

    /// Start (or resume discovering providers for) a download of
    /// `file` into `dest`, defaulting to the file's own name in the
    /// current directory.
    pub fn start_download(&self, file: SharedFile, dest: Option<PathBuf>) -> Arc<Download> {
        let destination_path = dest.unwrap_or_else(|| PathBuf::from(&file.name));
        let download = Arc::new(Download::new(file, destination_path));
        self.inner.downloads.lock().insert(download.file.file_hash, download.clone());

        let engine = self.clone();
        let download_task = download.clone();
        tokio::spawn(async move { engine.run_download(download_task).await });
        download
    }

    /// Start a download of a file this node only knows about through
    /// `peer`'s catalog, carrying that catalog entry's `chunk_hashes`
    /// along so every chunk can be verified against a hash this node
    /// received itself, not one a provider supplies alongside the data.
    pub fn start_download_from_catalog(
        &self,
        peer: Address,
        file_hash: &[u8; 32],
        dest: Option<PathBuf>,
    ) -> Result<Arc<Download>> {
        let entry = self
            .inner
            .catalogs
            .lock()
            .get(&peer)
            .and_then(|catalog| catalog.files.iter().find(|f| &f.file_hash == file_hash).cloned())
            .ok_or(FileError::FileNotFound(*file_hash))?;
        let file = SharedFile::from_catalog_entry(&entry, peer);
        Ok(self.start_download(file, dest))
    }

    pub fn download(&self, file_hash: &[u8; 32]) -> Option<Arc<Download>> {
        self.inner.downloads.lock().get(file_hash).cloned()
    }

    pub fn pause_download(&self, file_hash: &[u8; 32]) {
        if let Some(download) = self.download(file_hash) {
            download.set_state(DownloadState::Paused);
        }
    }

    pub fn resume_download(&self, file_hash: &[u8; 32]) {
        if let Some(download) = self.download(file_hash) {
            if download.state() == DownloadState::Paused {
                download.set_state(DownloadState::Downloading);
            }
        }
    }

    pub async fn cancel_download(&self, file_hash: [u8; 32]) {
        if let Some(download) = self.inner.downloads.lock().remove(&file_hash) {
            download.set_state(DownloadState::Cancelled);
            let _ = tokio::fs::remove_file(&download.destination_path).await;
        }
    }

    async fn run_download(&self, download: Arc<Download>) {
        download.set_state(DownloadState::Downloading);

        if let Err(err) = self.discover_providers(&download).await {
            warn!(%err, "provider discovery failed");
        }
        if download.source_peers().is_empty() {
            download.fail("no peers");
            let _ = self.inner.events.send(FileEvent::DownloadFailed { snapshot: download.snapshot() });
            return;
        }

        if let Err(err) = preallocate(&download.destination_path, download.file.size).await {
            download.fail(err.to_string());
            let _ = self.inner.events.send(FileEvent::DownloadFailed { snapshot: download.snapshot() });
            return;
        }

        let file_handle = match tokio::fs::OpenOptions::new().write(true).open(&download.destination_path).await {
            Ok(f) => Arc::new(tokio::sync::Mutex::new(f)),
            Err(err) => {
                download.fail(err.to_string());
                let _ = self.inner.events.send(FileEvent::DownloadFailed { snapshot: download.snapshot() });
                return;
            }
        };

        loop {
            match download.state() {
                DownloadState::Cancelled => return,
                DownloadState::Paused => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
                _ => {}
            }
            if download.is_complete() {
                break;
            }

            let Some(chunk_index) = download.claim_next_chunk(PER_FILE_CHUNK_CONCURRENCY) else {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            };
            let Some(provider) = download.next_provider() else {
                download.release_chunk(chunk_index);
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            };

            let Ok(permit) = self.inner.global_semaphore.clone().acquire_owned().await else {
                download.release_chunk(chunk_index);
                continue;
            };

            let engine = self.clone();
            let download = download.clone();
            let file_handle = file_handle.clone();
            tokio::spawn(async move {
                let _permit = permit;
                engine.fetch_chunk(download, file_handle, provider, chunk_index).await;
            });
        }

        // Re-share under the path we just wrote to, not whatever
        // `local_path` the catalog-derived record carried (the original
        // owner's path, or none at all) -- otherwise this node would
        // advertise the file without being able to serve its chunks.
        let mut seeded_file = download.file.clone();
        seeded_file.local_path = Some(download.destination_path.clone());
        self.inner.shares.lock().insert(seeded_file.file_hash, seeded_file);
        download.set_state(DownloadState::Completed);
        let _ = self.inner.events.send(FileEvent::DownloadCompleted { snapshot: download.snapshot() });
        info!(file_hash = %hex::encode(download.file.file_hash), "download completed");
    }

    async fn discover_providers(&self, download: &Download) -> Result<()> {
        let file_hash = download.file.file_hash;
        let known: Vec<Address> = self
            .inner
            .providers
            .lock()
            .get(&file_hash)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        for peer in &known {
            download.add_source_peer(*peer);
        }
        if !known.is_empty() {
            return Ok(());
        }

        let query = hex::encode(file_hash);
        for peer in self.inner.peer_manager.connected_peers() {
            let _ = self.send_catalog_request(peer, None, Some(query.clone()), 0, 1);
        }

        let deadline = tokio::time::Instant::now() + PROVIDER_DISCOVERY_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            let found: Vec<Address> = self
                .inner
                .providers
                .lock()
                .get(&file_hash)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect();
            if !found.is_empty() {
                for peer in found {
                    download.add_source_peer(peer);
                }
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(())
    }

    async fn fetch_chunk(
        &self,
        download: Arc<Download>,
        file_handle: Arc<tokio::sync::Mutex<tokio::fs::File>>,
        provider: Address,
        chunk_index: u32,
    ) {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.inner.chunk_waiters.lock().insert(request_id, tx);

        let sent = self.inner.peer_manager.send_message(
            provider,
            MessageBody::P2PChunkRequest {
                request_id,
                file_hash: download.file.file_hash,
                chunk_indices: vec![chunk_index],
            },
            DeliveryMode::Reliable,
        );
        if let Err(err) = sent {
            self.inner.chunk_waiters.lock().remove(&request_id);
            download.release_chunk(chunk_index);
            debug!(%provider, %err, "failed to send chunk request");
            return;
        }

        let result = tokio::time::timeout(CHUNK_TIMEOUT, rx).await;
        let Ok(Ok(chunk)) = result else {
            self.inner.chunk_waiters.lock().remove(&request_id);
            download.release_chunk(chunk_index);
            return;
        };

        let Some(&expected) = download.file.chunk_hashes.get(chunk_index as usize) else {
            warn!(%provider, chunk_index, "no expected hash for chunk index, treating as verification failure");
            download.release_chunk(chunk_index);
            return;
        };
        if hash_chunk(&chunk.data) != expected || chunk.chunk_hash != expected {
            warn!(%provider, chunk_index, "chunk hash mismatch, will retry from another provider");
            download.release_chunk(chunk_index);
            return;
        }

        let (start, _end) = download.file.chunk_range(chunk_index);
        let len = chunk.data.len() as u64;
        {
            let mut file = file_handle.lock().await;
            if file.seek(std::io::SeekFrom::Start(start)).await.is_err() {
                download.release_chunk(chunk_index);
                return;
            }
            if file.write_all(&chunk.data).await.is_err() {
                download.release_chunk(chunk_index);
                return;
            }
        }

        download.complete_chunk(chunk_index, len);
        let _ = self.inner.events.send(FileEvent::DownloadProgress { snapshot: download.snapshot() });
    }
}

async fn preallocate(path: &Path, size: u64) -> std::result::Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let file = tokio::fs::File::create(path).await?;
    file.set_len(size).await?;
    Ok(())
}
