//! A locally shared file: content-addressed by the SHA-256 of its bytes,
//! split into fixed-size chunks each individually hashed for per-chunk
//! integrity checking during download.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spxmesh_crypto::hashing::sha256_32;
use spxmesh_identity::Address;
use spxmesh_protocol::CatalogFileEntry;
use tokio::io::AsyncReadExt;

use crate::category::category_for_extension;
use crate::error::Result;

pub const DEFAULT_CHUNK_SIZE: u32 = 256 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedFile {
    pub file_hash: [u8; 32],
    pub name: String,
    pub extension: String,
    pub size: u64,
    pub description: Option<String>,
    pub category: String,
    pub tags: Vec<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub chunk_hashes: Vec<[u8; 32]>,
    pub shared_at: u64,
    pub owner_address: Address,
    pub local_path: Option<PathBuf>,
}

impl SharedFile {
    /// Stream `path` once, computing the whole-file SHA-256 alongside a
    /// SHA-256 of each `chunk_size` chunk, and build the metadata record.
    pub async fn from_path(
        path: &Path,
        owner_address: Address,
        description: Option<String>,
        category_override: Option<String>,
        tags: Vec<String>,
        chunk_size: u32,
    ) -> Result<SharedFile> {
        let metadata = tokio::fs::metadata(path).await?;
        let size = metadata.len();

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let (file_hash, chunk_hashes) = hash_whole_file_and_chunks(path, size, chunk_size).await?;
        let total_chunks = chunk_hashes.len() as u32;
        let category = category_override.unwrap_or_else(|| category_for_extension(&extension).to_string());

        Ok(SharedFile {
            file_hash,
            name,
            extension,
            size,
            description,
            category,
            tags,
            thumbnail: None,
            chunk_size,
            total_chunks,
            chunk_hashes,
            shared_at: spxmesh_protocol::message::now_unix_ms(),
            owner_address,
            local_path: Some(path.to_path_buf()),
        })
    }

    pub fn chunk_range(&self, chunk_index: u32) -> (u64, u64) {
        let start = chunk_index as u64 * self.chunk_size as u64;
        let end = self.size.min(start + self.chunk_size as u64);
        (start, end)
    }

    /// Build the record a download is scheduled against from a remote
    /// peer's catalog entry. `owner` is the peer the catalog came from,
    /// since a `CatalogFileEntry` doesn't carry its own provider address.
    /// `local_path` stays `None` until the download completes, so this
    /// file isn't mistakenly treated as servable before any bytes of it
    /// exist on disk.
    pub fn from_catalog_entry(entry: &CatalogFileEntry, owner: Address) -> SharedFile {
        SharedFile {
            file_hash: entry.file_hash,
            name: entry.name.clone(),
            extension: entry.extension.clone(),
            size: entry.size,
            description: entry.description.clone(),
            category: entry.category.clone(),
            tags: entry.tags.clone(),
            thumbnail: None,
            chunk_size: entry.chunk_size,
            total_chunks: entry.total_chunks,
            chunk_hashes: entry.chunk_hashes.clone(),
            shared_at: spxmesh_protocol::message::now_unix_ms(),
            owner_address: owner,
            local_path: None,
        }
    }
}

/// One pass over the file: feed every byte into the whole-file hasher and
/// into a per-chunk hasher that resets every `chunk_size` bytes.
async fn hash_whole_file_and_chunks(
    path: &Path,
    size: u64,
    chunk_size: u32,
) -> Result<([u8; 32], Vec<[u8; 32]>)> {
    use sha2::{Digest, Sha256};

    let mut file = tokio::fs::File::open(path).await?;
    let mut whole = Sha256::new();
    let mut chunk_hashes = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];

    let total_chunks = if size == 0 { 0 } else { ((size - 1) / chunk_size as u64) + 1 };
    for chunk_index in 0..total_chunks {
        let start = chunk_index * chunk_size as u64;
        let end = size.min(start + chunk_size as u64);
        let mut remaining = end - start;
        let mut chunk_hasher = Sha256::new();
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let read = file.read(&mut buf[..want]).await?;
            if read == 0 {
                break;
            }
            whole.update(&buf[..read]);
            chunk_hasher.update(&buf[..read]);
            remaining -= read as u64;
        }
        chunk_hashes.push(chunk_hasher.finalize().into());
    }

    Ok((whole.finalize().into(), chunk_hashes))
}

/// SHA-256 of an in-memory chunk, used both by the scheduler (verifying a
/// received chunk) and the server (hashing a chunk before replying).
pub fn hash_chunk(data: &[u8]) -> [u8; 32] {
    sha256_32(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn chunking_matches_declared_total() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        let mut f = tokio::fs::File::create(&path).await.unwrap();
        let data = vec![7u8; 300 * 1024];
        f.write_all(&data).await.unwrap();
        f.flush().await.unwrap();

        let shared = SharedFile::from_path(
            &path,
            Address::derive(&spxmesh_crypto::KeyPair::generate().public_key()),
            None,
            None,
            vec![],
            DEFAULT_CHUNK_SIZE,
        )
        .await
        .unwrap();

        assert_eq!(shared.total_chunks, 2);
        assert_eq!(shared.chunk_hashes.len(), 2);
        assert_eq!(shared.size, data.len() as u64);

        let (start, end) = shared.chunk_range(0);
        assert_eq!(hash_chunk(&data[start as usize..end as usize]), shared.chunk_hashes[0]);
        let (start, end) = shared.chunk_range(1);
        assert_eq!(hash_chunk(&data[start as usize..end as usize]), shared.chunk_hashes[1]);
    }

    #[tokio::test]
    async fn category_defaults_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        tokio::fs::write(&path, b"not really a png").await.unwrap();

        let shared = SharedFile::from_path(
            &path,
            Address::derive(&spxmesh_crypto::KeyPair::generate().public_key()),
            None,
            None,
            vec![],
            DEFAULT_CHUNK_SIZE,
        )
        .await
        .unwrap();
        assert_eq!(shared.category, "images");
    }

    #[test]
    fn catalog_entry_round_trips_chunk_hashes() {
        let owner = Address::derive(&spxmesh_crypto::KeyPair::generate().public_key());
        let entry = CatalogFileEntry {
            file_hash: [9u8; 32],
            name: "movie".to_string(),
            extension: "mp4".to_string(),
            size: 2048,
            description: None,
            category: "video".to_string(),
            tags: vec![],
            chunk_size: 1024,
            total_chunks: 2,
            chunk_hashes: vec![[1u8; 32], [2u8; 32]],
        };

        let shared = SharedFile::from_catalog_entry(&entry, owner);
        assert_eq!(shared.chunk_hashes, entry.chunk_hashes);
        assert_eq!(shared.total_chunks, 2);
        assert!(shared.local_path.is_none());
        assert_eq!(shared.owner_address, owner);
    }
}
