//! One peer's advertised set of shared files, and the filter/pagination
//! logic applied on both sides of a catalog exchange.

use spxmesh_protocol::CatalogFileEntry;

use crate::shared_file::SharedFile;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub peer_name: Option<String>,
    pub total_files: u32,
    pub total_size: u64,
    pub files: Vec<CatalogFileEntry>,
}

impl From<&SharedFile> for CatalogFileEntry {
    fn from(shared: &SharedFile) -> Self {
        CatalogFileEntry {
            file_hash: shared.file_hash,
            name: shared.name.clone(),
            extension: shared.extension.clone(),
            size: shared.size,
            description: shared.description.clone(),
            category: shared.category.clone(),
            tags: shared.tags.clone(),
            chunk_size: shared.chunk_size,
            total_chunks: shared.total_chunks,
            chunk_hashes: shared.chunk_hashes.clone(),
        }
    }
}

fn matches_query(entry: &CatalogFileEntry, query: &str) -> bool {
    let query = query.to_lowercase();
    entry.name.to_lowercase().contains(&query)
        || hex::encode(entry.file_hash).contains(&query)
        || entry.description.as_deref().unwrap_or_default().to_lowercase().contains(&query)
        || entry.tags.iter().any(|tag| tag.to_lowercase().contains(&query))
}

/// Filter `shares` by exact `category` match and a case-insensitive
/// substring `query` over name, hash, tags, and description, then return
/// one page of `page_size` entries starting at `page` (0-indexed).
pub fn build_response(
    shares: &[CatalogFileEntry],
    filter: Option<&str>,
    query: Option<&str>,
    page: u32,
    page_size: u32,
) -> (Vec<CatalogFileEntry>, u32, u64) {
    let matched: Vec<CatalogFileEntry> = shares
        .iter()
        .filter(|entry| filter.map(|category| entry.category == category).unwrap_or(true))
        .filter(|entry| query.map(|q| matches_query(entry, q)).unwrap_or(true))
        .cloned()
        .collect();

    let total_files = matched.len() as u32;
    let total_size: u64 = matched.iter().map(|e| e.size).sum();

    let page_size = page_size.max(1);
    let start = (page as u64 * page_size as u64).min(matched.len() as u64) as usize;
    let end = (start + page_size as usize).min(matched.len());
    let page_entries = matched[start..end].to_vec();

    (page_entries, total_files, total_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, category: &str, hash_byte: u8) -> CatalogFileEntry {
        CatalogFileEntry {
            file_hash: [hash_byte; 32],
            name: name.to_string(),
            extension: "bin".to_string(),
            size: 100,
            description: None,
            category: category.to_string(),
            tags: vec![],
            chunk_size: DEFAULT_TEST_CHUNK,
            total_chunks: 1,
            chunk_hashes: vec![[hash_byte; 32]],
        }
    }

    const DEFAULT_TEST_CHUNK: u32 = 1024;

    #[test]
    fn filters_by_category_and_query() {
        let shares = vec![
            entry("vacation.png", "images", 1),
            entry("report.pdf", "documents", 2),
            entry("beach.png", "images", 3),
        ];
        let (page, total, _size) = build_response(&shares, Some("images"), Some("beach"), 0, 10);
        assert_eq!(total, 1);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "beach.png");
    }

    #[test]
    fn paginates() {
        let shares: Vec<CatalogFileEntry> = (0..5).map(|i| entry(&format!("f{i}"), "other", i as u8)).collect();
        let (page, total, _size) = build_response(&shares, None, None, 1, 2);
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].name, "f2");
    }
}
