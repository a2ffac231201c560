use spxmesh_identity::Address;

use crate::catalog::Catalog;
use crate::download::DownloadSnapshot;
use crate::shared_file::SharedFile;

#[derive(Debug, Clone)]
pub enum FileEvent {
    FileShared { file: SharedFile },
    FileUnshared { file_hash: [u8; 32] },
    CatalogReceived { peer: Address, catalog: Catalog },
    DownloadProgress { snapshot: DownloadSnapshot },
    DownloadCompleted { snapshot: DownloadSnapshot },
    DownloadFailed { snapshot: DownloadSnapshot },
}
