//! Content-addressed shared-file catalog and the multi-peer chunk
//! download engine that pulls a file from whichever connected peers
//! advertise it.

pub mod catalog;
pub mod category;
pub mod download;
pub mod engine;
pub mod error;
pub mod events;
pub mod shared_file;
pub mod speed;

pub use catalog::Catalog;
pub use download::{Download, DownloadSnapshot, DownloadState};
pub use engine::FileEngine;
pub use error::{FileError, Result};
pub use events::FileEvent;
pub use shared_file::{SharedFile, DEFAULT_CHUNK_SIZE};
