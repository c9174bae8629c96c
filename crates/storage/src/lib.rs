//! Content-addressed blob storage.
//!
//! Raw image bytes are stored under the hash of their own content, so the
//! same image is only ever written once regardless of how many URLs it was
//! discovered under. The metadata database records the hash; this crate only
//! knows about hashes and bytes.

pub mod backend;
pub mod error;
mod path;

pub use crate::backend::BlobStore;
pub use crate::path::{SHARD_DEPTH, shard_path, validate as validate_hash};
use std::sync::Arc;

pub type BlobHandle = Arc<dyn BlobStore + Send + Sync>;

/// Hash raw bytes into the content hash used as the blob key (lowercase hex
/// BLAKE3 digest).
pub fn content_hash(bytes: impl AsRef<[u8]>) -> String {
    blake3::hash(bytes.as_ref()).to_hex().to_string()
}
