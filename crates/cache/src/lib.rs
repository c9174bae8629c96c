//! SQLite entity store for harvested images.
//!
//! Each image row records where the image came from, the text an analyser
//! found in it, which analyser produced that text (and how good it is), and
//! the content hash that keys its bytes in the blob store. Platform upload
//! handles hang off images and are scoped per credential, so one image may be
//! uploaded once per bot token.
//!
//! # Architecture
//! - **Images**: deduplicated by content hash once their bytes are known.
//! - **Credentials**: only ever the BLAKE3 hash of a platform token.
//! - **Upload handles**: opaque platform identifiers, linked to the
//!   credentials they were issued under. Deleting an image cascades to its
//!   handles and their credential links.

mod db;
pub mod error;
mod image;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::image::{Credential, CredentialId, Image, ImageId, NewImage};
pub use crate::repo::{DEFAULT_TEXT_SEARCH_LIMIT, Repository};
