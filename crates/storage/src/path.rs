//! Hash validation and shard path derivation.
//!
//! Blobs live at `<root>/<h0>/<h1>/<h2>/<hash>`, one directory level per
//! leading hex character. That bounds the fan-out of every directory to 16
//! entries (plus leaf files in the last level).

use std::path::PathBuf;

use crate::error::{ErrorKind, Result};

/// Number of leading hash characters turned into nested shard directories.
pub const SHARD_DEPTH: usize = 3;

/// Validates a content hash so it can safely be turned into a relative path.
///
/// Only ASCII hex digits are accepted (upper case is folded to lower case),
/// which rules out separators, `..` and null bytes in one go.
///
/// # Examples
///
/// ```
/// use wisdom_storage::validate_hash;
/// assert_eq!(validate_hash("ABCdef0123").unwrap(), "abcdef0123");
/// assert!(validate_hash("ab").is_err());
/// assert!(validate_hash("../../etc/passwd").is_err());
/// ```
pub fn validate(hash: impl AsRef<str>) -> Result<String> {
    let hash = hash.as_ref();
    if hash.len() <= SHARD_DEPTH || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        exn::bail!(ErrorKind::InvalidHash(hash.to_string()));
    }
    Ok(hash.to_ascii_lowercase())
}

/// Relative path of the blob for a given hash.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use wisdom_storage::shard_path;
/// assert_eq!(shard_path("abcdef").unwrap(), Path::new("a/b/c/abcdef"));
/// ```
pub fn shard_path(hash: impl AsRef<str>) -> Result<PathBuf> {
    let hash = validate(hash)?;
    let mut path: PathBuf = hash.chars().take(SHARD_DEPTH).map(String::from).collect();
    path.push(&hash);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;

    #[rstest]
    #[case("abcd", "a/b/c/abcd")]
    #[case("0123456789", "0/1/2/0123456789")]
    #[case("FFFF", "f/f/f/ffff")]
    fn test_shard_path(#[case] hash: &str, #[case] expected: &str) {
        assert_eq!(shard_path(hash).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case("")]
    #[case("abc")]
    #[case("../abcdef")]
    #[case("ab/cdef")]
    #[case("abc\0def")]
    #[case("xyzxyz")]
    fn test_invalid_hashes(#[case] hash: &str) {
        let err = validate(hash).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidHash(_)));
    }
}
