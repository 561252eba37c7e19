//! Path resolution and content hashing.
//!
//! The index stores repository-relative paths so it stays portable
//! across clones of the same repository. Content hashes let the
//! dispatcher skip re-indexing files whose mtime changed but whose
//! bytes did not.

use crate::error::{IndexError, IndexResult};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Translates between absolute paths and repository-relative keys.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver rooted at the repository working copy.
    ///
    /// The root is canonicalized so symlinked invocations resolve to the
    /// same repository identity.
    pub fn new(root: impl AsRef<Path>) -> IndexResult<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|source| IndexError::FileRead {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize an absolute path to the repository-relative key.
    ///
    /// Relative keys use forward slashes and NFC unicode normalization
    /// regardless of platform. Fails with `OutsidePath` when the path is
    /// not under the root.
    pub fn normalize(&self, absolute: &Path) -> IndexResult<String> {
        // Canonicalize when possible so `a/../b` style inputs and
        // symlinks inside the tree compare equal. Deleted files cannot
        // be canonicalized; their parent usually still can (watcher
        // delete events arrive after the file is gone).
        let canonical = absolute.canonicalize().unwrap_or_else(|_| {
            match (absolute.parent(), absolute.file_name()) {
                (Some(parent), Some(name)) => parent
                    .canonicalize()
                    .map(|p| p.join(name))
                    .unwrap_or_else(|_| absolute.to_path_buf()),
                _ => absolute.to_path_buf(),
            }
        });
        let rel = canonical
            .strip_prefix(&self.root)
            .map_err(|_| IndexError::OutsidePath {
                path: absolute.to_path_buf(),
                root: self.root.clone(),
            })?;

        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(joined.nfc().collect())
    }

    /// Resolve a repository-relative key back to an absolute path.
    /// `resolve(normalize(p))` is idempotent for paths under the root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        let mut out = self.root.clone();
        for part in relative.split('/') {
            out.push(part);
        }
        out
    }

    /// Stable short identifier for this repository, used to name the
    /// per-repo index directory.
    pub fn repo_hash(&self) -> String {
        let normalized: String = self.root.to_string_lossy().nfc().collect();
        let digest = Sha256::digest(normalized.as_bytes());
        hex_encode(&digest)[..16].to_string()
    }
}

/// Streaming SHA-256 of a file's bytes; 64 KiB reads.
pub fn content_hash(path: &Path) -> IndexResult<String> {
    let mut file = File::open(path).map_err(|source| IndexError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|source| IndexError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// SHA-256 of an in-memory buffer.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
