//! SHA-256 content digests.
//!
//! [`digest_tree`] fingerprints an extracted image so that the pull output
//! identifies exactly what containers will see, and so that the image can
//! be proven unchanged after containers wrote to their overlays.

use std::fmt;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use burrow_common::error::{BurrowError, Result};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    fn from_hasher(hasher: Sha256) -> Self {
        Self(
            hasher
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect(),
        )
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Computes a digest over a whole directory tree.
///
/// Entries are visited in sorted order and contribute their relative path,
/// kind, permission bits, and content (file bytes or symlink target), so
/// two trees hash equal exactly when they look the same to a container.
///
/// # Errors
///
/// Returns an error if any entry cannot be read.
pub fn digest_tree(root: &Path) -> Result<Sha256Hash> {
    let mut hasher = Sha256::new();
    hash_dir(root, Path::new(""), &mut hasher)?;
    Ok(Sha256Hash::from_hasher(hasher))
}

fn hash_dir(root: &Path, rel: &Path, hasher: &mut Sha256) -> Result<()> {
    let dir = root.join(rel);
    let mut entries = std::fs::read_dir(&dir)
        .map_err(|e| BurrowError::io(&dir, e))?
        .map(|entry| entry.map(|e| e.file_name()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| BurrowError::io(&dir, e))?;
    entries.sort();

    for file_name in entries {
        let rel = rel.join(&file_name);
        let path = root.join(&rel);
        let meta = std::fs::symlink_metadata(&path).map_err(|e| BurrowError::io(&path, e))?;
        let mode = meta.permissions().mode() & 0o7777;
        let kind = if meta.is_dir() {
            'd'
        } else if meta.is_symlink() {
            'l'
        } else if meta.is_file() {
            'f'
        } else {
            'o'
        };
        hasher.update(format!("{kind} {mode:o} {}\0", rel.display()).as_bytes());

        match kind {
            'd' => hash_dir(root, &rel, hasher)?,
            'l' => {
                let target = std::fs::read_link(&path).map_err(|e| BurrowError::io(&path, e))?;
                hasher.update(target.as_os_str().as_encoded_bytes());
                hasher.update(b"\0");
            }
            'f' => hash_contents(&path, hasher)?,
            _ => {}
        }
    }
    Ok(())
}

fn hash_contents(path: &Path, hasher: &mut Sha256) -> Result<()> {
    let mut file = std::fs::File::open(path).map_err(|e| BurrowError::io(path, e))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| BurrowError::io(path, e))?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
    }
}
