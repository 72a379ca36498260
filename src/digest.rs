// ============================================================================
// digest.rs — Content hashes of source files
// ============================================================================
//
// Editors tend to fire several notifications per save (write, rename, touch).
// Remembering the SHA-256 of the last converted content lets the watcher
// skip notifications that did not actually change the bytes.
// ============================================================================

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Result, TrayIconsError};

pub fn file_digest(path: &Path) -> Result<String> {
    let content = fs::read(path).map_err(|e| TrayIconsError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Default)]
pub struct SourceDigests {
    known: HashMap<PathBuf, String>,
}

impl SourceDigests {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `digest` differs from what was last recorded for `src`.
    pub fn is_changed(&self, src: &Path, digest: &str) -> bool {
        self.known.get(src).map(|d| d.as_str()) != Some(digest)
    }

    pub fn record(&mut self, src: &Path, digest: String) {
        self.known.insert(src.to_path_buf(), digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.kra");
        fs::write(&file, b"first").unwrap();

        let mut digests = SourceDigests::new();
        let d1 = file_digest(&file).unwrap();
        assert_eq!(d1.len(), 64);
        assert!(digests.is_changed(&file, &d1));
        digests.record(&file, d1.clone());
        assert!(!digests.is_changed(&file, &file_digest(&file).unwrap()));

        fs::write(&file, b"second").unwrap();
        let d2 = file_digest(&file).unwrap();
        assert_ne!(d1, d2);
        assert!(digests.is_changed(&file, &d2));
    }

    #[test]
    fn test_digest_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(file_digest(&dir.path().join("missing")).is_err());
    }
}
