//! On-disk directory layout
//!
//! Uploaded stems, enhanced stems, mixed masters and project records each
//! live in their own directory under the configured root. File names are
//! timestamp-prefixed so concurrent requests never collide.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::error::{AlchemyError, Result};

pub const STEMS_DIR: &str = "stems";
pub const PROCESSED_DIR: &str = "processed";
pub const MIXED_DIR: &str = "mixed";
pub const PROJECTS_DIR: &str = "projects";

/// Directory layout rooted at one upload directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stems_dir(&self) -> PathBuf {
        self.root.join(STEMS_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    pub fn mixed_dir(&self) -> PathBuf {
        self.root.join(MIXED_DIR)
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join(PROJECTS_DIR)
    }

    /// Create every directory once at startup.
    pub fn bootstrap(&self) -> Result<()> {
        for dir in [
            self.stems_dir(),
            self.processed_dir(),
            self.mixed_dir(),
            self.projects_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| AlchemyError::File {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Destination for the enhanced version of stem `index`.
    pub fn processed_path(&self, index: usize, original: &Path) -> PathBuf {
        let stem = file_stem(original);
        self.processed_dir()
            .join(timestamped(&format!("{:02}_{}.wav", index, stem)))
    }

    /// Destination for a new master of the given project; unique even within
    /// one millisecond.
    pub fn mix_path(&self, project_tag: &str) -> PathBuf {
        self.mixed_dir().join(timestamped(&format!(
            "mix_{}_{}.wav",
            project_tag,
            short_nonce()
        )))
    }

    /// Destination for a loudness-normalized copy of a master.
    pub fn normalized_path(&self, project_tag: &str, target_lufs: f64) -> PathBuf {
        self.mixed_dir().join(timestamped(&format!(
            "mix_{}_{}lufs_{}.wav",
            project_tag,
            target_lufs.round().abs(),
            short_nonce()
        )))
    }

    /// Destination for an uploaded stem.
    pub fn upload_path(&self, original: &Path) -> PathBuf {
        let name = original
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "stem".to_string());
        self.stems_dir().join(timestamped(&name))
    }
}

/// Prefix a file name with the current time in milliseconds.
pub fn timestamped(name: &str) -> String {
    format!("{}_{}", Utc::now().timestamp_millis(), name)
}

fn short_nonce() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "stem".to_string())
}

/// SHA-256 of a file's content, hex encoded.
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Remove a partially written render; a missing file is fine.
pub async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not remove partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().join("uploads"));
        layout.bootstrap().unwrap();

        assert!(layout.stems_dir().is_dir());
        assert!(layout.processed_dir().is_dir());
        assert!(layout.mixed_dir().is_dir());
        assert!(layout.projects_dir().is_dir());

        // Second call is a no-op
        layout.bootstrap().unwrap();
    }

    #[test]
    fn test_processed_path_naming() {
        let layout = Layout::new("/data");
        let path = layout.processed_path(3, Path::new("/data/stems/123_vocals.flac"));

        assert!(path.starts_with("/data/processed"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_03_123_vocals.wav"), "got {}", name);
    }

    #[test]
    fn test_masters_never_share_a_name() {
        let layout = Layout::new("/data");
        let a = layout.mix_path("abcd1234");
        let b = layout.mix_path("abcd1234");
        assert_ne!(a, b);
        assert!(a.starts_with("/data/mixed"));

        let name = layout
            .normalized_path("abcd1234", -16.0)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(name.contains("_mix_abcd1234_16lufs_"), "got {}", name);
    }

    #[test]
    fn test_digest_matches_for_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        fs::write(&a, b"stem bytes").unwrap();
        fs::write(&b, b"stem bytes").unwrap();

        assert_eq!(file_digest(&a).unwrap(), file_digest(&b).unwrap());
        assert_eq!(file_digest(&a).unwrap().len(), 64);
    }
}
