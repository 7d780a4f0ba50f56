use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

const KEY_LEN: usize = 24;

/// Deterministic key for a set of canonical inputs. Parts are separated so
/// that `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn content_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..KEY_LEN].to_string()
}

/// Seed for deterministic generators derived from the same hash.
pub fn content_seed(parts: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Flat directory of artifacts named by content key.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub fn path_for(&self, prefix: &str, key: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{prefix}_{key}.{ext}"))
    }

    /// A hit requires the file to exist and be at least `min_bytes` long.
    pub async fn is_hit(&self, path: &Path, min_bytes: u64) -> bool {
        file_size(path).await.is_some_and(|len| len >= min_bytes)
    }
}

pub async fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}
