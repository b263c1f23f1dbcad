//! Model artifact storage.
//!
//! Artifacts are addressed by model id: `<root>/<model_id>/<model_id><ext>`.
//! Client-supplied filenames never contribute path components.

use crate::error::{Result, ServeError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of storing an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    /// Path relative to the store root.
    pub path: String,
    pub size_bytes: u64,
    /// SHA-256 of the content, hex encoded.
    pub sha256: String,
}

/// Storage usage summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub root: String,
    pub total_files: u64,
    pub total_bytes: u64,
}

/// Blob storage for model artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` as the artifact of `model_id`, replacing any previous one.
    async fn save(&self, model_id: Uuid, extension: &str, bytes: &[u8]) -> Result<StoredArtifact>;

    /// Read an artifact. A missing artifact is `NotFound`.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Check whether an artifact exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Remove every artifact of a model.
    async fn delete_model(&self, model_id: Uuid) -> Result<bool>;

    /// Usage statistics.
    async fn stats(&self) -> Result<StorageStats>;

    /// Cheap reachability check for readiness probes.
    async fn ping(&self) -> Result<()>;
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn compute_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Reduce a client filename to a safe basename.
///
/// Directory components are dropped and only `[A-Za-z0-9._-]` are kept.
pub fn sanitize_filename(filename: &str) -> String {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let cleaned: String = basename
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Lower-cased extension of a sanitized filename, including the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    let name = sanitize_filename(filename);
    name.rfind('.')
        .filter(|&idx| idx + 1 < name.len())
        .map(|idx| name[idx..].to_ascii_lowercase())
}

/// Filesystem-backed artifact store.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            ServeError::StorageFailure(format!("cannot create artifact root {}: {}", root.display(), e))
        })?;
        let root = root.canonicalize().map_err(|e| {
            ServeError::StorageFailure(format!("cannot resolve artifact root: {}", e))
        })?;
        info!(root = %root.display(), "Artifact store initialized");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative artifact path, refusing anything that escapes the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if relative.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(ServeError::InvalidInput(format!(
                "artifact path '{}' escapes the storage root",
                relative
            )));
        }
        Ok(self.root.join(rel))
    }

    fn model_dir(&self, model_id: Uuid) -> PathBuf {
        self.root.join(model_id.to_string())
    }
}

fn storage_err(context: &str, e: std::io::Error) -> ServeError {
    ServeError::StorageFailure(format!("{}: {}", context, e))
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, model_id: Uuid, extension: &str, bytes: &[u8]) -> Result<StoredArtifact> {
        let extension = sanitize_filename(extension.trim_start_matches('.'));
        let filename = if extension.is_empty() {
            model_id.to_string()
        } else {
            format!("{}.{}", model_id, extension)
        };
        let relative = format!("{}/{}", model_id, filename);
        let target = self.resolve(&relative)?;

        let dir = self.model_dir(model_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err("create model directory", e))?;

        // Replace any artifact stored under a different extension.
        if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.path() != target {
                    let _ = tokio::fs::remove_file(entry.path()).await;
                }
            }
        }

        let temp = dir.join(format!(".{}.{}.tmp", filename, Uuid::new_v4()));
        let write = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            tokio::fs::rename(&temp, &target).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(storage_err("write artifact", e));
        }

        let stored = StoredArtifact {
            path: relative,
            size_bytes: bytes.len() as u64,
            sha256: compute_hash(bytes),
        };
        debug!(model_id = %model_id, path = %stored.path, size = stored.size_bytes, "Stored artifact");
        Ok(stored)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServeError::NotFound(format!("artifact {}", path)))
            }
            Err(e) => Err(storage_err("read artifact", e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| storage_err("stat artifact", e))
    }

    async fn delete_model(&self, model_id: Uuid) -> Result<bool> {
        let dir = self.model_dir(model_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(model_id = %model_id, "Deleted model artifacts");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                warn!(model_id = %model_id, error = %e, "Failed to delete model artifacts");
                Err(storage_err("delete artifacts", e))
            }
        }
    }

    async fn stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats {
            root: self.root.display().to_string(),
            ..Default::default()
        };
        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| storage_err("list artifacts", e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| storage_err("list artifacts", e))?
            {
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| storage_err("stat artifact", e))?;
                if meta.is_dir() {
                    dirs.push(entry.path());
                } else {
                    stats.total_files += 1;
                    stats.total_bytes += meta.len();
                }
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<()> {
        tokio::fs::metadata(&self.root)
            .await
            .map(|_| ())
            .map_err(|e| ServeError::Unavailable(format!("artifact root unreachable: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\models\\iris v2.json"), "irisv2.json");
        assert_eq!(sanitize_filename("..hidden.json"), "hidden.json");
        assert_eq!(sanitize_filename("model;rm -rf.json"), "modelrm-rf.json");
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("iris.JSON"), Some(".json".to_string()));
        assert_eq!(file_extension("dir/model.mfg"), Some(".mfg".to_string()));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash(b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_save_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let id = Uuid::new_v4();

        let stored = store.save(id, ".json", b"{\"a\":1}").await.unwrap();
        assert_eq!(stored.path, format!("{}/{}.json", id, id));
        assert_eq!(stored.size_bytes, 7);
        assert!(store.exists(&stored.path).await.unwrap());
        assert_eq!(store.read(&stored.path).await.unwrap(), b"{\"a\":1}");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_bytes, 7);

        assert!(store.delete_model(id).await.unwrap());
        assert!(!store.exists(&stored.path).await.unwrap());
        assert!(matches!(
            store.read(&stored.path).await,
            Err(ServeError::NotFound(_))
        ));
        assert!(!store.delete_model(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_resave_replaces_previous_extension() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let id = Uuid::new_v4();

        let first = store.save(id, ".json", b"one").await.unwrap();
        let second = store.save(id, ".mfg", b"two").await.unwrap();
        assert!(!store.exists(&first.path).await.unwrap());
        assert_eq!(store.read(&second.path).await.unwrap(), b"two");
        assert_eq!(store.stats().await.unwrap().total_files, 1);
    }

    #[tokio::test]
    async fn test_resolve_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();

        assert!(store.resolve("../outside.json").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
        assert!(store.resolve("abc/def.json").unwrap().starts_with(store.root()));
    }
}
