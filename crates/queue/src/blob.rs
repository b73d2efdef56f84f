//! Artifact blob storage.
//!
//! The index rows in the database point at blobs written through this trait.
//! Keys are relative, slash-separated paths (`jobs/{id}/layouts/raw_001.json`)
//! so repeated writes from a resumed step land on the same object.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use slidegen_core::{EngineError, EngineResult};

/// Hex-encoded SHA-256 of a blob, stored in the artifact index as the
/// integrity checksum.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Content-addressed-ish blob store for step outputs.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Write a blob, returning its sha256. Overwrites are allowed and land
    /// on identical content for deterministic keys.
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> EngineResult<String>;

    async fn read_bytes(&self, key: &str) -> EngineResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> EngineResult<bool>;
}

/// Serialize a value as pretty JSON and write it, returning the sha256.
///
/// Free function rather than a trait method so the trait stays object-safe.
pub async fn write_json<T: Serialize>(
    storage: &dyn ArtifactStorage,
    key: &str,
    value: &T,
) -> EngineResult<String> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| EngineError::storage(format!("serialize {key}: {e}")))?;
    storage.write_bytes(key, &bytes).await
}

/// Read a blob and deserialize it from JSON.
pub async fn read_json<T: DeserializeOwned>(
    storage: &dyn ArtifactStorage,
    key: &str,
) -> EngineResult<T> {
    let bytes = storage.read_bytes(key).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::storage(format!("deserialize {key}: {e}")))
}

/// Filesystem-backed blob store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStorage {
    root: PathBuf,
}

impl FsArtifactStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key under the root, rejecting traversal outside it.
    fn resolve(&self, key: &str) -> EngineResult<PathBuf> {
        let rel = Path::new(key);
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(EngineError::storage(format!(
                        "invalid artifact key: {key}"
                    )));
                }
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ArtifactStorage for FsArtifactStorage {
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> EngineResult<String> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::storage(format!("mkdir for {key}: {e}")))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| EngineError::storage(format!("write {key}: {e}")))?;
        Ok(sha256_hex(bytes))
    }

    async fn read_bytes(&self, key: &str) -> EngineResult<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| EngineError::storage(format!("read {key}: {e}")))
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }
}

/// In-memory blob store for tests and dev wiring.
#[derive(Debug, Default)]
pub struct MemoryArtifactStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStorage for MemoryArtifactStorage {
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> EngineResult<String> {
        self.blobs
            .lock()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(sha256_hex(bytes))
    }

    async fn read_bytes(&self, key: &str) -> EngineResult<Vec<u8>> {
        self.blobs
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::storage(format!("no blob at {key}")))
    }

    async fn exists(&self, key: &str) -> EngineResult<bool> {
        Ok(self.blobs.lock().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn memory_store_round_trips_json() {
        let store = MemoryArtifactStorage::new();
        let value = serde_json::json!({"regions": 3});
        let sha = write_json(&store, "jobs/x/run_config.json", &value).await.unwrap();
        assert_eq!(sha.len(), 64);
        assert!(store.exists("jobs/x/run_config.json").await.unwrap());
        let back: serde_json::Value = read_json(&store, "jobs/x/run_config.json").await.unwrap();
        assert_eq!(back, value);
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStorage::new(dir.path());
        let err = store.write_bytes("../escape.json", b"{}").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn fs_store_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStorage::new(dir.path());
        store
            .write_bytes("jobs/a/layouts/raw_001.json", b"{\"regions\":[]}")
            .await
            .unwrap();
        let back = store.read_bytes("jobs/a/layouts/raw_001.json").await.unwrap();
        assert_eq!(back, b"{\"regions\":[]}");
    }
}
