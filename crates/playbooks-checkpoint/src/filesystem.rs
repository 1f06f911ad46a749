//! Filesystem checkpoint storage.
//!
//! One JSON file per checkpoint:
//!
//! ```text
//! <base>/
//!     <execution_id>/
//!         <execution_id>_ckpt_1.json
//!         <execution_id>_ckpt_2.json
//! ```
//!
//! Single-node only.  Checkpoints above the size limit fail the save
//! rather than being written partially.

use std::path::PathBuf;

use serde_json::Value as Json;

use crate::error::{CheckpointError, Result};
use crate::provider::{parse_checkpoint_id, CheckpointData, CheckpointProvider};

/// Default checkpoint size limit, in megabytes.
pub const DEFAULT_MAX_SIZE_MB: usize = 10;

/// Filesystem-backed [`CheckpointProvider`].
pub struct FilesystemCheckpointProvider {
    base_path: PathBuf,
    max_size_bytes: usize,
}

impl FilesystemCheckpointProvider {
    /// Create a provider rooted at `base_path` with the default size limit.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self::with_max_size_mb(base_path, DEFAULT_MAX_SIZE_MB)
    }

    /// Create a provider with an explicit size limit.
    pub fn with_max_size_mb(base_path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        Self {
            base_path: base_path.into(),
            max_size_bytes: max_size_mb * 1024 * 1024,
        }
    }

    fn execution_dir(&self, execution_id: &str) -> PathBuf {
        self.base_path.join(execution_id)
    }

    fn checkpoint_path(&self, checkpoint_id: &str) -> Result<PathBuf> {
        let (execution_id, _) =
            parse_checkpoint_id(checkpoint_id).ok_or_else(|| CheckpointError::InvalidCheckpointId {
                id: checkpoint_id.to_string(),
            })?;
        Ok(self
            .execution_dir(execution_id)
            .join(format!("{checkpoint_id}.json")))
    }
}

#[async_trait::async_trait]
impl CheckpointProvider for FilesystemCheckpointProvider {
    async fn save_checkpoint(
        &self,
        checkpoint_id: &str,
        execution_state: Json,
        namespace: Json,
        metadata: Json,
    ) -> Result<()> {
        let data = CheckpointData {
            checkpoint_id: checkpoint_id.to_string(),
            execution_state,
            namespace,
            metadata,
        };
        let serialized = serde_json::to_vec(&data)?;
        if serialized.len() > self.max_size_bytes {
            return Err(CheckpointError::TooLarge {
                checkpoint_id: checkpoint_id.to_string(),
                size: serialized.len(),
                limit: self.max_size_bytes,
            });
        }

        let path = self.checkpoint_path(checkpoint_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serialized).await?;
        tracing::debug!(checkpoint_id, path = %path.display(), "checkpoint written");
        Ok(())
    }

    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<CheckpointData>> {
        let path = self.checkpoint_path(checkpoint_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn list_checkpoints(&self, execution_id: &str) -> Result<Vec<String>> {
        let dir = self.execution_dir(execution_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut checkpoints: Vec<(u64, String)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if let Some((_, counter)) = parse_checkpoint_id(stem) {
                checkpoints.push((counter, stem.to_string()));
            }
        }

        checkpoints.sort_by_key(|(counter, _)| *counter);
        Ok(checkpoints.into_iter().map(|(_, id)| id).collect())
    }

    async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()> {
        let path = self.checkpoint_path(checkpoint_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn cleanup_old_checkpoints(
        &self,
        execution_id: &str,
        keep_last_n: usize,
    ) -> Result<usize> {
        let checkpoints = self.list_checkpoints(execution_id).await?;
        if checkpoints.len() <= keep_last_n {
            return Ok(0);
        }

        let to_delete = &checkpoints[..checkpoints.len() - keep_last_n];
        for checkpoint_id in to_delete {
            self.delete_checkpoint(checkpoint_id).await?;
        }
        Ok(to_delete.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> (tempfile::TempDir, FilesystemCheckpointProvider) {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = FilesystemCheckpointProvider::new(dir.path());
        (dir, provider)
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let (_dir, provider) = provider();
        provider
            .save_checkpoint(
                "1000_ckpt_1",
                json!({"variables": {"$x": 1}}),
                json!({"x": 1}),
                json!({"counter": 1}),
            )
            .await
            .expect("save");

        let loaded = provider
            .load_checkpoint("1000_ckpt_1")
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(loaded.execution_state["variables"]["$x"], json!(1));
        assert_eq!(loaded.metadata["counter"], json!(1));
    }

    #[tokio::test]
    async fn missing_checkpoint_is_none() {
        let (_dir, provider) = provider();
        assert!(provider
            .load_checkpoint("1000_ckpt_9")
            .await
            .expect("load")
            .is_none());
    }

    #[tokio::test]
    async fn list_is_chronological_by_counter() {
        let (_dir, provider) = provider();
        // Written out of order; listing must sort by counter, not name or
        // mtime.
        for counter in [2, 10, 1] {
            provider
                .save_checkpoint(
                    &format!("1000_ckpt_{counter}"),
                    json!({}),
                    json!({}),
                    json!({}),
                )
                .await
                .expect("save");
        }

        let listed = provider.list_checkpoints("1000").await.expect("list");
        assert_eq!(listed, vec!["1000_ckpt_1", "1000_ckpt_2", "1000_ckpt_10"]);
    }

    #[tokio::test]
    async fn oversized_checkpoint_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = FilesystemCheckpointProvider::with_max_size_mb(dir.path(), 0);
        let result = provider
            .save_checkpoint("1000_ckpt_1", json!({"big": "x"}), json!({}), json!({}))
            .await;
        assert!(matches!(result, Err(CheckpointError::TooLarge { .. })));
    }

    #[tokio::test]
    async fn cleanup_keeps_last_n() {
        let (_dir, provider) = provider();
        for counter in 1..=5 {
            provider
                .save_checkpoint(
                    &format!("1000_ckpt_{counter}"),
                    json!({}),
                    json!({}),
                    json!({}),
                )
                .await
                .expect("save");
        }

        let deleted = provider
            .cleanup_old_checkpoints("1000", 2)
            .await
            .expect("cleanup");
        assert_eq!(deleted, 3);

        let remaining = provider.list_checkpoints("1000").await.expect("list");
        assert_eq!(remaining, vec!["1000_ckpt_4", "1000_ckpt_5"]);
    }

    #[tokio::test]
    async fn delete_missing_is_noop() {
        let (_dir, provider) = provider();
        provider
            .delete_checkpoint("1000_ckpt_1")
            .await
            .expect("noop");
    }
}
