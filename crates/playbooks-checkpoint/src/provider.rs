//! The pluggable checkpoint storage interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::Result;

/// One stored checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    /// `<execution_id>_ckpt_<n>`.
    pub checkpoint_id: String,
    /// The agent's serialized execution state (or program-level state for
    /// program checkpoints).
    pub execution_state: Json,
    /// The serializable subset of the interpreter namespace.
    pub namespace: Json,
    /// Bookkeeping written by the manager/coordinator.
    pub metadata: Json,
}

/// Storage backend for checkpoints.
///
/// Implementations must treat payloads as opaque: the only structure a
/// provider may rely on is the `<execution_id>_ckpt_<n>` id shape.
#[async_trait]
pub trait CheckpointProvider: Send + Sync {
    /// Persist a checkpoint.  Fails when the serialized size exceeds the
    /// provider's limit.
    async fn save_checkpoint(
        &self,
        checkpoint_id: &str,
        execution_state: Json,
        namespace: Json,
        metadata: Json,
    ) -> Result<()>;

    /// Load a checkpoint, or `None` when it does not exist.
    async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<CheckpointData>>;

    /// All checkpoint ids for `execution_id`, in chronological order.
    async fn list_checkpoints(&self, execution_id: &str) -> Result<Vec<String>>;

    /// Delete a checkpoint.  Deleting a missing checkpoint is a no-op.
    async fn delete_checkpoint(&self, checkpoint_id: &str) -> Result<()>;

    /// Remove old checkpoints, keeping the most recent `keep_last_n`.
    /// Returns how many were deleted.
    async fn cleanup_old_checkpoints(
        &self,
        execution_id: &str,
        keep_last_n: usize,
    ) -> Result<usize>;
}

/// Split `<execution_id>_ckpt_<n>` into `(execution_id, counter)`.
pub fn parse_checkpoint_id(checkpoint_id: &str) -> Option<(&str, u64)> {
    let (execution_id, counter) = checkpoint_id.rsplit_once("_ckpt_")?;
    let counter = counter.parse().ok()?;
    Some((execution_id, counter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_id_parsing() {
        assert_eq!(parse_checkpoint_id("1000_ckpt_7"), Some(("1000", 7)));
        assert_eq!(
            parse_checkpoint_id("sess_program_ckpt_2"),
            Some(("sess_program", 2))
        );
        assert_eq!(parse_checkpoint_id("no-counter"), None);
        assert_eq!(parse_checkpoint_id("x_ckpt_abc"), None);
    }
}
