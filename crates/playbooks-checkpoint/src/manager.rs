//! Per-agent checkpoint lifecycle.
//!
//! One checkpoint is written after each captured statement.  The metadata
//! records the statement, the full call stack, and -- when a checkpoint is
//! taken mid-LLM-call -- the complete `llm_response` plus the
//! `executed_code` prefix, so a restore can replay up to the last committed
//! statement and continue consuming the recorded response without
//! re-querying the LLM.

use std::sync::Arc;

use serde_json::{json, Map, Value as Json};

use crate::error::Result;
use crate::provider::{CheckpointData, CheckpointProvider};

/// Default number of checkpoints retained per agent.
pub const DEFAULT_KEEP_LAST_N: usize = 10;

/// Manages checkpoints for one agent (`execution_id` is the agent id).
pub struct CheckpointManager {
    execution_id: String,
    provider: Arc<dyn CheckpointProvider>,
    checkpoint_counter: u64,
}

impl CheckpointManager {
    /// Create a manager for `execution_id`.
    pub fn new(execution_id: impl Into<String>, provider: Arc<dyn CheckpointProvider>) -> Self {
        Self {
            execution_id: execution_id.into(),
            provider,
            checkpoint_counter: 0,
        }
    }

    /// The agent this manager checkpoints.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Continue a counter sequence after restore.
    pub fn set_counter(&mut self, counter: u64) {
        self.checkpoint_counter = counter;
    }

    /// Write a checkpoint after `statement` executed.
    ///
    /// Returns the new checkpoint id.
    #[allow(clippy::too_many_arguments)]
    pub async fn save_checkpoint(
        &mut self,
        statement: &str,
        namespace: Json,
        execution_state: Json,
        call_stack: Json,
        llm_response: Option<&str>,
        executed_code: Option<&str>,
    ) -> Result<String> {
        self.checkpoint_counter += 1;
        let checkpoint_id = format!("{}_ckpt_{}", self.execution_id, self.checkpoint_counter);

        let metadata = json!({
            "statement": statement,
            "counter": self.checkpoint_counter,
            "execution_id": self.execution_id,
            "timestamp": chrono::Utc::now().timestamp_millis(),
            "call_stack": call_stack,
            "llm_response": llm_response,
            "executed_code": executed_code,
        });

        let namespace = prepare_namespace(namespace);

        self.provider
            .save_checkpoint(&checkpoint_id, execution_state, namespace, metadata)
            .await?;

        tracing::debug!(
            checkpoint_id = %checkpoint_id,
            statement = %statement.chars().take(50).collect::<String>(),
            "checkpoint saved"
        );

        Ok(checkpoint_id)
    }

    /// Load a specific checkpoint.
    pub async fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Option<CheckpointData>> {
        self.provider.load_checkpoint(checkpoint_id).await
    }

    /// The most recent checkpoint for this agent, if any.
    pub async fn latest_checkpoint(&self) -> Result<Option<CheckpointData>> {
        let checkpoints = self.provider.list_checkpoints(&self.execution_id).await?;
        match checkpoints.last() {
            Some(latest) => self.provider.load_checkpoint(latest).await,
            None => Ok(None),
        }
    }

    /// Trim storage to the most recent `keep_last_n` checkpoints.
    pub async fn cleanup_old_checkpoints(&self, keep_last_n: usize) -> Result<usize> {
        self.provider
            .cleanup_old_checkpoints(&self.execution_id, keep_last_n)
            .await
    }
}

/// Filter the namespace to its serializable subset.
///
/// Underscore-prefixed names are runtime-internal and dropped; values that
/// fail a serialization probe are skipped rather than failing the save.
fn prepare_namespace(namespace: Json) -> Json {
    let Json::Object(entries) = namespace else {
        return Json::Object(Map::new());
    };

    let mut filtered = Map::new();
    for (key, value) in entries {
        if key.starts_with('_') {
            continue;
        }
        if serde_json::to_vec(&value).is_err() {
            tracing::debug!(name = %key, "skipping non-serializable namespace entry");
            continue;
        }
        filtered.insert(key, value);
    }
    Json::Object(filtered)
}
