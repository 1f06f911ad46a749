//! Program-level checkpoint coordination.
//!
//! A program checkpoint is a snapshot of *which* per-agent checkpoint was
//! the latest for every agent at one moment, written under the separate
//! execution id `<session_id>_program` so it never collides with agent
//! checkpoints.
//!
//! Restore deliberately trusts each agent's *actual* latest checkpoint
//! over the one the program snapshot recorded: agents keep checkpointing
//! between program snapshots, so the program record may be stale.

use std::collections::BTreeMap;
use std::sync::Arc;

use playbooks_state::AgentSummary;
use serde_json::{json, Value as Json};

use crate::error::Result;
use crate::provider::{CheckpointData, CheckpointProvider};

/// What a restore should do: which counter to continue from and which
/// checkpoint to replay for each agent.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    /// Counter the next program checkpoint continues from.
    pub checkpoint_counter: u64,
    /// agent id -> checkpoint to restore (the agent's actual latest).
    pub agent_checkpoints: BTreeMap<String, String>,
}

/// Coordinates checkpoints across all agents of one program session.
pub struct ProgramCheckpointCoordinator {
    session_id: String,
    provider: Arc<dyn CheckpointProvider>,
    checkpoint_counter: u64,
}

impl ProgramCheckpointCoordinator {
    /// Create a coordinator for `session_id`.
    pub fn new(session_id: impl Into<String>, provider: Arc<dyn CheckpointProvider>) -> Self {
        Self {
            session_id: session_id.into(),
            provider,
            checkpoint_counter: 0,
        }
    }

    /// The session this coordinator belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Program checkpoints use a separate execution-id namespace.
    fn program_execution_id(&self) -> String {
        format!("{}_program", self.session_id)
    }

    /// Write a program checkpoint referencing each agent's latest
    /// checkpoint.  Agents without any checkpoint yet are omitted.
    pub async fn save_program_checkpoint(&mut self, agent_ids: &[String]) -> Result<String> {
        self.checkpoint_counter += 1;
        let program_checkpoint_id = format!(
            "{}_ckpt_{}",
            self.program_execution_id(),
            self.checkpoint_counter
        );

        let mut agent_checkpoints = BTreeMap::new();
        for agent_id in agent_ids {
            let checkpoints = self.provider.list_checkpoints(agent_id).await?;
            if let Some(latest) = checkpoints.last() {
                agent_checkpoints.insert(agent_id.clone(), latest.clone());
            }
        }

        let metadata = json!({
            "session_id": self.session_id,
            "checkpoint_counter": self.checkpoint_counter,
            "agent_checkpoints": agent_checkpoints,
            "agent_count": agent_ids.len(),
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });

        self.provider
            .save_checkpoint(&program_checkpoint_id, json!({}), json!({}), metadata)
            .await?;

        tracing::info!(
            checkpoint_id = %program_checkpoint_id,
            agents = agent_checkpoints.len(),
            "program checkpoint saved"
        );
        Ok(program_checkpoint_id)
    }

    /// Load the latest program checkpoint for this session.
    pub async fn latest_program_checkpoint(&self) -> Result<Option<CheckpointData>> {
        let checkpoints = self
            .provider
            .list_checkpoints(&self.program_execution_id())
            .await?;
        match checkpoints.last() {
            Some(latest) => self.provider.load_checkpoint(latest).await,
            None => Ok(None),
        }
    }

    /// Build the restore plan from the latest program checkpoint.
    ///
    /// For every agent in the snapshot, the plan points at the agent's
    /// *actual* latest checkpoint (which may be newer than the program
    /// snapshot).  Returns `None` when no program checkpoint exists.
    pub async fn plan_restore(&mut self) -> Result<Option<RestorePlan>> {
        let Some(snapshot) = self.latest_program_checkpoint().await? else {
            return Ok(None);
        };

        let recorded_counter = snapshot.metadata["checkpoint_counter"]
            .as_u64()
            .unwrap_or(0);
        self.checkpoint_counter = recorded_counter;

        let mut agent_checkpoints = BTreeMap::new();
        if let Some(recorded) = snapshot.metadata["agent_checkpoints"].as_object() {
            for (agent_id, recorded_checkpoint) in recorded {
                let checkpoints = self.provider.list_checkpoints(agent_id).await?;
                let latest = checkpoints
                    .last()
                    .cloned()
                    .or_else(|| recorded_checkpoint.as_str().map(String::from));
                if let Some(latest) = latest {
                    agent_checkpoints.insert(agent_id.clone(), latest);
                }
            }
        }

        Ok(Some(RestorePlan {
            checkpoint_counter: recorded_counter,
            agent_checkpoints,
        }))
    }

    /// Load one agent's checkpoint from a restore plan.
    pub async fn load_agent_checkpoint(
        &self,
        checkpoint_id: &str,
    ) -> Result<Option<CheckpointData>> {
        self.provider.load_checkpoint(checkpoint_id).await
    }
}

/// Recover an agent's class name from a checkpoint's recorded agents list
/// (entries have the `Klass(agent id)` shape).
pub fn agent_klass_from_checkpoint(data: &CheckpointData, agent_id: &str) -> Option<String> {
    let agents = data.execution_state.get("agents")?.as_array()?;
    for entry in agents {
        let summary = entry.as_str().and_then(AgentSummary::parse)?;
        if summary.id == agent_id {
            return Some(summary.klass);
        }
    }
    None
}

/// Extract the recorded in-flight LLM call from a checkpoint, if any:
/// `(llm_response, executed_code)`.
pub fn in_flight_llm_call(data: &CheckpointData) -> Option<(String, String)> {
    let response = data.metadata.get("llm_response")?.as_str()?;
    let executed = data
        .metadata
        .get("executed_code")
        .and_then(Json::as_str)
        .unwrap_or("");
    Some((response.to_string(), executed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::FilesystemCheckpointProvider;
    use crate::manager::CheckpointManager;

    async fn setup() -> (
        tempfile::TempDir,
        Arc<FilesystemCheckpointProvider>,
        ProgramCheckpointCoordinator,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = Arc::new(FilesystemCheckpointProvider::new(dir.path()));
        let coordinator = ProgramCheckpointCoordinator::new("sess1", Arc::clone(&provider) as _);
        (dir, provider, coordinator)
    }

    #[tokio::test]
    async fn program_checkpoint_references_latest_agent_checkpoints() {
        let (_dir, provider, mut coordinator) = setup().await;

        let mut manager = CheckpointManager::new("1000", Arc::clone(&provider) as _);
        manager
            .save_checkpoint("a = 1", json!({}), json!({}), json!([]), None, None)
            .await
            .expect("save");
        manager
            .save_checkpoint("b = 2", json!({}), json!({}), json!([]), None, None)
            .await
            .expect("save");

        coordinator
            .save_program_checkpoint(&["1000".to_string(), "1001".to_string()])
            .await
            .expect("program save");

        let snapshot = coordinator
            .latest_program_checkpoint()
            .await
            .expect("load")
            .expect("exists");
        assert_eq!(
            snapshot.metadata["agent_checkpoints"]["1000"],
            json!("1000_ckpt_2")
        );
        // 1001 never checkpointed; it is omitted.
        assert!(snapshot.metadata["agent_checkpoints"]
            .as_object()
            .expect("map")
            .get("1001")
            .is_none());
        assert_eq!(snapshot.metadata["agent_count"], json!(2));
    }

    #[tokio::test]
    async fn restore_prefers_actual_latest_over_snapshot() {
        let (_dir, provider, mut coordinator) = setup().await;

        let mut manager = CheckpointManager::new("1000", Arc::clone(&provider) as _);
        manager
            .save_checkpoint("a = 1", json!({}), json!({}), json!([]), None, None)
            .await
            .expect("save");
        coordinator
            .save_program_checkpoint(&["1000".to_string()])
            .await
            .expect("program save");

        // Agent checkpoints again after the stale program snapshot.
        manager
            .save_checkpoint("b = 2", json!({}), json!({}), json!([]), None, None)
            .await
            .expect("save");

        let plan = coordinator
            .plan_restore()
            .await
            .expect("plan")
            .expect("exists");
        assert_eq!(plan.agent_checkpoints["1000"], "1000_ckpt_2");
        assert_eq!(plan.checkpoint_counter, 1);
    }

    #[tokio::test]
    async fn plan_is_none_without_program_checkpoint() {
        let (_dir, _provider, mut coordinator) = setup().await;
        assert!(coordinator.plan_restore().await.expect("plan").is_none());
    }

    #[tokio::test]
    async fn klass_recovery_from_agents_list() {
        let data = CheckpointData {
            checkpoint_id: "1000_ckpt_1".into(),
            execution_state: json!({
                "agents": ["Buyer(agent 1000)", "Seller(agent 1001)"],
            }),
            namespace: json!({}),
            metadata: json!({}),
        };
        assert_eq!(
            agent_klass_from_checkpoint(&data, "1001"),
            Some("Seller".to_string())
        );
        assert_eq!(agent_klass_from_checkpoint(&data, "2000"), None);
    }

    #[tokio::test]
    async fn in_flight_llm_call_extraction() {
        let data = CheckpointData {
            checkpoint_id: "1000_ckpt_1".into(),
            execution_state: json!({}),
            namespace: json!({}),
            metadata: json!({
                "llm_response": "x = 1\ny = 2\n",
                "executed_code": "x = 1",
            }),
        };
        let (response, executed) = in_flight_llm_call(&data).expect("recorded");
        assert_eq!(response, "x = 1\ny = 2\n");
        assert_eq!(executed, "x = 1");
    }
}
