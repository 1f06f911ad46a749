//! Artifact registry.
//!
//! An artifact is named, summarized content stored out-of-band from the
//! prompt.  Artifacts are created explicitly via `SaveArtifact` or
//! automatically when a playbook result exceeds the configured threshold;
//! either way the variable that refers to one holds only the name and
//! summary, and the content must be `LoadArtifact`ed to appear in a later
//! prompt.

use playbooks_kernel::{Event, EventBus};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StateError};

/// Named, summarized out-of-band content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub summary: String,
    pub content: String,
}

impl Artifact {
    /// Create an artifact.
    pub fn new(
        name: impl Into<String>,
        summary: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            content: content.into(),
        }
    }
}

/// Per-agent artifact store.
#[derive(Debug)]
pub struct ArtifactStore {
    artifacts: std::collections::BTreeMap<String, Artifact>,
    bus: EventBus,
    agent_id: String,
}

impl ArtifactStore {
    /// Create an empty store for `agent_id`.
    pub fn new(bus: EventBus, agent_id: impl Into<String>) -> Self {
        Self {
            artifacts: std::collections::BTreeMap::new(),
            bus,
            agent_id: agent_id.into(),
        }
    }

    /// Insert or replace an artifact, publishing `ArtifactCreated`.
    pub fn upsert(&mut self, artifact: Artifact) {
        self.bus.publish(Event::ArtifactCreated {
            agent_id: self.agent_id.clone(),
            name: artifact.name.clone(),
            summary: artifact.summary.clone(),
        });
        tracing::debug!(
            agent_id = %self.agent_id,
            name = %artifact.name,
            bytes = artifact.content.len(),
            "artifact stored"
        );
        self.artifacts.insert(artifact.name.clone(), artifact);
    }

    /// Fetch an artifact by name.
    pub fn get(&self, name: &str) -> Result<&Artifact> {
        self.artifacts
            .get(name)
            .ok_or_else(|| StateError::ArtifactNotFound {
                name: name.to_string(),
            })
    }

    /// Whether `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.artifacts.contains_key(name)
    }

    /// All artifact names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.artifacts.keys().map(String::as_str).collect()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Iterate artifacts in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ArtifactStore {
        ArtifactStore::new(EventBus::new("test_session"), "1000")
    }

    #[test]
    fn upsert_and_get() {
        let mut store = store();
        store.upsert(Artifact::new("report", "Q1 report", "numbers..."));

        let artifact = store.get("report").expect("get");
        assert_eq!(artifact.summary, "Q1 report");
        assert!(store.contains("report"));
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let store = store();
        assert!(matches!(
            store.get("nope"),
            Err(StateError::ArtifactNotFound { .. })
        ));
    }

    #[test]
    fn upsert_publishes_event() {
        let bus = EventBus::new("test_session");
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen_clone = std::sync::Arc::clone(&seen);
        bus.subscribe("artifact_created", move |_| {
            seen_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let mut store = ArtifactStore::new(bus, "1000");
        store.upsert(Artifact::new("a", "s", "c"));
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
