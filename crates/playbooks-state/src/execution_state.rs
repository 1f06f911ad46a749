//! Aggregate execution state with I/P-frame snapshot compression.
//!
//! The LLM's view of an agent is resynchronized on every call: either with
//! a **full** snapshot (an I-frame) or with a **delta** against the last
//! shipped state (a P-frame).  [`ExecutionState::get_state_for_llm`]
//! implements the policy; [`apply_delta`] is the inverse used to verify
//! that `base + delta == full` at any moment.

use playbooks_kernel::EventBus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::artifacts::{Artifact, ArtifactStore};
use crate::call_stack::CallStack;
use crate::llm_messages::FrameType;
use crate::session_log::SessionLog;
use crate::value::Value;
use crate::variables::{canonical_name, VariableStore};

/// A peer agent known to this agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub klass: String,
}

impl AgentSummary {
    /// Render in the `Klass(agent id)` shape used in state snapshots.
    pub fn render(&self) -> String {
        format!("{}(agent {})", self.klass, self.id)
    }

    /// Parse a `Klass(agent id)` string back into a summary.
    pub fn parse(rendered: &str) -> Option<Self> {
        let open = rendered.find("(agent ")?;
        let close = rendered.rfind(')')?;
        let klass = &rendered[..open];
        let id = &rendered[open + "(agent ".len()..close];
        if klass.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            klass: klass.to_string(),
        })
    }
}

/// Configuration for I/P-frame state compression.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StateCompressionConfig {
    /// Whether delta compression is enabled at all.
    pub enabled: bool,
    /// Every `i_frame_interval`-th LLM call ships a full snapshot.
    pub i_frame_interval: u64,
}

impl Default for StateCompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            i_frame_interval: 5,
        }
    }
}

/// A computed delta, kept as the JSON dict shape the prompt embeds.
pub type StateDelta = Json;

/// One agent's complete mutable state.
#[derive(Debug)]
pub struct ExecutionState {
    pub agent_id: String,
    pub klass: String,
    pub call_stack: CallStack,
    pub variables: VariableStore,
    pub artifacts: ArtifactStore,
    pub session_log: SessionLog,
    /// Ids of meetings this agent owns.
    pub owned_meetings: Vec<String>,
    /// Ids of meetings this agent has joined (but does not own).
    pub joined_meetings: Vec<String>,
    /// Peer agents known to this agent, in creation order.
    pub agents: Vec<AgentSummary>,
    bus: EventBus,
    /// The last snapshot shipped to the LLM (I- or P-frame baseline).
    pub last_sent_state: Option<Json>,
    /// Execution id of the last I-frame; deltas are only valid while this
    /// is set.
    pub last_i_frame_execution_id: Option<u64>,
}

impl ExecutionState {
    /// Create empty state for one agent.
    pub fn new(bus: EventBus, klass: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            klass: klass.into(),
            call_stack: CallStack::new(bus.clone(), agent_id.clone()),
            variables: VariableStore::new(bus.clone(), agent_id.clone()),
            artifacts: ArtifactStore::new(bus.clone(), agent_id.clone()),
            session_log: SessionLog::new(),
            owned_meetings: Vec::new(),
            joined_meetings: Vec::new(),
            agents: Vec::new(),
            agent_id,
            bus,
            last_sent_state: None,
            last_i_frame_execution_id: None,
        }
    }

    /// The event bus this state publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Assign a variable, auto-converting values larger than
    /// `artifact_threshold` display bytes into artifacts.
    ///
    /// Returns the value actually stored (the artifact reference when
    /// conversion fired).
    pub fn set_variable(&mut self, name: &str, value: Value, artifact_threshold: usize) -> Value {
        let name = canonical_name(name).to_string();
        let stored = match &value {
            Value::Artifact { .. } => value,
            other if other.display_string().len() > artifact_threshold => {
                let summary = format!("Variable: {name}");
                self.artifacts.upsert(Artifact::new(
                    name.clone(),
                    summary.clone(),
                    other.display_string(),
                ));
                Value::Artifact {
                    name: name.clone(),
                    summary,
                }
            }
            _ => value,
        };
        self.variables.set(&name, stored.clone());
        stored
    }

    /// Store an explicit artifact and mirror it as a variable.
    pub fn save_artifact(&mut self, name: &str, summary: &str, content: &str) {
        let name = canonical_name(name).to_string();
        self.artifacts
            .upsert(Artifact::new(name.clone(), summary, content));
        self.variables.set(
            &name,
            Value::Artifact {
                name: name.clone(),
                summary: summary.to_string(),
            },
        );
    }

    /// Full state snapshot as the dict shape embedded in prompts and
    /// checkpoints.
    pub fn snapshot_full(&self) -> Json {
        let mut snapshot = Map::new();
        snapshot.insert("call_stack".into(), self.call_stack.to_state_json());
        snapshot.insert("variables".into(), self.variables.to_state_json());
        snapshot.insert(
            "agents".into(),
            Json::Array(
                self.agents
                    .iter()
                    .map(|a| Json::String(a.render()))
                    .collect(),
            ),
        );
        snapshot.insert(
            "owned_meetings".into(),
            Json::Array(self.owned_meetings.iter().cloned().map(Json::String).collect()),
        );
        snapshot.insert(
            "joined_meetings".into(),
            Json::Array(self.joined_meetings.iter().cloned().map(Json::String).collect()),
        );
        Json::Object(snapshot)
    }

    /// Snapshot API of the spec: `full = true` returns the complete state;
    /// `full = false` returns the delta against [`last_sent_state`]
    /// (`None` when nothing changed), falling back to the full state when
    /// no baseline exists.
    ///
    /// [`last_sent_state`]: Self::last_sent_state
    pub fn to_dict(&self, full: bool) -> Option<Json> {
        if full {
            return Some(self.snapshot_full());
        }
        match &self.last_sent_state {
            None => Some(self.snapshot_full()),
            Some(base) => self.compute_delta(base),
        }
    }

    /// Compute the minimal delta dict against `base`.  `None` when empty.
    fn compute_delta(&self, base: &Json) -> Option<StateDelta> {
        let current = self.snapshot_full();
        let mut delta = Map::new();

        // Call stack: shipped whole when it changed at all.
        if current["call_stack"] != base["call_stack"] {
            delta.insert("call_stack".into(), current["call_stack"].clone());
        }

        // Variables: split into new / changed / deleted.
        let empty = Map::new();
        let current_vars = current["variables"].as_object().unwrap_or(&empty);
        let base_vars = base["variables"].as_object().unwrap_or(&empty);

        let mut new_variables = Map::new();
        let mut changed_variables = Map::new();
        for (name, value) in current_vars {
            match base_vars.get(name) {
                None => {
                    new_variables.insert(name.clone(), value.clone());
                }
                Some(old) if old != value => {
                    changed_variables.insert(name.clone(), value.clone());
                }
                Some(_) => {}
            }
        }
        let deleted_variables: Vec<Json> = base_vars
            .keys()
            .filter(|name| !current_vars.contains_key(*name))
            .map(|name| Json::String(name.clone()))
            .collect();

        if !new_variables.is_empty() {
            delta.insert("new_variables".into(), Json::Object(new_variables));
        }
        if !changed_variables.is_empty() {
            delta.insert("changed_variables".into(), Json::Object(changed_variables));
        }
        if !deleted_variables.is_empty() {
            delta.insert("deleted_variables".into(), Json::Array(deleted_variables));
        }

        // Agents: only additions are reported.
        let no_agents = Vec::new();
        let base_agents = base["agents"].as_array().unwrap_or(&no_agents);
        let new_agents: Vec<Json> = current["agents"]
            .as_array()
            .unwrap_or(&no_agents)
            .iter()
            .filter(|agent| !base_agents.contains(agent))
            .cloned()
            .collect();
        if !new_agents.is_empty() {
            delta.insert("new_agents".into(), Json::Array(new_agents));
        }

        // Meetings: shipped whole when membership changed.
        for key in ["owned_meetings", "joined_meetings"] {
            if current[key] != base[key] {
                delta.insert(key.into(), current[key].clone());
            }
        }

        if delta.is_empty() {
            None
        } else {
            Some(Json::Object(delta))
        }
    }

    /// State block for the next LLM call.
    ///
    /// Returns the snapshot (or delta) to embed plus the frame type.  A
    /// `(None, P)` result means the prompt omits the state block entirely.
    ///
    /// A full snapshot is shipped when compression is disabled, when there
    /// is no execution id or no prior I-frame, or when `i_frame_interval`
    /// calls have elapsed since the last I-frame.  Shipping a full snapshot
    /// resets the delta baseline and records the I-frame execution id.
    pub fn get_state_for_llm(
        &mut self,
        execution_id: Option<u64>,
        config: &StateCompressionConfig,
    ) -> (Option<Json>, FrameType) {
        let needs_i_frame = !config.enabled
            || execution_id.is_none()
            || self.last_i_frame_execution_id.is_none()
            || execution_id
                .zip(self.last_i_frame_execution_id)
                .is_some_and(|(current, last)| current.saturating_sub(last) >= config.i_frame_interval);

        if needs_i_frame {
            let full = self.snapshot_full();
            self.last_sent_state = Some(full.clone());
            if let Some(execution_id) = execution_id {
                self.last_i_frame_execution_id = Some(execution_id);
            }
            (Some(full), FrameType::I)
        } else {
            let delta = self
                .last_sent_state
                .as_ref()
                .and_then(|base| self.compute_delta(base));
            // Advance the baseline so the next delta chains off what the
            // LLM has now seen.
            self.last_sent_state = Some(self.snapshot_full());
            (delta, FrameType::P)
        }
    }
}

impl ExecutionState {
    /// Full-fidelity serialization for checkpoints.
    ///
    /// Unlike [`snapshot_full`](Self::snapshot_full) (the LLM-facing view,
    /// where artifacts collapse to summary strings), this round-trips every
    /// structure by value.  The `agents` key keeps the `Klass(agent id)`
    /// string shape so restore can recover classes without extra metadata.
    pub fn to_checkpoint_json(&self) -> Json {
        let frames = serde_json::to_value(self.call_stack.frames()).unwrap_or(Json::Null);
        let top_level =
            serde_json::to_value(self.call_stack.top_level_messages()).unwrap_or(Json::Null);
        let variables: Map<String, Json> = self
            .variables
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    serde_json::to_value(value).unwrap_or(Json::Null),
                )
            })
            .collect();
        let artifacts =
            serde_json::to_value(self.artifacts.iter().collect::<Vec<_>>()).unwrap_or(Json::Null);

        let mut snapshot = Map::new();
        snapshot.insert("frames".into(), frames);
        snapshot.insert("top_level_messages".into(), top_level);
        snapshot.insert("variables".into(), Json::Object(variables));
        snapshot.insert("artifacts".into(), artifacts);
        snapshot.insert(
            "owned_meetings".into(),
            serde_json::to_value(&self.owned_meetings).unwrap_or(Json::Null),
        );
        snapshot.insert(
            "joined_meetings".into(),
            serde_json::to_value(&self.joined_meetings).unwrap_or(Json::Null),
        );
        snapshot.insert(
            "agents".into(),
            Json::Array(
                self.agents
                    .iter()
                    .map(|a| Json::String(a.render()))
                    .collect(),
            ),
        );
        Json::Object(snapshot)
    }

    /// Rebuild state from [`to_checkpoint_json`](Self::to_checkpoint_json)
    /// output.  Unknown or malformed sections are skipped rather than
    /// failing the whole restore.
    pub fn restore_from_checkpoint(&mut self, snapshot: &Json) {
        let frames = snapshot
            .get("frames")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let top_level = snapshot
            .get("top_level_messages")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        self.call_stack.restore(frames, top_level);

        if let Some(variables) = snapshot.get("variables").and_then(Json::as_object) {
            for (name, value) in variables {
                if let Ok(value) = serde_json::from_value::<Value>(value.clone()) {
                    self.variables.set(name, value);
                }
            }
        }

        if let Some(artifacts) = snapshot.get("artifacts").and_then(Json::as_array) {
            for artifact in artifacts {
                if let Ok(artifact) =
                    serde_json::from_value::<crate::artifacts::Artifact>(artifact.clone())
                {
                    self.artifacts.upsert(artifact);
                }
            }
        }

        for (key, target) in [
            ("owned_meetings", &mut self.owned_meetings),
            ("joined_meetings", &mut self.joined_meetings),
        ] {
            if let Some(list) = snapshot.get(key).and_then(|v| {
                serde_json::from_value::<Vec<String>>(v.clone()).ok()
            }) {
                *target = list;
            }
        }

        if let Some(agents) = snapshot.get("agents").and_then(Json::as_array) {
            self.agents = agents
                .iter()
                .filter_map(|a| a.as_str().and_then(AgentSummary::parse))
                .collect();
        }
    }
}

/// Apply a delta produced by [`ExecutionState::to_dict`] to a baseline
/// snapshot, yielding the full state it represents.
pub fn apply_delta(base: &Json, delta: &Json) -> Json {
    let mut result = base.clone();
    let Some(result_map) = result.as_object_mut() else {
        return result;
    };
    let Some(delta_map) = delta.as_object() else {
        return result;
    };

    for key in ["call_stack", "owned_meetings", "joined_meetings"] {
        if let Some(value) = delta_map.get(key) {
            result_map.insert(key.to_string(), value.clone());
        }
    }

    let variables = result_map
        .entry("variables")
        .or_insert_with(|| Json::Object(Map::new()));
    if let Some(vars) = variables.as_object_mut() {
        for key in ["new_variables", "changed_variables"] {
            if let Some(Json::Object(updates)) = delta_map.get(key) {
                for (name, value) in updates {
                    vars.insert(name.clone(), value.clone());
                }
            }
        }
        if let Some(Json::Array(deleted)) = delta_map.get("deleted_variables") {
            for name in deleted {
                if let Some(name) = name.as_str() {
                    vars.remove(name);
                }
            }
        }
    }

    if let Some(Json::Array(new_agents)) = delta_map.get("new_agents") {
        let agents = result_map
            .entry("agents")
            .or_insert_with(|| Json::Array(Vec::new()));
        if let Some(list) = agents.as_array_mut() {
            list.extend(new_agents.iter().cloned());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExecutionState {
        ExecutionState::new(EventBus::new("test_session"), "TestAgent", "1000")
    }

    #[test]
    fn initial_state_has_no_baseline() {
        let state = state();
        assert!(state.last_sent_state.is_none());
        assert!(state.last_i_frame_execution_id.is_none());
    }

    #[test]
    fn full_state_has_all_sections() {
        let mut state = state();
        state.variables.set("var1", Value::Str("value1".into()));

        let full = state.to_dict(true).expect("full");
        for key in [
            "call_stack",
            "variables",
            "agents",
            "owned_meetings",
            "joined_meetings",
        ] {
            assert!(full.get(key).is_some(), "missing section {key}");
        }
    }

    #[test]
    fn delta_without_baseline_returns_full() {
        let mut state = state();
        state.variables.set("var1", Value::Str("value1".into()));

        let delta = state.to_dict(false).expect("full fallback");
        assert!(delta.get("variables").is_some());
    }

    #[test]
    fn delta_with_no_changes_is_none() {
        let mut state = state();
        state.variables.set("var1", Value::Str("value1".into()));
        state.last_sent_state = Some(state.snapshot_full());

        assert!(state.to_dict(false).is_none());
    }

    #[test]
    fn delta_reports_added_changed_deleted_variables() {
        let mut state = state();
        state.variables.set("var1", Value::Str("value1".into()));
        state.variables.set("var2", Value::Str("value2".into()));
        state.last_sent_state = Some(state.snapshot_full());

        state.variables.set("var3", Value::Str("value3".into()));
        state.variables.set("var1", Value::Str("modified".into()));
        state.variables.remove("var2");

        let delta = state.to_dict(false).expect("delta");
        assert_eq!(delta["new_variables"]["$var3"], serde_json::json!("value3"));
        assert_eq!(
            delta["changed_variables"]["$var1"],
            serde_json::json!("modified")
        );
        assert_eq!(delta["deleted_variables"], serde_json::json!(["$var2"]));
    }

    #[test]
    fn delta_reports_new_agents_only() {
        let mut state = state();
        state.agents.push(AgentSummary {
            id: "1001".into(),
            klass: "Helper".into(),
        });
        state.last_sent_state = Some(state.snapshot_full());

        state.agents.push(AgentSummary {
            id: "1002".into(),
            klass: "Checker".into(),
        });

        let delta = state.to_dict(false).expect("delta");
        assert_eq!(
            delta["new_agents"],
            serde_json::json!(["Checker(agent 1002)"])
        );
        assert!(delta.get("changed_variables").is_none());
    }

    #[test]
    fn delta_reports_call_stack_changes_whole() {
        use crate::call_stack::CallStackFrame;
        use crate::instruction_pointer::InstructionPointer;

        let mut state = state();
        state
            .call_stack
            .push(CallStackFrame::new(InstructionPointer::start_of("Main")));
        state.last_sent_state = Some(state.snapshot_full());

        state
            .call_stack
            .push(CallStackFrame::new(InstructionPointer::start_of("Helper")));

        let delta = state.to_dict(false).expect("delta");
        assert_eq!(
            delta["call_stack"].as_array().expect("array").len(),
            2
        );
    }

    #[test]
    fn applying_delta_reconstructs_full_state() {
        let mut state = state();
        state.variables.set("a", Value::Int(1));
        state.variables.set("b", Value::Int(2));
        let baseline = state.snapshot_full();
        state.last_sent_state = Some(baseline.clone());

        state.variables.set("a", Value::Int(10));
        state.variables.remove("b");
        state.variables.set("c", Value::Int(3));
        state.agents.push(AgentSummary {
            id: "1001".into(),
            klass: "Helper".into(),
        });

        let delta = state.to_dict(false).expect("delta");
        assert_eq!(apply_delta(&baseline, &delta), state.snapshot_full());
    }

    #[test]
    fn i_frame_interval_policy() {
        let mut state = state();
        let config = StateCompressionConfig {
            enabled: true,
            i_frame_interval: 3,
        };

        // Execution ids 1..=7 with interval 3: I P P I P P I.
        let mut kinds = Vec::new();
        for execution_id in 1..=7 {
            let (_, frame_type) = state.get_state_for_llm(Some(execution_id), &config);
            kinds.push(frame_type);
        }
        assert_eq!(
            kinds,
            vec![
                FrameType::I,
                FrameType::P,
                FrameType::P,
                FrameType::I,
                FrameType::P,
                FrameType::P,
                FrameType::I,
            ]
        );
    }

    #[test]
    fn disabled_compression_always_ships_full() {
        let mut state = state();
        let config = StateCompressionConfig {
            enabled: false,
            i_frame_interval: 3,
        };

        for execution_id in 1..=4 {
            let (snapshot, frame_type) = state.get_state_for_llm(Some(execution_id), &config);
            assert_eq!(frame_type, FrameType::I);
            assert!(snapshot.is_some());
        }
    }

    #[test]
    fn p_frame_with_no_changes_omits_state_block() {
        let mut state = state();
        let config = StateCompressionConfig::default();

        let (first, frame_type) = state.get_state_for_llm(Some(1), &config);
        assert_eq!(frame_type, FrameType::I);
        assert!(first.is_some());

        let (second, frame_type) = state.get_state_for_llm(Some(2), &config);
        assert_eq!(frame_type, FrameType::P);
        assert!(second.is_none());
    }

    #[test]
    fn large_values_auto_convert_to_artifacts() {
        let mut state = state();
        let long = "x".repeat(81);
        let stored = state.set_variable("result", Value::Str(long.clone()), 80);

        assert!(matches!(stored, Value::Artifact { .. }));
        assert_eq!(state.artifacts.get("result").expect("artifact").content, long);
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut state = state();
        let exactly = "x".repeat(80);
        let stored = state.set_variable("small", Value::Str(exactly.clone()), 80);
        assert_eq!(stored, Value::Str(exactly));
        assert!(state.artifacts.is_empty());
    }

    #[test]
    fn checkpoint_round_trip_preserves_state_by_value() {
        use crate::call_stack::CallStackFrame;
        use crate::instruction_pointer::InstructionPointer;

        let mut original = state();
        original.variables.set("count", Value::Int(3));
        original.save_artifact("report", "Q1", "big content");
        original.owned_meetings.push("m-1".into());
        original.agents.push(AgentSummary {
            id: "1001".into(),
            klass: "Helper".into(),
        });
        let mut frame = CallStackFrame::new(InstructionPointer::start_of("Main"));
        frame.locals.insert("x".into(), Value::Int(7));
        frame.mark_artifact_loaded("report");
        original.call_stack.push(frame);

        let snapshot = original.to_checkpoint_json();

        let mut restored = state();
        restored.restore_from_checkpoint(&snapshot);

        assert_eq!(restored.variables.get("count"), Some(&Value::Int(3)));
        assert_eq!(
            restored.artifacts.get("report").expect("artifact").content,
            "big content"
        );
        assert_eq!(restored.owned_meetings, vec!["m-1".to_string()]);
        assert_eq!(restored.call_stack.depth(), 1);
        let frame = restored.call_stack.peek().expect("frame");
        assert_eq!(frame.locals.get("x"), Some(&Value::Int(7)));
        assert!(frame.is_artifact_loaded("report"));
        assert_eq!(restored.agents.len(), 1);
    }

    #[test]
    fn agent_summary_round_trips() {
        let summary = AgentSummary {
            id: "1001".into(),
            klass: "Buyer".into(),
        };
        assert_eq!(summary.render(), "Buyer(agent 1001)");
        assert_eq!(AgentSummary::parse("Buyer(agent 1001)"), Some(summary));
        assert_eq!(AgentSummary::parse("garbage"), None);
    }
}
