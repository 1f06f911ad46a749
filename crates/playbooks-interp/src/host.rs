//! The capture host: where generated code meets the agent.
//!
//! The evaluator has no side effects of its own.  Every directive the LLM
//! writes -- `Step`, `Say`, `Var`, `SaveArtifact`, `Trigger`, `Return`,
//! `Yield` -- and every playbook call resolves to a method on the agent's
//! [`CaptureHost`] implementation.  `Yield` may suspend the calling task on
//! the agent's inbox; the evaluator holds no locks across those awaits.

use std::collections::BTreeMap;

use async_trait::async_trait;
use playbooks_state::Value;

use crate::error::Result;

/// Side-effect surface provided by the executing agent.
#[async_trait]
pub trait CaptureHost: Send {
    /// `Step("Playbook:01:QUE")` -- advance the instruction pointer.
    async fn step(&mut self, location: &str) -> Result<()>;

    /// `Say(target, message)` -- deliver a message; streams to humans.
    async fn say(&mut self, target: &str, message: &str) -> Result<()>;

    /// `Var(name, value)` -- assign a variable (auto-artifacts large values).
    async fn var(&mut self, name: &str, value: Value) -> Result<()>;

    /// `SaveArtifact(name, summary, content)`.
    async fn save_artifact(&mut self, name: &str, summary: &str, content: &str) -> Result<()>;

    /// `LoadArtifact(name)` -- materialize artifact content into the prompt
    /// window; returns the content.
    async fn load_artifact(&mut self, name: &str) -> Result<Value>;

    /// `Trigger(code)` -- record that a trigger fired.
    async fn log_trigger(&mut self, code: &str) -> Result<()>;

    /// `Return(value)` -- mark the playbook finished.
    async fn return_value(&mut self, value: Value) -> Result<()>;

    /// `Yield(target)` -- suspend until the matching message arrives.
    async fn yield_to(&mut self, target: &str) -> Result<()>;

    /// `WaitForMessage(source)` -- block for a message from `source`
    /// (`"human"`, an agent id, or `"meeting <id>"`); returns its content.
    async fn wait_for_message(&mut self, source: &str) -> Result<Value>;

    /// Call a playbook: local (`GetOrder`) or qualified
    /// (`OtherAgent.GetOrder`).  Cross-agent calls suspend until the reply.
    async fn call_playbook(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value>;

    /// Whether `name` is a known peer agent class (enables the
    /// `OtherAgent.playbook(...)` proxy syntax).
    fn is_agent_klass(&self, name: &str) -> bool;

    /// Whether `name` is a registered playbook on this agent.
    fn is_playbook(&self, name: &str) -> bool;

    /// Read `self.state.<path>`; missing paths read as `None`.
    fn state_get(&self, path: &[&str]) -> Value;

    /// Write `self.state.<path> = value` (auto-artifacts large top-level
    /// values).
    async fn state_set(&mut self, path: &[&str], value: Value) -> Result<()>;

    /// Mirror the function-local bindings into the current frame after a
    /// statement executed, so locals survive yields and later LLM calls.
    fn sync_locals(&mut self, locals: &BTreeMap<String, Value>);
}
