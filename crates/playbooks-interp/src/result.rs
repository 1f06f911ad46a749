//! Execution results.
//!
//! One [`ExecutionResult`] is produced per LLM call.  The control-flow
//! flags are mutually exclusive: at most one of `wait_for_user_input`,
//! `wait_for_agent_input`, `playbook_finished`, `exit_program` is set, and
//! setting one clears the others (the last directive wins).

use std::collections::BTreeMap;

use playbooks_state::{InstructionPointer, Value};

/// Captured directives and flags from executing one LLM response.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Steps executed, in order.
    pub steps: Vec<InstructionPointer>,
    /// `(recipient, message)` pairs from `Say`.
    pub messages: Vec<(String, String)>,
    /// Variables captured via `Var`/`self.state` writes.
    pub vars: BTreeMap<String, Value>,
    /// Names of artifacts created during this call.
    pub artifacts: Vec<String>,
    /// Trigger codes recorded via `Trigger`.
    pub triggers: Vec<String>,
    /// Value passed to `Return`, if any.
    pub return_value: Option<Value>,

    // -- Control flow flags (mutually exclusive) ---------------------------
    /// Waiting for a human message.
    pub wait_for_user_input: bool,
    /// Waiting for an agent or meeting message.
    pub wait_for_agent_input: bool,
    /// The agent/meeting spec being waited on.
    pub wait_for_agent_target: Option<String>,
    /// The playbook returned.
    pub playbook_finished: bool,
    /// `Yield("exit")` was executed.
    pub exit_program: bool,

    /// A `TNK` step was executed (internal reasoning in progress).
    pub is_thinking: bool,

    // -- Error tracking -----------------------------------------------------
    /// The generated code failed to parse.
    pub syntax_error: bool,
    /// A statement failed while executing.
    pub runtime_error: bool,
    /// Human-readable error description.
    pub error_message: Option<String>,
    /// Details of the failure (failing statement, context).
    pub error_traceback: Option<String>,
}

impl ExecutionResult {
    /// Create an empty result.
    pub fn new() -> Self {
        Self::default()
    }

    fn clear_flags(&mut self) {
        self.wait_for_user_input = false;
        self.wait_for_agent_input = false;
        self.wait_for_agent_target = None;
        self.playbook_finished = false;
        self.exit_program = false;
    }

    /// Mark as waiting for human input.
    pub fn mark_wait_for_user(&mut self) {
        self.clear_flags();
        self.wait_for_user_input = true;
    }

    /// Mark as waiting for an agent/meeting message.
    pub fn mark_wait_for_agent(&mut self, target: impl Into<String>) {
        self.clear_flags();
        self.wait_for_agent_input = true;
        self.wait_for_agent_target = Some(target.into());
    }

    /// Mark the playbook as finished with `value`.
    pub fn mark_finished(&mut self, value: Option<Value>) {
        self.clear_flags();
        self.playbook_finished = true;
        if value.is_some() {
            self.return_value = value;
        }
    }

    /// Mark program exit.
    pub fn mark_exit_program(&mut self) {
        self.clear_flags();
        self.exit_program = true;
    }

    /// Record a syntax error.
    pub fn record_syntax_error(&mut self, message: impl Into<String>) {
        self.syntax_error = true;
        self.error_message = Some(message.into());
    }

    /// Record a runtime error with the failing statement for context.
    pub fn record_runtime_error(
        &mut self,
        message: impl Into<String>,
        statement: impl Into<String>,
    ) {
        self.runtime_error = true;
        self.error_message = Some(message.into());
        self.error_traceback = Some(format!("while executing: {}", statement.into()));
    }

    /// Number of control-flow flags currently set (0 or 1 by invariant).
    pub fn active_flag_count(&self) -> usize {
        usize::from(self.wait_for_user_input)
            + usize::from(self.wait_for_agent_input)
            + usize::from(self.playbook_finished)
            + usize::from(self.exit_program)
    }

    /// Whether any error was recorded.
    pub fn has_error(&self) -> bool {
        self.syntax_error || self.runtime_error
    }
}
