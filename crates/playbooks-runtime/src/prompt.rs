//! Prompt assembly.
//!
//! Builds the ordered message list for one interpreter LLM call:
//!
//! 1. the system-style preamble (embedded template with
//!    `{{AGENT_INSTRUCTIONS}}`, `{{INSTRUCTION}}`, `{{CONTEXT_PREFIX}}`
//!    substituted),
//! 2. an optional peer-agents message,
//! 3. this agent's description and public playbook signatures,
//! 4. optional trigger instructions,
//! 5. the compacted conversation (top-level + frame messages), which ends
//!    with the freshly attached user-input message carrying the I/P state
//!    block.
//!
//! Agent instructions ride only on I-frames; P-frames inherit them from
//! the last I-frame still present in history.

use playbooks_state::{
    ExecutionState, FrameType, LlmMessage, StateCompressionConfig, Value,
};
use serde_json::Value as Json;

use crate::compactor::LlmContextCompactor;

/// The embedded interpreter preamble template.
const PROMPT_TEMPLATE: &str = include_str!("../assets/interpreter_prompt.md");

/// Inputs for one prompt build.
pub struct PromptInputs<'a> {
    /// The caller's immediate directive ("Execute X from step 01", "...
    /// was executed - continue execution.").
    pub instruction: &'a str,
    /// Standing instructions for this agent ("Remember: You are ...").
    pub agent_instructions: &'a str,
    /// Compact description of this agent plus its public signatures.
    pub agent_information: String,
    /// Peer agent class descriptions.
    pub other_agents_information: Vec<String>,
    /// Available cross-playbook trigger lines.
    pub trigger_instructions: Vec<String>,
}

/// Assemble the message list for the next LLM call.
///
/// Attaches the new user-input message (instruction + state block) to the
/// current frame as a side effect, then returns the full request sequence
/// and the frame type that was shipped.
pub fn assemble(
    state: &mut ExecutionState,
    inputs: &PromptInputs<'_>,
    execution_id: u64,
    compression: &StateCompressionConfig,
) -> (Vec<LlmMessage>, FrameType) {
    let (state_block, frame_type) = state.get_state_for_llm(Some(execution_id), compression);

    // User-input message: state block (with artifact hints) + instruction.
    let mut user_content = String::new();
    if let Some(state_json) = &state_block {
        let label = match frame_type {
            FrameType::I => "Current state",
            FrameType::P => "State changes",
        };
        let rendered = serde_json::to_string_pretty(state_json)
            .unwrap_or_else(|_| state_json.to_string());
        let hinted = add_artifact_hints(&rendered, state_json, state);
        user_content.push_str(&format!("{label}:\n```json\n{hinted}\n```\n\n"));
    }
    user_content.push_str(inputs.instruction);

    state
        .call_stack
        .add_llm_message(LlmMessage::user_input(user_content, frame_type));

    // Preamble from the embedded template.
    let agent_instructions = match frame_type {
        FrameType::I => inputs.agent_instructions,
        FrameType::P => "",
    };
    let preamble = PROMPT_TEMPLATE
        .replace("{{AGENT_INSTRUCTIONS}}", agent_instructions)
        .replace("{{INSTRUCTION}}", inputs.instruction)
        .replace("{{CONTEXT_PREFIX}}", &build_context_prefix(state));

    let mut messages = vec![LlmMessage::system_prompt(preamble)];

    if !inputs.other_agents_information.is_empty() {
        let block = format!(
            "*Other agents*\n```md\n{}\n```",
            inputs.other_agents_information.join("\n\n")
        );
        messages.push(LlmMessage::other_agent_info(block));
    }

    messages.push(LlmMessage::agent_info(format!(
        "*My agent*\n```md\n{}\n```",
        inputs.agent_information
    )));

    if !inputs.trigger_instructions.is_empty() {
        let block = format!(
            "*Available playbook triggers*\n```md\n{}\n```",
            inputs.trigger_instructions.join("\n")
        );
        messages.push(LlmMessage::trigger_instructions(block));
    }

    let flattened = flatten_with_cache_tails(state);
    messages.extend(LlmContextCompactor::new().compact(&flattened));

    (messages, frame_type)
}

/// Flatten stack messages, marking the tail of the top-level stream and of
/// each frame stream as prompt-cache boundaries.
fn flatten_with_cache_tails(state: &ExecutionState) -> Vec<LlmMessage> {
    let mut flattened = Vec::new();

    let top_level = state.call_stack.top_level_messages();
    for (index, message) in top_level.iter().enumerate() {
        let mut message = message.clone();
        if index + 1 == top_level.len() {
            message.cached = true;
        }
        flattened.push(message);
    }

    for frame in state.call_stack.frames() {
        for (index, message) in frame.llm_messages.iter().enumerate() {
            let mut message = message.clone();
            if index + 1 == frame.llm_messages.len() {
                message.cached = true;
            }
            flattened.push(message);
        }
    }

    flattened
}

/// Code-style block describing what is in scope for the generated code.
fn build_context_prefix(state: &ExecutionState) -> String {
    let mut lines = vec!["```python".to_string()];

    let call_stack: Vec<String> = state
        .call_stack
        .frames()
        .iter()
        .map(|f| f.instruction_pointer.to_string())
        .collect();
    lines.push(format!("call_stack = {call_stack:?} # managed by the runtime"));
    lines.push(format!(
        "owned_meetings = {:?} # managed by the runtime",
        state.owned_meetings
    ));
    lines.push(format!(
        "joined_meetings = {:?} # managed by the runtime",
        state.joined_meetings
    ));
    let agents: Vec<String> = state.agents.iter().map(|a| a.render()).collect();
    lines.push(format!("all_agents = {agents:?} # managed by the runtime"));

    if let Some(frame) = state.call_stack.peek() {
        if !frame.locals.is_empty() {
            lines.push(String::new());
            for (name, value) in &frame.locals {
                lines.push(format_variable(name, value));
            }
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "self = ...  # {} ({})",
        state.klass, state.agent_id
    ));
    for (name, value) in state.variables.iter() {
        lines.push(format!("self.state.{}", format_variable(name, value)));
    }

    lines.push("```".to_string());
    lines.join("\n")
}

/// One `name = value` line; non-literal values render as `... # TypeName`.
fn format_variable(name: &str, value: &Value) -> String {
    match value {
        Value::Artifact { summary, .. } => {
            format!("{name} = ...  # Artifact: {summary}")
        }
        Value::List(_) | Value::Map(_) => {
            let repr = value.repr();
            if repr.len() <= 120 {
                format!("{name} = {repr}")
            } else {
                format!("{name} = ...  # {}", value.type_name())
            }
        }
        other => format!("{name} = {}", other.repr()),
    }
}

/// Append load-status hints to artifact-valued variables in the rendered
/// state JSON.
fn add_artifact_hints(rendered: &str, state_json: &Json, state: &ExecutionState) -> String {
    let mut artifact_names: Vec<String> = Vec::new();
    for key in ["variables", "new_variables", "changed_variables"] {
        if let Some(variables) = state_json.get(key).and_then(Json::as_object) {
            for (name, value) in variables {
                if value
                    .as_str()
                    .is_some_and(|s| s.starts_with("Artifact:"))
                {
                    artifact_names.push(name.clone());
                }
            }
        }
    }
    if artifact_names.is_empty() {
        return rendered.to_string();
    }

    let lines: Vec<String> = rendered
        .lines()
        .map(|line| {
            for name in &artifact_names {
                if line.contains(&format!("\"{name}\":")) {
                    let bare = name.trim_start_matches('$');
                    let hint = if state.call_stack.is_artifact_loaded(bare) {
                        "  // content loaded above".to_string()
                    } else {
                        format!("  // not loaded: use LoadArtifact('{name}') to load")
                    };
                    let trimmed = line.trim_end_matches(',');
                    let comma = if line.trim_end().ends_with(',') { "," } else { "" };
                    return format!("{trimmed}{hint}{comma}");
                }
            }
            line.to_string()
        })
        .collect();
    lines.join("\n")
}
