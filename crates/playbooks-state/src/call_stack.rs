//! Call stack of playbook frames.
//!
//! A frame exists exactly while a playbook call is in progress.  Each frame
//! carries the locals captured from LLM-generated statements (preserved
//! across yields), the LLM messages produced while executing the frame, an
//! optional meeting context, and the set of artifact names whose content is
//! already materialized in the prompt window.
//!
//! LLM messages added before any frame exists land in the **top-level
//! buffer**; once a frame is pushed, new messages attach to the top frame.
//! [`CallStack::get_llm_messages`] returns top-level messages first, then
//! frame messages in push order -- the flattened sequence the prompt
//! assembler consumes.

use std::collections::{BTreeMap, BTreeSet};

use playbooks_kernel::{Event, EventBus};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StateError};
use crate::instruction_pointer::InstructionPointer;
use crate::llm_messages::LlmMessage;
use crate::value::Value;

/// One call-stack entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStackFrame {
    /// Current location within the playbook.
    pub instruction_pointer: InstructionPointer,
    /// Locals captured from executed statements; seeded with playbook
    /// arguments.  Survives yields.
    pub locals: BTreeMap<String, Value>,
    /// LLM messages produced while executing this frame, in order.
    pub llm_messages: Vec<LlmMessage>,
    /// Meeting owned or joined by this frame, if any.
    pub meeting_id: Option<String>,
    /// Artifact names whose content is already in the prompt window.
    pub loaded_artifact_names: BTreeSet<String>,
}

impl CallStackFrame {
    /// Create a frame positioned at `instruction_pointer`.
    pub fn new(instruction_pointer: InstructionPointer) -> Self {
        Self {
            instruction_pointer,
            locals: BTreeMap::new(),
            llm_messages: Vec::new(),
            meeting_id: None,
            loaded_artifact_names: BTreeSet::new(),
        }
    }

    /// Create a frame seeded with playbook arguments as locals.
    pub fn with_locals(
        instruction_pointer: InstructionPointer,
        locals: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            locals,
            ..Self::new(instruction_pointer)
        }
    }

    /// Append an LLM message to this frame.
    pub fn add_llm_message(&mut self, message: LlmMessage) {
        self.llm_messages.push(message);
    }

    /// Whether `name`'s content is already in the prompt window.
    pub fn is_artifact_loaded(&self, name: &str) -> bool {
        self.loaded_artifact_names.contains(name)
    }

    /// Record that `name`'s content now appears in the prompt window.
    pub fn mark_artifact_loaded(&mut self, name: impl Into<String>) {
        self.loaded_artifact_names.insert(name.into());
    }
}

/// Ordered frames plus the pre-frame top-level message buffer.
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<CallStackFrame>,
    top_level_messages: Vec<LlmMessage>,
    bus: EventBus,
    agent_id: String,
}

impl CallStack {
    /// Create an empty stack for `agent_id`.
    pub fn new(bus: EventBus, agent_id: impl Into<String>) -> Self {
        Self {
            frames: Vec::new(),
            top_level_messages: Vec::new(),
            bus,
            agent_id: agent_id.into(),
        }
    }

    /// Push a frame (playbook entry).
    pub fn push(&mut self, frame: CallStackFrame) {
        self.bus.publish(Event::CallStackPush {
            agent_id: self.agent_id.clone(),
            frame: frame.instruction_pointer.to_string(),
            depth: self.frames.len() + 1,
        });
        self.frames.push(frame);
    }

    /// Pop the top frame (playbook exit).
    pub fn pop(&mut self) -> Result<CallStackFrame> {
        let frame = self.frames.pop().ok_or(StateError::EmptyCallStack)?;
        self.bus.publish(Event::CallStackPop {
            agent_id: self.agent_id.clone(),
            frame: frame.instruction_pointer.to_string(),
            depth: self.frames.len(),
        });
        Ok(frame)
    }

    /// The top frame, if any.
    pub fn peek(&self) -> Option<&CallStackFrame> {
        self.frames.last()
    }

    /// Mutable access to the top frame.
    pub fn peek_mut(&mut self) -> Option<&mut CallStackFrame> {
        self.frames.last_mut()
    }

    /// All frames, bottom first.
    pub fn frames(&self) -> &[CallStackFrame] {
        &self.frames
    }

    /// Whether no playbook call is in progress.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Append a message to the top frame, or to the top-level buffer when
    /// the stack is empty.
    pub fn add_llm_message(&mut self, message: LlmMessage) {
        match self.frames.last_mut() {
            Some(frame) => frame.add_llm_message(message),
            None => self.top_level_messages.push(message),
        }
    }

    /// Append a message to the caller frame (`frames[-2]`); with fewer than
    /// two frames, append to the top-level buffer.
    pub fn add_llm_message_on_parent(&mut self, message: LlmMessage) {
        let depth = self.frames.len();
        if depth >= 2 {
            self.frames[depth - 2].add_llm_message(message);
        } else {
            self.top_level_messages.push(message);
        }
    }

    /// Replace the top frame's instruction pointer.
    pub fn advance_instruction_pointer(&mut self, instruction_pointer: InstructionPointer) {
        if let Some(frame) = self.frames.last_mut() {
            frame.instruction_pointer = instruction_pointer;
        }
    }

    /// Whether `name` is loaded in the current frame's prompt window.
    pub fn is_artifact_loaded(&self, name: &str) -> bool {
        self.frames
            .last()
            .is_some_and(|frame| frame.is_artifact_loaded(name))
    }

    /// Mark `name` loaded in the current frame's prompt window.
    pub fn mark_artifact_loaded(&mut self, name: impl Into<String>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.mark_artifact_loaded(name);
        }
    }

    /// The top-level (pre-frame) messages.
    pub fn top_level_messages(&self) -> &[LlmMessage] {
        &self.top_level_messages
    }

    /// Flattened message sequence: top-level first, then each frame's
    /// messages in push order.
    pub fn get_llm_messages(&self) -> Vec<LlmMessage> {
        let mut messages = self.top_level_messages.clone();
        for frame in &self.frames {
            messages.extend(frame.llm_messages.iter().cloned());
        }
        messages
    }

    /// Replace the stack wholesale (checkpoint restore).  No events are
    /// published; the frames were already live when captured.
    pub fn restore(&mut self, frames: Vec<CallStackFrame>, top_level: Vec<LlmMessage>) {
        self.frames = frames;
        self.top_level_messages = top_level;
    }

    /// Snapshot of frame locations, bottom first, for state dicts.
    pub fn to_state_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.frames
                .iter()
                .map(|f| serde_json::Value::String(f.instruction_pointer.to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_messages::FrameType;

    fn stack() -> CallStack {
        CallStack::new(EventBus::new("test_session"), "1000")
    }

    fn frame(playbook: &str) -> CallStackFrame {
        CallStackFrame::new(InstructionPointer::start_of(playbook))
    }

    #[test]
    fn push_pop_peek() {
        let mut stack = stack();
        assert!(stack.is_empty());

        stack.push(frame("Main"));
        stack.push(frame("Helper"));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.peek().expect("peek").instruction_pointer.playbook, "Helper");

        let popped = stack.pop().expect("pop");
        assert_eq!(popped.instruction_pointer.playbook, "Helper");
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn pop_on_empty_is_an_error() {
        let mut stack = stack();
        assert!(matches!(stack.pop(), Err(StateError::EmptyCallStack)));
    }

    #[test]
    fn messages_before_any_frame_go_to_top_level() {
        let mut stack = stack();
        stack.add_llm_message(LlmMessage::agent_communication("early"));
        assert_eq!(stack.top_level_messages().len(), 1);

        stack.push(frame("Main"));
        stack.add_llm_message(LlmMessage::user_input("prompt", FrameType::I));
        assert_eq!(stack.peek().expect("peek").llm_messages.len(), 1);
        assert_eq!(stack.top_level_messages().len(), 1);
    }

    #[test]
    fn flattened_order_is_top_level_then_frames() {
        let mut stack = stack();
        stack.add_llm_message(LlmMessage::agent_communication("top"));
        stack.push(frame("Main"));
        stack.add_llm_message(LlmMessage::user_input("outer", FrameType::I));
        stack.push(frame("Helper"));
        stack.add_llm_message(LlmMessage::user_input("inner", FrameType::P));

        let flattened = stack.get_llm_messages();
        let contents: Vec<&str> = flattened.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["top", "outer", "inner"]);
    }

    #[test]
    fn parent_messages_attach_to_caller_frame() {
        let mut stack = stack();
        stack.push(frame("Main"));
        stack.push(frame("Helper"));
        stack.add_llm_message_on_parent(LlmMessage::execution_result("result"));

        assert_eq!(stack.frames()[0].llm_messages.len(), 1);
        assert!(stack.peek().expect("peek").llm_messages.is_empty());
    }

    #[test]
    fn parent_messages_fall_back_to_top_level() {
        let mut stack = stack();
        stack.push(frame("Main"));
        stack.add_llm_message_on_parent(LlmMessage::execution_result("result"));
        assert_eq!(stack.top_level_messages().len(), 1);
    }

    #[test]
    fn advance_replaces_top_pointer() {
        let mut stack = stack();
        stack.push(frame("Main"));
        let next = InstructionPointer::parse("Main:02:EXE").expect("parse");
        stack.advance_instruction_pointer(next.clone());
        assert_eq!(stack.peek().expect("peek").instruction_pointer, next);
    }

    #[test]
    fn artifact_loaded_tracking_is_per_frame() {
        let mut stack = stack();
        stack.push(frame("Main"));
        stack.mark_artifact_loaded("report");
        assert!(stack.is_artifact_loaded("report"));

        stack.push(frame("Helper"));
        assert!(!stack.is_artifact_loaded("report"));
    }

    #[test]
    fn push_pop_publish_events() {
        let bus = EventBus::new("test_session");
        let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let events_clone = std::sync::Arc::clone(&events);
        bus.subscribe("*", move |envelope| {
            events_clone
                .lock()
                .expect("lock")
                .push(envelope.event.kind().to_string());
        });

        let mut stack = CallStack::new(bus, "1000");
        stack.push(frame("Main"));
        stack.pop().expect("pop");

        assert_eq!(
            *events.lock().expect("lock"),
            vec!["call_stack_push", "call_stack_pop"]
        );
    }
}
