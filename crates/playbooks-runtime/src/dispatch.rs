//! Playbook dispatch and post-execute.
//!
//! `execute_playbook` resolves local, builtin, and qualified
//! (`Peer.Playbook`) names, wraps the call in a stack frame, and runs the
//! body:
//!
//! - **Markdown playbooks** run the streaming loop: assemble prompt, open
//!   the LLM chunk stream, mirror human-`Say`s through the stream detector
//!   while feeding the interpreter, checkpoint each executed statement,
//!   and repeat until the generated code calls `Return` (or exits).
//! - **Python playbooks** execute their code body directly through the
//!   interpreter, no LLM involved.
//! - **Qualified calls** suspend on a correlation-id reply from the peer
//!   agent's inbox.
//!
//! Post-execute pops the frame, logs the call, and converts large results
//! into artifacts -- the caller then receives the artifact name instead of
//! the content.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use playbooks_interp::error::InterpError;
use playbooks_interp::{
    CaptureHost, ExecutionResult, IncrementalCodeBuffer, SayStreamDetector, StreamingExecutor,
};
use playbooks_kernel::Event;
use playbooks_state::{
    Artifact, InstructionPointer, LlmMessage, SessionLogItem, SessionLogLevel, Value,
};
use sha2::{Digest, Sha256};

use crate::agent::{AiAgent, SayStreamContext};
use crate::error::{Result, RuntimeError};
use crate::llm::LlmRequest;
use crate::playbook::{Playbook, PlaybookKind};
use crate::prompt::{self, PromptInputs};

/// Builtin playbooks provided by the runtime itself.
const BUILTIN_PLAYBOOKS: &[&str] = &["CreateMeeting", "InviteToMeeting", "BroadcastToMeeting"];

/// Count the statements the incremental buffer would extract from
/// `code` -- used to know how many statements a checkpoint replay skips.
pub(crate) fn count_statements(code: &str) -> usize {
    let mut buffer = IncrementalCodeBuffer::new();
    let mut count = buffer.add_chunk(&format!("{code}\n")).len();
    let (tail, _) = buffer.finish();
    count += tail.len();
    count
}

/// Content-hash fragment for stable auto-artifact names.
fn content_hash8(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl AiAgent {
    /// Uniform call contract: `execute(args, kwargs) -> (success, result)`.
    ///
    /// Failures surface as `(false, "ERROR: ...")`; no error crosses the
    /// LLM boundary except program exit.
    pub fn execute_playbook<'a>(
        &'a mut self,
        name: &'a str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> BoxFuture<'a, Result<(bool, Value)>> {
        Box::pin(async move {
            if let Some((klass, playbook)) = name.split_once('.') {
                return self.execute_remote_playbook(klass, playbook, args, kwargs).await;
            }
            if BUILTIN_PLAYBOOKS.contains(&name) {
                return self.execute_builtin(name, args, kwargs).await;
            }

            let Some(playbook) = self.playbooks.get(name).cloned() else {
                let reason = format!("ERROR: unknown playbook `{name}`");
                return Ok((false, Value::Str(reason)));
            };

            self.state.bus().publish(Event::PlaybookStart {
                agent_id: self.id().to_string(),
                playbook: playbook.name.clone(),
            });
            self.state.session_log.append(
                SessionLogItem::PlaybookStart {
                    playbook: playbook.name.clone(),
                },
                SessionLogLevel::High,
            );

            // New frame seeded with the bound arguments.
            let locals = playbook.bind_arguments(&args, &kwargs);
            let mut frame = playbooks_state::CallStackFrame::with_locals(
                InstructionPointer::start_of(&playbook.name),
                locals,
            );
            if playbook.kind == PlaybookKind::Markdown {
                frame.add_llm_message(LlmMessage::playbook_implementation(
                    playbook.render_for_prompt(),
                ));
            }
            self.state.call_stack.push(frame);

            let call_display = render_call(&playbook.name, &args, &kwargs);
            let outcome = match playbook.kind {
                PlaybookKind::Python => self.execute_python_playbook(&playbook).await,
                PlaybookKind::Markdown => {
                    self.execute_markdown_playbook(&playbook, &call_display).await
                }
            };

            match outcome {
                Ok((success, result)) => self.post_execute(&playbook, success, result).await,
                Err(RuntimeError::ExecutionFinished) => {
                    // Cleanup before the unwind continues.
                    let _ = self.state.call_stack.pop();
                    Err(RuntimeError::ExecutionFinished)
                }
                Err(error) => {
                    let failure = Value::Str(format!("ERROR: {error}"));
                    self.post_execute(&playbook, false, failure).await
                }
            }
        })
    }

    /// Resume the playbook whose frame survived a restore.
    pub(crate) async fn resume_current_playbook(&mut self) -> Result<()> {
        let Some(frame) = self.state.call_stack.peek() else {
            return Ok(());
        };
        let name = frame.instruction_pointer.playbook.clone();
        let Some(playbook) = self.playbooks.get(&name).cloned() else {
            tracing::error!(playbook = %name, "restored frame references unknown playbook");
            let _ = self.state.call_stack.pop();
            return Ok(());
        };

        let call_display = format!("{name}()");
        let outcome = self
            .execute_markdown_playbook(&playbook, &call_display)
            .await;
        match outcome {
            Ok((success, result)) => {
                let _ = self.post_execute(&playbook, success, result).await?;
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    // -- Qualified (cross-agent) calls --------------------------------------

    async fn execute_remote_playbook(
        &mut self,
        klass: &str,
        playbook: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<(bool, Value)> {
        let Some(target_id) = self.program.resolve_agent_id(klass) else {
            return Ok((
                false,
                Value::Str(format!("ERROR: unknown agent `{klass}`")),
            ));
        };

        let call_id = uuid::Uuid::now_v7().simple().to_string();
        let payload = serde_json::json!({
            "type": "execute_playbook",
            "call_id": call_id,
            "playbook": playbook,
            "args": serde_json::to_value(&args).unwrap_or_default(),
            "kwargs": serde_json::to_value(&kwargs).unwrap_or_default(),
        });
        self.program
            .send_builtin(self.id(), self.klass(), &target_id, &payload.to_string())
            .await?;

        tracing::debug!(
            agent_id = %self.id(),
            target = %target_id,
            playbook,
            "awaiting cross-agent playbook result"
        );

        // Suspend until the correlated reply arrives; unrelated messages
        // stay queued.
        let reply = self
            .handle
            .inbox
            .get_where(
                |m| {
                    m.message_type == playbooks_kernel::MessageType::Builtin
                        && serde_json::from_str::<serde_json::Value>(&m.content)
                            .is_ok_and(|p| {
                                p["type"] == "playbook_result" && p["call_id"] == call_id.as_str()
                            })
                },
                None,
            )
            .await
            .map_err(|_| RuntimeError::ExecutionFinished)?;

        let payload: serde_json::Value =
            serde_json::from_str(&reply.content).unwrap_or_default();
        let success = payload["success"].as_bool().unwrap_or(false);
        let result: Value =
            serde_json::from_value(payload["result"].clone()).unwrap_or(Value::Null);

        self.state.session_log.append(
            SessionLogItem::CallResult {
                playbook: format!("{klass}.{playbook}"),
                result: result.repr(),
            },
            SessionLogLevel::Medium,
        );
        Ok((success, result))
    }

    // -- Builtin playbooks ---------------------------------------------------

    async fn execute_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<(bool, Value)> {
        match name {
            "CreateMeeting" => {
                let topic = args
                    .first()
                    .map(Value::display_string)
                    .unwrap_or_else(|| "meeting".to_string());
                let attendees: Vec<String> = match args.get(1) {
                    Some(Value::List(items)) => {
                        items.iter().map(Value::display_string).collect()
                    }
                    Some(single) => vec![single.display_string()],
                    None => Vec::new(),
                };

                let meeting_id = self
                    .program
                    .create_meeting(self.id(), self.klass(), &topic, &attendees)
                    .await?;
                self.state.owned_meetings.push(meeting_id.clone());
                if let Some(frame) = self.state.call_stack.peek_mut() {
                    frame.meeting_id = Some(meeting_id.clone());
                }
                Ok((true, Value::Str(meeting_id)))
            }
            "InviteToMeeting" => {
                let meeting_spec = args
                    .first()
                    .map(Value::display_string)
                    .unwrap_or_default();
                let meeting_id = self.resolve_meeting_spec(
                    meeting_spec.strip_prefix("meeting ").unwrap_or(&meeting_spec),
                )?;
                let attendee = args.get(1).map(Value::display_string).unwrap_or_default();
                self.program
                    .invite_to_meeting(&meeting_id, self.id(), self.klass(), &attendee)
                    .await?;
                Ok((true, Value::Null))
            }
            "BroadcastToMeeting" => {
                let meeting_spec = args
                    .first()
                    .map(Value::display_string)
                    .unwrap_or_default();
                let message = args.get(1).map(Value::display_string).unwrap_or_default();
                self.deliver_say(&format!("meeting {meeting_spec}"), &message)
                    .await?;
                Ok((true, Value::Null))
            }
            other => Ok((
                false,
                Value::Str(format!("ERROR: unknown builtin `{other}`")),
            )),
        }
    }

    // -- Python playbooks ----------------------------------------------------

    async fn execute_python_playbook(&mut self, playbook: &Playbook) -> Result<(bool, Value)> {
        let code = playbook.code.clone().unwrap_or_default();
        let locals = self
            .state
            .call_stack
            .peek()
            .map(|f| f.locals.clone())
            .unwrap_or_default();

        let mut executor = StreamingExecutor::new(locals);
        let mut result = ExecutionResult::new();
        let outcome = {
            let mut host = AgentHost {
                agent: &mut *self,
                result: &mut result,
            };
            match executor.add_chunk(&format!("{code}\n"), &mut host).await {
                Ok(_) => executor.finalize(&mut host).await.map(|_| ()),
                Err(error) => Err(error),
            }
        };

        match outcome {
            Ok(()) => {
                let value = result.return_value.clone().unwrap_or(Value::Null);
                Ok((true, value))
            }
            Err(InterpError::ExecutionFinished) => Err(RuntimeError::ExecutionFinished),
            Err(error) => Ok((false, Value::Str(format!("ERROR: {error}")))),
        }
    }

    // -- Markdown playbooks (the LLM loop) -----------------------------------

    async fn execute_markdown_playbook(
        &mut self,
        playbook: &Playbook,
        call_display: &str,
    ) -> Result<(bool, Value)> {
        let mut instruction = format!("Execute {call_display} from step 01");

        loop {
            if self.program.is_finished() {
                return Err(RuntimeError::ExecutionFinished);
            }

            self.execution_counter += 1;
            let execution_id = self.execution_counter;

            let agent_instructions = format!(
                "Remember: You are {}(agent {}). {}",
                self.klass(),
                self.id(),
                self.description
            );
            let inputs = PromptInputs {
                instruction: &instruction,
                agent_instructions: &agent_instructions,
                agent_information: self.agent_information(),
                other_agents_information: self.program.other_agents_information(self.klass()),
                trigger_instructions: self.trigger_instructions(),
            };
            let (messages, _frame_type) = prompt::assemble(
                &mut self.state,
                &inputs,
                execution_id,
                &self.config.compression,
            );

            let result = self.run_llm_call(&messages).await?;

            if result.exit_program {
                return Err(RuntimeError::ExecutionFinished);
            }
            if result.has_error() {
                let description = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown execution error".to_string());
                self.state.call_stack.add_llm_message(LlmMessage::execution_result(
                    format!(
                        "Execution error: {description}. Fix the problem and continue \
                         from the last successful step."
                    ),
                ));
                instruction = self.continue_instruction();
                continue;
            }
            if result.playbook_finished {
                let mut value = result.return_value.clone().unwrap_or(Value::Null);
                // `Return("$name")` means: return that variable's value.
                if let Value::Str(s) = &value {
                    if let Some(stripped) = s.strip_prefix('$') {
                        if let Some(resolved) = self.state.variables.get(stripped) {
                            value = resolved.clone();
                        }
                    }
                }
                return Ok((true, value));
            }

            instruction = self.continue_instruction();
        }
    }

    /// One LLM call: stream chunks through the say-detector and the
    /// interpreter, checkpoint each executed statement, and collect the
    /// [`ExecutionResult`].
    async fn run_llm_call(&mut self, messages: &[LlmMessage]) -> Result<ExecutionResult> {
        // Resume path: consume the recorded response instead of calling
        // the LLM again.
        let (mut stream, skip) = match self.pending_resume.take() {
            Some((response, skip)) => {
                let chunks: Vec<crate::error::Result<String>> = vec![Ok(response)];
                (futures::stream::iter(chunks).boxed(), skip)
            }
            None => {
                let request = LlmRequest::new(&self.config.llm.model, messages);
                (self.llm.stream(request).await?, 0)
            }
        };

        let locals = self
            .state
            .call_stack
            .peek()
            .map(|f| f.locals.clone())
            .unwrap_or_default();
        let mut executor = StreamingExecutor::new(locals).with_skipped_statements(skip);
        let mut detector = SayStreamDetector::new();
        let mut stream_context = SayStreamContext::default();
        let mut result = ExecutionResult::new();
        let mut full_response = String::new();
        let mut failure: Option<InterpError> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            full_response.push_str(&chunk);

            // Mirror human-Say content to the stream observers first, so
            // the user sees it before the code executes.
            for event in detector.add_chunk(&chunk) {
                self.handle_say_stream_event(event, &mut stream_context).await?;
            }

            if failure.is_none() {
                let executed = {
                    let mut host = AgentHost {
                        agent: &mut *self,
                        result: &mut result,
                    };
                    match executor.add_chunk(&chunk, &mut host).await {
                        Ok(executed) => executed,
                        Err(error) => {
                            failure = Some(error);
                            Vec::new()
                        }
                    }
                };
                for statement in &executed {
                    self.state.bus().publish(Event::LineExecuted {
                        agent_id: self.id().to_string(),
                        text: statement.clone(),
                    });
                    self.maybe_checkpoint(statement, &executor, &full_response).await;
                }
            }
        }

        if failure.is_none() {
            let mut host = AgentHost {
                agent: &mut *self,
                result: &mut result,
            };
            if let Err(error) = executor.finalize(&mut host).await {
                failure = Some(error);
            }
        }

        self.state
            .call_stack
            .add_llm_message(LlmMessage::assistant_response(&full_response).cached());

        if let Some(error) = failure {
            match error {
                InterpError::ExecutionFinished => result.mark_exit_program(),
                InterpError::Syntax { .. } => result.record_syntax_error(error.to_string()),
                other => {
                    result.record_runtime_error(other.to_string(), executor.executed_code())
                }
            }
        }
        Ok(result)
    }

    fn continue_instruction(&self) -> String {
        let location = self
            .state
            .call_stack
            .peek()
            .map(|f| f.instruction_pointer.to_string())
            .unwrap_or_else(|| "the previous step".to_string());
        format!("{location} was executed - continue execution.")
    }

    // -- Post-execute --------------------------------------------------------

    /// Frame pop, logging, and large-result artifacting.
    async fn post_execute(
        &mut self,
        playbook: &Playbook,
        success: bool,
        result: Value,
    ) -> Result<(bool, Value)> {
        let _ = self.state.call_stack.pop();

        self.state.session_log.append(
            SessionLogItem::CallResult {
                playbook: playbook.name.clone(),
                result: result.repr(),
            },
            SessionLogLevel::Medium,
        );
        self.state.bus().publish(Event::PlaybookEnd {
            agent_id: self.id().to_string(),
            playbook: playbook.name.clone(),
            return_value: result.repr(),
            call_stack_depth: self.state.call_stack.depth(),
        });

        if !success {
            let reason = result.display_string();
            let reason = if reason.starts_with("ERROR:") {
                reason
            } else {
                format!("ERROR: {reason}")
            };
            self.state
                .call_stack
                .add_llm_message(LlmMessage::execution_result(reason.clone()));
            return Ok((false, Value::Str(reason)));
        }

        let rendered = result.display_string();
        if rendered.len() > self.config.artifact_result_threshold {
            let name = format!(
                "{}_{}_result_artifact",
                self.klass(),
                content_hash8(&rendered)
            );
            let summary = format!("Result of {}", playbook.name);
            self.state
                .artifacts
                .upsert(Artifact::new(&name, &summary, &rendered));
            self.state.variables.set(
                &name,
                Value::Artifact {
                    name: name.clone(),
                    summary: summary.clone(),
                },
            );
            self.state
                .call_stack
                .add_llm_message(LlmMessage::artifact_result(&name, &summary));
            return Ok((true, Value::Str(name)));
        }

        self.state
            .call_stack
            .add_llm_message(LlmMessage::execution_result(format!(
                "{} returned {}",
                playbook.name,
                result.repr()
            )));
        Ok((true, result))
    }

    // -- Checkpointing -------------------------------------------------------

    /// Per-statement checkpoint.  Failures are logged and ignored; the
    /// in-memory state stays authoritative until the next successful save.
    async fn maybe_checkpoint(
        &mut self,
        statement: &str,
        executor: &StreamingExecutor,
        full_response: &str,
    ) {
        let keep_last_n = self.config.durability.keep_last_n;
        let execution_state = self.state.to_checkpoint_json();
        let call_stack = self.state.call_stack.to_state_json();
        let namespace =
            serde_json::to_value(executor.locals()).unwrap_or(serde_json::Value::Null);
        let executed_code = executor.executed_code();

        let Some(manager) = &mut self.checkpoints else {
            return;
        };
        match manager
            .save_checkpoint(
                statement,
                namespace,
                execution_state,
                call_stack,
                Some(full_response),
                Some(&executed_code),
            )
            .await
        {
            Ok(_) => {
                if let Err(error) = manager.cleanup_old_checkpoints(keep_last_n).await {
                    tracing::debug!(%error, "checkpoint cleanup failed");
                }
            }
            Err(error) => {
                tracing::warn!(%error, "checkpoint save failed; continuing");
            }
        }
    }

    // -- Prompt inputs -------------------------------------------------------

    /// Compact self-description plus public playbook signatures.
    pub(crate) fn agent_information(&self) -> String {
        let signatures: Vec<String> = self
            .playbooks
            .values()
            .map(|p| format!("- {}", p.signature()))
            .collect();
        format!(
            "{}(agent {}): {}\nPlaybooks:\n{}",
            self.klass(),
            self.id(),
            self.description,
            signatures.join("\n")
        )
    }

    /// Available cross-playbook trigger lines.
    pub(crate) fn trigger_instructions(&self) -> Vec<String> {
        self.playbooks
            .values()
            .flat_map(|p| {
                p.triggers
                    .iter()
                    .map(move |t| format!("- {t} -> {}()", p.name))
            })
            .collect()
    }
}

fn render_call(name: &str, args: &[Value], kwargs: &[(String, Value)]) -> String {
    let mut parts: Vec<String> = args.iter().map(Value::repr).collect();
    parts.extend(
        kwargs
            .iter()
            .map(|(key, value)| format!("{key}={}", value.repr())),
    );
    format!("{name}({})", parts.join(", "))
}

// ---------------------------------------------------------------------------
// Capture host
// ---------------------------------------------------------------------------

/// The bridge between the interpreter and this agent: every capture
/// primitive and playbook call lands here.
pub(crate) struct AgentHost<'a> {
    pub agent: &'a mut AiAgent,
    pub result: &'a mut ExecutionResult,
}

fn host_error(error: RuntimeError) -> InterpError {
    match error {
        RuntimeError::ExecutionFinished => InterpError::ExecutionFinished,
        other => InterpError::Host {
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl CaptureHost for AgentHost<'_> {
    async fn step(&mut self, location: &str) -> playbooks_interp::Result<()> {
        let pointer = InstructionPointer::parse(location)
            .map_err(|e| InterpError::runtime(e.to_string()))?;
        if pointer.is_thinking() {
            self.result.is_thinking = true;
        }
        self.result.steps.push(pointer.clone());

        self.agent.state.session_log.append(
            SessionLogItem::Directive {
                text: location.to_string(),
            },
            SessionLogLevel::High,
        );
        self.agent.state.bus().publish(Event::StepExecuted {
            agent_id: self.agent.id().to_string(),
            step: pointer.to_string(),
            source_line_number: pointer.source_line_number,
        });
        self.agent.state.call_stack.advance_instruction_pointer(pointer);
        Ok(())
    }

    async fn say(&mut self, target: &str, message: &str) -> playbooks_interp::Result<()> {
        self.result
            .messages
            .push((target.to_string(), message.to_string()));
        self.agent
            .deliver_say(target, message)
            .await
            .map_err(host_error)
    }

    async fn var(&mut self, name: &str, value: Value) -> playbooks_interp::Result<()> {
        let threshold = self.agent.config.artifact_result_threshold;
        let stored = self.agent.state.set_variable(name, value, threshold);
        self.result
            .vars
            .insert(name.trim_start_matches('$').to_string(), stored);
        Ok(())
    }

    async fn save_artifact(
        &mut self,
        name: &str,
        summary: &str,
        content: &str,
    ) -> playbooks_interp::Result<()> {
        self.agent.state.save_artifact(name, summary, content);
        self.result
            .artifacts
            .push(name.trim_start_matches('$').to_string());
        Ok(())
    }

    async fn load_artifact(&mut self, name: &str) -> playbooks_interp::Result<Value> {
        let bare = name.trim_start_matches('$');
        let artifact = self
            .agent
            .state
            .artifacts
            .get(bare)
            .map_err(|e| InterpError::runtime(e.to_string()))?
            .clone();
        self.agent.state.call_stack.mark_artifact_loaded(bare);
        self.agent
            .state
            .call_stack
            .add_llm_message(LlmMessage::artifact_load(
                &artifact.name,
                &artifact.summary,
                &artifact.content,
            ));
        Ok(Value::Str(artifact.content))
    }

    async fn log_trigger(&mut self, code: &str) -> playbooks_interp::Result<()> {
        self.result.triggers.push(code.to_string());
        self.agent.state.session_log.append(
            SessionLogItem::Directive {
                text: format!("trigger: {code}"),
            },
            SessionLogLevel::Low,
        );
        Ok(())
    }

    async fn return_value(&mut self, value: Value) -> playbooks_interp::Result<()> {
        // `_` chains the previous return value; stored verbatim, never
        // artifact-converted (the caller's post-execute decides that).
        self.agent.state.variables.set("_", value.clone());
        self.result.mark_finished(Some(value));
        Ok(())
    }

    async fn yield_to(&mut self, target: &str) -> playbooks_interp::Result<()> {
        let lowered = target.to_lowercase();
        match lowered.as_str() {
            "user" | "human" => {
                self.result.mark_wait_for_user();
                self.agent
                    .wait_for_matching("human")
                    .await
                    .map_err(host_error)?;
                Ok(())
            }
            "exit" => {
                self.result.mark_exit_program();
                Err(InterpError::ExecutionFinished)
            }
            "return" => {
                self.result.mark_finished(None);
                Ok(())
            }
            _ => {
                let resolved = if let Some(spec) = target.strip_prefix("meeting ") {
                    let meeting_id = self
                        .agent
                        .resolve_meeting_spec(spec)
                        .map_err(host_error)?;
                    format!("meeting {meeting_id}")
                } else {
                    target.to_string()
                };
                self.result.mark_wait_for_agent(&resolved);
                self.agent
                    .wait_for_matching(&resolved)
                    .await
                    .map_err(host_error)?;
                Ok(())
            }
        }
    }

    async fn wait_for_message(&mut self, source: &str) -> playbooks_interp::Result<Value> {
        let message = self
            .agent
            .wait_for_matching(source)
            .await
            .map_err(host_error)?;
        Ok(Value::Str(message.content))
    }

    async fn call_playbook(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> playbooks_interp::Result<Value> {
        let (_success, result) = self
            .agent
            .execute_playbook(name, args, kwargs)
            .await
            .map_err(host_error)?;
        Ok(result)
    }

    fn is_agent_klass(&self, name: &str) -> bool {
        name != self.agent.klass() && self.agent.program.is_agent_klass(name)
    }

    fn is_playbook(&self, name: &str) -> bool {
        self.agent.playbooks.contains_key(name) || BUILTIN_PLAYBOOKS.contains(&name)
    }

    fn state_get(&self, path: &[&str]) -> Value {
        self.agent.state.variables.get_path(path)
    }

    async fn state_set(&mut self, path: &[&str], value: Value) -> playbooks_interp::Result<()> {
        match path {
            [] => Ok(()),
            [name] => {
                let threshold = self.agent.config.artifact_result_threshold;
                let stored = self.agent.state.set_variable(name, value, threshold);
                self.result.vars.insert((*name).to_string(), stored);
                Ok(())
            }
            _ => self
                .agent
                .state
                .variables
                .set_path(path, value)
                .map_err(|e| InterpError::runtime(e.to_string())),
        }
    }

    fn sync_locals(&mut self, locals: &BTreeMap<String, Value>) {
        if let Some(frame) = self.agent.state.call_stack.peek_mut() {
            frame.locals = locals.clone();
        }
    }
}
