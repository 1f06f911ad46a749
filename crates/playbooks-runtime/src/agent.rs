//! AI agents.
//!
//! An [`AiAgent`] owns its [`ExecutionState`] exclusively and runs a main
//! loop on its own task: wait for a message, select a playbook, dispatch,
//! post-execute.  Cross-agent calls, meeting invites, and human messages
//! all arrive through the same inbox; selective receive keeps unrelated
//! messages queued while the agent waits for a specific reply.
//!
//! Humans have no loop: they exist as kernel participants with delivery
//! preferences, and external hosts observe their messages and streams.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use playbooks_checkpoint::coordinator::in_flight_llm_call;
use playbooks_checkpoint::provider::parse_checkpoint_id;
use playbooks_checkpoint::{CheckpointData, CheckpointManager};
use playbooks_interp::say_stream::SayStreamEvent;
use playbooks_kernel::{Message, MessageType};
use playbooks_state::{
    AgentSummary, ExecutionState, LlmMessage, SessionLogItem, SessionLogLevel, Value,
};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::llm::LlmChunkSource;
use crate::pbasm::PbasmAgent;
use crate::playbook::Playbook;
use crate::program::{AgentHandle, Program};

/// An AI agent: execution state, playbooks, inbox, and the LLM loop.
pub struct AiAgent {
    pub(crate) handle: Arc<AgentHandle>,
    pub(crate) program: Arc<Program>,
    pub(crate) state: ExecutionState,
    pub(crate) playbooks: BTreeMap<String, Playbook>,
    pub(crate) description: String,
    pub(crate) llm: Arc<dyn LlmChunkSource>,
    pub(crate) config: RuntimeConfig,
    pub(crate) checkpoints: Option<CheckpointManager>,
    /// Monotonic counter of LLM calls; gates I/P-frame emission.
    pub(crate) execution_counter: u64,
    /// Messages already streamed by the raw-stream detector, awaiting
    /// their `Say` execution (exactly-once delivery).
    pub(crate) streamed_says: VecDeque<String>,
    /// Recorded in-flight LLM call to resume instead of re-querying:
    /// `(llm_response, statements_already_executed)`.
    pub(crate) pending_resume: Option<(String, usize)>,
}

/// Live streaming context for one detected `Say`.
#[derive(Default)]
pub(crate) struct SayStreamContext {
    pub stream_id: Option<String>,
    pub content: String,
}

impl AiAgent {
    /// Build an agent from its declaration.
    pub fn new(
        program: Arc<Program>,
        handle: Arc<AgentHandle>,
        declared: &PbasmAgent,
        llm: Arc<dyn LlmChunkSource>,
        config: RuntimeConfig,
    ) -> Self {
        let mut state = ExecutionState::new(
            program.bus().clone(),
            handle.klass.clone(),
            handle.id.clone(),
        );
        state.agents = program
            .handles()
            .iter()
            .map(|h| AgentSummary {
                id: h.id.clone(),
                klass: h.klass.clone(),
            })
            .collect();
        state.agents.sort_by(|a, b| a.id.cmp(&b.id));

        let playbooks = declared
            .playbooks
            .iter()
            .map(|p| (p.name.clone(), Playbook::from_pbasm(p)))
            .collect();

        let checkpoints = program
            .checkpoint_provider()
            .map(|provider| CheckpointManager::new(&handle.id, provider));

        Self {
            state,
            playbooks,
            description: declared.description.clone(),
            llm,
            config,
            checkpoints,
            execution_counter: 0,
            streamed_says: VecDeque::new(),
            pending_resume: None,
            program,
            handle,
        }
    }

    /// Stable agent id.
    pub fn id(&self) -> &str {
        &self.handle.id
    }

    /// Agent class name.
    pub fn klass(&self) -> &str {
        &self.handle.klass
    }

    /// Read-only view of the agent's state (tests and diagnostics; live
    /// observation goes through the event bus).
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// The agent's main loop.  Returns when the program finishes or the
    /// inbox closes.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(agent_id = %self.id(), klass = %self.klass(), "agent started");
        let outcome = self.run_inner().await;
        match outcome {
            Err(RuntimeError::ExecutionFinished) => {
                self.program.finish();
                Ok(())
            }
            other => other,
        }
    }

    async fn run_inner(&mut self) -> Result<()> {
        if !self.state.call_stack.is_empty() {
            // Restored mid-playbook: pick up where the checkpoint left off.
            self.resume_current_playbook().await?;
        } else if let Some(name) = self.begin_playbook_name() {
            let (_, _) = self.execute_playbook(&name, Vec::new(), Vec::new()).await?;
            self.checkpoint_program().await;
        }

        loop {
            if self.program.is_finished() {
                return Ok(());
            }
            let message = match self.handle.inbox.get().await {
                Ok(message) => message,
                Err(_) => return Ok(()),
            };
            self.handle_message(message).await?;
        }
    }

    /// The playbook triggered at program start, if any.
    fn begin_playbook_name(&self) -> Option<String> {
        self.playbooks
            .values()
            .find(|p| p.is_begin_playbook())
            .map(|p| p.name.clone())
    }

    /// The playbook to run for an unsolicited incoming message.
    fn select_message_playbook(&self) -> Option<String> {
        self.playbooks
            .values()
            .find(|p| {
                p.triggers
                    .iter()
                    .any(|t| t.contains(":MSG") || t.to_lowercase().contains("message"))
            })
            .or_else(|| {
                self.playbooks
                    .values()
                    .find(|p| p.code.is_none())
            })
            .map(|p| p.name.clone())
    }

    async fn handle_message(&mut self, message: Message) -> Result<()> {
        match message.message_type {
            MessageType::Builtin => self.handle_builtin_message(message).await,
            MessageType::Direct | MessageType::MeetingBroadcast => {
                self.state.call_stack.add_llm_message(LlmMessage::agent_communication(
                    format!(
                        "{}(agent {}): {}",
                        message.sender_klass, message.sender_id, message.content
                    ),
                ));
                self.state.session_log.append(
                    SessionLogItem::Message {
                        text: format!("received: {}", message.content),
                    },
                    SessionLogLevel::Medium,
                );

                if let Some(name) = self.select_message_playbook() {
                    let (_, _) = self.execute_playbook(&name, Vec::new(), Vec::new()).await?;
                    self.checkpoint_program().await;
                } else {
                    tracing::debug!(agent_id = %self.id(), "no playbook for incoming message");
                }
                Ok(())
            }
        }
    }

    async fn handle_builtin_message(&mut self, message: Message) -> Result<()> {
        let payload: serde_json::Value = match serde_json::from_str(&message.content) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, "unparseable builtin message");
                return Ok(());
            }
        };

        match payload["type"].as_str() {
            Some("execute_playbook") => {
                let call_id = payload["call_id"].as_str().unwrap_or_default().to_string();
                let playbook = payload["playbook"].as_str().unwrap_or_default().to_string();
                let args: Vec<Value> =
                    serde_json::from_value(payload["args"].clone()).unwrap_or_default();
                let kwargs: Vec<(String, Value)> =
                    serde_json::from_value(payload["kwargs"].clone()).unwrap_or_default();

                let (success, result) = self.execute_playbook(&playbook, args, kwargs).await?;
                self.checkpoint_program().await;

                let reply = serde_json::json!({
                    "type": "playbook_result",
                    "call_id": call_id,
                    "success": success,
                    "result": serde_json::to_value(&result).unwrap_or_default(),
                });
                self.program
                    .send_builtin(self.id(), self.klass(), &message.sender_id, &reply.to_string())
                    .await?;
                Ok(())
            }
            Some("meeting_invite") => {
                if let Some(meeting_id) = payload["meeting_id"].as_str() {
                    if !self.state.joined_meetings.iter().any(|m| m == meeting_id) {
                        self.state.joined_meetings.push(meeting_id.to_string());
                    }
                }
                Ok(())
            }
            other => {
                tracing::warn!(kind = ?other, "unknown builtin message type");
                Ok(())
            }
        }
    }

    // -- Message waits -------------------------------------------------------

    /// Block until a message matching `source` arrives; records it as an
    /// agent-communication message for the next prompt.
    ///
    /// `source` is `"human"`/`"user"`, an agent id, or `"meeting <id>"`.
    pub(crate) async fn wait_for_matching(&mut self, source: &str) -> Result<Message> {
        let lowered = source.to_lowercase();
        let meeting = source.strip_prefix("meeting ").map(str::to_string);
        let human_ids: Vec<String> = self
            .program
            .handles()
            .iter()
            .filter(|h| h.kind == crate::pbasm::AgentKind::Human)
            .map(|h| h.id.clone())
            .collect();

        let received = self
            .handle
            .inbox
            .get_where(
                |m| {
                    if m.message_type == MessageType::Builtin {
                        return false;
                    }
                    if let Some(meeting_id) = &meeting {
                        return m.meeting_id.as_deref() == Some(meeting_id.as_str());
                    }
                    if lowered == "human" || lowered == "user" {
                        return human_ids.iter().any(|id| *id == m.sender_id);
                    }
                    m.sender_id == source
                },
                None,
            )
            .await
            .map_err(|_| RuntimeError::ExecutionFinished)?;

        self.state.call_stack.add_llm_message(LlmMessage::agent_communication(
            format!(
                "{}(agent {}): {}",
                received.sender_klass, received.sender_id, received.content
            ),
        ));
        self.state.session_log.append(
            SessionLogItem::Message {
                text: format!("received from {}: {}", received.sender_id, received.content),
            },
            SessionLogLevel::Medium,
        );
        Ok(received)
    }

    // -- Say delivery --------------------------------------------------------

    /// Deliver a `Say`.  Human-addressed messages that were already
    /// streamed by the detector are suppressed here (exactly-once).
    pub(crate) async fn deliver_say(&mut self, target: &str, message: &str) -> Result<()> {
        self.state.session_log.append(
            SessionLogItem::Directive {
                text: format!("Say({target}): {message}"),
            },
            SessionLogLevel::Medium,
        );

        let lowered = target.to_lowercase();
        if lowered == "user" || lowered == "human" {
            if self.streamed_says.front().map(String::as_str) == Some(message) {
                // The detector already streamed and delivered this message.
                self.streamed_says.pop_front();
                return Ok(());
            }
            let human_id = self
                .program
                .default_human_id()
                .ok_or_else(|| RuntimeError::UnknownAgent {
                    agent: "human".to_string(),
                })?;
            let channel = self.program.direct_channel(self.id(), &human_id)?;
            let message =
                Message::direct(self.id(), self.klass(), &human_id, "Human", message);
            channel.send(message, self.id()).await?;
            return Ok(());
        }

        if let Some(spec) = target.strip_prefix("meeting ") {
            let meeting_id = self.resolve_meeting_spec(spec)?;
            let channel = self.program.meeting_channel(&meeting_id)?;
            let broadcast =
                Message::meeting_broadcast(self.id(), self.klass(), &meeting_id, message);
            channel.send(broadcast, self.id()).await?;
            return Ok(());
        }

        let target_id = self
            .program
            .resolve_agent_id(target)
            .ok_or_else(|| RuntimeError::UnknownAgent {
                agent: target.to_string(),
            })?;
        let channel = self.program.direct_channel(self.id(), &target_id)?;
        let target_klass = self.program.handle(&target_id)?.klass.clone();
        let direct = Message::direct(self.id(), self.klass(), &target_id, &target_klass, message);
        channel.send(direct, self.id()).await?;
        Ok(())
    }

    /// Resolve a meeting spec (`"current"` or an id) to a meeting id.
    pub(crate) fn resolve_meeting_spec(&self, spec: &str) -> Result<String> {
        if spec != "current" {
            return Ok(spec.to_string());
        }
        self.state
            .call_stack
            .peek()
            .and_then(|frame| frame.meeting_id.clone())
            .or_else(|| self.state.owned_meetings.last().cloned())
            .or_else(|| self.state.joined_meetings.last().cloned())
            .ok_or_else(|| RuntimeError::llm("no current meeting in this context"))
    }

    // -- Streaming Say -------------------------------------------------------

    /// Mirror raw-stream `Say` detection onto the human channel.
    pub(crate) async fn handle_say_stream_event(
        &mut self,
        event: SayStreamEvent,
        context: &mut SayStreamContext,
    ) -> Result<()> {
        let Some(human_id) = self.program.default_human_id() else {
            return Ok(());
        };
        let channel = self.program.direct_channel(self.id(), &human_id)?;

        match event {
            SayStreamEvent::Start => {
                let stream_id = uuid::Uuid::now_v7().simple().to_string();
                channel.start_stream(
                    &stream_id,
                    self.id(),
                    Some(self.klass().to_string()),
                    Some("user".to_string()),
                    Some(human_id),
                    Some("Human".to_string()),
                );
                context.stream_id = Some(stream_id);
                context.content.clear();
            }
            SayStreamEvent::Content(text) => {
                if let Some(stream_id) = &context.stream_id {
                    channel.stream_chunk(stream_id, &text)?;
                    context.content.push_str(&text);
                }
            }
            SayStreamEvent::End => {
                if let Some(stream_id) = context.stream_id.take() {
                    let content = std::mem::take(&mut context.content);
                    let final_message = Message::direct(
                        self.id(),
                        self.klass(),
                        &human_id,
                        "Human",
                        &content,
                    );
                    channel.complete_stream(&stream_id, final_message).await?;
                    self.streamed_says.push_back(content);
                }
            }
        }
        Ok(())
    }

    // -- Durability ----------------------------------------------------------

    /// Rebuild this agent's state from a checkpoint.
    pub fn restore_from_checkpoint(&mut self, data: &CheckpointData) {
        self.state.restore_from_checkpoint(&data.execution_state);

        if let Some(manager) = &mut self.checkpoints {
            if let Some((_, counter)) = parse_checkpoint_id(&data.checkpoint_id) {
                manager.set_counter(counter);
            }
        }

        if let Some((response, executed_code)) = in_flight_llm_call(data) {
            let skip = crate::dispatch::count_statements(&executed_code);
            self.pending_resume = Some((response, skip));
        }

        tracing::info!(
            agent_id = %self.id(),
            checkpoint_id = %data.checkpoint_id,
            "agent state restored"
        );
    }

    /// Write a program-level checkpoint if durability is on.
    pub(crate) async fn checkpoint_program(&self) {
        if let Err(error) = self.program.save_program_checkpoint().await {
            tracing::warn!(%error, "program checkpoint failed; continuing");
        }
    }
}
