//! Program lifecycle: agent registry, channels, meetings, routing.
//!
//! A [`Program`] owns everything shared between agents: the event bus, the
//! channel registry, the meetings registry, and the checkpoint
//! coordinator.  Agents themselves are single-writer state owned by their
//! tasks; the program holds only lightweight [`AgentHandle`]s (id, class,
//! inbox) for routing.
//!
//! `route_message` is the single entry point for delivering a message into
//! the core, from other agents and from external hosts alike.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use playbooks_checkpoint::{
    CheckpointProvider, FilesystemCheckpointProvider, ProgramCheckpointCoordinator, SessionMap,
};
use playbooks_kernel::{
    AsyncMessageQueue, Channel, DeliveryPreferences, Event, EventBus, KernelError, Meeting,
    Message, Participant, StreamObserver,
};

use crate::agent::AiAgent;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::llm::LlmChunkSource;
use crate::pbasm::{parse_pbasm, AgentKind, PbasmProgram};

/// First auto-assigned agent id (by convention).
const FIRST_AGENT_ID: u64 = 1000;
/// Reserved id for the default human.
const HUMAN_ID: &str = "human";

/// Routing-level view of one agent: id, class, inbox.
pub struct AgentHandle {
    pub id: String,
    pub klass: String,
    pub kind: AgentKind,
    pub inbox: Arc<AsyncMessageQueue>,
    /// Delivery preferences, for humans.
    pub preferences: Option<DeliveryPreferences>,
    /// Display name, for humans (used by targeted meeting filtering).
    pub display_name: Option<String>,
}

#[async_trait]
impl Participant for AgentHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn klass(&self) -> &str {
        &self.klass
    }

    async fn deliver(&self, message: Message) -> playbooks_kernel::Result<()> {
        // A closed inbox during shutdown is not a delivery failure.
        match self.inbox.put(message) {
            Ok(()) | Err(KernelError::QueueClosed) => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn delivery_preferences(&self) -> Option<DeliveryPreferences> {
        self.preferences.clone()
    }

    fn display_name(&self) -> Option<String> {
        self.display_name.clone()
    }
}

/// One program session.
pub struct Program {
    session_id: String,
    bus: EventBus,
    config: RuntimeConfig,
    source: PbasmProgram,
    handles: DashMap<String, Arc<AgentHandle>>,
    channels: DashMap<String, Arc<Channel>>,
    meetings: DashMap<String, Meeting>,
    next_agent_id: AtomicU64,
    next_meeting_id: AtomicU64,
    execution_finished: AtomicBool,
    llm: Arc<dyn LlmChunkSource>,
    checkpoint_provider: Option<Arc<dyn CheckpointProvider>>,
    coordinator: Mutex<Option<ProgramCheckpointCoordinator>>,
}

impl Program {
    /// Create a program from parsed PBASM.
    pub fn new(
        source: PbasmProgram,
        config: RuntimeConfig,
        llm: Arc<dyn LlmChunkSource>,
        session_id: impl Into<String>,
    ) -> Arc<Self> {
        let session_id = session_id.into();
        let checkpoint_provider: Option<Arc<dyn CheckpointProvider>> =
            if config.durability.enabled {
                Some(Arc::new(FilesystemCheckpointProvider::with_max_size_mb(
                    &config.durability.storage_path,
                    config.durability.max_checkpoint_size_mb,
                )))
            } else {
                None
            };
        let coordinator = checkpoint_provider
            .as_ref()
            .map(|provider| ProgramCheckpointCoordinator::new(&session_id, Arc::clone(provider)));

        Arc::new(Self {
            bus: EventBus::new(&session_id),
            config,
            source,
            handles: DashMap::new(),
            channels: DashMap::new(),
            meetings: DashMap::new(),
            next_agent_id: AtomicU64::new(FIRST_AGENT_ID),
            next_meeting_id: AtomicU64::new(1),
            execution_finished: AtomicBool::new(false),
            llm,
            checkpoint_provider,
            coordinator: Mutex::new(coordinator),
            session_id,
        })
    }

    /// Load PBASM files and create a run.  Records the session in the
    /// session map so `--resume` can find it later.
    pub async fn create_run(
        paths: &[String],
        config: RuntimeConfig,
        llm: Arc<dyn LlmChunkSource>,
        session_id: Option<String>,
    ) -> Result<(Arc<Self>, Vec<AiAgent>)> {
        let mut source_text = String::new();
        for path in paths {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| RuntimeError::load(format!("cannot read {path}: {e}")))?;
            source_text.push_str(&content);
            source_text.push('\n');
        }

        let session_id =
            session_id.unwrap_or_else(|| uuid::Uuid::now_v7().simple().to_string());
        if config.durability.enabled {
            let map = SessionMap::new(&config.durability.storage_path);
            map.save_session(paths, &session_id).await?;
        }

        let program = Self::from_source(&source_text, config, llm, session_id)?;
        let agents = program.initialize()?;
        Ok((program, agents))
    }

    /// Parse PBASM text and create a program.
    pub fn from_source(
        source: &str,
        config: RuntimeConfig,
        llm: Arc<dyn LlmChunkSource>,
        session_id: impl Into<String>,
    ) -> Result<Arc<Self>> {
        Ok(Self::new(parse_pbasm(source)?, config, llm, session_id))
    }

    /// The program's session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The program's event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The checkpoint provider, when durability is enabled.
    pub fn checkpoint_provider(&self) -> Option<Arc<dyn CheckpointProvider>> {
        self.checkpoint_provider.clone()
    }

    // -- Initialization -----------------------------------------------------

    /// Instantiate the agents declared in the source.
    ///
    /// Creates a default `User:Human` when no human was declared.  At
    /// least one AI agent must be declared.
    pub fn initialize(self: &Arc<Self>) -> Result<Vec<AiAgent>> {
        let mut ai_agents = Vec::new();
        let mut any_human = false;

        let declared_agents = self.source.agents.clone();
        for declared in &declared_agents {
            match declared.kind {
                AgentKind::Ai => {
                    let agent = self.spawn_ai_agent(&declared.klass, None)?;
                    ai_agents.push(agent);
                }
                AgentKind::Human => {
                    let id = if any_human {
                        self.next_agent_id.fetch_add(1, Ordering::SeqCst).to_string()
                    } else {
                        HUMAN_ID.to_string()
                    };
                    any_human = true;
                    self.register_handle(Arc::new(AgentHandle {
                        id,
                        klass: declared.klass.clone(),
                        kind: AgentKind::Human,
                        inbox: Arc::new(AsyncMessageQueue::with_capacity(
                            self.config.inbox_capacity,
                        )),
                        preferences: Some(DeliveryPreferences::streaming()),
                        display_name: Some(declared.klass.clone()),
                    }));
                }
                AgentKind::Mcp => {
                    tracing::warn!(
                        klass = %declared.klass,
                        "mcp agents are an external collaborator; section ignored"
                    );
                }
            }
        }

        if ai_agents.is_empty() {
            return Err(RuntimeError::load("program declares no AI agent"));
        }
        if !any_human {
            self.register_handle(Arc::new(AgentHandle {
                id: HUMAN_ID.to_string(),
                klass: "User".to_string(),
                kind: AgentKind::Human,
                inbox: Arc::new(AsyncMessageQueue::with_capacity(self.config.inbox_capacity)),
                preferences: Some(DeliveryPreferences::streaming()),
                display_name: Some("User".to_string()),
            }));
        }

        self.publish_agents_changed();
        Ok(ai_agents)
    }

    /// Create a runtime agent of a declared class (used by `CreateAgent`
    /// flows and restore).  Pass `id` to preserve a checkpointed identity.
    pub fn create_agent(self: &Arc<Self>, klass: &str, id: Option<String>) -> Result<AiAgent> {
        let agent = self.spawn_ai_agent(klass, id)?;
        self.publish_agents_changed();
        Ok(agent)
    }

    fn spawn_ai_agent(self: &Arc<Self>, klass: &str, id: Option<String>) -> Result<AiAgent> {
        let declared = self
            .source
            .agent(klass)
            .ok_or_else(|| RuntimeError::load(format!("agent class `{klass}` not declared")))?
            .clone();
        let id = id
            .unwrap_or_else(|| self.next_agent_id.fetch_add(1, Ordering::SeqCst).to_string());

        let handle = Arc::new(AgentHandle {
            id: id.clone(),
            klass: klass.to_string(),
            kind: AgentKind::Ai,
            inbox: Arc::new(AsyncMessageQueue::with_capacity(self.config.inbox_capacity)),
            preferences: None,
            display_name: None,
        });
        self.register_handle(Arc::clone(&handle));

        Ok(AiAgent::new(
            Arc::clone(self),
            handle,
            &declared,
            Arc::clone(&self.llm),
            self.config.clone(),
        ))
    }

    fn register_handle(&self, handle: Arc<AgentHandle>) {
        self.handles.insert(handle.id.clone(), handle);
    }

    fn publish_agents_changed(&self) {
        let mut agents: Vec<(String, String)> = self
            .handles
            .iter()
            .map(|entry| (entry.id.clone(), entry.klass.clone()))
            .collect();
        agents.sort();
        self.bus.publish(Event::AgentsChanged { agents });
    }

    // -- Lookup -------------------------------------------------------------

    /// Handle for an agent id.
    pub fn handle(&self, agent_id: &str) -> Result<Arc<AgentHandle>> {
        self.handles
            .get(agent_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RuntimeError::UnknownAgent {
                agent: agent_id.to_string(),
            })
    }

    /// All live agent handles.
    pub fn handles(&self) -> Vec<Arc<AgentHandle>> {
        self.handles
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// First agent id of `klass`, if any.
    pub fn agent_id_for_klass(&self, klass: &str) -> Option<String> {
        self.handles
            .iter()
            .filter(|entry| entry.klass == klass)
            .map(|entry| entry.id.clone())
            .min()
    }

    /// Whether `name` is a declared agent class.
    pub fn is_agent_klass(&self, name: &str) -> bool {
        self.source.agent(name).is_some()
    }

    /// The default human's id, if a human exists.
    pub fn default_human_id(&self) -> Option<String> {
        if self.handles.contains_key(HUMAN_ID) {
            return Some(HUMAN_ID.to_string());
        }
        self.handles
            .iter()
            .filter(|entry| entry.kind == AgentKind::Human)
            .map(|entry| entry.id.clone())
            .min()
    }

    /// Resolve a target spec: an id, a class name, or `user`/`human`.
    pub fn resolve_agent_id(&self, spec: &str) -> Option<String> {
        let lowered = spec.to_lowercase();
        if lowered == "user" || lowered == "human" {
            return self.default_human_id();
        }
        if self.handles.contains_key(spec) {
            return Some(spec.to_string());
        }
        self.agent_id_for_klass(spec)
    }

    /// Peer-class descriptions for prompts, excluding `exclude_klass`.
    pub fn other_agents_information(&self, exclude_klass: &str) -> Vec<String> {
        self.source
            .agents
            .iter()
            .filter(|a| a.klass != exclude_klass && a.kind == AgentKind::Ai)
            .map(|a| {
                let signatures: Vec<String> = a
                    .playbooks
                    .iter()
                    .map(|p| {
                        let parameters: Vec<String> =
                            p.parameters.iter().map(|x| format!("${x}")).collect();
                        format!("{}({})", p.name, parameters.join(", "))
                    })
                    .collect();
                format!(
                    "{}: {}\nPlaybooks: {}",
                    a.klass,
                    a.description,
                    signatures.join(", ")
                )
            })
            .collect()
    }

    // -- Channels & routing --------------------------------------------------

    /// The direct channel between two agents, created on first use.
    pub fn direct_channel(&self, a: &str, b: &str) -> Result<Arc<Channel>> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let channel_id = format!("direct:{first}:{second}");

        if let Some(channel) = self.channels.get(&channel_id) {
            return Ok(Arc::clone(channel.value()));
        }

        let participants: Vec<Arc<dyn Participant>> =
            vec![self.handle(first)?, self.handle(second)?];
        let channel = Arc::new(Channel::new(&channel_id, participants, self.bus.clone()));
        self.channels.insert(channel_id, Arc::clone(&channel));
        Ok(channel)
    }

    /// The channel of a meeting.
    pub fn meeting_channel(&self, meeting_id: &str) -> Result<Arc<Channel>> {
        let channel_id = format!("meeting:{meeting_id}");
        self.channels
            .get(&channel_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                KernelError::MeetingNotFound {
                    meeting_id: meeting_id.to_string(),
                }
                .into()
            })
    }

    /// Deliver a message into the core.
    ///
    /// With `meeting_id` set, the message fans out on the meeting channel;
    /// otherwise it goes over the direct channel between the two agents.
    pub async fn route_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        meeting_id: Option<&str>,
    ) -> Result<()> {
        let sender = self.handle(sender_id)?;

        if let Some(meeting_id) = meeting_id {
            let channel = self.meeting_channel(meeting_id)?;
            let message =
                Message::meeting_broadcast(sender_id, &sender.klass, meeting_id, content);
            channel.send(message, sender_id).await?;
            return Ok(());
        }

        let recipient = self.handle(recipient_id)?;
        let channel = self.direct_channel(sender_id, recipient_id)?;
        let message = Message::direct(
            sender_id,
            &sender.klass,
            recipient_id,
            &recipient.klass,
            content,
        );
        channel.send(message, sender_id).await?;
        Ok(())
    }

    /// Deliver a runtime-internal control message directly to an inbox.
    pub async fn send_builtin(
        &self,
        sender_id: &str,
        sender_klass: &str,
        recipient_id: &str,
        content: &str,
    ) -> Result<()> {
        let recipient = self.handle(recipient_id)?;
        recipient
            .deliver(Message::builtin(sender_id, sender_klass, recipient_id, content))
            .await?;
        Ok(())
    }

    /// Subscribe a stream observer to every channel that involves the
    /// default human (pre-creating the direct channels).
    pub fn observe_human_streams(&self, observer: Arc<dyn StreamObserver>) -> Result<()> {
        let Some(human_id) = self.default_human_id() else {
            return Ok(());
        };
        for handle in self.handles() {
            if handle.kind == AgentKind::Ai {
                let channel = self.direct_channel(&handle.id, &human_id)?;
                channel.add_stream_observer(Arc::clone(&observer));
            }
        }
        Ok(())
    }

    // -- Meetings -------------------------------------------------------------

    /// Create a meeting owned by `owner_id` and invite `attendee_specs`
    /// (ids or class names).  Returns the meeting id.
    pub async fn create_meeting(
        &self,
        owner_id: &str,
        owner_klass: &str,
        topic: &str,
        attendee_specs: &[String],
    ) -> Result<String> {
        let meeting_id = format!(
            "m-{}",
            self.next_meeting_id.fetch_add(1, Ordering::SeqCst)
        );
        let meeting = Meeting::new(&meeting_id, owner_id, owner_klass, topic);

        let channel_id = format!("meeting:{meeting_id}");
        let participants: Vec<Arc<dyn Participant>> = vec![self.handle(owner_id)?];
        let channel = Arc::new(Channel::new(&channel_id, participants, self.bus.clone()));
        self.channels.insert(channel_id, channel);
        self.meetings.insert(meeting_id.clone(), meeting);

        self.bus.publish(Event::MeetingCreated {
            meeting_id: meeting_id.clone(),
            owner_id: owner_id.to_string(),
            topic: topic.to_string(),
        });

        for spec in attendee_specs {
            self.invite_to_meeting(&meeting_id, owner_id, owner_klass, spec)
                .await?;
        }

        Ok(meeting_id)
    }

    /// Invite one attendee (id or class name) to a meeting.
    ///
    /// Humans join immediately (their handle is added to the channel); AI
    /// agents receive a `meeting_invite` control message and record the
    /// membership on their own task.
    pub async fn invite_to_meeting(
        &self,
        meeting_id: &str,
        inviter_id: &str,
        inviter_klass: &str,
        attendee_spec: &str,
    ) -> Result<()> {
        let attendee_id = self.resolve_agent_id(attendee_spec).ok_or_else(|| {
            RuntimeError::UnknownAgent {
                agent: attendee_spec.to_string(),
            }
        })?;
        let attendee = self.handle(&attendee_id)?;

        self.join_meeting(meeting_id, &attendee_id)?;

        if attendee.kind == AgentKind::Ai {
            let payload = serde_json::json!({
                "type": "meeting_invite",
                "meeting_id": meeting_id,
            });
            self.send_builtin(inviter_id, inviter_klass, &attendee_id, &payload.to_string())
                .await?;
        }
        Ok(())
    }

    /// Record a join: meeting registry + channel membership + event.
    pub fn join_meeting(&self, meeting_id: &str, agent_id: &str) -> Result<()> {
        let handle = self.handle(agent_id)?;
        {
            let mut meeting =
                self.meetings
                    .get_mut(meeting_id)
                    .ok_or_else(|| KernelError::MeetingNotFound {
                        meeting_id: meeting_id.to_string(),
                    })?;
            meeting.join(agent_id, &handle.klass);
        }
        let channel = self.meeting_channel(meeting_id)?;
        channel.add_participant(handle);
        self.bus.publish(Event::MeetingJoined {
            meeting_id: meeting_id.to_string(),
            agent_id: agent_id.to_string(),
        });
        Ok(())
    }

    /// Snapshot of a meeting.
    pub fn meeting(&self, meeting_id: &str) -> Option<Meeting> {
        self.meetings.get(meeting_id).map(|m| m.clone())
    }

    // -- Lifecycle -------------------------------------------------------------

    /// Run every AI agent's main loop until all finish or the program is
    /// exited via `Yield("exit")`.
    pub async fn begin(self: &Arc<Self>, agents: Vec<AiAgent>) -> Result<()> {
        let mut tasks = tokio::task::JoinSet::new();
        for agent in agents {
            tasks.spawn(agent.run());
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(%error, "agent loop failed");
                }
                Err(join_error) if join_error.is_cancelled() => {}
                Err(join_error) => {
                    tracing::error!(%join_error, "agent task panicked");
                }
            }
        }
        Ok(())
    }

    /// Whether the program has finished.
    pub fn is_finished(&self) -> bool {
        self.execution_finished.load(Ordering::SeqCst)
    }

    /// Terminate all agents: close every inbox so pending waits drain.
    pub fn finish(&self) {
        if self.execution_finished.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(session_id = %self.session_id, "program finished");
        for handle in self.handles() {
            handle.inbox.close();
        }
    }

    // -- Durability -------------------------------------------------------------

    /// Write a program-level checkpoint.  No-op when durability is off.
    pub async fn save_program_checkpoint(&self) -> Result<Option<String>> {
        let mut coordinator = {
            let mut guard = self.coordinator.lock().expect("coordinator lock poisoned");
            match guard.take() {
                Some(c) => c,
                None => return Ok(None),
            }
        };
        let agent_ids: Vec<String> = self
            .handles()
            .iter()
            .filter(|h| h.kind == AgentKind::Ai)
            .map(|h| h.id.clone())
            .collect();
        let result = coordinator.save_program_checkpoint(&agent_ids).await;
        *self.coordinator.lock().expect("coordinator lock poisoned") = Some(coordinator);
        Ok(Some(result?))
    }

    /// Restore every agent of this session from its latest checkpoint.
    ///
    /// Agents missing from `agents` are reconstructed from their recorded
    /// class.  Returns `(restored, total)`; restoring at least one agent
    /// counts as success.
    pub async fn restore(self: &Arc<Self>, agents: &mut Vec<AiAgent>) -> Result<(usize, usize)> {
        let plan = {
            let mut coordinator = {
                let mut guard = self.coordinator.lock().expect("coordinator lock poisoned");
                match guard.take() {
                    Some(c) => c,
                    None => return Ok((0, 0)),
                }
            };
            let plan = coordinator.plan_restore().await;
            *self.coordinator.lock().expect("coordinator lock poisoned") = Some(coordinator);
            plan?
        };
        let Some(plan) = plan else {
            return Ok((0, 0));
        };

        let total = plan.agent_checkpoints.len();
        let mut restored = 0;

        for (agent_id, checkpoint_id) in &plan.agent_checkpoints {
            let provider = self
                .checkpoint_provider
                .as_ref()
                .expect("restore plan implies a provider");
            let Some(data) = provider.load_checkpoint(checkpoint_id).await? else {
                tracing::error!(checkpoint_id, "agent checkpoint vanished; skipping");
                continue;
            };

            // Reconstruct missing agents from their recorded class.
            if !agents.iter().any(|a| a.id() == agent_id) {
                let Some(klass) =
                    playbooks_checkpoint::coordinator::agent_klass_from_checkpoint(
                        &data, agent_id,
                    )
                else {
                    tracing::error!(agent_id, "cannot determine klass; skipping");
                    continue;
                };
                match self.create_agent(&klass, Some(agent_id.clone())) {
                    Ok(agent) => agents.push(agent),
                    Err(error) => {
                        tracing::error!(agent_id, %error, "cannot recreate agent");
                        continue;
                    }
                }
            }

            let agent = agents
                .iter_mut()
                .find(|a| a.id() == agent_id)
                .expect("just ensured");
            agent.restore_from_checkpoint(&data);
            restored += 1;
        }

        tracing::info!(restored, total, "program restore complete");
        Ok((restored, total))
    }
}
