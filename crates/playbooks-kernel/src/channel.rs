//! Delivery channels.
//!
//! A [`Channel`] is the destination of a send: a set of participants plus
//! observer lists.  Two shapes exist -- direct (2 participants) and meeting
//! (N participants) -- but the channel itself is shape-agnostic; meeting
//! fan-out falls out of "deliver to every non-sender participant".
//!
//! Channels also carry the *streaming* path: a `Say` addressed to a human
//! is streamed through [`StreamObserver`]s while the LLM is still writing
//! it, then delivered as a normal message on completion.  Stream events for
//! one stream id are totally ordered: start, then chunks in call order,
//! then exactly one complete.
//!
//! Observer filtering: stream events carry a `recipient_id`; an observer
//! with `target_human_id = X` sees an event only when `recipient_id` is `X`
//! or absent.  Meeting streams are additionally gated by each human's
//! [`DeliveryPreferences`] -- `Targeted` humans see a meeting stream only
//! once it names them, at which point the withheld prefix is replayed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::bus::EventBus;
use crate::delivery::{DeliveryPreferences, MeetingNotifications};
use crate::error::{KernelError, Result};
use crate::event::Event;
use crate::message::Message;

/// A member of a channel that can receive messages.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Stable agent id.
    fn id(&self) -> &str;

    /// Agent class name.
    fn klass(&self) -> &str;

    /// Deliver a message to this participant.
    ///
    /// AI agents push into their inbox; humans may be no-ops here, with
    /// external hosts observing messages and streams instead.
    async fn deliver(&self, message: Message) -> Result<()>;

    /// Delivery preferences, for human participants.
    fn delivery_preferences(&self) -> Option<DeliveryPreferences> {
        None
    }

    /// Display name, for human participants (used by targeted meeting
    /// notification matching).
    fn display_name(&self) -> Option<String> {
        None
    }
}

/// Observer of every message sent on a channel.
pub trait MessageObserver: Send + Sync {
    /// Stable observer id; duplicate subscriptions with the same id are
    /// ignored.
    fn id(&self) -> &str;

    /// Called for each message, in subscription order.
    fn on_message(&self, message: &Message);
}

/// A streaming event surfaced to [`StreamObserver`]s.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A stream began.
    Start {
        stream_id: String,
        sender_id: String,
        sender_klass: Option<String>,
        /// The raw target the sender addressed (e.g. `"user"`,
        /// `"meeting m-1"`).
        receiver_spec: Option<String>,
        recipient_id: Option<String>,
        recipient_klass: Option<String>,
    },
    /// Incremental content.
    Chunk { stream_id: String, content: String },
    /// The stream finished; the final message follows via normal delivery.
    Complete { stream_id: String },
}

impl StreamEvent {
    /// The stream this event belongs to.
    pub fn stream_id(&self) -> &str {
        match self {
            StreamEvent::Start { stream_id, .. }
            | StreamEvent::Chunk { stream_id, .. }
            | StreamEvent::Complete { stream_id } => stream_id,
        }
    }
}

/// Observer of streaming `Say` output on a channel.
pub trait StreamObserver: Send + Sync {
    /// Stable observer id; duplicate subscriptions with the same id are
    /// ignored.
    fn id(&self) -> &str;

    /// When set, only streams addressed to this human (or to no one in
    /// particular) are surfaced.
    fn target_human_id(&self) -> Option<String> {
        None
    }

    /// Preferences used to gate meeting streams.
    fn delivery_preferences(&self) -> Option<DeliveryPreferences> {
        None
    }

    /// Display name used for `Targeted` meeting-notification matching.
    fn human_name(&self) -> Option<String> {
        None
    }

    /// Called for each stream event, in subscription order.
    fn on_stream_event(&self, event: &StreamEvent);
}

/// Per-observer gate state for one active stream.
enum ObserverGate {
    /// Events flow through.
    Active,
    /// Events are suppressed for the stream's whole lifetime.
    Blocked,
    /// Targeted meeting stream: content is withheld until it names the
    /// observer's human, then replayed.
    Pending { withheld: String },
}

struct StreamState {
    sender_id: String,
    sender_klass: Option<String>,
    receiver_spec: Option<String>,
    recipient_id: Option<String>,
    recipient_klass: Option<String>,
    /// observer id -> gate.
    gates: HashMap<String, ObserverGate>,
}

/// A set of participants plus message and stream observers.
pub struct Channel {
    channel_id: String,
    bus: EventBus,
    participants: Mutex<Vec<Arc<dyn Participant>>>,
    message_observers: Mutex<Vec<Arc<dyn MessageObserver>>>,
    stream_observers: Mutex<Vec<Arc<dyn StreamObserver>>>,
    active_streams: Mutex<HashMap<String, StreamState>>,
}

impl Channel {
    /// Create a channel with an initial participant set.
    pub fn new(
        channel_id: impl Into<String>,
        participants: Vec<Arc<dyn Participant>>,
        bus: EventBus,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            bus,
            participants: Mutex::new(participants),
            message_observers: Mutex::new(Vec::new()),
            stream_observers: Mutex::new(Vec::new()),
            active_streams: Mutex::new(HashMap::new()),
        }
    }

    /// The channel's id.
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    // -- Participant management ---------------------------------------------

    /// Add a participant.  Adding an id twice is a no-op.
    pub fn add_participant(&self, participant: Arc<dyn Participant>) {
        let mut participants = self.participants.lock().expect("channel lock poisoned");
        if participants.iter().any(|p| p.id() == participant.id()) {
            return;
        }
        participants.push(participant);
    }

    /// Remove a participant by id.
    pub fn remove_participant(&self, participant_id: &str) {
        let mut participants = self.participants.lock().expect("channel lock poisoned");
        participants.retain(|p| p.id() != participant_id);
    }

    /// Look up a participant by id.
    pub fn get_participant(&self, participant_id: &str) -> Result<Arc<dyn Participant>> {
        let participants = self.participants.lock().expect("channel lock poisoned");
        participants
            .iter()
            .find(|p| p.id() == participant_id)
            .cloned()
            .ok_or_else(|| KernelError::ParticipantNotFound {
                channel_id: self.channel_id.clone(),
                participant_id: participant_id.to_string(),
            })
    }

    /// Ids of all current participants.
    pub fn participant_ids(&self) -> Vec<String> {
        let participants = self.participants.lock().expect("channel lock poisoned");
        participants.iter().map(|p| p.id().to_string()).collect()
    }

    // -- Observer management ------------------------------------------------

    /// Subscribe a message observer.  Duplicate ids are ignored.
    pub fn add_message_observer(&self, observer: Arc<dyn MessageObserver>) {
        let mut observers = self.message_observers.lock().expect("channel lock poisoned");
        if observers.iter().any(|o| o.id() == observer.id()) {
            return;
        }
        observers.push(observer);
    }

    /// Unsubscribe a message observer by id.
    pub fn remove_message_observer(&self, observer_id: &str) {
        let mut observers = self.message_observers.lock().expect("channel lock poisoned");
        observers.retain(|o| o.id() != observer_id);
    }

    /// Subscribe a stream observer.  Duplicate ids are ignored.
    pub fn add_stream_observer(&self, observer: Arc<dyn StreamObserver>) {
        let mut observers = self.stream_observers.lock().expect("channel lock poisoned");
        if observers.iter().any(|o| o.id() == observer.id()) {
            return;
        }
        observers.push(observer);
    }

    /// Unsubscribe a stream observer by id.
    pub fn remove_stream_observer(&self, observer_id: &str) {
        let mut observers = self.stream_observers.lock().expect("channel lock poisoned");
        observers.retain(|o| o.id() != observer_id);
    }

    // -- Message delivery ---------------------------------------------------

    /// Deliver `message` to every participant other than the sender and
    /// notify every message observer.
    pub async fn send(&self, message: Message, sender_id: &str) -> Result<()> {
        let recipients: Vec<Arc<dyn Participant>> = {
            let participants = self.participants.lock().expect("channel lock poisoned");
            participants
                .iter()
                .filter(|p| p.id() != sender_id)
                .cloned()
                .collect()
        };

        for participant in recipients {
            participant.deliver(message.clone()).await?;
        }

        let observers: Vec<Arc<dyn MessageObserver>> = {
            let observers = self.message_observers.lock().expect("channel lock poisoned");
            observers.clone()
        };
        for observer in observers {
            observer.on_message(&message);
        }

        self.bus.publish(Event::MessageSent {
            sender_id: message.sender_id.clone(),
            recipient_id: message.recipient_id.clone(),
            meeting_id: message.meeting_id.clone(),
            content: message.content.clone(),
        });

        Ok(())
    }

    // -- Streaming ----------------------------------------------------------

    /// Begin a stream and emit [`StreamEvent::Start`] to every observer
    /// whose gate admits it.
    #[allow(clippy::too_many_arguments)]
    pub fn start_stream(
        &self,
        stream_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_klass: Option<String>,
        receiver_spec: Option<String>,
        recipient_id: Option<String>,
        recipient_klass: Option<String>,
    ) -> String {
        let stream_id = stream_id.into();
        let sender_id = sender_id.into();
        let is_meeting = receiver_spec
            .as_deref()
            .is_some_and(|spec| spec.starts_with("meeting"));

        let observers: Vec<Arc<dyn StreamObserver>> = {
            let observers = self.stream_observers.lock().expect("channel lock poisoned");
            observers.clone()
        };

        let mut gates = HashMap::new();
        for observer in &observers {
            gates.insert(
                observer.id().to_string(),
                evaluate_gate(observer.as_ref(), recipient_id.as_deref(), is_meeting),
            );
        }

        let start = StreamEvent::Start {
            stream_id: stream_id.clone(),
            sender_id: sender_id.clone(),
            sender_klass: sender_klass.clone(),
            receiver_spec: receiver_spec.clone(),
            recipient_id: recipient_id.clone(),
            recipient_klass: recipient_klass.clone(),
        };
        for observer in &observers {
            if matches!(gates.get(observer.id()), Some(ObserverGate::Active)) {
                observer.on_stream_event(&start);
            }
        }

        self.active_streams.lock().expect("channel lock poisoned").insert(
            stream_id.clone(),
            StreamState {
                sender_id: sender_id.clone(),
                sender_klass,
                receiver_spec,
                recipient_id: recipient_id.clone(),
                recipient_klass,
                gates,
            },
        );

        self.bus.publish(Event::StreamStart {
            stream_id: stream_id.clone(),
            sender_id,
            recipient_id,
        });

        stream_id
    }

    /// Emit an incremental chunk on an active stream.
    ///
    /// # Errors
    ///
    /// [`KernelError::UnknownStream`] when the stream was never started or
    /// has already completed.
    pub fn stream_chunk(&self, stream_id: &str, chunk: &str) -> Result<()> {
        let observers: Vec<Arc<dyn StreamObserver>> = {
            let observers = self.stream_observers.lock().expect("channel lock poisoned");
            observers.clone()
        };

        let mut streams = self.active_streams.lock().expect("channel lock poisoned");
        let state = streams
            .get_mut(stream_id)
            .ok_or_else(|| KernelError::UnknownStream {
                stream_id: stream_id.to_string(),
            })?;

        let start = StreamEvent::Start {
            stream_id: stream_id.to_string(),
            sender_id: state.sender_id.clone(),
            sender_klass: state.sender_klass.clone(),
            receiver_spec: state.receiver_spec.clone(),
            recipient_id: state.recipient_id.clone(),
            recipient_klass: state.recipient_klass.clone(),
        };

        for observer in &observers {
            // Observers subscribed after the stream started have no gate
            // and default to blocked for this stream.
            let Some(gate) = state.gates.get_mut(observer.id()) else {
                continue;
            };
            match gate {
                ObserverGate::Active => {
                    observer.on_stream_event(&StreamEvent::Chunk {
                        stream_id: stream_id.to_string(),
                        content: chunk.to_string(),
                    });
                }
                ObserverGate::Pending { withheld } => {
                    withheld.push_str(chunk);
                    let named = observer
                        .human_name()
                        .is_some_and(|name| withheld.contains(&name));
                    if named {
                        // The stream now names this human: replay the
                        // withheld prefix as one chunk.
                        let replay = std::mem::take(withheld);
                        *gate = ObserverGate::Active;
                        observer.on_stream_event(&start);
                        observer.on_stream_event(&StreamEvent::Chunk {
                            stream_id: stream_id.to_string(),
                            content: replay,
                        });
                    }
                }
                ObserverGate::Blocked => {}
            }
        }

        self.bus.publish(Event::StreamChunk {
            stream_id: stream_id.to_string(),
            content: chunk.to_string(),
        });

        Ok(())
    }

    /// Complete a stream: emit [`StreamEvent::Complete`] to admitted
    /// observers, remove the stream, then deliver `final_message` normally.
    pub async fn complete_stream(&self, stream_id: &str, final_message: Message) -> Result<()> {
        let observers: Vec<Arc<dyn StreamObserver>> = {
            let observers = self.stream_observers.lock().expect("channel lock poisoned");
            observers.clone()
        };

        let state = {
            let mut streams = self.active_streams.lock().expect("channel lock poisoned");
            streams
                .remove(stream_id)
                .ok_or_else(|| KernelError::UnknownStream {
                    stream_id: stream_id.to_string(),
                })?
        };

        let complete = StreamEvent::Complete {
            stream_id: stream_id.to_string(),
        };
        for observer in &observers {
            if matches!(state.gates.get(observer.id()), Some(ObserverGate::Active)) {
                observer.on_stream_event(&complete);
            }
        }

        self.bus.publish(Event::StreamComplete {
            stream_id: stream_id.to_string(),
        });

        self.send(final_message, &state.sender_id).await
    }

    /// Ids of streams that have started but not completed.
    pub fn active_stream_ids(&self) -> Vec<String> {
        let streams = self.active_streams.lock().expect("channel lock poisoned");
        streams.keys().cloned().collect()
    }
}

/// Decide how one observer sees one stream.
fn evaluate_gate(
    observer: &dyn StreamObserver,
    recipient_id: Option<&str>,
    is_meeting: bool,
) -> ObserverGate {
    // Targeted-human filtering: an observer bound to human X only sees
    // streams addressed to X or to no one in particular.
    if let Some(target) = observer.target_human_id() {
        if recipient_id.is_some_and(|r| r != target) {
            return ObserverGate::Blocked;
        }
    }

    let Some(prefs) = observer.delivery_preferences() else {
        return ObserverGate::Active;
    };

    if !prefs.streaming_enabled {
        return ObserverGate::Blocked;
    }

    if is_meeting {
        match prefs.meeting_notifications {
            MeetingNotifications::All => ObserverGate::Active,
            MeetingNotifications::None => ObserverGate::Blocked,
            MeetingNotifications::Targeted => {
                let addressed = recipient_id.is_some()
                    && recipient_id == observer.target_human_id().as_deref();
                if addressed {
                    ObserverGate::Active
                } else {
                    ObserverGate::Pending {
                        withheld: String::new(),
                    }
                }
            }
        }
    } else {
        ObserverGate::Active
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::queue::AsyncMessageQueue;

    struct InboxParticipant {
        id: String,
        inbox: AsyncMessageQueue,
    }

    impl InboxParticipant {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                inbox: AsyncMessageQueue::new(),
            })
        }
    }

    #[async_trait]
    impl Participant for InboxParticipant {
        fn id(&self) -> &str {
            &self.id
        }

        fn klass(&self) -> &str {
            "TestAgent"
        }

        async fn deliver(&self, message: Message) -> Result<()> {
            self.inbox.put(message)
        }
    }

    struct RecordingObserver {
        id: String,
        target: Option<String>,
        prefs: Option<DeliveryPreferences>,
        name: Option<String>,
        events: StdMutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                target: None,
                prefs: None,
                name: None,
                events: StdMutex::new(Vec::new()),
            })
        }

        fn for_human(id: &str, name: &str, prefs: DeliveryPreferences) -> Arc<Self> {
            Arc::new(Self {
                id: format!("observer-{id}"),
                target: Some(id.to_string()),
                prefs: Some(prefs),
                name: Some(name.to_string()),
                events: StdMutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.events.lock().expect("lock").clone()
        }
    }

    impl StreamObserver for RecordingObserver {
        fn id(&self) -> &str {
            &self.id
        }

        fn target_human_id(&self) -> Option<String> {
            self.target.clone()
        }

        fn delivery_preferences(&self) -> Option<DeliveryPreferences> {
            self.prefs.clone()
        }

        fn human_name(&self) -> Option<String> {
            self.name.clone()
        }

        fn on_stream_event(&self, event: &StreamEvent) {
            let tag = match event {
                StreamEvent::Start { .. } => "start".to_string(),
                StreamEvent::Chunk { content, .. } => format!("chunk:{content}"),
                StreamEvent::Complete { .. } => "complete".to_string(),
            };
            self.events.lock().expect("lock").push(tag);
        }
    }

    fn test_channel(participants: Vec<Arc<dyn Participant>>) -> Channel {
        Channel::new("ch-1", participants, EventBus::new("test_session"))
    }

    #[tokio::test]
    async fn send_delivers_to_non_senders_only() {
        let alice = InboxParticipant::new("alice");
        let bob = InboxParticipant::new("bob");
        let channel = test_channel(vec![alice.clone(), bob.clone()]);

        let message = Message::direct("alice", "TestAgent", "bob", "TestAgent", "hi");
        channel.send(message, "alice").await.expect("send");

        assert_eq!(bob.inbox.size(), 1);
        assert_eq!(alice.inbox.size(), 0);
    }

    #[tokio::test]
    async fn stream_lifecycle_is_ordered() {
        let channel = test_channel(vec![InboxParticipant::new("a"), InboxParticipant::new("b")]);
        let observer = RecordingObserver::new("obs");
        channel.add_stream_observer(observer.clone());

        channel.start_stream("s-1", "a", None, Some("user".into()), None, None);
        channel.stream_chunk("s-1", "Hel").expect("chunk");
        channel.stream_chunk("s-1", "lo").expect("chunk");
        let final_message = Message::direct("a", "TestAgent", "b", "TestAgent", "Hello");
        channel.complete_stream("s-1", final_message).await.expect("complete");

        assert_eq!(
            observer.seen(),
            vec!["start", "chunk:Hel", "chunk:lo", "complete"]
        );
        assert!(channel.active_stream_ids().is_empty());
    }

    struct CountingMessageObserver {
        id: String,
        count: std::sync::atomic::AtomicUsize,
    }

    impl MessageObserver for CountingMessageObserver {
        fn id(&self) -> &str {
            &self.id
        }

        fn on_message(&self, _message: &Message) {
            self.count
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn message_observers_see_each_send_once() {
        let channel = test_channel(vec![InboxParticipant::new("a"), InboxParticipant::new("b")]);
        let observer = Arc::new(CountingMessageObserver {
            id: "counter".into(),
            count: std::sync::atomic::AtomicUsize::new(0),
        });
        channel.add_message_observer(observer.clone());
        // Duplicate subscription is idempotent.
        channel.add_message_observer(observer.clone());

        let message = Message::direct("a", "TestAgent", "b", "TestAgent", "hi");
        channel.send(message, "a").await.expect("send");

        assert_eq!(
            observer.count.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn unknown_stream_fails_loudly() {
        let channel = test_channel(vec![InboxParticipant::new("a")]);
        assert!(matches!(
            channel.stream_chunk("nope", "x"),
            Err(KernelError::UnknownStream { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_observer_subscription_is_idempotent() {
        let channel = test_channel(vec![InboxParticipant::new("a"), InboxParticipant::new("b")]);
        let observer = RecordingObserver::new("obs");
        channel.add_stream_observer(observer.clone());
        channel.add_stream_observer(observer.clone());

        channel.start_stream("s-1", "a", None, None, None, None);
        channel.stream_chunk("s-1", "x").expect("chunk");

        assert_eq!(observer.seen(), vec!["start", "chunk:x"]);
    }

    #[tokio::test]
    async fn target_human_filtering() {
        let channel = test_channel(vec![InboxParticipant::new("a")]);
        let for_alice = RecordingObserver::for_human(
            "alice",
            "Alice",
            DeliveryPreferences::streaming(),
        );
        channel.add_stream_observer(for_alice.clone());

        // Addressed to bob: alice's observer sees nothing.
        channel.start_stream("s-1", "a", None, None, Some("bob".into()), None);
        channel.stream_chunk("s-1", "x").expect("chunk");

        // Addressed to no one in particular: alice's observer sees it.
        channel.start_stream("s-2", "a", None, None, None, None);
        channel.stream_chunk("s-2", "y").expect("chunk");

        assert_eq!(for_alice.seen(), vec!["start", "chunk:y"]);
    }

    #[tokio::test]
    async fn meeting_preferences_gate_streams() {
        let channel = test_channel(vec![InboxParticipant::new("ai")]);

        let alice = RecordingObserver::for_human(
            "alice",
            "Alice",
            DeliveryPreferences::streaming()
                .with_meeting_notifications(MeetingNotifications::All),
        );
        let bob = RecordingObserver::for_human(
            "bob",
            "Bob",
            DeliveryPreferences::streaming()
                .with_meeting_notifications(MeetingNotifications::Targeted),
        );
        let carol = RecordingObserver::for_human(
            "carol",
            "Carol",
            DeliveryPreferences::streaming()
                .with_meeting_notifications(MeetingNotifications::None),
        );
        channel.add_stream_observer(alice.clone());
        channel.add_stream_observer(bob.clone());
        channel.add_stream_observer(carol.clone());

        // Generic broadcast: only Alice streams.
        channel.start_stream("s-1", "ai", None, Some("meeting m-1".into()), None, None);
        channel.stream_chunk("s-1", "status update").expect("chunk");
        assert_eq!(alice.seen(), vec!["start", "chunk:status update"]);
        assert!(bob.seen().is_empty());
        assert!(carol.seen().is_empty());

        // Broadcast naming Bob: Alice and Bob stream; Carol stays silent.
        channel.start_stream("s-2", "ai", None, Some("meeting m-1".into()), None, None);
        channel.stream_chunk("s-2", "Bob, ").expect("chunk");
        channel.stream_chunk("s-2", "please respond").expect("chunk");

        assert_eq!(
            alice.seen(),
            vec![
                "start",
                "chunk:status update",
                "start",
                "chunk:Bob, ",
                "chunk:please respond"
            ]
        );
        // Bob's start is replayed once his name appears.
        assert_eq!(
            bob.seen(),
            vec!["start", "chunk:Bob, ", "chunk:please respond"]
        );
        assert!(carol.seen().is_empty());
    }
}
