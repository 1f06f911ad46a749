//! Playbooks messaging kernel.
//!
//! This crate provides the communication fabric that every agent in a
//! playbooks program runs on:
//!
//! - **[`bus`]** -- Session-scoped publish/subscribe event bus with
//!   per-event-kind callback subscribers and sequence stamping.
//! - **[`queue`]** -- Per-agent async inbox with predicate-based selective
//!   receive, priority insertion, and bounded drop-oldest overflow.
//! - **[`channel`]** -- Delivery channels (direct and meeting) with message
//!   observers and per-human-filtered stream observers.
//! - **[`meeting`]** -- N-participant meetings with an owner and joined
//!   attendees.
//! - **[`delivery`]** -- Per-human delivery preferences (streaming,
//!   buffered, meeting-notification filtering).
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod bus;
pub mod channel;
pub mod delivery;
pub mod error;
pub mod event;
pub mod meeting;
pub mod message;
pub mod queue;

// Re-export the most commonly used types at the crate root for convenience.
pub use bus::{EventBus, SubscriberId};
pub use channel::{Channel, MessageObserver, Participant, StreamEvent, StreamObserver};
pub use delivery::{ChannelMode, DeliveryPreferences, MeetingNotifications, MessageBuffer};
pub use error::{KernelError, Result};
pub use event::{Event, EventEnvelope};
pub use meeting::{Meeting, MeetingAttendee};
pub use message::{Message, MessageType};
pub use queue::{AsyncMessageQueue, QueueStats};
