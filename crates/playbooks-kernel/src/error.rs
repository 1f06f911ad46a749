//! Kernel error types.
//!
//! All messaging subsystems surface errors through [`KernelError`], the
//! single error type returned by every public API in this crate.  Each
//! variant carries enough context for callers to decide how to handle the
//! failure without inspecting opaque strings.

/// Unified error type for the playbooks messaging kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Queue errors -------------------------------------------------------
    /// `put` was called on a queue that has been closed.
    #[error("message queue is closed")]
    QueueClosed,

    /// A `get`/`get_batch` wait expired before a matching message arrived.
    #[error("timed out after {waited_ms}ms waiting for a message")]
    ReceiveTimeout {
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },

    // -- Channel errors -----------------------------------------------------
    /// A stream operation referenced a stream id that was never started or
    /// has already completed.
    #[error("unknown stream: {stream_id}")]
    UnknownStream { stream_id: String },

    /// The referenced participant is not a member of the channel.
    #[error("participant not found in channel {channel_id}: {participant_id}")]
    ParticipantNotFound {
        channel_id: String,
        participant_id: String,
    },

    // -- Meeting errors -----------------------------------------------------
    /// The referenced meeting does not exist.
    #[error("meeting not found: {meeting_id}")]
    MeetingNotFound { meeting_id: String },

    /// The agent is not an attendee of the meeting it tried to address.
    #[error("agent {agent_id} is not an attendee of meeting {meeting_id}")]
    NotAnAttendee {
        meeting_id: String,
        agent_id: String,
    },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
