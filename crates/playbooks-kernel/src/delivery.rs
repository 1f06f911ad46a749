//! Per-human delivery preferences.
//!
//! Humans are message sinks; *how* their messages surface (live streaming,
//! batched buffering, or a host-provided custom handler) is controlled by
//! [`DeliveryPreferences`].  Meeting traffic is additionally filtered by
//! [`MeetingNotifications`] so several humans can sit in one meeting and
//! each see only what concerns them.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Transport mode for one human's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    /// Stream `Say` output token-by-token as it is generated.
    Streaming,
    /// Collect messages and flush them in batches.
    Buffered,
    /// Delivery is performed by a host-registered handler.
    Custom,
}

/// Which meeting broadcasts are surfaced to this human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeetingNotifications {
    /// Every meeting message.
    All,
    /// Only messages naming this human (name substring, or recipient id
    /// equal to theirs).
    Targeted,
    /// No meeting messages at all.
    None,
}

/// Delivery preferences for one human participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPreferences {
    /// Transport mode.
    pub channel_mode: ChannelMode,
    /// Whether streamed output is surfaced live.
    pub streaming_enabled: bool,
    /// Whether messages are collected into a buffer.
    pub buffer_messages: bool,
    /// How long a buffered batch may age before it must flush.
    pub buffer_timeout: Duration,
    /// Meeting broadcast filtering.
    pub meeting_notifications: MeetingNotifications,
}

impl Default for DeliveryPreferences {
    fn default() -> Self {
        Self::streaming()
    }
}

impl DeliveryPreferences {
    /// Live-streaming preferences (the default for interactive humans).
    #[must_use]
    pub fn streaming() -> Self {
        Self {
            channel_mode: ChannelMode::Streaming,
            streaming_enabled: true,
            buffer_messages: false,
            buffer_timeout: Duration::from_secs(5),
            meeting_notifications: MeetingNotifications::All,
        }
    }

    /// Buffered preferences with the given flush timeout.
    #[must_use]
    pub fn buffered(buffer_timeout: Duration) -> Self {
        Self {
            channel_mode: ChannelMode::Buffered,
            streaming_enabled: false,
            buffer_messages: true,
            buffer_timeout,
            meeting_notifications: MeetingNotifications::All,
        }
    }

    /// Set the meeting-notification filter.
    #[must_use]
    pub fn with_meeting_notifications(mut self, filter: MeetingNotifications) -> Self {
        self.meeting_notifications = filter;
        self
    }

    /// Enforce the mode invariants: buffered forces streaming off and
    /// buffering on; streaming forces streaming on.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        match self.channel_mode {
            ChannelMode::Buffered => {
                self.streaming_enabled = false;
                self.buffer_messages = true;
            }
            ChannelMode::Streaming => {
                self.streaming_enabled = true;
            }
            ChannelMode::Custom => {}
        }
        self
    }
}

/// Batches messages for a human with buffered delivery.
///
/// Messages accumulate until [`DeliveryPreferences::buffer_timeout`] has
/// elapsed since the first buffered message, at which point
/// [`MessageBuffer::push`] (or [`take_if_due`](MessageBuffer::take_if_due))
/// hands back the whole batch.
pub struct MessageBuffer {
    timeout: Duration,
    inner: Mutex<BufferInner>,
}

struct BufferInner {
    messages: Vec<Message>,
    first_at: Option<Instant>,
}

impl MessageBuffer {
    /// Create a buffer with the given flush timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inner: Mutex::new(BufferInner {
                messages: Vec::new(),
                first_at: None,
            }),
        }
    }

    /// Append a message; returns the flushed batch if the buffer is due.
    pub fn push(&self, message: Message) -> Option<Vec<Message>> {
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        if inner.first_at.is_none() {
            inner.first_at = Some(Instant::now());
        }
        inner.messages.push(message);

        let due = inner
            .first_at
            .is_some_and(|first| first.elapsed() >= self.timeout);
        if due {
            inner.first_at = None;
            Some(std::mem::take(&mut inner.messages))
        } else {
            None
        }
    }

    /// Take the batch if the flush timeout has elapsed.
    pub fn take_if_due(&self) -> Option<Vec<Message>> {
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        let due = inner
            .first_at
            .is_some_and(|first| first.elapsed() >= self.timeout);
        if due && !inner.messages.is_empty() {
            inner.first_at = None;
            Some(std::mem::take(&mut inner.messages))
        } else {
            None
        }
    }

    /// Drain the buffer unconditionally.
    pub fn flush(&self) -> Vec<Message> {
        let mut inner = self.inner.lock().expect("buffer lock poisoned");
        inner.first_at = None;
        std::mem::take(&mut inner.messages)
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("buffer lock poisoned").messages.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
