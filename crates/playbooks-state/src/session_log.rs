//! Append-only session log.
//!
//! The session log records what happened during an agent's execution at
//! three verbosity levels.  It feeds post-hoc explanation and is the
//! substrate for delta compression between LLM calls: high-level entries
//! (playbook starts/ends, steps) survive summarization; low-level entries
//! (raw lines) are the first to be elided.

use serde::{Deserialize, Serialize};

/// Verbosity level of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionLogLevel {
    Low,
    Medium,
    High,
}

/// One logged item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionLogItem {
    /// A playbook began.
    PlaybookStart { playbook: String },
    /// A playbook finished.
    PlaybookEnd {
        playbook: String,
        return_value: String,
    },
    /// A directive captured from generated code (step, say, ...).
    Directive { text: String },
    /// A message sent or received.
    Message { text: String },
    /// The result of a playbook call.
    CallResult { playbook: String, result: String },
}

impl SessionLogItem {
    /// Human-readable rendering.
    pub fn render(&self) -> String {
        match self {
            SessionLogItem::PlaybookStart { playbook } => format!("▶ {playbook}"),
            SessionLogItem::PlaybookEnd {
                playbook,
                return_value,
            } => format!("■ {playbook} -> {return_value}"),
            SessionLogItem::Directive { text } => text.clone(),
            SessionLogItem::Message { text } => text.clone(),
            SessionLogItem::CallResult { playbook, result } => {
                format!("{playbook} returned {result}")
            }
        }
    }
}

/// Ordered `(item, level)` log.
#[derive(Debug, Default)]
pub struct SessionLog {
    entries: Vec<(SessionLogItem, SessionLogLevel)>,
}

impl SessionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn append(&mut self, item: SessionLogItem, level: SessionLogLevel) {
        self.entries.push((item, level));
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[(SessionLogItem, SessionLogLevel)] {
        &self.entries
    }

    /// Render entries at or above `min_level`.
    pub fn render(&self, min_level: SessionLogLevel) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, level)| *level >= min_level)
            .map(|(item, _)| item.render())
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_order() {
        let mut log = SessionLog::new();
        log.append(
            SessionLogItem::PlaybookStart {
                playbook: "Main".into(),
            },
            SessionLogLevel::High,
        );
        log.append(
            SessionLogItem::Message {
                text: "raw line".into(),
            },
            SessionLogLevel::Low,
        );

        assert_eq!(log.len(), 2);
        assert!(matches!(
            log.entries()[0].0,
            SessionLogItem::PlaybookStart { .. }
        ));
    }

    #[test]
    fn render_filters_by_level() {
        let mut log = SessionLog::new();
        log.append(
            SessionLogItem::Message { text: "low".into() },
            SessionLogLevel::Low,
        );
        log.append(
            SessionLogItem::Message { text: "high".into() },
            SessionLogLevel::High,
        );

        let rendered = log.render(SessionLogLevel::Medium);
        assert_eq!(rendered, vec!["high"]);
    }
}
