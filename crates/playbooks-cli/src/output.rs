//! Terminal stream observer: prints `Say` output as it streams.

use std::io::Write;

use playbooks_kernel::{StreamEvent, StreamObserver};

/// Prints streamed agent output to stdout, chunk by chunk.
pub struct TerminalObserver;

impl TerminalObserver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamObserver for TerminalObserver {
    fn id(&self) -> &str {
        "terminal-output"
    }

    fn on_stream_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Start { sender_klass, .. } => {
                let who = sender_klass.as_deref().unwrap_or("agent");
                print!("{who}: ");
                let _ = std::io::stdout().flush();
            }
            StreamEvent::Chunk { content, .. } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
            StreamEvent::Complete { .. } => {
                println!();
            }
        }
    }
}
