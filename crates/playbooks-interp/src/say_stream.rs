//! Raw-stream `Say` detection.
//!
//! While the LLM is still writing the function body, the dispatcher scans
//! the raw text for `await Say("user", "` (and the `self.`-prefixed form)
//! and mirrors the message content to the channel's stream observers
//! character-for-character -- the human sees the answer being typed before
//! the code is ever executed.
//!
//! Exactly-once delivery: the dispatcher sets the agent's
//! currently-streaming marker when [`SayStreamEvent::Start`] fires; when
//! the interpreter later executes that same `Say`, the agent checks the
//! marker and suppresses the second emission.
//!
//! Only string-literal messages to `user`/`human` stream.  A `Say` whose
//! target or message is a variable is skipped here and delivered normally
//! on execution.

use aho_corasick::AhoCorasick;

/// Events emitted by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SayStreamEvent {
    /// A human-targeted `Say` literal opened.
    Start,
    /// Unescaped message content.
    Content(String),
    /// The message literal closed.
    End,
}

enum State {
    /// Looking for an entry pattern.
    Scanning,
    /// Collecting the argument text after `Say(`.
    ParsingArgs { src: String },
    /// Inside a human-targeted message literal.
    Streaming { quote: char, escaped: bool },
    /// Inside a non-human message literal; consume without emitting.
    Skipping { quote: char, escaped: bool },
}

/// Incremental detector over the raw LLM stream.
pub struct SayStreamDetector {
    matcher: AhoCorasick,
    scan_buf: String,
    state: State,
}

impl Default for SayStreamDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SayStreamDetector {
    /// Create a detector.
    pub fn new() -> Self {
        let matcher = AhoCorasick::new(["await Say(", "await self.Say("])
            .expect("static patterns are valid");
        Self {
            matcher,
            scan_buf: String::new(),
            state: State::Scanning,
        }
    }

    /// Feed a chunk of raw LLM output; returns detector events in order.
    pub fn add_chunk(&mut self, chunk: &str) -> Vec<SayStreamEvent> {
        let mut events = Vec::new();
        let mut content = String::new();

        for c in chunk.chars() {
            match &mut self.state {
                State::Scanning => {
                    self.scan_buf.push(c);
                    let matched = self
                        .matcher
                        .find(&self.scan_buf)
                        .is_some_and(|m| m.end() == self.scan_buf.len());
                    if matched {
                        self.scan_buf.clear();
                        self.state = State::ParsingArgs { src: String::new() };
                    } else if self.scan_buf.len() > 32 {
                        // Keep only enough tail to complete a split pattern.
                        let keep = self.scan_buf.len() - 16;
                        self.scan_buf.drain(..keep);
                    }
                }
                State::ParsingArgs { src } => {
                    src.push(c);
                    match classify_args(src) {
                        ArgsOutcome::NeedMore => {}
                        ArgsOutcome::NotALiteral => {
                            self.state = State::Scanning;
                        }
                        ArgsOutcome::HumanMessage { quote } => {
                            events.push(SayStreamEvent::Start);
                            self.state = State::Streaming {
                                quote,
                                escaped: false,
                            };
                        }
                        ArgsOutcome::OtherMessage { quote } => {
                            self.state = State::Skipping {
                                quote,
                                escaped: false,
                            };
                        }
                    }
                }
                State::Streaming { quote, escaped } => {
                    if *escaped {
                        content.push(unescape(c));
                        *escaped = false;
                    } else if c == '\\' {
                        *escaped = true;
                    } else if c == *quote {
                        if !content.is_empty() {
                            events.push(SayStreamEvent::Content(std::mem::take(&mut content)));
                        }
                        events.push(SayStreamEvent::End);
                        self.state = State::Scanning;
                    } else {
                        content.push(c);
                    }
                }
                State::Skipping { quote, escaped } => {
                    if *escaped {
                        *escaped = false;
                    } else if c == '\\' {
                        *escaped = true;
                    } else if c == *quote {
                        self.state = State::Scanning;
                    }
                }
            }
        }

        if !content.is_empty() {
            events.push(SayStreamEvent::Content(content));
        }
        events
    }

    /// Whether the detector is currently inside a streamed message.
    pub fn is_streaming(&self) -> bool {
        matches!(self.state, State::Streaming { .. })
    }
}

enum ArgsOutcome {
    NeedMore,
    NotALiteral,
    HumanMessage { quote: char },
    OtherMessage { quote: char },
}

/// Classify the collected argument text after `Say(`.
///
/// Accepts `"target", "` / `'target', f"` shapes.  Anything that is not a
/// leading string literal (a variable target, a computed message) opts out
/// of streaming.
fn classify_args(src: &str) -> ArgsOutcome {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;

    // Leading whitespace before the target literal.
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    let Some(&target_quote) = chars.get(i) else {
        return ArgsOutcome::NeedMore;
    };
    if target_quote != '"' && target_quote != '\'' {
        return ArgsOutcome::NotALiteral;
    }
    i += 1;

    // Target content up to the closing quote.
    let target_start = i;
    while i < chars.len() && chars[i] != target_quote {
        i += 1;
    }
    if i >= chars.len() {
        return if src.len() > 200 {
            ArgsOutcome::NotALiteral
        } else {
            ArgsOutcome::NeedMore
        };
    }
    let target: String = chars[target_start..i].iter().collect();
    i += 1;

    // `, ` between target and message.
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    match chars.get(i) {
        None => return ArgsOutcome::NeedMore,
        Some(',') => i += 1,
        Some(_) => return ArgsOutcome::NotALiteral,
    }
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }

    // Optional f-string prefix, then the message quote.
    if chars.get(i) == Some(&'f') {
        i += 1;
    }
    let Some(&message_quote) = chars.get(i) else {
        return ArgsOutcome::NeedMore;
    };
    if message_quote != '"' && message_quote != '\'' {
        return ArgsOutcome::NotALiteral;
    }

    let target_lower = target.to_lowercase();
    if target_lower == "user" || target_lower == "human" {
        ArgsOutcome::HumanMessage {
            quote: message_quote,
        }
    } else {
        ArgsOutcome::OtherMessage {
            quote: message_quote,
        }
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}
