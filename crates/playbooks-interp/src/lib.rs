//! Streaming interpreter for LLM-generated playbook code.
//!
//! An AI agent drives its playbooks by asking an LLM to generate a small
//! Python-like program, chunk by chunk.  This crate turns that stream into
//! executed effects *while the LLM is still writing*:
//!
//! - **[`buffer`]** -- accumulates raw chunks and carves off the longest
//!   executable prefix of complete statements (blocks closed by dedent,
//!   strings and brackets balanced).
//! - **[`lexer`] / [`parser`] / [`ast`]** -- a deliberately small
//!   Python-like language: literals, f-strings, containers, calls,
//!   attribute and index access, `if`/`while`/`for`, assignment, `await`.
//!   It is not Python; it is the statement shapes the interpreter prompt
//!   asks for.
//! - **[`eval`]** -- an async tree-walking evaluator.  All side effects go
//!   through the [`CaptureHost`](host::CaptureHost): the capture primitives
//!   (`Step`, `Say`, `Var`, `SaveArtifact`, `Trigger`, `Return`, `Yield`)
//!   and playbook calls are native functions provided by the agent.
//! - **[`executor`]** -- the per-LLM-call pipeline: chunks in, statements
//!   executed, locals mirrored after every statement, executed code
//!   recorded for checkpoint replay.
//! - **[`say_stream`]** -- a textual detector that spots
//!   `await Say("user", "...` in the raw stream and emits the message
//!   content to the channel's stream observers before the code ever runs.
//!
//! There is no `eval`, `exec`, `open`, or import surface anywhere in the
//! language: the namespace is closed over the capture primitives, a small
//! builtin set, playbook wrappers, and plain values.

pub mod ast;
pub mod buffer;
pub mod error;
pub mod eval;
pub mod executor;
pub mod host;
pub mod lexer;
pub mod parser;
pub mod result;
pub mod say_stream;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::IncrementalCodeBuffer;
pub use error::{InterpError, Result};
pub use eval::{Evaluator, Namespace};
pub use executor::StreamingExecutor;
pub use host::CaptureHost;
pub use result::ExecutionResult;
pub use say_stream::{SayStreamDetector, SayStreamEvent};
