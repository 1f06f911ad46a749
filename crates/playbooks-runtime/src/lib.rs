//! Playbooks program runtime.
//!
//! Executes programs authored as natural-language playbooks and compiled
//! to PBASM.  Each AI agent drives its playbooks by asking an LLM to
//! generate Python-style code which the streaming interpreter executes
//! incrementally -- user-visible output streams out while the LLM is still
//! writing.
//!
//! - **[`pbasm`]** -- reader for compiled programs.
//! - **[`playbook`]** -- the uniform call contract.
//! - **[`program`]** -- agent registry, channels, meetings, routing,
//!   restore.
//! - **[`agent`]** -- the AI agent main loop.
//! - **[`dispatch`]** -- playbook dispatch, the markdown LLM loop, and
//!   post-execute artifacting.
//! - **[`prompt`] / [`compactor`]** -- prompt assembly with I/P-frame
//!   state compression and deterministic history compaction.
//! - **[`llm`]** -- the streaming chunk-source abstraction plus the
//!   OpenAI-compatible client and a scripted test source.
//! - **[`config`]** -- TOML-backed runtime configuration.

pub mod agent;
pub mod compactor;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod pbasm;
pub mod playbook;
pub mod program;
pub mod prompt;

pub use agent::AiAgent;
pub use compactor::LlmContextCompactor;
pub use config::{DurabilityConfig, LlmConfig, RuntimeConfig};
pub use error::{Result, RuntimeError};
pub use llm::{openai::OpenAiChunkSource, scripted::ScriptedLlm, LlmChunkSource, LlmRequest};
pub use pbasm::{parse_pbasm, AgentKind, PbasmProgram};
pub use playbook::{Playbook, PlaybookKind};
pub use program::{AgentHandle, Program};
