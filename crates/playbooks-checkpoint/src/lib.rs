//! Durable execution.
//!
//! Persists enough state to resume an interrupted agent after its last
//! committed statement, and coordinates restore across all agents of a
//! program:
//!
//! - **[`provider`]** -- the pluggable storage interface.
//! - **[`filesystem`]** -- the built-in single-node provider: one JSON
//!   blob per checkpoint under `<base>/<execution_id>/`.
//! - **[`manager`]** -- per-agent checkpoint lifecycle: one checkpoint per
//!   captured statement, with the in-flight LLM response recorded so a
//!   mid-call interrupt resumes without re-querying the LLM.
//! - **[`coordinator`]** -- program-level checkpoints mapping each agent
//!   to its latest checkpoint, plus the restore plan.
//! - **[`session_map`]** -- maps a hash of the program's playbook paths to
//!   the last session id, so "resume" needs no session name.
//!
//! Payloads are JSON throughout: `execution_state` and the filtered
//! namespace round-trip by value; functions and modules are excluded by
//! construction.

pub mod coordinator;
pub mod error;
pub mod filesystem;
pub mod manager;
pub mod provider;
pub mod session_map;

pub use coordinator::{ProgramCheckpointCoordinator, RestorePlan};
pub use error::{CheckpointError, Result};
pub use filesystem::FilesystemCheckpointProvider;
pub use manager::CheckpointManager;
pub use provider::{CheckpointData, CheckpointProvider};
pub use session_map::SessionMap;
