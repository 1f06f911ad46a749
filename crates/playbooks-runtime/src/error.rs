//! Runtime error types.

/// Unified error type for the program runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The program source could not be loaded (missing files, no AI agent,
    /// duplicate front-matter keys, malformed sections).  Fatal.
    #[error("program load error: {reason}")]
    ProgramLoad { reason: String },

    /// A referenced agent does not exist.
    #[error("unknown agent: {agent}")]
    UnknownAgent { agent: String },

    /// A referenced playbook does not exist on the agent.
    #[error("unknown playbook: {playbook}")]
    UnknownPlaybook { playbook: String },

    /// The LLM transport failed.
    #[error("llm error: {message}")]
    Llm { message: String },

    /// The program finished (`Yield("exit")` reached the top).
    #[error("execution finished")]
    ExecutionFinished,

    /// Messaging failure.
    #[error(transparent)]
    Kernel(#[from] playbooks_kernel::KernelError),

    /// Execution-state failure.
    #[error(transparent)]
    State(#[from] playbooks_state::StateError),

    /// Durability failure.
    #[error(transparent)]
    Checkpoint(#[from] playbooks_checkpoint::CheckpointError),

    /// Filesystem failure while loading program sources.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file parse failure.
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

impl RuntimeError {
    /// Program-load error with a formatted reason.
    pub fn load(reason: impl Into<String>) -> Self {
        RuntimeError::ProgramLoad {
            reason: reason.into(),
        }
    }

    /// LLM transport error with a formatted message.
    pub fn llm(message: impl Into<String>) -> Self {
        RuntimeError::Llm {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the runtime crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
