//! Interpreter error types.

/// Unified error type for the streaming interpreter.
#[derive(Debug, thiserror::Error)]
pub enum InterpError {
    /// The code failed to parse once the buffer was stable.
    #[error("syntax error: {message}")]
    Syntax { message: String },

    /// A statement failed while executing.
    #[error("runtime error: {message}")]
    Runtime { message: String },

    /// A name was referenced that exists nowhere in the namespace.
    ///
    /// The denied builtins (`eval`, `exec`, `open`, ...) surface here too:
    /// they simply do not exist in the language.
    #[error("name `{name}` is not defined")]
    UndefinedName { name: String },

    /// The generated code requested program exit (`Yield("exit")`).
    #[error("execution finished")]
    ExecutionFinished,

    /// A capture function or playbook call failed in the host.
    #[error("host error: {message}")]
    Host { message: String },
}

impl InterpError {
    /// Runtime error with a formatted message.
    pub fn runtime(message: impl Into<String>) -> Self {
        InterpError::Runtime {
            message: message.into(),
        }
    }

    /// Syntax error with a formatted message.
    pub fn syntax(message: impl Into<String>) -> Self {
        InterpError::Syntax {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the interpreter crate.
pub type Result<T> = std::result::Result<T, InterpError>;
