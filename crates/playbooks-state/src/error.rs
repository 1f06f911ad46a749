//! State error types.

/// Unified error type for the execution-state crate.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A step location string did not have the `Playbook:Line[:Type]` shape.
    #[error("invalid step location `{location}`: {reason}")]
    InvalidStepLocation { location: String, reason: String },

    /// A dotted variable path traversed a value that is not a map.
    #[error("cannot assign `{path}`: `{segment}` is {found}, not a map")]
    PathCollision {
        /// The full dotted path being assigned.
        path: String,
        /// The segment that collided.
        segment: String,
        /// Type name of the value found at the segment.
        found: String,
    },

    /// A variable held an artifact reference whose artifact does not exist.
    #[error("artifact not found: {name}")]
    ArtifactNotFound { name: String },

    /// `pop` was called on an empty call stack.
    #[error("call stack is empty")]
    EmptyCallStack,
}

/// Convenience alias used throughout the state crate.
pub type Result<T> = std::result::Result<T, StateError>;
