//! Checkpoint error types.

/// Unified error type for the durability crate.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The serialized checkpoint exceeded the provider's size limit.
    #[error("checkpoint {checkpoint_id} exceeds size limit: {size} > {limit} bytes")]
    TooLarge {
        checkpoint_id: String,
        size: usize,
        limit: usize,
    },

    /// A checkpoint id did not have the `<execution_id>_ckpt_<n>` shape.
    #[error("invalid checkpoint id: {id}")]
    InvalidCheckpointId { id: String },

    /// Storage I/O failed.
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization failed.
    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience alias used throughout the durability crate.
pub type Result<T> = std::result::Result<T, CheckpointError>;
