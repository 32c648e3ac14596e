use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkrpcError {
    /// The channel to the worker failed (crash, unexpected close, write failure).
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    /// The error message a worker sent back. Displays as the bare message.
    #[error("{0}")]
    Remote(String),

    #[error("Worker was terminated")]
    Terminated,

    #[error("Failed to start worker: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkrpcError {
    /// Whether this error came from the proxy being terminated.
    pub fn is_terminated(&self) -> bool {
        matches!(self, WorkrpcError::Terminated)
    }
}

pub type Result<T> = std::result::Result<T, WorkrpcError>;
