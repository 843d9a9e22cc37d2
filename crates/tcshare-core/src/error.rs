use thiserror::Error;

pub type TcshareResult<T> = Result<T, TcshareError>;

#[derive(Debug, Error)]
pub enum TcshareError {
    /// Malformed input: bad key length, oversized randomness request,
    /// malformed header or session parameters. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// AEAD tag mismatch: wrong key, wrong password, or tampered data.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("range [{from}, {to}) out of bounds for object of {size} bytes")]
    OutOfRange { from: u64, to: u64, size: u64 },

    #[error("size limit exceeded: {limit} bytes")]
    SizeLimit { limit: u64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TcshareError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// True for tag mismatches. Callers re-prompt for credentials instead of
    /// treating the session as broken.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Transport and I/O failures may succeed on a fresh session; argument,
    /// authentication and size-limit errors never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}
