use thiserror::Error;

/// Failures decoding a field-ordered message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown command tag {0}")]
    UnknownCommand(i32),

    #[error("unknown feedback mode {0}")]
    UnknownMode(i32),

    #[error("unknown log severity {0}")]
    UnknownSeverity(i32),

    #[error("invalid plot count {0}")]
    TooManyPlots(i32),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),

    #[error("peer disconnected")]
    Disconnected,

    #[error("timed out waiting for the peer")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),
}

impl LinkError {
    /// Maps transport-level I/O errors onto the session taxonomy.
    pub fn from_transport(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => LinkError::Disconnected,
            ErrorKind::WouldBlock | ErrorKind::TimedOut => LinkError::Timeout,
            _ => LinkError::Io(err),
        }
    }
}
