//! Error types for udfstream.
//!
//! Every fallible operation in the crate returns [`Result<T>`], an alias for
//! `Result<T, Error>`.  The umbrella [`Error`] wraps one of the more specific categories:
//!
//! - **Format errors**: [`FormatError`], structural violations in the image itself
//! - **Path errors**: [`NotFound`], [`NotADirectory`]
//! - **Transport errors**: [`TransportError`], failures of the underlying byte source
//! - **Capability errors**: [`CapabilityError`], an operation used on the wrong kind of
//!   node, or a server missing a required feature
//!
//! [`NotFound`]: Error::NotFound
//! [`NotADirectory`]: Error::NotADirectory

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The image violates the on-disk format.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// A path component does not exist.
    #[error("no such file or directory: {path}")]
    NotFound { path: String },

    /// A non-final path component is not a directory.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// Reading from the byte source failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The operation is not available for this node or source.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Structural violations detected while decoding UDF structures.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("missing anchor descriptor at sector {sector} (found tag {found})")]
    MissingAnchor { sector: u64, found: u16 },

    #[error("missing {0} descriptor")]
    MissingDescriptor(&'static str),

    #[error("unexpected descriptor tag {found} at sector {sector} (expected {expected})")]
    UnexpectedTag {
        sector: u64,
        expected: u16,
        found: u16,
    },

    #[error("descriptor tag checksum mismatch at sector {sector}")]
    TagChecksum { sector: u64 },

    #[error("volume descriptor sequence not terminated within {sectors} sectors")]
    UnterminatedSequence { sectors: u64 },

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("invalid file identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unsupported structure: {0}")]
    Unsupported(String),
}

/// Failures of the underlying [`RangeSource`](crate::source::RangeSource).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("invalid response: {0}")]
    Protocol(String),

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An operation was attempted on something that can't support it.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("{name:?} is not a directory")]
    NotADirectory { name: String },

    #[error("{name:?} is a directory")]
    IsADirectory { name: String },

    #[error("server does not support byte range requests")]
    RangesUnsupported,
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        use std::io::ErrorKind;

        let kind = match &value {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::NotADirectory { .. } => ErrorKind::NotADirectory,
            Error::Format(_) => ErrorKind::InvalidData,
            Error::Capability(CapabilityError::IsADirectory { .. }) => ErrorKind::IsADirectory,
            Error::Capability(CapabilityError::NotADirectory { .. }) => ErrorKind::NotADirectory,
            Error::Capability(CapabilityError::RangesUnsupported) => ErrorKind::Unsupported,
            Error::Transport(TransportError::ShortRead { .. }) => ErrorKind::UnexpectedEof,
            Error::Transport(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, value)
    }
}
