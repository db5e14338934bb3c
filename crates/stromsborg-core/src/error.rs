#![forbid(unsafe_code)]

/// Errors produced by the Stromsborg streaming pipeline.
///
/// The first error raised by any processor aborts the whole chain, so every
/// variant carries enough context to be reported on its own.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unparsable XML, unbalanced elements or a broken synthetic wrapper.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Structural violation in the security markup (missing KeyInfo,
    /// unresolvable token reference).
    #[error("invalid security: {0}")]
    InvalidSecurity(String),

    /// A check over the message failed (duplicate or unconsumed reference,
    /// digest mismatch, reference depth exceeded).
    #[error("security check failed: {0}")]
    FailedCheck(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("processing cancelled")]
    Cancelled,

    /// Pipe, worker or chain bookkeeping failure.
    #[error("internal failure: {0}")]
    InternalFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Recover a pipeline error that was smuggled through an `io::Error`,
    /// as happens when a worker fault travels through a `Read`/`Write` adapter.
    pub fn from_io(err: std::io::Error) -> Self {
        if err.get_ref().map_or(false, |inner| inner.is::<Error>()) {
            match err.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(inner)) => *inner,
                Some(Err(other)) => Error::InternalFailure(other.to_string()),
                None => Error::InternalFailure("empty I/O error".into()),
            }
        } else {
            Error::Io(err)
        }
    }

    /// Wrap this error so it can cross an `io::Read`/`io::Write` boundary.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Error::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
