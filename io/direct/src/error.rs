use std::fmt;
use std::io;

/// Errors returned by file handles and the submission context.
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O syscall failed.
    Io(io::Error),
    /// The calling thread already holds a submission context.
    AlreadyRegistered,
    /// The calling thread never registered a submission context.
    NotRegistered,
    /// Submission or reap failed repeatedly; the request was abandoned.
    RetriesExhausted {
        /// Which operation gave up.
        op: &'static str,
        /// How many attempts were made.
        attempts: usize,
    },
    /// A request fell outside the bounds of an in-memory backing.
    OutOfBounds {
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        len: u64,
        /// Backing size.
        size: u64,
    },
    /// The backend does not support this operation.
    Unsupported(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::AlreadyRegistered => write!(f, "thread already registered for I/O"),
            Error::NotRegistered => write!(f, "thread not registered for I/O"),
            Error::RetriesExhausted { op, attempts } => {
                write!(f, "{op} failed after {attempts} attempts")
            }
            Error::OutOfBounds { offset, len, size } => {
                write!(f, "request {offset}+{len} out of bounds (size {size})")
            }
            Error::Unsupported(op) => write!(f, "operation not supported: {op}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type for file handle operations.
pub type Result<T> = std::result::Result<T, Error>;
