use std::fmt;
use std::io;

/// Errors surfaced by the engine's outer interfaces.
///
/// Tasks themselves have no error channel: completion means the requested
/// buffers were delivered and the kernel ran.
#[derive(Debug)]
pub enum EngineError {
    /// Filesystem-level failure.
    Io(io::Error),
    /// File handle or submission-context failure.
    File(direct_io::Error),
    /// Bad configuration file or value.
    Config(String),
    /// API misuse (zero-size allocation, freeing a non-temp slice).
    Usage(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io(e) => write!(f, "I/O error: {e}"),
            EngineError::File(e) => write!(f, "file error: {e}"),
            EngineError::Config(msg) => write!(f, "configuration: {msg}"),
            EngineError::Usage(msg) => write!(f, "usage: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            EngineError::File(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<direct_io::Error> for EngineError {
    fn from(e: direct_io::Error) -> Self {
        EngineError::File(e)
    }
}
