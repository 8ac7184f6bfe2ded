/*!
 * Error types for Tidemark
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, TidemarkError>;

#[derive(Debug)]
pub enum TidemarkError {
    /// I/O error
    Io(io::Error),

    /// Configuration error
    Config(String),

    /// Replica-side operation failed
    Replica(String),

    /// Slave-side timestamp is ahead of the master's for a path
    TimestampCorruption(PathBuf),

    /// Volume uuid changed underneath us without a relaxed slot
    UuidChange { from: String, to: String },

    /// Master volume reported itself unusable
    MasterCorrupt(String),

    /// More than one foreign master observed
    MultipleForeignMasters(usize),

    /// Worker process could not be spawned or supervised
    Supervisor(String),
}

impl TidemarkError {
    /// Check if this error is fatal (restarting the worker will not help)
    pub fn is_fatal(&self) -> bool {
        match self {
            // Invariant breaches
            TidemarkError::TimestampCorruption(_) => true,
            TidemarkError::UuidChange { .. } => true,
            TidemarkError::MasterCorrupt(_) => true,
            TidemarkError::MultipleForeignMasters(_) => true,
            TidemarkError::Config(_) => true,

            // Transient - the supervisor restarts the worker
            TidemarkError::Io(_) => false,
            TidemarkError::Replica(_) => false,
            TidemarkError::Supervisor(_) => false,
        }
    }
}

impl fmt::Display for TidemarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TidemarkError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            TidemarkError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
            TidemarkError::Replica(msg) => {
                write!(f, "Replica error: {}", msg)
            }
            TidemarkError::TimestampCorruption(path) => {
                write!(f, "timestamp corruption for {}", path.display())
            }
            TidemarkError::UuidChange { from, to } => {
                write!(f, "aborting on uuid change from {} to {}", from, to)
            }
            TidemarkError::MasterCorrupt(uuid) => {
                write!(f, "master volume {} is corrupt", uuid)
            }
            TidemarkError::MultipleForeignMasters(n) => {
                write!(f, "cannot work with {} foreign masters", n)
            }
            TidemarkError::Supervisor(msg) => {
                write!(f, "Supervisor error: {}", msg)
            }
        }
    }
}

impl std::error::Error for TidemarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TidemarkError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TidemarkError {
    fn from(err: io::Error) -> Self {
        TidemarkError::Io(err)
    }
}
