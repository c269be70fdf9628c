//! Error types for the tickwork-terminal crate.

use thiserror::Error;

/// All errors that can originate from running a command.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Child-process spawn failed.
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Underlying I/O failure while collecting output.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Command exceeded its time budget and was killed.
    #[error("Command timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TerminalError>;
