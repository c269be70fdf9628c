use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    /// The hook's handler returned an unrecoverable failure.
    #[error("Hook execution failed: {0}")]
    ExecutionFailed(String),

    /// The handler panicked; the message is the panic payload when it was a string.
    #[error("Hook panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, HookError>;
