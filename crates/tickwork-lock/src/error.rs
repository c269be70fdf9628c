use thiserror::Error;

/// Errors raised by lock stores and the manager.
///
/// Lock contention is never represented here; it is a `false` from `acquire`.
#[derive(Debug, Error)]
pub enum LockError {
    /// The `cache` driver was selected but no shared cache was supplied.
    #[error("Lock driver 'cache' requires a shared cache collaborator")]
    MissingCache,

    /// The driver name is not one of `memory` or `cache`.
    #[error("Unknown lock driver: {0}")]
    UnknownDriver(String),

    /// The backing medium failed (connection lost, command rejected, ...).
    #[error("Lock backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, LockError>;
