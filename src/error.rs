//! Unified error type.

use thiserror::Error;

/// Boxed error returned by external collaborators (user store, accounts,
/// collections, shared rate-limit stores).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by waypost's fallible operations.
///
/// Request-level outcomes (401, 403, 429, ...) are expressed as
/// [`StatusResponse`](crate::StatusResponse) values, not as `Error`s. This type
/// surfaces startup mistakes and infrastructure failures: a clashing route,
/// a port that cannot be bound, a collaborator that went away.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("route `{method} {path}` is already registered")]
    DuplicateRoute { method: String, path: String },

    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    #[error("service: {0}")]
    Service(#[source] BoxError),
}

impl Error {
    pub(crate) fn service(e: BoxError) -> Self {
        Self::Service(e)
    }
}
