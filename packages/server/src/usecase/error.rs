//! UseCase layer errors

use thiserror::Error;

use crate::domain::ResolveError;

/// Connection registration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("client '{0}' is already connected")]
    DuplicateClientId(String),
}

/// Playback control errors. Per-client delivery failures never surface here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("no media is loaded")]
    NothingToResume,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}
