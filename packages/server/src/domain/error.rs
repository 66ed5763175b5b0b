//! Domain errors

use thiserror::Error;

/// Value object validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("client id must not be empty")]
    ClientIdEmpty,

    #[error("client id must be at most {0} characters")]
    ClientIdTooLong(usize),

    #[error("unknown client role '{0}'")]
    UnknownRole(String),
}

/// Client repository errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("client '{0}' not found")]
    ClientNotFound(String),
}

/// Message delivery errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagePushError {
    #[error("client '{0}' has no open connection")]
    ClientNotFound(String),

    #[error("failed to push message: {0}")]
    PushFailed(String),

    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Media resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("media reference must not be empty")]
    Empty,

    #[error("unsupported media reference '{0}'")]
    Unsupported(String),
}
