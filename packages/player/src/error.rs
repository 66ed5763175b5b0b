//! Player error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Device id '{0}' is already connected")]
    DuplicateDeviceId(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed by server")]
    Closed,
}

impl PlayerError {
    /// Errors that reconnecting cannot fix
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlayerError::DuplicateDeviceId(_))
    }
}
