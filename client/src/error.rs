use shared::{DecodeError, PageTooShort};
use std::time::Duration;
use thiserror::Error;

/// Connection-level failures of the broadcast client
#[derive(Error, Debug)]
pub enum ClientError {
    /// The peer answered the registration with `success = false`
    #[error("connection rejected by peer: {0}")]
    ConnectionRejected(String),

    /// No registration result arrived in time; peer not running or not listening
    #[error("no registration result within {0:?}, is the broadcasting interface enabled?")]
    ConnectionTimeout(Duration),

    #[error("client is already connected or connecting")]
    AlreadyConnected,

    #[error("client is not connected")]
    NotConnected,

    #[error(transparent)]
    MalformedMessage(#[from] DecodeError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reading the simulator's shared-memory pages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    /// Region missing: simulator not running, or not on a platform that has it
    #[error("shared memory region unavailable: {0}")]
    SharedRegionUnavailable(String),

    #[error(transparent)]
    Truncated(#[from] PageTooShort),
}
