//! Router error types

use oscroute_core::{DecodeError, PatternError};
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::RegistrationId;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("core protocol error: {0}")]
    Core(#[from] oscroute_core::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("router error: {0}")]
    Other(String),
}

/// Failure raised by a handler invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler returned an error
    #[error("{0}")]
    Failed(String),

    /// The handler panicked
    #[error("panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        HandlerError::Failed(s)
    }
}

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        HandlerError::Failed(s.to_string())
    }
}

/// Non-fatal problems observed while the server runs.
///
/// None of these stop the receive loop except [`DeliveryError::SocketClosed`].
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    #[error("dropped malformed packet from {peer}: {error}")]
    Decode { peer: SocketAddr, error: DecodeError },

    #[error("handler {id} ({pattern}) failed on {address}: {error}")]
    Handler {
        id: RegistrationId,
        pattern: String,
        address: String,
        error: HandlerError,
    },

    #[error("work queue full, dropped message to {address}")]
    QueueFull { address: String },

    #[error("receive error: {0}")]
    Receive(String),

    #[error("socket closed: {0}")]
    SocketClosed(String),
}
