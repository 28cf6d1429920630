//! Error types for the telnet session and the topic publisher.
//!
//! This module defines every terminal failure a poll cycle can end with.
//! "Data incomplete" is deliberately absent: a snapshot that is still missing
//! fields is the normal steady state while waiting for output, not an error.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Substrings that identify a refused TCP connection in transport error text.
const REFUSED_INDICATORS: &[&str] = &["ECONNREFUSED", "Connection refused", "os error 111"];

/// Errors that can end a poll cycle.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The telnet transport could not be opened or failed while open.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The server rejected the console password.
    #[error("telnet login failed")]
    LoginFailure,

    /// The transport saw no bytes for longer than its idle timeout.
    #[error("telnet connection idle for {0:?}")]
    IdleTimeout(Duration),

    /// A write was attempted on a connection that is already closed.
    #[error("telnet connection is closed")]
    ConnectionClosed,

    /// The topic could not be published.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// A command could not be handed to the transport I/O task.
    #[error("failed to send data: {0}")]
    Send(String),

    /// A required configuration value is missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Session recording could not be encoded, decoded or locked.
    #[error("session record error: {0}")]
    Record(String),
}

/// Transport-level connection failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The remote port is closed or nothing is listening on it.
    #[error("telnet connection refused: {0}")]
    Refused(String),

    /// Any other transport failure.
    #[error("telnet connection error: {0}")]
    Other(String),
}

impl ConnectionError {
    /// Classifies a transport error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if REFUSED_INDICATORS
            .iter()
            .any(|indicator| message.contains(indicator))
        {
            Self::Refused(message)
        } else {
            Self::Other(message)
        }
    }

    /// Returns true if the remote port refused the connection.
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused(_))
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::ConnectionRefused {
            return Self::Refused(err.to_string());
        }
        Self::from_message(err.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.into())
    }
}

impl From<SendError<String>> for SessionError {
    fn from(err: SendError<String>) -> Self {
        Self::Send(err.to_string())
    }
}

/// Errors returned by a topic publisher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The API answered with a non-success status.
    #[error("failed to update channel topic: {status} {body}")]
    Rejected { status: u16, body: String },

    /// The request never produced a response.
    #[error("failed to reach channel API: {0}")]
    Request(String),
}
