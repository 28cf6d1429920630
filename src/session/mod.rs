//! Telnet console session and poll-cycle control.
//!
//! This module owns the remote console connection lifecycle: connecting,
//! answering the password prompt, sending the status queries once the console
//! is ready, feeding every received chunk to the [`StatusSnapshot`], and
//! resolving the cycle to exactly one [`SessionOutcome`].
//!
//! # Main Components
//!
//! - [`SessionController`] - Drives one poll cycle under a deadline
//! - [`TelnetClient`] - Telnet transport with an I/O task and login handling
//! - [`Resolver`] - Single-assignment outcome guard
//! - [`SessionRecorder`] / [`ReplayConnector`] - Session recording and offline replay

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::config;
use crate::error::{ConnectionError, SessionError};
use crate::status::{self, StatusField, StatusSnapshot};

pub use client::{TelnetClient, TelnetConnector};
pub use controller::SessionController;
pub use recording::{
    ReplayConnector, ReplayTransport, SessionEvent, SessionRecordEntry, SessionRecordLevel,
    SessionRecorder,
};
pub use resolver::Resolver;
pub use telnet::{LoginHandler, LoginStep, TelnetFilter};

/// Connection parameters for the game server console.
#[derive(Clone, PartialEq, Eq)]
pub struct TelnetConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Raise [`TransportEvent::Timeout`] after this much silence.
    pub idle_timeout: Duration,
}

impl TelnetConfig {
    /// `host:port` for logging.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for TelnetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelnetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Options for one poll cycle.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub telnet: TelnetConfig,
    /// Channel whose topic receives the status line.
    pub channel_id: String,
    /// Wall-clock bound on the whole cycle.
    pub deadline: Duration,
}

/// Notifications delivered by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text received from the console, with telnet negotiation stripped.
    Data(String),
    /// The password was accepted.
    Ready,
    /// The password was rejected.
    FailedLogin,
    /// No bytes arrived within the idle timeout.
    Timeout,
    /// The remote side closed the connection.
    Close,
    /// The socket failed.
    Error(String),
}

/// Terminal result of a poll cycle.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The topic was published.
    Success(String),
    /// The cycle failed.
    Failure(SessionError),
    /// The deadline elapsed first. Not an error.
    Timeout,
    /// The console closed the connection before the topic was published.
    /// Not an error either; the next invocation polls again.
    Disconnected,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(topic) => write!(f, "success: {topic}"),
            Self::Failure(err) => write!(f, "failure: {err}"),
            Self::Timeout => f.write_str("timeout"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Poll-cycle state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    AwaitingBanner,
    QuerySent,
    Complete,
    Failed,
    TimedOut,
    Disconnected,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Failed | Self::TimedOut | Self::Disconnected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::AwaitingBanner => "awaiting_banner",
            Self::QuerySent => "query_sent",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// An open remote terminal stream.
#[async_trait]
pub trait Transport: Send {
    /// Writes one line; the line ending is appended by the transport.
    async fn send(&mut self, line: &str) -> Result<(), SessionError>;

    /// Waits for the next notification. Returns [`TransportEvent::Close`]
    /// once the stream has ended.
    async fn next_event(&mut self) -> TransportEvent;

    /// Tears the connection down. Calling it again is a no-op.
    async fn destroy(&mut self);
}

/// Opens [`Transport`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self, config: &TelnetConfig) -> Result<Self::Transport, SessionError>;
}

mod client;
mod controller;
mod recording;
mod resolver;
mod telnet;
