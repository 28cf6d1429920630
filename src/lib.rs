//! # topicwatch - Game Server Status to Discord Channel Topic
//!
//! `topicwatch` polls a game server's telnet admin console once, extracts the
//! current player count, player capacity and in-game day/time, and publishes
//! them as the topic of a Discord channel. Each invocation is one bounded
//! cycle; scheduling is left to the caller.
//!
//! ## Features
//!
//! - **Telnet Console Client**: Option negotiation stripping and password login
//! - **Poll State Machine**: Queries are sent once the console banner appears
//! - **Single Outcome**: Every cycle resolves exactly once, bounded by a deadline
//! - **Session Recording**: JSONL recordings that can be replayed offline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use topicwatch::config::AppConfig;
//! use topicwatch::job::{self, Invocation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::from_env()?;
//!     let outcome = job::run_once(&config, Invocation::default()).await;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::SessionController`] - Drives one poll cycle to a single outcome
//! - [`session::TelnetClient`] - Telnet transport with login handling
//! - [`status::StatusSnapshot`] - Field extraction and topic formatting
//! - [`publish::DiscordPublisher`] - Channel topic updates over the Discord API
//! - [`error::SessionError`] - Error types for connection, login and publishing

pub mod config;
pub mod error;
pub mod job;
pub mod publish;
pub mod session;
pub mod status;
