//! Console protocol constants and runtime configuration.
//!
//! The constants describe the game server console as it is observed on the
//! wire; they are an external, unversioned contract and are kept verbatim.
//! [`AppConfig`] carries the per-deployment values read from the environment.

use std::path::PathBuf;
use std::time::Duration;

use log::debug;

use crate::error::SessionError;
use crate::session::{SessionRecordLevel, TelnetConfig};

/// Text printed by the console once it is ready to accept commands.
pub const HELP_BANNER: &str = "Press 'help' to get a list of all commands.";

/// Password prompt, matched case-insensitively.
pub const PASSWORD_PROMPT: &str = r"(?i)please enter password:";

/// Reply the console prints after a wrong password.
pub const PASSWORD_INCORRECT: &str = r"(?i)password incorrect";

/// Status queries sent after the banner, in order: game time, list players.
pub const QUERY_COMMANDS: &[&str] = &["gt", "lp"];

/// Line terminator appended to everything written to the console.
pub const LINE_ENDING: &str = "\n";

/// Default telnet console port of the game server.
pub const DEFAULT_TELNET_PORT: u16 = 8081;

/// Wall-clock bound on one poll cycle.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(50);

/// Silence on the socket longer than this raises a transport timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Discord REST API root.
pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Runtime configuration for one invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telnet: TelnetConfig,
    pub channel_id: String,
    pub bot_token: String,
    pub api_base: String,
    pub deadline: Duration,
    pub verbose: bool,
    /// Where to write the JSONL recording of the cycle, if anywhere.
    pub record_path: Option<PathBuf>,
    pub record_level: SessionRecordLevel,
}

impl AppConfig {
    /// Loads configuration from the process environment, reading `.env` first
    /// when present.
    pub fn from_env() -> Result<Self, SessionError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(err) => debug!("No .env file loaded: {}", err),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SessionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, SessionError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| SessionError::Config(format!("{key} is not set")))
        };

        let port = match lookup("TELNET_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|err| {
                SessionError::Config(format!("TELNET_PORT '{raw}' is not a port: {err}"))
            })?,
            None => DEFAULT_TELNET_PORT,
        };

        let deadline = parse_secs(&lookup, "POLL_DEADLINE_SECS")?.unwrap_or(DEFAULT_DEADLINE);
        let idle_timeout =
            parse_secs(&lookup, "TELNET_IDLE_TIMEOUT_SECS")?.unwrap_or(DEFAULT_IDLE_TIMEOUT);

        let verbose = lookup("DEBUG")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let record_path = lookup("SESSION_RECORD_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let record_level = match lookup("SESSION_RECORD_LEVEL") {
            Some(raw) => raw.parse()?,
            None => SessionRecordLevel::Full,
        };

        Ok(Self {
            telnet: TelnetConfig {
                host: required("TELNET_HOST")?,
                port,
                password: required("TELNET_PASSWORD")?,
                idle_timeout,
            },
            channel_id: required("DISCORD_CHANNEL_ID")?,
            bot_token: required("DISCORD_BOT_TOKEN")?,
            api_base: lookup("DISCORD_API_BASE")
                .unwrap_or_else(|| DEFAULT_DISCORD_API_BASE.to_string()),
            deadline,
            verbose,
            record_path,
            record_level,
        })
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, SessionError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|err| SessionError::Config(format!("{key} '{raw}' is invalid: {err}")))
        })
        .transpose()
}
