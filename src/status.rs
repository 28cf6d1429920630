//! Status snapshot accumulated from free-text console output.
//!
//! The console answers `gt` and `lp` with human-readable lines. Each chunk
//! received from the server is scanned independently for the three status
//! lines below; whatever matches is folded into a [`StatusSnapshot`]. A chunk
//! that matches nothing is the expected state while waiting for more output.

use std::fmt;

use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::HELP_BANNER;

/// `Max players: 8`
static MAX_PLAYERS: Lazy<Regex> = Lazy::new(|| compile(r"Max players: (\d+)"));

/// `Day 12, 7:45`
static DAY_TIME: Lazy<Regex> = Lazy::new(|| compile(r"Day (\d+), (\d\d?:\d\d)"));

/// `Total of 3 in the game`
static PLAYERS_ONLINE: Lazy<Regex> = Lazy::new(|| compile(r"Total of (\d+) in the game"));

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid status regex '{pattern}': {err}"),
    }
}

/// A status field that can be captured from console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusField {
    Players,
    MaxPlayers,
    Day,
    Time,
}

/// Facts collected during one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StatusSnapshot {
    /// Players currently online, as printed by the server.
    pub players: Option<String>,
    /// Server player limit, as a decimal number without leading zeros.
    pub max_players: Option<String>,
    /// In-game day counter, as printed by the server.
    pub day: Option<String>,
    /// In-game clock, `H:MM` or `HH:MM`.
    pub time: Option<String>,
}

impl StatusSnapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extracts every recognised status line from `chunk`.
    ///
    /// Each pattern is applied independently and matches at most once per
    /// chunk; a match overwrites the field. Returns the fields that were set
    /// by this chunk.
    pub fn ingest(&mut self, chunk: &str) -> Vec<StatusField> {
        let mut captured = Vec::new();

        if let Some(caps) = MAX_PLAYERS.captures(chunk) {
            let max = strip_leading_zeros(&caps[1]);
            debug!("Got max players: {}", max);
            self.max_players = Some(max.to_string());
            captured.push(StatusField::MaxPlayers);
        }

        if let Some(caps) = DAY_TIME.captures(chunk) {
            debug!("Got in-game time: Day {}, {}", &caps[1], &caps[2]);
            self.day = Some(caps[1].to_string());
            self.time = Some(caps[2].to_string());
            captured.extend([StatusField::Day, StatusField::Time]);
        }

        if let Some(caps) = PLAYERS_ONLINE.captures(chunk) {
            debug!("Got players online: {}", &caps[1]);
            self.players = Some(caps[1].to_string());
            captured.push(StatusField::Players);
        }

        if captured.is_empty() {
            trace!("No status fields in chunk");
        }
        captured
    }

    /// Returns true once all four fields have been captured.
    pub fn is_complete(&self) -> bool {
        self.players.is_some()
            && self.max_players.is_some()
            && self.day.is_some()
            && self.time.is_some()
    }

    /// Fields still missing from the snapshot.
    pub fn missing(&self) -> Vec<StatusField> {
        let mut missing = Vec::new();
        if self.players.is_none() {
            missing.push(StatusField::Players);
        }
        if self.max_players.is_none() {
            missing.push(StatusField::MaxPlayers);
        }
        if self.day.is_none() {
            missing.push(StatusField::Day);
        }
        if self.time.is_none() {
            missing.push(StatusField::Time);
        }
        missing
    }

    /// Renders the channel topic, or `None` while the snapshot is incomplete.
    pub fn topic(&self) -> Option<String> {
        self.is_complete().then(|| self.to_string())
    }
}

impl fmt::Display for StatusSnapshot {
    /// `Players: {players}/{max_players} | Day {day}, {time}`; missing fields
    /// render as `?`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Players: {}/{} | Day {}, {}",
            self.players.as_deref().unwrap_or("?"),
            self.max_players.as_deref().unwrap_or("?"),
            self.day.as_deref().unwrap_or("?"),
            self.time.as_deref().unwrap_or("?"),
        )
    }
}

/// `"008"` becomes `"8"`, `"000"` becomes `"0"`. The value is never narrowed
/// to a fixed-width integer, so any digit run the pattern accepts is kept.
fn strip_leading_zeros(digits: &str) -> &str {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() && !digits.is_empty() {
        "0"
    } else {
        trimmed
    }
}

/// Returns true if `chunk` contains the console's help banner.
pub fn is_banner(chunk: &str) -> bool {
    chunk.contains(HELP_BANNER)
}
