use super::*;

use once_cell::sync::Lazy;
use regex::Regex;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

static PASSWORD_PROMPT: Lazy<Regex> = Lazy::new(|| compile(config::PASSWORD_PROMPT));
static PASSWORD_INCORRECT: Lazy<Regex> = Lazy::new(|| compile(config::PASSWORD_INCORRECT));

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(err) => panic!("invalid login regex '{pattern}': {err}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Data,
    Iac,
    Option(u8),
    Sub,
    SubIac,
}

/// Output of one [`TelnetFilter::feed`] call.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Filtered {
    /// Console text with all telnet commands removed.
    pub text: String,
    /// Negotiation replies that must be written back to the server.
    pub replies: Vec<u8>,
}

/// Strips telnet commands from the byte stream and refuses every option.
///
/// `WILL x` is answered with `DONT x` and `DO x` with `WONT x`; subnegotiation
/// is skipped. State carries across reads, so a command split over two reads
/// is still recognised. Incomplete UTF-8 at the end of a read is held back
/// until the rest arrives.
#[derive(Debug)]
pub struct TelnetFilter {
    state: FilterState,
    pending: Vec<u8>,
}

impl Default for TelnetFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetFilter {
    pub fn new() -> Self {
        Self {
            state: FilterState::Data,
            pending: Vec::new(),
        }
    }

    pub fn feed(&mut self, input: &[u8]) -> Filtered {
        let mut replies = Vec::new();
        let mut data = std::mem::take(&mut self.pending);

        for &byte in input {
            self.state = match (self.state, byte) {
                (FilterState::Data, IAC) => FilterState::Iac,
                (FilterState::Data, b) => {
                    data.push(b);
                    FilterState::Data
                }
                (FilterState::Iac, IAC) => {
                    data.push(IAC);
                    FilterState::Data
                }
                (FilterState::Iac, WILL | WONT | DO | DONT) => FilterState::Option(byte),
                (FilterState::Iac, SB) => FilterState::Sub,
                (FilterState::Iac, _) => FilterState::Data,
                (FilterState::Option(verb), option) => {
                    match verb {
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        _ => {}
                    }
                    trace!("Refused telnet option {} (verb {})", option, verb);
                    FilterState::Data
                }
                (FilterState::Sub, IAC) => FilterState::SubIac,
                (FilterState::Sub, _) => FilterState::Sub,
                (FilterState::SubIac, SE) => FilterState::Data,
                (FilterState::SubIac, _) => FilterState::Sub,
            };
        }

        let text = match std::str::from_utf8(&data) {
            Ok(text) => text.to_string(),
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                self.pending = data.split_off(valid);
                String::from_utf8_lossy(&data).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&data).into_owned(),
        };

        Filtered { text, replies }
    }
}

/// Result of feeding console text to a [`LoginHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    /// Nothing to do yet.
    Pending,
    /// Write this to the console.
    SendPassword(String),
    /// The console accepted the session.
    Ready,
    /// The password was rejected.
    Failed,
    /// Login already finished; the text is ordinary output.
    Done,
}

/// Answers the console password prompt and detects login success or failure.
#[derive(Debug)]
pub struct LoginHandler {
    password: String,
    password_sent: bool,
    finished: bool,
    buffer: String,
}

impl LoginHandler {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            password_sent: false,
            finished: false,
            buffer: String::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds received console text.
    ///
    /// Complete lines are checked for a rejected password; the trailing
    /// incomplete line is checked for the password prompt, which never ends
    /// with a newline.
    pub fn read(&mut self, text: &str) -> LoginStep {
        if self.finished {
            return LoginStep::Done;
        }
        self.buffer.push_str(text);

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer.drain(..=newline_pos).collect::<String>();
            let line = line.trim_end();
            trace!("Login line: '{:?}'", line);

            if self.password_sent && PASSWORD_INCORRECT.is_match(line) {
                return self.fail();
            }
            if status::is_banner(line) {
                self.finished = true;
                self.buffer.clear();
                return LoginStep::Ready;
            }
            if self.password_sent && !line.is_empty() && !PASSWORD_PROMPT.is_match(line) {
                self.finished = true;
                self.buffer.clear();
                return LoginStep::Ready;
            }
        }

        if PASSWORD_PROMPT.is_match(&self.buffer) {
            self.buffer.clear();
            if self.password_sent {
                return self.fail();
            }
            self.password_sent = true;
            debug!("Password prompt received, sending password");
            return LoginStep::SendPassword(format!("{}{}", self.password, config::LINE_ENDING));
        }

        LoginStep::Pending
    }

    fn fail(&mut self) -> LoginStep {
        self.finished = true;
        self.buffer.clear();
        LoginStep::Failed
    }
}
