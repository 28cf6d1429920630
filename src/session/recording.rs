//! Session recording and offline replay.
//!
//! A [`SessionRecorder`] collects what happened during one poll cycle: the
//! transport notifications seen by the telnet client plus the controller's
//! state changes, commands and publish result. Recordings are JSONL, one
//! [`SessionRecordEntry`] per line, and can be written next to the job with
//! `SESSION_RECORD_PATH`. A saved recording is replayed by
//! [`ReplayConnector`], which feeds the recorded transport notifications back
//! to the controller without a server.

use super::*;
use std::collections::VecDeque;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

/// How much of a cycle is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionRecordLevel {
    Off,
    /// Everything except raw console text.
    KeyEventsOnly,
    /// Everything, including raw console text. Required for replay.
    #[default]
    Full,
}

impl FromStr for SessionRecordLevel {
    type Err = SessionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "key" | "key_events_only" => Ok(Self::KeyEventsOnly),
            "full" => Ok(Self::Full),
            other => Err(SessionError::Config(format!(
                "unknown recording level '{other}' (expected off, key or full)"
            ))),
        }
    }
}

/// One line of a recording.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    /// Milliseconds since the recorder was created.
    pub at_ms: u64,
    pub event: SessionEvent,
}

/// Everything a recording can contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        addr: String,
    },
    ConnectionClosed {
        reason: String,
    },
    RawChunk {
        data: String,
    },
    LoginReady,
    LoginFailed,
    IdleTimeout,
    RemoteClosed,
    TransportError {
        message: String,
    },
    StateChanged {
        state: SessionState,
    },
    CommandSent {
        command: String,
    },
    FieldsCaptured {
        fields: Vec<StatusField>,
    },
    TopicPublished {
        topic: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Resolved {
        outcome: String,
    },
}

impl SessionEvent {
    /// Transport notification this entry was recorded from, if any.
    fn to_transport_event(&self) -> Option<TransportEvent> {
        match self {
            Self::RawChunk { data } => Some(TransportEvent::Data(data.clone())),
            Self::LoginReady => Some(TransportEvent::Ready),
            Self::LoginFailed => Some(TransportEvent::FailedLogin),
            Self::IdleTimeout => Some(TransportEvent::Timeout),
            Self::RemoteClosed => Some(TransportEvent::Close),
            Self::TransportError { message } => Some(TransportEvent::Error(message.clone())),
            _ => None,
        }
    }

    fn from_transport_event(event: &TransportEvent) -> Self {
        match event {
            TransportEvent::Data(data) => Self::RawChunk { data: data.clone() },
            TransportEvent::Ready => Self::LoginReady,
            TransportEvent::FailedLogin => Self::LoginFailed,
            TransportEvent::Timeout => Self::IdleTimeout,
            TransportEvent::Close => Self::RemoteClosed,
            TransportEvent::Error(message) => Self::TransportError {
                message: message.clone(),
            },
        }
    }
}

/// Shared, clonable event log for one poll cycle.
///
/// Clones append to the same log, so the telnet client and the controller can
/// each hold one.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    started: Instant,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    pub fn new(level: SessionRecordLevel) -> Self {
        Self::with_entries(level, Vec::new())
    }

    fn with_entries(level: SessionRecordLevel, entries: Vec<SessionRecordEntry>) -> Self {
        Self {
            level,
            started: Instant::now(),
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    fn log(&self) -> Result<MutexGuard<'_, Vec<SessionRecordEntry>>, SessionError> {
        self.entries
            .lock()
            .map_err(|_| SessionError::Record("recording lock poisoned".to_string()))
    }

    /// Appends `event` unless the level filters it out.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), SessionError> {
        let keep = match self.level {
            SessionRecordLevel::Off => false,
            SessionRecordLevel::KeyEventsOnly => !matches!(event, SessionEvent::RawChunk { .. }),
            SessionRecordLevel::Full => true,
        };
        if !keep {
            return Ok(());
        }
        let at_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.log()?.push(SessionRecordEntry { at_ms, event });
        Ok(())
    }

    pub fn record_transport_event(&self, event: &TransportEvent) -> Result<(), SessionError> {
        self.record_event(SessionEvent::from_transport_event(event))
    }

    /// Copy of everything recorded so far.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, SessionError> {
        Ok(self.log()?.clone())
    }

    /// Encodes the recording as JSONL, one entry per line.
    pub fn to_jsonl(&self) -> Result<String, SessionError> {
        self.log()?
            .iter()
            .map(|entry| {
                serde_json::to_string(entry)
                    .map(|line| line + "\n")
                    .map_err(|e| SessionError::Record(format!("cannot encode entry: {e}")))
            })
            .collect()
    }

    /// Decodes a JSONL recording. Blank lines are skipped.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, SessionError> {
        let entries = jsonl
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| {
                    SessionError::Record(format!("recording line {}: {e}", index + 1))
                })
            })
            .collect::<Result<Vec<SessionRecordEntry>, _>>()?;
        Ok(Self::with_entries(SessionRecordLevel::Full, entries))
    }

    /// Writes the recording to `path`, replacing any previous file.
    pub async fn save(&self, path: &Path) -> Result<(), SessionError> {
        let jsonl = self.to_jsonl()?;
        tokio::fs::write(path, jsonl)
            .await
            .map_err(|e| SessionError::Record(format!("cannot write {}: {e}", path.display())))
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Offline connector that replays a recording instead of opening a socket.
///
/// Each `connect` yields a fresh [`ReplayTransport`] over the recorded
/// transport events. Lines written to the transport are collected and can be
/// inspected with [`ReplayConnector::sent`].
#[derive(Debug, Clone)]
pub struct ReplayConnector {
    events: Vec<TransportEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    destroyed: Arc<Mutex<usize>>,
}

impl ReplayConnector {
    /// Build a connector from a recorder snapshot.
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let events = recorder
            .entries()
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| entry.event.to_transport_event())
            .collect();
        Self {
            events,
            sent: Arc::new(Mutex::new(Vec::new())),
            destroyed: Arc::new(Mutex::new(0)),
        }
    }

    /// Build a connector from JSONL recording data.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, SessionError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Loads a recording written by [`SessionRecorder::save`].
    pub async fn load(path: &Path) -> Result<Self, SessionError> {
        let jsonl = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SessionError::Record(format!("cannot read {}: {e}", path.display())))?;
        Self::from_jsonl(&jsonl)
    }

    /// Number of recorded transport events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Lines written by the session, across all replayed connections.
    pub fn sent(&self) -> Vec<String> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of times a replayed transport was destroyed.
    pub fn destroy_count(&self) -> usize {
        match self.destroyed.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Connector for ReplayConnector {
    type Transport = ReplayTransport;

    async fn connect(&self, config: &TelnetConfig) -> Result<ReplayTransport, SessionError> {
        debug!("Replaying {} events for {}", self.events.len(), config.addr());
        Ok(ReplayTransport {
            events: self.events.iter().cloned().collect(),
            sent: self.sent.clone(),
            destroyed: self.destroyed.clone(),
            closed: false,
        })
    }
}

/// Transport that yields recorded events in order.
///
/// Once the recording is exhausted it stays silent, like a server that keeps
/// the connection open without sending anything.
#[derive(Debug)]
pub struct ReplayTransport {
    events: VecDeque<TransportEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    destroyed: Arc<Mutex<usize>>,
    closed: bool,
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn send(&mut self, line: &str) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::ConnectionClosed);
        }
        let mut guard = self
            .sent
            .lock()
            .map_err(|e| SessionError::Send(format!("replay lock error: {e}")))?;
        guard.push(line.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        if self.closed {
            return TransportEvent::Close;
        }
        match self.events.pop_front() {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn destroy(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.destroyed.lock() {
            Ok(mut guard) => *guard += 1,
            Err(poisoned) => *poisoned.into_inner() += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDED: &str = r#"{"at_ms":0,"event":{"kind":"connection_established","addr":"127.0.0.1:8081"}}
{"at_ms":3,"event":{"kind":"raw_chunk","data":"Please enter password:"}}

{"at_ms":4,"event":{"kind":"login_ready"}}
{"at_ms":9,"event":{"kind":"state_changed","state":"query_sent"}}
{"at_ms":9,"event":{"kind":"command_sent","command":"gt"}}
"#;

    #[test]
    fn jsonl_keeps_entry_order() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        for event in [
            SessionEvent::CommandSent {
                command: "gt".to_string(),
            },
            SessionEvent::CommandSent {
                command: "lp".to_string(),
            },
        ] {
            recorder.record_event(event).expect("record");
        }

        let jsonl = recorder.to_jsonl().expect("encode");
        assert_eq!(jsonl.lines().count(), 2);
        assert!(jsonl.ends_with('\n'));

        let events: Vec<_> = SessionRecorder::from_jsonl(&jsonl)
            .expect("decode")
            .entries()
            .expect("entries")
            .into_iter()
            .map(|entry| entry.event)
            .collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::CommandSent {
                    command: "gt".to_string()
                },
                SessionEvent::CommandSent {
                    command: "lp".to_string()
                },
            ]
        );
    }

    #[test]
    fn key_events_only_skips_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        recorder
            .record_transport_event(&TransportEvent::Data("Max players: 8".to_string()))
            .expect("record chunk");
        recorder
            .record_transport_event(&TransportEvent::Ready)
            .expect("record ready");

        let entries = recorder.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, SessionEvent::LoginReady);
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);
        recorder
            .record_event(SessionEvent::LoginFailed)
            .expect("record");

        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn level_names_parse() {
        assert_eq!("off".parse::<SessionRecordLevel>().ok(), Some(SessionRecordLevel::Off));
        assert_eq!(
            " Key ".parse::<SessionRecordLevel>().ok(),
            Some(SessionRecordLevel::KeyEventsOnly)
        );
        assert_eq!("FULL".parse::<SessionRecordLevel>().ok(), Some(SessionRecordLevel::Full));
        assert!(matches!(
            "verbose".parse::<SessionRecordLevel>(),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = SessionRecorder::from_jsonl("\n{\"at_ms\":1}\n").expect_err("should fail");
        assert!(matches!(err, SessionError::Record(msg) if msg.starts_with("recording line 2")));
    }

    #[tokio::test]
    async fn saved_recording_loads_into_replay() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cycle.jsonl");
        let recorder = SessionRecorder::from_jsonl(RECORDED).expect("decode");
        recorder.save(&path).await.expect("save");

        let connector = ReplayConnector::load(&path).await.expect("load");
        assert_eq!(connector.len(), 2);

        let missing = ReplayConnector::load(&dir.path().join("absent.jsonl")).await;
        assert!(matches!(missing, Err(SessionError::Record(_))));
    }

    #[tokio::test]
    async fn replay_transport_yields_transport_events_only() {
        let connector = ReplayConnector::from_jsonl(RECORDED).expect("fixture");
        assert_eq!(connector.len(), 2);

        let config = TelnetConfig {
            host: "replay".to_string(),
            port: 0,
            password: String::new(),
            idle_timeout: Duration::from_secs(5),
        };
        let mut transport = connector.connect(&config).await.expect("connect");

        assert_eq!(
            transport.next_event().await,
            TransportEvent::Data("Please enter password:".to_string())
        );
        assert_eq!(transport.next_event().await, TransportEvent::Ready);

        transport.send("gt").await.expect("send");
        transport.destroy().await;
        transport.destroy().await;

        assert_eq!(connector.sent(), vec!["gt".to_string()]);
        assert_eq!(connector.destroy_count(), 1);
        assert_eq!(transport.next_event().await, TransportEvent::Close);
        assert!(transport.send("lp").await.is_err());
    }
}
