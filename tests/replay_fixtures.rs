use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use topicwatch::config::AppConfig;
use topicwatch::error::{PublishError, SessionError};
use topicwatch::job::{self, Invocation};
use topicwatch::publish::Publisher;
use topicwatch::session::{
    ReplayConnector, SessionController, SessionEvent, SessionOptions, SessionOutcome,
    SessionRecorder, TelnetConfig, TelnetConnector,
};

const SUCCESS_FIXTURE: &str = include_str!("fixtures/poll_success.jsonl");
const NO_BANNER_FIXTURE: &str = include_str!("fixtures/poll_no_banner.jsonl");
const LOGIN_FAILED_FIXTURE: &str = include_str!("fixtures/poll_login_failed.jsonl");
const CLOSED_FIXTURE: &str = include_str!("fixtures/poll_closed.jsonl");

/// Collects every published topic and answers with a fixed result.
#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
    reject: Option<PublishError>,
}

impl RecordingPublisher {
    fn rejecting(err: PublishError) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            reject: Some(err),
        }
    }

    fn published(&self) -> Vec<(String, String)> {
        self.published.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, channel_id: &str, topic: &str) -> Result<(), PublishError> {
        self.published
            .lock()
            .expect("lock")
            .push((channel_id.to_string(), topic.to_string()));
        match &self.reject {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn options() -> SessionOptions {
    SessionOptions {
        telnet: TelnetConfig {
            host: "10.0.0.5".to_string(),
            port: 8081,
            password: "hunter2".to_string(),
            idle_timeout: Duration::from_secs(5),
        },
        channel_id: "424242".to_string(),
        deadline: Duration::from_secs(50),
    }
}

#[tokio::test]
async fn recorded_poll_publishes_topic() {
    let connector = ReplayConnector::from_jsonl(SUCCESS_FIXTURE).expect("load fixture");
    let publisher = RecordingPublisher::default();

    let outcome = SessionController::new(options())
        .run(&connector, &publisher)
        .await;

    match outcome {
        SessionOutcome::Success(topic) => assert_eq!(topic, "Players: 3/8 | Day 12, 07:45"),
        other => panic!("unexpected outcome: {other}"),
    }
    assert_eq!(
        publisher.published(),
        vec![(
            "424242".to_string(),
            "Players: 3/8 | Day 12, 07:45".to_string()
        )]
    );
    assert_eq!(connector.sent(), vec!["gt", "lp"]);
    assert_eq!(connector.destroy_count(), 1);
}

#[tokio::test]
async fn rejected_publish_fails_the_cycle() {
    let connector = ReplayConnector::from_jsonl(SUCCESS_FIXTURE).expect("load fixture");
    let publisher = RecordingPublisher::rejecting(PublishError::Rejected {
        status: 403,
        body: r#"{"message":"Missing Permissions"}"#.to_string(),
    });

    let outcome = SessionController::new(options())
        .run(&connector, &publisher)
        .await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failure(SessionError::Publish(PublishError::Rejected {
            status: 403,
            ..
        }))
    ));
    assert_eq!(publisher.published().len(), 1);
    assert_eq!(connector.destroy_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn missing_banner_runs_into_deadline() {
    let connector = ReplayConnector::from_jsonl(NO_BANNER_FIXTURE).expect("load fixture");
    let publisher = RecordingPublisher::default();

    let outcome = SessionController::new(options())
        .run(&connector, &publisher)
        .await;

    assert!(matches!(outcome, SessionOutcome::Timeout));
    assert!(connector.sent().is_empty());
    assert!(publisher.published().is_empty());
    assert_eq!(connector.destroy_count(), 1);
}

#[tokio::test]
async fn rejected_password_is_a_login_failure() {
    let connector = ReplayConnector::from_jsonl(LOGIN_FAILED_FIXTURE).expect("load fixture");
    let publisher = RecordingPublisher::default();

    let outcome = SessionController::new(options())
        .run(&connector, &publisher)
        .await;

    assert!(matches!(
        outcome,
        SessionOutcome::Failure(SessionError::LoginFailure)
    ));
    assert!(connector.sent().is_empty());
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn server_closing_mid_cycle_is_not_a_failure() {
    let connector = ReplayConnector::from_jsonl(CLOSED_FIXTURE).expect("load fixture");
    let publisher = RecordingPublisher::default();

    let outcome = SessionController::new(options())
        .run(&connector, &publisher)
        .await;

    assert!(matches!(outcome, SessionOutcome::Disconnected));
    assert!(!outcome.is_failure());
    assert_eq!(connector.sent(), vec!["gt", "lp"]);
    assert!(publisher.published().is_empty());
    assert_eq!(connector.destroy_count(), 1);
}

async fn read_line(socket: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        socket.read_exact(&mut byte).await.expect("read");
        if byte[0] == b'\n' {
            return String::from_utf8(line).expect("utf8");
        }
        line.push(byte[0]);
    }
}

/// Minimal console: password, banner, then answers `gt` and `lp`.
async fn serve_console(listener: TcpListener) -> Vec<String> {
    let (mut socket, _) = listener.accept().await.expect("accept");
    socket
        .write_all(b"Please enter password:")
        .await
        .expect("prompt");
    let mut received = vec![read_line(&mut socket).await];
    socket
        .write_all(
            b"Logon successful.\r\nMax players: 8\r\n\
              Press 'help' to get a list of all commands. Press 'exit' to end session.\r\n",
        )
        .await
        .expect("banner");

    received.push(read_line(&mut socket).await);
    socket.write_all(b"Day 12, 07:45\r\n").await.expect("gt reply");
    received.push(read_line(&mut socket).await);
    socket
        .write_all(b"0. id=171, Survivor\r\nTotal of 1 in the game\r\n")
        .await
        .expect("lp reply");

    let mut rest = Vec::new();
    let _ = socket.read_to_end(&mut rest).await;
    received
}

#[tokio::test]
async fn live_session_recording_replays_to_the_same_topic() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port().to_string();
    let server = tokio::spawn(serve_console(listener));

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("live.jsonl");
    let path_value = path.display().to_string();
    let config = AppConfig::from_lookup(|key| match key {
        "TELNET_HOST" => Some("127.0.0.1".to_string()),
        "TELNET_PORT" => Some(port.clone()),
        "TELNET_PASSWORD" => Some("hunter2".to_string()),
        "DISCORD_CHANNEL_ID" => Some("424242".to_string()),
        "DISCORD_BOT_TOKEN" => Some("token".to_string()),
        "SESSION_RECORD_PATH" => Some(path_value.clone()),
        _ => None,
    })
    .expect("config");

    let recorder = SessionRecorder::new(config.record_level);
    let live_publisher = RecordingPublisher::default();
    let outcome = job::run_with(
        &config,
        Invocation::default(),
        &TelnetConnector::with_recorder(recorder.clone()),
        &live_publisher,
        Some(recorder),
    )
    .await;

    let expected = "Players: 1/8 | Day 12, 07:45".to_string();
    assert!(matches!(&outcome, SessionOutcome::Success(topic) if *topic == expected));
    assert_eq!(
        server.await.expect("server"),
        vec!["hunter2".to_string(), "gt".to_string(), "lp".to_string()]
    );

    assert_eq!(live_publisher.published().len(), 1);

    let saved = std::fs::read_to_string(&path).expect("read recording");
    let saved = SessionRecorder::from_jsonl(&saved).expect("decode recording");
    assert!(saved.entries().expect("entries").iter().any(|entry| matches!(
        &entry.event,
        SessionEvent::TopicPublished { success: true, .. }
    )));

    let connector = ReplayConnector::load(&path).await.expect("load recording");
    let replay_publisher = RecordingPublisher::default();
    let replayed = SessionController::new(options())
        .run(&connector, &replay_publisher)
        .await;

    assert!(matches!(&replayed, SessionOutcome::Success(topic) if *topic == expected));
    assert_eq!(connector.sent(), vec!["gt", "lp"]);
    assert_eq!(
        replay_publisher.published(),
        vec![("424242".to_string(), expected)]
    );
}

#[test]
fn fixtures_only_replay_transport_events() {
    let connector = ReplayConnector::from_jsonl(SUCCESS_FIXTURE).expect("load fixture");
    // connection_established, state_changed and command_sent are not replayed.
    assert_eq!(connector.len(), 6);
}
