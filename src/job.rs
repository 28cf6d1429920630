//! One scheduled invocation: poll the console once and publish the topic.

use chrono::Utc;
use log::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{ConnectionError, SessionError};
use crate::publish::{DiscordPublisher, Publisher};
use crate::session::{
    Connector, SessionController, SessionOptions, SessionOutcome, SessionRecorder,
    TelnetConnector,
};

/// Trigger metadata supplied by the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invocation {
    /// The scheduler fired later than planned. Logged only.
    pub past_due: bool,
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        SessionOptions {
            telnet: config.telnet.clone(),
            channel_id: config.channel_id.clone(),
            deadline: config.deadline,
        }
    }
}

/// Runs one poll cycle against the configured server and Discord channel.
///
/// With `SESSION_RECORD_PATH` set, the console traffic and the controller's
/// decisions are written there as JSONL once the cycle has resolved.
pub async fn run_once(config: &AppConfig, invocation: Invocation) -> SessionOutcome {
    let publisher = DiscordPublisher::with_base_url(&config.api_base, config.bot_token.clone());
    let recorder = config
        .record_path
        .as_ref()
        .map(|_| SessionRecorder::new(config.record_level));
    let connector = match recorder.clone() {
        Some(recorder) => TelnetConnector::with_recorder(recorder),
        None => TelnetConnector::new(),
    };
    run_with(config, invocation, &connector, &publisher, recorder).await
}

/// Runs one poll cycle with explicit collaborators and logs the outcome.
///
/// `recorder` should be the one `connector` records into, if any; it is saved
/// to `config.record_path` after the cycle.
pub async fn run_with<C, P>(
    config: &AppConfig,
    invocation: Invocation,
    connector: &C,
    publisher: &P,
    recorder: Option<SessionRecorder>,
) -> SessionOutcome
where
    C: Connector,
    P: Publisher + ?Sized,
{
    if invocation.past_due {
        warn!("Timer function is running late!");
    }
    info!(
        "Status poll started at {} for {}",
        Utc::now().to_rfc3339(),
        config.telnet.addr()
    );

    let mut controller = SessionController::new(SessionOptions::from(config));
    if let Some(recorder) = recorder.clone() {
        controller = controller.with_recorder(recorder);
    }
    let outcome = controller.run(connector, publisher).await;
    report(&outcome);

    if let (Some(recorder), Some(path)) = (recorder, config.record_path.as_deref()) {
        match recorder.save(path).await {
            Ok(()) => info!("Session recording written to {}", path.display()),
            Err(err) => warn!("Failed to save session recording: {}", err),
        }
    }
    outcome
}

/// Logs a user-facing diagnostic for `outcome`.
pub fn report(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Success(topic) => info!("Status poll finished: {}", topic),
        SessionOutcome::Timeout => warn!("Status poll timed out before the topic was published"),
        SessionOutcome::Disconnected => {
            warn!("Telnet connection closed before the topic was published")
        }
        SessionOutcome::Failure(SessionError::Connection(ConnectionError::Refused(_))) => error!(
            "Telnet connection refused. Is the server online and is the Telnet port correct?"
        ),
        SessionOutcome::Failure(err) => error!("Status poll failed: {}", err),
    }
}
