use super::*;

use crate::publish::Publisher;

/// Drives one poll cycle: connect, log in, query, accumulate, publish.
///
/// Every way the cycle can end goes through a [`Resolver`]. The deadline
/// timer runs as its own task holding a resolver clone, so whichever of
/// "snapshot published", "transport failed", "remote closed" or "deadline
/// elapsed" resolves first is the outcome; the rest are discarded. The
/// transport is destroyed exactly once after resolution.
pub struct SessionController {
    options: SessionOptions,
    recorder: Option<SessionRecorder>,
}

/// Per-run state. Created when a cycle starts and dropped when it resolves.
struct Cycle {
    state: SessionState,
    snapshot: StatusSnapshot,
    recorder: Option<SessionRecorder>,
}

/// What to do after a transport event has been applied to the cycle.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Wait,
    Query,
    Publish(String),
    QueryAndPublish(String),
    Resolve(ResolveReason),
}

#[derive(Debug, PartialEq, Eq)]
enum ResolveReason {
    LoginFailure,
    IdleTimeout,
    Closed,
    Error(String),
}

impl Cycle {
    fn new(recorder: Option<SessionRecorder>) -> Self {
        Self {
            state: SessionState::Connecting,
            snapshot: StatusSnapshot::new(),
            recorder,
        }
    }

    fn record(&self, event: SessionEvent) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(event);
        }
    }

    fn transition(&mut self, state: SessionState) {
        if self.state == state || self.state.is_terminal() {
            return;
        }
        debug!("Session state {} -> {}", self.state, state);
        self.state = state;
        self.record(SessionEvent::StateChanged { state });
    }

    /// Applies one transport event. Parsing does not depend on the state:
    /// every chunk is scanned for both the banner and the status fields.
    fn on_event(&mut self, event: TransportEvent) -> Step {
        match event {
            TransportEvent::Data(chunk) => {
                trace!("Received data: {:?}", chunk);
                let fields = self.snapshot.ingest(&chunk);
                if !fields.is_empty() {
                    self.record(SessionEvent::FieldsCaptured { fields });
                }

                let banner = status::is_banner(&chunk);
                if banner && self.state == SessionState::Authenticating {
                    self.transition(SessionState::AwaitingBanner);
                }

                match (banner, self.snapshot.topic()) {
                    (true, Some(topic)) => Step::QueryAndPublish(topic),
                    (false, Some(topic)) => Step::Publish(topic),
                    (true, None) => Step::Query,
                    (false, None) => {
                        debug!(
                            "Data incomplete, waiting for more... missing {:?}",
                            self.snapshot.missing()
                        );
                        Step::Wait
                    }
                }
            }
            TransportEvent::Ready => {
                debug!("Telnet connection established.");
                if self.state == SessionState::Authenticating {
                    self.transition(SessionState::AwaitingBanner);
                }
                Step::Wait
            }
            TransportEvent::FailedLogin => Step::Resolve(ResolveReason::LoginFailure),
            TransportEvent::Timeout => Step::Resolve(ResolveReason::IdleTimeout),
            TransportEvent::Close => Step::Resolve(ResolveReason::Closed),
            TransportEvent::Error(message) => Step::Resolve(ResolveReason::Error(message)),
        }
    }

    fn conclude(&mut self, reason: ResolveReason, idle_timeout: Duration) -> SessionOutcome {
        let err = match reason {
            ResolveReason::Closed => {
                self.transition(SessionState::Disconnected);
                return SessionOutcome::Disconnected;
            }
            ResolveReason::LoginFailure => SessionError::LoginFailure,
            ResolveReason::IdleTimeout => SessionError::IdleTimeout(idle_timeout),
            ResolveReason::Error(message) => ConnectionError::from_message(message).into(),
        };
        self.transition(SessionState::Failed);
        SessionOutcome::Failure(err)
    }
}

impl SessionController {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            recorder: None,
        }
    }

    /// Records state changes, commands and the outcome of every run.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Runs one poll cycle to its single outcome.
    pub async fn run<C, P>(&self, connector: &C, publisher: &P) -> SessionOutcome
    where
        C: Connector,
        P: Publisher + ?Sized,
    {
        let (resolver, mut outcome_rx) = Resolver::channel();
        let deadline_task = arm_deadline(resolver.clone(), self.options.deadline);

        let mut cycle = Cycle::new(self.recorder.clone());
        let addr = self.options.telnet.addr();
        debug!("Connecting to {}", addr);

        let connected = tokio::select! {
            biased;
            outcome = &mut outcome_rx => {
                cycle.transition(SessionState::TimedOut);
                return self.finish(outcome, None::<&mut C::Transport>, &mut cycle, deadline_task).await;
            }
            connected = connector.connect(&self.options.telnet) => connected,
        };

        let mut transport = match connected {
            Ok(transport) => transport,
            Err(err) => {
                cycle.transition(SessionState::Failed);
                resolver.resolve(SessionOutcome::Failure(err));
                let outcome = (&mut outcome_rx).await;
                return self
                    .finish(outcome, None::<&mut C::Transport>, &mut cycle, deadline_task)
                    .await;
            }
        };
        cycle.transition(SessionState::Authenticating);

        let outcome = loop {
            let event = tokio::select! {
                biased;
                outcome = &mut outcome_rx => break outcome,
                event = transport.next_event() => event,
            };

            let (query, topic) = match cycle.on_event(event) {
                Step::Wait => continue,
                Step::Resolve(reason) => {
                    resolver.resolve(cycle.conclude(reason, self.options.telnet.idle_timeout));
                    continue;
                }
                Step::Query => (true, None),
                Step::QueryAndPublish(topic) => (true, Some(topic)),
                Step::Publish(topic) => (false, Some(topic)),
            };

            if query {
                let sent = tokio::select! {
                    biased;
                    outcome = &mut outcome_rx => break outcome,
                    sent = send_queries(&mut transport, &mut cycle) => sent,
                };
                if let Err(err) = sent {
                    cycle.transition(SessionState::Failed);
                    resolver.resolve(SessionOutcome::Failure(err));
                    continue;
                }
            }

            let Some(topic) = topic else { continue };
            if resolver.is_resolved() {
                continue;
            }

            let snapshot = &cycle.snapshot;
            info!(
                "Players Online: {}/{}",
                snapshot.players.as_deref().unwrap_or_default(),
                snapshot.max_players.as_deref().unwrap_or_default()
            );
            info!(
                "In-game time: Day {}, {}",
                snapshot.day.as_deref().unwrap_or_default(),
                snapshot.time.as_deref().unwrap_or_default()
            );

            let published = tokio::select! {
                biased;
                outcome = &mut outcome_rx => break outcome,
                published = publisher.publish(&self.options.channel_id, &topic) => published,
            };

            match published {
                Ok(()) => {
                    info!("Channel topic updated successfully.");
                    cycle.record(SessionEvent::TopicPublished {
                        topic: topic.clone(),
                        success: true,
                        error: None,
                    });
                    cycle.transition(SessionState::Complete);
                    resolver.resolve(SessionOutcome::Success(topic));
                }
                Err(err) => {
                    cycle.record(SessionEvent::TopicPublished {
                        topic,
                        success: false,
                        error: Some(err.to_string()),
                    });
                    cycle.transition(SessionState::Failed);
                    resolver.resolve(SessionOutcome::Failure(err.into()));
                }
            }
        };

        if matches!(outcome, Ok(SessionOutcome::Timeout)) {
            cycle.transition(SessionState::TimedOut);
        }
        self.finish(outcome, Some(&mut transport), &mut cycle, deadline_task)
            .await
    }

    async fn finish<T: Transport>(
        &self,
        outcome: Result<SessionOutcome, oneshot::error::RecvError>,
        transport: Option<&mut T>,
        cycle: &mut Cycle,
        deadline_task: tokio::task::JoinHandle<()>,
    ) -> SessionOutcome {
        deadline_task.abort();
        if let Some(transport) = transport {
            transport.destroy().await;
        }

        let outcome = outcome.unwrap_or_else(|_| {
            SessionOutcome::Failure(SessionError::Send("outcome channel closed".to_string()))
        });
        cycle.record(SessionEvent::Resolved {
            outcome: outcome.to_string(),
        });
        debug!("Session resolved in state {}: {}", cycle.state, outcome);
        outcome
    }
}

/// Spawns the deadline timer. It resolves [`SessionOutcome::Timeout`] unless
/// something else resolved first.
fn arm_deadline(resolver: Resolver, deadline: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        if resolver.resolve(SessionOutcome::Timeout) {
            warn!("Session deadline of {:?} elapsed - cleaning up", deadline);
        }
    })
}

/// Sends the status queries in order, stopping at the first write error.
async fn send_queries<T: Transport>(transport: &mut T, cycle: &mut Cycle) -> Result<(), SessionError> {
    for command in config::QUERY_COMMANDS {
        transport.send(command).await?;
        cycle.record(SessionEvent::CommandSent {
            command: command.to_string(),
        });
    }
    debug!("Sent {:?} commands.", config::QUERY_COMMANDS);
    cycle.transition(SessionState::QuerySent);
    Ok(())
}
