use super::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// Grace period for the `exit` command before the I/O task is aborted.
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Opens [`TelnetClient`] connections.
#[derive(Debug, Clone, Default)]
pub struct TelnetConnector {
    recorder: Option<SessionRecorder>,
}

impl TelnetConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every connection opened by this connector.
    pub fn with_recorder(recorder: SessionRecorder) -> Self {
        Self {
            recorder: Some(recorder),
        }
    }
}

#[async_trait]
impl Connector for TelnetConnector {
    type Transport = TelnetClient;

    async fn connect(&self, config: &TelnetConfig) -> Result<TelnetClient, SessionError> {
        TelnetClient::connect(config, self.recorder.clone()).await
    }
}

/// A telnet console connection.
///
/// A spawned I/O task owns the socket: it writes queued lines, strips telnet
/// negotiation from reads, answers the password prompt and forwards
/// [`TransportEvent`]s over a channel.
pub struct TelnetClient {
    addr: String,
    sender: mpsc::Sender<String>,
    events: mpsc::Receiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
    recorder: Option<SessionRecorder>,
}

impl TelnetClient {
    /// Connects to the console and starts the I/O task.
    pub async fn connect(
        config: &TelnetConfig,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, SessionError> {
        let addr = config.addr();
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(ConnectionError::from)?;
        debug!("{} TCP connection successful", addr);

        if let Some(recorder) = recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionEstablished {
                addr: addr.clone(),
            });
        }

        let (sender_to_socket, receiver_from_user) = mpsc::channel::<String>(32);
        let (sender_to_user, receiver_from_socket) = mpsc::channel::<TransportEvent>(256);

        let task = tokio::spawn(io_loop(
            stream,
            addr.clone(),
            LoginHandler::new(config.password.clone()),
            config.idle_timeout,
            receiver_from_user,
            sender_to_user,
            recorder.clone(),
        ));

        Ok(Self {
            addr,
            sender: sender_to_socket,
            events: receiver_from_socket,
            task: Some(task),
            recorder,
        })
    }

    /// Returns true until [`Transport::destroy`] has been called.
    pub fn is_connected(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TelnetClient {
    async fn send(&mut self, line: &str) -> Result<(), SessionError> {
        if self.task.is_none() {
            return Err(SessionError::ConnectionClosed);
        }
        trace!("{} Sending: '{:?}'", self.addr, line);
        self.sender
            .send(format!("{}{}", line, config::LINE_ENDING))
            .await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        self.events.recv().await.unwrap_or(TransportEvent::Close)
    }

    async fn destroy(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        debug!("{} Closing telnet connection...", self.addr);

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                reason: "client_destroy_called".to_string(),
            });
        }

        // Stop receiving new data, then try a graceful exit.
        self.events.close();
        if let Err(e) = self.sender.try_send(format!("exit{}", config::LINE_ENDING)) {
            debug!("{} Failed to send exit command: {:?}", self.addr, e);
        }

        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        debug!("{} Telnet connection closed", self.addr);
    }
}

impl Drop for TelnetClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn io_loop(
    stream: TcpStream,
    addr: String,
    mut login: LoginHandler,
    idle_timeout: Duration,
    mut receiver_from_user: mpsc::Receiver<String>,
    sender_to_user: mpsc::Sender<TransportEvent>,
    recorder: Option<SessionRecorder>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut filter = TelnetFilter::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let mut events = Vec::new();
        tokio::select! {
            Some(data) = receiver_from_user.recv() => {
                if let Err(e) = writer.write_all(data.as_bytes()).await {
                    debug!("{} Failed to send data to console: {:?}", addr, e);
                    events.push(TransportEvent::Error(e.to_string()));
                }
            },
            read = tokio::time::timeout(idle_timeout, reader.read(&mut buf)) => {
                match read {
                    Err(_) => {
                        debug!("{} No data for {:?}", addr, idle_timeout);
                        events.push(TransportEvent::Timeout);
                    }
                    Ok(Ok(0)) => {
                        debug!("{} Console sent EOF.", addr);
                        events.push(TransportEvent::Close);
                    }
                    Ok(Ok(n)) => {
                        let filtered = filter.feed(&buf[..n]);
                        if !filtered.replies.is_empty()
                            && let Err(e) = writer.write_all(&filtered.replies).await
                        {
                            events.push(TransportEvent::Error(e.to_string()));
                        }
                        if !filtered.text.is_empty() {
                            match login.read(&filtered.text) {
                                LoginStep::SendPassword(password) => {
                                    if let Err(e) = writer.write_all(password.as_bytes()).await {
                                        events.push(TransportEvent::Error(e.to_string()));
                                    }
                                }
                                LoginStep::Ready => events.push(TransportEvent::Ready),
                                LoginStep::Failed => events.push(TransportEvent::FailedLogin),
                                LoginStep::Pending | LoginStep::Done => {}
                            }
                            events.push(TransportEvent::Data(filtered.text));
                        }
                    }
                    Ok(Err(e)) => {
                        debug!("{} Socket error: {:?}", addr, e);
                        events.push(TransportEvent::Error(e.to_string()));
                    }
                }
            }
        }

        let mut ended = false;
        for event in events {
            if let Some(recorder) = recorder.as_ref() {
                let _ = recorder.record_transport_event(&event);
            }
            ended |= matches!(event, TransportEvent::Close | TransportEvent::Error(_));
            if sender_to_user.send(event).await.is_err() {
                debug!("{} Event receiver dropped. Closing task.", addr);
                ended = true;
                break;
            }
        }
        if ended {
            break;
        }
    }
    debug!("{} Telnet I/O task ended.", addr);
}
