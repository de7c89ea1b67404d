//! Stream client facade and its background driver.
//!
//! [`StreamClient::start`] spawns one driver task per run. The driver owns
//! the pipeline (connection controller, heartbeat monitor, session
//! aggregator) while it runs and hands it back through its `JoinHandle`, so
//! exactly one transport and one decoder are ever live for a session.

use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use futures_util::StreamExt;
use rand::Rng;
use tokio::{
    sync::{mpsc, watch},
    task::{JoinError, JoinHandle},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    aggregate::SessionAggregator,
    config::StreamConfig,
    connection::{ConnectionController, ConnectionState, ConnectionStatus, Recovery},
    decode::FrameStream,
    error::{StreamError, StreamResult},
    event::{StreamEvent, StreamFault},
    heartbeat::{HeartbeatMonitor, HeartbeatStatus, HeartbeatVerdict},
    normalize::normalize_frame,
    observer::{NoopObserver, StreamObserver},
    request::StreamRequest,
    session::{SessionMessage, SessionStats, StreamSession, Transition},
    transport::{
        ByteStream, HttpTransport, LivenessProbe, SessionControl, SessionDescriptor,
        StartSessionRequest, StreamTransport,
    },
};

/// Control commands sent from the client to a running driver.
#[derive(Debug)]
enum DriverCommand {
    /// Drop the current transport and go through `Reconnecting`.
    Reconnect { reason: String },
}

/// Everything the driver mutates while a run is live.
struct Pipeline {
    controller: ConnectionController,
    heartbeat: HeartbeatMonitor,
    aggregator: SessionAggregator,
}

/// Snapshot channels shared by every pipeline the client builds.
///
/// They live on the client so subscribers outlive any single run.
#[derive(Clone)]
struct Channels {
    session: watch::Sender<StreamSession>,
    connection: watch::Sender<ConnectionStatus>,
    heartbeat: watch::Sender<HeartbeatStatus>,
}

struct ActiveRun {
    cancel: CancellationToken,
    commands: mpsc::Sender<DriverCommand>,
    join: JoinHandle<Pipeline>,
}

/// Entry point for streaming runs against one backend session.
///
/// The client carries its own correlation id (see
/// [`session_id`](Self::session_id)); there is no shared global state.
pub struct StreamClient {
    config: Arc<StreamConfig>,
    transport: Arc<dyn StreamTransport>,
    probe: Arc<dyn LivenessProbe>,
    control: Arc<dyn SessionControl>,
    observer: Arc<dyn StreamObserver>,
    session_id: String,
    channels: Channels,
    pipeline: Option<Pipeline>,
    run: Option<ActiveRun>,
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("session_id", &self.session_id)
            .field("state", &self.channels.connection.borrow().state)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client that talks HTTP to `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: StreamConfig) -> StreamResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: StreamConfig) -> StreamClientBuilder {
        StreamClientBuilder {
            config,
            transport: None,
            probe: None,
            control: None,
            observer: None,
            session_id: None,
        }
    }

    /// Correlation id sent with requests that carry none.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Rotate the correlation id. Takes effect from the next run.
    pub fn reset_session_id(&mut self) -> &str {
        self.session_id = generate_session_id();
        debug!(session_id = %self.session_id, "Session id rotated");
        &self.session_id
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Whether a driver is currently running.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.join.is_finished())
    }

    /// Snapshot of the session aggregate.
    pub fn session(&self) -> StreamSession {
        self.channels.session.borrow().clone()
    }

    /// Snapshot of the connection.
    pub fn connection(&self) -> ConnectionStatus {
        self.channels.connection.borrow().clone()
    }

    /// Snapshot of the heartbeat.
    pub fn heartbeat(&self) -> HeartbeatStatus {
        self.channels.heartbeat.borrow().clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.channels.session.borrow().stats()
    }

    /// Receiver of session snapshots. Stays valid across runs.
    pub fn subscribe_session(&self) -> watch::Receiver<StreamSession> {
        self.channels.session.subscribe()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.channels.connection.subscribe()
    }

    pub fn subscribe_heartbeat(&self) -> watch::Receiver<HeartbeatStatus> {
        self.channels.heartbeat.subscribe()
    }

    /// Start a streaming run for `request`.
    ///
    /// Returns once the driver is spawned; progress is reported through the
    /// observer and the snapshot channels.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SessionBusy`] if a run is still live; call
    /// [`stop`](Self::stop) first.
    pub async fn start(&mut self, request: StreamRequest) -> StreamResult<()> {
        if self.is_running() {
            return Err(StreamError::session_busy(self.session_id.clone()));
        }
        self.wait().await;

        let request = request.correlated(&self.session_id, &self.config.default_user_id);
        let mut pipeline = match self.pipeline.take() {
            Some(pipeline) => pipeline,
            None => self.build_pipeline(),
        };
        pipeline.heartbeat.reset();
        pipeline
            .aggregator
            .reset(request.session_id().unwrap_or(self.session_id.as_str()));

        let cancel = CancellationToken::new();
        let (commands, command_rx) = mpsc::channel(self.config.command_channel_capacity);
        let driver = Driver {
            config: Arc::clone(&self.config),
            transport: Arc::clone(&self.transport),
            probe: Arc::clone(&self.probe),
            observer: Arc::clone(&self.observer),
            cancel: cancel.clone(),
            commands: command_rx,
            request,
            pipeline,
        };

        info!(session_id = %self.session_id, "Starting stream run");
        let join = tokio::spawn(driver.run());
        self.run = Some(ActiveRun {
            cancel,
            commands,
            join,
        });
        Ok(())
    }

    /// Cancel the active run, if any.
    ///
    /// Aborts the transport, clears pending backoff and heartbeat timers, and
    /// waits for the driver to exit. No observer callback fires after this
    /// returns. Safe to call in any state.
    ///
    /// Cancel safe: if this future is dropped the run is still cancelled and
    /// is reaped by the next `stop`, `wait` or `start`.
    pub async fn stop(&mut self) {
        if let Some(run) = self.run.as_mut() {
            run.cancel.cancel();
            let result = (&mut run.join).await;
            self.run = None;
            self.park(result);
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.controller.stop();
            pipeline.heartbeat.disarm();
        }
    }

    /// [`stop`](Self::stop), then return every piece of state to its initial value.
    pub async fn reset(&mut self) {
        self.stop().await;
        let session_id = self.session_id.clone();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.controller.reset();
            pipeline.heartbeat.reset();
            pipeline.aggregator.reset(session_id);
        }
    }

    /// Ask the live run to drop its transport and reconnect.
    ///
    /// # Errors
    ///
    /// Fails if no run is live or its command queue is full.
    pub fn reconnect(&self, reason: impl Into<String>) -> StreamResult<()> {
        let run = self
            .run
            .as_ref()
            .filter(|run| !run.join.is_finished())
            .ok_or_else(|| StreamError::connection_closed(Some("no active stream".to_string())))?;
        run.commands
            .try_send(DriverCommand::Reconnect {
                reason: reason.into(),
            })
            .map_err(|e| StreamError::internal(format!("Failed to queue reconnect: {e}")))
    }

    /// Start a multi-agent session and adopt its id for correlation.
    pub async fn start_session(
        &mut self,
        project_id: impl Into<String>,
        capabilities: Vec<String>,
        title: Option<String>,
    ) -> StreamResult<SessionDescriptor> {
        let request = StartSessionRequest::new(project_id, capabilities, title);
        let descriptor = self.control.start_session(&request).await?;
        if !descriptor.session_id.is_empty() {
            self.session_id = descriptor.session_id.clone();
        }
        Ok(descriptor)
    }

    pub async fn stop_session(&self, session_id: &str) -> StreamResult<()> {
        self.control.stop_session(session_id).await
    }

    pub async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        target: Option<&str>,
    ) -> StreamResult<()> {
        self.control.send_message(session_id, message, target).await
    }

    /// Send a message within the client's own session.
    pub async fn send(&self, message: &str, target: Option<&str>) -> StreamResult<()> {
        self.control
            .send_message(&self.session_id, message, target)
            .await
    }

    pub async fn session_history(&self, session_id: &str) -> StreamResult<Vec<SessionMessage>> {
        self.control.session_history(session_id).await
    }

    /// Wait for the active run to end on its own.
    ///
    /// Returns immediately when no run is active. Cancel safe: dropping
    /// this future leaves the run untouched.
    pub async fn wait(&mut self) {
        if let Some(run) = self.run.as_mut() {
            let result = (&mut run.join).await;
            self.run = None;
            self.park(result);
        }
    }

    fn park(&mut self, result: Result<Pipeline, JoinError>) {
        match result {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(err) => {
                error!(error = %err, "Stream driver did not exit cleanly");
                self.pipeline = Some(self.build_pipeline());
            }
        }
    }

    fn build_pipeline(&self) -> Pipeline {
        Pipeline::new(&self.config, &self.session_id, &self.channels)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.cancel.cancel();
        }
    }
}

/// Builder for [`StreamClient`].
pub struct StreamClientBuilder {
    config: StreamConfig,
    transport: Option<Arc<dyn StreamTransport>>,
    probe: Option<Arc<dyn LivenessProbe>>,
    control: Option<Arc<dyn SessionControl>>,
    observer: Option<Arc<dyn StreamObserver>>,
    session_id: Option<String>,
}

impl StreamClientBuilder {
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    #[must_use]
    pub fn control(mut self, control: Arc<dyn SessionControl>) -> Self {
        self.control = Some(control);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Use a fixed correlation id instead of a generated one.
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Build the client. Seams left unset are served by an [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> StreamResult<StreamClient> {
        self.config.validate().map_err(StreamError::config)?;

        let http = if self.transport.is_none() || self.probe.is_none() || self.control.is_none() {
            Some(Arc::new(HttpTransport::new(self.config.clone())?))
        } else {
            None
        };
        let transport = match (self.transport, &http) {
            (Some(transport), _) => transport,
            (None, Some(http)) => Arc::clone(http) as Arc<dyn StreamTransport>,
            (None, None) => return Err(StreamError::internal("no stream transport")),
        };
        let probe = match (self.probe, &http) {
            (Some(probe), _) => probe,
            (None, Some(http)) => Arc::clone(http) as Arc<dyn LivenessProbe>,
            (None, None) => return Err(StreamError::internal("no liveness probe")),
        };
        let control = match (self.control, &http) {
            (Some(control), _) => control,
            (None, Some(http)) => Arc::clone(http) as Arc<dyn SessionControl>,
            (None, None) => return Err(StreamError::internal("no session control")),
        };

        let config = Arc::new(self.config);
        let session_id = self.session_id.unwrap_or_else(generate_session_id);
        let (session, _) = watch::channel(StreamSession::new(session_id.as_str()));
        let (connection, _) = watch::channel(ConnectionStatus::default());
        let (heartbeat, _) = watch::channel(HeartbeatStatus::default());
        let channels = Channels {
            session,
            connection,
            heartbeat,
        };
        let pipeline = Pipeline::new(&config, &session_id, &channels);

        Ok(StreamClient {
            config,
            transport,
            probe,
            control,
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            session_id,
            channels,
            pipeline: Some(pipeline),
            run: None,
        })
    }
}

impl Pipeline {
    fn new(config: &StreamConfig, session_id: &str, channels: &Channels) -> Self {
        let channels = channels.clone();
        Self {
            controller: ConnectionController::with_sender(
                config.backoff(),
                config.reconnect_max_attempts,
                config.auto_reconnect,
                channels.connection,
            ),
            heartbeat: HeartbeatMonitor::with_sender(
                config.heartbeat_enabled,
                config.heartbeat_interval,
                config.idle_timeout,
                config.probe_timeout,
                channels.heartbeat,
            ),
            aggregator: SessionAggregator::with_sender(session_id, channels.session),
        }
    }
}

/// `session_<unix millis>_<9 base36 chars>`.
fn generate_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect();
    format!("session_{}_{suffix}", Utc::now().timestamp_millis())
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// How a connected stream ended.
enum Outcome {
    Cancelled,
    Completed,
    Failed { message: String },
    /// Transport dropped, stream ended early, or heartbeat declared it dead.
    Lost { error: StreamError },
    /// The caller asked for a reconnect.
    Requested { reason: String },
}

struct Driver {
    config: Arc<StreamConfig>,
    transport: Arc<dyn StreamTransport>,
    probe: Arc<dyn LivenessProbe>,
    observer: Arc<dyn StreamObserver>,
    cancel: CancellationToken,
    commands: mpsc::Receiver<DriverCommand>,
    request: StreamRequest,
    pipeline: Pipeline,
}

impl Driver {
    async fn run(mut self) -> Pipeline {
        self.drive().await;

        if self.pipeline.heartbeat.disarm() {
            self.emit_heartbeat();
        }
        if self.pipeline.controller.state().is_active() && self.pipeline.controller.stop() {
            debug!(cancelled = self.cancel.is_cancelled(), "Stream run ended while active");
        }
        self.pipeline
    }

    async fn drive(&mut self) {
        self.emit(|o| o.on_start());
        self.pipeline.aggregator.begin();

        if let Err(err) = self.pipeline.controller.start() {
            self.fail_session(&err.to_string());
            return;
        }
        self.emit_connection();

        loop {
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                opened = self.open() => opened,
            };

            let stream = match opened {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, attempt = self.pipeline.controller.attempt(), "Stream open failed");
                    if self.pipeline.controller.fail(&err).is_ok() {
                        self.emit_connection();
                    }
                    if !err.is_transport() || !self.pipeline.controller.auto_reconnect() {
                        self.fail_session(&err.to_string());
                        return;
                    }
                    if !self.recover(&err.to_string()).await {
                        return;
                    }
                    continue;
                }
            };

            if self.pipeline.controller.opened().is_err() {
                return;
            }
            info!(session_id = %self.session_id(), "Stream connected");
            self.emit_connection();
            if self.pipeline.heartbeat.arm() {
                self.emit_heartbeat();
            }

            let outcome = self.pump(stream).await;

            if self.pipeline.heartbeat.disarm() {
                self.emit_heartbeat();
            }

            match outcome {
                Outcome::Cancelled => return,
                Outcome::Completed => {
                    if self.pipeline.controller.complete().is_ok() {
                        self.emit_connection();
                    }
                    let (text, metadata, messages) = {
                        let session = self.pipeline.aggregator.session();
                        (
                            session.accumulated_text(),
                            session.latest_metadata(),
                            session.messages.len(),
                        )
                    };
                    info!(session_id = %self.session_id(), messages, "Stream completed");
                    self.emit(|o| o.on_complete(&text, &metadata));
                    return;
                }
                Outcome::Failed { message } => {
                    if self.pipeline.controller.complete().is_ok() {
                        self.emit_connection();
                    }
                    warn!(session_id = %self.session_id(), error = %message, "Upstream reported an error");
                    self.emit(|o| o.on_error(&message));
                    return;
                }
                Outcome::Requested { reason } => {
                    if !self.recover(&reason).await {
                        return;
                    }
                }
                Outcome::Lost { error } => {
                    warn!(session_id = %self.session_id(), error = %error, "Stream lost");
                    if !self.pipeline.controller.auto_reconnect() {
                        if self.pipeline.controller.lose(&error).is_ok() {
                            self.emit_connection();
                        }
                        self.fail_session(&error.to_string());
                        return;
                    }
                    if !self.recover(&error.to_string()).await {
                        return;
                    }
                }
            }
        }
    }

    async fn open(&self) -> StreamResult<ByteStream> {
        let connect_timeout = self.config.connect_timeout;
        timeout(connect_timeout, self.transport.open(&self.request))
            .await
            .map_err(|_| StreamError::timeout(connect_timeout))?
    }

    /// Enter `Reconnecting` and wait out the backoff.
    ///
    /// Returns `true` with the controller back in `Connecting`, or `false` if
    /// the budget is spent or the run was cancelled meanwhile.
    async fn recover(&mut self, reason: &str) -> bool {
        // The next connection replays the request; its output starts fresh.
        let sealed = self.pipeline.aggregator.seal_open();
        if sealed > 0 {
            debug!(sealed, "Sealed partial messages before reconnecting");
        }
        let recovery = match self.pipeline.controller.begin_reconnect(reason) {
            Ok(recovery) => recovery,
            Err(err) => {
                self.fail_session(&err.to_string());
                return false;
            }
        };
        self.emit_connection();

        match recovery {
            Recovery::Retry { delay, .. } => {
                if !self.backoff(delay).await {
                    return false;
                }
                if self.pipeline.controller.retry().is_err() {
                    return false;
                }
                self.emit_connection();
                true
            }
            Recovery::Exhausted { attempts } => {
                error!(session_id = %self.session_id(), attempts, "Giving up on stream");
                if self.pipeline.controller.give_up().is_ok() {
                    self.emit_connection();
                }
                false
            }
        }
    }

    /// Sleep for `delay` unless cancelled first.
    async fn backoff(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    /// Read one connection to its end.
    async fn pump(&mut self, stream: ByteStream) -> Outcome {
        // Fresh decoder per connection; a partial frame never carries over.
        let mut frames = FrameStream::new(stream);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Outcome::Cancelled,

                cmd = self.commands.recv() => match cmd {
                    Some(DriverCommand::Reconnect { reason }) => {
                        warn!(reason = %reason, "Reconnect requested");
                        return Outcome::Requested { reason };
                    }
                    None => return Outcome::Cancelled,
                },

                item = frames.next() => match item {
                    Some(Ok(frame)) => {
                        self.pipeline.controller.touch();
                        if let Some(outcome) = self.deliver(normalize_frame(&frame)) {
                            return outcome;
                        }
                    }
                    Some(Err(error)) => return Outcome::Lost { error },
                    None => return Outcome::Lost { error: StreamError::StreamEnded },
                },

                _ = self.pipeline.heartbeat.tick() => {
                    let idle = self.pipeline.controller.idle_for();
                    if !self.pipeline.heartbeat.needs_probe(idle) {
                        continue;
                    }
                    debug!(idle_ms = idle.as_millis() as u64, "Connection idle, probing");
                    let session_id = self.session_id().to_string();
                    let user_id = self.request.user_id().unwrap_or_default().to_string();
                    let verdict = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Outcome::Cancelled,
                        verdict = self.pipeline.heartbeat.probe(self.probe.as_ref(), &session_id, &user_id) => verdict,
                    };
                    self.emit_heartbeat();
                    match verdict {
                        HeartbeatVerdict::Alive => self.pipeline.controller.touch(),
                        HeartbeatVerdict::Dead { reason } => {
                            return Outcome::Lost { error: StreamError::probe(reason) };
                        }
                    }
                }
            }
        }
    }

    /// Fold one event into the session and fire the matching callback.
    fn deliver(&mut self, event: StreamEvent) -> Option<Outcome> {
        if self.cancel.is_cancelled() {
            return Some(Outcome::Cancelled);
        }
        debug!(kind = event.kind(), "Stream event");

        let transition = self.pipeline.aggregator.apply(&event);
        match transition {
            Transition::Appended { index } | Transition::Extended { index } => {
                let (text, metadata) = {
                    let session = self.pipeline.aggregator.session();
                    let metadata = session
                        .messages
                        .get(index)
                        .map(|m| m.metadata.clone())
                        .unwrap_or_default();
                    (session.accumulated_text(), metadata)
                };
                self.emit(|o| o.on_update(&text, &metadata));
                None
            }
            Transition::Completed => Some(Outcome::Completed),
            Transition::Failed { message } => Some(Outcome::Failed { message }),
            Transition::MetadataMerged { .. } | Transition::Sealed { .. } | Transition::Ignored => {
                None
            }
        }
    }

    /// Session-fatal failure outside the event stream.
    fn fail_session(&mut self, message: &str) {
        self.pipeline.aggregator.apply(&StreamEvent::Error(StreamFault {
            message: message.to_string(),
            ..Default::default()
        }));
        error!(session_id = %self.session_id(), error = %message, "Stream run failed");
        self.emit(|o| o.on_error(message));
    }

    fn session_id(&self) -> &str {
        self.request.session_id().unwrap_or_default()
    }

    fn emit(&self, f: impl FnOnce(&dyn StreamObserver)) {
        if !self.cancel.is_cancelled() {
            f(self.observer.as_ref());
        }
    }

    fn emit_connection(&self) {
        let state: ConnectionState = self.pipeline.controller.state();
        self.emit(|o| o.on_connection_change(state));
    }

    fn emit_heartbeat(&self) {
        let state = self.pipeline.heartbeat.state();
        self.emit(|o| o.on_heartbeat(state));
    }
}
