//! Live conversation session
//!
//! Orchestrates microphone capture, the live channel and scheduled playback
//! for one conversation at a time.
//!
//! Each session runs as three tasks sharing a cancellation token:
//! - capture: pulls microphone frames, encodes them, hands them to the channel
//! - dispatch: consumes channel events and playback completions, owns the
//!   playback scheduler and the output device
//! - visualizer (optional): renders the live input spectrum
//!
//! Teardown is the same whatever ends the session: every chunk is silenced,
//! then the output device, the channel and the microphone are released,
//! each independently.

use super::error::SessionError;
use crate::audio::{encode_pcm16, AudioBackend, FrameSource, OutputDevice, OutputEvent};
use crate::config::AppConfig;
use crate::credentials::CredentialProvider;
use crate::live::{ChannelConnection, ChannelEvent, ChannelSink, LiveChannel};
use crate::playback::PlaybackScheduler;
use crate::visualizer::{self, Analyser, Renderer, SharedAnalyser};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session, or the last one failed
    Idle,
    /// Acquiring devices and opening the channel
    Connecting,
    /// Channel open, no model audio pending
    Listening,
    /// Model audio scheduled or playing
    Speaking,
    /// Ended by the user or the remote side
    Closed,
}

impl SessionStatus {
    /// True while a session holds devices or a connection
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting | SessionStatus::Listening | SessionStatus::Speaking
        )
    }

    pub fn is_connected(self) -> bool {
        matches!(self, SessionStatus::Listening | SessionStatus::Speaking)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Listening => "listening",
            SessionStatus::Speaking => "speaking",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Events for the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StatusChanged(SessionStatus),
    /// User-visible error message
    Error(String),
}

/// Builds the visualizer renderer of each new session
pub type RendererFactory = Box<dyn Fn() -> Box<dyn Renderer> + Send + Sync>;

struct StatusCell {
    session_id: u64,
    status: SessionStatus,
}

/// State shared with the session tasks
struct Shared {
    status: RwLock<StatusCell>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Shared {
    /// Make `id` the current session without changing the visible status
    async fn begin(&self, id: u64) {
        self.status.write().await.session_id = id;
    }

    /// Session `id` holds the microphone and is now connecting
    async fn connecting(&self, id: u64) {
        let mut cell = self.status.write().await;
        if cell.session_id != id || cell.status == SessionStatus::Connecting {
            return;
        }
        tracing::debug!("Session {}: {:?} -> Connecting", id, cell.status);
        cell.status = SessionStatus::Connecting;
        let _ = self
            .event_tx
            .send(SessionEvent::StatusChanged(SessionStatus::Connecting));
    }

    /// Update the status of session `id`. Ignored once another session has
    /// begun, and a finished session never becomes active again.
    async fn set_status(&self, id: u64, status: SessionStatus) {
        let mut cell = self.status.write().await;
        if cell.session_id != id || cell.status == status {
            return;
        }
        if !cell.status.is_active() && status.is_active() {
            return;
        }
        tracing::debug!("Session {}: {:?} -> {:?}", id, cell.status, status);
        cell.status = status;
        let _ = self.event_tx.send(SessionEvent::StatusChanged(status));
    }

    fn publish_error(&self, message: String) {
        let _ = self.event_tx.send(SessionEvent::Error(message));
    }
}

/// A device acquired while the session is still connecting
enum Acquired {
    Microphone(Box<dyn FrameSource>),
    Output(Box<dyn OutputDevice>),
}

impl Acquired {
    fn release(self) {
        match self {
            Acquired::Microphone(mut microphone) => microphone.close(),
            Acquired::Output(mut output) => output.close(),
        }
    }
}

/// Devices held by a session that has not launched its tasks yet
#[derive(Default)]
struct PendingResources {
    microphone: Option<Box<dyn FrameSource>>,
    output: Option<Box<dyn OutputDevice>>,
}

impl PendingResources {
    fn release(&mut self) {
        if let Some(mut microphone) = self.microphone.take() {
            microphone.close();
        }
        if let Some(mut output) = self.output.take() {
            output.close();
        }
    }
}

struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
    pending: PendingResources,
    tasks: Vec<JoinHandle<()>>,
}

/// Owner of the single live conversation
pub struct SessionController {
    config: AppConfig,
    backend: Arc<dyn AudioBackend>,
    channel: Arc<dyn LiveChannel>,
    credentials: Arc<dyn CredentialProvider>,
    renderer_factory: Option<RendererFactory>,
    shared: Arc<Shared>,
    slot: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

impl SessionController {
    /// Create a controller. Nothing is acquired until `start`.
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn AudioBackend>,
        channel: Arc<dyn LiveChannel>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            config,
            backend,
            channel,
            credentials,
            renderer_factory: None,
            shared: Arc::new(Shared {
                status: RwLock::new(StatusCell {
                    session_id: 0,
                    status: SessionStatus::Idle,
                }),
                event_tx,
            }),
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Draw the input spectrum with renderers from `factory`
    pub fn with_renderer(mut self, factory: RendererFactory) -> Self {
        self.renderer_factory = Some(factory);
        self
    }

    /// Start a new conversation.
    ///
    /// Returns once the channel is connected; the session becomes
    /// `Listening` when the remote side acknowledges setup.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (id, cancel, previous) = {
            let mut slot = self.slot.lock().await;
            let starting = slot
                .as_ref()
                .is_some_and(|session| session.tasks.is_empty() && !session.cancel.is_cancelled());
            if starting || self.status().await.is_active() {
                tracing::warn!("Start rejected: a conversation is already in progress");
                return Err(SessionError::Conflict);
            }

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let cancel = CancellationToken::new();
            let previous = slot.replace(ActiveSession {
                id,
                cancel: cancel.clone(),
                pending: PendingResources::default(),
                tasks: Vec::new(),
            });
            self.shared.begin(id).await;
            (id, cancel, previous)
        };

        // Make sure the previous session let go of its devices
        if let Some(mut previous) = previous {
            previous.cancel.cancel();
            previous.pending.release();
            for task in previous.tasks {
                let _ = task.await;
            }
        }

        tracing::info!("Session {} starting", id);

        // Microphone first: a denied permission must not reach the network
        let capture_config = self.config.capture_config();
        let microphone = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Aborted),
            result = self.backend.open_microphone(&capture_config) => result,
        };
        let microphone = match microphone {
            Ok(microphone) => microphone,
            Err(e) => return Err(self.fail_start(id, SessionError::Permission(e.to_string())).await),
        };
        self.stash(id, Acquired::Microphone(microphone)).await?;

        let playback_config = self.config.playback_config();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Aborted),
            result = self.backend.open_output(&playback_config, output_tx) => result,
        };
        let output = match output {
            Ok(output) => output,
            Err(e) => return Err(self.fail_start(id, SessionError::Device(e.to_string())).await),
        };
        self.stash(id, Acquired::Output(output)).await?;

        let credential = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Aborted),
            result = self.credentials.credential() => result,
        };
        let credential = match credential {
            Ok(credential) => credential,
            Err(e) => {
                let error = SessionError::Connection(format!("credentials unavailable: {}", e));
                return Err(self.fail_start(id, error).await);
            }
        };

        let params = self.config.connect_params();
        let connection = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Aborted),
            result = self.channel.connect(&params, &credential) => result,
        };
        let connection = match connection {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail_start(id, SessionError::Connection(e.to_string())).await),
        };

        self.launch(id, connection, output_rx).await
    }

    /// End the conversation and release everything it holds.
    ///
    /// Safe to call at any time, any number of times, including while
    /// `start` is still connecting.
    pub async fn stop(&self) {
        let session = self.slot.lock().await.take();
        let Some(mut session) = session else {
            tracing::debug!("Stop: no session");
            return;
        };

        tracing::info!("Stopping session {}", session.id);
        session.cancel.cancel();
        session.pending.release();

        if session.tasks.is_empty() {
            // Still connecting: nothing else will report the end
            self.shared
                .set_status(session.id, SessionStatus::Closed)
                .await;
            return;
        }

        for task in session.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!("Session task ended abnormally: {}", e);
            }
        }
    }

    /// Return the current session status
    pub async fn status(&self) -> SessionStatus {
        self.shared.status.read().await.status
    }

    /// Subscribe to status changes and user-visible errors
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Return the current configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Keep a device with its session, or release it if the session is gone
    async fn stash(&self, id: u64, resource: Acquired) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(session) if session.id == id && !session.cancel.is_cancelled() => {
                match resource {
                    Acquired::Microphone(m) => {
                        session.pending.microphone = Some(m);
                        self.shared.connecting(id).await;
                    }
                    Acquired::Output(o) => session.pending.output = Some(o),
                }
                Ok(())
            }
            _ => {
                resource.release();
                Err(SessionError::Aborted)
            }
        }
    }

    /// Tear down a session that failed before launching and report it once
    async fn fail_start(&self, id: u64, error: SessionError) -> SessionError {
        let session = {
            let mut slot = self.slot.lock().await;
            if slot.as_ref().map(|session| session.id) == Some(id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(mut session) = session else {
            return SessionError::Aborted;
        };

        tracing::error!("Session {} failed to start: {}", id, error);
        self.shared.publish_error(error.user_message());

        session.cancel.cancel();
        session.pending.release();
        self.shared.set_status(id, SessionStatus::Idle).await;
        error
    }

    /// Hand devices and connection over to the session tasks
    async fn launch(
        &self,
        id: u64,
        connection: ChannelConnection,
        output_rx: mpsc::UnboundedReceiver<OutputEvent>,
    ) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        let session = match slot.as_mut() {
            Some(session) if session.id == id && !session.cancel.is_cancelled() => session,
            _ => {
                connection.sink.close();
                return Err(SessionError::Aborted);
            }
        };

        let (microphone, output) = match (
            session.pending.microphone.take(),
            session.pending.output.take(),
        ) {
            (Some(microphone), Some(output)) => (microphone, output),
            (microphone, output) => {
                PendingResources { microphone, output }.release();
                connection.sink.close();
                return Err(SessionError::Aborted);
            }
        };

        let cancel = session.cancel.clone();
        let opened = Arc::new(AtomicBool::new(false));
        let (failure_tx, failure_rx) = mpsc::channel(1);

        let visualizer = match &self.renderer_factory {
            Some(factory) if self.config.visualizer.enabled => Some((
                Arc::new(std::sync::Mutex::new(Analyser::new(&self.config.visualizer))),
                factory(),
            )),
            _ => None,
        };

        let capture = CaptureTask {
            id,
            microphone,
            sink: Arc::clone(&connection.sink),
            opened: Arc::clone(&opened),
            analyser: visualizer.as_ref().map(|(analyser, _)| Arc::clone(analyser)),
            sample_rate: self.config.input_sample_rate,
            cancel: cancel.clone(),
            failure_tx,
        };
        session.tasks.push(tokio::spawn(capture.run()));

        let dispatch = DispatchTask {
            id,
            events: connection.events,
            output_events: output_rx,
            capture_failed: failure_rx,
            sink: connection.sink,
            output,
            scheduler: PlaybackScheduler::new(self.config.output_sample_rate),
            opened,
            cancel: cancel.clone(),
            shared: Arc::clone(&self.shared),
        };
        session.tasks.push(tokio::spawn(dispatch.run()));

        if let Some((analyser, renderer)) = visualizer {
            session.tasks.push(tokio::spawn(visualizer::run(
                analyser,
                renderer,
                self.config.visualizer.clone(),
                cancel,
            )));
        }

        tracing::info!("Session {} connected, waiting for setup", id);
        Ok(())
    }
}

/// Microphone → channel
struct CaptureTask {
    id: u64,
    microphone: Box<dyn FrameSource>,
    sink: Arc<dyn ChannelSink>,
    opened: Arc<AtomicBool>,
    analyser: Option<SharedAnalyser>,
    sample_rate: u32,
    cancel: CancellationToken,
    failure_tx: mpsc::Sender<SessionError>,
}

impl CaptureTask {
    async fn run(mut self) {
        let (mut sent, mut dropped) = (0u64, 0u64);

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                frame = self.microphone.next_frame() => frame,
            };

            let Some(frame) = frame else {
                tracing::warn!("Session {}: microphone stream ended", self.id);
                let error = SessionError::Device("the microphone stopped delivering audio".to_string());
                let _ = self.failure_tx.try_send(error);
                break;
            };

            if let Some(analyser) = &self.analyser {
                if let Ok(mut analyser) = analyser.lock() {
                    analyser.push(&frame);
                }
            }

            // Not ready yet: drop rather than queue
            if !self.opened.load(Ordering::SeqCst) {
                dropped += 1;
                continue;
            }

            match self.sink.send_audio(encode_pcm16(&frame, self.sample_rate)) {
                Ok(()) => sent += 1,
                Err(e) => {
                    dropped += 1;
                    tracing::warn!("Session {}: frame dropped: {}", self.id, e);
                }
            }
        }

        self.microphone.close();
        tracing::debug!(
            "Session {} capture stopped ({} frames sent, {} dropped)",
            self.id,
            sent,
            dropped
        );
    }
}

enum Outcome {
    Stopped,
    RemoteClosed,
    Failed(SessionError),
}

/// Channel events → playback
struct DispatchTask {
    id: u64,
    events: mpsc::Receiver<ChannelEvent>,
    output_events: mpsc::UnboundedReceiver<OutputEvent>,
    capture_failed: mpsc::Receiver<SessionError>,
    sink: Arc<dyn ChannelSink>,
    output: Box<dyn OutputDevice>,
    scheduler: PlaybackScheduler,
    opened: Arc<AtomicBool>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl DispatchTask {
    async fn run(mut self) {
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Outcome::Stopped,
                event = self.events.recv() => {
                    let Some(event) = event else {
                        break Outcome::RemoteClosed;
                    };
                    if let Some(outcome) = self.handle_event(event).await {
                        break outcome;
                    }
                }
                Some(event) = self.output_events.recv() => match event {
                    OutputEvent::Finished(id) => {
                        if self.scheduler.complete(id) {
                            self.shared.set_status(self.id, SessionStatus::Listening).await;
                        }
                    }
                    OutputEvent::DeviceLost(reason) => {
                        break Outcome::Failed(SessionError::Device(reason));
                    }
                },
                Some(error) = self.capture_failed.recv() => break Outcome::Failed(error),
            }
        };

        if let Outcome::Failed(error) = &outcome {
            tracing::error!("Session {} failed: {}", self.id, error);
            self.shared.publish_error(error.user_message());
        }

        self.teardown();
        self.cancel.cancel();

        match outcome {
            Outcome::Stopped => {
                tracing::info!("Session {} stopped", self.id);
                self.shared.set_status(self.id, SessionStatus::Closed).await;
            }
            Outcome::RemoteClosed => {
                tracing::info!("Session {} closed by remote", self.id);
                self.shared.set_status(self.id, SessionStatus::Closed).await;
            }
            Outcome::Failed(_) => {
                self.shared.set_status(self.id, SessionStatus::Idle).await;
            }
        }
    }

    async fn handle_event(&mut self, event: ChannelEvent) -> Option<Outcome> {
        match event {
            ChannelEvent::Opened => {
                self.opened.store(true, Ordering::SeqCst);
                tracing::info!("Session {} open, streaming microphone", self.id);
                self.shared.set_status(self.id, SessionStatus::Listening).await;
                None
            }
            ChannelEvent::AudioReceived(payload) => {
                match self.scheduler.enqueue_payload(self.output.as_mut(), &payload) {
                    Ok(_) => {
                        self.shared.set_status(self.id, SessionStatus::Speaking).await;
                    }
                    Err(e) => tracing::warn!("Session {}: dropping inbound chunk: {}", self.id, e),
                }
                None
            }
            ChannelEvent::Interrupted => {
                self.scheduler.interrupt(self.output.as_mut());
                if self.opened.load(Ordering::SeqCst) {
                    self.shared.set_status(self.id, SessionStatus::Listening).await;
                }
                None
            }
            ChannelEvent::Closed => Some(Outcome::RemoteClosed),
            ChannelEvent::Errored(reason) => Some(Outcome::Failed(SessionError::Connection(reason))),
        }
    }

    /// Silence playback, then release the output device and the channel
    fn teardown(&mut self) {
        let stopped = self.scheduler.stop_all(self.output.as_mut());
        self.output.close();
        self.sink.close();
        tracing::debug!(
            "Session {} released output and channel ({} chunk(s) silenced)",
            self.id,
            stopped
        );
    }
}
