//! In-memory stand-ins for audio devices and the live channel

use crate::audio::{
    AudioBackend, CaptureConfig, ChunkId, EncodedAudio, FrameSource, MicrophoneError,
    OutputDevice, OutputError, OutputEvent, PlaybackConfig,
};
use crate::credentials::Credential;
use crate::live::{
    ChannelConnection, ChannelEvent, ChannelSink, ConnectError, ConnectParams, LiveChannel,
    TransmissionError,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

// =============================================================================
// Output
// =============================================================================

#[derive(Default)]
struct OutputState {
    time: f64,
    scheduled: Vec<(ChunkId, f64, usize)>,
    playing: BTreeSet<ChunkId>,
    stopped: Vec<ChunkId>,
    closed: bool,
    events_tx: Option<mpsc::UnboundedSender<OutputEvent>>,
}

/// Output device with a hand-driven clock. Clones share state.
#[derive(Clone, Default)]
pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, time: f64) {
        self.state.lock().unwrap().time = time;
    }

    /// (id, start_time, sample count) in scheduling order
    pub fn scheduled(&self) -> Vec<(ChunkId, f64, usize)> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn playing(&self) -> Vec<ChunkId> {
        self.state.lock().unwrap().playing.iter().copied().collect()
    }

    pub fn stopped(&self) -> Vec<ChunkId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Let a chunk play out naturally
    pub fn finish(&self, id: ChunkId) {
        let mut state = self.state.lock().unwrap();
        if state.playing.remove(&id) {
            if let Some(tx) = &state.events_tx {
                let _ = tx.send(OutputEvent::Finished(id));
            }
        }
    }

    /// Simulate the device being unplugged
    pub fn lose_device(&self) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = &state.events_tx {
            let _ = tx.send(OutputEvent::DeviceLost("speaker unplugged".to_string()));
        }
    }

    fn attach(&self, events_tx: mpsc::UnboundedSender<OutputEvent>) {
        let mut state = self.state.lock().unwrap();
        state.closed = false;
        state.events_tx = Some(events_tx);
    }
}

impl OutputDevice for FakeOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().time
    }

    fn schedule(&mut self, id: ChunkId, samples: Vec<f32>, start_time: f64) -> Result<(), OutputError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(OutputError::Closed);
        }
        state.scheduled.push((id, start_time, samples.len()));
        state.playing.insert(id);
        Ok(())
    }

    fn stop(&mut self, id: ChunkId) {
        let mut state = self.state.lock().unwrap();
        if state.playing.remove(&id) {
            state.stopped.push(id);
        }
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.events_tx = None;
    }
}

// =============================================================================
// Microphone
// =============================================================================

struct FakeMicrophone {
    frames: mpsc::UnboundedReceiver<Vec<f32>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for FakeMicrophone {
    async fn next_frame(&mut self) -> Option<Vec<f32>> {
        self.frames.recv().await
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Backend handing out one fake microphone and a shared fake output
pub struct FakeBackend {
    pub output: FakeOutput,
    pub deny_microphone: bool,
    pub fail_output: bool,
    /// When set, opening the microphone waits for a notification
    pub microphone_gate: Option<Arc<Notify>>,
    mic_requests: AtomicUsize,
    mic_frames: Mutex<Option<mpsc::UnboundedReceiver<Vec<f32>>>>,
    mic_tx: mpsc::UnboundedSender<Vec<f32>>,
    mic_closed: Arc<AtomicBool>,
    mic_opens: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        let (mic_tx, mic_rx) = mpsc::unbounded_channel();
        Self {
            output: FakeOutput::new(),
            deny_microphone: false,
            fail_output: false,
            microphone_gate: None,
            mic_requests: AtomicUsize::new(0),
            mic_frames: Mutex::new(Some(mic_rx)),
            mic_tx,
            mic_closed: Arc::new(AtomicBool::new(false)),
            mic_opens: AtomicUsize::new(0),
        }
    }

    /// Feed one captured frame
    pub fn capture(&self, frame: Vec<f32>) {
        let _ = self.mic_tx.send(frame);
    }

    pub fn microphone_closed(&self) -> bool {
        self.mic_closed.load(Ordering::SeqCst)
    }

    /// Microphone requests, including ones still waiting on the gate
    pub fn microphone_requests(&self) -> usize {
        self.mic_requests.load(Ordering::SeqCst)
    }

    pub fn microphone_opens(&self) -> usize {
        self.mic_opens.load(Ordering::SeqCst)
    }

    /// Fresh microphone for a second session
    pub fn rearm_microphone(&self) -> mpsc::UnboundedSender<Vec<f32>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.mic_frames.lock().unwrap() = Some(rx);
        self.mic_closed.store(false, Ordering::SeqCst);
        tx
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioBackend for FakeBackend {
    async fn open_microphone(
        &self,
        _config: &CaptureConfig,
    ) -> Result<Box<dyn FrameSource>, MicrophoneError> {
        self.mic_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.microphone_gate {
            gate.notified().await;
        }
        if self.deny_microphone {
            return Err(MicrophoneError::PermissionDenied("denied by user".to_string()));
        }
        let frames = self
            .mic_frames
            .lock()
            .unwrap()
            .take()
            .ok_or(MicrophoneError::NoDevice)?;
        self.mic_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeMicrophone {
            frames,
            closed: Arc::clone(&self.mic_closed),
        }))
    }

    async fn open_output(
        &self,
        _config: &PlaybackConfig,
        events_tx: mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<Box<dyn OutputDevice>, OutputError> {
        if self.fail_output {
            return Err(OutputError::NoDevice);
        }
        self.output.attach(events_tx);
        Ok(Box::new(self.output.clone()))
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Records outbound frames; optionally rejects them
#[derive(Default)]
pub struct FakeSink {
    sent: Mutex<Vec<EncodedAudio>>,
    reject_next: AtomicUsize,
    closed: AtomicBool,
}

impl FakeSink {
    pub fn sent(&self) -> Vec<EncodedAudio> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fail the next `count` sends
    pub fn reject_next(&self, count: usize) {
        self.reject_next.store(count, Ordering::SeqCst);
    }
}

impl ChannelSink for FakeSink {
    fn send_audio(&self, chunk: EncodedAudio) -> Result<(), TransmissionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransmissionError::Closed);
        }
        let rejected = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(TransmissionError::Backpressure);
        }
        self.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Remote side of an open fake connection
pub struct FakeRemote {
    pub events: mpsc::Sender<ChannelEvent>,
    pub sink: Arc<FakeSink>,
}

impl FakeRemote {
    pub async fn emit(&self, event: ChannelEvent) {
        self.events.send(event).await.unwrap();
    }
}

/// Channel whose connections are driven by the test
#[derive(Default)]
pub struct FakeChannel {
    pub fail: bool,
    /// When set, `connect` waits for a notification before completing
    pub gate: Option<Arc<Notify>>,
    connects: AtomicUsize,
    remotes: Mutex<Vec<Arc<FakeRemote>>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Remote end of the most recent connection
    pub fn remote(&self) -> Arc<FakeRemote> {
        self.remotes
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connection yet")
    }
}

#[async_trait]
impl LiveChannel for FakeChannel {
    async fn connect(
        &self,
        _params: &ConnectParams,
        _credential: &Credential,
    ) -> Result<ChannelConnection, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(ConnectError::Handshake("connection refused".to_string()));
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let sink = Arc::new(FakeSink::default());
        self.remotes.lock().unwrap().push(Arc::new(FakeRemote {
            events: events_tx,
            sink: Arc::clone(&sink),
        }));

        Ok(ChannelConnection {
            sink,
            events: events_rx,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Poll `condition` until it holds, or panic after ~2s
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
