//! Scheduled audio output
//!
//! Chunks are placed on a timeline measured by the output clock and mixed
//! by the cpal output callback. The clock starts at zero when the device is
//! opened and advances with every rendered frame.

use super::join_device_thread;
use super::resample::resample;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Identifier of a scheduled playback chunk
pub type ChunkId = u64;

/// Reported by an open output device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A chunk played out to its end
    Finished(ChunkId),
    /// The device went away; nothing more will be rendered
    DeviceLost(String),
}

/// Playback configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Sample rate of inbound model audio (24kHz)
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { sample_rate: 24000 }
    }
}

/// Output device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Output device closed")]
    Closed,
}

/// Output device with a scheduling clock
///
/// Natural completion of a chunk and loss of the device are reported on the
/// channel handed to the backend when the device was opened.
pub trait OutputDevice: Send {
    /// Current position of the output clock, in seconds
    fn current_time(&self) -> f64;

    /// Play `samples` (at the configured rate) starting at `start_time`
    fn schedule(&mut self, id: ChunkId, samples: Vec<f32>, start_time: f64) -> Result<(), OutputError>;

    /// Silence a chunk immediately. No completion is reported for it.
    fn stop(&mut self, id: ChunkId);

    /// Release the device. Idempotent.
    fn close(&mut self);
}

struct Voice {
    id: ChunkId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Timeline mixer shared between the device handle and the output callback
struct Mixer {
    position: u64,
    voices: Vec<Voice>,
    events_tx: mpsc::UnboundedSender<OutputEvent>,
}

impl Mixer {
    fn new(events_tx: mpsc::UnboundedSender<OutputEvent>) -> Self {
        Self {
            position: 0,
            voices: Vec::new(),
            events_tx,
        }
    }

    fn add(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    fn remove(&mut self, id: ChunkId) -> bool {
        let before = self.voices.len();
        self.voices.retain(|v| v.id != id);
        before != self.voices.len()
    }

    /// Fill an interleaved buffer and retire finished voices
    fn render(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = data.len() / channels;

        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let pos = self.position + i as u64;
            let mut acc = 0.0f32;
            for voice in &self.voices {
                if pos >= voice.start_frame && pos < voice.end_frame() {
                    acc += voice.samples[(pos - voice.start_frame) as usize];
                }
            }
            frame.fill(acc.clamp(-1.0, 1.0));
        }

        self.position += frames as u64;

        let position = self.position;
        let events_tx = &self.events_tx;
        self.voices.retain(|voice| {
            let done = voice.end_frame() <= position;
            if done {
                let _ = events_tx.send(OutputEvent::Finished(voice.id));
            }
            !done
        });
    }
}

/// Commands to control the output thread
enum OutputCommand {
    Stop,
}

/// Output device backed by cpal
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    source_rate: u32,
    device_rate: u32,
    command_tx: std_mpsc::Sender<OutputCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device.
    ///
    /// Blocks until the stream is playing or failed to start.
    pub fn open(
        config: PlaybackConfig,
        events_tx: mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<Self, OutputError> {
        let lost_tx = events_tx.clone();
        let mixer = Arc::new(Mutex::new(Mixer::new(events_tx)));
        let (command_tx, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        let thread_mixer = Arc::clone(&mixer);
        let thread_handle = thread::spawn(move || {
            if let Err(e) = run_audio_output(thread_mixer, lost_tx, command_rx, &ready_tx) {
                tracing::error!("Audio output error: {}", e);
                let _ = ready_tx.send(Err(e));
            }
        });

        match ready_rx.recv() {
            Ok(Ok(device_rate)) => Ok(Self {
                mixer,
                source_rate: config.sample_rate,
                device_rate,
                command_tx,
                thread_handle: Some(thread_handle),
            }),
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(OutputError::StreamError("audio thread exited".to_string()))
            }
        }
    }

    /// List available output devices
    pub fn list_devices() -> Vec<String> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        match self.mixer.lock() {
            Ok(mixer) => mixer.position as f64 / self.device_rate as f64,
            Err(_) => 0.0,
        }
    }

    fn schedule(&mut self, id: ChunkId, samples: Vec<f32>, start_time: f64) -> Result<(), OutputError> {
        if self.thread_handle.is_none() {
            return Err(OutputError::Closed);
        }
        let samples = resample(&samples, self.source_rate, self.device_rate);
        let start_frame = (start_time.max(0.0) * self.device_rate as f64).round() as u64;

        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| OutputError::StreamError("mixer poisoned".to_string()))?;
        mixer.add(Voice {
            id,
            start_frame,
            samples,
        });
        Ok(())
    }

    fn stop(&mut self, id: ChunkId) {
        match self.mixer.lock() {
            Ok(mut mixer) => {
                if mixer.remove(id) {
                    tracing::trace!("Chunk {} stopped", id);
                }
            }
            Err(_) => tracing::warn!("Mixer poisoned, cannot stop chunk {}", id),
        }
    }

    fn close(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.voices.clear();
        }
        let _ = self.command_tx.send(OutputCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            join_device_thread(handle, "Audio output");
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Run audio output (in a dedicated thread)
fn run_audio_output(
    mixer: Arc<Mutex<Mixer>>,
    lost_tx: mpsc::UnboundedSender<OutputEvent>,
    command_rx: std_mpsc::Receiver<OutputCommand>,
    ready_tx: &std_mpsc::SyncSender<Result<u32, OutputError>>,
) -> Result<(), OutputError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(OutputError::NoDevice)?;

    tracing::info!("Audio output device: {:?}", device.name());

    let supported_config = device
        .default_output_config()
        .map_err(|e| OutputError::ConfigError(e.to_string()))?;

    let device_rate = supported_config.sample_rate().0;
    let channels = supported_config.channels() as usize;

    tracing::info!("Playback config: {}Hz {}ch", device_rate, channels);

    let stream_config = supported_config.into();

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match mixer.lock() {
                Ok(mut mixer) => mixer.render(data, channels),
                Err(_) => data.fill(0.0),
            },
            move |err| report_stream_error(err, &lost_tx),
            None,
        )
        .map_err(|e| OutputError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| OutputError::StreamError(e.to_string()))?;

    tracing::info!("Audio output started");
    let _ = ready_tx.send(Ok(device_rate));

    loop {
        match command_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(OutputCommand::Stop) => {
                tracing::info!("Audio output stopped");
                break;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}

/// Log a stream error; a vanished device is reported as lost
fn report_stream_error(err: cpal::StreamError, lost_tx: &mpsc::UnboundedSender<OutputEvent>) {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            tracing::error!("Audio output device lost");
            let _ = lost_tx.send(OutputEvent::DeviceLost(
                "output device no longer available".to_string(),
            ));
        }
        other => tracing::warn!("Audio output stream error: {}", other),
    }
}
