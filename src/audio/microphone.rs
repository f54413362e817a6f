//! Audio capture from microphone
//!
//! Uses cpal for cross-platform capture. The stream runs in a dedicated
//! thread, converts to mono at the wire rate and feeds a ring buffer that
//! the session pulls fixed-size frames from.

use super::join_device_thread;
use super::resample::{downmix, resample};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Target sample rate (16kHz for the live model)
    pub sample_rate: u32,
    /// Samples per capture frame
    pub frame_size: usize,
    /// How often `next_frame` checks the ring buffer (ms)
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 4096,
            poll_interval_ms: 10,
        }
    }
}

/// Microphone capture errors
#[derive(Error, Debug)]
pub enum MicrophoneError {
    #[error("No audio input device found")]
    NoDevice,

    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Pull-based source of mono capture frames
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next full frame. `None` once the device is gone.
    ///
    /// Must be cancel-safe: dropping the future never loses samples.
    async fn next_frame(&mut self) -> Option<Vec<f32>>;

    /// Release the device. Idempotent.
    fn close(&mut self);
}

/// Commands to control the audio thread
enum AudioCommand {
    Stop,
}

/// Microphone stream backed by cpal
pub struct CpalMicrophone {
    consumer: HeapCons<f32>,
    frame_size: usize,
    poll_interval: Duration,
    alive: Arc<AtomicBool>,
    command_tx: mpsc::Sender<AudioCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalMicrophone {
    /// Open the default input device and start capturing.
    ///
    /// Blocks until the stream is playing or failed to start.
    pub fn open(config: CaptureConfig) -> Result<Self, MicrophoneError> {
        if config.frame_size == 0 {
            return Err(MicrophoneError::ConfigError("frame_size must be > 0".to_string()));
        }

        let rb = HeapRb::<f32>::new(config.frame_size * 4);
        let (producer, consumer) = rb.split();

        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let alive = Arc::new(AtomicBool::new(true));

        let thread_alive = Arc::clone(&alive);
        let target_rate = config.sample_rate;
        let thread_handle = thread::spawn(move || {
            let stream_alive = Arc::clone(&thread_alive);
            if let Err(e) = run_audio_capture(target_rate, producer, stream_alive, command_rx, &ready_tx) {
                tracing::error!("Audio capture error: {}", e);
                let _ = ready_tx.send(Err(e));
            }
            thread_alive.store(false, Ordering::SeqCst);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                consumer,
                frame_size: config.frame_size,
                poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
                alive,
                command_tx,
                thread_handle: Some(thread_handle),
            }),
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(MicrophoneError::StreamError("audio thread exited".to_string()))
            }
        }
    }

    /// List available input devices
    pub fn list_devices() -> Vec<String> {
        let host = cpal::default_host();
        host.input_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    /// Pop one frame if enough samples are buffered
    fn try_pop_frame(&mut self) -> Option<Vec<f32>> {
        if self.consumer.occupied_len() < self.frame_size {
            return None;
        }
        let mut frame = vec![0.0; self.frame_size];
        let read = self.consumer.pop_slice(&mut frame);
        frame.truncate(read);
        Some(frame)
    }
}

#[async_trait]
impl FrameSource for CpalMicrophone {
    async fn next_frame(&mut self) -> Option<Vec<f32>> {
        loop {
            if let Some(frame) = self.try_pop_frame() {
                return Some(frame);
            }
            if !self.alive.load(Ordering::SeqCst) {
                return None;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn close(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Stop);
        if let Some(handle) = self.thread_handle.take() {
            join_device_thread(handle, "Audio capture");
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.close();
    }
}

/// Classify a stream build failure. Most platforms report a denied
/// permission as an unavailable device.
fn build_error(e: cpal::BuildStreamError) -> MicrophoneError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            MicrophoneError::PermissionDenied("input device not available".to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => {
            MicrophoneError::PermissionDenied(err.to_string())
        }
        other => MicrophoneError::StreamError(other.to_string()),
    }
}

/// Log a stream error; a vanished device ends the frame stream
fn report_stream_error(err: cpal::StreamError, alive: &AtomicBool) {
    match err {
        cpal::StreamError::DeviceNotAvailable => {
            tracing::error!("Audio input device lost");
            alive.store(false, Ordering::SeqCst);
        }
        other => tracing::warn!("Audio input stream error: {}", other),
    }
}

/// Run audio capture (in a dedicated thread)
fn run_audio_capture(
    target_rate: u32,
    mut producer: HeapProd<f32>,
    alive: Arc<AtomicBool>,
    command_rx: mpsc::Receiver<AudioCommand>,
    ready_tx: &mpsc::SyncSender<Result<(), MicrophoneError>>,
) -> Result<(), MicrophoneError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(MicrophoneError::NoDevice)?;

    tracing::info!("Audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|e| MicrophoneError::ConfigError(e.to_string()))?;

    let source_sample_rate = supported_config.sample_rate().0;
    let source_channels = supported_config.channels();

    tracing::info!(
        "Capture config: {}Hz {}ch -> {}Hz mono",
        source_sample_rate,
        source_channels,
        target_rate
    );

    let stream_config = supported_config.into();

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix(data, source_channels);
                let resampled = resample(&mono, source_sample_rate, target_rate);
                // Overflow means nobody is pulling frames; drop the excess
                let _ = producer.push_slice(&resampled);
            },
            move |err| report_stream_error(err, &alive),
            None,
        )
        .map_err(build_error)?;

    stream
        .play()
        .map_err(|e| MicrophoneError::StreamError(e.to_string()))?;

    tracing::info!("Audio capture started");
    let _ = ready_tx.send(Ok(()));

    // Wait for stop signal
    loop {
        match command_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(AudioCommand::Stop) => {
                tracing::info!("Audio capture stopped");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    Ok(())
}
