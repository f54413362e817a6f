//! Audio devices and wire format
//!
//! Microphone capture, scheduled playback, and the PCM16/base64 codec.

pub mod codec;
mod microphone;
mod output;
pub mod resample;

pub use codec::{decode_pcm16, encode_pcm16, DecodeError, EncodedAudio};
pub use microphone::{CaptureConfig, CpalMicrophone, FrameSource, MicrophoneError};
pub use output::{ChunkId, CpalOutput, OutputDevice, OutputError, OutputEvent, PlaybackConfig};

use async_trait::async_trait;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Opens the per-session audio devices
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the microphone. Fails when access is denied.
    async fn open_microphone(
        &self,
        config: &CaptureConfig,
    ) -> Result<Box<dyn FrameSource>, MicrophoneError>;

    /// Acquire an output device whose clock starts now
    async fn open_output(
        &self,
        config: &PlaybackConfig,
        events_tx: mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<Box<dyn OutputDevice>, OutputError>;
}

/// Default host devices through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    /// List available (input, output) devices
    pub fn list_devices() -> (Vec<String>, Vec<String>) {
        (CpalMicrophone::list_devices(), CpalOutput::list_devices())
    }
}

#[async_trait]
impl AudioBackend for CpalBackend {
    async fn open_microphone(
        &self,
        config: &CaptureConfig,
    ) -> Result<Box<dyn FrameSource>, MicrophoneError> {
        let config = config.clone();
        let microphone = tokio::task::spawn_blocking(move || CpalMicrophone::open(config))
            .await
            .map_err(|e| MicrophoneError::StreamError(e.to_string()))??;
        Ok(Box::new(microphone))
    }

    async fn open_output(
        &self,
        config: &PlaybackConfig,
        events_tx: mpsc::UnboundedSender<OutputEvent>,
    ) -> Result<Box<dyn OutputDevice>, OutputError> {
        let config = config.clone();
        let output = tokio::task::spawn_blocking(move || CpalOutput::open(config, events_tx))
            .await
            .map_err(|e| OutputError::StreamError(e.to_string()))??;
        Ok(Box::new(output))
    }
}

/// Wait for a stopped device thread to exit. Inside a runtime the join is
/// handed to the blocking pool so async workers never wait on it.
fn join_device_thread(handle: JoinHandle<()>, name: &'static str) {
    let join = move || {
        if handle.join().is_err() {
            tracing::warn!("{} thread panicked", name);
        }
        tracing::debug!("{} thread released", name);
    };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(join);
        }
        Err(_) => join(),
    }
}
