//! Transport-independent view of the live speech channel

use crate::audio::EncodedAudio;
use crate::credentials::Credential;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Events delivered by the remote channel, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Setup acknowledged, audio may flow
    Opened,
    /// Base64 PCM16 model audio
    AudioReceived(String),
    /// The user spoke over the model; drop pending playback
    Interrupted,
    /// Remote side closed the channel
    Closed,
    /// Transport or protocol failure
    Errored(String),
}

/// Parameters of the connection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

/// Connection errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Setup failed: {0}")]
    Setup(String),
}

/// Per-frame send errors. Never fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransmissionError {
    #[error("Send queue full, frame dropped")]
    Backpressure,

    #[error("Channel closed")]
    Closed,
}

/// Outbound half of an open channel
pub trait ChannelSink: Send + Sync {
    /// Queue one encoded frame. Does not wait for the network.
    fn send_audio(&self, chunk: EncodedAudio) -> Result<(), TransmissionError>;

    /// Close the channel. Idempotent.
    fn close(&self);
}

/// An established channel: outbound sink plus inbound event stream
pub struct ChannelConnection {
    pub sink: Arc<dyn ChannelSink>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Connector for the hosted live speech service
#[async_trait]
pub trait LiveChannel: Send + Sync {
    async fn connect(
        &self,
        params: &ConnectParams,
        credential: &Credential,
    ) -> Result<ChannelConnection, ConnectError>;
}
