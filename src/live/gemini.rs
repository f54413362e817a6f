//! Gemini Live API channel
//!
//! Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<key>`
//! Protocol: WebSocket with JSON messages (text or binary frames)
//! Audio: PCM 16-bit LE, base64 encoded; 16kHz in, 24kHz out

use super::channel::{
    ChannelConnection, ChannelEvent, ChannelSink, ConnectError, ConnectParams, LiveChannel,
    TransmissionError,
};
use super::messages::{ClientMessage, ServerMessage};
use crate::audio::EncodedAudio;
use crate::credentials::Credential;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Outbound frames waiting for the socket. Small on purpose: a frame that
/// cannot be queued is dropped rather than buffered.
const OUTBOUND_CAPACITY: usize = 8;

/// Inbound events waiting for the session dispatch loop
const EVENT_CAPACITY: usize = 64;

/// WebSocket client for the Gemini Live API
#[derive(Debug, Clone)]
pub struct GeminiLiveChannel {
    endpoint: String,
}

impl GeminiLiveChannel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Build the WebSocket URL with the API key parameter
    fn build_ws_url(&self, credential: &Credential) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, credential.expose())
    }
}

#[async_trait]
impl LiveChannel for GeminiLiveChannel {
    async fn connect(
        &self,
        params: &ConnectParams,
        credential: &Credential,
    ) -> Result<ChannelConnection, ConnectError> {
        if credential.expose().is_empty() {
            return Err(ConnectError::InvalidRequest("empty API key".to_string()));
        }

        let url = self.build_ws_url(credential);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        tracing::info!("Connected to live endpoint, model {}", params.model);

        let (mut ws_sink, ws_stream) = ws_stream.split();

        let setup = serde_json::to_string(&ClientMessage::setup(params))
            .map_err(|e| ConnectError::Setup(e.to_string()))?;
        ws_sink
            .send(Message::Text(setup.into()))
            .await
            .map_err(|e| ConnectError::Setup(e.to_string()))?;

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();

        tokio::spawn(run_connection(
            ws_sink,
            ws_stream,
            out_rx,
            event_tx,
            shutdown.clone(),
        ));

        Ok(ChannelConnection {
            sink: Arc::new(GeminiSink {
                tx: out_tx,
                shutdown,
            }),
            events: event_rx,
        })
    }
}

/// Outbound half handed to the session
struct GeminiSink {
    tx: mpsc::Sender<ClientMessage>,
    shutdown: CancellationToken,
}

impl ChannelSink for GeminiSink {
    fn send_audio(&self, chunk: EncodedAudio) -> Result<(), TransmissionError> {
        if self.shutdown.is_cancelled() {
            return Err(TransmissionError::Closed);
        }
        self.tx
            .try_send(ClientMessage::audio(chunk))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransmissionError::Backpressure,
                TrySendError::Closed(_) => TransmissionError::Closed,
            })
    }

    fn close(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!("Closing live channel");
            self.shutdown.cancel();
        }
    }
}

/// Parse one JSON frame into channel events
fn parse_frame(bytes: &[u8]) -> Vec<ChannelEvent> {
    match serde_json::from_slice::<ServerMessage>(bytes) {
        Ok(message) => message.into_events(),
        Err(e) => {
            tracing::warn!("Failed to parse server message: {}", e);
            Vec::new()
        }
    }
}

/// Pump the socket until either side closes
async fn run_connection<W, R, E>(
    mut ws_sink: W,
    mut ws_stream: R,
    mut out_rx: mpsc::Receiver<ClientMessage>,
    event_tx: mpsc::Sender<ChannelEvent>,
    shutdown: CancellationToken,
) where
    W: Sink<Message, Error = E> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let events = tokio::select! {
            _ = shutdown.cancelled() => {
                if let Err(e) = ws_sink.send(Message::Close(None)).await {
                    tracing::debug!("Close frame not sent: {}", e);
                }
                break;
            }

            outgoing = out_rx.recv() => match outgoing {
                Some(message) => {
                    let json = match serde_json::to_string(&message) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        tracing::error!("Failed to send WebSocket message: {}", e);
                        vec![ChannelEvent::Errored(format!("send failed: {}", e))]
                    } else {
                        continue;
                    }
                }
                None => break,
            },

            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => parse_frame(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => parse_frame(&data),
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                        tracing::warn!("Failed to send pong: {}", e);
                    }
                    continue;
                }
                Some(Ok(Message::Close(frame))) => match frame {
                    Some(frame) if !matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
                        tracing::warn!("WebSocket closed by server: {} {}", frame.code, frame.reason);
                        vec![ChannelEvent::Errored(format!("closed by server: {}", frame.reason))]
                    }
                    _ => {
                        tracing::info!("WebSocket closed by server");
                        vec![ChannelEvent::Closed]
                    }
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    vec![ChannelEvent::Errored(e.to_string())]
                }
                None => vec![ChannelEvent::Closed],
            },
        };

        let terminal = events
            .iter()
            .any(|e| matches!(e, ChannelEvent::Closed | ChannelEvent::Errored(_)));

        for event in events {
            if event_tx.send(event).await.is_err() {
                tracing::debug!("Session gone, stopping connection task");
                return;
            }
        }

        if terminal {
            break;
        }
    }

    tracing::debug!("Live connection task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encode_pcm16;
    use futures_util::stream;
    use std::convert::Infallible;

    fn text(json: &str) -> Result<Message, Infallible> {
        Ok(Message::Text(json.to_string().into()))
    }

    async fn collect(mut rx: mpsc::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn api_key_is_appended_to_url() {
        let channel = GeminiLiveChannel::new("wss://example.test/live");
        let url = channel.build_ws_url(&Credential::new("k1"));
        assert_eq!(url, "wss://example.test/live?key=k1");

        let channel = GeminiLiveChannel::new("wss://example.test/live?alt=json");
        let url = channel.build_ws_url(&Credential::new("k2"));
        assert_eq!(url, "wss://example.test/live?alt=json&key=k2");
    }

    #[tokio::test]
    async fn empty_key_is_rejected_before_connecting() {
        let channel = GeminiLiveChannel::new("wss://example.test/live");
        let params = ConnectParams {
            model: "m".to_string(),
            voice: "v".to_string(),
            system_instruction: String::new(),
        };
        let result = channel.connect(&params, &Credential::new("")).await;
        assert!(matches!(result, Err(ConnectError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn inbound_frames_become_events_in_order() {
        let incoming = stream::iter(vec![
            text(r#"{"setupComplete":{}}"#),
            text(r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAA="}}]}}}"#),
            text("not json"),
            Ok(Message::Binary(br#"{"serverContent":{"interrupted":true}}"#.to_vec().into())),
        ]);
        let mut sent: Vec<Message> = Vec::new();
        let (_out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        run_connection(&mut sent, incoming, out_rx, event_tx, CancellationToken::new()).await;

        assert_eq!(
            collect(event_rx).await,
            vec![
                ChannelEvent::Opened,
                ChannelEvent::AudioReceived("AAA=".to_string()),
                ChannelEvent::Interrupted,
                ChannelEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn abnormal_close_is_an_error() {
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;

        let incoming = stream::iter(vec![Ok::<_, Infallible>(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "API key not valid".into(),
        })))]);
        let mut sent: Vec<Message> = Vec::new();
        let (_out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        run_connection(&mut sent, incoming, out_rx, event_tx, CancellationToken::new()).await;

        assert_eq!(
            collect(event_rx).await,
            vec![ChannelEvent::Errored("closed by server: API key not valid".to_string())]
        );
    }

    #[tokio::test]
    async fn local_close_sends_close_frame_without_event() {
        let mut sent: Vec<Message> = Vec::new();
        let (_out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        run_connection(&mut sent, stream::pending(), out_rx, event_tx, shutdown).await;

        assert!(matches!(sent.as_slice(), [Message::Close(None)]));
        assert!(collect(event_rx).await.is_empty());
    }

    #[tokio::test]
    async fn queued_audio_is_written_as_realtime_input() {
        let sink_shutdown = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let sink = GeminiSink {
            tx: out_tx,
            shutdown: sink_shutdown.clone(),
        };
        sink.send_audio(encode_pcm16(&[0.0, 0.5], 16000)).unwrap();
        drop(sink);

        let mut sent: Vec<Message> = Vec::new();
        let (event_tx, _event_rx) = mpsc::channel(EVENT_CAPACITY);
        run_connection(&mut sent, stream::pending(), out_rx, event_tx, sink_shutdown).await;

        assert_eq!(sent.len(), 1);
        let Message::Text(json) = &sent[0] else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(json.as_str()).unwrap();
        assert_eq!(value["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(value["realtimeInput"]["audio"]["data"], "AAAAQA==");
    }

    #[test]
    fn full_queue_drops_frames() {
        let (out_tx, _out_rx) = mpsc::channel(1);
        let sink = GeminiSink {
            tx: out_tx,
            shutdown: CancellationToken::new(),
        };
        let frame = encode_pcm16(&[0.0], 16000);

        assert!(sink.send_audio(frame.clone()).is_ok());
        assert_eq!(sink.send_audio(frame.clone()), Err(TransmissionError::Backpressure));

        sink.close();
        sink.close();
        assert_eq!(sink.send_audio(frame), Err(TransmissionError::Closed));
    }
}
