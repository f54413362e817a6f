//! Live API WebSocket message types
//!
//! Client messages (sent to server):
//! - setup - model, response modality, voice and system instruction
//! - realtimeInput - one base64 PCM16 audio block
//!
//! Server messages (received from server):
//! - setupComplete - session ready
//! - serverContent - model turn parts (inline audio), interruption flag,
//!   turn completion
//! - goAway - server is about to close the connection

use super::channel::{ChannelEvent, ConnectParams};
use crate::audio::EncodedAudio;
use serde::{Deserialize, Serialize};

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent to the server
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// First message of every connection
    pub fn setup(params: &ConnectParams) -> Self {
        let system_instruction = if params.system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                parts: vec![Part::text(&params.system_instruction)],
            })
        };

        ClientMessage::Setup(Setup {
            model: params.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: params.voice.clone(),
                        },
                    },
                },
            },
            system_instruction,
        })
    }

    /// One microphone frame
    pub fn audio(chunk: EncodedAudio) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: chunk.mime_type,
                data: chunk.data,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    pub audio: Blob,
}

// =============================================================================
// Shared Types
// =============================================================================

/// Inline binary data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Messages received from the server. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

impl ServerMessage {
    /// Translate into channel events. Interruption comes before any audio
    /// carried by the same message.
    pub fn into_events(self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ChannelEvent::Opened);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(ChannelEvent::Interrupted);
            }
            if let Some(turn) = content.model_turn {
                events.extend(
                    turn.parts
                        .into_iter()
                        .filter_map(|part| part.inline_data)
                        .filter(|blob| blob.mime_type.starts_with("audio/"))
                        .map(|blob| ChannelEvent::AudioReceived(blob.data)),
                );
            }
            if content.turn_complete {
                tracing::debug!("Model turn complete");
            }
        }

        if self.go_away.is_some() {
            tracing::warn!("Server announced it will close the connection soon");
        }

        events
    }
}
