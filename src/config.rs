//! Application configuration
//!
//! Loaded from a JSON file; anything missing falls back to defaults.

use crate::audio::{CaptureConfig, PlaybackConfig};
use crate::live::ConnectParams;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default WebSocket endpoint of the hosted live speech service
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model identifier sent in the setup message
    pub model: String,
    /// Prebuilt voice used for model audio
    pub voice: String,
    /// System instruction for the conversation
    pub system_instruction: String,
    /// WebSocket endpoint of the live service
    pub endpoint: String,
    /// Environment variables consulted for the API key, in order
    pub api_key_vars: Vec<String>,
    /// Microphone sample rate sent on the wire (Hz)
    pub input_sample_rate: u32,
    /// Sample rate of model audio (Hz)
    pub output_sample_rate: u32,
    /// Capture frame size in samples
    pub frame_size: usize,
    /// Poll interval of the capture ring buffer (ms)
    pub capture_poll_ms: u64,
    pub visualizer: VisualizerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "You are a friendly assistant having a spoken conversation. \
                Keep your answers short and natural."
                .to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_vars: vec!["GEMINI_API_KEY".to_string(), "API_KEY".to_string()],
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_size: 4096,
            capture_poll_ms: 10,
            visualizer: VisualizerConfig::default(),
        }
    }
}

/// Live waveform visualizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub enabled: bool,
    /// Analysis window (power of two)
    pub fft_size: usize,
    /// Number of bars drawn per frame
    pub bar_count: usize,
    /// Render tick period (ms)
    pub frame_interval_ms: u64,
    /// Time smoothing between analyser frames, in [0, 1)
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fft_size: 256,
            bar_count: 32,
            frame_interval_ms: 33,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AppConfig {
    /// Load config from disk, or return defaults
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => {
                        tracing::info!("Config loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => tracing::warn!("Invalid config, using defaults: {}", e),
                },
                Err(e) => tracing::warn!("Cannot read config: {}", e),
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::error!("Config save error: {}", e);
                } else {
                    tracing::info!("Config saved to {}", path.display());
                }
            }
            Err(e) => tracing::error!("Config serialization error: {}", e),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.input_sample_rate,
            frame_size: self.frame_size,
            poll_interval_ms: self.capture_poll_ms,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.output_sample_rate,
        }
    }

    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            model: self.model.clone(),
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }
}
