//! Parley - real-time voice conversation core
//!
//! Streams the microphone to a hosted speech model over a bidirectional
//! channel and plays the model's spoken replies back without gaps.

pub mod audio;
pub mod config;
pub mod credentials;
pub mod ipc;
pub mod live;
pub mod playback;
pub mod session;
pub mod visualizer;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use session::{SessionController, SessionError, SessionEvent, SessionStatus};
