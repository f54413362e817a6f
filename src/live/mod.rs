//! Live speech channel
//!
//! Transport-independent channel traits plus the Gemini Live WebSocket
//! implementation.

mod channel;
mod gemini;
pub mod messages;

pub use channel::{
    ChannelConnection, ChannelEvent, ChannelSink, ConnectError, ConnectParams, LiveChannel,
    TransmissionError,
};
pub use gemini::GeminiLiveChannel;
