//! Conversation session
//!
//! Owns the lifecycle of one live conversation: device acquisition,
//! the live channel, and the single teardown path.

mod controller;
mod error;

pub use controller::{RendererFactory, SessionController, SessionEvent, SessionStatus};
pub use error::SessionError;
