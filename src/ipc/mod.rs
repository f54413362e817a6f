//! UI-facing commands
//!
//! Thin command layer between a UI shell and the session controller.

mod commands;

pub use commands::{get_status, start_conversation, stop_conversation, AppState, StatusResponse};
