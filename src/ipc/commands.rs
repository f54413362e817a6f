//! Commands exposed to the UI
//!
//! Each command maps onto one controller operation and reports failures
//! as user-facing strings.

use crate::session::{SessionController, SessionError, SessionStatus};
use serde::Serialize;
use std::sync::Arc;

/// Application state shared with the UI shell
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
}

impl AppState {
    pub fn new(controller: SessionController) -> Self {
        Self {
            controller: Arc::new(controller),
        }
    }
}

/// Status snapshot for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub is_connected: bool,
    pub is_speaking: bool,
}

impl From<SessionStatus> for StatusResponse {
    fn from(status: SessionStatus) -> Self {
        Self {
            status: status.as_str().to_string(),
            is_connected: status.is_connected(),
            is_speaking: status == SessionStatus::Speaking,
        }
    }
}

/// Start a conversation
///
/// # UI command
/// ```ignore
/// async fn start_conversation(state: State<'_, AppState>) -> Result<(), String>
/// ```
pub async fn start_conversation(state: &AppState) -> Result<(), String> {
    match state.controller.start().await {
        Ok(()) => Ok(()),
        Err(SessionError::Aborted) => {
            tracing::debug!("Start superseded by stop");
            Ok(())
        }
        Err(e) => Err(e.user_message()),
    }
}

/// Stop the conversation. Always succeeds.
pub async fn stop_conversation(state: &AppState) -> Result<(), String> {
    state.controller.stop().await;
    Ok(())
}

/// Return the current session status
pub async fn get_status(state: &AppState) -> Result<StatusResponse, String> {
    Ok(state.controller.status().await.into())
}
