//! Parley - real-time voice conversation from the terminal
//!
//! Usage: `parley [config.json]`. Talks until Ctrl+C or until the
//! remote side ends the conversation.

use parley::audio::CpalBackend;
use parley::credentials::EnvCredentialProvider;
use parley::live::GeminiLiveChannel;
use parley::visualizer::{Renderer, TerminalRenderer};
use parley::{AppConfig, SessionController, SessionEvent, SessionStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Parley v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("parley.json"));
    let config = AppConfig::load(&config_path);

    let (inputs, outputs) = CpalBackend::list_devices();
    tracing::info!("Input devices: {:?}", inputs);
    tracing::info!("Output devices: {:?}", outputs);

    let mut controller = SessionController::new(
        config.clone(),
        Arc::new(CpalBackend),
        Arc::new(GeminiLiveChannel::new(config.endpoint.clone())),
        Arc::new(EnvCredentialProvider::new(config.api_key_vars.clone())),
    );
    if config.visualizer.enabled {
        controller = controller.with_renderer(Box::new(|| {
            Box::new(TerminalRenderer::new()) as Box<dyn Renderer>
        }));
    }
    let controller = Arc::new(controller);

    let mut events = controller.subscribe();
    if let Err(e) = controller.start().await {
        anyhow::bail!(e.user_message());
    }
    println!("Connected. Start talking; press Ctrl+C to hang up.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, hanging up");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StatusChanged(status)) => {
                    tracing::info!("Status: {}", status.as_str());
                    if matches!(status, SessionStatus::Closed | SessionStatus::Idle) {
                        break;
                    }
                }
                Ok(SessionEvent::Error(message)) => eprintln!("\n{}", message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Skipped {} session events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    controller.stop().await;
    println!("Conversation ended.");
    Ok(())
}
