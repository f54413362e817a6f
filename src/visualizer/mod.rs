//! Live input visualizer
//!
//! Frequency bars computed from the most recent microphone samples and
//! drawn once per render tick. Purely cosmetic.

mod analyser;

pub use analyser::Analyser;

use crate::config::VisualizerConfig;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Analyser shared between the capture task and the render loop
pub type SharedAnalyser = Arc<Mutex<Analyser>>;

/// Draws one frame of bars (0..=255 each)
pub trait Renderer: Send {
    fn render(&mut self, bars: &[u8]);

    /// Wipe whatever was drawn
    fn clear(&mut self);
}

/// One-line block-character bar graph on stderr
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    drawn: bool,
}

impl TerminalRenderer {
    const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    pub fn new() -> Self {
        Self::default()
    }

    fn line(bars: &[u8]) -> String {
        bars.iter()
            .map(|&b| Self::LEVELS[(b as usize * (Self::LEVELS.len() - 1) + 127) / 255])
            .collect()
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, bars: &[u8]) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}", Self::line(bars));
        let _ = stderr.flush();
        self.drawn = true;
    }

    fn clear(&mut self) {
        if self.drawn {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\r\x1b[2K");
            let _ = stderr.flush();
            self.drawn = false;
        }
    }
}

/// Average frequency bins down to `bar_count` bars
pub fn group_bars(bins: &[u8], bar_count: usize) -> Vec<u8> {
    if bins.is_empty() || bar_count == 0 {
        return Vec::new();
    }
    let bar_count = bar_count.min(bins.len());
    (0..bar_count)
        .map(|i| {
            let start = i * bins.len() / bar_count;
            let end = ((i + 1) * bins.len() / bar_count).max(start + 1);
            let sum: u32 = bins[start..end].iter().map(|&b| b as u32).sum();
            (sum / (end - start) as u32) as u8
        })
        .collect()
}

/// Render loop. Returns once `cancel` fires; no tick runs after that.
pub async fn run(
    analyser: SharedAnalyser,
    mut renderer: Box<dyn Renderer>,
    config: VisualizerConfig,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.frame_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let bins = match analyser.lock() {
                    Ok(mut analyser) => analyser.frequency_data(),
                    Err(_) => break,
                };
                renderer.render(&group_bars(&bins, config.bar_count));
            }
        }
    }

    renderer.clear();
    tracing::debug!("Visualizer stopped");
}
