//! Playback pipeline
//!
//! Schedules decoded model audio on the output timeline.

mod scheduler;

pub use scheduler::{PlaybackError, PlaybackScheduler, ScheduledChunk};
