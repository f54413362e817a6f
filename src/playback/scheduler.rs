//! Gap-free playback scheduling
//!
//! Every inbound chunk starts at `max(cursor, now)` and pushes the cursor to
//! its end, so chunks play back-to-back in arrival order and never overlap.
//! Interruption silences everything still scheduled and pulls the cursor
//! back to the current clock.

use crate::audio::{decode_pcm16, ChunkId, DecodeError, OutputDevice, OutputError};
use std::collections::HashSet;
use thiserror::Error;

/// Errors for a single inbound chunk. Never fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

/// Placement of a chunk on the output timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub id: ChunkId,
    pub start_time: f64,
    pub duration: f64,
}

/// Playback timeline cursor plus the set of chunks not yet finished
#[derive(Debug)]
pub struct PlaybackScheduler {
    sample_rate: u32,
    cursor: f64,
    outstanding: HashSet<ChunkId>,
    next_id: ChunkId,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            cursor: 0.0,
            outstanding: HashSet::new(),
            next_id: 1,
        }
    }

    /// Earliest start time for the next chunk
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Number of chunks scheduled but not finished
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// True while any chunk is scheduled
    pub fn is_speaking(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// Decode a wire payload and schedule it
    pub fn enqueue_payload(
        &mut self,
        output: &mut dyn OutputDevice,
        payload: &str,
    ) -> Result<ScheduledChunk, PlaybackError> {
        let samples = decode_pcm16(payload)?;
        Ok(self.enqueue(output, samples)?)
    }

    /// Schedule decoded samples right after the previous chunk, or now if
    /// the timeline has drained
    pub fn enqueue(
        &mut self,
        output: &mut dyn OutputDevice,
        samples: Vec<f32>,
    ) -> Result<ScheduledChunk, OutputError> {
        let now = output.current_time();
        let start_time = self.cursor.max(now);
        let duration = samples.len() as f64 / self.sample_rate as f64;

        let id = self.next_id;
        output.schedule(id, samples, start_time)?;
        self.next_id += 1;
        self.outstanding.insert(id);
        self.cursor = start_time + duration;

        tracing::debug!(
            "Chunk {} scheduled at {:.3}s for {:.3}s ({} outstanding)",
            id,
            start_time,
            duration,
            self.outstanding.len()
        );

        Ok(ScheduledChunk {
            id,
            start_time,
            duration,
        })
    }

    /// Record natural completion of a chunk.
    ///
    /// Returns true when this completion emptied the outstanding set.
    pub fn complete(&mut self, id: ChunkId) -> bool {
        self.outstanding.remove(&id) && self.outstanding.is_empty()
    }

    /// Silence every outstanding chunk and reset the cursor to now
    pub fn interrupt(&mut self, output: &mut dyn OutputDevice) {
        let stopped = self.stop_all(output);
        self.cursor = output.current_time();
        tracing::info!(
            "Playback interrupted: {} chunk(s) stopped, cursor reset to {:.3}s",
            stopped,
            self.cursor
        );
    }

    /// Silence every outstanding chunk. Returns how many were stopped.
    pub fn stop_all(&mut self, output: &mut dyn OutputDevice) -> usize {
        let stopped = self.outstanding.len();
        for id in self.outstanding.drain() {
            output.stop(id);
        }
        stopped
    }
}
