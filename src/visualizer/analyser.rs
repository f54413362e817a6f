//! Frequency analyser over the latest input samples

use crate::config::VisualizerConfig;
use ringbuf::{traits::*, HeapRb};
use std::f32::consts::PI;

/// Keeps the last `fft_size` samples and turns them into byte-scaled
/// frequency bins, like a Web Audio analyser node
pub struct Analyser {
    ring: HeapRb<f32>,
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    smoothed: Vec<f32>,
}

impl Analyser {
    pub fn new(config: &VisualizerConfig) -> Self {
        let fft_size = config.fft_size.max(2);
        Self {
            ring: HeapRb::new(fft_size),
            fft_size,
            smoothing: config.smoothing.clamp(0.0, 0.99),
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels.max(config.min_decibels + 1.0),
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    /// Append samples, dropping the oldest once the window is full
    pub fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.ring.push_overwrite(sample);
        }
    }

    /// `fft_size / 2` bins, 0 at `min_decibels` and below, 255 at `max_decibels` and above
    pub fn frequency_data(&mut self) -> Vec<u8> {
        let n = self.fft_size;

        // Hann-windowed frame, zero padded at the front until the ring fills
        let mut frame = vec![0.0f32; n];
        let offset = n - self.ring.occupied_len();
        for (i, &sample) in self.ring.iter().enumerate() {
            frame[offset + i] = sample;
        }
        for (i, value) in frame.iter_mut().enumerate() {
            *value *= 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos());
        }

        let range = self.max_decibels - self.min_decibels;
        let mut bins = Vec::with_capacity(n / 2);

        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (i, &x) in frame.iter().enumerate() {
                let phase = 2.0 * PI * (k * i % n) as f32 / n as f32;
                re += x * phase.cos();
                im -= x * phase.sin();
            }
            let magnitude = (re * re + im * im).sqrt() / n as f32;

            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;

            let db = 20.0 * smoothed.log10();
            let scaled = if db.is_finite() {
                255.0 * (db - self.min_decibels) / range
            } else {
                0.0
            };
            bins.push(scaled.clamp(0.0, 255.0) as u8);
        }

        bins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(smoothing: f32) -> VisualizerConfig {
        VisualizerConfig {
            fft_size: 256,
            smoothing,
            ..Default::default()
        }
    }

    #[test]
    fn silence_is_all_zero() {
        let mut analyser = Analyser::new(&config(0.0));
        assert_eq!(analyser.frequency_data(), vec![0u8; 128]);

        analyser.push(&[0.0; 512]);
        assert_eq!(analyser.frequency_data(), vec![0u8; 128]);
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let mut analyser = Analyser::new(&config(0.0));
        let samples: Vec<f32> = (0..1024)
            .map(|i| (2.0 * PI * 8.0 * i as f32 / 256.0).sin())
            .collect();
        analyser.push(&samples);

        let bins = analyser.frequency_data();

        assert_eq!(bins.len(), 128);
        assert_eq!(bins[8], 255);
        assert_eq!(bins[40], 0);
        assert_eq!(bins[100], 0);
    }

    #[test]
    fn smoothing_decays_towards_silence() {
        let mut analyser = Analyser::new(&config(0.5));
        let tone: Vec<f32> = (0..256)
            .map(|i| 0.001 * (2.0 * PI * 16.0 * i as f32 / 256.0).sin())
            .collect();
        analyser.push(&tone);
        let loud = analyser.frequency_data()[16];

        analyser.push(&[0.0; 256]);
        let fading = analyser.frequency_data()[16];

        assert!(loud > 0);
        assert!(fading > 0 && fading < loud);
    }
}
