//! Sample-accurate render timeline for the output device.
//!
//! The output callback pulls frames from a `PlaybackTimeline`. Each call
//! advances the device clock by exactly the number of frames rendered, so
//! `current_time()` is measured on the device's own clock, not wall time.
//! Sources are positioned by absolute frame index; anything not covered by a
//! source renders as silence.

use std::collections::VecDeque;

#[derive(Debug)]
struct ScheduledSource {
    start_frame: u64,
    samples: Vec<f32>,
}

impl ScheduledSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mono sources placed on an absolute frame timeline.
#[derive(Debug)]
pub struct PlaybackTimeline {
    sample_rate: u32,
    frames_rendered: u64,
    /// Sorted by `start_frame`.
    pending: VecDeque<ScheduledSource>,
}

impl PlaybackTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Device clock in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Place mono `samples` (at this timeline's rate) to start at `start_at` seconds.
    ///
    /// A start time already in the past plays from the current position with
    /// the elapsed head skipped.
    pub fn schedule(&mut self, start_at: f64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let start_frame = (start_at.max(0.0) * self.sample_rate as f64).round() as u64;
        let source = ScheduledSource {
            start_frame,
            samples,
        };
        let position = self
            .pending
            .iter()
            .rposition(|s| s.start_frame <= start_frame)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.pending.insert(position, source);
    }

    /// Number of sources not yet fully rendered.
    pub fn pending_sources(&self) -> usize {
        self.pending.len()
    }

    /// Render the next `out.len() / channels` frames, duplicating mono into every channel.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        out.fill(0.0);
        let frames = (out.len() / channels) as u64;
        let window_start = self.frames_rendered;
        let window_end = window_start + frames;

        for source in &self.pending {
            if source.start_frame >= window_end {
                break;
            }
            if source.end_frame() <= window_start {
                continue;
            }
            let from = source.start_frame.max(window_start);
            let to = source.end_frame().min(window_end);
            for frame in from..to {
                let value = source.samples[(frame - source.start_frame) as usize];
                let base = (frame - window_start) as usize * channels;
                for slot in &mut out[base..base + channels] {
                    *slot += value;
                }
            }
        }

        self.advance(frames);
    }

    /// Move the clock forward without producing output, dropping sources
    /// that finished in the skipped span.
    pub fn advance(&mut self, frames: u64) {
        self.frames_rendered += frames;
        while self
            .pending
            .front()
            .is_some_and(|s| s.end_frame() <= self.frames_rendered)
        {
            self.pending.pop_front();
        }
    }

    /// Drop every pending source. The clock keeps its position.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
