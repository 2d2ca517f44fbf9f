//! Gapless playback scheduling on the output clock.
//!
//! Each inbound frame is decoded and placed at `max(cursor, now)` so that
//! consecutive frames abut exactly while the queue is ahead of the clock, and a
//! frame arriving after the queue ran dry starts immediately instead of in the
//! past. The cursor only moves after a frame has decoded and been scheduled.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tracing::{debug, warn};

use crate::{
    audio::OutputContext,
    codec::pcm,
    engine::diagnostics::SessionDiagnostics,
    error::Result,
};

/// Playback rate of inbound audio.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Next start time on the output clock, in seconds.
///
/// Written only by the session's [`PlaybackScheduler`]; readable anywhere.
/// Once retired the cursor reads zero and ignores further writes, so a
/// scheduler that outlives its session cannot move it.
#[derive(Debug)]
pub struct PlaybackCursor(AtomicU64);

// A NaN bit pattern no finite start time can produce.
const RETIRED: u64 = u64::MAX;

impl Default for PlaybackCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackCursor {
    pub fn new() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }

    pub fn get(&self) -> f64 {
        match self.0.load(Ordering::Acquire) {
            RETIRED => 0.0,
            bits => f64::from_bits(bits),
        }
    }

    /// Returns `false` if the cursor was already retired.
    fn set(&self, seconds: f64) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (bits != RETIRED).then_some(seconds.to_bits())
            })
            .is_ok()
    }

    pub fn retire(&self) {
        self.0.store(RETIRED, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.0.load(Ordering::Acquire) == RETIRED
    }
}

/// Single writer of one session's [`PlaybackCursor`].
pub struct PlaybackScheduler {
    output: Arc<dyn OutputContext>,
    cursor: Arc<PlaybackCursor>,
    sample_rate: u32,
    diagnostics: Arc<SessionDiagnostics>,
}

impl PlaybackScheduler {
    pub fn new(
        output: Arc<dyn OutputContext>,
        cursor: Arc<PlaybackCursor>,
        sample_rate: u32,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Self {
        Self {
            output,
            cursor,
            sample_rate,
            diagnostics,
        }
    }

    pub fn cursor(&self) -> f64 {
        self.cursor.get()
    }

    /// Decode `wire` and schedule it. Returns the start time used.
    ///
    /// # Errors
    /// `LiveError::MalformedAudioData` for an undecodable frame, or the output's
    /// error if it refuses the buffer. The cursor is unchanged in both cases.
    pub fn enqueue(&mut self, wire: &str) -> Result<f64> {
        let bytes = pcm::decode(wire)?;
        let buffer = pcm::bytes_to_audio_buffer(&bytes, self.sample_rate, 1)?;
        if buffer.is_empty() {
            return Ok(self.cursor.get());
        }

        let now = self.output.current_time();
        let start_at = self.cursor.get().max(now);
        let duration = buffer.duration_secs();
        self.output.schedule(buffer, start_at)?;
        if !self.cursor.set(start_at + duration) {
            debug!("session ended while scheduling; cursor left retired");
            return Ok(start_at);
        }

        debug!(start_at, duration, lead = start_at - now, "frame scheduled");
        Ok(start_at)
    }

    /// [`PlaybackScheduler::enqueue`] with failures logged and counted instead of returned.
    pub fn enqueue_or_drop(&mut self, wire: &str) -> Option<f64> {
        match self.enqueue(wire) {
            Ok(start_at) => {
                self.diagnostics
                    .frames_scheduled
                    .fetch_add(1, Ordering::Relaxed);
                Some(start_at)
            }
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                self.diagnostics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}
