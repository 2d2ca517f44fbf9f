//! Capture pipeline: microphone ring → resample → fixed-size tap → wire frames.
//!
//! ## Per iteration
//!
//! ```text
//! 1. Drain the microphone ring (device rate, mono)
//! 2. Resample to the wire input rate (passthrough when equal)
//! 3. Cut into blocks of exactly `block_size` samples
//! 4. Per block: publish RMS × gain, encode, queue on the transport
//! 5. Hand the block to the discard sink
//! ```
//!
//! The loop runs in `spawn_blocking` so the async runtime stays free for the
//! transport. Queuing a frame never blocks: the transport sender is unbounded.

pub mod meter;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{
    audio::resample::RateConverter,
    buffering::{AudioConsumer, Consumer},
    codec::pcm,
    engine::diagnostics::SessionDiagnostics,
    error::{LiveError, Result},
    transport::TransportSender,
};

pub use meter::VolumeMeter;

/// Samples per processing block at the wire rate (256 ms at 16 kHz).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Applied to block RMS before it is published. The result may exceed 1.0.
pub const VOLUME_GAIN: f32 = 5.0;

/// Ring drain size per iteration.
const DRAIN_CHUNK: usize = 1024;

/// Sleep when the ring is empty, to avoid spinning a core.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    // f64 accumulator: an f32 sum over a whole block drifts visibly.
    let sum_sq = samples
        .iter()
        .map(|&s| f64::from(s) * f64::from(s))
        .sum::<f64>();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Fixed-size processing tap. Accumulates input and emits whole blocks only.
#[derive(Debug)]
pub struct CaptureTap {
    block_size: usize,
    pending: Vec<f32>,
}

impl CaptureTap {
    /// # Errors
    /// `LiveError::Configuration` unless `block_size` is a non-zero power of two.
    pub fn new(block_size: usize) -> Result<Self> {
        if !block_size.is_power_of_two() {
            return Err(LiveError::Configuration(format!(
                "block size must be a power of two, got {block_size}"
            )));
        }
        Ok(Self {
            block_size,
            pending: Vec::with_capacity(block_size * 2),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Append `samples`, calling `on_block` once per completed block in order.
    pub fn push(&mut self, samples: &[f32], mut on_block: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(samples);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.block_size {
            on_block(&self.pending[consumed..consumed + self.block_size]);
            consumed += self.block_size;
        }
        self.pending.drain(..consumed);
    }

    /// Samples waiting for a full block.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Where a tap block goes after it has been metered and encoded.
pub trait TapOutput: Send {
    fn consume(&mut self, block: &[f32]);
}

/// Zero-gain terminal: blocks end here and are never monitored or played.
#[derive(Debug, Default)]
pub struct DiscardSink {
    blocks: u64,
}

impl DiscardSink {
    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}

impl TapOutput for DiscardSink {
    fn consume(&mut self, _block: &[f32]) {
        self.blocks += 1;
    }
}

/// Knobs for one capture session.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub target_rate: u32,
    pub block_size: usize,
    pub volume_gain: f32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            target_rate: 16_000,
            block_size: DEFAULT_BLOCK_SIZE,
            volume_gain: VOLUME_GAIN,
        }
    }
}

/// State owned by the blocking capture loop.
struct CaptureLoop {
    reader: AudioConsumer,
    converter: RateConverter,
    tap: CaptureTap,
    sink: Box<dyn TapOutput>,
    sender: TransportSender,
    meter: Arc<VolumeMeter>,
    diagnostics: Arc<SessionDiagnostics>,
    volume_gain: f32,
    attached: Arc<AtomicBool>,
}

impl CaptureLoop {
    fn run(mut self) {
        info!("capture started");
        let mut raw = vec![0f32; DRAIN_CHUNK];

        while self.attached.load(Ordering::Acquire) {
            let n = self.reader.pop_slice(&mut raw);
            if n == 0 {
                std::thread::sleep(EMPTY_SLEEP);
                continue;
            }
            self.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

            let resampled = self.converter.process(&raw[..n]);
            if resampled.is_empty() {
                continue;
            }

            let Self {
                tap,
                sink,
                sender,
                meter,
                diagnostics,
                volume_gain,
                attached,
                ..
            } = &mut self;
            tap.push(&resampled, |block| {
                // Detached mid-push: stop producing frames.
                if !attached.load(Ordering::Acquire) {
                    return;
                }
                meter.publish(compute_rms(block) * *volume_gain);
                diagnostics.blocks_captured.fetch_add(1, Ordering::Relaxed);
                if sender.send_media(pcm::encode(block)) {
                    diagnostics.frames_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    debug!("transport gone, frame not queued");
                }
                sink.consume(block);
            });
        }

        let snap = self.diagnostics.snapshot();
        info!(
            samples_in = snap.samples_in,
            blocks_captured = snap.blocks_captured,
            frames_sent = snap.frames_sent,
            "capture stopped"
        );
    }
}

/// One attached capture graph. Exactly one exists per engine session.
pub struct CaptureSession {
    attached: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Attach a capture loop to `reader` (mono at `source_rate`).
    ///
    /// Any backlog already in the ring is discarded so the first frame holds
    /// audio from after the attach.
    ///
    /// # Errors
    /// `LiveError::Configuration` for a bad block size, `LiveError::AudioStream`
    /// if the resampler cannot be built.
    pub fn start(
        mut reader: AudioConsumer,
        source_rate: u32,
        settings: CaptureSettings,
        sender: TransportSender,
        meter: Arc<VolumeMeter>,
        diagnostics: Arc<SessionDiagnostics>,
    ) -> Result<Self> {
        let tap = CaptureTap::new(settings.block_size)?;
        let converter = RateConverter::new(source_rate, settings.target_rate, DRAIN_CHUNK)?;
        if !converter.is_passthrough() {
            info!(
                from = source_rate,
                to = settings.target_rate,
                "capture resampling enabled"
            );
        }
        let dropped = reader.clear();
        if dropped > 0 {
            debug!(dropped, "discarded microphone backlog");
        }

        let attached = Arc::new(AtomicBool::new(true));
        let worker = CaptureLoop {
            reader,
            converter,
            tap,
            sink: Box::new(DiscardSink::default()),
            sender,
            meter,
            diagnostics,
            volume_gain: settings.volume_gain,
            attached: Arc::clone(&attached),
        };
        let task = tokio::task::spawn_blocking(move || worker.run());

        Ok(Self {
            attached,
            task: Some(task),
        })
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Detach the tap and the source. No block is processed afterwards.
    pub fn disconnect(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// Wait for the capture loop to exit. Implies [`CaptureSession::disconnect`].
    ///
    /// # Errors
    /// `LiveError::Cleanup` if the loop panicked.
    pub async fn close(&mut self) -> Result<()> {
        self.disconnect();
        match self.task.take() {
            Some(task) => task.await.map_err(|e| {
                error!("capture loop ended abnormally: {e}");
                LiveError::Cleanup(format!("capture loop: {e}"))
            }),
            None => Ok(()),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
