//! In-memory audio backend. Activated by tests and by hosts without audio hardware.
//!
//! The microphone is a ring buffer whose producer half the caller keeps, so a
//! test can feed exact samples. The output context has a manual clock and
//! records every `schedule` call instead of rendering.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use super::{AudioBackend, MicConstraints, MicrophoneStream, OutputContext};
use crate::{
    buffering::{create_audio_ring, AudioConsumer, AudioProducer},
    codec::AudioBuffer,
    error::{LiveError, Result},
};

/// One recorded `OutputContext::schedule` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledPlayback {
    pub start_at: f64,
    pub duration: f64,
    pub samples: usize,
}

/// Shared state of the most recently opened stub output.
#[derive(Debug, Default)]
pub struct StubOutputState {
    pub now: Mutex<f64>,
    pub scheduled: Mutex<Vec<ScheduledPlayback>>,
    pub closed: AtomicBool,
    pub fail_close: AtomicBool,
}

impl StubOutputState {
    /// Move the manual clock.
    pub fn set_time(&self, seconds: f64) {
        *self.now.lock() = seconds;
    }

    pub fn scheduled(&self) -> Vec<ScheduledPlayback> {
        self.scheduled.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct StubOutput {
    sample_rate: u32,
    state: Arc<StubOutputState>,
    live: Arc<AtomicUsize>,
}

impl OutputContext for StubOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        *self.state.now.lock()
    }

    fn schedule(&self, buffer: AudioBuffer, start_at: f64) -> Result<()> {
        if self.state.is_closed() {
            return Err(LiveError::AudioStream("output context is closed".into()));
        }
        self.state.scheduled.lock().push(ScheduledPlayback {
            start_at,
            duration: buffer.duration_secs(),
            samples: buffer.samples.len(),
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
        if self.state.fail_close.load(Ordering::Acquire) {
            return Err(LiveError::Cleanup("stub output refused to close".into()));
        }
        Ok(())
    }
}

struct StubMicrophone {
    sample_rate: u32,
    reader: Option<AudioConsumer>,
    enabled: Arc<AtomicBool>,
    stopped: bool,
    live: Arc<AtomicUsize>,
}

impl MicrophoneStream for StubMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn take_reader(&mut self) -> Option<AudioConsumer> {
        self.reader.take()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn stop(&mut self) -> Result<()> {
        if !self.stopped {
            self.stopped = true;
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

/// Scriptable backend with live-handle accounting.
#[derive(Default)]
pub struct StubBackend {
    mic_rate: Option<u32>,
    fail_microphone: AtomicBool,
    fail_output: AtomicBool,
    live_microphones: Arc<AtomicUsize>,
    live_outputs: Arc<AtomicUsize>,
    acquisitions: AtomicUsize,
    producer: Mutex<Option<AudioProducer>>,
    mic_enabled: Mutex<Option<Arc<AtomicBool>>>,
    output: Mutex<Option<Arc<StubOutputState>>>,
    last_constraints: Mutex<Option<MicConstraints>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `rate` as the microphone's native rate instead of the requested one.
    pub fn with_mic_rate(rate: u32) -> Self {
        Self {
            mic_rate: Some(rate),
            ..Self::default()
        }
    }

    pub fn fail_microphone(&self, fail: bool) {
        self.fail_microphone.store(fail, Ordering::Release);
    }

    pub fn fail_output(&self, fail: bool) {
        self.fail_output.store(fail, Ordering::Release);
    }

    /// Producer half of the latest microphone's ring.
    pub fn take_mic_producer(&self) -> Option<AudioProducer> {
        self.producer.lock().take()
    }

    /// Whether the latest microphone track is enabled.
    pub fn mic_enabled(&self) -> Option<bool> {
        self.mic_enabled
            .lock()
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
    }

    pub fn output(&self) -> Option<Arc<StubOutputState>> {
        self.output.lock().clone()
    }

    pub fn last_constraints(&self) -> Option<MicConstraints> {
        self.last_constraints.lock().clone()
    }

    /// Microphones acquired and not yet stopped.
    pub fn live_microphones(&self) -> usize {
        self.live_microphones.load(Ordering::Acquire)
    }

    /// Outputs opened and not yet closed.
    pub fn live_outputs(&self) -> usize {
        self.live_outputs.load(Ordering::Acquire)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Acquire)
    }
}

impl AudioBackend for StubBackend {
    fn acquire_microphone(
        &self,
        constraints: &MicConstraints,
    ) -> Result<Box<dyn MicrophoneStream>> {
        *self.last_constraints.lock() = Some(constraints.clone());
        if self.fail_microphone.load(Ordering::Acquire) {
            return Err(LiveError::DeviceUnavailable("stub microphone denied".into()));
        }

        let (producer, consumer) = create_audio_ring();
        let enabled = Arc::new(AtomicBool::new(true));
        *self.producer.lock() = Some(producer);
        *self.mic_enabled.lock() = Some(Arc::clone(&enabled));
        self.acquisitions.fetch_add(1, Ordering::AcqRel);
        self.live_microphones.fetch_add(1, Ordering::AcqRel);

        Ok(Box::new(StubMicrophone {
            sample_rate: self.mic_rate.unwrap_or(constraints.sample_rate),
            reader: Some(consumer),
            enabled,
            stopped: false,
            live: Arc::clone(&self.live_microphones),
        }))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        _preferred_device: Option<&str>,
    ) -> Result<Arc<dyn OutputContext>> {
        if self.fail_output.load(Ordering::Acquire) {
            return Err(LiveError::DeviceUnavailable("stub output denied".into()));
        }
        let state = Arc::new(StubOutputState::default());
        *self.output.lock() = Some(Arc::clone(&state));
        self.live_outputs.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(StubOutput {
            sample_rate,
            state,
            live: Arc::clone(&self.live_outputs),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn microphone_accounting_tracks_stop() {
        let backend = StubBackend::new();
        let mut mic = backend
            .acquire_microphone(&MicConstraints::default())
            .expect("mic");
        assert_eq!(backend.live_microphones(), 1);
        assert!(mic.take_reader().is_some());
        assert!(mic.take_reader().is_none());
        mic.stop().expect("stop");
        mic.stop().expect("second stop is a no-op");
        assert_eq!(backend.live_microphones(), 0);
    }

    #[test]
    fn closed_output_rejects_schedule() {
        let backend = StubBackend::new();
        let output = backend.open_output(24_000, None).expect("output");
        output
            .schedule(AudioBuffer::new(vec![0.0; 240], 24_000, 1), 0.0)
            .expect("schedule");
        output.close().expect("close");
        output.close().expect("second close is a no-op");
        assert!(output
            .schedule(AudioBuffer::new(vec![0.0; 240], 24_000, 1), 0.0)
            .is_err());
        assert_eq!(backend.live_outputs(), 0);
    }

    #[test]
    fn denied_microphone_is_device_unavailable() {
        let backend = StubBackend::new();
        backend.fail_microphone(true);
        let err = backend
            .acquire_microphone(&MicConstraints::default())
            .err()
            .expect("denied");
        assert!(matches!(err, LiveError::DeviceUnavailable(_)));
        assert_eq!(backend.live_microphones(), 0);
    }
}
