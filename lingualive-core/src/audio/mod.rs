//! Audio device abstraction.
//!
//! The engine never touches an OS audio API directly. It talks to an
//! [`AudioBackend`], which hands out a [`MicrophoneStream`] (the capture side)
//! and an [`OutputContext`] (the render side with its own clock).
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). The cpal backend therefore parks every stream on a dedicated host
//! thread and the handles returned here only carry channels and shared state,
//! which keeps them `Send` and lets the engine hold them across `.await`.

#[cfg(feature = "audio-cpal")]
pub mod cpal_backend;
pub mod device;
pub mod resample;
pub mod stub;
pub mod timeline;

use std::sync::Arc;

use crate::{buffering::AudioConsumer, codec::AudioBuffer, error::Result};

#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalBackend;
pub use stub::StubBackend;

/// Processing requested from the microphone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicConstraints {
    /// Rate the capture pipeline wants to produce. Devices may run at another
    /// rate; the pipeline resamples.
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Device name to prefer over the system default.
    pub preferred_device: Option<String>,
}

impl Default for MicConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            preferred_device: None,
        }
    }
}

/// A live microphone stream.
///
/// Samples are mono f32 at [`MicrophoneStream::sample_rate`], delivered
/// through a ring buffer whose consumer is taken once by the capture session.
pub trait MicrophoneStream: Send {
    /// Native rate of the samples written into the ring.
    fn sample_rate(&self) -> u32;

    /// Take the consumer half of the ring. Returns `None` after the first call.
    fn take_reader(&mut self) -> Option<AudioConsumer>;

    /// Enable or disable the track. A disabled track keeps producing silence.
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Stop every track and release the device. Idempotent.
    fn stop(&mut self) -> Result<()>;
}

/// A render context with its own monotonically advancing clock.
pub trait OutputContext: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Device clock in seconds since the context was opened.
    fn current_time(&self) -> f64;

    /// Play `buffer` as a one-shot source starting at `start_at` seconds on
    /// this context's clock.
    ///
    /// # Errors
    /// `LiveError::AudioStream` once the context is closed.
    fn schedule(&self, buffer: AudioBuffer, start_at: f64) -> Result<()>;

    /// Stop rendering and release the device. Blocks until the device is
    /// released. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Factory for device handles.
///
/// Both calls may block while the OS opens a device; the engine invokes them
/// from `spawn_blocking`.
pub trait AudioBackend: Send + Sync + 'static {
    /// # Errors
    /// `LiveError::DeviceUnavailable` if no microphone can be opened.
    fn acquire_microphone(&self, constraints: &MicConstraints)
        -> Result<Box<dyn MicrophoneStream>>;

    /// # Errors
    /// `LiveError::DeviceUnavailable` if no output device can be opened.
    fn open_output(
        &self,
        sample_rate: u32,
        preferred_device: Option<&str>,
    ) -> Result<Arc<dyn OutputContext>>;
}
