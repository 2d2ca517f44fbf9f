//! # lingualive-core
//!
//! Real-time bidirectional speech translation pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → SPSC RingBuffer → Capture(spawn_blocking): resample, 4096 tap, RMS
//!                                            │ pcm::encode
//!                                            ▼
//!                                  TransportSender (FIFO until open)
//!                                            │
//!                                  remote session (Gemini Live)
//!                                            │ inline audio
//!                                            ▼
//!                    dispatcher → PlaybackScheduler → OutputContext timeline → speakers
//! ```
//!
//! `LiveEngine` owns every handle and is the only writer of `ConnectionState`.
//! The audio callbacks never allocate in steady state or block; all heap work
//! happens on the capture thread and the async tasks.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod language;
pub mod playback;
pub mod transport;

// Convenience re-exports for downstream crates
pub use audio::{AudioBackend, MicConstraints, StubBackend};
#[cfg(feature = "audio-cpal")]
pub use audio::CpalBackend;
pub use codec::{AudioBuffer, AudioFrame};
pub use engine::{DiagnosticsSnapshot, EngineConfig, LiveEngine, ResourceSnapshot};
pub use error::{LiveError, Result};
pub use ipc::events::{ConnectionState, ConnectionStateEvent, VolumeEvent};
pub use language::{Language, LanguagePair, SUPPORTED_LANGUAGES};
pub use transport::{GeminiLiveConnector, SessionConnector, StubConnector};
