//! cpal implementation of [`AudioBackend`].
//!
//! # Design constraints
//!
//! cpal callbacks run on an OS audio thread at elevated priority. They must
//! not block on a mutex, perform I/O, or allocate in the steady state:
//!
//! - the input callback downmixes to mono and writes into the SPSC ring
//!   (`push_slice` is lock-free and allocation-free);
//! - the output callback renders the [`PlaybackTimeline`] under `try_lock` and
//!   emits silence when the scheduler happens to hold the lock.
//!
//! Each `cpal::Stream` lives on its own host thread from open to drop. Open
//! success or failure is reported back over a channel, and dropping the handle's
//! stop sender lets the host thread fall through and drop the stream.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread::JoinHandle,
};

use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{
    device::{open_input_device, open_output_device},
    resample::convert_once,
    timeline::PlaybackTimeline,
    AudioBackend, MicConstraints, MicrophoneStream, OutputContext,
};
use crate::{
    buffering::{create_audio_ring, AudioConsumer, AudioProducer, Producer},
    codec::AudioBuffer,
    error::{LiveError, Result},
};

/// Opens real devices through the default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Keeps a stream alive on its host thread until told to stop.
struct HostThread {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HostThread {
    /// Spawn `open` on a fresh thread and wait for it to report the stream's
    /// sample rate (or its failure).
    fn spawn<F>(name: &str, open: F) -> Result<(Self, u32)>
    where
        F: FnOnce() -> Result<(Stream, u32)> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match open() {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns on an explicit stop or when the handle is dropped.
                let _ = stop_rx.recv();
                if let Err(e) = stream.pause() {
                    debug!("stream pause on shutdown failed: {e}");
                }
                drop(stream);
            })?;

        let rate = ready_rx
            .recv()
            .map_err(|_| LiveError::DeviceUnavailable(format!("{name} thread exited early")))??;

        Ok((
            Self {
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            },
            rate,
        ))
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| LiveError::Cleanup("audio host thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl AudioBackend for CpalBackend {
    fn acquire_microphone(
        &self,
        constraints: &MicConstraints,
    ) -> Result<Box<dyn MicrophoneStream>> {
        // cpal exposes no capture processing switches; the OS defaults apply.
        debug!(
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            auto_gain_control = constraints.auto_gain_control,
            "microphone processing requested"
        );

        let (producer, consumer) = create_audio_ring();
        let enabled = Arc::new(AtomicBool::new(true));
        let preferred = constraints.preferred_device.clone();
        let flag = Arc::clone(&enabled);

        let (host, sample_rate) = HostThread::spawn("lingualive-mic", move || {
            open_input(preferred.as_deref(), producer, flag)
        })?;

        Ok(Box::new(CpalMicrophone {
            sample_rate,
            reader: Some(consumer),
            enabled,
            host,
        }))
    }

    fn open_output(
        &self,
        sample_rate: u32,
        preferred_device: Option<&str>,
    ) -> Result<Arc<dyn OutputContext>> {
        let preferred = preferred_device.map(str::to_string);
        // The timeline's rate is only known once the device config is chosen.
        let slot: Arc<Mutex<Option<Arc<Mutex<PlaybackTimeline>>>>> = Arc::new(Mutex::new(None));
        let slot_for_thread = Arc::clone(&slot);

        let (host, device_rate) = HostThread::spawn("lingualive-output", move || {
            open_output_stream(preferred.as_deref(), sample_rate, &slot_for_thread)
        })?;

        let timeline = slot
            .lock()
            .take()
            .ok_or_else(|| LiveError::DeviceUnavailable("output timeline missing".into()))?;

        Ok(Arc::new(CpalOutput {
            device_rate,
            timeline,
            closed: AtomicBool::new(false),
            host: Mutex::new(host),
        }))
    }
}

struct CpalMicrophone {
    sample_rate: u32,
    reader: Option<AudioConsumer>,
    enabled: Arc<AtomicBool>,
    host: HostThread,
}

impl MicrophoneStream for CpalMicrophone {
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
        self.host.shutdown()
    }
}

struct CpalOutput {
    device_rate: u32,
    timeline: Arc<Mutex<PlaybackTimeline>>,
    closed: AtomicBool,
    host: Mutex<HostThread>,
}

impl OutputContext for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.device_rate
    }

    fn current_time(&self) -> f64 {
        self.timeline.lock().current_time()
    }

    fn schedule(&self, buffer: AudioBuffer, start_at: f64) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LiveError::AudioStream("output context is closed".into()));
        }
        let mono = downmix(&buffer);
        let samples = convert_once(buffer.sample_rate, self.device_rate, &mono)?;
        self.timeline.lock().schedule(start_at, samples);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.timeline.lock().clear();
        self.host.lock().shutdown()
    }
}

fn downmix(buffer: &AudioBuffer) -> Vec<f32> {
    let channels = buffer.channels.max(1) as usize;
    if channels == 1 {
        return buffer.samples.clone();
    }
    buffer
        .samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn open_input(
    preferred: Option<&str>,
    producer: AudioProducer,
    enabled: Arc<AtomicBool>,
) -> Result<(Stream, u32)> {
    let device = open_input_device(preferred)?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| LiveError::DeviceUnavailable(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(sample_rate, channels, "input config selected");

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, producer, enabled),
        SampleFormat::I16 => build_input::<i16>(&device, &config, producer, enabled),
        SampleFormat::U16 => build_input::<u16>(&device, &config, producer, enabled),
        SampleFormat::U8 => build_input::<u8>(&device, &config, producer, enabled),
        fmt => {
            return Err(LiveError::AudioStream(format!(
                "unsupported input sample format: {fmt:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| LiveError::AudioStream(e.to_string()))?;
    Ok((stream, sample_rate))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: AudioProducer,
    enabled: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ch = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::with_capacity(4096);

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                let frames = data.len() / ch;
                mono.resize(frames, 0.0);
                if enabled.load(Ordering::Relaxed) {
                    for (f, slot) in mono.iter_mut().enumerate() {
                        let base = f * ch;
                        let sum: f32 = data[base..base + ch]
                            .iter()
                            .map(|&s| s.to_sample::<f32>())
                            .sum();
                        *slot = sum / ch as f32;
                    }
                } else {
                    mono.fill(0.0);
                }
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!("ring buffer full: dropped {} samples", mono.len() - written);
                }
            },
            |err| error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| LiveError::AudioStream(e.to_string()))
}

fn open_output_stream(
    preferred: Option<&str>,
    requested_rate: u32,
    slot: &Mutex<Option<Arc<Mutex<PlaybackTimeline>>>>,
) -> Result<(Stream, u32)> {
    let device = open_output_device(preferred)?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    // Run at the wire rate when the device can, so frames play unresampled.
    let native = device
        .supported_output_configs()
        .ok()
        .and_then(|mut ranges| {
            ranges.find(|r| {
                r.sample_format() == SampleFormat::F32
                    && r.min_sample_rate().0 <= requested_rate
                    && r.max_sample_rate().0 >= requested_rate
            })
        })
        .map(|r| r.with_sample_rate(SampleRate(requested_rate)));
    let supported = match native {
        Some(config) => config,
        None => device
            .default_output_config()
            .map_err(|e| LiveError::DeviceUnavailable(e.to_string()))?,
    };

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    info!(sample_rate, channels, requested_rate, "output config selected");

    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let timeline = Arc::new(Mutex::new(PlaybackTimeline::new(sample_rate)));
    *slot.lock() = Some(Arc::clone(&timeline));

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output::<f32>(&device, &config, timeline),
        SampleFormat::I16 => build_output::<i16>(&device, &config, timeline),
        SampleFormat::U16 => build_output::<u16>(&device, &config, timeline),
        fmt => {
            return Err(LiveError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| LiveError::AudioStream(e.to_string()))?;
    Ok((stream, sample_rate))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    timeline: Arc<Mutex<PlaybackTimeline>>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let ch = config.channels.max(1) as usize;
    let mut scratch: Vec<f32> = Vec::with_capacity(8192);
    // Frames played as silence while the scheduler held the lock.
    let mut missed: u64 = 0;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info| {
                scratch.resize(data.len(), 0.0);
                match timeline.try_lock() {
                    Some(mut timeline) => {
                        if missed > 0 {
                            timeline.advance(missed);
                            missed = 0;
                        }
                        timeline.render(&mut scratch, ch);
                    }
                    None => {
                        scratch.fill(0.0);
                        missed += (data.len() / ch) as u64;
                    }
                }
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| LiveError::AudioStream(e.to_string()))
}
