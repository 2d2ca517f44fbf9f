//! `LiveEngine`: lifecycle controller and sole writer of [`ConnectionState`].
//!
//! ## Lifecycle
//!
//! ```text
//! LiveEngine::new()
//!     └─► start()         teardown → Connecting → open output, microphone, session
//!         └─► Open        → Connected, capture attached
//!             └─► end_call() / remote close → teardown → Disconnected
//!                 └─► (debounce) → Idle
//! any failure → Error → teardown → (debounce) → Idle
//! ```
//!
//! ## Serialization
//!
//! Every lifecycle step runs under one async lock on the session resources,
//! so start, end-call and transport callbacks never interleave halfway. Each
//! session carries an epoch number; teardown bumps it. Callbacks and idle
//! timers compare their epoch before acting, so late events from an old
//! session cannot overwrite newer state.
//!
//! ## Teardown order
//!
//! 1. close the transport session
//! 2. disconnect the tap and the capture source
//! 3. close the input context, then the output context
//! 4. stop the microphone
//! 5. retire the playback cursor and reset the volume metric
//!
//! Each step is skipped when its resource is absent, and a failing step is
//! logged without short-circuiting the rest.

pub mod diagnostics;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    audio::{AudioBackend, MicConstraints, MicrophoneStream, OutputContext},
    capture::{CaptureSession, CaptureSettings, CaptureTap, VolumeMeter, DEFAULT_BLOCK_SIZE, VOLUME_GAIN},
    error::{LiveError, Result},
    ipc::events::{ConnectionState, ConnectionStateEvent, VolumeEvent},
    language::LanguagePair,
    playback::{PlaybackCursor, PlaybackScheduler, OUTPUT_SAMPLE_RATE},
    transport::{
        protocol::{DEFAULT_ENDPOINT, DEFAULT_MODEL},
        ResponseModality, SessionConfig, SessionConnector, TransportEvent, TransportSession,
    },
};

pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

/// Broadcast channel capacity for state events.
const STATUS_CHANNEL_CAP: usize = 64;

/// Configuration for `LiveEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Credential for the remote service. `start()` refuses to run without one.
    pub api_key: Option<String>,
    pub language_pair: LanguagePair,
    /// Prebuilt voice the remote speaks with. Default: `Puck`.
    pub voice_name: String,
    pub model: String,
    pub endpoint: String,
    /// Outbound PCM rate (Hz). Default: 16000.
    pub input_sample_rate: u32,
    /// Capture tap block size; must be a power of two. Default: 4096.
    pub block_size: usize,
    /// Inbound PCM rate (Hz). Default: 24000.
    pub output_sample_rate: u32,
    /// Gain applied to block RMS for the volume metric. Default: 5.0.
    pub volume_gain: f32,
    /// Delay from Disconnected/Error to Idle. Default: 500 ms.
    pub idle_debounce: Duration,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            language_pair: LanguagePair::default(),
            voice_name: "Puck".to_string(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            input_sample_rate: 16_000,
            block_size: DEFAULT_BLOCK_SIZE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            volume_gain: VOLUME_GAIN,
            idle_debounce: Duration::from_millis(500),
            preferred_input_device: None,
            preferred_output_device: None,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// `LiveError::Configuration` for a missing credential or unusable numbers.
    pub fn validate(&self) -> Result<()> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => {}
            _ => return Err(LiveError::Configuration("API key is missing".into())),
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(LiveError::Configuration("sample rates must be non-zero".into()));
        }
        CaptureTap::new(self.block_size)?;
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            api_key: self.api_key.clone().unwrap_or_default(),
            system_instruction: self.language_pair.system_instruction(),
            voice_name: self.voice_name.clone(),
            response_modality: ResponseModality::Audio,
            input_sample_rate: self.input_sample_rate,
        }
    }

    pub fn mic_constraints(&self) -> MicConstraints {
        MicConstraints {
            sample_rate: self.input_sample_rate,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            preferred_device: self.preferred_input_device.clone(),
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            target_rate: self.input_sample_rate,
            block_size: self.block_size,
            volume_gain: self.volume_gain,
        }
    }
}

/// Handles owned for the duration of one session.
#[derive(Default)]
struct SessionResources {
    transport: Option<TransportSession>,
    capture: Option<CaptureSession>,
    output: Option<Arc<dyn OutputContext>>,
    microphone: Option<Box<dyn MicrophoneStream>>,
}

/// Which session handles are currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    pub transport: bool,
    pub capture: bool,
    pub output: bool,
    pub microphone: bool,
}

impl ResourceSnapshot {
    pub fn is_empty(&self) -> bool {
        !(self.transport || self.capture || self.output || self.microphone)
    }

    pub fn is_complete(&self) -> bool {
        self.transport && self.output && self.microphone
    }
}

struct EngineInner {
    config: Mutex<EngineConfig>,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn SessionConnector>,
    resources: AsyncMutex<SessionResources>,
    state: Mutex<ConnectionState>,
    /// Bumped on every session open and every teardown.
    epoch: AtomicU64,
    status_tx: broadcast::Sender<ConnectionStateEvent>,
    meter: Arc<VolumeMeter>,
    /// Replaced per session so a late scheduler cannot touch the new one.
    cursor: Mutex<Arc<PlaybackCursor>>,
    diagnostics: Arc<SessionDiagnostics>,
}

/// The top-level engine handle. Cheap to clone; all clones drive one engine.
#[derive(Clone)]
pub struct LiveEngine {
    inner: Arc<EngineInner>,
}

impl LiveEngine {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAP);
        Self {
            inner: Arc::new(EngineInner {
                config: Mutex::new(config),
                backend,
                connector,
                resources: AsyncMutex::new(SessionResources::default()),
                state: Mutex::new(ConnectionState::Idle),
                epoch: AtomicU64::new(0),
                status_tx,
                meter: Arc::new(VolumeMeter::new()),
                cursor: Mutex::new(Arc::new(PlaybackCursor::new())),
                diagnostics: Arc::new(SessionDiagnostics::default()),
            }),
        }
    }

    /// Start a session, tearing down any previous one first.
    ///
    /// Returns once the devices are open and the session has been requested;
    /// `Connected` follows when the remote acknowledges.
    ///
    /// # Errors
    /// - `LiveError::Configuration` without a credential; state is untouched.
    /// - `LiveError::DeviceUnavailable` / `LiveError::Transport` when a device or
    ///   the session request fails; state goes to `Error`, then `Idle`.
    pub async fn start(&self) -> Result<()> {
        let config = {
            let config = self.inner.config.lock();
            config.validate()?;
            config.clone()
        };

        let inner = &self.inner;
        let mut res = inner.resources.lock().await;
        inner.teardown(&mut res).await;

        let epoch = inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        inner.set_state(ConnectionState::Connecting, None);

        let span = info_span!("session", epoch);
        let opened = inner
            .open_session(&mut res, epoch, &config)
            .instrument(span)
            .await;
        if let Err(e) = opened {
            error!("session start failed: {e}");
            inner.set_state(ConnectionState::Error, Some(e.to_string()));
            inner.teardown(&mut res).await;
            inner.schedule_idle();
            return Err(e);
        }
        Ok(())
    }

    /// End the current call. Safe to call in any state, any number of times.
    pub async fn end_call(&self) {
        let inner = &self.inner;
        let mut res = inner.resources.lock().await;
        inner.teardown(&mut res).await;
        if inner.state() != ConnectionState::Idle {
            inner.set_state(ConnectionState::Disconnected, None);
            inner.schedule_idle();
        }
    }

    /// Disable (mute) or enable the microphone track. Returns the mute state,
    /// or `false` when no microphone is held.
    pub async fn set_muted(&self, muted: bool) -> bool {
        let res = self.inner.resources.lock().await;
        match res.microphone.as_ref() {
            Some(mic) => {
                mic.set_enabled(!muted);
                info!(muted, "microphone mute changed");
                muted
            }
            None => false,
        }
    }

    /// Flip the mute state under one lock. Returns the new state.
    pub async fn toggle_mute(&self) -> bool {
        let res = self.inner.resources.lock().await;
        match res.microphone.as_ref() {
            Some(mic) => {
                // Enabled now means muted after the flip.
                let muted = mic.is_enabled();
                mic.set_enabled(!muted);
                info!(muted, "microphone mute changed");
                muted
            }
            None => false,
        }
    }

    pub async fn is_muted(&self) -> bool {
        let res = self.inner.resources.lock().await;
        res.microphone
            .as_ref()
            .map(|mic| !mic.is_enabled())
            .unwrap_or(false)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Latest block volume (RMS × gain).
    pub fn volume(&self) -> f32 {
        self.inner.meter.level()
    }

    /// Next playback start time on the output clock.
    pub fn playback_cursor(&self) -> f64 {
        self.inner.cursor.lock().get()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionStateEvent> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe_volume(&self) -> broadcast::Receiver<VolumeEvent> {
        self.inner.meter.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.inner.diagnostics.snapshot()
    }

    pub fn config(&self) -> EngineConfig {
        self.inner.config.lock().clone()
    }

    pub fn language_pair(&self) -> LanguagePair {
        self.inner.config.lock().language_pair
    }

    /// Change the translation pair. Takes effect on the next `start()`.
    ///
    /// # Errors
    /// `LiveError::Configuration` while a session is connecting or connected.
    pub fn set_language_pair(&self, pair: LanguagePair) -> Result<()> {
        if self.state().is_active() {
            return Err(LiveError::Configuration(
                "language pair cannot change during a session".into(),
            ));
        }
        info!(pair = %pair.label(), "language pair changed");
        self.inner.config.lock().language_pair = pair;
        Ok(())
    }

    pub async fn resource_snapshot(&self) -> ResourceSnapshot {
        let res = self.inner.resources.lock().await;
        ResourceSnapshot {
            transport: res.transport.is_some(),
            capture: res.capture.is_some(),
            output: res.output.is_some(),
            microphone: res.microphone.is_some(),
        }
    }
}

impl EngineInner {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState, detail: Option<String>) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        info!(from = %previous, to = %state, "connection state");
        // No subscribers is fine.
        let _ = self.status_tx.send(ConnectionStateEvent { state, detail });
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    /// Open output, microphone and session in that order, storing each handle
    /// as soon as it exists so a later failure tears it down.
    async fn open_session(
        self: &Arc<Self>,
        res: &mut SessionResources,
        epoch: u64,
        config: &EngineConfig,
    ) -> Result<()> {
        self.diagnostics.reset();
        self.diagnostics
            .sessions_started
            .fetch_add(1, Ordering::Relaxed);
        let cursor = Arc::new(PlaybackCursor::new());
        *self.cursor.lock() = Arc::clone(&cursor);

        let backend = Arc::clone(&self.backend);
        let rate = config.output_sample_rate;
        let preferred = config.preferred_output_device.clone();
        let output = tokio::task::spawn_blocking(move || {
            backend.open_output(rate, preferred.as_deref())
        })
        .await
        .map_err(|e| LiveError::DeviceUnavailable(format!("output open task: {e}")))??;
        res.output = Some(Arc::clone(&output));
        debug!(rate = output.sample_rate(), "output context open");

        let backend = Arc::clone(&self.backend);
        let constraints = config.mic_constraints();
        let microphone =
            tokio::task::spawn_blocking(move || backend.acquire_microphone(&constraints))
                .await
                .map_err(|e| LiveError::DeviceUnavailable(format!("microphone task: {e}")))??;
        debug!(rate = microphone.sample_rate(), "microphone acquired");
        res.microphone = Some(microphone);

        let link = self.connector.connect(config.session_config())?;
        let (transport, events) = link.into_parts();
        res.transport = Some(transport);
        info!(pair = %config.language_pair.label(), "session requested");

        let scheduler = PlaybackScheduler::new(
            output,
            cursor,
            config.output_sample_rate,
            Arc::clone(&self.diagnostics),
        );
        tokio::spawn(
            dispatch(Arc::downgrade(self), epoch, events, scheduler)
                .instrument(info_span!("inbound", epoch)),
        );
        Ok(())
    }

    async fn on_session_open(self: &Arc<Self>, epoch: u64) {
        let mut res = self.resources.lock().await;
        if !self.is_current(epoch) {
            return;
        }
        self.set_state(ConnectionState::Connected, None);

        let settings = self.config.lock().capture_settings();
        let sender = res.transport.as_ref().map(TransportSession::sender);
        let source = res
            .microphone
            .as_mut()
            .and_then(|mic| mic.take_reader().map(|reader| (reader, mic.sample_rate())));

        let (Some(sender), Some((reader, source_rate))) = (sender, source) else {
            warn!("session opened without a microphone reader or transport");
            self.fail(&mut res, "capture could not attach".to_string()).await;
            return;
        };
        match CaptureSession::start(
            reader,
            source_rate,
            settings,
            sender,
            Arc::clone(&self.meter),
            Arc::clone(&self.diagnostics),
        ) {
            Ok(capture) => res.capture = Some(capture),
            Err(e) => self.fail(&mut res, e.to_string()).await,
        }
    }

    async fn on_session_closed(self: &Arc<Self>, epoch: u64, reason: Option<String>) {
        let mut res = self.resources.lock().await;
        if !self.is_current(epoch) {
            return;
        }
        self.teardown(&mut res).await;
        // An error already reported stays the visible state.
        if !matches!(
            self.state(),
            ConnectionState::Idle | ConnectionState::Error
        ) {
            self.set_state(ConnectionState::Disconnected, reason);
        }
        self.schedule_idle();
    }

    async fn on_session_error(self: &Arc<Self>, epoch: u64, message: String) {
        let mut res = self.resources.lock().await;
        if !self.is_current(epoch) {
            return;
        }
        self.fail(&mut res, message).await;
    }

    async fn fail(self: &Arc<Self>, res: &mut SessionResources, message: String) {
        error!(error = %message, "session failed");
        self.set_state(ConnectionState::Error, Some(message));
        self.teardown(res).await;
        self.schedule_idle();
    }

    /// Release everything in order. Never fails; re-entrant on any partial state.
    async fn teardown(&self, res: &mut SessionResources) {
        self.epoch.fetch_add(1, Ordering::AcqRel);

        if let Some(transport) = res.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("teardown: transport close: {e}");
            }
        }

        if let Some(capture) = res.capture.as_ref() {
            capture.disconnect();
        }

        if let Some(mut capture) = res.capture.take() {
            if let Err(e) = capture.close().await {
                warn!("teardown: input context: {e}");
            }
        }
        if let Some(output) = res.output.take() {
            match tokio::task::spawn_blocking(move || output.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("teardown: output context: {e}"),
                Err(e) => warn!("teardown: output close task: {e}"),
            }
        }

        if let Some(mut microphone) = res.microphone.take() {
            match tokio::task::spawn_blocking(move || microphone.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("teardown: microphone stop: {e}"),
                Err(e) => warn!("teardown: microphone stop task: {e}"),
            }
        }

        self.cursor.lock().retire();
        self.meter.reset();
        debug!("teardown complete");
    }

    /// After the debounce, settle Disconnected/Error into Idle unless a newer
    /// lifecycle step happened in between.
    fn schedule_idle(self: &Arc<Self>) {
        let epoch = self.epoch.load(Ordering::Acquire);
        let delay = self.config.lock().idle_debounce;
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = engine.upgrade() else {
                return;
            };
            let _res = inner.resources.lock().await;
            if !inner.is_current(epoch) {
                return;
            }
            if matches!(
                inner.state(),
                ConnectionState::Disconnected | ConnectionState::Error
            ) {
                inner.set_state(ConnectionState::Idle, None);
            }
        });
    }
}

/// Inbound path: forwards one session's transport events until it ends or
/// goes stale.
async fn dispatch(
    engine: Weak<EngineInner>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut scheduler: PlaybackScheduler,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        if !inner.is_current(epoch) {
            debug!("stale session event ignored");
            break;
        }
        match event {
            TransportEvent::Open => inner.on_session_open(epoch).await,
            TransportEvent::Audio(wire) => {
                inner
                    .diagnostics
                    .frames_received
                    .fetch_add(1, Ordering::Relaxed);
                scheduler.enqueue_or_drop(&wire);
            }
            TransportEvent::Close { reason } => {
                inner.on_session_closed(epoch, reason).await;
                break;
            }
            TransportEvent::Error(message) => {
                inner.on_session_error(epoch, message).await;
                break;
            }
        }
    }
    debug!("inbound dispatcher finished");
}
