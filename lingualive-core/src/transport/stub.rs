//! In-process connectors for tests and offline runs.
//!
//! - `Manual`: every `connect` parks its [`RemoteEnd`] so a test can drive the
//!   remote side by hand (send `Open`, read outbound frames, close).
//! - `Echo`: opens at once and plays each outbound frame back as inbound
//!   audio at the playback rate. Useful for checking a device setup end to end.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{session_pair, RemoteEnd, SessionConfig, SessionConnector, SessionLink, TransportEvent};
use crate::{
    audio::resample::convert_once,
    codec::pcm,
    error::{LiveError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubMode {
    Manual,
    Echo { output_rate: u32 },
}

pub struct StubConnector {
    mode: StubMode,
    remotes: Mutex<VecDeque<RemoteEnd>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
    last_config: Mutex<Option<SessionConfig>>,
}

impl StubConnector {
    pub fn manual() -> Self {
        Self::with_mode(StubMode::Manual)
    }

    pub fn echo(output_rate: u32) -> Self {
        Self::with_mode(StubMode::Echo { output_rate })
    }

    fn with_mode(mode: StubMode) -> Self {
        Self {
            mode,
            remotes: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            last_config: Mutex::new(None),
        }
    }

    /// Make the next `connect` calls fail synchronously.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }

    /// Oldest parked remote end (manual mode).
    pub fn take_remote(&self) -> Option<RemoteEnd> {
        self.remotes.lock().pop_front()
    }

    pub fn last_config(&self) -> Option<SessionConfig> {
        self.last_config.lock().clone()
    }
}

impl SessionConnector for StubConnector {
    fn connect(&self, config: SessionConfig) -> Result<SessionLink> {
        if self.refuse.load(Ordering::Acquire) {
            return Err(LiveError::Transport("stub connector refused".into()));
        }
        self.connects.fetch_add(1, Ordering::AcqRel);
        let input_rate = config.input_sample_rate;
        *self.last_config.lock() = Some(config);

        let (link, remote) = session_pair();
        match self.mode {
            StubMode::Manual => {
                self.remotes.lock().push_back(remote);
                Ok(link)
            }
            StubMode::Echo { output_rate } => {
                let task = tokio::spawn(run_echo(remote, input_rate, output_rate));
                Ok(link.with_task(task))
            }
        }
    }
}

async fn run_echo(remote: RemoteEnd, input_rate: u32, output_rate: u32) {
    let RemoteEnd {
        mut outbound,
        events,
        mut close_rx,
    } = remote;

    if events.send(TransportEvent::Open).is_err() {
        return;
    }
    loop {
        tokio::select! {
            biased;
            _ = &mut close_rx => break,
            frame = outbound.recv() => {
                let Some(wire) = frame else { break };
                match echo_frame(&wire, input_rate, output_rate) {
                    Ok(reply) => {
                        if events.send(TransportEvent::Audio(reply)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("echo dropped frame: {e}"),
                }
            }
        }
    }
    debug!("echo session finished");
}

fn echo_frame(wire: &str, input_rate: u32, output_rate: u32) -> Result<String> {
    let samples = pcm::decode_to_float(wire)?;
    let converted = convert_once(input_rate, output_rate, &samples)?;
    Ok(pcm::encode(&converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ResponseModality;

    fn config() -> SessionConfig {
        SessionConfig {
            api_key: "k".into(),
            system_instruction: "x".into(),
            voice_name: "Puck".into(),
            response_modality: ResponseModality::Audio,
            input_sample_rate: 16_000,
        }
    }

    #[tokio::test]
    async fn manual_mode_parks_remote_end() {
        let connector = StubConnector::manual();
        let link = connector.connect(config()).expect("link");
        let mut remote = connector.take_remote().expect("remote end");
        link.sender.send_media("AAA=".into());
        assert_eq!(remote.outbound.recv().await.as_deref(), Some("AAA="));
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn echo_mode_opens_and_returns_upsampled_audio() {
        let connector = StubConnector::echo(24_000);
        let (session, mut events) = connector.connect(config()).expect("link").into_parts();
        assert_eq!(events.recv().await, Some(TransportEvent::Open));

        session.sender().send_media(pcm::encode(&vec![0.1; 1600]));
        match events.recv().await {
            Some(TransportEvent::Audio(wire)) => {
                let samples = pcm::decode_to_float(&wire).expect("valid echo");
                assert_eq!(samples.len(), 2400);
            }
            other => panic!("expected audio, got {other:?}"),
        }
        session.close().await.expect("close");
    }

    #[test]
    fn refused_connect_is_transport_error() {
        let connector = StubConnector::manual();
        connector.refuse(true);
        assert!(matches!(
            connector.connect(config()).unwrap_err(),
            LiveError::Transport(_)
        ));
        assert_eq!(connector.connects(), 0);
    }
}
