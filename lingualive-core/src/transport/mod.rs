//! Session transport: one bidirectional session to the remote service.
//!
//! ## Shape
//!
//! ```text
//!  capture thread ──► TransportSender ──► outbound queue ──► connector task ──► remote
//!                                                                  │
//!  inbound dispatcher ◄── TransportEvent ◄─────────────────────────┘
//! ```
//!
//! A connector returns a [`SessionLink`] immediately; the session resolves
//! asynchronously and announces itself with [`TransportEvent::Open`]. The
//! outbound queue exists from the first moment, so frames sent before the open
//! wait there in order and are flushed once the connector starts draining it.

pub mod gemini;
pub mod protocol;
pub mod stub;

use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::error::{LiveError, Result};

pub use gemini::GeminiLiveConnector;
pub use stub::StubConnector;

/// How long a closing session may take to say goodbye before its task is aborted.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseModality {
    #[default]
    Audio,
}

/// Fixed configuration a session is opened with.
#[derive(Clone)]
pub struct SessionConfig {
    pub api_key: String,
    pub system_instruction: String,
    pub voice_name: String,
    pub response_modality: ResponseModality,
    /// Rate of outbound PCM frames.
    pub input_sample_rate: u32,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_key", &"<redacted>")
            .field("system_instruction", &self.system_instruction)
            .field("voice_name", &self.voice_name)
            .field("response_modality", &self.response_modality)
            .field("input_sample_rate", &self.input_sample_rate)
            .finish()
    }
}

/// What the remote side of a session reports, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The remote acknowledged the session.
    Open,
    /// One inline audio payload, wire text verbatim.
    Audio(String),
    /// The remote ended the session.
    Close { reason: Option<String> },
    /// The session failed.
    Error(String),
}

/// Cloneable handle for outbound media. Never blocks.
#[derive(Debug, Clone)]
pub struct TransportSender {
    tx: mpsc::UnboundedSender<String>,
}

impl TransportSender {
    /// Queue one wire frame. Returns `false` once the session is gone.
    pub fn send_media(&self, wire: String) -> bool {
        self.tx.send(wire).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Ends a session: signals the connector task, then waits for it.
#[derive(Debug)]
pub struct SessionCloser {
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionCloser {
    /// Best-effort close. Idempotent.
    ///
    /// # Errors
    /// `LiveError::Cleanup` if the task failed or overran [`CLOSE_GRACE`]
    /// (it is aborted in that case).
    pub async fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.close_tx.take() {
            // The task may already be gone.
            let _ = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(CLOSE_GRACE, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(LiveError::Cleanup(format!("session task failed: {e}"))),
            Err(_) => {
                task.abort();
                Err(LiveError::Cleanup(format!(
                    "session did not close within {CLOSE_GRACE:?}"
                )))
            }
        }
    }
}

/// Local end of a freshly requested session.
#[derive(Debug)]
pub struct SessionLink {
    pub sender: TransportSender,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub closer: SessionCloser,
}

impl SessionLink {
    /// Attach the connector task so closing waits for it.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.closer.task = Some(task);
        self
    }

    /// Split into the owned session handle and its event stream.
    pub fn into_parts(self) -> (TransportSession, mpsc::UnboundedReceiver<TransportEvent>) {
        (
            TransportSession {
                sender: self.sender,
                closer: self.closer,
            },
            self.events,
        )
    }
}

/// Connector-side end of a session.
#[derive(Debug)]
pub struct RemoteEnd {
    /// Outbound wire frames in send order.
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    /// Fires (or errors, if the closer was dropped) when the local side closes.
    pub close_rx: oneshot::Receiver<()>,
}

impl RemoteEnd {
    /// Whether the local side has asked to close.
    pub fn close_requested(&mut self) -> bool {
        !matches!(
            self.close_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

/// Create both ends of a session with no task attached.
pub fn session_pair() -> (SessionLink, RemoteEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = oneshot::channel();
    (
        SessionLink {
            sender: TransportSender { tx: out_tx },
            events: event_rx,
            closer: SessionCloser {
                close_tx: Some(close_tx),
                task: None,
            },
        },
        RemoteEnd {
            outbound: out_rx,
            events: event_tx,
            close_rx,
        },
    )
}

/// Opens sessions. `connect` returns at once; the outcome arrives as a
/// [`TransportEvent`]. Must be called from within a tokio runtime.
pub trait SessionConnector: Send + Sync + 'static {
    /// # Errors
    /// `LiveError::Configuration` for an unusable config; connection failures
    /// are reported later as [`TransportEvent::Error`].
    fn connect(&self, config: SessionConfig) -> Result<SessionLink>;
}

/// The live session handle held by the engine.
#[derive(Debug)]
pub struct TransportSession {
    sender: TransportSender,
    closer: SessionCloser,
}

impl TransportSession {
    pub fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    /// Best-effort close; see [`SessionCloser::close`].
    pub async fn close(mut self) -> Result<()> {
        self.closer.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_sent_before_open_arrive_in_order() {
        let (link, mut remote) = session_pair();
        for wire in ["a", "b", "c"] {
            assert!(link.sender.send_media(wire.to_string()));
        }
        for expected in ["a", "b", "c"] {
            assert_eq!(remote.outbound.recv().await.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn close_signals_remote_and_is_idempotent() {
        let (link, mut remote) = session_pair();
        let (session, _events) = link.into_parts();
        let sender = session.sender();
        assert!(!remote.close_requested());
        session.close().await.expect("close");
        assert!(remote.close_requested());
        drop(remote);
        assert!(!sender.send_media("late".into()));
    }

    #[tokio::test]
    async fn close_waits_for_task() {
        let (link, remote) = session_pair();
        let task = tokio::spawn(async move {
            let _ = remote.close_rx.await;
        });
        let (session, _events) = link.with_task(task).into_parts();
        session.close().await.expect("task finishes after close signal");
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_aborted_after_grace() {
        let (link, _remote) = session_pair();
        let task = tokio::spawn(std::future::pending::<()>());
        let (session, _events) = link.with_task(task).into_parts();
        let err = session.close().await.unwrap_err();
        assert!(matches!(err, LiveError::Cleanup(_)));
    }

    #[test]
    fn session_config_debug_hides_key() {
        let config = SessionConfig {
            api_key: "very-secret".into(),
            system_instruction: "x".into(),
            voice_name: "Puck".into(),
            response_modality: ResponseModality::Audio,
            input_sample_rate: 16_000,
        };
        assert!(!format!("{config:?}").contains("very-secret"));
    }
}
