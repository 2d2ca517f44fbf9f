//! Gemini Live websocket connector.
//!
//! One tokio task per session:
//!
//! 1. connect and send the setup message,
//! 2. wait for `setupComplete` (outbound frames stay queued meanwhile),
//! 3. emit [`TransportEvent::Open`] and pump both directions until either
//!    side closes.
//!
//! The API key travels only in the request URL and is scrubbed from any error
//! text before it is reported or logged.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, info_span, warn, Instrument};

use super::{
    protocol::{
        pcm_mime_type, RealtimeInputMessage, ServerMessage, SetupMessage, DEFAULT_ENDPOINT,
        DEFAULT_MODEL,
    },
    session_pair, RemoteEnd, SessionConfig, SessionConnector, SessionLink, TransportEvent,
};
use crate::error::{LiveError, Result};

#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    model: String,
}

impl GeminiLiveConnector {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Default for GeminiLiveConnector {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, DEFAULT_MODEL)
    }
}

impl SessionConnector for GeminiLiveConnector {
    fn connect(&self, config: SessionConfig) -> Result<SessionLink> {
        let key = config.api_key.trim().to_string();
        if key.is_empty() {
            return Err(LiveError::Configuration("API key is empty".into()));
        }

        let setup = serde_json::to_string(&SetupMessage::new(&self.model, &config))
            .map_err(|e| LiveError::Transport(format!("setup encode: {e}")))?;
        let request = SessionRequest {
            url: format!("{}?key={}", self.endpoint, key),
            key,
            setup,
            mime_type: pcm_mime_type(config.input_sample_rate),
        };

        let (link, remote) = session_pair();
        let span = info_span!("gemini_live", model = %self.model);
        let task = tokio::spawn(run_session(request, remote).instrument(span));
        Ok(link.with_task(task))
    }
}

struct SessionRequest {
    url: String,
    key: String,
    setup: String,
    mime_type: String,
}

impl SessionRequest {
    fn scrub(&self, text: impl std::fmt::Display) -> String {
        text.to_string().replace(&self.key, "<redacted>")
    }
}

enum SessionEnd {
    /// Local close request, or every local sender dropped.
    Local,
    Remote(Option<String>),
}

enum Inbound {
    Text(String),
    Close(Option<String>),
    Ignore,
}

fn classify(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text.to_string()),
        // The service sometimes frames JSON as binary.
        Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Inbound::Text(text),
            Err(_) => {
                warn!("dropping non-UTF-8 binary message");
                Inbound::Ignore
            }
        },
        Message::Close(frame) => Inbound::Close(
            frame
                .map(|f| f.reason.to_string())
                .filter(|reason| !reason.is_empty()),
        ),
        _ => Inbound::Ignore,
    }
}

async fn run_session(request: SessionRequest, remote: RemoteEnd) {
    let RemoteEnd {
        mut outbound,
        events,
        mut close_rx,
    } = remote;

    match drive(&request, &mut outbound, &events, &mut close_rx).await {
        Ok(SessionEnd::Local) => debug!("session closed locally"),
        Ok(SessionEnd::Remote(reason)) => {
            info!(reason = reason.as_deref().unwrap_or(""), "session closed by remote");
            let _ = events.send(TransportEvent::Close { reason });
        }
        Err(e) => {
            let message = request.scrub(&e);
            warn!(error = %message, "session failed");
            let _ = events.send(TransportEvent::Error(message));
        }
    }
}

async fn drive(
    request: &SessionRequest,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<TransportEvent>,
    close_rx: &mut oneshot::Receiver<()>,
) -> Result<SessionEnd> {
    let connected = tokio::select! {
        _ = &mut *close_rx => return Ok(SessionEnd::Local),
        result = connect_async(request.url.as_str()) => result,
    };
    let (ws, _response) =
        connected.map_err(|e| LiveError::Transport(format!("connect: {}", request.scrub(e))))?;
    let (mut sink, mut stream) = ws.split();

    sink.send(Message::Text(request.setup.clone().into()))
        .await
        .map_err(|e| LiveError::Transport(format!("send setup: {e}")))?;
    debug!("setup sent, awaiting acknowledgement");

    loop {
        tokio::select! {
            _ = &mut *close_rx => {
                let _ = sink.close().await;
                return Ok(SessionEnd::Local);
            }
            next = stream.next() => {
                let message = match next {
                    None => return Ok(SessionEnd::Remote(Some("closed before setup completed".into()))),
                    Some(Err(e)) => return Err(LiveError::Transport(format!("receive: {e}"))),
                    Some(Ok(message)) => message,
                };
                match classify(message) {
                    Inbound::Text(text) => match ServerMessage::parse(&text) {
                        Ok(parsed) => {
                            if let Some(error) = parsed.error {
                                return Err(LiveError::Transport(error.describe()));
                            }
                            if parsed.setup_complete.is_some() {
                                break;
                            }
                        }
                        Err(e) => warn!("unparseable message before setup: {e}"),
                    },
                    Inbound::Close(reason) => return Ok(SessionEnd::Remote(reason)),
                    Inbound::Ignore => {}
                }
            }
        }
    }

    info!("session open");
    let _ = events.send(TransportEvent::Open);

    loop {
        tokio::select! {
            biased;

            _ = &mut *close_rx => {
                let _ = sink.close().await;
                return Ok(SessionEnd::Local);
            }
            frame = outbound.recv() => {
                let Some(wire) = frame else {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Local);
                };
                let body = serde_json::to_string(&RealtimeInputMessage::audio(&request.mime_type, &wire))
                    .map_err(|e| LiveError::Transport(format!("media encode: {e}")))?;
                sink.send(Message::Text(body.into()))
                    .await
                    .map_err(|e| LiveError::Transport(format!("send media: {e}")))?;
            }
            next = stream.next() => {
                let message = match next {
                    None => return Ok(SessionEnd::Remote(None)),
                    Some(Err(e)) => return Err(LiveError::Transport(format!("receive: {e}"))),
                    Some(Ok(message)) => message,
                };
                match classify(message) {
                    Inbound::Text(text) => {
                        let parsed = match ServerMessage::parse(&text) {
                            Ok(parsed) => parsed,
                            Err(e) => {
                                warn!("ignoring unparseable server message: {e}");
                                continue;
                            }
                        };
                        if let Some(error) = parsed.error {
                            return Err(LiveError::Transport(error.describe()));
                        }
                        for wire in parsed.into_inline_audio() {
                            if events.send(TransportEvent::Audio(wire)).is_err() {
                                // Dispatcher gone; nobody is listening.
                                let _ = sink.close().await;
                                return Ok(SessionEnd::Local);
                            }
                        }
                    }
                    Inbound::Close(reason) => return Ok(SessionEnd::Remote(reason)),
                    Inbound::Ignore => {}
                }
            }
        }
    }
}
