//! Event types a host forwards to its UI.
//!
//! | Event | Emitted |
//! |-------|---------|
//! | `ConnectionStateEvent` | on every connection state transition |
//! | `VolumeEvent` | once per captured block (~256 ms at 16 kHz / 4096) |

use serde::{Deserialize, Serialize};

/// Input level above which the microphone counts as active.
pub const ACTIVITY_THRESHOLD: f32 = 0.01;

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Connection state of the live session. Only the engine changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session and no devices held.
    #[default]
    Idle,
    /// Devices open, waiting for the remote to acknowledge the session.
    Connecting,
    /// Session acknowledged; audio flows in both directions.
    Connected,
    /// Session ended by the user or the remote.
    Disconnected,
    /// Unrecoverable failure. Becomes `Idle` after the debounce.
    Error,
}

impl ConnectionState {
    /// Whether a session (or an attempt at one) is live.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Broadcast on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStateEvent {
    pub state: ConnectionState,
    /// Human-readable detail, e.g. the error message.
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// Input level of one captured block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// RMS × gain. Not clamped; loud input exceeds 1.0.
    pub level: f32,
    pub active: bool,
}

impl VolumeEvent {
    pub fn new(seq: u64, level: f32) -> Self {
        Self {
            seq,
            level,
            active: level > ACTIVITY_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_event_serializes_with_lowercase_state() {
        let event = ConnectionStateEvent {
            state: ConnectionState::Disconnected,
            detail: Some("remote closed".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize state event");
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["detail"], "remote closed");

        let round_trip: ConnectionStateEvent =
            serde_json::from_value(json).expect("deserialize state event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn connection_state_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<ConnectionState>(r#""Connected""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn volume_event_marks_activity_above_threshold() {
        assert!(!VolumeEvent::new(1, 0.0).active);
        assert!(!VolumeEvent::new(2, ACTIVITY_THRESHOLD).active);
        assert!(VolumeEvent::new(3, 0.2).active);
    }

    #[test]
    fn volume_event_serializes_with_camel_case_fields() {
        let json = serde_json::to_value(VolumeEvent::new(4, 1.25)).expect("serialize volume");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["active"], true);
        let level = json["level"].as_f64().expect("level should be a number");
        assert!((level - 1.25).abs() < 1e-6);
    }

    #[test]
    fn only_connecting_and_connected_are_active() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Idle.is_active());
        assert!(!ConnectionState::Error.is_active());
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }
}
