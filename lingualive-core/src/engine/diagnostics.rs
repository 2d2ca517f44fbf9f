//! Per-session pipeline counters.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Shared between the capture thread, the inbound dispatcher and the engine.
/// Reset at the start of every session.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub samples_in: AtomicUsize,
    pub blocks_captured: AtomicUsize,
    pub frames_sent: AtomicUsize,
    pub frames_received: AtomicUsize,
    pub frames_scheduled: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub sessions_started: AtomicUsize,
}

impl SessionDiagnostics {
    /// Zero the per-session counters. `sessions_started` is lifetime-wide.
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.blocks_captured.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_received.store(0, Ordering::Relaxed);
        self.frames_scheduled.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_scheduled: self.frames_scheduled.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub blocks_captured: usize,
    pub frames_sent: usize,
    pub frames_received: usize,
    pub frames_scheduled: usize,
    pub frames_dropped: usize,
    pub sessions_started: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_session_count() {
        let diag = SessionDiagnostics::default();
        diag.frames_sent.fetch_add(3, Ordering::Relaxed);
        diag.sessions_started.fetch_add(1, Ordering::Relaxed);
        diag.reset();
        let snap = diag.snapshot();
        assert_eq!(snap.frames_sent, 0);
        assert_eq!(snap.sessions_started, 1);
    }
}
