//! Running input-volume metric.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::ipc::events::VolumeEvent;

const VOLUME_CHANNEL_CAP: usize = 64;

/// Latest block level, readable from any thread, plus a broadcast of every update.
///
/// The capture thread is the only publisher while a session runs; teardown
/// resets it after the capture thread has been joined.
pub struct VolumeMeter {
    /// `f32` bit pattern.
    level: AtomicU32,
    seq: AtomicU64,
    tx: broadcast::Sender<VolumeEvent>,
}

impl VolumeMeter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(VOLUME_CHANNEL_CAP);
        Self {
            level: AtomicU32::new(0f32.to_bits()),
            seq: AtomicU64::new(0),
            tx,
        }
    }

    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Acquire))
    }

    pub fn publish(&self, level: f32) {
        self.level.store(level.to_bits(), Ordering::Release);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        // No subscribers is fine.
        let _ = self.tx.send(VolumeEvent::new(seq, level));
    }

    /// Back to zero, announced like any other update.
    pub fn reset(&self) {
        if self.level() != 0.0 {
            self.publish(0.0);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> {
        self.tx.subscribe()
    }
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_updates_level_and_notifies() {
        let meter = VolumeMeter::new();
        let mut rx = meter.subscribe();
        meter.publish(0.5);
        assert_eq!(meter.level(), 0.5);
        let event = rx.try_recv().expect("volume event");
        assert_eq!(event.seq, 1);
        assert!(event.active);
    }

    #[test]
    fn reset_returns_to_zero() {
        let meter = VolumeMeter::new();
        meter.publish(2.0);
        meter.reset();
        assert_eq!(meter.level(), 0.0);
    }
}
