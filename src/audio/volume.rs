//! Shared playback volume, read once per chunk by the playback loop and
//! written by the rotation-input poller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Cloneable handle to the process-wide volume scalar, 0–100.
///
/// A single atomic integer is all the synchronization this needs: a torn
/// read is impossible and a one-chunk-stale value is accepted behavior.
#[derive(Clone)]
pub struct VolumeHandle(Arc<AtomicU8>);

impl VolumeHandle {
    pub fn new(initial: u8) -> Self {
        Self(Arc::new(AtomicU8::new(initial.min(100))))
    }

    pub fn get(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, volume: u8) {
        self.0.store(volume.min(100), Ordering::Relaxed);
    }

    /// Apply a rotation delta, clamping to 0–100.
    pub fn adjust(&self, delta: i32) {
        let current = self.get() as i32;
        self.set((current + delta).clamp(0, 100) as u8);
    }
}

impl Default for VolumeHandle {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_clamps_at_both_ends() {
        let volume = VolumeHandle::new(95);
        volume.adjust(10);
        assert_eq!(volume.get(), 100);
        volume.adjust(-250);
        assert_eq!(volume.get(), 0);
        volume.adjust(3);
        assert_eq!(volume.get(), 3);
    }

    #[test]
    fn set_clamps_to_100() {
        let volume = VolumeHandle::default();
        volume.set(255);
        assert_eq!(volume.get(), 100);
    }
}
