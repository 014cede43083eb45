//! Short acknowledgement tones, played off to the side.
//!
//! Cues run on their own detached thread and never block the capture or
//! playback loops; a cue that fails to play is logged and forgotten.

use std::sync::Arc;

use super::play::{MemorySource, PlaybackEngine};

const CUE_SAMPLE_RATE: u32 = 16000;
const CUE_AMPLITUDE: f32 = 9000.0;

#[derive(Debug, Clone, Copy)]
pub enum Cue {
    /// Capture armed and listening.
    Listening,
    /// Request accepted, work underway.
    Acknowledged,
}

impl Cue {
    fn freq_hz(self) -> f32 {
        match self {
            Cue::Listening => 880.0,
            Cue::Acknowledged => 660.0,
        }
    }
}

/// Synthesize a sine tone with short linear edges so it starts and stops
/// without clicking.
pub fn tone(freq_hz: f32, duration_ms: u32, sample_rate: u32) -> Vec<i16> {
    let total = (sample_rate * duration_ms / 1000) as usize;
    let edge = (total / 10).max(1);
    (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = (i as f32 / edge as f32)
                .min((total - i) as f32 / edge as f32)
                .min(1.0);
            let s = (2.0 * std::f32::consts::PI * freq_hz * t).sin();
            (s * envelope * CUE_AMPLITUDE) as i16
        })
        .collect()
}

/// Play a cue on a detached thread. Failures are swallowed: a missing
/// speaker must never take the main loop down with it.
pub fn play_detached(engine: Arc<PlaybackEngine>, cue: Cue) {
    std::thread::spawn(move || {
        let samples = tone(cue.freq_hz(), 150, CUE_SAMPLE_RATE);
        let mut source = MemorySource::new(samples, CUE_SAMPLE_RATE, 1);
        if let Err(e) = engine.play_source(&mut source) {
            log::debug!("Cue {:?} failed: {:#}", cue, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_has_expected_length_and_soft_edges() {
        let samples = tone(880.0, 150, 16000);
        assert_eq!(samples.len(), 2400);
        assert_eq!(samples[0], 0);
        // The envelope keeps everything inside the synthesis amplitude.
        assert!(samples.iter().all(|&s| s.unsigned_abs() <= CUE_AMPLITUDE as u16));
        assert!(samples.iter().any(|&s| s != 0));
    }
}
