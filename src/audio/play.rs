//! Playback engine: output device lifecycle, amplifier gating, live
//! volume, and chunk-granular interruption.
//!
//! One clip at a time moves through `Idle → Opening → Playing` and back to
//! `Idle`, whether it completed, was interrupted, or failed. The steady
//! state is a blocking polling loop: write one chunk, re-read the volume,
//! re-check the stop conditions. Stop latency is therefore bounded by one
//! chunk's duration, tuned via `chunk_frames`.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use alsa::pcm::PCM;
use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::alsa_device::{self, AlsaParams};
use super::effects;
use super::error::AudioError;
use super::volume::VolumeHandle;
use crate::hardware::{AmplifierGate, ControlButton};

// ======================== PCM sources ========================

/// A source of interleaved PCM for the playback loop: a decoded file, or
/// frames arriving live from the streaming decoder.
pub trait PcmSource {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u8;
    /// Up to `max_frames` frames of interleaved samples; `None` once the
    /// source is exhausted.
    fn next_chunk(&mut self, max_frames: usize) -> Result<Option<Vec<i16>>>;
}

/// A complete clip held in memory.
pub struct MemorySource {
    samples: Vec<i16>,
    pos: usize,
    sample_rate: u32,
    channels: u8,
}

impl MemorySource {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u8) -> Self {
        Self { samples, pos: 0, sample_rate, channels }
    }

    pub fn from_wav_file(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(AudioError::UnsupportedSourceFormat(format!(
                "{}-bit {:?} samples in {}",
                spec.bits_per_sample,
                spec.sample_format,
                path.display(),
            ))
            .into());
        }
        let samples = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read samples from {}", path.display()))?;
        Ok(Self::new(samples, spec.sample_rate, spec.channels as u8))
    }

    pub fn samples_mut(&mut self) -> &mut Vec<i16> {
        &mut self.samples
    }
}

impl PcmSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn next_chunk(&mut self, max_frames: usize) -> Result<Option<Vec<i16>>> {
        if self.pos >= self.samples.len() {
            return Ok(None);
        }
        let want = max_frames * self.channels as usize;
        let end = (self.pos + want).min(self.samples.len());
        let chunk = self.samples[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(chunk))
    }
}

/// Decoded frames arriving over a channel while the download is still in
/// flight. `next_chunk` blocks on the channel, so this runs on a dedicated
/// playback thread, never inside the async runtime.
pub struct FrameSource {
    rx: mpsc::Receiver<Vec<i16>>,
    sample_rate: u32,
    channels: u8,
    pending: Vec<i16>,
}

impl FrameSource {
    pub fn new(rx: mpsc::Receiver<Vec<i16>>, sample_rate: u32, channels: u8) -> Self {
        Self { rx, sample_rate, channels, pending: Vec::new() }
    }
}

impl PcmSource for FrameSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn next_chunk(&mut self, max_frames: usize) -> Result<Option<Vec<i16>>> {
        let want = max_frames * self.channels as usize;
        while self.pending.len() < want {
            match self.rx.blocking_recv() {
                Some(frame) => self.pending.extend_from_slice(&frame),
                None => break,
            }
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = self.pending.len().min(want);
        Ok(Some(self.pending.drain(..take).collect()))
    }
}

// ======================== Engine ========================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Opening,
    Playing,
}

const STATE_IDLE: u8 = 0;
const STATE_OPENING: u8 = 1;
const STATE_PLAYING: u8 = 2;

/// How a playback session ended. The failed path is the `Err` arm of
/// `play_source`, carrying the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Preferred ALSA device; candidates derive from it (see
    /// `alsa_device::playback_candidates`).
    pub device: String,
    /// Frames written per loop iteration; also the stop latency bound.
    pub chunk_frames: usize,
    /// Settle time after amp-on before the first chunk, and after the
    /// last chunk before amp-off. Keeps the speaker from popping.
    pub stabilize_ms: u64,
    /// Raised-cosine edge fade for file playback; disabled by default.
    pub fade_ms: Option<u32>,
    /// Silence padding for file playback; disabled by default.
    pub lead_silence_ms: u32,
    pub trail_silence_ms: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            chunk_frames: 240,
            stabilize_ms: 120,
            fade_ms: None,
            lead_silence_ms: 0,
            trail_silence_ms: 0,
        }
    }
}

pub struct PlaybackEngine {
    config: PlaybackConfig,
    amp: Arc<dyn AmplifierGate>,
    volume: VolumeHandle,
    button: Option<Arc<dyn ControlButton>>,
    stop_requested: AtomicBool,
    state: AtomicU8,
}

impl PlaybackEngine {
    pub fn new(
        config: PlaybackConfig,
        amp: Arc<dyn AmplifierGate>,
        volume: VolumeHandle,
        button: Option<Arc<dyn ControlButton>>,
    ) -> Self {
        Self {
            config,
            amp,
            volume,
            button,
            stop_requested: AtomicBool::new(false),
            state: AtomicU8::new(STATE_IDLE),
        }
    }

    pub fn state(&self) -> PlayerState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPENING => PlayerState::Opening,
            STATE_PLAYING => PlayerState::Playing,
            _ => PlayerState::Idle,
        }
    }

    /// Request an interrupt. Safe to call at any time from any thread;
    /// only a running session reacts, at its next chunk boundary.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    /// Play a WAVE file, applying the configured fade/padding first.
    /// When `remove_when_done` is set the file is a transient working
    /// file and is deleted on every exit path.
    pub fn play_file(&self, path: &Path, remove_when_done: bool) -> Result<PlaybackOutcome> {
        let result = self.play_file_inner(path);
        if remove_when_done {
            if let Err(e) = std::fs::remove_file(path) {
                log::warn!("Failed to remove working file {}: {}", path.display(), e);
            }
        }
        result
    }

    fn play_file_inner(&self, path: &Path) -> Result<PlaybackOutcome> {
        let mut source = MemorySource::from_wav_file(path)?;
        let rate = source.sample_rate();
        let channels = source.channels();

        if self.config.lead_silence_ms > 0 || self.config.trail_silence_ms > 0 {
            let padded = effects::pad_silence(
                source.samples_mut(),
                rate,
                channels,
                self.config.lead_silence_ms,
                self.config.trail_silence_ms,
            );
            *source.samples_mut() = padded;
        }
        if let Some(fade_ms) = self.config.fade_ms {
            effects::fade_edges(source.samples_mut(), rate, channels, fade_ms);
        }

        self.play_source(&mut source)
    }

    /// Run one playback session to completion, interruption, or failure.
    ///
    /// The session owns the device and the amplifier gate for its whole
    /// lifetime; both are released on every exit path, with teardown
    /// failures logged and swallowed so they never mask the session's
    /// own outcome.
    pub fn play_source(&self, source: &mut dyn PcmSource) -> Result<PlaybackOutcome> {
        self.stop_requested.store(false, Ordering::Release);
        self.state.store(STATE_OPENING, Ordering::Release);
        let result = self.run_session(source);
        self.state.store(STATE_IDLE, Ordering::Release);
        match &result {
            Ok(outcome) => log::info!("Playback finished: {:?}", outcome),
            Err(e) => log::error!("Playback failed: {:#}", e),
        }
        result
    }

    fn run_session(&self, source: &mut dyn PcmSource) -> Result<PlaybackOutcome> {
        // Pull the first chunk before touching any hardware: an empty
        // source must fail without the amplifier ever going live.
        let first = source
            .next_chunk(self.config.chunk_frames)?
            .ok_or(AudioError::EmptySource)?;

        let rate = source.sample_rate();
        let channels = source.channels();
        let (pcm, params) = alsa_device::probe_playback(
            &self.config.device,
            rate,
            channels as u32,
            Some(self.config.chunk_frames),
        )?;

        // Amp on, then let the output stage settle before the first write.
        if let Err(e) = self.amp.set_enabled(true) {
            log::warn!("Failed to enable amplifier, continuing muted: {:#}", e);
        }
        std::thread::sleep(Duration::from_millis(self.config.stabilize_ms));
        self.state.store(STATE_PLAYING, Ordering::Release);

        let outcome = self.stream_chunks(&pcm, &params, source, first);

        // Unconditional teardown: trailing settle, amp off, device closed.
        std::thread::sleep(Duration::from_millis(self.config.stabilize_ms));
        if let Err(e) = self.amp.set_enabled(false) {
            log::error!("Failed to disable amplifier: {:#}", e);
        }
        drop(pcm);
        outcome
    }

    fn stream_chunks(
        &self,
        pcm: &PCM,
        params: &AlsaParams,
        source: &mut dyn PcmSource,
        first: Vec<i16>,
    ) -> Result<PlaybackOutcome> {
        let io = pcm.io_i16()?;
        let mut chunk = Some(first);

        while let Some(mut samples) = chunk.take() {
            // Volume is re-read every chunk so dial turns land mid-clip.
            effects::apply_volume(&mut samples, self.volume.get());
            write_interleaved(pcm, &io, &samples, params.channels as usize)?;

            if self.interrupt_pending() {
                log::info!("Playback interrupted at chunk boundary");
                return Ok(PlaybackOutcome::Interrupted);
            }
            chunk = source.next_chunk(self.config.chunk_frames)?;
        }

        // Let the queued tail play out before the amp gate closes.
        if let Err(e) = pcm.drain() {
            log::warn!("ALSA drain failed: {}", e);
        }
        Ok(PlaybackOutcome::Completed)
    }

    fn interrupt_pending(&self) -> bool {
        if self.stop_requested.load(Ordering::Acquire) {
            return true;
        }
        self.button.as_ref().is_some_and(|b| b.is_asserted())
    }
}

/// Write one chunk of interleaved PCM with retry and XRUN recovery, so a
/// short write or underrun does not lose frames.
fn write_interleaved(pcm: &PCM, io: &alsa::pcm::IO<i16>, samples: &[i16], channels: usize) -> Result<()> {
    let total_frames = samples.len() / channels;
    let mut frames_written = 0;
    let mut retry_count = 0u32;

    while frames_written < total_frames {
        let offset = frames_written * channels;
        match io.writei(&samples[offset..]) {
            Ok(n) => {
                frames_written += n;
                retry_count = 0;
            }
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                retry_count += 1;
                pcm.prepare()
                    .with_context(|| "Failed to recover PCM playback")?;
                if retry_count >= 3 {
                    log::error!(
                        "Max recovery retries reached. Dropping {} unwritten frames.",
                        total_frames - frames_written,
                    );
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Amplifier double that records every transition.
    struct FakeAmp {
        transitions: Mutex<Vec<bool>>,
    }

    impl FakeAmp {
        fn new() -> Arc<Self> {
            Arc::new(Self { transitions: Mutex::new(Vec::new()) })
        }

        fn ever_enabled(&self) -> bool {
            self.transitions.lock().unwrap().iter().any(|&on| on)
        }
    }

    impl AmplifierGate for FakeAmp {
        fn set_enabled(&self, on: bool) -> Result<()> {
            self.transitions.lock().unwrap().push(on);
            Ok(())
        }
    }

    fn engine_with(amp: Arc<FakeAmp>) -> PlaybackEngine {
        PlaybackEngine::new(
            PlaybackConfig::default(),
            amp,
            VolumeHandle::default(),
            None,
        )
    }

    #[test]
    fn empty_source_fails_without_touching_the_amplifier() {
        let amp = FakeAmp::new();
        let engine = engine_with(amp.clone());

        let mut source = MemorySource::new(Vec::new(), 24000, 1);
        let err = engine.play_source(&mut source).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AudioError>(),
            Some(AudioError::EmptySource)
        ));
        assert!(!amp.ever_enabled());
        assert_eq!(engine.state(), PlayerState::Idle);
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let engine = engine_with(FakeAmp::new());
        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), PlayerState::Idle);
    }

    #[test]
    fn button_assertion_counts_as_an_interrupt() {
        use crate::hardware::SoftButton;

        let button = Arc::new(SoftButton::default());
        let engine = PlaybackEngine::new(
            PlaybackConfig::default(),
            FakeAmp::new(),
            VolumeHandle::default(),
            Some(button.clone() as Arc<dyn ControlButton>),
        );

        assert!(!engine.interrupt_pending());
        button.press();
        assert!(engine.interrupt_pending());
        button.release();
        assert!(!engine.interrupt_pending());

        // The programmatic request works alongside the button.
        engine.stop();
        assert!(engine.interrupt_pending());
    }

    #[test]
    fn memory_source_chunks_and_terminates() {
        let mut source = MemorySource::new((0..10).collect(), 8000, 2);
        // 3 frames of stereo = 6 samples per chunk.
        assert_eq!(source.next_chunk(3).unwrap().unwrap().len(), 6);
        assert_eq!(source.next_chunk(3).unwrap().unwrap(), vec![6, 7, 8, 9]);
        assert!(source.next_chunk(3).unwrap().is_none());
    }

    #[test]
    fn frame_source_drains_channel_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(vec![1i16, 2]).unwrap();
        tx.try_send(vec![3i16]).unwrap();
        drop(tx);

        let mut source = FrameSource::new(rx, 16000, 1);
        assert_eq!(source.next_chunk(2).unwrap().unwrap(), vec![1, 2]);
        assert_eq!(source.next_chunk(2).unwrap().unwrap(), vec![3]);
        assert!(source.next_chunk(2).unwrap().is_none());
    }
}
