//! Capture controller: button-gated recording into a WAVE file.
//!
//! A press edge starts the capture; the next press edge (after the button
//! was seen released) stops it. The loop is blocking and single-threaded:
//! read one period from the device, append it to the file, poll the
//! button, repeat.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::alsa_device;
use super::error::AudioError;
use crate::hardware::ControlButton;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// Hard floor below which a capture is rejected outright.
    pub min_duration_ms: u32,
    /// Diagnostic-only amplitude floors; a capture below them is kept but
    /// flagged, since the usual cause is a dead or unplugged microphone.
    pub peak_floor: u32,
    pub mean_floor: u32,
    /// Settle time after the writer finalizes before the file is
    /// considered final.
    pub flush_grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 16000,
            channels: 1,
            min_duration_ms: 500,
            peak_floor: 1200,
            mean_floor: 120,
            flush_grace_ms: 200,
        }
    }
}

/// What a finished capture looks like.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub path: PathBuf,
    pub data_bytes: u64,
    pub duration_secs: f64,
    pub peak: u32,
    pub mean: u32,
}

pub struct CaptureController {
    config: CaptureConfig,
    button: Arc<dyn ControlButton>,
}

impl CaptureController {
    pub fn new(config: CaptureConfig, button: Arc<dyn ControlButton>) -> Self {
        Self { config, button }
    }

    /// Block until a press edge, record until the next press edge, then
    /// validate and report. The WAVE file at `path` is the durable
    /// artifact handed on to the encoder.
    pub fn capture_toggle(&self, path: &Path) -> Result<CaptureReport> {
        self.wait_for_press_edge();
        log::info!("Capture starting: {}", path.display());

        let started = Instant::now();
        let record_result = self.record_until_next_press(path);
        let elapsed = started.elapsed();

        // Bounded grace for the backing writer before validation reads
        // the file back.
        std::thread::sleep(Duration::from_millis(self.config.flush_grace_ms));
        record_result?;

        log::info!(
            "Capture stopped after {:.2}s: {}",
            elapsed.as_secs_f64(),
            path.display(),
        );
        let report = analyze_capture(path, &self.config)?;
        Ok(report)
    }

    fn wait_for_press_edge(&self) {
        let mut prev = self.button.is_asserted();
        loop {
            let now = self.button.is_asserted();
            if now && !prev {
                return;
            }
            prev = now;
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn record_until_next_press(&self, path: &Path) -> Result<()> {
        let (pcm, params) = alsa_device::open_capture(
            &self.config.device,
            self.config.sample_rate,
            self.config.channels,
        )?;

        let spec = hound::WavSpec {
            channels: params.channels as u16,
            sample_rate: params.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create capture file {}", path.display()))?;

        let io = pcm.io_i16()?;
        let mut read_buf = vec![0i16; params.period_size * params.channels as usize];

        // The starting press is still held; require a release before the
        // next press counts as the stop edge.
        let mut seen_release = false;
        loop {
            match io.readi(&mut read_buf) {
                Ok(frames) => {
                    for &s in &read_buf[..frames * params.channels as usize] {
                        writer.write_sample(s)?;
                    }
                }
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    pcm.prepare()
                        .with_context(|| "Failed to recover PCM capture")?;
                }
            }

            let pressed = self.button.is_asserted();
            if !pressed {
                seen_release = true;
            } else if seen_release {
                break;
            }
        }

        writer
            .finalize()
            .with_context(|| format!("Failed to finalize capture file {}", path.display()))?;
        Ok(())
    }
}

/// Validate a finished capture and measure its signal levels.
///
/// Too-short captures are rejected with the expected-vs-actual byte sizes
/// in the error; weak signal levels are only logged, since they point at
/// a miswired or underpowered peripheral rather than a software fault.
pub fn analyze_capture(path: &Path, config: &CaptureConfig) -> Result<CaptureReport> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open capture file {}", path.display()))?;
    let spec = reader.spec();

    let mut peak: u32 = 0;
    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    for sample in reader.samples::<i16>() {
        let s = sample?;
        let magnitude = u32::from(s.unsigned_abs());
        peak = peak.max(magnitude);
        sum += u64::from(magnitude);
        count += 1;
    }

    let data_bytes = count * 2;
    let bytes_per_sec = u64::from(spec.sample_rate) * u64::from(spec.channels) * 2;
    let expected = bytes_per_sec * u64::from(config.min_duration_ms) / 1000;
    if data_bytes < expected {
        return Err(AudioError::CaptureTooShort { expected, actual: data_bytes }.into());
    }

    let mean = if count > 0 { (sum / count) as u32 } else { 0 };
    let duration_secs = count as f64 / (f64::from(spec.sample_rate) * f64::from(spec.channels));

    if peak < config.peak_floor {
        log::warn!(
            "Capture peak amplitude {} is below floor {}: microphone may be disconnected",
            peak,
            config.peak_floor,
        );
    } else if mean < config.mean_floor {
        log::warn!(
            "Capture mean amplitude {} is below floor {}: input gain may be too low",
            mean,
            config.mean_floor,
        );
    }

    Ok(CaptureReport {
        path: path.to_path_buf(),
        data_bytes,
        duration_secs,
        peak,
        mean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voicepod-test-{}-{}.wav", name, std::process::id()))
    }

    #[test]
    fn short_capture_is_rejected_with_sizes() {
        let path = temp_wav("short");
        // 100 ms at 16 kHz, against a 500 ms floor.
        write_test_wav(&path, 16000, &vec![500i16; 1600]);

        let err = analyze_capture(&path, &CaptureConfig::default()).unwrap_err();
        match err.downcast_ref::<AudioError>() {
            Some(AudioError::CaptureTooShort { expected, actual }) => {
                assert_eq!(*expected, 16000);
                assert_eq!(*actual, 3200);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn healthy_capture_reports_levels() {
        let path = temp_wav("healthy");
        let samples: Vec<i16> = (0..16000).map(|i| if i % 2 == 0 { 4000 } else { -4000 }).collect();
        write_test_wav(&path, 16000, &samples);

        let report = analyze_capture(&path, &CaptureConfig::default()).unwrap();
        assert_eq!(report.data_bytes, 32000);
        assert_eq!(report.peak, 4000);
        assert_eq!(report.mean, 4000);
        assert!((report.duration_secs - 1.0).abs() < 1e-9);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn silent_capture_is_flagged_but_accepted() {
        let path = temp_wav("silent");
        write_test_wav(&path, 16000, &vec![0i16; 16000]);

        // Weak signal is a diagnostic, not an error.
        let report = analyze_capture(&path, &CaptureConfig::default()).unwrap();
        assert_eq!(report.peak, 0);
        assert_eq!(report.mean, 0);
        let _ = std::fs::remove_file(&path);
    }
}
