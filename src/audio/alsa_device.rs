//! ALSA PCM device wrappers for audio capture and playback.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

use super::error::AudioError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames (one frame = channels × sample_width)
    pub period_size: usize,
}

/// Open a PCM device for capture (recording).
pub fn open_capture(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, AlsaParams)> {
    open_pcm(device, Direction::Capture, sample_rate, channels, None, "Capture")
}

/// Open a PCM device for playback.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    open_pcm(
        device,
        Direction::Playback,
        sample_rate,
        channels,
        period_size,
        "Playback",
    )
}

/// The ordered list of playback devices worth trying: the configured
/// device, its format-converting `plug` variant, then the system default.
pub fn playback_candidates(device: &str) -> Vec<String> {
    let mut candidates = vec![device.to_string()];
    if let Some(rest) = device.strip_prefix("hw:") {
        candidates.push(format!("plughw:{rest}"));
    } else if !device.starts_with("plug") && device != "default" {
        candidates.push(format!("plug:{device}"));
    }
    if device != "default" {
        candidates.push("default".to_string());
    }
    candidates
}

/// Try each candidate in order; the first that opens wins. Every failure
/// is logged per candidate, and only after the whole list is exhausted
/// does the caller see `NoDeviceAvailable`.
pub fn probe_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams), AudioError> {
    let candidates = playback_candidates(device);
    for candidate in &candidates {
        match open_playback(candidate, sample_rate, channels, period_size) {
            Ok(opened) => return Ok(opened),
            Err(e) => {
                log::warn!("Playback candidate '{}' failed: {:#}", candidate, e);
            }
        }
    }
    Err(AudioError::NoDeviceAvailable(candidates.len()))
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    // Configure hardware parameters
    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // Read back actual negotiated parameters
    let (actual_rate, actual_channels, period_size) = {
        let hwp = pcm.hw_params_current()?;
        let rate = hwp.get_rate()?;
        let ch = hwp.get_channels()?;
        let ps = hwp.get_period_size()? as usize;
        (rate, ch, ps)
    };

    let params = AlsaParams {
        sample_rate: actual_rate,
        channels: actual_channels,
        period_size,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_channels,
        period_size,
    );

    Ok((pcm, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_order_is_exact_then_plug_then_default() {
        assert_eq!(
            playback_candidates("hw:0,0"),
            vec!["hw:0,0", "plughw:0,0", "default"]
        );
        assert_eq!(
            playback_candidates("mydac"),
            vec!["mydac", "plug:mydac", "default"]
        );
        // Already-converting devices are not wrapped again.
        assert_eq!(playback_candidates("plughw:1,0"), vec!["plughw:1,0", "default"]);
        assert_eq!(playback_candidates("default"), vec!["default"]);
    }
}
