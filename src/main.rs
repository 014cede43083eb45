mod audio;
mod config;
mod hardware;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};

use audio::decode::StreamDecoder;
use audio::play::{FrameSource, PlaybackConfig, PlaybackEngine};
use audio::record::{CaptureConfig, CaptureController};
use audio::volume::VolumeHandle;
use audio::{PlaybackOutcome, cue, decode, encode};
use config::Config;
use hardware::{
    AmplifierGate, ControlButton, GpioButton, GpioLine, NullAmplifier, NullDial, RotaryDial,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::new().map_err(|e| anyhow::anyhow!(e))?;

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(String::as_str);
    match (mode, args.get(2)) {
        (Some("record"), Some(out)) => run_record(&config, Path::new(out)),
        (Some("encode"), Some(input)) => run_encode(&config, Path::new(input), args.get(3)),
        (Some("decode"), Some(input)) => run_decode(&config, Path::new(input)),
        (Some("play"), Some(input)) => run_play(&config, PathBuf::from(input)).await,
        _ => {
            eprintln!("Usage: voicepod_rs <record|encode|decode|play> <file> [out]");
            Ok(())
        }
    }
}

fn build_engine(config: &Config, volume: VolumeHandle) -> Arc<PlaybackEngine> {
    // Development machines have no amplifier pin; fall back to the null
    // gate rather than warning on every clip.
    let amp: Arc<dyn AmplifierGate> = if Path::new(config.amp_gpio_value_path).exists() {
        Arc::new(GpioLine::new(config.amp_gpio_value_path))
    } else {
        Arc::new(NullAmplifier)
    };
    let button: Arc<dyn ControlButton> =
        Arc::new(GpioButton::new(config.button_gpio_path, config.button_active_low));
    Arc::new(PlaybackEngine::new(
        PlaybackConfig {
            device: config.playback_device.to_string(),
            chunk_frames: config.playback_chunk_frames,
            stabilize_ms: config.amp_stabilize_ms,
            ..PlaybackConfig::default()
        },
        amp,
        volume,
        Some(button),
    ))
}

/// Poll the rotary dial and fold its movement into the shared volume.
fn spawn_volume_poller(volume: VolumeHandle) {
    let dial: Arc<dyn RotaryDial> = Arc::new(NullDial);
    std::thread::spawn(move || {
        loop {
            let delta = dial.take_delta();
            if delta != 0 {
                volume.adjust(delta);
                log::info!("Volume: {}", volume.get());
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    });
}

/// Button-gated capture, then transcode the recording for upload.
fn run_record(config: &Config, out_path: &Path) -> Result<()> {
    let button: Arc<dyn ControlButton> =
        Arc::new(GpioButton::new(config.button_gpio_path, config.button_active_low));
    let controller = CaptureController::new(
        CaptureConfig {
            device: config.capture_device.to_string(),
            sample_rate: config.capture_sample_rate,
            channels: config.capture_channels,
            min_duration_ms: config.capture_min_duration_ms,
            peak_floor: config.capture_peak_floor,
            mean_floor: config.capture_mean_floor,
            flush_grace_ms: config.capture_flush_grace_ms,
        },
        button,
    );

    let engine = build_engine(config, VolumeHandle::default());
    println!("Press the button to start recording; press again to stop.");
    cue::play_detached(engine.clone(), cue::Cue::Listening);
    let report = controller.capture_toggle(out_path)?;
    println!(
        "Captured {:.2}s ({} bytes, peak {}, mean {}) to {}",
        report.duration_secs,
        report.data_bytes,
        report.peak,
        report.mean,
        report.path.display(),
    );

    // Acknowledge off to the side while the transcode runs.
    cue::play_detached(engine, cue::Cue::Acknowledged);

    let container =
        encode::encode_wav_file(out_path, config.codec_sample_rate, config.codec_bitrate)?;
    let container_path = out_path.with_extension("vpc");
    std::fs::write(&container_path, &container)
        .with_context(|| format!("Failed to write {}", container_path.display()))?;
    println!("Encoded upload container: {}", container_path.display());

    // Give the detached cue a moment before the process exits.
    std::thread::sleep(Duration::from_millis(800));
    Ok(())
}

fn run_encode(config: &Config, input: &Path, out: Option<&String>) -> Result<()> {
    let container =
        encode::encode_wav_file(input, config.codec_sample_rate, config.codec_bitrate)?;
    let out_path = match out {
        Some(p) => PathBuf::from(p),
        None => input.with_extension("vpc"),
    };
    std::fs::write(&out_path, &container)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;
    println!("Wrote {} ({} bytes)", out_path.display(), container.len());
    Ok(())
}

fn run_decode(config: &Config, input: &Path) -> Result<()> {
    let out = decode::decode_to_work_file(input, Path::new(config.work_dir))?;
    println!("Decoded to working file {}", out.display());
    Ok(())
}

/// Play a clip. WAVE files play directly; containers stream through the
/// decoder so the first frames sound before the last bytes are read.
async fn run_play(config: &Config, input: PathBuf) -> Result<()> {
    let volume = VolumeHandle::default();
    spawn_volume_poller(volume.clone());
    let engine = build_engine(config, volume);

    // Ctrl+C maps to the programmatic stop request.
    let stopper = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl+C received, stopping playback");
            stopper.stop();
        }
    });

    let is_wav = input.extension().is_some_and(|e| e == "wav");
    let outcome = if is_wav {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || engine.play_file(&input, false)).await??
    } else {
        play_container_streaming(engine, input).await?
    };
    println!("Playback {:?}", outcome);
    Ok(())
}

/// Decode on one thread, play on another, frames flowing between them as
/// they become whole, the same shape the download leg has in production,
/// with the file read standing in for the network stream.
async fn play_container_streaming(
    engine: Arc<PlaybackEngine>,
    input: PathBuf,
) -> Result<PlaybackOutcome> {
    use std::io::Read;

    let file = std::fs::File::open(&input)
        .with_context(|| format!("Failed to open {}", input.display()))?;

    let (pcm_tx, pcm_rx) = mpsc::channel::<Vec<i16>>(32);
    let (fmt_tx, fmt_rx) = oneshot::channel::<(u32, u8)>();

    std::thread::spawn(move || {
        let mut decoder = StreamDecoder::new();
        let mut fmt_tx = Some(fmt_tx);
        let mut reader = std::io::BufReader::new(file);
        let mut chunk = [0u8; 4096];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    log::error!("Container read failed: {}", e);
                    break;
                }
            };
            match decoder.feed(&chunk[..n]) {
                Ok(pcm) => {
                    if let Some(header) = decoder.header() {
                        if let Some(tx) = fmt_tx.take() {
                            let _ = tx.send((header.sample_rate, header.channels));
                        }
                    }
                    if !pcm.is_empty() && pcm_tx.blocking_send(pcm).is_err() {
                        log::info!("Playback side hung up, stopping decode");
                        return;
                    }
                }
                Err(e) => {
                    log::error!("Container decode failed: {}", e);
                    return;
                }
            }
        }
        match decoder.finish() {
            Ok(summary) => log::info!("Decoded {} packets", summary.packets_decoded),
            Err(e) => log::error!("Container incomplete: {}", e),
        }
    });

    let (sample_rate, channels) = fmt_rx
        .await
        .context("Decode ended before a container header arrived")?;

    let outcome = tokio::task::spawn_blocking(move || {
        let mut source = FrameSource::new(pcm_rx, sample_rate, channels);
        engine.play_source(&mut source)
    })
    .await??;
    Ok(outcome)
}
