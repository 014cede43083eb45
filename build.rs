use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct Config {
    audio: Audio,
    amplifier: Amplifier,
    controls: Controls,
    capture: Capture,
    storage: Storage,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    capture_sample_rate: u32,
    capture_channels: u32,
    codec_sample_rate: u32,
    codec_bitrate: i32,
    playback_chunk_frames: usize,
}

#[derive(Deserialize)]
struct Amplifier {
    gpio_value_path: String,
    stabilize_ms: u64,
}

#[derive(Deserialize)]
struct Controls {
    button_gpio_path: String,
    button_active_low: bool,
}

#[derive(Deserialize)]
struct Capture {
    min_duration_ms: u32,
    peak_floor: u32,
    mean_floor: u32,
    flush_grace_ms: u64,
}

#[derive(Deserialize)]
struct Storage {
    work_dir: String,
}

// Read config.toml at compile time and surface it as rustc env vars.
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // Audio devices and codec settings
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.audio.capture_sample_rate);
    println!("cargo:rustc-env=CAPTURE_CHANNELS={}", config.audio.capture_channels);
    println!("cargo:rustc-env=CODEC_SAMPLE_RATE={}", config.audio.codec_sample_rate);
    println!("cargo:rustc-env=CODEC_BITRATE={}", config.audio.codec_bitrate);
    println!("cargo:rustc-env=PLAYBACK_CHUNK_FRAMES={}", config.audio.playback_chunk_frames);

    // Amplifier gate
    println!("cargo:rustc-env=AMP_GPIO_VALUE_PATH={}", config.amplifier.gpio_value_path);
    println!("cargo:rustc-env=AMP_STABILIZE_MS={}", config.amplifier.stabilize_ms);

    // Physical controls
    println!("cargo:rustc-env=BUTTON_GPIO_PATH={}", config.controls.button_gpio_path);
    println!("cargo:rustc-env=BUTTON_ACTIVE_LOW={}", config.controls.button_active_low);

    // Capture validation
    println!("cargo:rustc-env=CAPTURE_MIN_DURATION_MS={}", config.capture.min_duration_ms);
    println!("cargo:rustc-env=CAPTURE_PEAK_FLOOR={}", config.capture.peak_floor);
    println!("cargo:rustc-env=CAPTURE_MEAN_FLOOR={}", config.capture.mean_floor);
    println!("cargo:rustc-env=CAPTURE_FLUSH_GRACE_MS={}", config.capture.flush_grace_ms);

    // Working file storage
    println!("cargo:rustc-env=WORK_DIR={}", config.storage.work_dir);
}
