#[derive(Debug, Clone)]
pub struct Config {
    // Audio devices
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub capture_sample_rate: u32,
    pub capture_channels: u32,

    // Codec settings
    pub codec_sample_rate: u32,
    pub codec_bitrate: i32,
    pub playback_chunk_frames: usize,

    // Amplifier gate
    pub amp_gpio_value_path: &'static str,
    pub amp_stabilize_ms: u64,

    // Physical button
    pub button_gpio_path: &'static str,
    pub button_active_low: bool,

    // Capture validation
    pub capture_min_duration_ms: u32,
    pub capture_peak_floor: u32,
    pub capture_mean_floor: u32,
    pub capture_flush_grace_ms: u64,

    // Transient working files
    pub work_dir: &'static str,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            capture_sample_rate: env!("CAPTURE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            capture_channels: env!("CAPTURE_CHANNELS").parse()
                .map_err(|_| "Failed to parse CAPTURE_CHANNELS")?,

            codec_sample_rate: env!("CODEC_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CODEC_SAMPLE_RATE")?,
            codec_bitrate: env!("CODEC_BITRATE").parse()
                .map_err(|_| "Failed to parse CODEC_BITRATE")?,
            playback_chunk_frames: env!("PLAYBACK_CHUNK_FRAMES").parse()
                .map_err(|_| "Failed to parse PLAYBACK_CHUNK_FRAMES")?,

            amp_gpio_value_path: env!("AMP_GPIO_VALUE_PATH"),
            amp_stabilize_ms: env!("AMP_STABILIZE_MS").parse()
                .map_err(|_| "Failed to parse AMP_STABILIZE_MS")?,

            button_gpio_path: env!("BUTTON_GPIO_PATH"),
            button_active_low: env!("BUTTON_ACTIVE_LOW").parse()
                .map_err(|_| "Failed to parse BUTTON_ACTIVE_LOW")?,

            capture_min_duration_ms: env!("CAPTURE_MIN_DURATION_MS").parse()
                .map_err(|_| "Failed to parse CAPTURE_MIN_DURATION_MS")?,
            capture_peak_floor: env!("CAPTURE_PEAK_FLOOR").parse()
                .map_err(|_| "Failed to parse CAPTURE_PEAK_FLOOR")?,
            capture_mean_floor: env!("CAPTURE_MEAN_FLOOR").parse()
                .map_err(|_| "Failed to parse CAPTURE_MEAN_FLOOR")?,
            capture_flush_grace_ms: env!("CAPTURE_FLUSH_GRACE_MS").parse()
                .map_err(|_| "Failed to parse CAPTURE_FLUSH_GRACE_MS")?,

            work_dir: env!("WORK_DIR"),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
