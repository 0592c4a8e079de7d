use std::time::Duration;

pub const INPUT_SAMPLE_RATE: u32 = 16_000;
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
pub const AUDIO_WINDOW_SAMPLES: usize = 4096;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are an on-site restoration expert. Help the contractor identify roofing components, damage, and IRC code compliance through their video feed.";

/// Tunables for one live session.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Sample rate of outbound PCM frames.
    pub input_sample_rate: u32,
    /// Sample rate of inbound synthesized audio.
    pub output_sample_rate: u32,
    /// Samples per outbound audio frame.
    pub audio_window: usize,
    /// Outbound audio frames held before the oldest is dropped.
    pub audio_queue_capacity: usize,
    pub video_interval: Duration,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Frames larger than this on either side are scaled down. Never scaled up.
    pub max_frame_dimension: Option<u32>,
    pub transcript_capacity: usize,
    pub capture_timeout: Duration,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
    /// How often finished playback handles are collected.
    pub reap_interval: Duration,
    pub system_instruction: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            audio_window: AUDIO_WINDOW_SAMPLES,
            audio_queue_capacity: 32,
            video_interval: Duration::from_millis(1000),
            jpeg_quality: 60,
            max_frame_dimension: None,
            transcript_capacity: 5,
            capture_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(15),
            close_timeout: Duration::from_secs(2),
            reap_interval: Duration::from_millis(100),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl LiveConfig {
    pub fn builder() -> LiveConfigBuilder {
        LiveConfigBuilder::new()
    }
}

pub struct LiveConfigBuilder {
    config: LiveConfig,
}

impl Default for LiveConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LiveConfig::default(),
        }
    }

    pub fn with_audio_window(mut self, samples: usize) -> Self {
        self.config.audio_window = samples.max(1);
        self
    }

    pub fn with_audio_queue_capacity(mut self, frames: usize) -> Self {
        self.config.audio_queue_capacity = frames.max(1);
        self
    }

    pub fn with_video_interval(mut self, interval: Duration) -> Self {
        self.config.video_interval = interval;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_max_frame_dimension(mut self, max: Option<u32>) -> Self {
        self.config.max_frame_dimension = max.filter(|m| *m > 0);
        self
    }

    pub fn with_transcript_capacity(mut self, lines: usize) -> Self {
        self.config.transcript_capacity = lines.max(1);
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.config.capture_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.config.reap_interval = interval;
        self
    }

    pub fn with_system_instruction(mut self, instruction: &str) -> Self {
        self.config.system_instruction = instruction.to_string();
        self
    }

    pub fn build(self) -> LiveConfig {
        self.config
    }
}
