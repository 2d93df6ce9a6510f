//! Encoder configuration
//!
//! `EncoderConfig` is immutable once built; every invariant is checked by
//! `EncoderConfigBuilder::build`, so a config that exists is a config a backend
//! can be constructed from. `EncoderSettings` is the TOML-facing counterpart
//! that seeds a builder from a file on disk.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::gpu::SharedContext;

pub const DEFAULT_VIDEO_BIT_RATE: u32 = 1080 * 1000;
pub const DEFAULT_FRAME_RATE: u32 = 30;
pub const DEFAULT_VIDEO_WIDTH: u32 = 1080;
pub const DEFAULT_VIDEO_HEIGHT: u32 = 1920;
/// Suggested audio bit rate for callers that want one; the default leaves it unset.
pub const DEFAULT_AUDIO_BIT_RATE: u32 = 24 * 1000;
pub const DEFAULT_MUXER_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the audio track is captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioSourceKind {
    /// System default input device
    Default,
    /// Microphone input
    Mic,
    /// Microphone tuned for video capture
    #[default]
    Camcorder,
    /// Generated sine tone, for headless runs
    Synthetic,
    /// No audio track
    Disabled,
}

impl AudioSourceKind {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, AudioSourceKind::Disabled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioSourceKind::Default => "default",
            AudioSourceKind::Mic => "mic",
            AudioSourceKind::Camcorder => "camcorder",
            AudioSourceKind::Synthetic => "synthetic",
            AudioSourceKind::Disabled => "disabled",
        }
    }
}

impl FromStr for AudioSourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(AudioSourceKind::Default),
            "mic" | "microphone" => Ok(AudioSourceKind::Mic),
            "camcorder" => Ok(AudioSourceKind::Camcorder),
            "synthetic" => Ok(AudioSourceKind::Synthetic),
            "disabled" | "none" => Ok(AudioSourceKind::Disabled),
            _ => Err(ConfigError::InvalidAudioSource(s.to_string())),
        }
    }
}

impl fmt::Display for AudioSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec used for the audio track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoderKind {
    /// Let the backend pick (Opus for the MP4 backends)
    #[default]
    Default,
    Opus,
}

impl FromStr for AudioEncoderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(AudioEncoderKind::Default),
            "opus" => Ok(AudioEncoderKind::Opus),
            _ => Err(ConfigError::InvalidAudioEncoder(s.to_string())),
        }
    }
}

/// Validated configuration for one recording segment
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    width: u32,
    height: u32,
    video_bit_rate: u32,
    audio_bit_rate: Option<u32>,
    frame_rate: u32,
    audio_source: AudioSourceKind,
    audio_encoder: AudioEncoderKind,
    output_file: PathBuf,
    shared_context: Option<SharedContext>,
    max_duration: Option<Duration>,
    max_file_size: Option<u64>,
    muxer_start_timeout: Duration,
}

impl EncoderConfig {
    pub fn builder() -> EncoderConfigBuilder {
        EncoderConfigBuilder::default()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn video_bit_rate(&self) -> u32 {
        self.video_bit_rate
    }

    /// `None` means the backend chooses.
    pub fn audio_bit_rate(&self) -> Option<u32> {
        self.audio_bit_rate
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn audio_source(&self) -> AudioSourceKind {
        self.audio_source
    }

    pub fn audio_encoder(&self) -> AudioEncoderKind {
        self.audio_encoder
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    pub fn shared_context(&self) -> Option<&SharedContext> {
        self.shared_context.as_ref()
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration
    }

    pub fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    pub fn muxer_start_timeout(&self) -> Duration {
        self.muxer_start_timeout
    }

    /// Returns a builder pre-filled with this config, for deriving a variant.
    pub fn to_builder(&self) -> EncoderConfigBuilder {
        EncoderConfigBuilder {
            width: self.width,
            height: self.height,
            video_bit_rate: self.video_bit_rate,
            audio_bit_rate: self.audio_bit_rate,
            frame_rate: self.frame_rate,
            audio_source: self.audio_source,
            audio_encoder: self.audio_encoder,
            output_file: Some(self.output_file.clone()),
            shared_context: self.shared_context.clone(),
            max_duration: self.max_duration,
            max_file_size: self.max_file_size,
            muxer_start_timeout: self.muxer_start_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderConfigBuilder {
    width: u32,
    height: u32,
    video_bit_rate: u32,
    audio_bit_rate: Option<u32>,
    frame_rate: u32,
    audio_source: AudioSourceKind,
    audio_encoder: AudioEncoderKind,
    output_file: Option<PathBuf>,
    shared_context: Option<SharedContext>,
    max_duration: Option<Duration>,
    max_file_size: Option<u64>,
    muxer_start_timeout: Duration,
}

impl Default for EncoderConfigBuilder {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIDEO_WIDTH,
            height: DEFAULT_VIDEO_HEIGHT,
            video_bit_rate: DEFAULT_VIDEO_BIT_RATE,
            audio_bit_rate: None,
            frame_rate: DEFAULT_FRAME_RATE,
            audio_source: AudioSourceKind::default(),
            audio_encoder: AudioEncoderKind::default(),
            output_file: None,
            shared_context: None,
            max_duration: None,
            max_file_size: None,
            muxer_start_timeout: DEFAULT_MUXER_START_TIMEOUT,
        }
    }
}

impl EncoderConfigBuilder {
    pub fn width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = height;
        self
    }

    pub fn video_bit_rate(mut self, bit_rate: u32) -> Self {
        self.video_bit_rate = bit_rate;
        self
    }

    /// Be careful with the audio bit rate: a value the codec dislikes can produce
    /// stuttering. Passing `None` lets the backend pick.
    pub fn audio_bit_rate(mut self, bit_rate: Option<u32>) -> Self {
        self.audio_bit_rate = bit_rate;
        self
    }

    pub fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn audio_source(mut self, source: AudioSourceKind) -> Self {
        self.audio_source = source;
        self
    }

    pub fn audio_encoder(mut self, encoder: AudioEncoderKind) -> Self {
        self.audio_encoder = encoder;
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn shared_context(mut self, context: SharedContext) -> Self {
        self.shared_context = Some(context);
        self
    }

    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn muxer_start_timeout(mut self, timeout: Duration) -> Self {
        self.muxer_start_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<EncoderConfig, ConfigError> {
        if self.width == 0 {
            return Err(ConfigError::InvalidWidth);
        }
        if self.height == 0 {
            return Err(ConfigError::InvalidHeight);
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::InvalidFrameRate(self.frame_rate));
        }
        if self.video_bit_rate == 0 {
            return Err(ConfigError::InvalidVideoBitRate);
        }
        if self.audio_bit_rate == Some(0) {
            return Err(ConfigError::InvalidAudioBitRate);
        }
        let output_file = self.output_file.ok_or(ConfigError::MissingOutputFile)?;
        if output_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingOutputFile);
        }

        Ok(EncoderConfig {
            width: self.width,
            height: self.height,
            video_bit_rate: self.video_bit_rate,
            audio_bit_rate: self.audio_bit_rate,
            frame_rate: self.frame_rate,
            audio_source: self.audio_source,
            audio_encoder: self.audio_encoder,
            output_file,
            shared_context: self.shared_context,
            max_duration: self.max_duration,
            max_file_size: self.max_file_size,
            muxer_start_timeout: self.muxer_start_timeout,
        })
    }
}

/// Recording defaults persisted as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub video_bit_rate: u32,
    /// 0 means unset
    pub audio_bit_rate: u32,
    pub frame_rate: u32,
    pub audio_source: String,
    pub audio_encoder: String,
    pub output_directory: String,
    pub max_duration_secs: Option<u64>,
    pub max_file_size_bytes: Option<u64>,
    pub muxer_start_timeout_ms: u64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            video_bit_rate: DEFAULT_VIDEO_BIT_RATE,
            audio_bit_rate: 0,
            frame_rate: DEFAULT_FRAME_RATE,
            audio_source: AudioSourceKind::default().to_string(),
            audio_encoder: "default".to_string(),
            output_directory: "./recordings".to_string(),
            max_duration_secs: None,
            max_file_size_bytes: None,
            muxer_start_timeout_ms: DEFAULT_MUXER_START_TIMEOUT.as_millis() as u64,
        }
    }
}

impl EncoderSettings {
    /// Load settings from a TOML file, falling back to defaults when it does not exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Settings file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::Settings(format!("failed to read {:?}: {}", path, e)))?;
        let settings: EncoderSettings = toml::from_str(&contents)
            .map_err(|e| ConfigError::Settings(format!("failed to parse {:?}: {}", path, e)))?;

        log::info!("Loaded encoder settings from {:?}", path);
        Ok(settings)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::Settings(format!("failed to create {:?}: {}", parent, e)))?;
            }
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Settings(format!("failed to serialize settings: {}", e)))?;
        fs::write(path, contents)
            .map_err(|e| ConfigError::Settings(format!("failed to write {:?}: {}", path, e)))?;
        Ok(())
    }

    /// Seed a builder from these settings. Selector strings are validated here.
    pub fn builder(&self) -> Result<EncoderConfigBuilder, ConfigError> {
        let mut builder = EncoderConfig::builder()
            .video_bit_rate(self.video_bit_rate)
            .audio_bit_rate((self.audio_bit_rate != 0).then_some(self.audio_bit_rate))
            .frame_rate(self.frame_rate)
            .audio_source(self.audio_source.parse()?)
            .audio_encoder(self.audio_encoder.parse()?)
            .muxer_start_timeout(Duration::from_millis(self.muxer_start_timeout_ms));
        if let Some(secs) = self.max_duration_secs {
            builder = builder.max_duration(Duration::from_secs(secs));
        }
        if let Some(bytes) = self.max_file_size_bytes {
            builder = builder.max_file_size(bytes);
        }
        Ok(builder)
    }

    /// Path for a new recording inside the configured output directory
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.output_directory).join(file_name)
    }
}
