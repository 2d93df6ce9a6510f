use thiserror::Error;

use crate::muxer::TrackKind;

/// Rejected encoder configuration. Raised while building the config, before any
/// backend object exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("width == 0")]
    InvalidWidth,
    #[error("height == 0")]
    InvalidHeight,
    #[error("frame rate must be positive, got {0}")]
    InvalidFrameRate(u32),
    #[error("video bit rate == 0")]
    InvalidVideoBitRate,
    #[error("audio bit rate == 0 (leave it unset to let the backend choose)")]
    InvalidAudioBitRate,
    #[error("output file is not set")]
    MissingOutputFile,
    #[error("invalid audio source '{0}': expected default, mic, camcorder, synthetic or disabled")]
    InvalidAudioSource(String),
    #[error("invalid audio encoder '{0}': expected default or opus")]
    InvalidAudioEncoder(String),
    #[error("failed to load settings: {0}")]
    Settings(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncoderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Illegal backend state: {0}")]
    InvalidState(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Muxing error: {0}")]
    Muxing(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Audio error: {0}")]
    Audio(String),
    #[error("Render error: {0}")]
    Render(String),
    #[error("{0:?} output format changed twice")]
    FormatChangedTwice(TrackKind),
    #[error("{0:?} track registered twice")]
    DuplicateTrack(TrackKind),
    #[error("{0:?} track registered after the container started")]
    TrackAfterStart(TrackKind),
    #[error("sample written before the container started")]
    MuxerNotStarted,
    #[error("container did not start within {0} ms; a track never registered")]
    MuxerStartTimeout(u64),
    #[error("Requesting to resume after stop! Start first")]
    ResumeWithoutStart,
    #[error("cannot resume: recording was stopped because the backend cannot pause")]
    ResumeAfterStop,
}

impl From<std::io::Error> for EncoderError {
    fn from(e: std::io::Error) -> Self {
        EncoderError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: EncoderError = ConfigError::MissingOutputFile.into();
        assert_eq!(err, EncoderError::Config(ConfigError::MissingOutputFile));
        assert!(err.to_string().contains("output file"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EncoderError = io.into();
        assert!(matches!(err, EncoderError::Io(ref m) if m.contains("gone")));
    }

    #[test]
    fn test_display_names_track() {
        let err = EncoderError::FormatChangedTwice(TrackKind::Video);
        assert_eq!(err.to_string(), "Video output format changed twice");
    }
}
