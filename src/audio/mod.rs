//! Audio capture and encoding for the muxer-backed recorder
//!
//! - `clock`: shared presentation timebase
//! - `sidecar`: capture + encode thread feeding the container barrier
//! - `capture`: microphone source over cpal (feature `audio`)
//! - `opus`: Opus encoder over libopus (feature `audio`)

#[cfg(feature = "audio")]
mod capture;
mod clock;
#[cfg(feature = "audio")]
mod opus;
mod sidecar;

#[cfg(feature = "audio")]
pub use capture::CpalAudioSource;
pub use clock::{MonotonicPts, PTSClock};
#[cfg(feature = "audio")]
pub use opus::OpusAudioEncoder;
pub use sidecar::{AudioSidecar, AudioSourceFactory};

use std::time::Duration;

use crate::errors::EncoderError;
use crate::muxer::TrackFormat;

/// Sample rate every audio path records at
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const AUDIO_CHANNELS: u16 = 2;

/// Interleaved f32 PCM with its capture timestamp
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Seconds on the segment's `PTSClock`
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub data: Vec<u8>,
    /// Presentation timestamp in seconds
    pub timestamp: f64,
    pub duration: f64,
}

/// Raw PCM producer. Lives on the sidecar thread for its whole life.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn start(&mut self) -> Result<(), EncoderError>;
    /// Wait up to `timeout` for the next frame; `Ok(None)` if none arrived
    fn read(&mut self, timeout: Duration) -> Result<Option<AudioFrame>, EncoderError>;
    fn stop(&mut self) -> Result<(), EncoderError>;
}

/// What a sidecar needs to record one audio track
pub struct AudioInput {
    pub source: AudioSourceFactory,
    pub encoder: Box<dyn AudioEncode>,
}

/// PCM to compressed packets
pub trait AudioEncode: Send {
    fn format(&self) -> TrackFormat;
    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<EncodedAudio>, EncoderError>;
    /// Encode whatever is buffered, padding the last packet
    fn flush(&mut self) -> Result<Vec<EncodedAudio>, EncoderError>;
}
