//! Synthetic inputs and in-memory doubles for running the pipeline without
//! camera, microphone or container hardware.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::audio::{AudioEncode, AudioFrame, AudioSource, EncodedAudio, PTSClock};
use crate::errors::EncoderError;
use crate::muxer::{
    AudioCodecKind, ContainerStats, ContainerWriter, EncodedSample, TrackFormat, TrackKind,
};

/// Length of one synthetic audio frame
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// RGB24 gradient that shifts with `frame_number`
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; (width * height * 3) as usize];
    let base = (frame_number % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
    data
}

/// 440 Hz interleaved sine, identical in every channel
pub fn synthetic_audio_frame(
    frame_number: u64,
    samples_per_channel: usize,
    sample_rate: u32,
    channels: u16,
    timestamp: f64,
) -> AudioFrame {
    let channels_usize = channels as usize;
    let mut samples = vec![0.0f32; samples_per_channel * channels_usize];
    for i in 0..samples_per_channel {
        let t = (frame_number as f64 * samples_per_channel as f64 + i as f64) / sample_rate as f64;
        let value = (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32 * 0.3;
        for c in 0..channels_usize {
            samples[i * channels_usize + c] = value;
        }
    }
    AudioFrame {
        samples,
        sample_rate,
        channels,
        timestamp,
    }
}

/// Real-time paced sine source stamped on a shared `PTSClock`
pub struct SyntheticAudioSource {
    sample_rate: u32,
    channels: u16,
    clock: PTSClock,
    next_frame: Option<Instant>,
    frames_read: u64,
    fail_after: Option<u64>,
}

impl SyntheticAudioSource {
    pub fn new(sample_rate: u32, channels: u16, clock: PTSClock) -> Self {
        Self {
            sample_rate,
            channels,
            clock,
            next_frame: None,
            frames_read: 0,
            fail_after: None,
        }
    }

    /// Fail every read after `frames` frames have been produced
    pub fn with_failure_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    fn samples_per_frame(&self) -> usize {
        (self.sample_rate as u128 * AUDIO_FRAME_DURATION.as_millis() / 1000) as usize
    }
}

impl AudioSource for SyntheticAudioSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        self.next_frame = Some(Instant::now());
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<AudioFrame>, EncoderError> {
        let frame_start = self
            .next_frame
            .ok_or_else(|| EncoderError::Audio("synthetic source not started".to_string()))?;
        if self.fail_after.is_some_and(|limit| self.frames_read >= limit) {
            return Err(EncoderError::Audio("synthetic capture failure".to_string()));
        }

        let ready_at = frame_start + AUDIO_FRAME_DURATION;
        let now = Instant::now();
        if ready_at > now {
            let wait = ready_at - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }

        let frame = synthetic_audio_frame(
            self.frames_read,
            self.samples_per_frame(),
            self.sample_rate,
            self.channels,
            self.clock.pts_at(frame_start),
        );
        self.frames_read += 1;
        self.next_frame = Some(ready_at);
        Ok(Some(frame))
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        self.next_frame = None;
        Ok(())
    }
}

/// Emits one packet per frame holding the frame's sample count. Stands in
/// for Opus when libopus isn't built.
pub struct PassthroughAudioEncoder {
    sample_rate: u32,
    channels: u16,
}

impl PassthroughAudioEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl AudioEncode for PassthroughAudioEncoder {
    fn format(&self) -> TrackFormat {
        TrackFormat::Audio {
            codec: AudioCodecKind::Opus,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<EncodedAudio>, EncoderError> {
        let per_channel = frame.samples.len() / frame.channels.max(1) as usize;
        Ok(vec![EncodedAudio {
            data: (per_channel as u32).to_le_bytes().to_vec(),
            timestamp: frame.timestamp,
            duration: per_channel as f64 / frame.sample_rate as f64,
        }])
    }

    fn flush(&mut self) -> Result<Vec<EncodedAudio>, EncoderError> {
        Ok(Vec::new())
    }
}

/// Everything a `MemoryContainerWriter` saw
#[derive(Debug, Default, Clone)]
pub struct MemoryContainer {
    pub tracks: Vec<TrackFormat>,
    pub samples: Vec<(TrackKind, EncodedSample)>,
    pub start_calls: usize,
    pub finished: bool,
    pub abandoned: bool,
}

impl MemoryContainer {
    pub fn samples_of(&self, kind: TrackKind) -> Vec<&EncodedSample> {
        self.samples
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, sample)| sample)
            .collect()
    }
}

/// `ContainerWriter` that keeps everything in memory behind a shared handle
#[derive(Debug, Default, Clone)]
pub struct MemoryContainerWriter {
    state: Arc<Mutex<MemoryContainer>>,
}

impl MemoryContainerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MemoryContainer {
        self.state.lock().expect("lock poisoned").clone()
    }
}

impl ContainerWriter for MemoryContainerWriter {
    fn start(&mut self, tracks: &[TrackFormat]) -> Result<(), EncoderError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.tracks = tracks.to_vec();
        state.start_calls += 1;
        Ok(())
    }

    fn write_sample(&mut self, track: &TrackFormat, sample: &EncodedSample) -> Result<(), EncoderError> {
        self.state
            .lock()
            .expect("lock poisoned")
            .samples
            .push((track.kind(), sample.clone()));
        Ok(())
    }

    fn finish(&mut self) -> Result<ContainerStats, EncoderError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.finished = true;
        let video_samples = state.samples_of(TrackKind::Video).len() as u64;
        let audio_samples = state.samples_of(TrackKind::Audio).len() as u64;
        let (first, last) = state
            .samples
            .iter()
            .map(|(_, s)| s.pts)
            .fold((f64::MAX, f64::MIN), |(lo, hi), pts| (lo.min(pts), hi.max(pts)));
        Ok(ContainerStats {
            video_samples,
            audio_samples,
            duration_secs: if state.samples.is_empty() { 0.0 } else { last - first },
            bytes_written: state.samples.iter().map(|(_, s)| s.data.len() as u64).sum(),
        })
    }

    fn abandon(&mut self) {
        self.state.lock().expect("lock poisoned").abandoned = true;
    }
}
