//! Self-draining MP4 recorder: H.264 via openh264, container via the shared
//! `ContainerMuxer`, optional audio via the sidecar.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::surface::{RecorderBackend, RecorderInfo};
use crate::audio::{AudioInput, AudioSidecar, PTSClock};
use crate::callback::StateNotifier;
use crate::codec::{parameter_sets, H264Encoder};
use crate::config::EncoderConfig;
use crate::errors::EncoderError;
use crate::gpu::{InputSurface, SurfaceFrame, SurfaceSink};
use crate::muxer::{ContainerMuxer, EncodedSample, Mp4ContainerWriter, TrackFormat, VideoCodecKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Initial,
    Prepared,
    Recording,
    Paused,
    Stopped,
}

/// Maps camera timestamps onto segment time with pauses cut out
#[derive(Debug)]
struct SegmentTimeline {
    frame_interval_nanos: i64,
    first: Option<i64>,
    last: i64,
    /// camera time spent paused, never negative
    paused_nanos: i64,
    resumed: bool,
}

impl SegmentTimeline {
    fn new(frame_rate: u32) -> Self {
        Self {
            frame_interval_nanos: 1_000_000_000 / frame_rate.max(1) as i64,
            first: None,
            last: 0,
            paused_nanos: 0,
            resumed: false,
        }
    }

    fn mark_resumed(&mut self) {
        self.resumed = true;
    }

    /// Nanoseconds since the segment's first frame, and whether this is the
    /// first frame after a resume. `None` for frames that go backwards.
    fn place(&mut self, timestamp: i64) -> Option<(i64, bool)> {
        let Some(first) = self.first else {
            self.first = Some(timestamp);
            self.last = timestamp;
            self.resumed = false;
            return Some((0, false));
        };
        if timestamp <= self.last {
            return None;
        }

        let after_pause = std::mem::take(&mut self.resumed);
        if after_pause {
            // at most one frame interval bridges the pause
            self.paused_nanos += (timestamp - self.last - self.frame_interval_nanos).max(0);
        }
        self.last = timestamp;
        Some((timestamp - first - self.paused_nanos, after_pause))
    }
}

/// Frame path shared with the input surface
struct Pipeline {
    width: u32,
    height: u32,
    frame_rate: u32,
    recording: bool,
    encoder: Option<H264Encoder>,
    muxer: Option<Arc<ContainerMuxer>>,
    muxer_start_timeout: Duration,
    clock: PTSClock,
    track: Option<usize>,
    /// clock time of the first frame
    anchor_pts: Option<f64>,
    timeline: SegmentTimeline,
    frames_written: u64,
    bytes_written: u64,
    max_duration: Option<Duration>,
    max_file_size: Option<u64>,
    info: Option<RecorderInfo>,
}

impl Pipeline {
    fn write_frame(&mut self, frame: SurfaceFrame) -> Result<(), EncoderError> {
        if !self.recording || self.info.is_some() {
            return Ok(());
        }
        if frame.width != self.width || frame.height != self.height {
            return Err(EncoderError::Encoding(format!(
                "Frame dimensions {}x{} don't match recording config {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let timestamp = frame.timestamp_nanos;
        let Some((elapsed_nanos, after_pause)) = self.timeline.place(timestamp) else {
            log::warn!("Dropping out-of-order frame at {}ns", timestamp);
            return Ok(());
        };
        if after_pause {
            if let Some(encoder) = self.encoder.as_mut() {
                encoder.force_keyframe();
            }
        }

        let clock = &self.clock;
        let anchor_pts = *self.anchor_pts.get_or_insert_with(|| clock.pts());
        let elapsed = elapsed_nanos as f64 / 1e9;
        if let Some(limit) = self.max_duration {
            if elapsed >= limit.as_secs_f64() {
                log::info!("Max duration {:?} reached", limit);
                self.info = Some(RecorderInfo::MaxDurationReached);
                return Ok(());
            }
        }

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EncoderError::InvalidState("recorder not prepared".to_string()))?;
        let encoded = encoder.encode_rgb(&frame.data)?;
        if encoded.data.is_empty() {
            return Ok(());
        }

        let muxer = self
            .muxer
            .clone()
            .ok_or_else(|| EncoderError::InvalidState("recorder not prepared".to_string()))?;
        let track = match self.track {
            Some(track) => track,
            None => {
                let track = muxer.add_track(TrackFormat::Video {
                    codec: VideoCodecKind::H264,
                    width: self.width,
                    height: self.height,
                    frame_rate: self.frame_rate as f64,
                    codec_config: parameter_sets(&encoded.data),
                })?;
                muxer.await_started(self.muxer_start_timeout)?;
                self.track = Some(track);
                track
            }
        };

        let size = encoded.data.len() as u64;
        muxer.write_sample(
            track,
            &EncodedSample {
                data: encoded.data,
                pts: anchor_pts + elapsed,
                is_keyframe: encoded.is_keyframe,
            },
        )?;

        self.frames_written += 1;
        self.bytes_written += size;
        if let Some(limit) = self.max_file_size {
            if self.bytes_written >= limit {
                log::info!("Max file size {} bytes reached", limit);
                self.info = Some(RecorderInfo::MaxFileSizeReached);
            }
        }
        Ok(())
    }
}

struct RecorderInput(Arc<Mutex<Pipeline>>);

impl SurfaceSink for RecorderInput {
    fn queue_frame(&self, frame: SurfaceFrame) -> Result<(), EncoderError> {
        self.0.lock().expect("lock poisoned").write_frame(frame)
    }
}

/// `RecorderBackend` writing an MP4 file. Frames are encoded as they are
/// swapped onto the input surface; timestamps follow the camera clock with
/// pauses cut out.
pub struct Mp4Recorder {
    output_file: PathBuf,
    video_bit_rate: u32,
    audio: Option<AudioInput>,
    pipeline: Arc<Mutex<Pipeline>>,
    surface: InputSurface,
    muxer: Option<Arc<ContainerMuxer>>,
    sidecar: Option<AudioSidecar>,
    state: RecorderState,
    audio_failure_reported: bool,
}

impl Mp4Recorder {
    /// `clock` must be the timebase `audio` stamps its frames with
    pub fn new(config: &EncoderConfig, clock: PTSClock, audio: Option<AudioInput>) -> Self {
        let pipeline = Arc::new(Mutex::new(Pipeline {
            width: config.width(),
            height: config.height(),
            frame_rate: config.frame_rate(),
            recording: false,
            encoder: None,
            muxer: None,
            muxer_start_timeout: config.muxer_start_timeout(),
            clock,
            track: None,
            anchor_pts: None,
            timeline: SegmentTimeline::new(config.frame_rate()),
            frames_written: 0,
            bytes_written: 0,
            max_duration: config.max_duration(),
            max_file_size: config.max_file_size(),
            info: None,
        }));
        let surface = InputSurface::new(
            config.width(),
            config.height(),
            Arc::new(RecorderInput(pipeline.clone())),
        );

        Self {
            output_file: config.output_file().to_path_buf(),
            video_bit_rate: config.video_bit_rate(),
            audio,
            pipeline,
            surface,
            muxer: None,
            sidecar: None,
            state: RecorderState::Initial,
            audio_failure_reported: false,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.pipeline.lock().expect("lock poisoned").frames_written
    }

    fn expect_state(&self, allowed: &[RecorderState], op: &str) -> Result<(), EncoderError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EncoderError::InvalidState(format!(
                "{} called in state {:?}",
                op, self.state
            )))
        }
    }
}

impl RecorderBackend for Mp4Recorder {
    fn input_surface(&self) -> InputSurface {
        self.surface.clone()
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn prepare(&mut self) -> Result<(), EncoderError> {
        self.expect_state(&[RecorderState::Initial], "prepare")?;

        let mut pipeline = self.pipeline.lock().expect("lock poisoned");
        let encoder = H264Encoder::new(
            pipeline.width,
            pipeline.height,
            pipeline.frame_rate as f64,
            self.video_bit_rate,
        )?;
        let writer = Mp4ContainerWriter::create(&self.output_file)?;
        let expected_tracks = if self.audio.is_some() { 2 } else { 1 };
        let muxer = Arc::new(ContainerMuxer::new(
            Box::new(writer),
            expected_tracks,
            StateNotifier::detached(),
        ));

        pipeline.encoder = Some(encoder);
        pipeline.muxer = Some(muxer.clone());
        drop(pipeline);

        self.sidecar = self
            .audio
            .take()
            .map(|input| AudioSidecar::new(muxer.clone(), input));
        self.muxer = Some(muxer);
        self.state = RecorderState::Prepared;
        log::debug!("Mp4Recorder prepared for {}", self.output_file.display());
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        self.expect_state(&[RecorderState::Prepared], "start")?;
        if let Some(sidecar) = self.sidecar.as_mut() {
            sidecar.start()?;
        }
        self.pipeline.lock().expect("lock poisoned").recording = true;
        self.state = RecorderState::Recording;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EncoderError> {
        self.expect_state(&[RecorderState::Recording], "pause")?;
        self.pipeline.lock().expect("lock poisoned").recording = false;
        if let Some(sidecar) = self.sidecar.as_ref() {
            sidecar.pause();
        }
        self.state = RecorderState::Paused;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EncoderError> {
        self.expect_state(&[RecorderState::Paused], "resume")?;
        {
            let mut pipeline = self.pipeline.lock().expect("lock poisoned");
            pipeline.recording = true;
            pipeline.timeline.mark_resumed();
        }
        if let Some(sidecar) = self.sidecar.as_ref() {
            sidecar.resume();
        }
        self.state = RecorderState::Recording;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        self.expect_state(&[RecorderState::Recording, RecorderState::Paused], "stop")?;
        self.state = RecorderState::Stopped;
        self.pipeline.lock().expect("lock poisoned").recording = false;
        if let Some(sidecar) = self.sidecar.as_mut() {
            sidecar.stop();
        }

        let frames = self.frames_written();
        match self.muxer.as_ref().map(|muxer| muxer.finish()).transpose()? {
            Some(Some(stats)) => log::info!(
                "Recording finished: {} frames, {:.2}s, {} bytes",
                frames,
                stats.duration_secs,
                stats.bytes_written
            ),
            _ => log::warn!("Recording stopped with no frames written"),
        }
        Ok(())
    }

    fn reset(&mut self) {
        if let Some(mut sidecar) = self.sidecar.take() {
            sidecar.release();
        }
        if let Some(muxer) = self.muxer.take() {
            if let Err(e) = muxer.finish() {
                log::warn!("Discarding container on reset: {}", e);
            }
        }
        let mut pipeline = self.pipeline.lock().expect("lock poisoned");
        pipeline.recording = false;
        pipeline.encoder = None;
        pipeline.muxer = None;
        self.state = RecorderState::Initial;
    }

    fn poll_info(&mut self) -> Result<Option<RecorderInfo>, EncoderError> {
        if !self.audio_failure_reported {
            if let Some(failure) = self.sidecar.as_ref().and_then(AudioSidecar::failure) {
                self.audio_failure_reported = true;
                return Err(failure);
            }
        }
        Ok(self.pipeline.lock().expect("lock poisoned").info.take())
    }
}
