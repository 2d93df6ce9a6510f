//! Container writing shared by the video worker and the audio sidecar
//!
//! `ContainerMuxer` owns the output writer. Tracks register once each; the
//! registration that completes the expected set starts the writer, exactly
//! once, and wakes everyone waiting in `await_started`. Writes are serialized
//! by a single mutex held only for one track-add or sample-write call.

#[cfg(feature = "recording")]
mod mp4;

#[cfg(feature = "recording")]
pub use mp4::Mp4ContainerWriter;

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::callback::StateNotifier;
use crate::errors::EncoderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodecKind {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodecKind {
    Opus,
}

/// Output format of one encoder, as announced when its format becomes known
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackFormat {
    Video {
        codec: VideoCodecKind,
        width: u32,
        height: u32,
        frame_rate: f64,
        /// SPS/PPS in Annex B form, when the codec exposes them
        codec_config: Vec<u8>,
    },
    Audio {
        codec: AudioCodecKind,
        sample_rate: u32,
        channels: u16,
    },
}

impl TrackFormat {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackFormat::Video { .. } => TrackKind::Video,
            TrackFormat::Audio { .. } => TrackKind::Audio,
        }
    }
}

/// One compressed access unit bound for the container
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    /// Presentation time in seconds
    pub pts: f64,
    pub is_keyframe: bool,
}

/// Statistics of a finalized container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub video_samples: u64,
    pub audio_samples: u64,
    pub duration_secs: f64,
    pub bytes_written: u64,
}

/// Backend that lays samples out in a container file
pub trait ContainerWriter: Send {
    /// Called once, with every registered track in registration order
    fn start(&mut self, tracks: &[TrackFormat]) -> Result<(), EncoderError>;
    fn write_sample(&mut self, track: &TrackFormat, sample: &EncodedSample) -> Result<(), EncoderError>;
    fn finish(&mut self) -> Result<ContainerStats, EncoderError>;
    /// Close without finalizing; used when nothing was ever written
    fn abandon(&mut self) {}
}

struct MuxerState {
    writer: Box<dyn ContainerWriter>,
    tracks: Vec<TrackFormat>,
    started: bool,
    finished: bool,
    samples_written: u64,
}

pub struct ContainerMuxer {
    state: Mutex<MuxerState>,
    started_cv: Condvar,
    expected_tracks: usize,
    notifier: StateNotifier,
}

impl ContainerMuxer {
    /// `expected_tracks` registrations must arrive before the writer starts.
    /// `notifier` receives the started notification when that happens.
    pub fn new(
        writer: Box<dyn ContainerWriter>,
        expected_tracks: usize,
        notifier: StateNotifier,
    ) -> Self {
        Self {
            state: Mutex::new(MuxerState {
                writer,
                tracks: Vec::new(),
                started: false,
                finished: false,
                samples_written: 0,
            }),
            started_cv: Condvar::new(),
            expected_tracks: expected_tracks.max(1),
            notifier,
        }
    }

    pub fn expected_tracks(&self) -> usize {
        self.expected_tracks
    }

    /// Register a track, returning its index. The registration that completes
    /// the expected set starts the container.
    pub fn add_track(&self, format: TrackFormat) -> Result<usize, EncoderError> {
        let kind = format.kind();
        let mut state = self.state.lock().expect("lock poisoned");
        if state.started || state.finished {
            return Err(EncoderError::TrackAfterStart(kind));
        }
        if state.tracks.iter().any(|t| t.kind() == kind) {
            return Err(EncoderError::DuplicateTrack(kind));
        }

        state.tracks.push(format);
        let index = state.tracks.len() - 1;
        log::info!(
            "{:?} track registered as #{} ({}/{})",
            kind,
            index,
            state.tracks.len(),
            self.expected_tracks
        );

        if state.tracks.len() == self.expected_tracks {
            let MuxerState { writer, tracks, .. } = &mut *state;
            writer.start(tracks)?;
            state.started = true;
            self.started_cv.notify_all();
            log::info!("Container started with {} track(s)", self.expected_tracks);
            self.notifier.on_recording_started();
        }
        Ok(index)
    }

    /// Block until the container has started or `timeout` elapses
    pub fn await_started(&self, timeout: Duration) -> Result<(), EncoderError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            if state.started {
                return Ok(());
            }
            if state.finished {
                return Err(EncoderError::MuxerNotStarted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(EncoderError::MuxerStartTimeout(timeout.as_millis() as u64));
            }
            let (guard, _) = self
                .started_cv
                .wait_timeout(state, deadline - now)
                .expect("lock poisoned");
            state = guard;
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().expect("lock poisoned").started
    }

    pub fn track_index(&self, kind: TrackKind) -> Option<usize> {
        let state = self.state.lock().expect("lock poisoned");
        state.tracks.iter().position(|t| t.kind() == kind)
    }

    pub fn samples_written(&self) -> u64 {
        self.state.lock().expect("lock poisoned").samples_written
    }

    pub fn write_sample(&self, track: usize, sample: &EncodedSample) -> Result<(), EncoderError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if !state.started || state.finished {
            return Err(EncoderError::MuxerNotStarted);
        }
        let MuxerState { writer, tracks, .. } = &mut *state;
        let format = tracks
            .get(track)
            .ok_or_else(|| EncoderError::Muxing(format!("unknown track index {}", track)))?;
        writer.write_sample(format, sample)?;
        state.samples_written += 1;
        Ok(())
    }

    /// Finalize the container. Idempotent. A container that never started or
    /// never received a sample is abandoned rather than finalized, and that is
    /// not an error: the result is `Ok(None)`.
    pub fn finish(&self) -> Result<Option<ContainerStats>, EncoderError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.finished {
            return Ok(None);
        }
        state.finished = true;
        self.started_cv.notify_all();

        if !state.started || state.samples_written == 0 {
            log::warn!("Stopping container with no samples written; skipping finalize");
            state.writer.abandon();
            return Ok(None);
        }

        let stats = state.writer.finish()?;
        log::info!(
            "Container finalized: {} video / {} audio samples, {:.2}s, {} bytes",
            stats.video_samples,
            stats.audio_samples,
            stats.duration_secs,
            stats.bytes_written
        );
        Ok(Some(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recording {
        starts: Vec<Vec<TrackKind>>,
        samples: Vec<(TrackKind, f64)>,
        finished: bool,
        abandoned: bool,
    }

    struct FakeWriter(Arc<Mutex<Recording>>);

    impl ContainerWriter for FakeWriter {
        fn start(&mut self, tracks: &[TrackFormat]) -> Result<(), EncoderError> {
            self.0.lock().unwrap().starts.push(tracks.iter().map(TrackFormat::kind).collect());
            Ok(())
        }
        fn write_sample(&mut self, track: &TrackFormat, sample: &EncodedSample) -> Result<(), EncoderError> {
            self.0.lock().unwrap().samples.push((track.kind(), sample.pts));
            Ok(())
        }
        fn finish(&mut self) -> Result<ContainerStats, EncoderError> {
            self.0.lock().unwrap().finished = true;
            Ok(ContainerStats::default())
        }
        fn abandon(&mut self) {
            self.0.lock().unwrap().abandoned = true;
        }
    }

    fn video() -> TrackFormat {
        TrackFormat::Video {
            codec: VideoCodecKind::H264,
            width: 16,
            height: 16,
            frame_rate: 30.0,
            codec_config: Vec::new(),
        }
    }

    fn audio() -> TrackFormat {
        TrackFormat::Audio {
            codec: AudioCodecKind::Opus,
            sample_rate: 48_000,
            channels: 2,
        }
    }

    fn sample(pts: f64) -> EncodedSample {
        EncodedSample {
            data: vec![1, 2, 3],
            pts,
            is_keyframe: true,
        }
    }

    #[test]
    fn test_starts_only_after_all_tracks() {
        let log = Arc::new(Mutex::new(Recording::default()));
        let muxer = ContainerMuxer::new(Box::new(FakeWriter(log.clone())), 2, StateNotifier::detached());

        let v = muxer.add_track(video()).unwrap();
        assert!(!muxer.is_started());
        assert_eq!(muxer.write_sample(v, &sample(0.0)), Err(EncoderError::MuxerNotStarted));

        muxer.add_track(audio()).unwrap();
        assert!(muxer.is_started());
        assert_eq!(log.lock().unwrap().starts, vec![vec![TrackKind::Video, TrackKind::Audio]]);
    }

    #[test]
    fn test_duplicate_and_late_tracks_rejected() {
        let log = Arc::new(Mutex::new(Recording::default()));
        let muxer = ContainerMuxer::new(Box::new(FakeWriter(log)), 2, StateNotifier::detached());
        muxer.add_track(video()).unwrap();
        assert_eq!(muxer.add_track(video()), Err(EncoderError::DuplicateTrack(TrackKind::Video)));
        muxer.add_track(audio()).unwrap();
        assert_eq!(muxer.add_track(audio()), Err(EncoderError::TrackAfterStart(TrackKind::Audio)));
    }

    #[test]
    fn test_finish_without_samples_is_suppressed() {
        let log = Arc::new(Mutex::new(Recording::default()));
        let muxer = ContainerMuxer::new(Box::new(FakeWriter(log.clone())), 1, StateNotifier::detached());
        muxer.add_track(video()).unwrap();

        assert_eq!(muxer.finish(), Ok(None));
        assert_eq!(muxer.finish(), Ok(None));
        let log = log.lock().unwrap();
        assert!(log.abandoned);
        assert!(!log.finished);
    }

    #[test]
    fn test_finish_after_samples_finalizes() {
        let log = Arc::new(Mutex::new(Recording::default()));
        let muxer = ContainerMuxer::new(Box::new(FakeWriter(log.clone())), 1, StateNotifier::detached());
        let v = muxer.add_track(video()).unwrap();
        muxer.write_sample(v, &sample(0.0)).unwrap();
        muxer.write_sample(v, &sample(0.033)).unwrap();

        assert!(muxer.finish().unwrap().is_some());
        assert_eq!(muxer.samples_written(), 2);
        assert!(log.lock().unwrap().finished);
        assert_eq!(muxer.write_sample(v, &sample(1.0)), Err(EncoderError::MuxerNotStarted));
    }

    #[test]
    fn test_await_started_times_out() {
        let muxer = ContainerMuxer::new(
            Box::new(FakeWriter(Arc::default())),
            2,
            StateNotifier::detached(),
        );
        muxer.add_track(video()).unwrap();
        assert_eq!(
            muxer.await_started(Duration::from_millis(20)),
            Err(EncoderError::MuxerStartTimeout(20))
        );
    }

    #[test]
    fn test_await_started_wakes_on_last_registration() {
        let muxer = Arc::new(ContainerMuxer::new(
            Box::new(FakeWriter(Arc::default())),
            2,
            StateNotifier::detached(),
        ));
        muxer.add_track(video()).unwrap();

        let waiter = {
            let muxer = muxer.clone();
            std::thread::spawn(move || muxer.await_started(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        muxer.add_track(audio()).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
}
