use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::{AudioSidecar, MonotonicPts, PTSClock};
use crate::callback::StateNotifier;
use crate::codec::{CodecOutput, VideoCodec};
use crate::errors::EncoderError;
use crate::gpu::InputSurface;
use crate::muxer::{ContainerMuxer, EncodedSample, TrackFormat, TrackKind};

use super::EncoderCore;

const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(10);
const END_OF_STREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Core that drains a raw codec into a shared container.
///
/// Not thread-safe apart from the container, which the audio sidecar writes
/// to from its own thread. Call `drain_encoder(false)` before each frame is
/// submitted so the codec's output never backs up.
pub struct MuxerEncoderCore {
    codec: Box<dyn VideoCodec>,
    muxer: Arc<ContainerMuxer>,
    sidecar: Option<AudioSidecar>,
    notifier: StateNotifier,
    pts: MonotonicPts,
    muxer_start_timeout: Duration,
    track: Option<usize>,
    started: bool,
    suspended: bool,
    input_ended: bool,
    end_of_stream: bool,
    stopped: bool,
    released: bool,
    audio_failure_reported: bool,
}

impl MuxerEncoderCore {
    /// `clock` must be the timebase the sidecar's audio source stamps frames with
    pub fn new(
        codec: Box<dyn VideoCodec>,
        muxer: Arc<ContainerMuxer>,
        sidecar: Option<AudioSidecar>,
        clock: PTSClock,
        notifier: StateNotifier,
        muxer_start_timeout: Duration,
    ) -> Self {
        Self {
            codec,
            muxer,
            sidecar,
            notifier,
            pts: MonotonicPts::new(clock),
            muxer_start_timeout,
            track: None,
            started: false,
            suspended: false,
            input_ended: false,
            end_of_stream: false,
            stopped: false,
            released: false,
            audio_failure_reported: false,
        }
    }

    /// A sidecar failure, handed out once
    fn take_audio_failure(&mut self) -> Option<EncoderError> {
        if self.audio_failure_reported {
            return None;
        }
        let failure = self.sidecar.as_ref().and_then(AudioSidecar::failure);
        self.audio_failure_reported = failure.is_some();
        failure
    }

    fn on_format_changed(&mut self, format: TrackFormat) -> Result<(), EncoderError> {
        if self.track.is_some() {
            return Err(EncoderError::FormatChangedTwice(TrackKind::Video));
        }
        log::debug!("Encoder output format changed: {:?}", format);
        let track = self.muxer.add_track(format)?;
        self.track = Some(track);
        self.muxer.await_started(self.muxer_start_timeout)
    }

    fn write_buffer(&mut self, data: Vec<u8>, is_keyframe: bool) -> Result<(), EncoderError> {
        let track = self.track.ok_or(EncoderError::MuxerNotStarted)?;
        if !self.muxer.is_started() {
            return Err(EncoderError::MuxerNotStarted);
        }
        let size = data.len();
        let sample = EncodedSample {
            data,
            pts: self.pts.next(),
            is_keyframe,
        };
        self.muxer.write_sample(track, &sample)?;
        log::trace!("Sent {} bytes to muxer, pts={:.4}", size, sample.pts);
        Ok(())
    }
}

impl EncoderCore for MuxerEncoderCore {
    fn input_surface(&self) -> InputSurface {
        self.codec.input_surface()
    }

    fn pause_resume_supported(&self) -> bool {
        self.codec.supports_suspend()
    }

    /// Drain everything the codec has ready. With `end_of_stream`, signal end
    /// of input first and keep draining until the end-of-stream buffer shows up.
    fn drain_encoder(&mut self, end_of_stream: bool) -> Result<(), EncoderError> {
        if !end_of_stream {
            if let Some(failure) = self.take_audio_failure() {
                return Err(failure);
            }
        }
        if self.end_of_stream {
            return Ok(());
        }
        if end_of_stream && !self.input_ended {
            log::debug!("Sending EOS to encoder");
            self.input_ended = true;
            self.codec.signal_end_of_input_stream()?;
        }

        let deadline = Instant::now() + END_OF_STREAM_TIMEOUT;
        loop {
            match self.codec.dequeue_output_buffer(DEQUEUE_TIMEOUT)? {
                CodecOutput::TryAgainLater => {
                    if !end_of_stream {
                        break;
                    }
                    if Instant::now() >= deadline {
                        return Err(EncoderError::Encoding(
                            "timed out waiting for end of stream".to_string(),
                        ));
                    }
                    log::trace!("No output available, spinning to await EOS");
                }
                CodecOutput::FormatChanged(format) => self.on_format_changed(format)?,
                CodecOutput::Buffer { index, .. } if index < 0 => {
                    log::warn!("Unexpected result from dequeue_output_buffer: {}", index);
                }
                CodecOutput::Buffer { info, mut data, .. } => {
                    if info.is_codec_config() {
                        log::debug!("Ignoring codec config buffer ({} bytes)", info.size);
                    } else if info.size != 0 {
                        data.truncate(info.size);
                        self.write_buffer(data, info.is_key_frame())?;
                    }

                    if info.is_end_of_stream() {
                        if end_of_stream {
                            log::debug!("End of stream reached");
                        } else {
                            log::warn!("Reached end of stream unexpectedly");
                        }
                        self.end_of_stream = true;
                        self.stopped = true;
                        self.notifier.on_recording_stopped();
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        if let Some(sidecar) = self.sidecar.as_mut() {
            sidecar.start()?;
        }
        Ok(())
    }

    /// Suspends the codec, or stops the segment when the codec cannot suspend
    fn pause(&mut self) -> Result<(), EncoderError> {
        if !self.codec.supports_suspend() {
            log::info!("Codec cannot suspend; stopping instead of pausing");
            return self.stop();
        }
        if self.suspended || self.stopped {
            return Ok(());
        }
        self.codec.set_suspended(true)?;
        if let Some(sidecar) = self.sidecar.as_ref() {
            sidecar.pause();
        }
        self.suspended = true;
        self.notifier.on_recording_paused();
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EncoderError> {
        if !self.codec.supports_suspend() || !self.suspended || self.stopped {
            return Ok(());
        }
        self.codec.set_suspended(false)?;
        if let Some(sidecar) = self.sidecar.as_ref() {
            sidecar.resume();
        }
        self.suspended = false;
        self.notifier.on_recording_resumed();
        Ok(())
    }

    /// Audio stops first so its last packets land before the final video drain
    fn stop(&mut self) -> Result<(), EncoderError> {
        if !self.started || self.end_of_stream {
            return Ok(());
        }
        if let Some(sidecar) = self.sidecar.as_mut() {
            sidecar.stop();
        }
        let drained = self.drain_encoder(true);
        self.stopped = true;
        drained?;
        match self.take_audio_failure() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(mut sidecar) = self.sidecar.take() {
            sidecar.release();
        }
        self.codec.release();
        if let Err(e) = self.muxer.finish() {
            log::error!("Failed to finalize container: {}", e);
            self.notifier.on_recording_failed(e);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for MuxerEncoderCore {
    fn drop(&mut self) {
        self.release();
    }
}
