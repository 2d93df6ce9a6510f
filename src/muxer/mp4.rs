//! MP4 container writer using muxide

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use muxide::api::{AudioCodec, Metadata, Muxer, MuxerBuilder, VideoCodec};

use super::{AudioCodecKind, ContainerStats, ContainerWriter, EncodedSample, TrackFormat, VideoCodecKind};
use crate::errors::EncoderError;

/// Writes H.264 video and Opus audio into an MP4 file.
///
/// The file is created eagerly so a bad output path fails session creation,
/// but the muxide muxer can only be built once every track is known, which
/// happens in `start`.
pub struct Mp4ContainerWriter {
    output_path: PathBuf,
    file: Option<BufWriter<File>>,
    muxer: Option<Muxer<BufWriter<File>>>,
}

impl Mp4ContainerWriter {
    pub fn create<P: AsRef<Path>>(output_path: P) -> Result<Self, EncoderError> {
        let output_path = output_path.as_ref().to_path_buf();
        let file = File::create(&output_path).map_err(|e| {
            EncoderError::Io(format!(
                "Failed to create output file {}: {}",
                output_path.display(),
                e
            ))
        })?;

        Ok(Self {
            output_path,
            file: Some(BufWriter::new(file)),
            muxer: None,
        })
    }
}

impl ContainerWriter for Mp4ContainerWriter {
    fn start(&mut self, tracks: &[TrackFormat]) -> Result<(), EncoderError> {
        let writer = self
            .file
            .take()
            .ok_or_else(|| EncoderError::InvalidState("MP4 writer already started".to_string()))?;

        let mut builder = MuxerBuilder::new(writer).with_fast_start(true);
        for track in tracks {
            builder = match *track {
                TrackFormat::Video {
                    codec: VideoCodecKind::H264,
                    width,
                    height,
                    frame_rate,
                    ..
                } => builder.video(VideoCodec::H264, width, height, frame_rate),
                TrackFormat::Audio {
                    codec: AudioCodecKind::Opus,
                    sample_rate,
                    channels,
                } => builder.audio(AudioCodec::Opus, sample_rate, channels),
            };
        }

        builder = builder.with_metadata(Metadata::new().with_current_time());

        let muxer = builder
            .build()
            .map_err(|e| EncoderError::Muxing(format!("Failed to create muxer: {}", e)))?;
        self.muxer = Some(muxer);
        log::debug!("MP4 muxer ready for {}", self.output_path.display());
        Ok(())
    }

    fn write_sample(&mut self, track: &TrackFormat, sample: &EncodedSample) -> Result<(), EncoderError> {
        let muxer = self
            .muxer
            .as_mut()
            .ok_or(EncoderError::MuxerNotStarted)?;

        match track {
            TrackFormat::Video { .. } => muxer
                .write_video(sample.pts, &sample.data, sample.is_keyframe)
                .map_err(|e| EncoderError::Muxing(format!("Failed to write video sample: {}", e))),
            TrackFormat::Audio { .. } => muxer
                .write_audio(sample.pts, &sample.data)
                .map_err(|e| EncoderError::Muxing(format!("Failed to write audio sample: {}", e))),
        }
    }

    fn finish(&mut self) -> Result<ContainerStats, EncoderError> {
        let muxer = self
            .muxer
            .take()
            .ok_or(EncoderError::MuxerNotStarted)?;
        let stats = muxer
            .finish_with_stats()
            .map_err(|e| EncoderError::Muxing(format!("Failed to finalize recording: {}", e)))?;

        Ok(ContainerStats {
            video_samples: stats.video_frames,
            audio_samples: stats.audio_frames,
            duration_secs: stats.duration_secs,
            bytes_written: stats.bytes_written,
        })
    }

    fn abandon(&mut self) {
        self.file = None;
        self.muxer = None;
        log::debug!("Abandoned MP4 output {}", self.output_path.display());
    }
}
