use std::sync::Arc;

use super::{EncoderCore, CoreFactory, MuxerEncoderCore, RecorderBackend, SurfaceEncoderCore};
use crate::audio::{AudioInput, AudioSidecar, PTSClock};
use crate::callback::StateNotifier;
use crate::codec::VideoCodec;
use crate::config::EncoderConfig;
use crate::errors::EncoderError;
use crate::muxer::{ContainerMuxer, ContainerWriter};

pub type BackendBuilder = Box<
    dyn Fn(&EncoderConfig, &PTSClock) -> Result<Box<dyn RecorderBackend>, EncoderError> + Send + Sync,
>;
pub type CodecBuilder =
    Box<dyn Fn(&EncoderConfig) -> Result<Box<dyn VideoCodec>, EncoderError> + Send + Sync>;
pub type WriterBuilder =
    Box<dyn Fn(&EncoderConfig) -> Result<Box<dyn ContainerWriter>, EncoderError> + Send + Sync>;
/// Returns `None` when the segment records no audio
pub type AudioBuilder =
    Box<dyn Fn(&EncoderConfig, &PTSClock) -> Result<Option<AudioInput>, EncoderError> + Send + Sync>;

/// Builds `SurfaceEncoderCore`s around a fresh backend per segment
pub struct SurfaceCoreFactory {
    pause_supported: bool,
    backend: BackendBuilder,
}

impl SurfaceCoreFactory {
    pub fn new<F>(pause_supported: bool, backend: F) -> Self
    where
        F: Fn(&EncoderConfig, &PTSClock) -> Result<Box<dyn RecorderBackend>, EncoderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            pause_supported,
            backend: Box::new(backend),
        }
    }

    /// `Mp4Recorder` with the configured audio source
    #[cfg(feature = "recording")]
    pub fn mp4() -> Self {
        Self::new(true, |config, clock| {
            let audio = default_audio_input(config, clock)?;
            let recorder = super::Mp4Recorder::new(config, clock.clone(), audio);
            Ok(Box::new(recorder) as Box<dyn RecorderBackend>)
        })
    }
}

impl CoreFactory for SurfaceCoreFactory {
    fn create(
        &self,
        config: &EncoderConfig,
        notifier: StateNotifier,
    ) -> Result<Box<dyn EncoderCore>, EncoderError> {
        let clock = PTSClock::new();
        let backend = (self.backend)(config, &clock)?;
        Ok(Box::new(SurfaceEncoderCore::prepare(backend, notifier)?))
    }

    fn pause_resume_supported(&self) -> bool {
        self.pause_supported
    }
}

/// Builds `MuxerEncoderCore`s: codec, container and optional audio sidecar
/// sharing one clock per segment.
pub struct MuxerCoreFactory {
    codec: CodecBuilder,
    writer: WriterBuilder,
    audio: AudioBuilder,
    pause_supported: bool,
}

impl MuxerCoreFactory {
    /// Video only, without pause support, until configured otherwise
    pub fn new<C, W>(codec: C, writer: W) -> Self
    where
        C: Fn(&EncoderConfig) -> Result<Box<dyn VideoCodec>, EncoderError> + Send + Sync + 'static,
        W: Fn(&EncoderConfig) -> Result<Box<dyn ContainerWriter>, EncoderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            codec: Box::new(codec),
            writer: Box::new(writer),
            audio: Box::new(|_, _| Ok(None)),
            pause_supported: false,
        }
    }

    pub fn with_audio<A>(mut self, audio: A) -> Self
    where
        A: Fn(&EncoderConfig, &PTSClock) -> Result<Option<AudioInput>, EncoderError>
            + Send
            + Sync
            + 'static,
    {
        self.audio = Box::new(audio);
        self
    }

    pub fn with_pause_support(mut self, supported: bool) -> Self {
        self.pause_supported = supported;
        self
    }

    /// openh264 into an MP4 file, audio per the config
    #[cfg(feature = "recording")]
    pub fn mp4() -> Self {
        use crate::codec::OpenH264Codec;
        use crate::muxer::Mp4ContainerWriter;

        Self::new(
            |config| {
                let codec = OpenH264Codec::new(
                    config.width(),
                    config.height(),
                    config.frame_rate(),
                    config.video_bit_rate(),
                )?;
                Ok(Box::new(codec) as Box<dyn VideoCodec>)
            },
            |config| {
                let writer = Mp4ContainerWriter::create(config.output_file())?;
                Ok(Box::new(writer) as Box<dyn ContainerWriter>)
            },
        )
        .with_audio(default_audio_input)
        .with_pause_support(true)
    }
}

impl CoreFactory for MuxerCoreFactory {
    fn create(
        &self,
        config: &EncoderConfig,
        notifier: StateNotifier,
    ) -> Result<Box<dyn EncoderCore>, EncoderError> {
        let clock = PTSClock::new();
        let codec = (self.codec)(config)?;
        let writer = (self.writer)(config)?;
        let audio = (self.audio)(config, &clock)?;

        let expected_tracks = if audio.is_some() { 2 } else { 1 };
        let muxer = Arc::new(ContainerMuxer::new(writer, expected_tracks, notifier.clone()));
        let sidecar = audio.map(|input| AudioSidecar::new(muxer.clone(), input));
        log::debug!(
            "Created muxer core {}x{} with {} track(s)",
            config.width(),
            config.height(),
            expected_tracks
        );

        Ok(Box::new(MuxerEncoderCore::new(
            codec,
            muxer,
            sidecar,
            clock,
            notifier,
            config.muxer_start_timeout(),
        )))
    }

    fn pause_resume_supported(&self) -> bool {
        self.pause_supported
    }
}

/// Audio input for `config.audio_source()`: capture over cpal, or the
/// synthetic tone, encoded as Opus.
#[cfg(feature = "audio")]
pub fn default_audio_input(
    config: &EncoderConfig,
    clock: &PTSClock,
) -> Result<Option<AudioInput>, EncoderError> {
    use crate::audio::{AudioSource, CpalAudioSource, OpusAudioEncoder, AUDIO_CHANNELS, AUDIO_SAMPLE_RATE};
    use crate::config::{AudioSourceKind, DEFAULT_AUDIO_BIT_RATE};
    use crate::testing::SyntheticAudioSource;

    let kind = config.audio_source();
    if !kind.is_enabled() {
        return Ok(None);
    }

    let bit_rate = config.audio_bit_rate().unwrap_or(DEFAULT_AUDIO_BIT_RATE);
    let encoder = OpusAudioEncoder::new(AUDIO_SAMPLE_RATE, AUDIO_CHANNELS, bit_rate)?;
    let clock = clock.clone();
    let source: crate::audio::AudioSourceFactory = match kind {
        AudioSourceKind::Synthetic => Box::new(move || {
            Ok(Box::new(SyntheticAudioSource::new(AUDIO_SAMPLE_RATE, AUDIO_CHANNELS, clock))
                as Box<dyn AudioSource>)
        }),
        _ => Box::new(move || {
            let source = CpalAudioSource::new(None, AUDIO_SAMPLE_RATE, AUDIO_CHANNELS, clock)?;
            Ok(Box::new(source) as Box<dyn AudioSource>)
        }),
    };
    log::debug!("Recording audio from {} at {} bps", kind, bit_rate);

    Ok(Some(AudioInput {
        source,
        encoder: Box::new(encoder),
    }))
}

#[cfg(not(feature = "audio"))]
pub fn default_audio_input(
    config: &EncoderConfig,
    _clock: &PTSClock,
) -> Result<Option<AudioInput>, EncoderError> {
    if config.audio_source().is_enabled() {
        log::warn!(
            "Audio source {} requested but built without the audio feature; recording video only",
            config.audio_source()
        );
    }
    Ok(None)
}
