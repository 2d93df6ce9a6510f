//! Encoding backends driven by the worker thread
//!
//! An `EncoderCore` is one recording segment: created on Start, released on
//! Stop. Two variants exist:
//!
//! - `SurfaceEncoderCore` wraps a `RecorderBackend` that drains its own input
//!   surface and muxes internally.
//! - `MuxerEncoderCore` wraps a raw `VideoCodec`, drains it explicitly into a
//!   `ContainerMuxer`, and runs an optional `AudioSidecar` alongside.

mod factory;
#[cfg(feature = "recording")]
mod mp4_recorder;
mod muxer_core;
mod surface;

pub use factory::{
    default_audio_input, AudioBuilder, BackendBuilder, CodecBuilder, MuxerCoreFactory,
    SurfaceCoreFactory, WriterBuilder,
};
#[cfg(feature = "recording")]
pub use mp4_recorder::Mp4Recorder;
pub use muxer_core::MuxerEncoderCore;
pub use surface::{RecorderBackend, RecorderInfo, SurfaceEncoderCore};

use crate::callback::StateNotifier;
use crate::config::EncoderConfig;
use crate::errors::EncoderError;
use crate::gpu::InputSurface;

pub trait EncoderCore: Send {
    /// Persistent surface the worker renders frames into
    fn input_surface(&self) -> InputSurface;

    fn pause_resume_supported(&self) -> bool;

    /// Pull finished output out of the encoder. Backends that drain
    /// themselves use this to report asynchronous conditions.
    fn drain_encoder(&mut self, _end_of_stream: bool) -> Result<(), EncoderError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError>;
    fn pause(&mut self) -> Result<(), EncoderError>;
    fn resume(&mut self) -> Result<(), EncoderError>;
    fn stop(&mut self) -> Result<(), EncoderError>;

    /// Safe after `stop`, and after a failed `start`
    fn release(&mut self);

    /// True once the segment has ended, by `stop` or by the backend itself
    fn is_stopped(&self) -> bool;
}

/// Creates one `EncoderCore` per recording segment
pub trait CoreFactory: Send + Sync {
    fn create(
        &self,
        config: &EncoderConfig,
        notifier: StateNotifier,
    ) -> Result<Box<dyn EncoderCore>, EncoderError>;

    /// Whether cores from this factory can pause; when not, Pause degrades to Stop
    fn pause_resume_supported(&self) -> bool;
}
