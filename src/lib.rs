//! CrabEncoder: GPU-texture to video file encoding pipeline
//!
//! Camera frames latched into a texture are redrawn by a dedicated encoder
//! worker into an encoder input surface, compressed, and written to an MP4
//! container, optionally alongside a captured audio track.
//!
//! # Components
//! - `renderer::CameraRenderer`: render-thread state machine reconciling
//!   start/pause/resume/stop requests once per frame
//! - `worker::VideoEncoder`: command-queue worker owning the encoder session
//! - `core`: encoder backends (self-draining recorder, or codec + container)
//! - `muxer::ContainerMuxer`: track barrier in front of the container writer
//! - `audio::AudioSidecar`: audio capture + encode thread feeding the container
//!
//! # Usage
//! ```toml
//! [dependencies]
//! crabencoder = { version = "0.1", features = ["full-recording"] }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crabencoder::{CameraRenderer, MuxerCoreFactory, SoftwareContextProvider, StateDispatcher, VideoEncoder};
//!
//! let (dispatcher, notifier) = StateDispatcher::new(&callback);
//! let encoder = Arc::new(VideoEncoder::new(
//!     Arc::new(MuxerCoreFactory::mp4()),
//!     Arc::new(SoftwareContextProvider),
//!     notifier.clone(),
//! ));
//! let renderer = CameraRenderer::new(encoder, notifier);
//! renderer.on_surface_created(context, surface_texture);
//! renderer.start_recording(config);
//! // per camera frame, on the render thread:
//! renderer.on_draw_frame();
//! dispatcher.dispatch_pending();
//! ```
pub mod audio;
pub mod callback;
pub mod codec;
pub mod config;
pub mod core;
pub mod errors;
pub mod gpu;
pub mod muxer;
pub mod renderer;
pub mod worker;

// Synthetic sources and in-memory doubles for headless runs and tests
pub mod testing;

pub use callback::{EncoderStateCallback, RecordingEvent, StateDispatcher, StateNotifier};
pub use config::{AudioEncoderKind, AudioSourceKind, EncoderConfig, EncoderConfigBuilder, EncoderSettings};
pub use crate::core::{CoreFactory, EncoderCore, MuxerCoreFactory, SurfaceCoreFactory};
pub use errors::{ConfigError, EncoderError};
pub use gpu::{SharedContext, SoftwareContextProvider, SoftwareSurfaceTexture};
pub use muxer::{ContainerMuxer, ContainerStats, TrackKind};
pub use renderer::{CameraRenderer, LifecycleEvent, RecordingRequest, RecordingStatus};
pub use worker::{Recorder, VideoEncoder};

/// Initialize logging for the encoder
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabencoder=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    let mut features = Vec::new();
    if cfg!(feature = "recording") {
        features.push("recording".to_string());
    }
    if cfg!(feature = "audio") {
        features.push("audio".to_string());
    }
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        features,
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Backends compiled in
    pub features: Vec<String>,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabencoder");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.features.contains(&"audio".to_string()), cfg!(feature = "audio"));
    }
}
