//! Rendering seams between the preview side and the encoder worker
//!
//! The encoder never composes shaders itself. It asks a `ContextProvider` for a
//! `RenderContext` that shares textures with the preview's `SharedContext`,
//! binds it to the encoder's `InputSurface`, and per frame draws the latched
//! camera texture and swaps it into the encoder.

mod software;

use std::fmt;
use std::sync::Arc;

use crate::errors::EncoderError;

pub use software::{
    SharedContext, SoftwareContextProvider, SoftwareRenderContext, SoftwareSurfaceTexture,
    TextureImage,
};

/// Name of a texture inside a `SharedContext`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureId(pub u32);

/// Column-major 4x4 texture transform, as reported by the frame source
pub type Transform = [f32; 16];

pub const IDENTITY_TRANSFORM: Transform = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Transform that flips the texture vertically, the usual camera orientation fix
pub const FLIP_VERTICAL_TRANSFORM: Transform = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 1.0, 0.0, 1.0,
];

/// One rendered RGB24 frame handed to an encoder input surface
#[derive(Debug, Clone)]
pub struct SurfaceFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation time in nanoseconds, 0 when the producer never set one
    pub timestamp_nanos: i64,
}

/// Consumer end of an encoder input surface
pub trait SurfaceSink: Send + Sync {
    fn queue_frame(&self, frame: SurfaceFrame) -> Result<(), EncoderError>;
}

/// Persistent input surface of an encoder backend
#[derive(Clone)]
pub struct InputSurface {
    width: u32,
    height: u32,
    sink: Arc<dyn SurfaceSink>,
}

impl InputSurface {
    pub fn new(width: u32, height: u32, sink: Arc<dyn SurfaceSink>) -> Self {
        Self { width, height, sink }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn queue_frame(&self, frame: SurfaceFrame) -> Result<(), EncoderError> {
        self.sink.queue_frame(frame)
    }
}

impl fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// Encoder-side rendering context. Thread-confined to the encoder worker.
pub trait RenderContext: Send {
    /// Bind the context to an encoder input surface
    fn make_current(&mut self, surface: &InputSurface) -> Result<(), EncoderError>;
    fn draw_frame(&mut self, texture: TextureId, transform: &Transform) -> Result<(), EncoderError>;
    fn set_presentation_time(&mut self, nanos: i64);
    /// Submit the drawn frame to the bound surface
    fn swap_buffers(&mut self) -> Result<(), EncoderError>;
    fn release(&mut self);
}

/// Creates encoder contexts that share state with the preview context
pub trait ContextProvider: Send + Sync {
    fn create_context(
        &self,
        shared: Option<&SharedContext>,
    ) -> Result<Box<dyn RenderContext>, EncoderError>;
}

/// Source of camera frames bound to a texture (the preview's surface texture)
pub trait FrameSource: Send + Sync {
    /// Latch the most recent frame into the texture
    fn update_tex_image(&self) -> Result<(), EncoderError> {
        Ok(())
    }
    fn texture_id(&self) -> TextureId;
    fn transform_matrix(&self) -> Transform;
    /// Timestamp of the latched frame in nanoseconds
    fn timestamp(&self) -> i64;
}
