//! CPU implementation of the rendering seams
//!
//! Textures are RGB24 images kept in a store that every context created from the
//! same `SharedContext` can read, which is all the encoder needs to blit the
//! latched camera frame onto its input surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    ContextProvider, FrameSource, InputSurface, RenderContext, SurfaceFrame, TextureId, Transform,
    IDENTITY_TRANSFORM,
};
use crate::errors::EncoderError;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// RGB24 texture contents
#[derive(Debug, Clone)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub data: Arc<Vec<u8>>,
}

#[derive(Debug, Default)]
struct TextureStore {
    next_texture: AtomicU32,
    images: Mutex<HashMap<TextureId, TextureImage>>,
}

/// Handle to a texture namespace shared between the preview and the encoder.
///
/// Each `SharedContext::new` call yields a new identity; clones keep it. A
/// recreated preview surface produces a new identity, which is how the renderer
/// knows the encoder context must be re-derived.
#[derive(Debug, Clone)]
pub struct SharedContext {
    id: u64,
    store: Arc<TextureStore>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            store: Arc::new(TextureStore::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn create_texture(&self) -> TextureId {
        TextureId(self.store.next_texture.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn upload(&self, texture: TextureId, image: TextureImage) {
        self.store
            .images
            .lock()
            .expect("lock poisoned")
            .insert(texture, image);
    }

    pub fn texture(&self, texture: TextureId) -> Option<TextureImage> {
        self.store
            .images
            .lock()
            .expect("lock poisoned")
            .get(&texture)
            .cloned()
    }

    pub fn delete_texture(&self, texture: TextureId) {
        self.store.images.lock().expect("lock poisoned").remove(&texture);
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SharedContext {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SharedContext {}

#[derive(Debug, Default)]
pub struct SoftwareContextProvider;

impl ContextProvider for SoftwareContextProvider {
    fn create_context(
        &self,
        shared: Option<&SharedContext>,
    ) -> Result<Box<dyn RenderContext>, EncoderError> {
        let shared = shared.ok_or_else(|| {
            EncoderError::Render("software rendering needs a shared context".to_string())
        })?;
        log::debug!("Creating software render context sharing context {}", shared.id());
        Ok(Box::new(SoftwareRenderContext::new(shared.clone())))
    }
}

pub struct SoftwareRenderContext {
    shared: SharedContext,
    surface: Option<InputSurface>,
    back_buffer: Option<Vec<u8>>,
    presentation_time: i64,
}

impl SoftwareRenderContext {
    pub fn new(shared: SharedContext) -> Self {
        Self {
            shared,
            surface: None,
            back_buffer: None,
            presentation_time: 0,
        }
    }
}

impl RenderContext for SoftwareRenderContext {
    fn make_current(&mut self, surface: &InputSurface) -> Result<(), EncoderError> {
        self.surface = Some(surface.clone());
        self.back_buffer = None;
        Ok(())
    }

    fn draw_frame(&mut self, texture: TextureId, transform: &Transform) -> Result<(), EncoderError> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| EncoderError::Render("no current surface".to_string()))?;
        let image = self.shared.texture(texture).ok_or_else(|| {
            EncoderError::Render(format!("texture {} has no image", texture.0))
        })?;

        self.back_buffer = Some(blit(&image, surface.width(), surface.height(), transform));
        Ok(())
    }

    fn set_presentation_time(&mut self, nanos: i64) {
        self.presentation_time = nanos;
    }

    fn swap_buffers(&mut self) -> Result<(), EncoderError> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| EncoderError::Render("no current surface".to_string()))?;
        let data = self
            .back_buffer
            .take()
            .ok_or_else(|| EncoderError::Render("swap without a drawn frame".to_string()))?;

        surface.queue_frame(SurfaceFrame {
            data,
            width: surface.width(),
            height: surface.height(),
            timestamp_nanos: self.presentation_time,
        })
    }

    fn release(&mut self) {
        self.surface = None;
        self.back_buffer = None;
    }
}

/// Nearest-neighbour blit of `image` into a `width`x`height` RGB24 buffer,
/// sampling through the affine part of `transform`.
fn blit(image: &TextureImage, width: u32, height: u32, transform: &Transform) -> Vec<u8> {
    let (dw, dh) = (width as usize, height as usize);
    let (sw, sh) = (image.width as usize, image.height as usize);
    let mut out = vec![0u8; dw * dh * 3];
    if sw == 0 || sh == 0 || image.data.len() < sw * sh * 3 {
        return out;
    }

    for dy in 0..dh {
        let v = (dy as f32 + 0.5) / dh as f32;
        for dx in 0..dw {
            let u = (dx as f32 + 0.5) / dw as f32;
            let tu = transform[0] * u + transform[4] * v + transform[12];
            let tv = transform[1] * u + transform[5] * v + transform[13];
            let sx = ((tu * sw as f32) as isize).clamp(0, sw as isize - 1) as usize;
            let sy = ((tv * sh as f32) as isize).clamp(0, sh as isize - 1) as usize;

            let src = (sy * sw + sx) * 3;
            let dst = (dy * dw + dx) * 3;
            out[dst..dst + 3].copy_from_slice(&image.data[src..src + 3]);
        }
    }
    out
}

struct PendingFrame {
    image: TextureImage,
    timestamp: i64,
}

/// Camera-fed texture. The camera side pushes frames from any thread; the
/// render thread latches the newest one with `update_tex_image`.
pub struct SoftwareSurfaceTexture {
    context: SharedContext,
    texture: TextureId,
    pending: Mutex<Option<PendingFrame>>,
    transform: Mutex<Transform>,
    timestamp: AtomicI64,
}

impl SoftwareSurfaceTexture {
    pub fn new(context: &SharedContext) -> Self {
        Self {
            context: context.clone(),
            texture: context.create_texture(),
            pending: Mutex::new(None),
            transform: Mutex::new(IDENTITY_TRANSFORM),
            timestamp: AtomicI64::new(0),
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Queue a camera frame; an unlatched older frame is replaced
    pub fn push_frame(&self, width: u32, height: u32, rgb: Vec<u8>, timestamp_nanos: i64) {
        *self.pending.lock().expect("lock poisoned") = Some(PendingFrame {
            image: TextureImage {
                width,
                height,
                data: Arc::new(rgb),
            },
            timestamp: timestamp_nanos,
        });
    }

    pub fn set_transform(&self, transform: Transform) {
        *self.transform.lock().expect("lock poisoned") = transform;
    }

    pub fn release(&self) {
        self.context.delete_texture(self.texture);
    }
}

impl FrameSource for SoftwareSurfaceTexture {
    fn update_tex_image(&self) -> Result<(), EncoderError> {
        if let Some(frame) = self.pending.lock().expect("lock poisoned").take() {
            self.context.upload(self.texture, frame.image);
            self.timestamp.store(frame.timestamp, Ordering::Release);
        }
        Ok(())
    }

    fn texture_id(&self) -> TextureId {
        self.texture
    }

    fn transform_matrix(&self) -> Transform {
        *self.transform.lock().expect("lock poisoned")
    }

    fn timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::Acquire)
    }
}
