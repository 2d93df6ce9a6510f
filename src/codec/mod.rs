//! Raw video codec seam used by the muxer-backed encoder core
//!
//! A `VideoCodec` owns a persistent input surface. Frames rendered into that
//! surface come back out of `dequeue_output_buffer` as compressed buffers,
//! preceded exactly once by a `FormatChanged` signal carrying the track format.

#[cfg(feature = "recording")]
mod h264;

#[cfg(feature = "recording")]
pub use h264::{EncodedFrame, H264Encoder, OpenH264Codec};
#[cfg(feature = "recording")]
pub(crate) use h264::parameter_sets;

use std::time::Duration;

use crate::errors::EncoderError;
use crate::gpu::InputSurface;
use crate::muxer::TrackFormat;

pub const BUFFER_FLAG_KEY_FRAME: u32 = 0x1;
pub const BUFFER_FLAG_CODEC_CONFIG: u32 = 0x2;
pub const BUFFER_FLAG_END_OF_STREAM: u32 = 0x4;

/// Metadata of one dequeued output buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: u32,
}

impl BufferInfo {
    pub fn is_key_frame(&self) -> bool {
        self.flags & BUFFER_FLAG_KEY_FRAME != 0
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags & BUFFER_FLAG_CODEC_CONFIG != 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags & BUFFER_FLAG_END_OF_STREAM != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodecOutput {
    /// No output is available right now
    TryAgainLater,
    /// The output format is known; sent before the first buffer
    FormatChanged(TrackFormat),
    /// A compressed buffer. A negative `index` is a backend glitch.
    Buffer {
        index: i32,
        info: BufferInfo,
        data: Vec<u8>,
    },
}

pub trait VideoCodec: Send {
    /// Surface the worker renders into
    fn input_surface(&self) -> InputSurface;

    fn dequeue_output_buffer(&mut self, timeout: Duration) -> Result<CodecOutput, EncoderError>;

    /// After this, pending input drains out and a buffer flagged
    /// `BUFFER_FLAG_END_OF_STREAM` follows.
    fn signal_end_of_input_stream(&mut self) -> Result<(), EncoderError>;

    fn supports_suspend(&self) -> bool {
        false
    }

    /// Drop input while suspended
    fn set_suspended(&mut self, _suspended: bool) -> Result<(), EncoderError> {
        Err(EncoderError::InvalidState(
            "codec does not support suspend".to_string(),
        ))
    }

    fn release(&mut self);
}
