//! H.264 encoding with openh264

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

use super::{
    BufferInfo, CodecOutput, VideoCodec, BUFFER_FLAG_CODEC_CONFIG, BUFFER_FLAG_END_OF_STREAM,
    BUFFER_FLAG_KEY_FRAME,
};
use crate::errors::EncoderError;
use crate::gpu::{InputSurface, SurfaceFrame, SurfaceSink};
use crate::muxer::{TrackFormat, VideoCodecKind};

const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

/// H.264 encoder over RGB24 frames
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl H264Encoder {
    /// `fps` and `bitrate` are rate-control hints; openh264's default
    /// configuration infers dimensions from each YUV source at encode time.
    pub fn new(width: u32, height: u32, _fps: f64, _bitrate: u32) -> Result<Self, EncoderError> {
        if width % 2 != 0 || height % 2 != 0 {
            return Err(EncoderError::Encoding(format!(
                "H.264 needs even dimensions, got {}x{}",
                width, height
            )));
        }

        let encoder = Encoder::new()
            .map_err(|e| EncoderError::Encoding(format!("Failed to create encoder: {}", e)))?;

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
        })
    }

    /// Encode one RGB24 frame into Annex B NAL units
    pub fn encode_rgb(&mut self, rgb_data: &[u8]) -> Result<EncodedFrame, EncoderError> {
        let expected_size = (self.width * self.height * 3) as usize;
        if rgb_data.len() != expected_size {
            return Err(EncoderError::Encoding(format!(
                "Invalid frame size: expected {} bytes, got {}",
                expected_size,
                rgb_data.len()
            )));
        }

        let yuv = rgb_to_yuv420(rgb_data, self.width, self.height);
        let yuv_buffer = YUVBuffer::from_vec(yuv, self.width as usize, self.height as usize);

        let bitstream = self
            .encoder
            .encode(&yuv_buffer)
            .map_err(|e| EncoderError::Encoding(format!("Encoding failed: {}", e)))?;
        self.frame_count += 1;

        let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        Ok(EncodedFrame {
            data: bitstream.to_vec(),
            is_keyframe,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }
}

#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Annex B data, start codes included
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

/// BT.601 RGB24 to planar YUV420
fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;

    let y_size = w * h;
    let uv_size = (w / 2) * (h / 2);
    let mut yuv = vec![0u8; y_size + uv_size * 2];

    let (y_plane, uv_planes) = yuv.split_at_mut(y_size);
    let (u_plane, v_plane) = uv_planes.split_at_mut(uv_size);

    for y in 0..h {
        for x in 0..w {
            let rgb_idx = (y * w + x) * 3;
            let r = rgb[rgb_idx] as i32;
            let g = rgb[rgb_idx + 1] as i32;
            let b = rgb[rgb_idx + 2] as i32;

            let y_val = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
            y_plane[y * w + x] = y_val.clamp(0, 255) as u8;

            if y % 2 == 0 && x % 2 == 0 {
                let uv_idx = (y / 2) * (w / 2) + (x / 2);
                let u_val = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
                let v_val = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
                u_plane[uv_idx] = u_val.clamp(0, 255) as u8;
                v_plane[uv_idx] = v_val.clamp(0, 255) as u8;
            }
        }
    }

    yuv
}

/// Split an Annex B stream into NAL unit payloads (start codes stripped)
fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map(|next| next - 3).unwrap_or(data.len());
        // a 4-byte start code leaves a trailing zero on the previous unit
        while end > start && data[end - 1] == 0 && n + 1 < starts.len() {
            end -= 1;
        }
        units.push(&data[start..end]);
    }
    units
}

/// SPS and PPS of an access unit, re-emitted with 4-byte start codes
pub(crate) fn parameter_sets(access_unit: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nal_units(access_unit) {
        let Some(&header) = nal.first() else { continue };
        if matches!(header & 0x1f, NAL_TYPE_SPS | NAL_TYPE_PPS) {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
    }
    out
}

struct CodecInput {
    width: u32,
    height: u32,
    frames: Mutex<VecDeque<SurfaceFrame>>,
    suspended: AtomicBool,
}

impl SurfaceSink for CodecInput {
    fn queue_frame(&self, frame: SurfaceFrame) -> Result<(), EncoderError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(EncoderError::Encoding(format!(
                "Frame dimensions {}x{} don't match codec input {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if self.suspended.load(Ordering::Acquire) {
            log::trace!("Codec suspended; dropping frame at {}ns", frame.timestamp_nanos);
            return Ok(());
        }
        self.frames.lock().expect("lock poisoned").push_back(frame);
        Ok(())
    }
}

/// Surface-input H.264 codec. Frames queued on the input surface are encoded
/// when output is dequeued, on the dequeuing thread.
pub struct OpenH264Codec {
    encoder: H264Encoder,
    input: Arc<CodecInput>,
    surface: InputSurface,
    frame_rate: f64,
    pending: VecDeque<CodecOutput>,
    format_sent: bool,
    end_of_input: bool,
    end_of_stream_sent: bool,
    next_index: i32,
    last_pts_us: i64,
}

impl OpenH264Codec {
    pub fn new(width: u32, height: u32, frame_rate: u32, bit_rate: u32) -> Result<Self, EncoderError> {
        let encoder = H264Encoder::new(width, height, frame_rate as f64, bit_rate)?;
        let input = Arc::new(CodecInput {
            width,
            height,
            frames: Mutex::new(VecDeque::new()),
            suspended: AtomicBool::new(false),
        });
        let surface = InputSurface::new(width, height, input.clone());

        log::debug!(
            "OpenH264 codec configured: {}x{} @ {} fps, {} bps",
            width,
            height,
            frame_rate,
            bit_rate
        );

        Ok(Self {
            encoder,
            input,
            surface,
            frame_rate: frame_rate as f64,
            pending: VecDeque::new(),
            format_sent: false,
            end_of_input: false,
            end_of_stream_sent: false,
            next_index: 0,
            last_pts_us: 0,
        })
    }

    fn next_index(&mut self) -> i32 {
        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1).max(0);
        index
    }

    fn encode_frame(&mut self, frame: SurfaceFrame) -> Result<(), EncoderError> {
        let encoded = self.encoder.encode_rgb(&frame.data)?;
        if encoded.data.is_empty() {
            log::debug!("Encoder produced no output for frame at {}ns", frame.timestamp_nanos);
            return Ok(());
        }

        let pts_us = frame.timestamp_nanos / 1000;
        self.last_pts_us = pts_us;

        if !self.format_sent {
            let codec_config = parameter_sets(&encoded.data);
            self.pending.push_back(CodecOutput::FormatChanged(TrackFormat::Video {
                codec: VideoCodecKind::H264,
                width: self.input.width,
                height: self.input.height,
                frame_rate: self.frame_rate,
                codec_config: codec_config.clone(),
            }));
            if !codec_config.is_empty() {
                let index = self.next_index();
                self.pending.push_back(CodecOutput::Buffer {
                    index,
                    info: BufferInfo {
                        size: codec_config.len(),
                        presentation_time_us: pts_us,
                        flags: BUFFER_FLAG_CODEC_CONFIG,
                    },
                    data: codec_config,
                });
            }
            self.format_sent = true;
        }

        let index = self.next_index();
        self.pending.push_back(CodecOutput::Buffer {
            index,
            info: BufferInfo {
                size: encoded.data.len(),
                presentation_time_us: pts_us,
                flags: if encoded.is_keyframe { BUFFER_FLAG_KEY_FRAME } else { 0 },
            },
            data: encoded.data,
        });
        Ok(())
    }
}

impl VideoCodec for OpenH264Codec {
    fn input_surface(&self) -> InputSurface {
        self.surface.clone()
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<CodecOutput, EncoderError> {
        loop {
            if let Some(output) = self.pending.pop_front() {
                return Ok(output);
            }

            let next = self.input.frames.lock().expect("lock poisoned").pop_front();
            match next {
                Some(frame) => self.encode_frame(frame)?,
                None if self.end_of_input && !self.end_of_stream_sent => {
                    self.end_of_stream_sent = true;
                    let index = self.next_index();
                    return Ok(CodecOutput::Buffer {
                        index,
                        info: BufferInfo {
                            size: 0,
                            presentation_time_us: self.last_pts_us,
                            flags: BUFFER_FLAG_END_OF_STREAM,
                        },
                        data: Vec::new(),
                    });
                }
                None => return Ok(CodecOutput::TryAgainLater),
            }
        }
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), EncoderError> {
        if self.end_of_input {
            return Err(EncoderError::InvalidState(
                "end of input already signalled".to_string(),
            ));
        }
        self.end_of_input = true;
        Ok(())
    }

    fn supports_suspend(&self) -> bool {
        true
    }

    fn set_suspended(&mut self, suspended: bool) -> Result<(), EncoderError> {
        let was = self.input.suspended.swap(suspended, Ordering::AcqRel);
        if was && !suspended {
            // the first frame after a gap must be decodable on its own
            self.encoder.force_keyframe();
        }
        Ok(())
    }

    fn release(&mut self) {
        self.input.frames.lock().expect("lock poisoned").clear();
        self.pending.clear();
        log::debug!("OpenH264 codec released after {} frames", self.encoder.frame_count());
    }
}
