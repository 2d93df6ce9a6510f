//! Opus encoding over libopus

use super::{AudioEncode, AudioFrame, EncodedAudio};
use crate::errors::EncoderError;
use crate::muxer::{AudioCodecKind, TrackFormat};

/// 20ms at 48kHz, per channel
const OPUS_FRAME_SAMPLES: usize = 960;

/// OPUS_APPLICATION_AUDIO
const OPUS_APPLICATION_AUDIO: i32 = 2049;

/// Largest packet libopus can emit
const MAX_PACKET_SIZE: usize = 4000;

/// Buffers PCM into 20ms frames and emits one Opus packet per frame.
///
/// Timestamps start at the first buffered sample's capture time and then
/// advance by sample count, so packet spacing is exact regardless of capture
/// jitter.
pub struct OpusAudioEncoder {
    encoder: *mut libopus_sys::OpusEncoder,
    channels: u16,
    sample_rate: u32,
    sample_buffer: Vec<f32>,
    buffer_start_pts: Option<f64>,
    samples_encoded: u64,
}

// SAFETY: the libopus state is only touched through &mut self, and the type is
// not Sync, so at most one thread uses it at a time.
unsafe impl Send for OpusAudioEncoder {}

impl OpusAudioEncoder {
    pub fn new(sample_rate: u32, channels: u16, bitrate: u32) -> Result<Self, EncoderError> {
        if sample_rate != 48_000 {
            return Err(EncoderError::Audio(
                "Opus requires 48000 Hz sample rate".to_string(),
            ));
        }
        if channels != 1 && channels != 2 {
            return Err(EncoderError::Audio(
                "Opus supports only mono (1) or stereo (2) channels".to_string(),
            ));
        }

        let mut error: i32 = 0;
        let encoder = unsafe {
            libopus_sys::opus_encoder_create(
                sample_rate as i32,
                channels as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };
        if encoder.is_null() || error != 0 {
            return Err(EncoderError::Audio(format!(
                "Failed to create Opus encoder: error code {}",
                error
            )));
        }

        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                encoder,
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bitrate as i32,
            )
        };
        if result != 0 {
            unsafe { libopus_sys::opus_encoder_destroy(encoder) };
            return Err(EncoderError::Audio(format!(
                "Failed to set bitrate: error code {}",
                result
            )));
        }

        log::debug!("Opus encoder ready: {} Hz, {} ch, {} bps", sample_rate, channels, bitrate);
        Ok(Self {
            encoder,
            channels,
            sample_rate,
            sample_buffer: Vec::with_capacity(OPUS_FRAME_SAMPLES * channels as usize * 2),
            buffer_start_pts: None,
            samples_encoded: 0,
        })
    }

    fn samples_per_frame(&self) -> usize {
        OPUS_FRAME_SAMPLES * self.channels as usize
    }

    fn encode_buffered(&mut self) -> Result<Vec<EncodedAudio>, EncoderError> {
        let samples_per_frame = self.samples_per_frame();
        let frame_duration = OPUS_FRAME_SAMPLES as f64 / self.sample_rate as f64;
        let mut packets = Vec::new();

        while self.sample_buffer.len() >= samples_per_frame {
            let frame: Vec<f32> = self.sample_buffer.drain(..samples_per_frame).collect();
            let offset = self.samples_encoded as f64 / self.sample_rate as f64;

            let mut output = vec![0u8; MAX_PACKET_SIZE];
            let len = unsafe {
                libopus_sys::opus_encode_float(
                    self.encoder,
                    frame.as_ptr(),
                    OPUS_FRAME_SAMPLES as i32,
                    output.as_mut_ptr(),
                    output.len() as i32,
                )
            };
            if len < 0 {
                return Err(EncoderError::Audio(format!(
                    "Opus encoding failed: error code {}",
                    len
                )));
            }
            output.truncate(len as usize);

            packets.push(EncodedAudio {
                data: output,
                timestamp: self.buffer_start_pts.unwrap_or(0.0) + offset,
                duration: frame_duration,
            });
            self.samples_encoded += OPUS_FRAME_SAMPLES as u64;
        }

        Ok(packets)
    }
}

impl AudioEncode for OpusAudioEncoder {
    fn format(&self) -> TrackFormat {
        TrackFormat::Audio {
            codec: AudioCodecKind::Opus,
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    fn encode(&mut self, frame: &AudioFrame) -> Result<Vec<EncodedAudio>, EncoderError> {
        if frame.sample_rate != self.sample_rate {
            return Err(EncoderError::Audio(format!(
                "Sample rate mismatch: expected {}, got {}",
                self.sample_rate, frame.sample_rate
            )));
        }
        if frame.channels != self.channels {
            return Err(EncoderError::Audio(format!(
                "Channel count mismatch: expected {}, got {}",
                self.channels, frame.channels
            )));
        }

        if self.buffer_start_pts.is_none() && !frame.samples.is_empty() {
            self.buffer_start_pts = Some(frame.timestamp);
        }
        self.sample_buffer.extend_from_slice(&frame.samples);
        self.encode_buffered()
    }

    fn flush(&mut self) -> Result<Vec<EncodedAudio>, EncoderError> {
        if self.sample_buffer.is_empty() {
            return Ok(Vec::new());
        }
        let samples_per_frame = self.samples_per_frame();
        let remainder = self.sample_buffer.len() % samples_per_frame;
        if remainder != 0 {
            self.sample_buffer
                .resize(self.sample_buffer.len() + samples_per_frame - remainder, 0.0);
        }
        self.encode_buffered()
    }
}

impl Drop for OpusAudioEncoder {
    fn drop(&mut self) {
        if !self.encoder.is_null() {
            unsafe {
                libopus_sys::opus_encoder_destroy(self.encoder);
            }
        }
    }
}
