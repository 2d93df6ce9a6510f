//! Microphone capture over cpal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::{AudioFrame, AudioSource, PTSClock};
use crate::errors::EncoderError;

/// Frames buffered before new ones are dropped; about five seconds of 20ms callbacks
const MAX_BUFFER_FRAMES: usize = 256;

/// Interleaved f32 capture from an input device.
///
/// The cpal stream is not `Send` on every host, so construct this on the
/// thread that reads it (the sidecar does).
pub struct CpalAudioSource {
    stream: Option<Stream>,
    receiver: Receiver<AudioFrame>,
    is_running: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
}

impl CpalAudioSource {
    /// Open `device_name`, or the default input when `None`
    pub fn new(
        device_name: Option<&str>,
        sample_rate: u32,
        channels: u16,
        clock: PTSClock,
    ) -> Result<Self, EncoderError> {
        let host = cpal::default_host();
        let device = match device_name {
            None | Some("") | Some("default") => host
                .default_input_device()
                .ok_or_else(|| EncoderError::Audio("No default audio device".to_string()))?,
            Some(name) => host
                .input_devices()
                .map_err(|e| EncoderError::Audio(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().ok().as_deref() == Some(name))
                .ok_or_else(|| EncoderError::Audio(format!("Device not found: {}", name)))?,
        };

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (sender, receiver) = crossbeam_channel::bounded(MAX_BUFFER_FRAMES);
        let is_running = Arc::new(AtomicBool::new(false));
        let running = is_running.clone();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frame = AudioFrame {
                        samples: data.to_vec(),
                        sample_rate,
                        channels,
                        timestamp: clock.pts(),
                    };
                    // never block the audio callback
                    let _ = sender.try_send(frame);
                },
                move |err| {
                    log::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| EncoderError::Audio(format!("Failed to build stream: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            receiver,
            is_running,
            sample_rate,
            channels,
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(ref stream) = self.stream {
            stream
                .play()
                .map_err(|e| EncoderError::Audio(format!("Failed to start stream: {}", e)))?;
            self.is_running.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> Result<Option<AudioFrame>, EncoderError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EncoderError::Audio("audio stream closed".to_string()))
            }
        }
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        if !self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(ref stream) = self.stream {
            stream
                .pause()
                .map_err(|e| EncoderError::Audio(format!("Failed to stop stream: {}", e)))?;
            self.is_running.store(false, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        let _ = self.stop();
        self.stream = None;
    }
}
