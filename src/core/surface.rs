use crate::callback::StateNotifier;
use crate::errors::EncoderError;
use crate::gpu::InputSurface;

use super::EncoderCore;

/// Asynchronous conditions a recorder backend reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderInfo {
    MaxDurationReached,
    MaxFileSizeReached,
}

/// A recorder that consumes its input surface and writes the container itself
pub trait RecorderBackend: Send {
    fn input_surface(&self) -> InputSurface;
    fn supports_pause(&self) -> bool;

    fn prepare(&mut self) -> Result<(), EncoderError>;
    fn start(&mut self) -> Result<(), EncoderError>;
    fn pause(&mut self) -> Result<(), EncoderError>;
    fn resume(&mut self) -> Result<(), EncoderError>;
    fn stop(&mut self) -> Result<(), EncoderError>;
    /// Return to the unconfigured state and drop every resource
    fn reset(&mut self);

    /// Pending watchdog info, or an error raised off the worker thread
    fn poll_info(&mut self) -> Result<Option<RecorderInfo>, EncoderError>;
}

/// Core over a self-draining `RecorderBackend`
pub struct SurfaceEncoderCore {
    backend: Box<dyn RecorderBackend>,
    notifier: StateNotifier,
    is_recording: bool,
    paused: bool,
    stopped: bool,
}

impl SurfaceEncoderCore {
    /// Wrap and prepare `backend`
    pub fn prepare(
        mut backend: Box<dyn RecorderBackend>,
        notifier: StateNotifier,
    ) -> Result<Self, EncoderError> {
        backend.prepare()?;
        Ok(Self {
            backend,
            notifier,
            is_recording: false,
            paused: false,
            stopped: false,
        })
    }
}

impl EncoderCore for SurfaceEncoderCore {
    fn input_surface(&self) -> InputSurface {
        self.backend.input_surface()
    }

    fn pause_resume_supported(&self) -> bool {
        self.backend.supports_pause()
    }

    fn drain_encoder(&mut self, _end_of_stream: bool) -> Result<(), EncoderError> {
        if let Some(info) = self.backend.poll_info()? {
            log::info!("Recorder reported {:?}; stopping", info);
            self.stop()?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), EncoderError> {
        if self.is_recording || self.paused || self.stopped {
            return Ok(());
        }
        self.backend.start()?;
        self.is_recording = true;
        self.notifier.on_recording_started();
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EncoderError> {
        if !self.pause_resume_supported() {
            return self.stop();
        }
        if !self.is_recording {
            return Ok(());
        }
        self.backend.pause()?;
        self.is_recording = false;
        self.paused = true;
        self.notifier.on_recording_paused();
        Ok(())
    }

    fn resume(&mut self) -> Result<(), EncoderError> {
        if !self.pause_resume_supported() {
            log::warn!("Resume ignored: recorder cannot pause");
            return Ok(());
        }
        if !self.paused {
            return Ok(());
        }
        self.backend.resume()?;
        self.is_recording = true;
        self.paused = false;
        self.notifier.on_recording_resumed();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EncoderError> {
        if !self.is_recording && !self.paused {
            return Ok(());
        }
        self.is_recording = false;
        self.paused = false;
        self.stopped = true;
        self.backend.stop()?;
        self.notifier.on_recording_stopped();
        Ok(())
    }

    fn release(&mut self) {
        self.backend.reset();
        self.is_recording = false;
        self.paused = false;
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}
