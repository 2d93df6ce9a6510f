//! Recording state notifications
//!
//! The worker thread never calls into the UI layer directly. It pushes
//! `RecordingEvent`s through a `StateNotifier`; the control thread pumps the
//! matching `StateDispatcher`, which forwards each event to the registered
//! `EncoderStateCallback` if that callback is still alive.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::errors::EncoderError;

/// Receives recording lifecycle notifications on the control thread
pub trait EncoderStateCallback: Send + Sync {
    fn on_recording_started(&self) {}
    fn on_recording_resumed(&self) {}
    fn on_recording_paused(&self) {}
    fn on_recording_stopped(&self) {}
    fn on_recording_failed(&self, _error: &EncoderError) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    Started,
    Resumed,
    Paused,
    Stopped,
    Failed(EncoderError),
}

/// Sending half handed to the worker, the encoder cores and the renderer
#[derive(Debug, Clone)]
pub struct StateNotifier {
    tx: Sender<RecordingEvent>,
}

impl StateNotifier {
    /// A notifier whose events go nowhere
    pub fn detached() -> Self {
        let (tx, _) = crossbeam_channel::unbounded();
        Self { tx }
    }

    pub fn on_recording_started(&self) {
        self.send(RecordingEvent::Started);
    }

    pub fn on_recording_resumed(&self) {
        self.send(RecordingEvent::Resumed);
    }

    pub fn on_recording_paused(&self) {
        self.send(RecordingEvent::Paused);
    }

    pub fn on_recording_stopped(&self) {
        self.send(RecordingEvent::Stopped);
    }

    pub fn on_recording_failed(&self, error: EncoderError) {
        log::error!("Recording failed: {}", error);
        self.send(RecordingEvent::Failed(error));
    }

    fn send(&self, event: RecordingEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("State dispatcher is gone; dropping event");
        }
    }
}

/// Receiving half, owned by the control thread
pub struct StateDispatcher {
    rx: Receiver<RecordingEvent>,
    callback: Mutex<Option<Weak<dyn EncoderStateCallback>>>,
}

impl StateDispatcher {
    pub fn new(callback: &Arc<dyn EncoderStateCallback>) -> (Self, StateNotifier) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let dispatcher = Self {
            rx,
            callback: Mutex::new(Some(Arc::downgrade(callback))),
        };
        (dispatcher, StateNotifier { tx })
    }

    /// Drop the reference to the callback owner. Events arriving afterwards are
    /// discarded instead of reaching a stale owner.
    pub fn invalidate(&self) {
        *self.callback.lock().expect("lock poisoned") = None;
    }

    /// Deliver every queued event on the calling thread. Returns how many were delivered.
    pub fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.rx.try_recv() {
            if self.deliver(&event) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Wait up to `timeout` for one event and deliver it
    pub fn dispatch_timeout(&self, timeout: Duration) -> Option<RecordingEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.deliver(&event);
                Some(event)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn deliver(&self, event: &RecordingEvent) -> bool {
        let callback = self
            .callback
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        let Some(callback) = callback else {
            log::warn!("StateDispatcher: callback is gone, dropping {:?}", event);
            return false;
        };

        log::debug!("StateDispatcher: delivering {:?}", event);
        match event {
            RecordingEvent::Started => callback.on_recording_started(),
            RecordingEvent::Resumed => callback.on_recording_resumed(),
            RecordingEvent::Paused => callback.on_recording_paused(),
            RecordingEvent::Stopped => callback.on_recording_stopped(),
            RecordingEvent::Failed(error) => callback.on_recording_failed(error),
        }
        true
    }
}
