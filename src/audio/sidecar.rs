use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{AudioEncode, AudioInput, AudioSource, EncodedAudio};
use crate::errors::EncoderError;
use crate::muxer::{ContainerMuxer, EncodedSample, TrackKind};

const READ_TIMEOUT: Duration = Duration::from_millis(20);
const SOURCE_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the audio source on the sidecar thread. Capture streams are often
/// bound to the thread that opened them, so the source never crosses threads.
pub type AudioSourceFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioSource>, EncoderError> + Send>;

#[derive(Default)]
struct SidecarShared {
    stop: AtomicBool,
    paused: AtomicBool,
    failure: Mutex<Option<EncoderError>>,
    packets_written: Mutex<u64>,
}

/// Audio capture + encode loop feeding the same container as the video track.
///
/// `start` registers the audio track with the container barrier and runs the
/// loop on its own thread. Packets produced before the container starts are
/// dropped. A capture or encode failure ends the loop and is kept for the
/// owning core to surface via `failure`.
pub struct AudioSidecar {
    muxer: Arc<ContainerMuxer>,
    source_factory: Option<AudioSourceFactory>,
    encoder: Option<Box<dyn AudioEncode>>,
    shared: Arc<SidecarShared>,
    thread: Option<JoinHandle<()>>,
}

impl AudioSidecar {
    pub fn new(muxer: Arc<ContainerMuxer>, input: AudioInput) -> Self {
        Self {
            muxer,
            source_factory: Some(input.source),
            encoder: Some(input.encoder),
            shared: Arc::new(SidecarShared::default()),
            thread: None,
        }
    }

    /// Prepare the source, register the audio track and start capturing.
    /// Only the first call does anything.
    pub fn start(&mut self) -> Result<(), EncoderError> {
        let (Some(factory), Some(encoder)) = (self.source_factory.take(), self.encoder.take()) else {
            log::debug!("Audio sidecar already started");
            return Ok(());
        };
        let format = encoder.format();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let shared = self.shared.clone();
        let muxer = self.muxer.clone();
        let handle = std::thread::Builder::new()
            .name("crabencoder-audio".to_string())
            .spawn(move || {
                let source = factory().and_then(|mut source| source.start().map(|_| source));
                match source {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        audio_loop(source, encoder, &muxer, &shared);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| EncoderError::Audio(format!("audio thread spawn failed: {}", e)))?;
        self.thread = Some(handle);

        let ready = ready_rx
            .recv_timeout(SOURCE_READY_TIMEOUT)
            .unwrap_or_else(|_| Err(EncoderError::Audio("audio source did not start".to_string())));
        if let Err(e) = ready {
            self.stop_thread();
            return Err(e);
        }

        if let Err(e) = self.muxer.add_track(format) {
            self.stop_thread();
            return Err(e);
        }
        log::info!("Audio sidecar started");
        Ok(())
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    /// Stop capturing, flush the encoder and join the thread. Idempotent.
    pub fn stop(&mut self) {
        if self.thread.is_some() {
            self.stop_thread();
            log::info!(
                "Audio sidecar stopped after {} packets",
                *self.shared.packets_written.lock().expect("lock poisoned")
            );
        }
    }

    /// The error that ended the capture loop, if any
    pub fn failure(&self) -> Option<EncoderError> {
        self.shared.failure.lock().expect("lock poisoned").clone()
    }

    pub fn packets_written(&self) -> u64 {
        *self.shared.packets_written.lock().expect("lock poisoned")
    }

    pub fn release(&mut self) {
        self.stop();
        self.source_factory = None;
        self.encoder = None;
    }

    fn stop_thread(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("Audio thread panicked");
            }
        }
    }
}

impl Drop for AudioSidecar {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn audio_loop(
    mut source: Box<dyn AudioSource>,
    mut encoder: Box<dyn AudioEncode>,
    muxer: &ContainerMuxer,
    shared: &SidecarShared,
) {
    let mut track = None;

    while !shared.stop.load(Ordering::Acquire) {
        let frame = match source.read(READ_TIMEOUT) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                record_failure(shared, e);
                break;
            }
        };
        if shared.paused.load(Ordering::Acquire) {
            continue;
        }

        let written = encoder
            .encode(&frame)
            .and_then(|packets| write_packets(muxer, &mut track, &packets, shared));
        if let Err(e) = written {
            record_failure(shared, e);
            break;
        }
    }

    if let Err(e) = source.stop() {
        log::warn!("Audio source stop failed: {}", e);
    }
    match encoder.flush() {
        Ok(packets) => {
            if let Err(e) = write_packets(muxer, &mut track, &packets, shared) {
                log::warn!("Dropping flushed audio: {}", e);
            }
        }
        Err(e) => log::warn!("Audio encoder flush failed: {}", e),
    }
}

fn write_packets(
    muxer: &ContainerMuxer,
    track: &mut Option<usize>,
    packets: &[EncodedAudio],
    shared: &SidecarShared,
) -> Result<(), EncoderError> {
    if packets.is_empty() {
        return Ok(());
    }
    if !muxer.is_started() {
        log::trace!("Container not started; dropping {} audio packets", packets.len());
        return Ok(());
    }
    let index = match *track {
        Some(index) => index,
        None => {
            let index = muxer.track_index(TrackKind::Audio).ok_or_else(|| {
                EncoderError::Muxing("audio track missing from started container".to_string())
            })?;
            *track = Some(index);
            index
        }
    };

    for packet in packets {
        let sample = EncodedSample {
            data: packet.data.clone(),
            pts: packet.timestamp,
            is_keyframe: true,
        };
        muxer.write_sample(index, &sample)?;
        *shared.packets_written.lock().expect("lock poisoned") += 1;
    }
    Ok(())
}

fn record_failure(shared: &SidecarShared, error: EncoderError) {
    log::error!("Audio capture failed: {}", error);
    let mut slot = shared.failure.lock().expect("lock poisoned");
    if slot.is_none() {
        *slot = Some(error);
    }
}
