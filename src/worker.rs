//! Encoder worker: one thread per recording segment, fed by a command queue
//!
//! Every operation touching the encoder session or the encoder's render
//! context runs on the worker thread, in the order it was enqueued. Control
//! calls never block on the encoder; `start_recording` only waits until the
//! worker's loop is ready to take commands.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::callback::StateNotifier;
use crate::config::EncoderConfig;
use crate::core::{CoreFactory, EncoderCore};
use crate::errors::EncoderError;
use crate::gpu::{ContextProvider, FrameSource, RenderContext, SharedContext, TextureId, Transform};

/// Encoder operations the renderer drives
pub trait Recorder: Send + Sync {
    fn start_recording(&self, config: EncoderConfig);
    fn stop_recording(&self);
    fn pause_recording(&self);
    fn resume_recording(&self);
    fn update_shared_context(&self, context: SharedContext);
    fn update_texture_id(&self, texture: TextureId);
    fn frame_available(&self, source: &dyn FrameSource);
    fn is_recording(&self) -> bool;
    fn pause_resume_supported(&self) -> bool;
}

#[derive(Debug)]
enum Command {
    Start(EncoderConfig),
    Stop,
    Pause,
    Resume,
    Frame { transform: Transform, timestamp: i64 },
    SetTexture(TextureId),
    UpdateSharedContext(SharedContext),
    Quit,
}

#[derive(Default)]
struct Handshake {
    ready: bool,
    running: bool,
    /// Bumped for every spawned worker
    generation: u64,
    sender: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl Handshake {
    /// Stop taking commands. The worker drains what is already queued and exits.
    fn retire(&mut self) {
        self.ready = false;
        self.running = false;
        self.sender = None;
    }
}

struct Shared {
    factory: Arc<dyn CoreFactory>,
    context_provider: Arc<dyn ContextProvider>,
    notifier: StateNotifier,
    handshake: Mutex<Handshake>,
    ready_cv: Condvar,
    /// Set when a Pause had to stop the segment
    degraded_stop: AtomicBool,
    /// Whether the last created core can suspend; seeded from the factory
    pause_supported: AtomicBool,
    frames_submitted: AtomicU64,
    frames_rendered: AtomicU64,
}

impl Shared {
    fn send(&self, command: Command) -> bool {
        let handshake = self.handshake.lock().expect("lock poisoned");
        match handshake.sender.as_ref() {
            Some(sender) if handshake.ready => sender.send(command).is_ok(),
            _ => false,
        }
    }

    /// Retire worker `generation` if it is still the current one
    fn retire(&self, generation: u64) {
        let mut handshake = self.handshake.lock().expect("lock poisoned");
        if handshake.generation == generation {
            handshake.retire();
        }
    }
}

/// Handle to the encoder worker. Dropping it stops any active segment and
/// waits for the worker thread to finish.
pub struct VideoEncoder {
    shared: Arc<Shared>,
}

impl VideoEncoder {
    pub fn new(
        factory: Arc<dyn CoreFactory>,
        context_provider: Arc<dyn ContextProvider>,
        notifier: StateNotifier,
    ) -> Self {
        let pause_supported = factory.pause_resume_supported();
        Self {
            shared: Arc::new(Shared {
                factory,
                context_provider,
                notifier,
                handshake: Mutex::new(Handshake::default()),
                ready_cv: Condvar::new(),
                degraded_stop: AtomicBool::new(false),
                pause_supported: AtomicBool::new(pause_supported),
                frames_submitted: AtomicU64::new(0),
                frames_rendered: AtomicU64::new(0),
            }),
        }
    }

    /// Frames `frame_available` queued to a live worker
    pub fn frames_submitted(&self) -> u64 {
        self.shared.frames_submitted.load(Ordering::Relaxed)
    }

    /// Frames that reached an encoder input surface
    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames_rendered.load(Ordering::Relaxed)
    }

    /// Wait for the last worker thread to exit
    pub fn join(&self) {
        let handle = self.shared.handshake.lock().expect("lock poisoned").thread.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Encoder worker panicked");
            }
        }
    }
}

impl Recorder for VideoEncoder {
    /// Spawn the worker and queue Start. No-op while a worker is running. A
    /// worker that is still finishing a stopped or failed segment is joined
    /// first.
    fn start_recording(&self, config: EncoderConfig) {
        log::debug!("Encoder: startRecording()");
        let mut handshake = self.shared.handshake.lock().expect("lock poisoned");
        if handshake.running {
            log::warn!("Encoder thread already running");
            return;
        }

        if let Some(previous) = handshake.thread.take() {
            drop(handshake);
            if previous.join().is_err() {
                log::error!("Previous encoder worker panicked");
            }
            handshake = self.shared.handshake.lock().expect("lock poisoned");
            if handshake.running {
                log::warn!("Encoder thread already running");
                return;
            }
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let weak = Arc::downgrade(&self.shared);
        let generation = handshake.generation + 1;
        let spawned = std::thread::Builder::new()
            .name("crabencoder-worker".to_string())
            .spawn(move || run(weak, rx, generation));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Failed to spawn encoder thread: {}", e);
                self.shared.notifier.on_recording_failed(EncoderError::InvalidState(format!(
                    "encoder thread spawn failed: {}",
                    e
                )));
                return;
            }
        };

        handshake.generation = generation;
        handshake.running = true;
        handshake.sender = Some(tx);
        handshake.thread = Some(handle);
        // A stop issued while waiting retires the worker before it is ready
        while !handshake.ready && handshake.generation == generation && handshake.sender.is_some() {
            handshake = self.shared.ready_cv.wait(handshake).expect("lock poisoned");
        }
        self.shared.degraded_stop.store(false, Ordering::Release);
        if let Some(sender) = handshake.sender.as_ref() {
            let _ = sender.send(Command::Start(config));
        }
    }

    /// Queue Stop and worker exit. Returns before the file is finalized;
    /// commands sent afterwards are refused.
    fn stop_recording(&self) {
        let mut handshake = self.shared.handshake.lock().expect("lock poisoned");
        let Some(sender) = handshake.sender.as_ref() else {
            log::debug!("Encoder: stopRecording() with no active worker");
            return;
        };
        log::debug!("Encoder: stopRecording()");
        let _ = sender.send(Command::Stop);
        let _ = sender.send(Command::Quit);
        handshake.retire();
    }

    fn pause_recording(&self) {
        if !self.pause_resume_supported() {
            log::info!("Pause not supported by this encoder; stopping instead");
            let running = self.shared.handshake.lock().expect("lock poisoned").running;
            if running {
                self.shared.degraded_stop.store(true, Ordering::Release);
            }
            self.stop_recording();
            return;
        }
        self.shared.send(Command::Pause);
    }

    fn resume_recording(&self) {
        if self.shared.send(Command::Resume) {
            return;
        }
        let error = if self.shared.degraded_stop.load(Ordering::Acquire) {
            EncoderError::ResumeAfterStop
        } else {
            EncoderError::ResumeWithoutStart
        };
        log::error!("Encoder: resumeRecording() failed: {}", error);
        self.shared.notifier.on_recording_failed(error);
    }

    fn update_shared_context(&self, context: SharedContext) {
        self.shared.send(Command::UpdateSharedContext(context));
    }

    fn update_texture_id(&self, texture: TextureId) {
        self.shared.send(Command::SetTexture(texture));
    }

    /// Capture transform and timestamp on the caller's thread and queue the
    /// frame. Never blocks on the worker.
    fn frame_available(&self, source: &dyn FrameSource) {
        let timestamp = source.timestamp();
        if timestamp == 0 {
            log::warn!("Dropping frame with zero timestamp");
            return;
        }
        let transform = source.transform_matrix();
        if self.shared.send(Command::Frame {
            transform,
            timestamp,
        }) {
            self.shared.frames_submitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn is_recording(&self) -> bool {
        self.shared.handshake.lock().expect("lock poisoned").running
    }

    fn pause_resume_supported(&self) -> bool {
        self.shared.pause_supported.load(Ordering::Acquire)
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        self.stop_recording();
        self.join();
    }
}

/// Worker-thread state of one recording segment
struct Session {
    generation: u64,
    core: Option<Box<dyn EncoderCore>>,
    context: Option<Box<dyn RenderContext>>,
    texture: Option<TextureId>,
}

impl Session {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            core: None,
            context: None,
            texture: None,
        }
    }

    /// The segment is over; refuse further commands so a new Start can spawn
    /// a fresh worker.
    fn retire(&self, shared: &Shared) {
        shared.retire(self.generation);
    }

    fn start(&mut self, shared: &Shared, config: EncoderConfig) {
        if self.core.is_some() {
            log::warn!("Start received with a segment already active");
            return;
        }
        log::info!(
            "Starting encoder {}x{} @ {} fps -> {}",
            config.width(),
            config.height(),
            config.frame_rate(),
            config.output_file().display()
        );

        let mut core = match shared.factory.create(&config, shared.notifier.clone()) {
            Ok(core) => core,
            Err(e) => {
                log::error!("Failed to create encoder: {}", e);
                self.retire(shared);
                shared.notifier.on_recording_failed(e);
                return;
            }
        };
        shared
            .pause_supported
            .store(core.pause_resume_supported(), Ordering::Release);
        if let Err(e) = core.start() {
            log::error!("Failed to start encoder: {}", e);
            self.retire(shared);
            shared.notifier.on_recording_failed(e);
            core.release();
            return;
        }

        let context = shared
            .context_provider
            .create_context(config.shared_context())
            .and_then(|mut context| {
                context.make_current(&core.input_surface())?;
                Ok(context)
            });
        match context {
            Ok(context) => {
                self.context = Some(context);
                self.core = Some(core);
            }
            Err(e) => {
                log::error!("Failed to set up encoder render context: {}", e);
                self.retire(shared);
                shared.notifier.on_recording_failed(e);
                if let Err(e) = core.stop() {
                    log::warn!("Stop after failed start: {}", e);
                }
                core.release();
            }
        }
    }

    fn frame(&mut self, shared: &Shared, transform: Transform, timestamp: i64) {
        let Some(core) = self.core.as_mut() else {
            log::trace!("Frame with no active segment");
            return;
        };
        if let Err(e) = core.drain_encoder(false) {
            self.fail(shared, e);
            return;
        }
        if core.is_stopped() {
            log::info!("Encoder stopped on its own; releasing segment");
            self.retire(shared);
            self.release();
            return;
        }
        let Some(texture) = self.texture else {
            log::debug!("Frame before any texture was set");
            return;
        };
        let Some(context) = self.context.as_mut() else {
            return;
        };

        let drawn = context.draw_frame(texture, &transform).and_then(|_| {
            context.set_presentation_time(timestamp);
            context.swap_buffers()
        });
        match drawn {
            Ok(()) => {
                shared.frames_rendered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.fail(shared, e),
        }
    }

    fn pause(&mut self, shared: &Shared) {
        let Some(core) = self.core.as_mut() else {
            return;
        };
        if !core.pause_resume_supported() {
            log::info!("Encoder cannot suspend; stopping segment instead");
            shared.degraded_stop.store(true, Ordering::Release);
            self.retire(shared);
            self.stop(shared);
            return;
        }
        if let Err(e) = core.pause() {
            self.fail(shared, e);
        }
    }

    fn resume(&mut self, shared: &Shared) {
        let result = match self.core.as_mut() {
            Some(core) => core.resume(),
            None => {
                shared.notifier.on_recording_failed(EncoderError::ResumeWithoutStart);
                return;
            }
        };
        if let Err(e) = result {
            self.fail(shared, e);
        }
    }

    fn stop(&mut self, shared: &Shared) {
        let Some(core) = self.core.as_mut() else {
            return;
        };
        log::debug!("Stopping encoder");
        if let Err(e) = core.stop() {
            log::error!("Encoder stop failed: {}", e);
            shared.notifier.on_recording_failed(e);
        }
        self.release();
    }

    /// Recreate the render context against a new shared context, keeping the session
    fn update_shared_context(&mut self, shared: &Shared, context: SharedContext) {
        let Some(core) = self.core.as_ref() else {
            log::debug!("Shared context update with no active segment");
            return;
        };
        log::debug!("Updating shared context to {}", context.id());
        if let Some(mut old) = self.context.take() {
            old.release();
        }
        let created = shared
            .context_provider
            .create_context(Some(&context))
            .and_then(|mut new| {
                new.make_current(&core.input_surface())?;
                Ok(new)
            });
        match created {
            Ok(new) => self.context = Some(new),
            Err(e) => self.fail(shared, e),
        }
    }

    fn fail(&mut self, shared: &Shared, error: EncoderError) {
        log::debug!("Tearing down segment after failure");
        self.retire(shared);
        shared.notifier.on_recording_failed(error);
        if let Some(core) = self.core.as_mut() {
            if let Err(e) = core.stop() {
                log::warn!("Stop after failure: {}", e);
            }
        }
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.release();
        }
        if let Some(mut core) = self.core.take() {
            core.release();
        }
    }
}

fn run(shared: Weak<Shared>, commands: Receiver<Command>, generation: u64) {
    if let Some(strong) = shared.upgrade() {
        let mut handshake = strong.handshake.lock().expect("lock poisoned");
        if handshake.generation == generation && handshake.sender.is_some() {
            handshake.ready = true;
        }
        drop(handshake);
        strong.ready_cv.notify_all();
    }
    log::debug!("Encoder thread ready");

    let mut session = Session::new(generation);
    for command in commands.iter() {
        let Some(shared) = shared.upgrade() else {
            log::debug!("Encoder handle gone; ignoring {:?}", command);
            continue;
        };
        match command {
            Command::Start(config) => session.start(&shared, config),
            Command::Stop => session.stop(&shared),
            Command::Pause => session.pause(&shared),
            Command::Resume => session.resume(&shared),
            Command::Frame {
                transform,
                timestamp,
            } => session.frame(&shared, transform, timestamp),
            Command::SetTexture(texture) => session.texture = Some(texture),
            Command::UpdateSharedContext(context) => session.update_shared_context(&shared, context),
            Command::Quit => break,
        }
    }

    session.release();
    if let Some(shared) = shared.upgrade() {
        shared.retire(generation);
    }
    log::debug!("Encoder thread exiting");
}
