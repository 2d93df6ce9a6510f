//! Render-thread side of recording
//!
//! Control threads only write a single-slot request mailbox. The render thread
//! reconciles the pending request with the actual recording status once per
//! frame, before the frame is handed to the encoder, so encoder lifecycle
//! changes and frame submission share one thread and one frame boundary.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::callback::StateNotifier;
use crate::config::EncoderConfig;
use crate::errors::{ConfigError, EncoderError};
use crate::gpu::{FrameSource, SharedContext};
use crate::worker::Recorder;

/// Transition asked for by a control thread. A newer request replaces an
/// unconsumed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingRequest {
    #[default]
    None,
    Start,
    Resume,
    Pause,
    Stop,
}

/// Actual state of the encoder, as the render thread last left it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingStatus {
    Uninitialized,
    Off,
    On,
    Paused,
}

/// UI lifecycle transitions forwarded by the owner of the preview
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Resume,
    Pause,
    Destroy,
}

#[derive(Default)]
struct Mailbox {
    request: RecordingRequest,
    config: Option<EncoderConfig>,
}

struct RenderState {
    status: RecordingStatus,
    /// The encoder's render context shares a context that no longer exists
    context_stale: bool,
    /// Off because a Pause had to stop the segment
    stopped_by_pause: bool,
    context: Option<SharedContext>,
    source: Option<Arc<dyn FrameSource>>,
    preview_size: Option<(u32, u32)>,
    frames_forwarded: u64,
}

/// Preview renderer driving a `Recorder`
pub struct CameraRenderer {
    recorder: Arc<dyn Recorder>,
    notifier: StateNotifier,
    mailbox: Mutex<Mailbox>,
    state: Mutex<RenderState>,
}

impl CameraRenderer {
    pub fn new(recorder: Arc<dyn Recorder>, notifier: StateNotifier) -> Self {
        Self {
            recorder,
            notifier,
            mailbox: Mutex::new(Mailbox::default()),
            state: Mutex::new(RenderState {
                status: RecordingStatus::Uninitialized,
                context_stale: false,
                stopped_by_pause: false,
                context: None,
                source: None,
                preview_size: None,
                frames_forwarded: 0,
            }),
        }
    }

    pub fn status(&self) -> RecordingStatus {
        self.state.lock().expect("lock poisoned").status
    }

    pub fn pending_request(&self) -> RecordingRequest {
        self.mailbox.lock().expect("lock poisoned").request
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.state.lock().expect("lock poisoned").frames_forwarded
    }

    /// Request a new segment with `config`
    pub fn start_recording(&self, config: EncoderConfig) {
        let mut mailbox = self.mailbox.lock().expect("lock poisoned");
        mailbox.config = Some(config);
        mailbox.request = RecordingRequest::Start;
    }

    /// Request a segment sized to the camera preview
    pub fn start_recording_to(
        &self,
        output_file: impl Into<PathBuf>,
        video_bit_rate: u32,
        audio_bit_rate: Option<u32>,
        frame_rate: u32,
    ) -> Result<(), ConfigError> {
        let (width, height) = self
            .state
            .lock()
            .expect("lock poisoned")
            .preview_size
            .unwrap_or((0, 0));
        let config = EncoderConfig::builder()
            .width(width)
            .height(height)
            .video_bit_rate(video_bit_rate)
            .audio_bit_rate(audio_bit_rate)
            .frame_rate(frame_rate)
            .output_file(output_file)
            .build()?;
        self.start_recording(config);
        Ok(())
    }

    pub fn resume_recording(&self) {
        self.request(RecordingRequest::Resume);
    }

    pub fn pause_recording(&self) {
        self.request(RecordingRequest::Pause);
    }

    pub fn stop_recording(&self) {
        let mut mailbox = self.mailbox.lock().expect("lock poisoned");
        mailbox.config = None;
        mailbox.request = RecordingRequest::Stop;
    }

    fn request(&self, request: RecordingRequest) {
        self.mailbox.lock().expect("lock poisoned").request = request;
    }

    /// Size of the incoming camera frames
    pub fn set_camera_preview_size(&self, width: u32, height: u32) {
        log::debug!("set_camera_preview_size {}x{}", width, height);
        self.state.lock().expect("lock poisoned").preview_size = Some((width, height));
    }

    /// The preview surface (re)appeared with a new context and frame source.
    /// A segment that outlived the old surface keeps recording into a fresh
    /// encoder context on the next frame.
    pub fn on_surface_created(&self, context: SharedContext, source: Arc<dyn FrameSource>) {
        log::debug!("on_surface_created (context {})", context.id());
        let mut state = self.state.lock().expect("lock poisoned");
        match state.status {
            RecordingStatus::Uninitialized => {
                if self.recorder.is_recording() {
                    state.status = RecordingStatus::On;
                    state.context_stale = true;
                } else {
                    state.status = RecordingStatus::Off;
                }
            }
            RecordingStatus::On => state.context_stale = true,
            RecordingStatus::Paused => {
                state.context_stale = true;
                let mut mailbox = self.mailbox.lock().expect("lock poisoned");
                if mailbox.request == RecordingRequest::None {
                    mailbox.request = RecordingRequest::Resume;
                }
            }
            RecordingStatus::Off => {}
        }
        state.context = Some(context);
        state.source = Some(source);
    }

    /// Drop the frame source; the preview surface is about to go away
    pub fn notify_pausing(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.source.take().is_some() {
            log::debug!("Renderer pausing, releasing frame source");
        }
        state.preview_size = None;
    }

    pub fn handle_lifecycle(&self, event: LifecycleEvent) {
        log::debug!("Lifecycle event {:?}", event);
        match event {
            LifecycleEvent::Resume => {
                if self.status() == RecordingStatus::Paused {
                    self.resume_recording();
                }
            }
            LifecycleEvent::Pause => {
                self.pause_recording();
                self.notify_pausing();
            }
            LifecycleEvent::Destroy => {
                *self.mailbox.lock().expect("lock poisoned") = Mailbox::default();
                let mut state = self.state.lock().expect("lock poisoned");
                if matches!(state.status, RecordingStatus::On | RecordingStatus::Paused) {
                    self.recorder.stop_recording();
                }
                state.status = RecordingStatus::Off;
                state.source = None;
                state.context = None;
            }
        }
    }

    /// One render tick: latch the camera frame, apply the pending request,
    /// then hand the frame to the encoder if recording.
    pub fn on_draw_frame(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(source) = state.source.as_ref() {
            if let Err(e) = source.update_tex_image() {
                log::warn!("Failed to latch camera frame: {}", e);
            }
        }

        let (request, config) = {
            let mut mailbox = self.mailbox.lock().expect("lock poisoned");
            let request = std::mem::take(&mut mailbox.request);
            let config = if request == RecordingRequest::Start {
                mailbox.config.take()
            } else {
                None
            };
            (request, config)
        };
        self.reconcile(&mut state, request, config);

        if state.status != RecordingStatus::On {
            return;
        }
        let Some(source) = state.source.clone() else {
            return;
        };
        self.recorder.update_texture_id(source.texture_id());
        self.recorder.frame_available(source.as_ref());
        state.frames_forwarded += 1;
    }

    fn reconcile(
        &self,
        state: &mut RenderState,
        request: RecordingRequest,
        config: Option<EncoderConfig>,
    ) {
        // The encoder ended the segment itself: a failure, or a pause it had
        // to turn into a stop
        if matches!(state.status, RecordingStatus::On | RecordingStatus::Paused)
            && !self.recorder.is_recording()
        {
            log::debug!("Encoder segment ended while {:?}; recording is off", state.status);
            state.stopped_by_pause = state.status == RecordingStatus::Paused;
            state.status = RecordingStatus::Off;
            state.context_stale = false;
        }

        if state.context_stale && matches!(state.status, RecordingStatus::On | RecordingStatus::Paused) {
            if let Some(context) = state.context.clone() {
                log::debug!("Re-deriving encoder context from {}", context.id());
                self.recorder.update_shared_context(context);
            }
            state.context_stale = false;
        }

        if request == RecordingRequest::None {
            return;
        }
        if state.status == RecordingStatus::Uninitialized {
            log::warn!("Ignoring {:?} before the surface exists", request);
            return;
        }

        match (state.status, request) {
            (RecordingStatus::Off, RecordingRequest::Start) => {
                let Some(config) = config else {
                    log::warn!("Start requested without a config");
                    return;
                };
                match self.with_shared_context(config, state.context.as_ref()) {
                    Ok(config) => {
                        log::debug!("START recording");
                        self.recorder.start_recording(config);
                        state.status = RecordingStatus::On;
                        state.stopped_by_pause = false;
                    }
                    Err(e) => self.notifier.on_recording_failed(e),
                }
            }
            (RecordingStatus::Paused, RecordingRequest::Start | RecordingRequest::Resume) => {
                log::debug!("RESUME recording");
                self.recorder.resume_recording();
                state.status = RecordingStatus::On;
            }
            (RecordingStatus::Off, RecordingRequest::Resume) => {
                let error = if state.stopped_by_pause {
                    EncoderError::ResumeAfterStop
                } else {
                    EncoderError::ResumeWithoutStart
                };
                self.notifier.on_recording_failed(error);
            }
            (RecordingStatus::On, RecordingRequest::Pause) => {
                log::debug!("PAUSE recording");
                self.recorder.pause_recording();
                if self.recorder.pause_resume_supported() {
                    state.status = RecordingStatus::Paused;
                } else {
                    state.status = RecordingStatus::Off;
                    state.stopped_by_pause = true;
                }
            }
            (RecordingStatus::On | RecordingStatus::Paused, RecordingRequest::Stop) => {
                log::debug!("STOP recording");
                self.recorder.stop_recording();
                state.status = RecordingStatus::Off;
                state.stopped_by_pause = false;
            }
            (status, request) => {
                log::trace!("{:?} has no effect while {:?}", request, status);
            }
        }
    }

    /// Bind `config` to the preview's context unless the caller picked one
    fn with_shared_context(
        &self,
        config: EncoderConfig,
        context: Option<&SharedContext>,
    ) -> Result<EncoderConfig, EncoderError> {
        match (config.shared_context(), context) {
            (None, Some(context)) => Ok(config.to_builder().shared_context(context.clone()).build()?),
            _ => Ok(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{EncoderStateCallback, RecordingEvent, StateDispatcher};
    use crate::gpu::{SoftwareSurfaceTexture, TextureId};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeRecorder {
        calls: Mutex<Vec<String>>,
        recording: AtomicBool,
        pause_supported: bool,
    }

    impl FakeRecorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }
        /// The encoder gives up on the segment without being told to
        fn end_segment(&self) {
            self.recording.store(false, Ordering::SeqCst);
        }
    }

    impl Recorder for FakeRecorder {
        fn start_recording(&self, _config: EncoderConfig) {
            self.record("start");
            self.recording.store(true, Ordering::SeqCst);
        }
        fn stop_recording(&self) {
            self.record("stop");
            self.recording.store(false, Ordering::SeqCst);
        }
        fn pause_recording(&self) {
            self.record("pause");
            if !self.pause_supported {
                self.recording.store(false, Ordering::SeqCst);
            }
        }
        fn resume_recording(&self) {
            self.record("resume");
        }
        fn update_shared_context(&self, _context: SharedContext) {
            self.record("context");
        }
        fn update_texture_id(&self, _texture: TextureId) {}
        fn frame_available(&self, _source: &dyn FrameSource) {
            self.record("frame");
        }
        fn is_recording(&self) -> bool {
            self.recording.load(Ordering::SeqCst)
        }
        fn pause_resume_supported(&self) -> bool {
            self.pause_supported
        }
    }

    struct Quiet;
    impl EncoderStateCallback for Quiet {}

    fn renderer(pause_supported: bool) -> (CameraRenderer, Arc<FakeRecorder>, StateDispatcher, Arc<dyn EncoderStateCallback>) {
        let recorder = Arc::new(FakeRecorder {
            pause_supported,
            ..Default::default()
        });
        let callback: Arc<dyn EncoderStateCallback> = Arc::new(Quiet);
        let (dispatcher, notifier) = StateDispatcher::new(&callback);
        let renderer = CameraRenderer::new(recorder.clone(), notifier);
        let context = SharedContext::new();
        let texture = Arc::new(SoftwareSurfaceTexture::new(&context));
        renderer.on_surface_created(context, texture);
        (renderer, recorder, dispatcher, callback)
    }

    fn config() -> EncoderConfig {
        EncoderConfig::builder()
            .width(4)
            .height(4)
            .output_file("out.mp4")
            .build()
            .unwrap()
    }

    #[test]
    fn test_start_applies_before_frame() {
        let (renderer, recorder, _d, _c) = renderer(true);
        renderer.start_recording(config());
        renderer.on_draw_frame();
        assert_eq!(recorder.calls(), vec!["start", "frame"]);
        assert_eq!(renderer.status(), RecordingStatus::On);
    }

    #[test]
    fn test_last_request_wins() {
        let (renderer, recorder, _d, _c) = renderer(true);
        renderer.start_recording(config());
        renderer.stop_recording();
        renderer.on_draw_frame();
        assert!(recorder.calls().is_empty());
        assert_eq!(renderer.status(), RecordingStatus::Off);
    }

    #[test]
    fn test_pause_without_support_turns_off() {
        let (renderer, recorder, dispatcher, _c) = renderer(false);
        renderer.start_recording(config());
        renderer.on_draw_frame();
        renderer.pause_recording();
        renderer.on_draw_frame();
        assert_eq!(renderer.status(), RecordingStatus::Off);
        renderer.resume_recording();
        renderer.on_draw_frame();
        assert_eq!(recorder.calls(), vec!["start", "frame", "pause"]);
        assert_eq!(
            dispatcher.dispatch_timeout(Duration::from_millis(100)),
            Some(RecordingEvent::Failed(EncoderError::ResumeAfterStop))
        );
    }

    #[test]
    fn test_ended_segment_can_be_restarted() {
        let (renderer, recorder, _d, _c) = renderer(true);
        renderer.start_recording(config());
        renderer.on_draw_frame();
        recorder.end_segment();

        renderer.start_recording(config());
        renderer.on_draw_frame();
        assert_eq!(renderer.status(), RecordingStatus::On);
        assert_eq!(recorder.calls(), vec!["start", "frame", "start", "frame"]);
    }

    #[test]
    fn test_segment_ended_while_paused_reports_resume_after_stop() {
        let (renderer, recorder, dispatcher, _c) = renderer(true);
        renderer.start_recording(config());
        renderer.on_draw_frame();
        renderer.pause_recording();
        renderer.on_draw_frame();
        assert_eq!(renderer.status(), RecordingStatus::Paused);

        recorder.end_segment();
        renderer.on_draw_frame();
        assert_eq!(renderer.status(), RecordingStatus::Off);
        renderer.resume_recording();
        renderer.on_draw_frame();
        assert_eq!(
            dispatcher.dispatch_timeout(Duration::from_millis(100)),
            Some(RecordingEvent::Failed(EncoderError::ResumeAfterStop))
        );
    }

    #[test]
    fn test_resume_without_start_is_reported() {
        let (renderer, _recorder, dispatcher, _c) = renderer(true);
        renderer.resume_recording();
        renderer.on_draw_frame();
        assert_eq!(
            dispatcher.dispatch_timeout(Duration::from_millis(100)),
            Some(RecordingEvent::Failed(EncoderError::ResumeWithoutStart))
        );
    }

    #[test]
    fn test_surface_recreation_rederives_context() {
        let (renderer, recorder, _d, _c) = renderer(true);
        renderer.start_recording(config());
        renderer.on_draw_frame();
        let context = SharedContext::new();
        let texture = Arc::new(SoftwareSurfaceTexture::new(&context));
        renderer.on_surface_created(context, texture);
        renderer.on_draw_frame();
        assert_eq!(recorder.calls(), vec!["start", "frame", "context", "frame"]);
    }

    #[test]
    fn test_destroy_stops_active_segment() {
        let (renderer, recorder, _d, _c) = renderer(true);
        renderer.start_recording(config());
        renderer.on_draw_frame();
        renderer.handle_lifecycle(LifecycleEvent::Destroy);
        assert_eq!(renderer.status(), RecordingStatus::Off);
        assert_eq!(recorder.calls().last().map(String::as_str), Some("stop"));
    }

    #[test]
    fn test_start_recording_to_needs_preview_size() {
        let (renderer, _recorder, _d, _c) = renderer(true);
        assert_eq!(
            renderer.start_recording_to("out.mp4", 1_000_000, None, 30),
            Err(ConfigError::InvalidWidth)
        );
        renderer.set_camera_preview_size(640, 480);
        assert!(renderer.start_recording_to("out.mp4", 1_000_000, None, 30).is_ok());
        assert_eq!(renderer.pending_request(), RecordingRequest::Start);
    }
}
