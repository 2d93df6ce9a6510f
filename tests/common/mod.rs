//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crabencoder::audio::{AudioInput, AudioSource, PTSClock};
use crabencoder::codec::{
    BufferInfo, CodecOutput, VideoCodec, BUFFER_FLAG_CODEC_CONFIG, BUFFER_FLAG_END_OF_STREAM,
    BUFFER_FLAG_KEY_FRAME,
};
use crabencoder::core::{CoreFactory, MuxerCoreFactory};
use crabencoder::gpu::{InputSurface, SurfaceFrame, SurfaceSink};
use crabencoder::muxer::{ContainerWriter, TrackFormat, VideoCodecKind};
use crabencoder::testing::{
    synthetic_video_frame, MemoryContainerWriter, PassthroughAudioEncoder, SyntheticAudioSource,
};
use crabencoder::{
    AudioSourceKind, CameraRenderer, EncoderConfig, EncoderError, EncoderStateCallback,
    RecordingEvent, SharedContext, SoftwareContextProvider, SoftwareSurfaceTexture,
    StateDispatcher, VideoEncoder,
};

pub const FRAME_INTERVAL_NANOS: i64 = 33_000_000;

/// Marker payload of scripted codec-config buffers
pub const CODEC_CONFIG_PAYLOAD: &[u8] = &[0, 0, 0, 1, 0x67, 0xC0];

/// Callback that records every event it receives
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<RecordingEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<RecordingEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &RecordingEvent) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn failures(&self) -> Vec<EncoderError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordingEvent::Failed(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: RecordingEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl EncoderStateCallback for EventLog {
    fn on_recording_started(&self) {
        self.push(RecordingEvent::Started);
    }
    fn on_recording_resumed(&self) {
        self.push(RecordingEvent::Resumed);
    }
    fn on_recording_paused(&self) {
        self.push(RecordingEvent::Paused);
    }
    fn on_recording_stopped(&self) {
        self.push(RecordingEvent::Stopped);
    }
    fn on_recording_failed(&self, error: &EncoderError) {
        self.push(RecordingEvent::Failed(error.clone()));
    }
}

/// How a `ScriptedCodec` misbehaves
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecScript {
    pub duplicate_format: bool,
    pub negative_index: bool,
    pub suspend: bool,
}

struct CodecState {
    script: CodecScript,
    width: u32,
    height: u32,
    outputs: Mutex<VecDeque<CodecOutput>>,
    frames: AtomicU64,
    suspended: AtomicBool,
}

impl CodecState {
    fn push(&self, output: CodecOutput) {
        self.outputs.lock().unwrap().push_back(output);
    }

    fn format(&self) -> TrackFormat {
        TrackFormat::Video {
            codec: VideoCodecKind::H264,
            width: self.width,
            height: self.height,
            frame_rate: 30.0,
            codec_config: CODEC_CONFIG_PAYLOAD.to_vec(),
        }
    }
}

fn buffer(index: i32, data: Vec<u8>, flags: u32, pts_us: i64) -> CodecOutput {
    CodecOutput::Buffer {
        index,
        info: BufferInfo {
            size: data.len(),
            presentation_time_us: pts_us,
            flags,
        },
        data,
    }
}

struct ScriptedInput(Arc<CodecState>);

impl SurfaceSink for ScriptedInput {
    fn queue_frame(&self, frame: SurfaceFrame) -> Result<(), EncoderError> {
        let state = &self.0;
        if state.suspended.load(Ordering::Acquire) {
            return Ok(());
        }
        let n = state.frames.fetch_add(1, Ordering::AcqRel);
        let pts_us = frame.timestamp_nanos / 1000;
        if n == 0 {
            state.push(CodecOutput::FormatChanged(state.format()));
            if state.script.negative_index {
                state.push(buffer(-1, Vec::new(), 0, pts_us));
            }
            state.push(buffer(0, CODEC_CONFIG_PAYLOAD.to_vec(), BUFFER_FLAG_CODEC_CONFIG, 0));
        } else if n == 1 && state.script.duplicate_format {
            state.push(CodecOutput::FormatChanged(state.format()));
        }
        let flags = if n == 0 { BUFFER_FLAG_KEY_FRAME } else { 0 };
        let payload = vec![0, 0, 0, 1, 0x65, (n % 256) as u8, frame.data.len() as u8];
        state.push(buffer(n as i32, payload, flags, pts_us));
        Ok(())
    }
}

/// `VideoCodec` that turns every queued frame into one small buffer
pub struct ScriptedCodec {
    state: Arc<CodecState>,
    surface: InputSurface,
    released: bool,
}

impl ScriptedCodec {
    pub fn new(width: u32, height: u32, script: CodecScript) -> Self {
        let state = Arc::new(CodecState {
            script,
            width,
            height,
            outputs: Mutex::new(VecDeque::new()),
            frames: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
        });
        let surface = InputSurface::new(width, height, Arc::new(ScriptedInput(state.clone())));
        Self {
            state,
            surface,
            released: false,
        }
    }
}

impl VideoCodec for ScriptedCodec {
    fn input_surface(&self) -> InputSurface {
        self.surface.clone()
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> Result<CodecOutput, EncoderError> {
        Ok(self
            .state
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CodecOutput::TryAgainLater))
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), EncoderError> {
        self.state
            .push(buffer(0, Vec::new(), BUFFER_FLAG_END_OF_STREAM, 0));
        Ok(())
    }

    fn supports_suspend(&self) -> bool {
        self.state.script.suspend
    }

    fn set_suspended(&mut self, suspended: bool) -> Result<(), EncoderError> {
        self.state.suspended.store(suspended, Ordering::Release);
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    None,
    Synthetic,
    FailAfter(u64),
}

fn synthetic_audio(mode: AudioMode, clock: &PTSClock) -> Option<AudioInput> {
    let fail_after = match mode {
        AudioMode::None => return None,
        AudioMode::Synthetic => None,
        AudioMode::FailAfter(frames) => Some(frames),
    };
    let clock = clock.clone();
    Some(AudioInput {
        source: Box::new(move || {
            let mut source = SyntheticAudioSource::new(48_000, 2, clock);
            if let Some(frames) = fail_after {
                source = source.with_failure_after(frames);
            }
            Ok(Box::new(source) as Box<dyn AudioSource>)
        }),
        encoder: Box::new(PassthroughAudioEncoder::new(48_000, 2)),
    })
}

/// Muxer core over a `ScriptedCodec` writing into `writer`
pub fn scripted_factory(
    writer: &MemoryContainerWriter,
    script: CodecScript,
    audio: AudioMode,
) -> MuxerCoreFactory {
    let writer = writer.clone();
    MuxerCoreFactory::new(
        move |config| {
            Ok(Box::new(ScriptedCodec::new(config.width(), config.height(), script))
                as Box<dyn VideoCodec>)
        },
        move |_| Ok(Box::new(writer.clone()) as Box<dyn ContainerWriter>),
    )
    .with_audio(move |_, clock| Ok(synthetic_audio(audio, clock)))
    .with_pause_support(script.suspend)
}

/// Renderer + worker + software frame source, wired like an app would
pub struct Harness {
    pub renderer: CameraRenderer,
    pub encoder: Arc<VideoEncoder>,
    pub dispatcher: StateDispatcher,
    pub log: Arc<EventLog>,
    pub texture: Arc<SoftwareSurfaceTexture>,
    pub width: u32,
    pub height: u32,
    next_frame: u64,
}

impl Harness {
    pub fn new(factory: Arc<dyn CoreFactory>, width: u32, height: u32) -> Self {
        let log = Arc::new(EventLog::default());
        let callback: Arc<dyn EncoderStateCallback> = log.clone();
        let (dispatcher, notifier) = StateDispatcher::new(&callback);
        let encoder = Arc::new(VideoEncoder::new(
            factory,
            Arc::new(SoftwareContextProvider),
            notifier.clone(),
        ));
        let renderer = CameraRenderer::new(encoder.clone(), notifier);

        let context = SharedContext::new();
        let texture = Arc::new(SoftwareSurfaceTexture::new(&context));
        renderer.set_camera_preview_size(width, height);
        renderer.on_surface_created(context, texture.clone());

        Self {
            renderer,
            encoder,
            dispatcher,
            log,
            texture,
            width,
            height,
            next_frame: 0,
        }
    }

    pub fn config(&self, output: &Path) -> EncoderConfig {
        EncoderConfig::builder()
            .width(self.width)
            .height(self.height)
            .audio_source(AudioSourceKind::Disabled)
            .output_file(output)
            .build()
            .unwrap()
    }

    /// Push the next camera frame and run one render tick
    pub fn draw(&mut self) {
        self.next_frame += 1;
        let timestamp = self.next_frame as i64 * FRAME_INTERVAL_NANOS;
        self.texture.push_frame(
            self.width,
            self.height,
            synthetic_video_frame(self.next_frame, self.width, self.height),
            timestamp,
        );
        self.renderer.on_draw_frame();
        self.dispatcher.dispatch_pending();
    }

    pub fn draw_frames(&mut self, count: usize) {
        for _ in 0..count {
            self.draw();
        }
    }

    /// Draw at roughly real-time pace
    pub fn draw_paced(&mut self, count: usize) {
        for _ in 0..count {
            self.draw();
            std::thread::sleep(Duration::from_nanos(FRAME_INTERVAL_NANOS as u64));
        }
    }

    /// Stop through the renderer and wait for the worker to exit
    pub fn stop(&mut self) {
        self.renderer.stop_recording();
        self.renderer.on_draw_frame();
        self.encoder.join();
        self.settle();
    }

    /// Deliver everything already queued plus anything arriving shortly after
    pub fn settle(&self) {
        let deadline = Instant::now() + Duration::from_millis(100);
        while Instant::now() < deadline {
            self.dispatcher.dispatch_timeout(Duration::from_millis(10));
        }
    }

    /// Pump events until `event` arrives or `timeout` passes
    pub fn wait_for(&self, event: &RecordingEvent, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.log.events().contains(event) {
                return true;
            }
            self.dispatcher.dispatch_timeout(Duration::from_millis(10));
        }
        self.log.events().contains(event)
    }
}
