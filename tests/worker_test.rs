//! Worker and renderer behaviour over scripted backends
//!
//! Run with: cargo test --test worker_test

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{scripted_factory, AudioMode, CodecScript, Harness, ScriptedCodec};
use crabencoder::codec::VideoCodec;
use crabencoder::core::{CoreFactory, MuxerCoreFactory};
use crabencoder::gpu::{FrameSource, TextureId, Transform, IDENTITY_TRANSFORM};
use crabencoder::muxer::{ContainerWriter, TrackKind};
use crabencoder::testing::MemoryContainerWriter;
use crabencoder::{EncoderError, Recorder, RecordingEvent, RecordingStatus};
use tempfile::tempdir;

fn harness(writer: &MemoryContainerWriter, script: CodecScript) -> Harness {
    let factory: Arc<dyn CoreFactory> = Arc::new(scripted_factory(writer, script, AudioMode::None));
    Harness::new(factory, 32, 32)
}

#[test]
fn test_start_frames_stop_notifies_in_order() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());

    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(10);
    h.stop();

    assert_eq!(h.log.events(), vec![RecordingEvent::Started, RecordingEvent::Stopped]);
    assert_eq!(h.encoder.frames_submitted(), 10);
    assert_eq!(h.encoder.frames_rendered(), 10);

    let container = writer.snapshot();
    assert_eq!(container.start_calls, 1);
    assert!(container.finished);
    let video = container.samples_of(TrackKind::Video);
    assert_eq!(video.len(), 10);
    assert!(video.windows(2).all(|w| w[0].pts <= w[1].pts));
}

#[test]
fn test_second_start_is_noop() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());
    let config = h.config(&dir.path().join("out.mp4"));

    h.renderer.start_recording(config.clone());
    h.draw_frames(3);
    h.encoder.start_recording(config);
    h.renderer.start_recording(h.config(&dir.path().join("other.mp4")));
    h.draw_frames(3);
    h.stop();

    assert_eq!(h.log.count(&RecordingEvent::Started), 1);
    assert!(h.log.failures().is_empty());
    assert_eq!(writer.snapshot().start_calls, 1);
}

#[test]
fn test_stop_before_start_is_silent() {
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());

    h.renderer.stop_recording();
    h.draw();
    h.encoder.stop_recording();
    h.settle();

    assert!(h.log.events().is_empty());
    assert_eq!(h.renderer.status(), RecordingStatus::Off);
    assert_eq!(writer.snapshot().start_calls, 0);
}

#[test]
fn test_zero_timestamp_frames_are_dropped() {
    struct ZeroStamp;

    impl FrameSource for ZeroStamp {
        fn texture_id(&self) -> TextureId {
            TextureId(1)
        }
        fn transform_matrix(&self) -> Transform {
            IDENTITY_TRANSFORM
        }
        fn timestamp(&self) -> i64 {
            0
        }
    }

    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());
    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw();
    let before = h.encoder.frames_submitted();

    h.encoder.frame_available(&ZeroStamp);
    assert_eq!(h.encoder.frames_submitted(), before);
    h.stop();
}

#[test]
fn test_pause_without_support_stops() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());

    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(4);
    h.renderer.pause_recording();
    h.draw();
    h.encoder.join();
    h.settle();

    assert_eq!(h.renderer.status(), RecordingStatus::Off);
    assert!(!h.encoder.is_recording());
    assert_eq!(h.log.count(&RecordingEvent::Paused), 0);
    assert_eq!(h.log.events().last(), Some(&RecordingEvent::Stopped));

    h.renderer.resume_recording();
    h.draw();
    h.settle();
    assert_eq!(h.log.failures(), vec![EncoderError::ResumeAfterStop]);
}

#[test]
fn test_pause_on_codec_without_suspend_stops() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    // the factory claims pause support the codec does not have
    let factory: Arc<dyn CoreFactory> = Arc::new(
        scripted_factory(&writer, CodecScript::default(), AudioMode::None).with_pause_support(true),
    );
    let mut h = Harness::new(factory, 32, 32);

    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(3);
    h.renderer.pause_recording();
    h.draw_frames(3);
    assert!(h.wait_for(&RecordingEvent::Stopped, Duration::from_secs(2)));
    h.encoder.join();
    h.draw();

    assert_eq!(h.renderer.status(), RecordingStatus::Off);
    assert!(!h.encoder.is_recording());
    assert!(!h.encoder.pause_resume_supported());
    assert_eq!(h.log.events(), vec![RecordingEvent::Started, RecordingEvent::Stopped]);
    let container = writer.snapshot();
    assert!(container.finished);
    assert_eq!(container.samples_of(TrackKind::Video).len(), 3);

    h.renderer.resume_recording();
    h.draw();
    h.settle();
    assert_eq!(h.log.failures(), vec![EncoderError::ResumeAfterStop]);
}

#[test]
fn test_pause_resume_drops_paused_frames() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let script = CodecScript {
        suspend: true,
        ..Default::default()
    };
    let mut h = harness(&writer, script);

    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(5);
    h.renderer.pause_recording();
    h.draw_frames(5);
    assert_eq!(h.renderer.status(), RecordingStatus::Paused);
    h.renderer.resume_recording();
    h.draw_frames(5);
    h.stop();

    assert_eq!(
        h.log.events(),
        vec![
            RecordingEvent::Started,
            RecordingEvent::Paused,
            RecordingEvent::Resumed,
            RecordingEvent::Stopped,
        ]
    );
    // the frame that resumes is drawn in the same tick
    assert_eq!(writer.snapshot().samples_of(TrackKind::Video).len(), 10);
}

#[test]
fn test_frames_after_stop_never_reach_encoder() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());

    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(6);
    h.stop();
    let rendered = h.encoder.frames_rendered();
    let submitted = h.encoder.frames_submitted();

    h.draw_frames(6);
    assert_eq!(h.encoder.frames_rendered(), rendered);
    assert_eq!(h.encoder.frames_submitted(), submitted);
    assert_eq!(writer.snapshot().samples_of(TrackKind::Video).len(), 6);
}

#[test]
fn test_frames_queued_after_stop_are_not_counted() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());

    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(3);
    h.encoder.stop_recording();
    for _ in 0..4 {
        h.encoder.frame_available(h.texture.as_ref());
    }
    h.encoder.join();

    assert_eq!(h.encoder.frames_submitted(), 3);
    assert_eq!(h.encoder.frames_rendered(), 3);
}

#[test]
fn test_create_failure_ends_segment() {
    let dir = tempdir().unwrap();
    let factory: Arc<dyn CoreFactory> = Arc::new(MuxerCoreFactory::new(
        |_| Err(EncoderError::Encoding("codec unavailable".to_string())),
        |_| Ok(Box::new(MemoryContainerWriter::new()) as Box<dyn ContainerWriter>),
    ));
    let mut h = Harness::new(factory, 32, 32);

    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(3);
    assert!(h.wait_for(
        &RecordingEvent::Failed(EncoderError::Encoding("codec unavailable".to_string())),
        Duration::from_secs(2)
    ));
    assert!(!h.encoder.is_recording());
    h.draw();
    assert_eq!(h.renderer.status(), RecordingStatus::Off);
    assert_eq!(h.encoder.frames_rendered(), 0);

    h.stop();
    assert_eq!(h.log.failures().len(), 1);
}

#[test]
fn test_failed_start_can_be_retried() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let sink = writer.clone();
    let factory: Arc<dyn CoreFactory> = Arc::new(MuxerCoreFactory::new(
        move |config| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(EncoderError::Encoding("transient".to_string()));
            }
            Ok(Box::new(ScriptedCodec::new(
                config.width(),
                config.height(),
                CodecScript::default(),
            )) as Box<dyn VideoCodec>)
        },
        move |_| Ok(Box::new(sink.clone()) as Box<dyn ContainerWriter>),
    ));
    let mut h = Harness::new(factory, 32, 32);
    let failure = EncoderError::Encoding("transient".to_string());

    h.renderer.start_recording(h.config(&dir.path().join("first.mp4")));
    h.draw();
    assert!(h.wait_for(&RecordingEvent::Failed(failure.clone()), Duration::from_secs(2)));

    h.renderer.start_recording(h.config(&dir.path().join("second.mp4")));
    h.draw_frames(5);
    assert!(h.wait_for(&RecordingEvent::Started, Duration::from_secs(2)));
    assert_eq!(h.renderer.status(), RecordingStatus::On);
    h.stop();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(h.log.failures(), vec![failure]);
    assert_eq!(h.log.events().last(), Some(&RecordingEvent::Stopped));
    assert_eq!(writer.snapshot().samples_of(TrackKind::Video).len(), 5);
}

#[test]
fn test_invalidated_dispatcher_discards_events() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());

    h.dispatcher.invalidate();
    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(3);
    h.stop();

    assert!(h.log.events().is_empty());
    assert!(writer.snapshot().finished);
}

#[test]
fn test_surface_recreation_keeps_segment() {
    let dir = tempdir().unwrap();
    let writer = MemoryContainerWriter::new();
    let mut h = harness(&writer, CodecScript::default());

    h.renderer.start_recording(h.config(&dir.path().join("out.mp4")));
    h.draw_frames(3);

    let context = crabencoder::SharedContext::new();
    let texture = Arc::new(crabencoder::SoftwareSurfaceTexture::new(&context));
    h.renderer.on_surface_created(context, texture.clone());
    h.texture = texture;
    h.draw_frames(3);
    h.stop();

    assert!(h.log.failures().is_empty());
    assert_eq!(writer.snapshot().samples_of(TrackKind::Video).len(), 6);
}
