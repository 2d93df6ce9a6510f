//! H.264 encoding and end-to-end MP4 recording
//!
//! Run with: cargo test --test recording_props --features recording

mod common;

use std::sync::Arc;

use common::Harness;
use crabencoder::codec::H264Encoder;
use crabencoder::core::{CoreFactory, MuxerCoreFactory, SurfaceCoreFactory};
use crabencoder::RecordingEvent;
use proptest::prelude::*;
use tempfile::tempdir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn encoder_accepts_even_dimensions(
        width in (8u32..480).prop_map(|w| w * 2),
        height in (8u32..270).prop_map(|h| h * 2),
        fps in 15.0f64..60.0,
        bitrate in 500_000u32..10_000_000,
    ) {
        let result = H264Encoder::new(width, height, fps, bitrate);
        prop_assert!(result.is_ok(), "{}x{} rejected: {:?}", width, height, result.err());
    }

    #[test]
    fn encoder_rejects_odd_dimensions(width in 8u32..480, height in 8u32..270) {
        let width = width * 2 + 1;
        prop_assert!(H264Encoder::new(width, height * 2, 30.0, 1_000_000).is_err());
        prop_assert!(H264Encoder::new(height * 2, width, 30.0, 1_000_000).is_err());
    }

    #[test]
    fn encoded_frames_are_annex_b(gray_level in any::<u8>()) {
        let (width, height) = (320u32, 240u32);
        let mut encoder = H264Encoder::new(width, height, 30.0, 1_000_000).unwrap();
        let rgb = vec![gray_level; (width * height * 3) as usize];

        let encoded = encoder.encode_rgb(&rgb).unwrap();
        prop_assert!(encoded.is_keyframe);
        if !encoded.data.is_empty() {
            prop_assert!(
                encoded.data.starts_with(&[0, 0, 0, 1]) || encoded.data.starts_with(&[0, 0, 1]),
                "missing Annex B start code: {:02x?}",
                &encoded.data[..encoded.data.len().min(8)]
            );
        }
    }
}

#[test]
fn test_wrong_frame_size_is_rejected() {
    let mut encoder = H264Encoder::new(64, 64, 30.0, 500_000).unwrap();
    assert!(encoder.encode_rgb(&[0u8; 10]).is_err());
}

#[test]
fn test_forced_keyframe() {
    let (width, height) = (64u32, 64u32);
    let mut encoder = H264Encoder::new(width, height, 30.0, 500_000).unwrap();
    let rgb = vec![128u8; (width * height * 3) as usize];
    for _ in 0..5 {
        encoder.encode_rgb(&rgb).unwrap();
    }
    encoder.force_keyframe();
    assert!(encoder.encode_rgb(&rgb).unwrap().is_keyframe);
    assert_eq!(encoder.frame_count(), 6);
}

fn record(factory: Arc<dyn CoreFactory>, width: u32, height: u32, frames: usize) -> u64 {
    let dir = tempdir().unwrap();
    let output = dir.path().join("test.mp4");
    let mut h = Harness::new(factory, width, height);

    h.renderer.start_recording(h.config(&output));
    h.draw_paced(frames);
    h.stop();

    assert!(h.log.failures().is_empty(), "failures: {:?}", h.log.failures());
    assert_eq!(h.log.count(&RecordingEvent::Started), 1);
    assert_eq!(h.log.events().last(), Some(&RecordingEvent::Stopped));
    assert_eq!(h.encoder.frames_rendered(), frames as u64);

    std::fs::metadata(&output).unwrap().len()
}

#[test]
fn test_portrait_recording_through_codec_and_muxer() {
    let size = record(Arc::new(MuxerCoreFactory::mp4()), 1080, 1920, 30);
    assert!(size > 0);
}

#[test]
fn test_recording_through_self_draining_recorder() {
    let size = record(Arc::new(SurfaceCoreFactory::mp4()), 640, 480, 30);
    assert!(size > 0);
}
