use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crabencoder::core::{CoreFactory, MuxerCoreFactory, SurfaceCoreFactory};
use crabencoder::testing::synthetic_video_frame;
use crabencoder::{
    AudioSourceKind, CameraRenderer, EncoderConfig, EncoderError, EncoderStateCallback,
    SharedContext, SoftwareContextProvider, SoftwareSurfaceTexture, StateDispatcher, VideoEncoder,
};

struct PrintCallback;

impl EncoderStateCallback for PrintCallback {
    fn on_recording_started(&self) {
        println!("recording started");
    }
    fn on_recording_resumed(&self) {
        println!("recording resumed");
    }
    fn on_recording_paused(&self) {
        println!("recording paused");
    }
    fn on_recording_stopped(&self) {
        println!("recording stopped");
    }
    fn on_recording_failed(&self, error: &EncoderError) {
        eprintln!("recording failed: {}", error);
    }
}

struct Args {
    output: PathBuf,
    frames: u64,
    width: u32,
    height: u32,
    fps: u32,
    core: String,
    audio: AudioSourceKind,
    pause_at: Option<u64>,
}

fn usage() -> ! {
    eprintln!(
        "Usage: crabencoder-record <output.mp4> [--frames <n>] [--size <w>x<h>] [--fps <n>] \
         [--core muxer|surface] [--audio <source>] [--pause-at <frame>]"
    );
    std::process::exit(1);
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let mut parsed = Args {
        output: PathBuf::from(&args[1]),
        frames: 90,
        width: 640,
        height: 480,
        fps: 30,
        core: "muxer".to_string(),
        audio: AudioSourceKind::Disabled,
        pause_at: None,
    };

    let mut i = 2;
    while i < args.len() {
        let value = args.get(i + 1).cloned();
        match (args[i].as_str(), value) {
            ("--frames", Some(v)) => parsed.frames = v.parse().context("--frames")?,
            ("--fps", Some(v)) => parsed.fps = v.parse().context("--fps")?,
            ("--core", Some(v)) => parsed.core = v,
            ("--audio", Some(v)) => parsed.audio = v.parse()?,
            ("--pause-at", Some(v)) => parsed.pause_at = Some(v.parse().context("--pause-at")?),
            ("--size", Some(v)) => {
                let (w, h) = v.split_once('x').context("--size expects <w>x<h>")?;
                parsed.width = w.parse().context("--size width")?;
                parsed.height = h.parse().context("--size height")?;
            }
            (flag, _) => bail!("unknown or incomplete argument: {}", flag),
        }
        i += 2;
    }
    Ok(parsed)
}

fn main() -> Result<()> {
    crabencoder::init_logging();
    let args = parse_args()?;

    let factory: Arc<dyn CoreFactory> = match args.core.as_str() {
        "muxer" => Arc::new(MuxerCoreFactory::mp4()),
        "surface" => Arc::new(SurfaceCoreFactory::mp4()),
        other => bail!("unknown core '{}': expected muxer or surface", other),
    };

    let callback: Arc<dyn EncoderStateCallback> = Arc::new(PrintCallback);
    let (dispatcher, notifier) = StateDispatcher::new(&callback);
    let encoder = Arc::new(VideoEncoder::new(
        factory,
        Arc::new(SoftwareContextProvider),
        notifier.clone(),
    ));
    let renderer = CameraRenderer::new(encoder.clone(), notifier);

    let context = SharedContext::new();
    let texture = Arc::new(SoftwareSurfaceTexture::new(&context));
    renderer.set_camera_preview_size(args.width, args.height);
    renderer.on_surface_created(context, texture.clone());

    let config = EncoderConfig::builder()
        .width(args.width)
        .height(args.height)
        .frame_rate(args.fps)
        .audio_source(args.audio)
        .output_file(&args.output)
        .build()?;
    renderer.start_recording(config);

    let interval = Duration::from_secs(1) / args.fps.max(1);
    for frame in 0..args.frames {
        if args.pause_at == Some(frame) {
            renderer.pause_recording();
        } else if args.pause_at.is_some_and(|p| frame == p + args.fps as u64) {
            renderer.resume_recording();
        }

        let timestamp = (frame as i64 + 1) * interval.as_nanos() as i64;
        texture.push_frame(
            args.width,
            args.height,
            synthetic_video_frame(frame, args.width, args.height),
            timestamp,
        );
        renderer.on_draw_frame();
        dispatcher.dispatch_pending();
        std::thread::sleep(interval);
    }

    renderer.stop_recording();
    renderer.on_draw_frame();
    encoder.join();
    dispatcher.dispatch_pending();

    let size = std::fs::metadata(&args.output).map(|m| m.len()).unwrap_or(0);
    println!(
        "{} frames submitted, {} rendered, {} bytes written to {}",
        encoder.frames_submitted(),
        encoder.frames_rendered(),
        size,
        args.output.display()
    );
    Ok(())
}
