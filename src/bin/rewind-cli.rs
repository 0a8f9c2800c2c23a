use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;

use rewind::CancelToken;
use rewind::clip::{TrimStatus, prepare_clip};
use rewind::config::Settings;
use rewind::logging;
use rewind::pipeline::VadPipeline;
use rewind::recorder::{CapacityPolicy, RecorderEvent, RingBufferRecorder};
use rewind::source::WavFileSource;
use rewind::vad::{EnergyEngine, InferenceEngine, Segment};
use rewind::wav::write_clip;

fn main() -> Result<()> {
    logging::init();
    let params = Params::parse();

    let mut settings = match &params.settings {
        Some(path) => Settings::from_json_file(path)?,
        None => Settings::default(),
    };
    settings.auto_trim |= params.auto_trim;
    settings.parallel |= params.parallel;

    let source = WavFileSource::open_path(&params.audio, params.buffer_secs)?
        .paced(params.realtime);
    settings.audio = source.config();

    let (tx, rx) = mpsc::channel();
    let mut recorder =
        RingBufferRecorder::new(CapacityPolicy::from_settings(&settings)).with_event_sink(tx);
    recorder.start(settings.audio, source)?;

    // The replay source ends on its own; wait for the capture loop to drain it.
    for event in rx.iter() {
        match event {
            RecorderEvent::Stopped => break,
            RecorderEvent::DeviceStopped(msg) => bail!("capture failed: {msg}"),
            _ => {}
        }
    }

    let snapshot = match params.last {
        Some(secs) => recorder.snapshot_last(Duration::from_secs(secs)),
        None => recorder.snapshot(),
    };
    recorder.stop()?;

    let mut pipeline = VadPipeline::new(build_engine(&params)?);
    let clip = prepare_clip(
        snapshot,
        &settings,
        Some(&mut pipeline),
        &CancelToken::new(),
        |p| tracing::debug!(progress = p, "trimming"),
    )?;

    write_clip(&params.out, &clip)
        .with_context(|| format!("failed to write '{}'", params.out.display()))?;

    let summary = Summary {
        output: params.out.display().to_string(),
        sample_rate_hz: clip.config.sample_rate_hz,
        bits_per_sample: clip.config.bits_per_sample(),
        duration_secs: clip.duration().as_secs_f64(),
        trim: clip.trim,
        segments: &clip.segments,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(about = "Replay a mono WAV through the capture buffer and save the last N seconds")]
struct Params {
    /// Mono WAV file replayed as the capture source.
    #[arg(short = 'a', long = "audio")]
    pub audio: PathBuf,

    /// Where to write the saved clip.
    #[arg(short = 'o', long = "out")]
    pub out: PathBuf,

    /// Save only the newest N seconds of the buffer.
    #[arg(short = 'l', long = "last")]
    pub last: Option<u64>,

    /// Ring buffer length in seconds.
    #[arg(short = 'b', long = "buffer-secs", default_value_t = 300)]
    pub buffer_secs: u32,

    /// Drop non-speech regions from the saved clip.
    #[arg(long = "auto-trim", default_value_t = false)]
    pub auto_trim: bool,

    /// Resample on a separate thread while inference runs.
    #[arg(long = "parallel", default_value_t = false)]
    pub parallel: bool,

    /// Replay at the file's real-time rate instead of as fast as possible.
    #[arg(long = "realtime", default_value_t = false)]
    pub realtime: bool,

    /// JSON settings file (missing fields take defaults).
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,

    /// Silero VAD ONNX model. Without it a level-based detector is used.
    #[arg(short = 'm', long = "model")]
    pub model: Option<PathBuf>,
}

#[derive(Serialize)]
struct Summary<'a> {
    output: String,
    sample_rate_hz: u32,
    bits_per_sample: u16,
    duration_secs: f64,
    trim: TrimStatus,
    segments: &'a [Segment],
}

#[cfg(feature = "silero")]
fn build_engine(params: &Params) -> Result<Box<dyn InferenceEngine>> {
    match &params.model {
        Some(path) => Ok(Box::new(rewind::vad::SileroEngine::new(path)?)),
        None => Ok(Box::new(EnergyEngine::default())),
    }
}

#[cfg(not(feature = "silero"))]
fn build_engine(params: &Params) -> Result<Box<dyn InferenceEngine>> {
    if params.model.is_some() {
        bail!("--model requires a build with the `silero` feature");
    }
    Ok(Box::new(EnergyEngine::default()))
}
