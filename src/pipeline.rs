//! Speech-only post-processing of a captured snapshot.
//!
//! The snapshot is walked in one-second chunks: bytes are decoded, resampled to the classifier
//! rate and fed to a [`SpeechDetector`]. The resulting runs are merged and padded, then stitched
//! back out of the original bytes.
//!
//! In parallel mode a producer thread decodes and resamples into a fixed pool of slots while the
//! calling thread runs inference. Slots move between the two over bounded channels, so each slot
//! is owned by exactly one side at a time and chunks are classified in order.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{AudioConfig, DEFAULT_SPEECH_THRESHOLD, DEFAULT_STITCH_MS, Settings};
use crate::pcm;
use crate::resample::{AdaptiveResampler, processing_rate_for};
use crate::stitch::{StitchedPiece, stitch};
use crate::vad::{InferenceEngine, Segment, SpeechDetector, SpeechTimestamp, merge};
use crate::{Error, Result};

// Share of the progress range spent on detection; merge and stitch take the rest.
const DETECTION_PROGRESS: f32 = 0.9;

/// Pool size used when none is configured: one slot per core, within `[2, 8]`.
pub fn default_pool_size() -> usize {
    num_cpus::get().clamp(2, 8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Decode, resample and classify on the calling thread.
    Sequential,
    /// Decode and resample on a producer thread feeding `pool_size` reusable slots.
    Parallel { pool_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    pub stitch_ms: u32,
    pub threshold: f32,
    pub mode: PipelineMode,
    pub resampler: AdaptiveResampler,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            stitch_ms: DEFAULT_STITCH_MS,
            threshold: DEFAULT_SPEECH_THRESHOLD,
            mode: PipelineMode::Sequential,
            resampler: AdaptiveResampler::default(),
        }
    }
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let mode = if settings.parallel {
            PipelineMode::Parallel {
                pool_size: settings.pool_size.unwrap_or_else(default_pool_size),
            }
        } else {
            PipelineMode::Sequential
        };
        Self {
            stitch_ms: settings.stitch_ms,
            threshold: settings.speech_threshold,
            mode,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Stitched speech audio, in the snapshot's encoding.
    pub pcm: Vec<u8>,
    /// Raw detector runs at `processing_rate`.
    pub timestamps: Vec<SpeechTimestamp>,
    /// Merged and padded segments at `processing_rate`.
    pub segments: Vec<Segment>,
    pub pieces: Vec<StitchedPiece>,
    /// `None` when the capture rate cannot be classified and `pcm` is the untouched snapshot.
    pub processing_rate: Option<u32>,
    /// Set when inference failed part-way; the other fields hold the partial result.
    pub inference_error: Option<Error>,
}

impl PipelineOutput {
    pub fn is_pass_through(&self) -> bool {
        self.processing_rate.is_none()
    }
}

/// Speech detection pipeline around an inference engine.
///
/// The engine is reused across runs; recurrent state is not, every run starts from zeros.
pub struct VadPipeline<E> {
    engine: E,
    options: PipelineOptions,
}

impl<E: InferenceEngine> VadPipeline<E> {
    pub fn new(engine: E) -> Self {
        Self::with_options(engine, PipelineOptions::default())
    }

    pub fn with_options(engine: E, options: PipelineOptions) -> Self {
        Self { engine, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: PipelineOptions) {
        self.options = options;
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Run the whole pipeline over `snapshot`.
    ///
    /// `on_progress` receives non-decreasing values in `[0, 1]`, ending with `1.0` on success.
    /// Returns [`Error::Cancelled`] if `cancel` fires before detection completes.
    pub fn run(
        &mut self,
        snapshot: &[u8],
        config: &AudioConfig,
        cancel: &CancelToken,
        on_progress: impl FnMut(f32),
    ) -> Result<PipelineOutput> {
        let mut progress = Progress::new(on_progress);
        let options = self.options;

        let processing_rate = match processing_rate_for(config.sample_rate_hz) {
            Ok(rate) => rate,
            Err(err) => {
                warn!(error = %err, "passing audio through untrimmed");
                progress.report(1.0);
                return Ok(PipelineOutput {
                    pcm: snapshot.to_vec(),
                    ..PipelineOutput::default()
                });
            }
        };

        let plan = ChunkPlan::new(snapshot.len(), config, processing_rate);
        info!(
            bytes = snapshot.len(),
            source_rate = config.sample_rate_hz,
            processing_rate,
            chunks = plan.chunks,
            mode = ?options.mode,
            "speech pipeline started"
        );

        let mut detector =
            SpeechDetector::new(&mut self.engine, processing_rate, options.threshold)?;
        detector.reset();

        match options.mode {
            PipelineMode::Sequential => detect_sequential(
                snapshot,
                config,
                &plan,
                &options,
                &mut detector,
                cancel,
                &mut progress,
            )?,
            PipelineMode::Parallel { pool_size } => detect_parallel(
                snapshot,
                config,
                &plan,
                &options,
                pool_size.max(1),
                &mut detector,
                cancel,
                &mut progress,
            )?,
        }

        let report = detector.finish(plan.total_samples);
        if let Some(err) = &report.error {
            error!(error = %err, runs = report.timestamps.len(), "speech detection stopped early");
        }

        let segments = merge(
            &report.timestamps,
            options.stitch_ms,
            processing_rate,
            plan.total_samples,
        );
        let stitched = stitch(snapshot, &segments, config, processing_rate, options.stitch_ms)?;
        progress.report(1.0);

        info!(
            runs = report.timestamps.len(),
            segments = segments.len(),
            out_bytes = stitched.pcm.len(),
            "speech pipeline finished"
        );

        Ok(PipelineOutput {
            pcm: stitched.pcm,
            timestamps: report.timestamps,
            segments,
            pieces: stitched.pieces,
            processing_rate: Some(processing_rate),
            inference_error: report.error,
        })
    }
}

/// How a snapshot is split into one-second source chunks.
#[derive(Debug, Clone, Copy)]
struct ChunkPlan {
    chunk_bytes: usize,
    /// Bytes covering whole samples; a trailing partial sample is never classified.
    aligned_len: usize,
    chunks: usize,
    ratio: f64,
    /// Capacity a slot needs for one resampled chunk.
    slot_samples: usize,
    /// Samples at the processing rate once every chunk is resampled.
    total_samples: usize,
}

impl ChunkPlan {
    fn new(len: usize, config: &AudioConfig, processing_rate: u32) -> Self {
        let width = config.bytes_per_sample();
        let chunk_samples = config.sample_rate_hz as usize;
        let ratio = processing_rate as f64 / config.sample_rate_hz as f64;

        let whole = len / width;
        let full = whole / chunk_samples;
        let rest = whole % chunk_samples;
        let slot_samples = AdaptiveResampler::output_len(chunk_samples, ratio);

        Self {
            chunk_bytes: chunk_samples * width,
            aligned_len: whole * width,
            chunks: whole.div_ceil(chunk_samples),
            ratio,
            slot_samples,
            total_samples: full * slot_samples + AdaptiveResampler::output_len(rest, ratio),
        }
    }

    fn chunks<'a>(&self, snapshot: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        snapshot[..self.aligned_len.min(snapshot.len())].chunks(self.chunk_bytes)
    }

    fn progress_after(&self, done: usize) -> f32 {
        if self.chunks == 0 {
            return DETECTION_PROGRESS;
        }
        DETECTION_PROGRESS * done as f32 / self.chunks as f32
    }
}

/// Decode one chunk and convert it to the processing rate. Returns the sample count in `out`.
fn prepare_chunk(
    chunk: &[u8],
    config: &AudioConfig,
    plan: &ChunkPlan,
    resampler: &AdaptiveResampler,
    scratch: &mut Vec<f32>,
    out: &mut [f32],
) -> Result<usize> {
    scratch.clear();
    pcm::decode_into(chunk, config.encoding, scratch);

    if plan.ratio == 1.0 {
        let n = scratch.len().min(out.len());
        out[..n].copy_from_slice(&scratch[..n]);
        return Ok(n);
    }
    resampler.resample_into(scratch, plan.ratio, out)
}

fn detect_sequential<E: InferenceEngine, F: FnMut(f32)>(
    snapshot: &[u8],
    config: &AudioConfig,
    plan: &ChunkPlan,
    options: &PipelineOptions,
    detector: &mut SpeechDetector<E>,
    cancel: &CancelToken,
    progress: &mut Progress<F>,
) -> Result<()> {
    let mut scratch = Vec::with_capacity(config.sample_rate_hz as usize);
    let mut resampled = vec![0.0f32; plan.slot_samples];

    for (i, chunk) in plan.chunks(snapshot).enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let n = prepare_chunk(
            chunk,
            config,
            plan,
            &options.resampler,
            &mut scratch,
            &mut resampled,
        )?;
        detector.feed(&resampled[..n]);
        debug!(chunk = i, samples = n, "classified chunk");
        progress.report(plan.progress_after(i + 1));

        if detector.is_aborted() {
            break;
        }
    }
    Ok(())
}

/// A pooled resample buffer and the number of valid samples in it.
struct Slot {
    buf: Box<[f32]>,
    len: usize,
}

#[allow(clippy::too_many_arguments)]
fn detect_parallel<E: InferenceEngine, F: FnMut(f32)>(
    snapshot: &[u8],
    config: &AudioConfig,
    plan: &ChunkPlan,
    options: &PipelineOptions,
    pool_size: usize,
    detector: &mut SpeechDetector<E>,
    cancel: &CancelToken,
    progress: &mut Progress<F>,
) -> Result<()> {
    let (free_tx, free_rx) = mpsc::sync_channel::<Slot>(pool_size);
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<Slot>>(pool_size);

    for _ in 0..pool_size {
        free_tx
            .send(Slot {
                buf: vec![0.0; plan.slot_samples].into_boxed_slice(),
                len: 0,
            })
            .map_err(|_| Error::msg("slot pool closed before start"))?;
    }

    thread::scope(|scope| {
        let producer = thread::Builder::new()
            .name("rewind-resample".into())
            .spawn_scoped(scope, || {
                produce(snapshot, config, plan, options, free_rx, ready_tx, cancel)
            })?;

        let consumed = consume(plan, detector, cancel, progress, &ready_rx, &free_tx);

        // Closing both ends unblocks a producer waiting on either channel.
        drop(ready_rx);
        drop(free_tx);

        if producer.join().is_err() {
            return Err(Error::msg("resample thread panicked"));
        }
        consumed
    })
}

fn produce(
    snapshot: &[u8],
    config: &AudioConfig,
    plan: &ChunkPlan,
    options: &PipelineOptions,
    free_rx: Receiver<Slot>,
    ready_tx: SyncSender<Result<Slot>>,
    cancel: &CancelToken,
) {
    let mut scratch = Vec::with_capacity(config.sample_rate_hz as usize);

    for chunk in plan.chunks(snapshot) {
        if cancel.is_cancelled() {
            break;
        }
        let Ok(mut slot) = free_rx.recv() else {
            break;
        };

        let prepared = prepare_chunk(
            chunk,
            config,
            plan,
            &options.resampler,
            &mut scratch,
            &mut slot.buf,
        )
        .map(|n| {
            slot.len = n;
            slot
        });
        let failed = prepared.is_err();

        if ready_tx.send(prepared).is_err() || failed {
            break;
        }
    }
}

fn consume<E: InferenceEngine, F: FnMut(f32)>(
    plan: &ChunkPlan,
    detector: &mut SpeechDetector<E>,
    cancel: &CancelToken,
    progress: &mut Progress<F>,
    ready_rx: &Receiver<Result<Slot>>,
    free_tx: &SyncSender<Slot>,
) -> Result<()> {
    let mut done = 0;

    while let Ok(prepared) = ready_rx.recv() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let slot = prepared?;

        detector.feed(&slot.buf[..slot.len]);
        done += 1;
        debug!(chunk = done - 1, samples = slot.len, "classified chunk");
        progress.report(plan.progress_after(done));

        if detector.is_aborted() || free_tx.send(slot).is_err() {
            break;
        }
    }

    // The producer also stops on cancellation without sending anything.
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Monotonic, clamped progress reporting.
struct Progress<F> {
    sink: F,
    last: f32,
}

impl<F: FnMut(f32)> Progress<F> {
    fn new(sink: F) -> Self {
        Self { sink, last: 0.0 }
    }

    fn report(&mut self, value: f32) {
        let value = value.clamp(0.0, 1.0).max(self.last);
        self.last = value;
        (self.sink)(value);
    }
}
