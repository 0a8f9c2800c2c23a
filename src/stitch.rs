//! Rebuild a continuous clip from the speech segments of a snapshot.
//!
//! Segments arrive in the classifier's sample domain and are mapped back onto the original
//! bytes. Each kept piece loses near-silent edges (bounded by the stitch length) and is joined to
//! the previous piece with a linear crossfade.

use tracing::debug;

use crate::config::AudioConfig;
use crate::pcm;
use crate::vad::{Segment, gap_samples};
use crate::{Error, Result};

/// Normalized magnitude below which an edge sample counts as silence.
pub const SILENCE_THRESHOLD: f32 = 0.005;

/// Bookkeeping for one segment that made it into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StitchedPiece {
    /// Source byte range after edge trimming.
    pub start_byte: usize,
    pub end_byte: usize,
    /// Bytes of this piece blended into the previous output tail.
    pub overlap_bytes: usize,
}

impl StitchedPiece {
    pub fn trimmed_bytes(&self) -> usize {
        self.end_byte - self.start_byte
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchOutput {
    pub pcm: Vec<u8>,
    pub pieces: Vec<StitchedPiece>,
}

/// Stitch `segments` (at `processing_rate`) out of `original` (described by `config`).
///
/// The output length is always the sum of the pieces' trimmed lengths minus their overlaps.
pub fn stitch(
    original: &[u8],
    segments: &[Segment],
    config: &AudioConfig,
    processing_rate: u32,
    stitch_ms: u32,
) -> Result<StitchOutput> {
    if processing_rate == 0 {
        return Err(Error::UnsupportedRate("processing rate must be non-zero".into()));
    }

    let encoding = config.encoding;
    let width = encoding.bytes_per_sample();
    let total = original.len() / width;
    let scale = config.sample_rate_hz as f64 / processing_rate as f64;
    let stitch_samples = gap_samples(stitch_ms, config.sample_rate_hz);
    let to_source = |s: usize| ((s as f64 * scale).round() as usize).min(total);

    let mut out = StitchOutput::default();
    let mut prev = Vec::new();
    let mut next = Vec::new();

    for seg in segments {
        let (start, end) = (to_source(seg.start), to_source(seg.end));
        if start >= end {
            continue;
        }

        let silent = |i: usize| pcm::magnitude_at(original, encoding, i) < SILENCE_THRESHOLD;
        let lead = (start..end).take(stitch_samples).take_while(|&i| silent(i)).count();
        if (start + lead..end).all(silent) {
            debug!(start, end, "dropping silent segment");
            continue;
        }
        let trail = (start + lead..end)
            .rev()
            .take(stitch_samples)
            .take_while(|&i| silent(i))
            .count();
        let (start, end) = (start + lead, end - trail);
        let bytes = &original[start * width..end * width];

        let out_samples = out.pcm.len() / width;
        let n = stitch_samples.min(out_samples).min(end - start);
        if n > 0 {
            let tail_at = out.pcm.len() - n * width;
            prev.clear();
            pcm::decode_into(&out.pcm[tail_at..], encoding, &mut prev);
            next.clear();
            pcm::decode_into(&bytes[..n * width], encoding, &mut next);

            for (i, (p, q)) in prev.iter_mut().zip(&next).enumerate() {
                let t = (i + 1) as f32 / (n + 1) as f32;
                *p = *p * (1.0 - t) + *q * t;
            }

            out.pcm.truncate(tail_at);
            pcm::encode_into(&prev, encoding, &mut out.pcm);
        }
        out.pcm.extend_from_slice(&bytes[n * width..]);

        out.pieces.push(StitchedPiece {
            start_byte: start * width,
            end_byte: end * width,
            overlap_bytes: n * width,
        });
    }

    debug!(
        segments = segments.len(),
        kept = out.pieces.len(),
        bytes = out.pcm.len(),
        "stitched speech segments"
    );
    Ok(out)
}
