//! WAV output for saved clips.
//!
//! [`wav_header`] is the canonical 44-byte mono header for a clip's data length; [`write_wav`]
//! writes a whole clip through `hound`. For 8- and 16-bit PCM the two produce identical headers.
//! `hound` writes 32-bit float as `WAVE_FORMAT_EXTENSIBLE`, so its float header is longer.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::Result;
use crate::clip::Clip;
use crate::config::{AudioConfig, SampleEncoding};

pub const HEADER_LEN: usize = 44;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Canonical RIFF/WAVE header for `data_len` bytes of mono audio described by `config`.
///
/// Lengths that do not fit the 32-bit size fields saturate.
pub fn wav_header(data_len: usize, config: &AudioConfig) -> [u8; HEADER_LEN] {
    let data_len = u32::try_from(data_len).unwrap_or(u32::MAX);
    let block_align = config.bytes_per_sample() as u16;
    let byte_rate = config.sample_rate_hz.saturating_mul(u32::from(block_align));
    let format = match config.encoding {
        SampleEncoding::Float32 => FORMAT_IEEE_FLOAT,
        SampleEncoding::Pcm8 | SampleEncoding::Pcm16 => FORMAT_PCM,
    };

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&data_len.saturating_add(36).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format.to_le_bytes());
    header[22..24].copy_from_slice(&1u16.to_le_bytes());
    header[24..28].copy_from_slice(&config.sample_rate_hz.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&config.bits_per_sample().to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// `hound` spec matching `config` (mono).
pub fn wav_spec(config: &AudioConfig) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: config.sample_rate_hz,
        bits_per_sample: config.bits_per_sample(),
        sample_format: match config.encoding {
            SampleEncoding::Float32 => SampleFormat::Float,
            SampleEncoding::Pcm8 | SampleEncoding::Pcm16 => SampleFormat::Int,
        },
    }
}

/// Write `clip` as a complete WAV stream.
pub fn write_wav<W: Write + Seek>(writer: W, clip: &Clip) -> Result<()> {
    let mut wav = WavWriter::new(writer, wav_spec(&clip.config))?;

    match clip.config.encoding {
        SampleEncoding::Pcm8 => {
            for &b in &clip.pcm {
                wav.write_sample((i16::from(b) - 128) as i8)?;
            }
        }
        SampleEncoding::Pcm16 => {
            for b in clip.pcm.chunks_exact(2) {
                wav.write_sample(i16::from_le_bytes([b[0], b[1]]))?;
            }
        }
        SampleEncoding::Float32 => {
            for b in clip.pcm.chunks_exact(4) {
                wav.write_sample(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))?;
            }
        }
    }

    wav.finalize()?;
    Ok(())
}

/// Write `clip` to a new file at `path`.
pub fn write_clip(path: impl AsRef<Path>, clip: &Clip) -> Result<()> {
    let file = File::create(path.as_ref())?;
    write_wav(BufWriter::new(file), clip)
}
