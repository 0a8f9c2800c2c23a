//! Conversions between raw little-endian PCM bytes and normalized `f32` samples.
//!
//! Normalized samples live in `[-1.0, 1.0]`. Trailing bytes that do not form a whole sample are
//! ignored on decode.

use crate::config::SampleEncoding;

/// Decode `bytes` and append normalized samples to `out`.
pub fn decode_into(bytes: &[u8], encoding: SampleEncoding, out: &mut Vec<f32>) {
    out.reserve(bytes.len() / encoding.bytes_per_sample());
    match encoding {
        SampleEncoding::Pcm8 => out.extend(bytes.iter().map(|&b| decode_u8(b))),
        SampleEncoding::Pcm16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|b| decode_i16(i16::from_le_bytes([b[0], b[1]]))),
        ),
        SampleEncoding::Float32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        ),
    }
}

pub fn decode(bytes: &[u8], encoding: SampleEncoding) -> Vec<f32> {
    let mut out = Vec::new();
    decode_into(bytes, encoding, &mut out);
    out
}

/// Encode normalized samples into `out`, clamping to full scale.
pub fn encode_into(samples: &[f32], encoding: SampleEncoding, out: &mut Vec<u8>) {
    out.reserve(samples.len() * encoding.bytes_per_sample());
    for &s in samples {
        match encoding {
            SampleEncoding::Pcm8 => out.push(encode_u8(s)),
            SampleEncoding::Pcm16 => out.extend_from_slice(&encode_i16(s).to_le_bytes()),
            SampleEncoding::Float32 => out.extend_from_slice(&s.clamp(-1.0, 1.0).to_le_bytes()),
        }
    }
}

pub fn encode(samples: &[f32], encoding: SampleEncoding) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(samples, encoding, &mut out);
    out
}

/// Absolute normalized magnitude of the sample at `index`.
pub fn magnitude_at(bytes: &[u8], encoding: SampleEncoding, index: usize) -> f32 {
    let width = encoding.bytes_per_sample();
    let b = &bytes[index * width..(index + 1) * width];
    let value = match encoding {
        SampleEncoding::Pcm8 => decode_u8(b[0]),
        SampleEncoding::Pcm16 => decode_i16(i16::from_le_bytes([b[0], b[1]])),
        SampleEncoding::Float32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
    };
    value.abs()
}

fn decode_u8(b: u8) -> f32 {
    (b as f32 - 128.0) / 128.0
}

fn decode_i16(v: i16) -> f32 {
    v as f32 / i16::MAX as f32
}

fn encode_u8(s: f32) -> u8 {
    (s.clamp(-1.0, 1.0) * 128.0 + 128.0).round().clamp(0.0, 255.0) as u8
}

fn encode_i16(s: f32) -> i16 {
    (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_is_little_endian_and_normalized() {
        let bytes = [0xff, 0x7f, 0x01, 0x80, 0x00, 0x00];
        let samples = decode(&bytes, SampleEncoding::Pcm16);
        assert_eq!(samples, vec![1.0, -1.0, 0.0]);
    }

    #[test]
    fn pcm16_round_trips_exact_values() {
        let bytes: Vec<u8> = [-12345i16, 0, 17, i16::MAX]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let samples = decode(&bytes, SampleEncoding::Pcm16);
        assert_eq!(encode(&samples, SampleEncoding::Pcm16), bytes);
    }

    #[test]
    fn pcm8_centres_on_128() {
        let samples = decode(&[128, 0, 255], SampleEncoding::Pcm8);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], -1.0);
        assert!((samples[2] - 127.0 / 128.0).abs() < 1e-6);
        assert_eq!(encode(&samples, SampleEncoding::Pcm8), vec![128, 0, 255]);
    }

    #[test]
    fn partial_trailing_sample_is_ignored() {
        let samples = decode(&[0, 0, 7], SampleEncoding::Pcm16);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let bytes = encode(&[2.0, -2.0], SampleEncoding::Pcm16);
        assert_eq!(
            bytes,
            [i16::MAX.to_le_bytes(), (-i16::MAX).to_le_bytes()].concat()
        );
    }

    #[test]
    fn magnitude_reads_a_single_sample() {
        let bytes = encode(&[0.25, -0.5], SampleEncoding::Pcm16);
        assert!((magnitude_at(&bytes, SampleEncoding::Pcm16, 1) - 0.5).abs() < 1e-4);
    }
}
