//! Stateless sample-rate conversion for the VAD pipeline.
//!
//! Two strategies, chosen per call by the conversion ratio (`target / source`):
//! - `ratio >= threshold`: linear interpolation between the two neighbouring source samples.
//!   Cheap, and good enough for upsampling or mild downsampling.
//! - `ratio < threshold`: Hann-windowed sinc low-pass evaluated at the fractional source
//!   position. Steep decimation (e.g. 48 kHz -> 16 kHz) aliases badly with linear
//!   interpolation and the speech classifier is sensitive to that.
//!
//! No state is carried between calls, so chunked input is resampled chunk by chunk.

use std::f64::consts::PI;

use crate::{Error, Result};

/// Rate the speech classifier runs at for wideband input.
pub const PROCESSING_RATE_HZ: u32 = 16_000;

/// Rate the speech classifier runs at for narrowband (8 kHz) input.
pub const NARROWBAND_RATE_HZ: u32 = 8_000;

pub const DEFAULT_SINC_THRESHOLD: f64 = 0.5;
pub const DEFAULT_SINC_TAPS: usize = 32;

// Absorbs float error in `len * ratio` so exact rate pairs (e.g. 48k -> 16k) don't lose a sample.
const LENGTH_EPSILON: f64 = 1e-9;

/// Pick the classifier rate for a capture rate.
///
/// 8 kHz input is classified at 8 kHz; anything faster is converted to 16 kHz.
pub fn processing_rate_for(source_rate_hz: u32) -> Result<u32> {
    match source_rate_hz {
        NARROWBAND_RATE_HZ => Ok(NARROWBAND_RATE_HZ),
        r if r > NARROWBAND_RATE_HZ => Ok(PROCESSING_RATE_HZ),
        r => Err(Error::UnsupportedRate(format!(
            "{r} Hz is below the {NARROWBAND_RATE_HZ} Hz minimum"
        ))),
    }
}

/// Linear / windowed-sinc resampler selected by downsampling ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveResampler {
    threshold: f64,
    taps: usize,
}

impl Default for AdaptiveResampler {
    fn default() -> Self {
        Self::new(DEFAULT_SINC_THRESHOLD, DEFAULT_SINC_TAPS)
    }
}

impl AdaptiveResampler {
    /// `threshold` is the ratio below which the sinc path is used; `taps` is the total filter
    /// length (at least 2).
    pub fn new(threshold: f64, taps: usize) -> Self {
        Self {
            threshold,
            taps: taps.max(2),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn taps(&self) -> usize {
        self.taps
    }

    /// `floor(input_len * ratio)`.
    pub fn output_len(input_len: usize, ratio: f64) -> usize {
        (input_len as f64 * ratio + LENGTH_EPSILON).floor() as usize
    }

    pub fn resample(&self, input: &[f32], ratio: f64) -> Result<Vec<f32>> {
        let mut out = vec![0.0; Self::output_len(input.len(), ratio)];
        let n = self.resample_into(input, ratio, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    /// Resample into `out`, writing at most `out.len()` samples. Returns the count written.
    pub fn resample_into(&self, input: &[f32], ratio: f64, out: &mut [f32]) -> Result<usize> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(Error::UnsupportedRate(format!(
                "invalid resampling ratio {ratio}"
            )));
        }

        let n = Self::output_len(input.len(), ratio).min(out.len());
        if input.is_empty() || n == 0 {
            return Ok(0);
        }

        if ratio >= self.threshold {
            linear(input, ratio, &mut out[..n]);
        } else {
            windowed_sinc(input, ratio, self.taps, &mut out[..n]);
        }
        Ok(n)
    }
}

fn linear(input: &[f32], ratio: f64, out: &mut [f32]) {
    let last = input.len() - 1;
    for (i, slot) in out.iter_mut().enumerate() {
        let pos = i as f64 / ratio;
        let idx = pos.floor() as usize;
        if idx >= last {
            *slot = input[last];
            continue;
        }
        let frac = (pos - idx as f64) as f32;
        *slot = input[idx] * (1.0 - frac) + input[idx + 1] * frac;
    }
}

fn windowed_sinc(input: &[f32], ratio: f64, taps: usize, out: &mut [f32]) {
    let half = (taps / 2) as f64;
    let reach = taps as isize / 2;
    let len = input.len() as isize;

    for (i, slot) in out.iter_mut().enumerate() {
        let center = i as f64 / ratio;
        let base = center.floor() as isize;

        let mut acc = 0.0f64;
        let mut weight_sum = 0.0f64;
        for k in (base - reach + 1)..=(base + reach) {
            if k < 0 || k >= len {
                continue;
            }
            let x = k as f64 - center;
            if x.abs() >= half {
                continue;
            }
            // Cutoff at the target Nyquist: `ratio` of the source Nyquist.
            let w = ratio * sinc(ratio * x) * hann(x / half);
            acc += w * input[k as usize] as f64;
            weight_sum += w;
        }

        // Normalize by the weights actually used so edges keep unity gain.
        *slot = if weight_sum.abs() > 1e-12 {
            (acc / weight_sum) as f32
        } else {
            0.0
        };
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Hann window over `u` in `[-1, 1]`.
fn hann(u: f64) -> f64 {
    0.5 * (1.0 + (PI * u).cos())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
            .collect()
    }

    fn correlation(a: &[f32], b: &[f32]) -> f64 {
        let n = a.len().min(b.len());
        let (a, b) = (&a[..n], &b[..n]);
        let mean_a = a.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
        let mean_b = b.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
        let mut cov = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for (&x, &y) in a.iter().zip(b) {
            let dx = x as f64 - mean_a;
            let dy = y as f64 - mean_b;
            cov += dx * dy;
            var_a += dx * dx;
            var_b += dy * dy;
        }
        cov / (var_a.sqrt() * var_b.sqrt())
    }

    #[test]
    fn processing_rate_selection() -> Result<()> {
        assert_eq!(processing_rate_for(8_000)?, 8_000);
        assert_eq!(processing_rate_for(11_025)?, 16_000);
        assert_eq!(processing_rate_for(48_000)?, 16_000);
        assert!(matches!(
            processing_rate_for(4_000),
            Err(Error::UnsupportedRate(_))
        ));
        Ok(())
    }

    #[test]
    fn unit_ratio_is_identity() -> Result<()> {
        let input = sine(440.0, 16_000.0, 1_000);
        let out = AdaptiveResampler::default().resample(&input, 1.0)?;
        assert_eq!(out, input);
        Ok(())
    }

    #[test]
    fn output_length_is_floor_of_scaled_input() -> Result<()> {
        let rs = AdaptiveResampler::default();
        assert_eq!(rs.resample(&[0.0; 44_100], 16_000.0 / 44_100.0)?.len(), 16_000);
        assert_eq!(rs.resample(&[0.0; 48_000], 16_000.0 / 48_000.0)?.len(), 16_000);
        assert_eq!(rs.resample(&[0.0; 7], 0.5)?.len(), 3);
        Ok(())
    }

    #[test]
    fn destination_capacity_bounds_the_output() -> Result<()> {
        let mut out = [0.0f32; 10];
        let n = AdaptiveResampler::default().resample_into(&[0.25; 100], 2.0, &mut out)?;
        assert_eq!(n, 10);
        assert!(out.iter().all(|&v| (v - 0.25).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn linear_interpolates_midpoints() -> Result<()> {
        let out = AdaptiveResampler::default().resample(&[0.0, 1.0, 0.0], 2.0)?;
        assert_eq!(out, vec![0.0, 0.5, 1.0, 0.5, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn sinc_path_preserves_dc_at_the_edges() -> Result<()> {
        let out = AdaptiveResampler::default().resample(&[0.3; 300], 1.0 / 3.0)?;
        assert_eq!(out.len(), 100);
        assert!(out.iter().all(|&v| (v - 0.3).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn sinc_path_attenuates_content_above_target_nyquist() -> Result<()> {
        // 20 kHz at 48 kHz cannot be represented at 16 kHz and must not alias into the band.
        let input = sine(20_000.0, 48_000.0, 4_800);
        let out = AdaptiveResampler::default().resample(&input, 1.0 / 3.0)?;
        let interior = &out[20..out.len() - 20];
        let rms = (interior.iter().map(|v| v * v).sum::<f32>() / interior.len() as f32).sqrt();
        assert!(rms < 0.05, "aliased energy too high: {rms}");
        Ok(())
    }

    #[test]
    fn round_trip_is_near_identity() -> Result<()> {
        let rs = AdaptiveResampler::default();
        let cases = [
            (48_000.0, 1.0 / 3.0),
            (16_000.0, 0.5),
            (22_050.0, 16_000.0 / 22_050.0),
        ];
        for (rate, ratio) in cases {
            let input = sine(200.0, rate, 4_410);
            let down = rs.resample(&input, ratio)?;
            let back = rs.resample(&down, 1.0 / ratio)?;

            assert!(back.len().abs_diff(input.len()) <= 1, "length drift at ratio {ratio}");
            let corr = correlation(&input, &back);
            assert!(corr > 0.99, "correlation {corr} at ratio {ratio}");
        }
        Ok(())
    }

    #[test]
    fn invalid_ratio_is_rejected() {
        let rs = AdaptiveResampler::default();
        assert!(rs.resample(&[0.0; 4], 0.0).is_err());
        assert!(rs.resample(&[0.0; 4], f64::NAN).is_err());
    }
}
