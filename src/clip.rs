//! Turning a snapshot into the clip handed to the file writer.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::{AudioConfig, Settings};
use crate::pipeline::{PipelineOptions, VadPipeline};
use crate::vad::{InferenceEngine, Segment};
use crate::{Error, Result};

/// What auto-trim did to a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimStatus {
    /// Auto-trim was off (or no engine was available); the snapshot is saved as is.
    Disabled,
    Trimmed,
    /// No speech was found; the untrimmed snapshot is kept instead of an empty clip.
    NoSpeech,
    /// The capture rate cannot be classified; the snapshot is saved as is.
    PassThrough,
    /// Inference failed part-way; the clip holds speech found before the failure.
    Partial,
}

/// Audio ready to be written, passed by value to the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub pcm: Vec<u8>,
    pub config: AudioConfig,
    /// Speech segments at the processing rate, empty unless trimmed.
    pub segments: Vec<Segment>,
    pub trim: TrimStatus,
}

impl Clip {
    pub fn duration(&self) -> Duration {
        let samples = self.pcm.len() / self.config.bytes_per_sample();
        Duration::from_secs_f64(samples as f64 / self.config.sample_rate_hz as f64)
    }
}

/// Build the clip for `snapshot`, auto-trimming it when `settings` ask for it and a pipeline is
/// available.
///
/// The pipeline's stitch length, threshold and mode are taken from `settings`.
pub fn prepare_clip<E: InferenceEngine>(
    snapshot: Vec<u8>,
    settings: &Settings,
    pipeline: Option<&mut VadPipeline<E>>,
    cancel: &CancelToken,
    on_progress: impl FnMut(f32),
) -> Result<Clip> {
    if snapshot.is_empty() {
        return Err(Error::EmptyBuffer);
    }
    let config = settings.audio;

    let pipeline = match pipeline {
        Some(p) if settings.auto_trim => p,
        _ => {
            return Ok(Clip {
                pcm: snapshot,
                config,
                segments: Vec::new(),
                trim: TrimStatus::Disabled,
            });
        }
    };

    pipeline.set_options(PipelineOptions {
        resampler: pipeline.options().resampler,
        ..PipelineOptions::from_settings(settings)
    });
    let out = pipeline.run(&snapshot, &config, cancel, on_progress)?;

    let clip = if out.is_pass_through() {
        Clip {
            pcm: snapshot,
            config,
            segments: Vec::new(),
            trim: TrimStatus::PassThrough,
        }
    } else if out.pcm.is_empty() {
        warn!(bytes = snapshot.len(), "no speech found; keeping the untrimmed clip");
        Clip {
            pcm: snapshot,
            config,
            segments: Vec::new(),
            trim: TrimStatus::NoSpeech,
        }
    } else {
        let trim = match out.inference_error {
            Some(_) => TrimStatus::Partial,
            None => TrimStatus::Trimmed,
        };
        Clip {
            pcm: out.pcm,
            config,
            segments: out.segments,
            trim,
        }
    };

    info!(bytes = clip.pcm.len(), trim = ?clip.trim, "clip prepared");
    Ok(clip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleEncoding;
    use crate::pcm;
    use crate::vad::EnergyEngine;

    fn settings(rate: u32, auto_trim: bool) -> Settings {
        Settings {
            audio: AudioConfig {
                sample_rate_hz: rate,
                encoding: SampleEncoding::Pcm16,
                buffer_duration_secs: 30,
            },
            auto_trim,
            stitch_ms: 100,
            ..Settings::default()
        }
    }

    fn tone_then_silence(rate: u32) -> Vec<u8> {
        let n = rate as usize;
        let samples: Vec<f32> = (0..n * 3)
            .map(|i| {
                if i < n {
                    0.5 * (2.0 * std::f32::consts::PI * 250.0 * i as f32 / rate as f32).cos()
                } else {
                    0.0
                }
            })
            .collect();
        pcm::encode(&samples, SampleEncoding::Pcm16)
    }

    #[test]
    fn empty_snapshot_is_an_error() {
        let res = prepare_clip::<EnergyEngine>(
            Vec::new(),
            &settings(16_000, true),
            None,
            &CancelToken::new(),
            |_| {},
        );
        assert!(matches!(res, Err(Error::EmptyBuffer)));
    }

    #[test]
    fn auto_trim_off_keeps_the_snapshot() -> Result<()> {
        let bytes = tone_then_silence(16_000);
        let mut pipeline = VadPipeline::new(EnergyEngine::default());
        let clip = prepare_clip(
            bytes.clone(),
            &settings(16_000, false),
            Some(&mut pipeline),
            &CancelToken::new(),
            |_| {},
        )?;
        assert_eq!(clip.trim, TrimStatus::Disabled);
        assert_eq!(clip.pcm, bytes);
        assert_eq!(clip.duration(), Duration::from_secs(3));
        Ok(())
    }

    #[test]
    fn speech_is_trimmed() -> Result<()> {
        let bytes = tone_then_silence(16_000);
        let mut pipeline = VadPipeline::new(EnergyEngine::default());
        let clip = prepare_clip(
            bytes.clone(),
            &settings(16_000, true),
            Some(&mut pipeline),
            &CancelToken::new(),
            |_| {},
        )?;
        assert_eq!(clip.trim, TrimStatus::Trimmed);
        assert_eq!(clip.segments.len(), 1);
        assert!(clip.pcm.len() < bytes.len());
        assert_eq!(pipeline.options().stitch_ms, 100);
        Ok(())
    }

    #[test]
    fn silence_keeps_the_original_audio() -> Result<()> {
        let bytes = vec![0u8; 16_000 * 2 * 2];
        let mut pipeline = VadPipeline::new(EnergyEngine::default());
        let clip = prepare_clip(
            bytes.clone(),
            &settings(16_000, true),
            Some(&mut pipeline),
            &CancelToken::new(),
            |_| {},
        )?;
        assert_eq!(clip.trim, TrimStatus::NoSpeech);
        assert_eq!(clip.pcm, bytes);
        Ok(())
    }

    #[test]
    fn unsupported_rate_passes_through() -> Result<()> {
        let bytes = tone_then_silence(6_000);
        let mut pipeline = VadPipeline::new(EnergyEngine::default());
        let clip = prepare_clip(
            bytes.clone(),
            &settings(6_000, true),
            Some(&mut pipeline),
            &CancelToken::new(),
            |_| {},
        )?;
        assert_eq!(clip.trim, TrimStatus::PassThrough);
        assert_eq!(clip.pcm, bytes);
        Ok(())
    }
}
