//! Session configuration.
//!
//! [`AudioConfig`] is the immutable description of a capture session. [`Settings`] is what the
//! settings collaborator hands us at session/run start: the audio config plus the save-time
//! knobs (auto-trim, stitch length, speech threshold, pipeline mode, buffer limits).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default stitch length (merge gap, padding, max trim and crossfade length).
pub const DEFAULT_STITCH_MS: u32 = 1_600;

/// Default speech probability threshold.
pub const DEFAULT_SPEECH_THRESHOLD: f32 = 0.4;

/// Hard ceiling on the ring buffer size, independent of the requested duration.
pub const DEFAULT_HARD_MAX_BUFFER_BYTES: usize = 512 * 1024 * 1024;

/// Sample encodings the capture path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    /// 8-bit unsigned PCM (silence at 128).
    Pcm8,
    /// 16-bit signed little-endian PCM.
    Pcm16,
    /// 32-bit IEEE float little-endian.
    Float32,
}

impl SampleEncoding {
    /// Map a bits-per-sample value to an encoding.
    ///
    /// 24- and 32-bit capture formats are delivered as float by the platforms we target.
    pub fn from_bits_per_sample(bits: u16) -> Result<Self> {
        match bits {
            8 => Ok(Self::Pcm8),
            16 => Ok(Self::Pcm16),
            24 | 32 => Ok(Self::Float32),
            other => Err(Error::InvalidConfig(format!(
                "unsupported bits per sample: {other}"
            ))),
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Pcm8 => 1,
            Self::Pcm16 => 2,
            Self::Float32 => 4,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }
}

/// Immutable audio configuration for one recording session (mono only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate_hz: u32,
    pub encoding: SampleEncoding,
    pub buffer_duration_secs: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            encoding: SampleEncoding::Pcm16,
            buffer_duration_secs: 300,
        }
    }
}

impl AudioConfig {
    pub fn new(
        sample_rate_hz: u32,
        bits_per_sample: u16,
        buffer_duration_secs: u32,
    ) -> Result<Self> {
        let config = Self {
            sample_rate_hz,
            encoding: SampleEncoding::from_bits_per_sample(bits_per_sample)?,
            buffer_duration_secs,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 {
            return Err(Error::InvalidConfig("sample rate must be non-zero".into()));
        }
        if self.buffer_duration_secs == 0 {
            return Err(Error::InvalidConfig(
                "buffer duration must be at least one second".into(),
            ));
        }
        Ok(())
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.encoding.bytes_per_sample()
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.encoding.bits_per_sample()
    }

    /// Bytes per second of mono audio.
    pub fn byte_rate(&self) -> usize {
        self.sample_rate_hz as usize * self.bytes_per_sample()
    }

    /// Buffer size implied by the configured duration, before any clamping.
    pub fn requested_capacity_bytes(&self) -> usize {
        self.byte_rate()
            .saturating_mul(self.buffer_duration_secs as usize)
    }

    /// Number of bytes covering `ms` milliseconds, rounded down to a whole sample.
    pub fn bytes_for_ms(&self, ms: u64) -> usize {
        let samples = (self.sample_rate_hz as u64).saturating_mul(ms) / 1_000;
        (samples as usize).saturating_mul(self.bytes_per_sample())
    }
}

/// Values supplied by the settings collaborator.
///
/// Read once at session start (audio config, buffer limits) or at save time (trim knobs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioConfig,

    /// Whether saving a clip should drop non-speech regions.
    pub auto_trim: bool,

    /// Merge gap / padding / crossfade length in milliseconds.
    pub stitch_ms: u32,

    /// Speech probability threshold for the detector.
    pub speech_threshold: f32,

    /// Run resampling and inference on separate threads.
    pub parallel: bool,

    /// Pooled buffers for parallel mode. `None` scales with available cores.
    pub pool_size: Option<usize>,

    pub hard_max_buffer_bytes: usize,
    /// Memory the buffer may use. `None` derives a budget from available memory at start.
    /// Estimate of memory the buffer may use. `None` means unknown.
    pub memory_budget_bytes: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            auto_trim: false,
            stitch_ms: DEFAULT_STITCH_MS,
            speech_threshold: DEFAULT_SPEECH_THRESHOLD,
            parallel: false,
            pool_size: None,
            hard_max_buffer_bytes: DEFAULT_HARD_MAX_BUFFER_BYTES,
            memory_budget_bytes: None,
        }
    }
}

impl Settings {
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let settings: Settings = serde_json::from_reader(reader)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|err| {
            Error::InvalidConfig(format!(
                "failed to open settings file '{}': {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json_reader(BufReader::new(file))
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        if !(0.0..=1.0).contains(&self.speech_threshold) {
            return Err(Error::InvalidConfig(format!(
                "speech threshold must be within [0, 1], got {}",
                self.speech_threshold
            )));
        }
        if self.pool_size == Some(0) {
            return Err(Error::InvalidConfig("pool size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_map_to_encodings() -> Result<()> {
        assert_eq!(SampleEncoding::from_bits_per_sample(8)?, SampleEncoding::Pcm8);
        assert_eq!(SampleEncoding::from_bits_per_sample(16)?, SampleEncoding::Pcm16);
        assert_eq!(SampleEncoding::from_bits_per_sample(24)?, SampleEncoding::Float32);
        assert!(SampleEncoding::from_bits_per_sample(12).is_err());
        Ok(())
    }

    #[test]
    fn requested_capacity_is_rate_times_width_times_duration() -> Result<()> {
        let config = AudioConfig::new(44_100, 16, 60)?;
        assert_eq!(config.requested_capacity_bytes(), 44_100 * 2 * 60);
        assert_eq!(config.bytes_for_ms(500), 22_050 * 2);
        Ok(())
    }

    #[test]
    fn zero_duration_is_rejected() {
        assert!(AudioConfig::new(16_000, 16, 0).is_err());
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults() -> Result<()> {
        let json = r#"{ "auto_trim": true, "audio": { "sample_rate_hz": 8000, "encoding": "pcm8", "buffer_duration_secs": 30 } }"#;
        let settings = Settings::from_json_reader(json.as_bytes())?;
        assert!(settings.auto_trim);
        assert_eq!(settings.audio.encoding, SampleEncoding::Pcm8);
        assert_eq!(settings.stitch_ms, DEFAULT_STITCH_MS);
        assert_eq!(settings.speech_threshold, DEFAULT_SPEECH_THRESHOLD);
        Ok(())
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let json = r#"{ "speech_threshold": 1.5 }"#;
        assert!(Settings::from_json_reader(json.as_bytes()).is_err());
    }
}
