//! Audio source collaborator.
//!
//! The recorder only needs blocking, byte-oriented reads. Platform capture backends implement
//! [`AudioSource`]; [`WavFileSource`] replays a WAV file as if it were a microphone, which is
//! what the CLI and integration tests use.

use std::io::{Read, Seek};
use std::path::Path;
use std::thread;
use std::time::Duration;

use hound::{SampleFormat, WavReader};
use thiserror::Error;
use tracing::debug;

use crate::config::{AudioConfig, SampleEncoding};
use crate::{Error, Result, pcm};

/// Failure modes of a single [`AudioSource::read`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// A recoverable hiccup; the capture loop logs it and reads again.
    #[error("transient read error: {0}")]
    Transient(String),

    /// The source was used in a state it does not support; retried after a short pause.
    #[error("source in invalid state: {0}")]
    InvalidState(String),

    /// The device stopped delivering audio. Capture halts and reports an error.
    #[error("source stopped: {0}")]
    Stopped(String),

    /// A finite source ran out of data. Capture ends cleanly.
    #[error("source exhausted")]
    Exhausted,
}

/// Blocking PCM byte source (mono, encoded per the session's [`AudioConfig`]).
pub trait AudioSource: Send {
    /// Acquire the device. Failing here means recording never starts.
    fn open(&mut self) -> Result<()>;

    /// Block until some bytes are available and copy up to `buf.len()` of them.
    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, SourceError>;

    /// Release the device. Called once from the capture thread when the loop exits.
    fn release(&mut self) {}
}

/// Replays a mono WAV file as a capture source.
pub struct WavFileSource {
    bytes: Vec<u8>,
    cursor: usize,
    config: AudioConfig,
    paced: bool,
    opened: bool,
}

impl WavFileSource {
    pub fn open_path(path: impl AsRef<Path>, buffer_duration_secs: u32) -> Result<Self> {
        let reader = WavReader::open(path.as_ref()).map_err(|err| {
            Error::PermissionDenied(format!(
                "cannot open '{}': {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_wav_reader(reader, buffer_duration_secs)
    }

    /// Decode a whole WAV stream up front and re-encode it in its own sample encoding.
    pub fn from_wav_reader<R: Read + Seek>(
        mut reader: WavReader<R>,
        buffer_duration_secs: u32,
    ) -> Result<Self> {
        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(Error::InvalidConfig(format!(
                "expected mono WAV (1 channel), got {} channels",
                spec.channels
            )));
        }

        let encoding = match spec.sample_format {
            SampleFormat::Float => SampleEncoding::Float32,
            SampleFormat::Int => SampleEncoding::from_bits_per_sample(spec.bits_per_sample)?,
        };
        let config = AudioConfig {
            sample_rate_hz: spec.sample_rate,
            encoding,
            buffer_duration_secs,
        };
        config.validate()?;

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        debug!(
            samples = samples.len(),
            sample_rate = spec.sample_rate,
            "loaded wav replay source"
        );

        Ok(Self::from_bytes(pcm::encode(&samples, encoding), config))
    }

    /// Replay already-encoded PCM bytes.
    pub fn from_bytes(bytes: Vec<u8>, config: AudioConfig) -> Self {
        Self {
            bytes,
            cursor: 0,
            config,
            paced: false,
            opened: false,
        }
    }

    /// Sleep for the played-back duration of each read, like a live device would block.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn config(&self) -> AudioConfig {
        self.config
    }
}

impl AudioSource for WavFileSource {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, SourceError> {
        if !self.opened {
            return Err(SourceError::InvalidState("read before open".into()));
        }
        let remaining = self.bytes.len() - self.cursor;
        if remaining == 0 {
            return Err(SourceError::Exhausted);
        }

        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.bytes[self.cursor..self.cursor + n]);
        self.cursor += n;

        if self.paced {
            let secs = n as f64 / self.config.byte_rate() as f64;
            thread::sleep(Duration::from_secs_f64(secs));
        }
        Ok(n)
    }

    fn release(&mut self) {
        self.opened = false;
    }
}
