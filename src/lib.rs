//! `rewind`: always-on audio capture with retroactive, speech-only saving.
//!
//! This crate provides:
//! - A ring-buffer recorder that keeps the last N seconds of mono PCM
//! - A VAD post-processing pipeline (resampling, windowed speech detection, merging, stitching)
//! - Clip preparation and WAV output for the saved audio
//!
//! Capture runs on its own thread; everything else is a blocking call that returns a `Result`
//! and can be cancelled with a [`CancelToken`].

mod error;

pub use cancel::CancelToken;
pub use error::{Error, Result};

// Session configuration.
pub mod config;

// Capture: sources, the ring buffer and the recorder thread.
pub mod recorder;
pub mod ring_buffer;
pub mod source;

// Sample conversion and resampling.
pub mod pcm;
pub mod resample;

// Speech detection and reconstruction.
pub mod pipeline;
pub mod stitch;
pub mod vad;

// Saving.
pub mod clip;
pub mod wav;

pub mod cancel;

// Logging configuration.
#[cfg(feature = "logging")]
pub mod logging;
