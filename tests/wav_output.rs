use std::fs;

use hound::{SampleFormat, WavReader};

use rewind::CancelToken;
use rewind::clip::{TrimStatus, prepare_clip};
use rewind::config::{AudioConfig, SampleEncoding, Settings};
use rewind::pcm;
use rewind::pipeline::VadPipeline;
use rewind::vad::EnergyEngine;
use rewind::wav::{HEADER_LEN, wav_header, write_clip};

#[test]
fn saved_clip_round_trips_through_hound() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("clip.wav");

    let settings = Settings {
        audio: AudioConfig {
            sample_rate_hz: 22_050,
            encoding: SampleEncoding::Pcm16,
            buffer_duration_secs: 10,
        },
        ..Settings::default()
    };
    let samples: Vec<f32> = (0..22_050).map(|i| ((i % 100) as f32 - 50.0) / 100.0).collect();
    let bytes = pcm::encode(&samples, settings.audio.encoding);

    let cancel = CancelToken::new();
    let clip = prepare_clip::<EnergyEngine>(bytes.clone(), &settings, None, &cancel, |_| {})?;
    assert_eq!(clip.trim, TrimStatus::Disabled);
    write_clip(&path, &clip)?;

    let raw = fs::read(&path)?;
    assert_eq!(raw.len(), HEADER_LEN + bytes.len());
    assert_eq!(raw[..HEADER_LEN], wav_header(bytes.len(), &settings.audio));

    let mut reader = WavReader::open(&path)?;
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 22_050);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, SampleFormat::Int);

    let read: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;
    let expected: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    assert_eq!(read, expected);
    Ok(())
}

#[test]
fn trimmed_clip_header_describes_the_trimmed_data() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("trimmed.wav");

    let settings = Settings {
        audio: AudioConfig {
            sample_rate_hz: 16_000,
            encoding: SampleEncoding::Pcm8,
            buffer_duration_secs: 10,
        },
        auto_trim: true,
        stitch_ms: 200,
        ..Settings::default()
    };
    let samples: Vec<f32> = (0..16_000 * 4)
        .map(|i| {
            if (16_000..32_000).contains(&i) {
                0.6 * (i as f32 * 0.07).cos()
            } else {
                0.0
            }
        })
        .collect();
    let bytes = pcm::encode(&samples, settings.audio.encoding);

    let mut pipeline = VadPipeline::new(EnergyEngine::default());
    let cancel = CancelToken::new();
    let clip = prepare_clip(bytes.clone(), &settings, Some(&mut pipeline), &cancel, |_| {})?;
    assert_eq!(clip.trim, TrimStatus::Trimmed);
    assert!(clip.pcm.len() < bytes.len());
    write_clip(&path, &clip)?;

    let raw = fs::read(&path)?;
    assert_eq!(raw[..HEADER_LEN], wav_header(clip.pcm.len(), &settings.audio));
    assert_eq!(raw[HEADER_LEN..], clip.pcm[..]);
    Ok(())
}
