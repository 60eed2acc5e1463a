//! File decoding into interleaved float PCM.
//!
//! WAV files go through hound; MP3 and FLAC go through symphonia. Paths
//! are validated before any file system access: asset files must
//! resolve inside the content root.

use std::fs::File;
use std::path::{Component, Path};

use anyhow::{anyhow, bail, Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded interleaved PCM, ready to become an asset.
#[derive(Debug)]
pub struct DecodedPcm {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub frames: usize,
}

/// Rejects empty paths, absolute paths, and parent-directory traversal.
pub fn is_path_allowed(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    let path = Path::new(path);
    if path.is_absolute() {
        return false;
    }
    !path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
}

/// Decodes a `.wav`, `.mp3` or `.flac` file. Fails on disallowed paths,
/// unknown extensions, empty streams, and channel counts other than
/// mono or stereo.
pub fn decode_file(path: &str) -> Result<DecodedPcm> {
    if !is_path_allowed(path) {
        bail!("absolute paths and access to the parent directory are prohibited");
    }

    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let pcm = match ext.as_deref() {
        Some("wav") => decode_wav(path)?,
        Some("mp3") | Some("flac") => decode_compressed(path)?,
        _ => bail!("unrecognized file format, expected .wav, .flac or .mp3"),
    };

    if pcm.frames == 0 {
        bail!("decoded stream is empty");
    }
    if pcm.channels != 1 && pcm.channels != 2 {
        bail!("unsupported channel count {}", pcm.channels);
    }
    Ok(pcm)
}

fn decode_wav(path: &str) -> Result<DecodedPcm> {
    let reader =
        hound::WavReader::open(path).with_context(|| format!("cannot open '{}'", path))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => {
            reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>()?
        }
        hound::SampleFormat::Int => {
            let max_val = 2.0_f32.powi(spec.bits_per_sample as i32 - 1);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|x| x as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let frames = samples.len() / spec.channels as usize;
    Ok(DecodedPcm {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        frames,
    })
}

fn decode_compressed(path: &str) -> Result<DecodedPcm> {
    let file = File::open(path).with_context(|| format!("cannot open '{}'", path))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!("probe failed: {}", e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no audio track found"))?;
    let track_id = track.id;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(2);
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("unsupported codec: {}", e))?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(anyhow!("decode failed: {}", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    channels = spec.channels.count() as u16;
                    sample_rate = spec.rate;
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // Corrupt packets are skipped; the stream may still be usable.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(anyhow!("decode failed: {}", e)),
        }
    }

    let frames = samples.len() / channels as usize;
    Ok(DecodedPcm {
        samples,
        channels,
        sample_rate,
        frames,
    })
}
