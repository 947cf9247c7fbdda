//! WAV encoding for STT and WAV/MP3 decoding of synthesized speech

use std::io::Cursor;

use super::AudioChunk;
use crate::{Error, Result};

/// Encode mono i16 samples as a 16-bit WAV file
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode synthesized audio (WAV or MP3) into a mono chunk at its native rate
///
/// # Errors
///
/// Returns error if the bytes are neither valid WAV nor valid MP3
pub fn decode_audio(data: &[u8]) -> Result<AudioChunk> {
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn decode_wav(data: &[u8]) -> Result<AudioChunk> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        (hound::SampleFormat::Int, bits) if bits <= 32 => {
            let shift = u32::from(bits.saturating_sub(16));
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0) as i16))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        (format, bits) => {
            return Err(Error::Audio(format!(
                "unsupported WAV format {format:?}/{bits}"
            )));
        }
    };

    Ok(AudioChunk::new(
        downmix(&interleaved, usize::from(spec.channels)),
        spec.sample_rate,
    ))
}

#[allow(clippy::cast_sign_loss)]
fn decode_mp3(data: &[u8]) -> Result<AudioChunk> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                }
                samples.extend(downmix(&frame.data, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no audio frames decoded".to_string()));
    }

    Ok(AudioChunk::new(samples, sample_rate))
}

/// Average interleaved frames down to one channel
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}
