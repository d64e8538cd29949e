//! Minimal audio container codec
//!
//! Encodes and decodes uncompressed PCM16 mono WAV over in-memory buffers.
//! Stateless pure functions; the audio pipeline calls these once per decoded
//! fragment and once for the final concatenated payload.

use std::io::Cursor;

use crate::error::{BridgeError, Result};

/// Encode raw samples as a standalone playable WAV unit.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| BridgeError::CodecError(format!("Failed to open WAV writer: {e}")))?;
        for &s in samples {
            writer
                .write_sample(s)
                .map_err(|e| BridgeError::CodecError(format!("Failed to write sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| BridgeError::CodecError(format!("Failed to finalize WAV: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Decode a WAV buffer into its raw sample buffer and sample rate.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| BridgeError::CodecError(format!("Failed to parse WAV: {e}")))?;
    let sample_rate = reader.spec().sample_rate;
    let samples: std::result::Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let samples =
        samples.map_err(|e| BridgeError::CodecError(format!("Failed to read WAV samples: {e}")))?;
    Ok((samples, sample_rate))
}

/// Interpret little-endian PCM16 bytes as a sample buffer. A trailing odd
/// byte is dropped.
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// True when the buffer carries a RIFF/WAVE header.
pub fn looks_like_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_preserves_samples() {
        let samples = vec![0i16, 100, -100, i16::MAX, i16::MIN];
        let wav = encode_wav(&samples, 24_000).unwrap();
        assert!(looks_like_wav(&wav));
        let (decoded, rate) = decode_wav(&wav).unwrap();
        assert_eq!(decoded, samples);
        assert_eq!(rate, 24_000);
    }

    #[test]
    fn encode_empty_buffer_yields_valid_header() {
        let wav = encode_wav(&[], 24_000).unwrap();
        assert!(looks_like_wav(&wav));
        let (decoded, _) = decode_wav(&wav).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_wav(b"definitely not audio").unwrap_err();
        match err {
            BridgeError::CodecError(msg) => assert!(msg.contains("Failed to parse WAV")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert!(decode_wav(b"RIFF\x00\x00").is_err());
    }

    #[test]
    fn pcm16_conversion_is_little_endian_and_drops_odd_tail() {
        let bytes = [0x01, 0x00, 0xFF, 0x7F, 0xAA];
        assert_eq!(pcm16_from_le_bytes(&bytes), vec![1, i16::MAX]);
    }

    #[test]
    fn looks_like_wav_rejects_non_riff() {
        assert!(!looks_like_wav(b"OggS\x00\x00\x00\x00\x00\x00\x00\x00"));
        assert!(!looks_like_wav(b"RIFF"));
    }
}
