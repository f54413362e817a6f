//! Wire codec for audio blocks
//!
//! 16-bit signed little-endian PCM, base64 encoded, tagged with a MIME type
//! that carries the sample rate.

use base64::Engine as _;
use thiserror::Error;

/// Encoded audio block ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    /// Base64 PCM16 LE payload
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// Inbound payload decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("PCM16 payload has odd length ({0} bytes)")]
    OddLength(usize),

    #[error("Empty audio payload")]
    Empty,
}

/// MIME type for raw PCM at the given rate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Convert f32 samples to PCM16 LE bytes
fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Encode one capture frame for transmission
pub fn encode_pcm16(samples: &[f32], sample_rate: u32) -> EncodedAudio {
    let pcm = samples_to_pcm16(samples);
    EncodedAudio {
        data: base64::engine::general_purpose::STANDARD.encode(&pcm),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Decode a base64 PCM16 LE payload into f32 samples in [-1, 1)
pub fn decode_pcm16(data: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;

    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian_pcm16() {
        let encoded = encode_pcm16(&[0.0, 0.5, -1.0, 1.0], 16000);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded.data)
            .unwrap();

        // 0, 16384, -32768, 32767 (clamped)
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0xFF, 0x7F]);
        assert_eq!(encoded.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn decodes_known_payload() {
        let data = base64::engine::general_purpose::STANDARD.encode([0x00, 0x40, 0x00, 0xC0]);
        assert_eq!(decode_pcm16(&data).unwrap(), vec![0.5, -0.5]);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(matches!(
            decode_pcm16("not base64 !!"),
            Err(DecodeError::InvalidBase64(_))
        ));

        let odd = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        assert_eq!(decode_pcm16(&odd), Err(DecodeError::OddLength(3)));

        assert_eq!(decode_pcm16(""), Err(DecodeError::Empty));
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let encoded = encode_pcm16(&[4.0, -4.0], 16000);
        let decoded = decode_pcm16(&encoded.data).unwrap();
        assert_eq!(decoded, vec![32767.0 / 32768.0, -1.0]);
    }
}
