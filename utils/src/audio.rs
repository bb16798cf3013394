use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate for audio sent to the backend (microphone side).
pub const LIVE_API_INPUT_SAMPLE_RATE: f64 = 16000.0;
/// Sample rate of PCM16 audio the backend streams back.
pub const LIVE_API_OUTPUT_SAMPLE_RATE: f64 = 24000.0;

pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Base64 text to raw bytes.
pub fn decode_base64(data: &str) -> anyhow::Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}

/// Raw bytes to base64 text.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// PCM16 little-endian bytes to normalized samples. A trailing odd byte is
/// dropped.
pub fn samples_from_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Normalized samples to PCM16 little-endian bytes.
pub fn pcm16_from_samples(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            ((sample * i16::MAX as f32) as i16)
                .clamp(i16::MIN, i16::MAX)
                .to_le_bytes()
        })
        .collect()
}

/// Base64 PCM16 fragment to normalized samples; decode failures log and
/// produce no samples.
pub fn decode(fragment: &str) -> Vec<f32> {
    match decode_base64(fragment) {
        Ok(pcm16) => samples_from_pcm16(&pcm16),
        Err(_) => {
            tracing::error!("Failed to decode base64 fragment");
            Vec::new()
        }
    }
}

/// Normalized samples to a base64 PCM16 fragment.
pub fn encode(samples: &[f32]) -> String {
    encode_base64(&pcm16_from_samples(samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_full_scale_maps_to_unit_range() {
        let bytes = [
            0xFF, 0x7F, // i16::MAX
            0x00, 0x80, // i16::MIN
            0x00, 0x00, // zero
        ];
        let samples = samples_from_pcm16(&bytes);
        assert_eq!(samples.len(), 3);
        assert!((samples[0] - 1.0).abs() < 1e-6);
        assert!((samples[1] + 1.0).abs() < 1e-4);
        assert_eq!(samples[2], 0.0);
    }

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let samples = samples_from_pcm16(&[0x00, 0x00, 0x12]);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn encode_decode_agree() {
        let samples = [0.0, 0.5, -0.5, 0.25];
        let fragment = encode(&samples);
        let decoded = decode(&fragment);
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn invalid_base64_decodes_to_nothing() {
        assert!(decode("not base64!").is_empty());
    }
}
