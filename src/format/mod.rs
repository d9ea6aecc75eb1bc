//! Stream format description and PCM block helpers.

mod resample;

pub use resample::Resampler;

/// Describes the PCM format of the data flowing through a queue.
///
/// Queues carry raw little-endian bytes; the format travels out-of-band, as
/// a stage property reported on the event bus, never inside the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bits per sample.
    pub bit_width: u16,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl StreamFormat {
    /// Convenience constructor for 16-bit PCM.
    pub fn pcm16(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            bit_width: 16,
            channels,
        }
    }

    /// Bytes per frame (one sample across all channels).
    pub fn frame_bytes(&self) -> usize {
        (self.bit_width as usize / 8) * self.channels as usize
    }
}

/// Reinterprets a little-endian byte block as 16-bit samples.
///
/// A trailing odd byte, which cannot occur on an aligned stream, is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serializes 16-bit samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes() {
        assert_eq!(StreamFormat::pcm16(44100, 1).frame_bytes(), 2);
        assert_eq!(StreamFormat::pcm16(48000, 2).frame_bytes(), 4);
    }

    #[test]
    fn test_sample_byte_round_trip() {
        let samples = vec![0i16, -1, 32767, -32768, 256];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_trailing_odd_byte_ignored() {
        let samples = bytes_to_samples(&[0x01, 0x00, 0xFF]);
        assert_eq!(samples, vec![1]);
    }
}
