//! Linear-interpolation sample rate conversion.

use async_trait::async_trait;

use crate::error::{PipelineError, StageError};
use crate::format::{bytes_to_samples, samples_to_bytes, StreamFormat};
use crate::stage::Transform;

/// Converts 16-bit PCM between sample rates by linear interpolation.
///
/// The conversion ratio is held as `src_rate / dst_rate` and the fractional
/// read position carries across calls, so block boundaries introduce no
/// drift: feeding a stream block-by-block yields the same samples as feeding
/// it whole. When `src_rate == dst_rate` the output is bit-exact.
///
/// As a [`Transform`] the resampler accepts blocks split at any byte
/// offset: the ring queue is byte-granular, so a block may end mid-frame.
/// The dangling bytes of a partial frame carry to the next call; no sample
/// is dropped and interleaved channels never shift.
///
/// Down-sampling applies no low-pass filter first, so input energy above
/// the target Nyquist frequency aliases into the output.
pub struct Resampler {
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    /// Fractional read position left over from the previous block, in
    /// source frames. Always in `[0, step)`.
    phase: f64,
    /// Bytes of an incomplete trailing frame, held until the rest arrives.
    carry: Vec<u8>,
}

impl Resampler {
    /// Creates a resampler for interleaved 16-bit PCM.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if either rate or the
    /// channel count is zero.
    pub fn new(src_rate: u32, dst_rate: u32, channels: u16) -> Result<Self, PipelineError> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(PipelineError::invalid_config("sample rate is zero"));
        }
        if channels == 0 {
            return Err(PipelineError::invalid_config("channel count is zero"));
        }
        Ok(Self {
            src_rate,
            dst_rate,
            channels: channels as usize,
            phase: 0.0,
            carry: Vec::new(),
        })
    }

    /// Source frames consumed per output frame.
    fn step(&self) -> f64 {
        self.src_rate as f64 / self.dst_rate as f64
    }

    /// Output frames the next block of `in_frames` will produce.
    pub fn output_frames(&self, in_frames: usize) -> usize {
        if self.src_rate == self.dst_rate {
            return in_frames;
        }
        let remaining = in_frames as f64 - self.phase;
        if remaining <= 0.0 {
            return 0;
        }
        (remaining / self.step()).ceil() as usize
    }

    /// Resamples one block of interleaved samples into `output`.
    ///
    /// Returns the number of frames written. `output` must hold at least
    /// [`output_frames`](Self::output_frames) frames or the tail of the
    /// block is dropped.
    pub fn resample(&mut self, input: &[i16], output: &mut [i16]) -> usize {
        if self.src_rate == self.dst_rate {
            let n = input.len().min(output.len()) / self.channels * self.channels;
            output[..n].copy_from_slice(&input[..n]);
            return n / self.channels;
        }

        let in_frames = input.len() / self.channels;
        if in_frames == 0 {
            return 0;
        }
        let cap_frames = output.len() / self.channels;
        let step = self.step();
        let mut pos = self.phase;
        let mut written = 0;

        while written < cap_frames && pos < in_frames as f64 {
            let idx = pos as usize;
            let frac = pos - idx as f64;
            // The last frame interpolates against itself rather than
            // reaching past the block.
            let next = (idx + 1).min(in_frames - 1);
            for ch in 0..self.channels {
                let a = input[idx * self.channels + ch] as f64;
                let b = input[next * self.channels + ch] as f64;
                output[written * self.channels + ch] = (a + (b - a) * frac).round() as i16;
            }
            written += 1;
            pos += step;
        }

        self.phase = (pos - in_frames as f64).max(0.0);
        written
    }
}

#[async_trait]
impl Transform for Resampler {
    fn name(&self) -> &str {
        "resample"
    }

    async fn process(&mut self, input: &[u8]) -> Result<Vec<u8>, StageError> {
        let frame_bytes = 2 * self.channels;
        let mut block = std::mem::take(&mut self.carry);
        block.extend_from_slice(input);
        let usable = block.len() - block.len() % frame_bytes;
        self.carry = block.split_off(usable);
        if block.is_empty() {
            return Ok(Vec::new());
        }

        let samples = bytes_to_samples(&block);
        let in_frames = samples.len() / self.channels;
        let mut out = vec![0i16; (self.output_frames(in_frames) + 1) * self.channels];
        let frames = self.resample(&samples, &mut out);
        out.truncate(frames * self.channels);
        Ok(samples_to_bytes(&out))
    }

    fn output_format(&self) -> Option<StreamFormat> {
        Some(StreamFormat::pcm16(self.dst_rate, self.channels as u16))
    }
}
