//! Audio Codec Support
//!
//! G.711 μ-law companding for the telephony wire format and a linear
//! resampler between the wire rate and the provider rate.

/// μ-law bias added before segment search
const BIAS: i32 = 0x84;
/// Largest magnitude representable after biasing
const CLIP: i32 = 32635;

/// μ-law encoder/decoder
pub struct MulawCodec;

impl MulawCodec {
    /// Encode one linear PCM sample
    pub fn encode_sample(sample: i16) -> u8 {
        let mut pcm = sample as i32;
        let sign = if pcm < 0 {
            pcm = -pcm;
            0x80
        } else {
            0x00
        };
        if pcm > CLIP {
            pcm = CLIP;
        }
        pcm += BIAS;

        let mut exponent = 7;
        let mut mask = 0x4000;
        while exponent > 0 && pcm & mask == 0 {
            exponent -= 1;
            mask >>= 1;
        }
        let mantissa = (pcm >> (exponent + 3)) & 0x0F;
        !(sign | (exponent << 4) as i32 | mantissa) as u8
    }

    /// Decode one μ-law byte
    pub fn decode_sample(byte: u8) -> i16 {
        let byte = !byte;
        let sign = byte & 0x80;
        let exponent = ((byte >> 4) & 0x07) as i32;
        let mantissa = (byte & 0x0F) as i32;
        let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
        if sign != 0 {
            -magnitude as i16
        } else {
            magnitude as i16
        }
    }

    pub fn encode(pcm: &[i16]) -> Vec<u8> {
        pcm.iter().map(|&s| Self::encode_sample(s)).collect()
    }

    pub fn decode(mulaw: &[u8]) -> Vec<i16> {
        mulaw.iter().map(|&b| Self::decode_sample(b)).collect()
    }

    /// The μ-law byte for digital silence
    pub fn silence_byte() -> u8 {
        Self::encode_sample(0)
    }
}

/// Sample rate converter
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self { from_rate, to_rate }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resample by linear interpolation
    pub fn resample(&self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        let ratio = self.to_rate as f64 / self.from_rate as f64;
        let output_len = (input.len() as f64 * ratio).round() as usize;
        let mut output = Vec::with_capacity(output_len);

        for i in 0..output_len {
            let src_idx = i as f64 / ratio;
            let idx_floor = (src_idx.floor() as usize).min(input.len() - 1);
            let idx_ceil = (idx_floor + 1).min(input.len() - 1);
            let frac = src_idx - idx_floor as f64;

            let sample = input[idx_floor] as f64 * (1.0 - frac) + input[idx_ceil] as f64 * frac;
            output.push(sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        }

        output
    }
}

/// Resampler for a continuous stream split into arbitrary chunks.
///
/// Carries the interpolation phase and the previous chunk's last sample
/// across calls, so chunk boundaries do not shift timing when the rate ratio
/// is not a whole number.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    inner: Resampler,
    /// Position of the next output sample relative to the next chunk's
    /// first sample; -1.0 is the previous chunk's last sample
    phase: f64,
    last: Option<i16>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            inner: Resampler::new(from_rate, to_rate),
            phase: 0.0,
            last: None,
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.inner.from_rate()
    }

    /// Forget the carried phase; the next chunk starts a new stream
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.last = None;
    }

    pub fn resample(&mut self, input: &[i16]) -> Vec<i16> {
        if self.inner.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        let step = self.inner.from_rate as f64 / self.inner.to_rate as f64;
        let end = (input.len() - 1) as f64;
        let sample_at = |index: isize| -> f64 {
            if index < 0 {
                self.last.unwrap_or(input[0]) as f64
            } else {
                input[index as usize] as f64
            }
        };

        let mut output = Vec::with_capacity((input.len() as f64 / step).ceil() as usize + 1);
        let mut pos = self.phase;
        while pos <= end {
            let floor = pos.floor();
            let idx = floor as isize;
            let frac = pos - floor;
            let sample = if frac == 0.0 {
                sample_at(idx)
            } else {
                sample_at(idx) * (1.0 - frac) + sample_at(idx + 1) * frac
            };
            output.push(sample.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
            pos += step;
        }

        self.phase = pos - input.len() as f64;
        self.last = input.last().copied();
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mulaw_silence() {
        assert_eq!(MulawCodec::silence_byte(), 0xFF);
        assert_eq!(MulawCodec::decode_sample(0xFF), 0);
    }

    #[test]
    fn test_mulaw_known_values() {
        // full-scale positive and negative
        assert_eq!(MulawCodec::encode_sample(i16::MAX), 0x80);
        assert_eq!(MulawCodec::encode_sample(i16::MIN), 0x00);
        assert_eq!(MulawCodec::decode_sample(0x80), 32124);
        assert_eq!(MulawCodec::decode_sample(0x00), -32124);
    }

    #[test]
    fn test_mulaw_error_bounded() {
        // companding error grows with magnitude but stays within one quantisation step
        for &s in &[0i16, 50, -50, 1000, -1000, 8000, -8000, 30000, -30000] {
            let decoded = MulawCodec::decode_sample(MulawCodec::encode_sample(s));
            let tolerance = (s as i32).abs() / 16 + 8;
            assert!(
                (decoded as i32 - s as i32).abs() <= tolerance,
                "{} decoded as {}",
                s,
                decoded
            );
        }
    }

    #[test]
    fn test_resampler() {
        let up = Resampler::new(8000, 16000);
        let input: Vec<i16> = (0..160).map(|i| (i * 100) as i16).collect();
        let output = up.resample(&input);
        assert_eq!(output.len(), 320);
        assert_eq!(output[0], 0);
        assert_eq!(output[2], 100);
        // midpoint interpolated
        assert_eq!(output[1], 50);

        let down = Resampler::new(24000, 8000);
        assert_eq!(down.resample(&vec![0i16; 480]).len(), 160);
    }

    #[test]
    fn test_stream_resampler_keeps_phase_across_chunks() {
        // 12kHz -> 8kHz, fed in uneven chunks
        let input: Vec<i16> = (0..1200).map(|i| ((i % 200) * 50) as i16).collect();
        let mut whole = StreamResampler::new(12000, 8000);
        let expected = whole.resample(&input);

        let mut chunked = StreamResampler::new(12000, 8000);
        let mut output = Vec::new();
        for chunk in input.chunks(125) {
            output.extend(chunked.resample(chunk));
        }
        assert_eq!(output, expected);
        assert_eq!(output.len(), 800);
    }

    #[test]
    fn test_stream_resampler_upsamples_across_boundary() {
        let mut up = StreamResampler::new(8000, 16000);
        assert_eq!(up.resample(&[0, 100]), vec![0, 50, 100]);
        // the sample between chunks interpolates from the previous chunk
        assert_eq!(up.resample(&[200, 300]), vec![150, 200, 250, 300]);

        up.reset();
        assert_eq!(up.resample(&[400]), vec![400]);
    }

    #[test]
    fn test_resampler_passthrough() {
        let r = Resampler::new(8000, 8000);
        assert!(r.is_passthrough());
        assert_eq!(r.resample(&[1, 2, 3]), vec![1, 2, 3]);
    }
}
