//! Audio frame types
//!
//! Frames carry signed 16-bit linear PCM. The telephony wire format (μ-law)
//! lives in the transport crate; everything past the codec sees PCM only.

use serde::{Deserialize, Serialize};

/// Direction of an audio frame relative to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Caller to agent
    Inbound,
    /// Agent to caller
    Outbound,
}

/// Fixed-duration chunk of mono PCM audio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Monotonic sequence number within a call and direction
    pub sequence: u64,

    /// Which way the frame travels
    pub direction: Direction,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// PCM samples
    pub samples: Vec<i16>,

    /// Offset from stream start in milliseconds
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Create a new frame
    pub fn new(
        sequence: u64,
        direction: Direction,
        sample_rate: u32,
        samples: Vec<i16>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            sequence,
            direction,
            sample_rate,
            samples,
            timestamp_ms,
        }
    }

    /// Create a frame of silence lasting `duration_ms`
    pub fn silence(direction: Direction, sample_rate: u32, duration_ms: u32) -> Self {
        let len = samples_for(sample_rate, duration_ms);
        Self::new(0, direction, sample_rate, vec![0; len], 0)
    }

    /// Set the sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the stream timestamp
    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the frame carries no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian PCM16 bytes, the layout speech providers expect
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Parse little-endian PCM16 bytes. A trailing odd byte is ignored.
    pub fn samples_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Root-mean-square energy in dBFS
    pub fn energy_db(&self) -> f32 {
        if self.samples.is_empty() {
            return f32::NEG_INFINITY;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let v = s as f64 / 32768.0;
                v * v
            })
            .sum();
        let rms = (sum / self.samples.len() as f64).sqrt();
        if rms <= 0.0 {
            f32::NEG_INFINITY
        } else {
            (20.0 * rms.log10()) as f32
        }
    }
}

/// Number of samples in `duration_ms` of audio at `sample_rate`
pub fn samples_for(sample_rate: u32, duration_ms: u32) -> usize {
    (sample_rate as usize * duration_ms as usize) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_frame_size() {
        let frame = AudioFrame::silence(Direction::Outbound, 8000, 20);
        assert_eq!(frame.len(), 160);
        assert_eq!(frame.duration_ms(), 20);
        assert_eq!(frame.energy_db(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_le_bytes() {
        let frame = AudioFrame::new(1, Direction::Inbound, 16000, vec![1, -2, 300], 0);
        let bytes = frame.to_le_bytes();
        assert_eq!(bytes.len(), 6);
        assert_eq!(AudioFrame::samples_from_le_bytes(&bytes), vec![1, -2, 300]);

        // odd trailing byte dropped
        assert_eq!(AudioFrame::samples_from_le_bytes(&[1, 0, 7]), vec![1]);
    }

    #[test]
    fn test_energy() {
        let loud = AudioFrame::new(0, Direction::Inbound, 8000, vec![16384; 160], 0);
        let db = loud.energy_db();
        assert!((db - -6.02).abs() < 0.1, "got {}", db);
    }
}
