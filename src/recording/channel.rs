//! Recording channels and their signal types.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::chunk::RecordingChunk;
use crate::error::{ScanError, ScanResult};

/// Highest free variable that can be sampled.
pub const MAX_FREE_VARIABLE: u32 = 7;

/// Signal sampled by a recording channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    /// Laser on signal.
    LaserOn,
    /// Scan head X position feedback
    CurrentXRaw,
    /// Scan head Y position feedback
    CurrentYRaw,
    /// Scan head Z position feedback
    CurrentZRaw,
    /// Commanded X position after correction
    TargetX,
    /// Commanded Y position after correction
    TargetY,
    /// Commanded Z position after correction
    TargetZ,
    /// Free variable `n` of the list
    FreeVariable(u32),
    /// Sample counter
    Timestamp,
}

impl ChannelType {
    /// Signal number programmed into the trigger.
    pub fn signal_code(self) -> u32 {
        match self {
            ChannelType::LaserOn => 0,
            ChannelType::CurrentXRaw => 1,
            ChannelType::CurrentYRaw => 2,
            ChannelType::CurrentZRaw => 3,
            ChannelType::TargetX => 7,
            ChannelType::TargetY => 8,
            ChannelType::TargetZ => 9,
            ChannelType::FreeVariable(n) => 32 + n,
            ChannelType::Timestamp => 52,
        }
    }

    /// Whether the scan head must report its position for this signal.
    pub fn requires_head_feedback(self) -> bool {
        matches!(
            self,
            ChannelType::CurrentXRaw | ChannelType::CurrentYRaw | ChannelType::CurrentZRaw
        )
    }

    fn validate(self) -> ScanResult<Self> {
        match self {
            ChannelType::FreeVariable(n) if n > MAX_FREE_VARIABLE => Err(ScanError::InvalidParameter(
                format!("free variable {n} cannot be recorded"),
            )),
            other => Ok(other),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::LaserOn => f.write_str("laser-on"),
            ChannelType::CurrentXRaw => f.write_str("current-x-raw"),
            ChannelType::CurrentYRaw => f.write_str("current-y-raw"),
            ChannelType::CurrentZRaw => f.write_str("current-z-raw"),
            ChannelType::TargetX => f.write_str("target-x"),
            ChannelType::TargetY => f.write_str("target-y"),
            ChannelType::TargetZ => f.write_str("target-z"),
            ChannelType::FreeVariable(n) => write!(f, "free-variable-{n}"),
            ChannelType::Timestamp => f.write_str("timestamp"),
        }
    }
}

/// Lower-case a channel name and check it against `[a-z0-9_-]+`.
pub fn normalize_channel_name(name: &str) -> ScanResult<String> {
    let normalized = name.to_ascii_lowercase();
    let valid = !normalized.is_empty()
        && normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !valid {
        return Err(ScanError::InvalidChannelName(name.to_string()));
    }
    Ok(normalized)
}

/// Samples of one hardware channel, stored in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct RecordingChannel {
    name: String,
    channel_id: u32,
    channel_type: ChannelType,
    chunk_size: usize,
    chunks: Vec<RecordingChunk>,
    record_count: u64,
}

impl RecordingChannel {
    pub(crate) fn new(name: String, channel_id: u32, channel_type: ChannelType, chunk_size: usize) -> ScanResult<Self> {
        Ok(Self {
            name,
            channel_id,
            channel_type: channel_type.validate()?,
            chunk_size,
            chunks: Vec::new(),
            record_count: 0,
        })
    }

    /// Normalized channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hardware channel, 1 to 8.
    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    /// Signal this channel samples.
    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// Samples stored so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Append up to `count` zeroed records and return them for filling.
    ///
    /// The returned slice never crosses a chunk boundary, so it may be shorter
    /// than `count`.
    pub(crate) fn reserve(&mut self, count: usize) -> ScanResult<&mut [i32]> {
        if count == 0 || count > self.chunk_size {
            return Err(ScanError::InvalidParameter(format!(
                "cannot reserve {count} records in chunks of {}",
                self.chunk_size
            )));
        }
        if self.chunks.last().map_or(true, RecordingChunk::is_full) {
            self.chunks
                .push(RecordingChunk::new(self.record_count, self.chunk_size));
        }
        let chunk = self.chunks.last_mut().ok_or(ScanError::ChunkFull)?;
        let slots = chunk.reserve(count)?;
        self.record_count += slots.len() as u64;
        Ok(slots)
    }

    /// Append `values`, starting new chunks as needed.
    pub(crate) fn append(&mut self, values: &[i32]) -> ScanResult<()> {
        let mut rest = values;
        while !rest.is_empty() {
            let slots = self.reserve(rest.len().min(self.chunk_size))?;
            let filled = slots.len();
            slots.copy_from_slice(&rest[..filled]);
            rest = &rest[filled..];
        }
        Ok(())
    }

    /// Record at `index`.
    pub fn record(&self, index: u64) -> ScanResult<i32> {
        let out_of_range = || ScanError::RecordIndexOutOfRange {
            index,
            count: self.record_count,
        };
        if index >= self.record_count {
            return Err(out_of_range());
        }
        let chunk = usize::try_from(index / self.chunk_size as u64).map_err(|_| out_of_range())?;
        self.chunks
            .get(chunk)
            .and_then(|chunk| chunk.get(index))
            .ok_or_else(out_of_range)
    }

    /// Copy every record into `buffer`; returns the number copied.
    pub fn copy_all(&self, buffer: &mut [i32]) -> ScanResult<usize> {
        let count = self.record_count as usize;
        if buffer.len() < count {
            return Err(ScanError::BufferTooSmall {
                required: count,
                provided: buffer.len(),
            });
        }
        let mut offset = 0;
        for chunk in &self.chunks {
            let values = chunk.values();
            buffer[offset..offset + values.len()].copy_from_slice(values);
            offset += values.len();
        }
        Ok(offset)
    }

    /// All records in order.
    pub fn values(&self) -> Vec<i32> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.values().iter().copied())
            .collect()
    }

    /// All records as `value * scale + offset`.
    pub fn scaled(&self, scale: f64, offset: f64) -> Vec<f64> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.values().iter())
            .map(|&value| value as f64 * scale + offset)
            .collect()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.record_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(channel: &mut RecordingChannel, values: &[i32]) {
        let mut rest = values;
        while !rest.is_empty() {
            let slots = channel.reserve(rest.len().min(4)).unwrap();
            let n = slots.len();
            slots.copy_from_slice(&rest[..n]);
            rest = &rest[n..];
        }
    }

    #[test]
    fn test_normalize_channel_name() {
        assert_eq!(normalize_channel_name("Target_X-1").unwrap(), "target_x-1");
        assert!(matches!(
            normalize_channel_name("x pos"),
            Err(ScanError::InvalidChannelName(_))
        ));
        assert!(normalize_channel_name("").is_err());
    }

    #[test]
    fn test_records_across_chunks() {
        let mut channel = RecordingChannel::new("x".into(), 1, ChannelType::TargetX, 4).unwrap();
        let values: Vec<i32> = (0..10).collect();
        fill(&mut channel, &values);
        assert_eq!(channel.record_count(), 10);
        assert_eq!(channel.record(5).unwrap(), 5);
        assert_eq!(channel.record(9).unwrap(), 9);
        assert!(matches!(
            channel.record(10),
            Err(ScanError::RecordIndexOutOfRange { index: 10, count: 10 })
        ));
        assert_eq!(channel.values(), values);
    }

    #[test]
    fn test_copy_all_checks_buffer() {
        let mut channel = RecordingChannel::new("x".into(), 1, ChannelType::LaserOn, 4).unwrap();
        fill(&mut channel, &[1, 2, 3]);
        let mut small = [0; 2];
        assert!(matches!(
            channel.copy_all(&mut small),
            Err(ScanError::BufferTooSmall { required: 3, provided: 2 })
        ));
        let mut buffer = [0; 5];
        assert_eq!(channel.copy_all(&mut buffer).unwrap(), 3);
        assert_eq!(&buffer[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_scaled_values() {
        let mut channel = RecordingChannel::new("p".into(), 2, ChannelType::FreeVariable(1), 4).unwrap();
        fill(&mut channel, &[0, 10]);
        assert_eq!(channel.scaled(0.5, 1.0), vec![1.0, 6.0]);
        assert_eq!(ChannelType::FreeVariable(1).signal_code(), 33);
    }

    #[test]
    fn test_free_variable_range() {
        assert!(RecordingChannel::new("v".into(), 1, ChannelType::FreeVariable(8), 4).is_err());
    }
}
