use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::TrackId;

/// A coded media sample handed to the writer.
///
/// Timestamps are ticks in the owning track's timescale. Samples for a given
/// track must arrive in non-decreasing `dts` order; the writer does not reorder.
#[derive(Debug, Clone)]
pub struct Sample {
	pub track_id: TrackId,

	/// Decode timestamp; defaults to `pts` when absent.
	pub dts: Option<u64>,

	/// Presentation timestamp.
	pub pts: u64,

	/// Duration in ticks.
	pub duration: u64,

	/// Sync (keyframe) hint; overwritten by bitstream inspection where possible.
	pub sync: bool,

	pub payload: Bytes,

	/// Wall clock capture time, used to anchor `EXT-X-PROGRAM-DATE-TIME`.
	pub timestamp: Option<DateTime<Utc>>,
}

impl Sample {
	pub fn new(track_id: TrackId, pts: u64, duration: u64, payload: Bytes) -> Self {
		Self {
			track_id,
			dts: None,
			pts,
			duration,
			sync: false,
			payload,
			timestamp: None,
		}
	}

	pub fn with_dts(mut self, dts: u64) -> Self {
		self.dts = Some(dts);
		self
	}

	pub fn with_sync(mut self, sync: bool) -> Self {
		self.sync = sync;
		self
	}

	pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
		self.timestamp = Some(timestamp);
		self
	}
}

/// A sample after normalization: payload in container layout, dts filled in,
/// sync flag set from the bitstream.
#[derive(Debug, Clone)]
pub(crate) struct MediaSample {
	pub track_id: TrackId,
	pub dts: u64,
	pub pts: u64,
	pub duration: u64,
	pub sync: bool,
	pub payload: Bytes,
	pub timestamp: Option<DateTime<Utc>>,
}

/// Rescale ticks between two timescales, rounding down.
pub(crate) fn rescale(value: u64, from: u32, to: u32) -> u64 {
	debug_assert!(from > 0);
	(value as u128 * to as u128 / from as u128) as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rescale_between_clocks() {
		assert_eq!(rescale(48_000, 48_000, 90_000), 90_000);
		assert_eq!(rescale(1024, 48_000, 1000), 21);
		assert_eq!(rescale(0, 44_100, 90_000), 0);
	}

	#[test]
	fn rescale_large_values() {
		// Hours of 90kHz ticks must not overflow the intermediate math.
		let day = 24 * 3600 * 90_000u64;
		assert_eq!(rescale(day, 90_000, 90_000), day);
	}
}
