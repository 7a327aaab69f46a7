mod master;
mod media;

pub(crate) use master::*;
pub(crate) use media::*;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::trace;

/// A partial segment visible in the playlist.
#[derive(Debug, Clone)]
pub struct Part {
	pub uri: String,
	/// Seconds.
	pub duration: f64,
	/// Index within the parent segment.
	pub index: usize,
}

/// A finished segment visible in the playlist.
#[derive(Debug, Clone)]
pub struct Segment {
	/// Monotonically increasing; equals the media sequence number of this entry.
	pub index: u64,
	pub uri: String,
	/// Payload size in bytes.
	pub size: u64,
	/// Seconds.
	pub duration: f64,
	/// Wall clock of the first sample, for `EXT-X-PROGRAM-DATE-TIME`.
	pub timestamp: Option<DateTime<Utc>>,
	/// Init header this segment (and its successors) decode with.
	pub media_init: Option<String>,
	pub discontinuity: bool,
	pub parts: Vec<Part>,
}

/// What fell out of the window on `add_segment`.
pub(crate) struct Evicted {
	/// The segment whose storage object should now be deleted.
	pub segment: Option<Segment>,
}

/// Low-latency retention: only this many of the newest segments keep their
/// parts listed in the playlist.
const PART_RETENTION: usize = 3;

/// The sliding window of segments and parts for one variant.
pub(crate) struct Playlist {
	/// 0 disables eviction (VOD).
	max_segments: usize,

	segments: VecDeque<Segment>,

	/// Parts of the open (not yet finished) segment.
	pending_parts: Vec<Part>,

	media_sequence: u64,
	discontinuity_sequence: u64,

	/// ceil(max segment duration) in seconds.
	target_duration: u64,

	/// max part duration in seconds.
	part_target: f64,

	/// Uri the next appended segment decodes with.
	init_uri: Option<String>,

	/// The next appended segment starts a discontinuity.
	next_discontinuity: bool,
}

impl Playlist {
	pub fn new(max_segments: usize) -> Self {
		Self {
			max_segments,
			segments: VecDeque::new(),
			pending_parts: Vec::new(),
			media_sequence: 0,
			discontinuity_sequence: 0,
			target_duration: 0,
			part_target: 0.0,
			init_uri: None,
			next_discontinuity: false,
		}
	}

	/// The next appended segment inherits this uri; a previous pending uri is replaced.
	pub fn add_init_header(&mut self, uri: String) {
		self.init_uri = Some(uri);
	}

	/// Append a part to the open segment.
	pub fn add_part(&mut self, uri: String, duration: f64) {
		if duration > self.part_target {
			self.part_target = duration;
		}

		let index = self.pending_parts.len();
		self.pending_parts.push(Part { uri, duration, index });
	}

	/// Mark the next appended segment as a discontinuity.
	pub fn add_discontinuity(&mut self) {
		self.next_discontinuity = true;
	}

	/// Append a finished segment, collecting pending parts and rolling the window.
	pub fn add_segment(&mut self, mut segment: Segment) -> Evicted {
		debug_assert_eq!(segment.index, self.next_index());

		segment.parts = std::mem::take(&mut self.pending_parts);
		segment.media_init = self.init_uri.take();
		segment.discontinuity = std::mem::take(&mut self.next_discontinuity);

		let ceil = segment.duration.ceil() as u64;
		if ceil > self.target_duration {
			self.target_duration = ceil;
		}

		self.segments.push_back(segment);

		let mut evicted = Evicted { segment: None };

		if self.max_segments > 0 && self.segments.len() > self.max_segments {
			let discarded = self.segments.pop_front().expect("window is non-empty");
			self.media_sequence += 1;

			if let Some(oldest) = self.segments.front_mut() {
				// The init header outlives its first segment.
				if oldest.media_init.is_none() {
					oldest.media_init = discarded.media_init.clone();
				}

				// The discontinuity tag between the discarded segment and this
				// one just scrolled out.
				if oldest.discontinuity {
					oldest.discontinuity = false;
					self.discontinuity_sequence += 1;
				}
			}

			evicted.segment = Some(discarded);
		}

		// Parts older than the retention window disappear from the playlist;
		// their bytes stay implicit in the parent segment.
		let prune = self.segments.len().saturating_sub(PART_RETENTION);
		for segment in self.segments.iter_mut().take(prune) {
			if !segment.parts.is_empty() {
				trace!(index = segment.index, parts = segment.parts.len(), "pruning parts");
				segment.parts.clear();
			}
		}

		evicted
	}

	/// `(segment msn, part index)` of the most recent part, for `EXT-X-RENDITION-REPORT`.
	pub fn last_part(&self) -> Option<(u64, u64)> {
		if let Some(part) = self.pending_parts.last() {
			return Some((self.next_index(), part.index as u64));
		}

		self.segments
			.iter()
			.rev()
			.find(|segment| !segment.parts.is_empty())
			.map(|segment| (segment.index, segment.parts.len() as u64 - 1))
	}

	/// `(average, peak)` bits per second over the current window.
	pub fn bandwidth(&self) -> (u64, u64) {
		let mut bytes = 0u64;
		let mut duration = 0f64;
		let mut peak = 0f64;

		for segment in &self.segments {
			bytes += segment.size;
			duration += segment.duration;

			if segment.duration > 0.0 {
				let bps = segment.size as f64 * 8.0 / segment.duration;
				if bps > peak {
					peak = bps;
				}
			}
		}

		let average = if duration > 0.0 {
			(bytes as f64 * 8.0 / duration) as u64
		} else {
			0
		};

		(average.max(1), (peak as u64).max(1))
	}

	/// Index the next appended segment will take.
	pub fn next_index(&self) -> u64 {
		self.media_sequence + self.segments.len() as u64
	}

	pub fn segments(&self) -> impl Iterator<Item = &Segment> {
		self.segments.iter()
	}

	pub fn pending_parts(&self) -> &[Part] {
		&self.pending_parts
	}

	pub fn media_sequence(&self) -> u64 {
		self.media_sequence
	}

	pub fn discontinuity_sequence(&self) -> u64 {
		self.discontinuity_sequence
	}

	pub fn target_duration(&self) -> u64 {
		self.target_duration
	}

	pub fn part_target(&self) -> f64 {
		self.part_target
	}

	pub fn is_empty(&self) -> bool {
		self.segments.is_empty() && self.pending_parts.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn segment(index: u64, duration: f64, size: u64) -> Segment {
		Segment {
			index,
			uri: format!("segment_{}.m4s", index),
			size,
			duration,
			timestamp: None,
			media_init: None,
			discontinuity: false,
			parts: Vec::new(),
		}
	}

	#[test]
	fn test_window_and_sequences() {
		let mut playlist = Playlist::new(3);
		playlist.add_init_header("init_0.mp4".into());

		for index in 0..5 {
			let evicted = playlist.add_segment(segment(index, 2.0, 1000));
			let expect_evicted = index >= 3;
			assert_eq!(evicted.segment.is_some(), expect_evicted);
		}

		assert_eq!(playlist.media_sequence(), 2);
		assert_eq!(playlist.segments().count(), 3);
		assert_eq!(playlist.target_duration(), 2);

		// The init reference migrated to the current oldest segment.
		let oldest = playlist.segments().next().unwrap();
		assert_eq!(oldest.index, 2);
		assert_eq!(oldest.media_init.as_deref(), Some("init_0.mp4"));

		// Positions line up with indices.
		for (position, segment) in playlist.segments().enumerate() {
			assert_eq!(playlist.media_sequence() + position as u64, segment.index);
		}
	}

	#[test]
	fn test_discontinuity_sequence() {
		let mut playlist = Playlist::new(3);

		playlist.add_segment(segment(0, 2.0, 1000));
		playlist.add_discontinuity();
		playlist.add_segment(segment(1, 2.0, 1000));
		assert!(playlist.segments().nth(1).unwrap().discontinuity);

		playlist.add_segment(segment(2, 2.0, 1000));
		assert_eq!(playlist.discontinuity_sequence(), 0);

		// Evicting segment 0 makes the marked segment oldest; the tag scrolls out.
		playlist.add_segment(segment(3, 2.0, 1000));
		assert_eq!(playlist.discontinuity_sequence(), 1);
		assert!(!playlist.segments().next().unwrap().discontinuity);
	}

	#[test]
	fn test_part_retention() {
		let mut playlist = Playlist::new(6);

		for index in 0..5 {
			playlist.add_part(format!("segment_{}_part_0.m4s", index), 0.3);
			playlist.add_part(format!("segment_{}_part_1.m4s", index), 0.3);
			playlist.add_segment(segment(index, 2.0, 1000));
		}

		let with_parts: Vec<u64> = playlist
			.segments()
			.filter(|segment| !segment.parts.is_empty())
			.map(|segment| segment.index)
			.collect();
		assert_eq!(with_parts, vec![2, 3, 4]);
	}

	#[test]
	fn test_last_part() {
		let mut playlist = Playlist::new(6);

		assert_eq!(playlist.last_part(), None);

		playlist.add_part("segment_0_part_0.m4s".into(), 0.3);
		playlist.add_part("segment_0_part_1.m4s".into(), 0.3);
		assert_eq!(playlist.last_part(), Some((0, 1)));

		playlist.add_segment(segment(0, 2.0, 1000));
		assert_eq!(playlist.last_part(), Some((0, 1)));

		playlist.add_part("segment_1_part_0.m4s".into(), 0.3);
		assert_eq!(playlist.last_part(), Some((1, 0)));
	}

	#[test]
	fn test_bandwidth() {
		let mut playlist = Playlist::new(0);

		playlist.add_segment(segment(0, 2.0, 1000));
		playlist.add_segment(segment(1, 2.0, 3000));

		let (average, peak) = playlist.bandwidth();
		assert_eq!(average, 8000);
		assert_eq!(peak, 12000);
	}
}
