use std::collections::VecDeque;

use crate::model::{rescale, MediaSample};

/// Addresses a track across the variants sharing one queue.
///
/// Track ids are only unique per variant, so the variant index is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrackKey {
	pub variant: usize,
	pub track: u32,
}

/// What the caller must do with the queue's output, in order.
#[derive(Debug)]
pub(crate) enum QueueAction {
	/// Forward the sample to the owning variant's muxer.
	Sample(TrackKey, MediaSample),

	/// Close the current segment on every variant sharing this queue.
	Flush,
}

/// Aligns multi-track samples so that a segment boundary happens on a
/// lead-track sync sample, only after every other track has produced enough
/// samples to cover up to that boundary.
pub(crate) struct SampleQueue {
	tracks: Vec<TrackQueue>,
	lead: Option<usize>,
	target_ms: u64,

	/// Target segment duration in lead-track ticks.
	target_ticks: u64,

	/// The dts of the last lead sample handed to the muxer, in lead ticks.
	last_timestamp: Option<u64>,
}

struct TrackQueue {
	key: TrackKey,
	timescale: u32,
	video: bool,
	buffered: VecDeque<MediaSample>,
	duration: u64,
	buffering: bool,
	last_dts: Option<u64>,
}

impl SampleQueue {
	pub fn new(target_ms: u64) -> Self {
		Self {
			tracks: Vec::new(),
			lead: None,
			target_ms,
			target_ticks: 0,
			last_timestamp: None,
		}
	}

	/// Register a track. The first video track leads; without video the first
	/// track added does.
	pub fn add_track(&mut self, key: TrackKey, timescale: u32, video: bool) {
		self.tracks.push(TrackQueue {
			key,
			timescale,
			video,
			buffered: VecDeque::new(),
			duration: 0,
			buffering: false,
			last_dts: None,
		});

		let promote = match self.lead {
			None => true,
			Some(lead) => video && !self.tracks[lead].video,
		};

		if promote {
			self.lead = Some(self.tracks.len() - 1);
			self.target_ticks = self.target_ms * timescale as u64 / 1000;
		}
	}

	fn lead_timescale(&self) -> u32 {
		self.lead.map(|lead| self.tracks[lead].timescale).unwrap_or(1)
	}

	fn index(&self, key: TrackKey) -> usize {
		self.tracks
			.iter()
			.position(|track| track.key == key)
			.unwrap_or_else(|| panic!("unknown track: {:?}", key))
	}

	pub fn push(&mut self, key: TrackKey, sample: MediaSample) -> Vec<QueueAction> {
		let index = self.index(key);

		let track = &mut self.tracks[index];
		if let Some(last) = track.last_dts {
			assert!(sample.dts >= last, "out of order dts on track {:?}", key);
		}
		track.last_dts = Some(sample.dts);

		let mut actions = Vec::new();
		if Some(index) == self.lead {
			self.push_lead(sample, &mut actions);
		} else {
			self.push_other(index, sample, &mut actions);
		}

		actions
	}

	fn push_lead(&mut self, sample: MediaSample, actions: &mut Vec<QueueAction>) {
		let lead = self.lead.expect("lead exists");

		if self.tracks[lead].buffering {
			// A boundary is pending; everything stays queued until the other
			// tracks catch up.
			self.tracks[lead].duration += sample.duration;
			self.tracks[lead].buffered.push_back(sample);
			return;
		}

		let new_segment = sample.sync && self.tracks[lead].duration >= self.target_ticks;

		if new_segment && self.tracks.len() > 1 && !self.others_have_buffered() {
			let track = &mut self.tracks[lead];
			track.buffering = true;
			track.duration = sample.duration;
			track.buffered.push_back(sample);
			return;
		}

		let key = self.tracks[lead].key;

		if new_segment {
			self.drain_others(sample.dts, false, actions);
			actions.push(QueueAction::Flush);

			self.tracks[lead].duration = sample.duration;
			self.last_timestamp = Some(sample.dts);
			actions.push(QueueAction::Sample(key, sample));
		} else {
			self.tracks[lead].duration += sample.duration;
			let last = sample.dts;
			self.last_timestamp = Some(last);
			actions.push(QueueAction::Sample(key, sample));
			self.drain_others(last, true, actions);
		}
	}

	fn push_other(&mut self, index: usize, sample: MediaSample, actions: &mut Vec<QueueAction>) {
		let timescale = self.tracks[index].timescale;
		let mapped = rescale(sample.dts, timescale, self.lead_timescale());

		// Samples at or below the last muxed lead timestamp belong to the
		// segment already being written.
		if self.last_timestamp.map(|last| mapped <= last).unwrap_or(false) {
			let key = self.tracks[index].key;
			actions.push(QueueAction::Sample(key, sample));
			return;
		}

		self.tracks[index].buffered.push_back(sample);

		let buffering = self.lead.map(|lead| self.tracks[lead].buffering).unwrap_or(false);
		if buffering && self.others_have_buffered() {
			self.catch_up(actions);
		}
	}

	// The lead buffered a boundary sample and every other track finally has
	// data: close the old segment and replay the queued lead samples.
	fn catch_up(&mut self, actions: &mut Vec<QueueAction>) {
		let lead = self.lead.expect("lead exists");
		let key = self.tracks[lead].key;

		let boundary = match self.tracks[lead].buffered.front() {
			Some(sample) => sample.dts,
			None => return,
		};

		self.drain_others(boundary, false, actions);
		actions.push(QueueAction::Flush);

		let mut last = boundary;
		while let Some(sample) = self.tracks[lead].buffered.pop_front() {
			last = sample.dts;
			actions.push(QueueAction::Sample(key, sample));
		}

		self.tracks[lead].buffering = false;
		self.last_timestamp = Some(last);
		self.drain_others(last, true, actions);
	}

	/// Drain buffered non-lead samples mapped below `limit` lead ticks
	/// (at or below, when `inclusive`).
	fn drain_others(&mut self, limit: u64, inclusive: bool, actions: &mut Vec<QueueAction>) {
		let lead = self.lead;
		let lead_timescale = self.lead_timescale();

		for index in 0..self.tracks.len() {
			if Some(index) == lead {
				continue;
			}

			loop {
				let track = &mut self.tracks[index];
				let mapped = match track.buffered.front() {
					Some(sample) => rescale(sample.dts, track.timescale, lead_timescale),
					None => break,
				};

				let below = if inclusive { mapped <= limit } else { mapped < limit };
				if !below {
					break;
				}

				let sample = track.buffered.pop_front().expect("front exists");
				actions.push(QueueAction::Sample(track.key, sample));
			}
		}
	}

	fn others_have_buffered(&self) -> bool {
		let lead = self.lead;
		self.tracks
			.iter()
			.enumerate()
			.filter(|(index, _)| Some(*index) != lead)
			.all(|(_, track)| !track.buffered.is_empty())
	}

	/// Drain every queue irrespective of the target duration, ending with a flush.
	pub fn flush(&mut self) -> Vec<QueueAction> {
		let mut actions = Vec::new();

		if let Some(lead) = self.lead {
			let key = self.tracks[lead].key;
			while let Some(sample) = self.tracks[lead].buffered.pop_front() {
				self.last_timestamp = Some(sample.dts);
				actions.push(QueueAction::Sample(key, sample));
			}
			self.tracks[lead].buffering = false;
			self.tracks[lead].duration = 0;
		}

		for track in &mut self.tracks {
			while let Some(sample) = track.buffered.pop_front() {
				actions.push(QueueAction::Sample(track.key, sample));
			}
		}

		actions.push(QueueAction::Flush);
		actions
	}

	/// Forget all buffered state and timestamps, e.g. across a discontinuity
	/// where the caller may restart its timeline.
	pub fn reset(&mut self) {
		self.last_timestamp = None;
		for track in &mut self.tracks {
			track.buffered.clear();
			track.duration = 0;
			track.buffering = false;
			track.last_dts = None;
		}
	}
}

#[cfg(test)]
mod tests {
	use bytes::Bytes;

	use super::*;

	fn key(track: u32) -> TrackKey {
		TrackKey { variant: 0, track }
	}

	fn sample(track: u32, dts: u64, duration: u64, sync: bool) -> MediaSample {
		MediaSample {
			track_id: track,
			dts,
			pts: dts,
			duration,
			sync,
			payload: Bytes::from_static(&[0]),
			timestamp: None,
		}
	}

	fn samples(actions: &[QueueAction]) -> Vec<(u32, u64)> {
		actions
			.iter()
			.filter_map(|action| match action {
				QueueAction::Sample(key, sample) => Some((key.track, sample.dts)),
				QueueAction::Flush => None,
			})
			.collect()
	}

	fn flush_count(actions: &[QueueAction]) -> usize {
		actions.iter().filter(|action| matches!(action, QueueAction::Flush)).count()
	}

	#[test]
	fn test_single_track_boundaries() {
		// 2s target at 90kHz, sync every 30 frames of 3000 ticks.
		let mut queue = SampleQueue::new(2000);
		queue.add_track(key(1), 90_000, true);

		let mut flushes = 0;
		for i in 0..120u64 {
			let actions = queue.push(key(1), sample(1, i * 3000, 3000, i % 30 == 0));
			flushes += flush_count(&actions);
		}

		// Boundaries at samples 60 (180000 ticks = 2s) and... the next sync
		// after another 2s, sample 120 is never pushed, so exactly one flush.
		assert_eq!(flushes, 1);
	}

	#[test]
	fn test_non_lead_waits_for_lead() {
		let mut queue = SampleQueue::new(2000);
		queue.add_track(key(1), 90_000, true);
		queue.add_track(key(2), 48_000, false);

		// Audio ahead of any video stays buffered.
		let actions = queue.push(key(2), sample(2, 0, 1024, true));
		assert!(samples(&actions).is_empty());

		// Video catches up and releases it.
		let actions = queue.push(key(1), sample(1, 3000, 3000, true));
		assert_eq!(samples(&actions), vec![(1, 3000), (2, 0)]);
	}

	#[test]
	fn test_boundary_waits_for_audio() {
		let mut queue = SampleQueue::new(1000);
		queue.add_track(key(1), 90_000, true);
		queue.add_track(key(2), 90_000, false);

		// One second of video, with audio interleaved.
		for i in 0..30u64 {
			queue.push(key(1), sample(1, i * 3000, 3000, i == 0));
			queue.push(key(2), sample(2, i * 3000, 3000, true));
		}

		// The sync sample at the target boundary has no audio buffered, so the
		// queue holds it back.
		let actions = queue.push(key(1), sample(1, 90_000, 3000, true));
		assert_eq!(flush_count(&actions), 0);
		assert!(samples(&actions).is_empty());

		// Audio up to the boundary flows straight into the open segment.
		let actions = queue.push(key(2), sample(2, 87_000, 3000, true));
		assert_eq!(samples(&actions), vec![(2, 87_000)]);
		assert_eq!(flush_count(&actions), 0);

		// Audio past the boundary triggers the deferred flush: flush first,
		// then the buffered lead sample, then the audio.
		let actions = queue.push(key(2), sample(2, 90_000, 3000, true));
		assert_eq!(flush_count(&actions), 1);
		assert!(matches!(actions[0], QueueAction::Flush));
		assert_eq!(samples(&actions), vec![(1, 90_000), (2, 90_000)]);
	}

	#[test]
	fn test_flush_drains_everything() {
		let mut queue = SampleQueue::new(2000);
		queue.add_track(key(1), 90_000, true);
		queue.add_track(key(2), 48_000, false);

		queue.push(key(1), sample(1, 0, 3000, true));
		queue.push(key(2), sample(2, 4000, 1024, true));

		let actions = queue.flush();
		assert_eq!(samples(&actions), vec![(2, 4000)]);
		assert_eq!(flush_count(&actions), 1);
		assert!(matches!(actions.last(), Some(QueueAction::Flush)));
	}

	#[test]
	#[should_panic(expected = "out of order")]
	fn test_out_of_order_panics() {
		let mut queue = SampleQueue::new(2000);
		queue.add_track(key(1), 90_000, true);

		queue.push(key(1), sample(1, 3000, 3000, true));
		queue.push(key(1), sample(1, 0, 3000, false));
	}
}
