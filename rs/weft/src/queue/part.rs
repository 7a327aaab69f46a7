use std::collections::VecDeque;

use crate::model::MediaSample;
use crate::TrackId;

/// One partial segment's worth of samples across every track of a variant.
pub(crate) struct PartGroup {
	pub tracks: Vec<(TrackId, Vec<MediaSample>)>,
}

/// Slices the per-variant sample stream into partial-segment windows of
/// roughly `part_duration_ms`.
pub(crate) struct PartQueue {
	part_ms: u64,
	tracks: Vec<PartTrack>,
}

struct PartTrack {
	id: TrackId,
	/// Part window in this track's timescale.
	part_ticks: u64,
	/// First-sample dts plus the window, the close threshold for the open part.
	target: Option<u64>,
	current: Vec<MediaSample>,
	closed: VecDeque<Vec<MediaSample>>,
}

impl PartQueue {
	pub fn new(part_ms: u64) -> Self {
		Self {
			part_ms,
			tracks: Vec::new(),
		}
	}

	pub fn add_track(&mut self, id: TrackId, timescale: u32) {
		self.tracks.push(PartTrack {
			id,
			part_ticks: self.part_ms * timescale as u64 / 1000,
			target: None,
			current: Vec::new(),
			closed: VecDeque::new(),
		});
	}

	/// Buffer a sample, returning any complete part groups.
	pub fn push(&mut self, sample: MediaSample) -> Vec<PartGroup> {
		let track = self
			.tracks
			.iter_mut()
			.find(|track| track.id == sample.track_id)
			.unwrap_or_else(|| panic!("unknown track: {}", sample.track_id));

		match track.target {
			Some(target) if sample.dts >= target => {
				let part = std::mem::take(&mut track.current);
				track.closed.push_back(part);
				track.target = Some(sample.dts + track.part_ticks);
				track.current.push(sample);
			}
			Some(_) => track.current.push(sample),
			None => {
				track.target = Some(sample.dts + track.part_ticks);
				track.current.push(sample);
			}
		}

		let mut groups = Vec::new();
		while self.tracks.iter().all(|track| !track.closed.is_empty()) {
			groups.push(PartGroup {
				tracks: self
					.tracks
					.iter_mut()
					.map(|track| (track.id, track.closed.pop_front().expect("closed part")))
					.collect(),
			});
		}

		groups
	}

	/// Hand back everything still queued. Called at segment flush; the open
	/// part becomes the tail of the closing segment rather than a part entry.
	pub fn drain(&mut self) -> Vec<(TrackId, Vec<MediaSample>)> {
		self.tracks
			.iter_mut()
			.map(|track| {
				let mut samples: Vec<MediaSample> = track.closed.drain(..).flatten().collect();
				samples.append(&mut track.current);
				track.target = None;
				(track.id, samples)
			})
			.collect()
	}
}
