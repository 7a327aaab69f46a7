use bytes::{Bytes, BytesMut};

use super::boxes;
use crate::model::MediaSample;
use crate::TrackId;

/// Muxes samples into CMAF fragments: an init header (`ftyp`+`moov`) produced
/// once all tracks have codec configuration, then per-segment `styp` + one
/// `sidx` per track + `moof`/`mdat` fragment runs.
pub(crate) struct CmafMuxer {
	tracks: Vec<CmafTrack>,

	/// mfhd sequence number of the next fragment, starting at 1.
	sequence: u32,

	/// Fragments already emitted for the open segment.
	segment: BytesMut,
}

struct CmafTrack {
	id: TrackId,
	timescale: u32,
	samples: Vec<MediaSample>,

	/// Accumulated decode ticks before the next fragment (tfdt).
	base_ticks: u64,

	/// `base_ticks` when the open segment started, for the sidx.
	segment_start: u64,
}

impl CmafMuxer {
	pub fn new(tracks: impl IntoIterator<Item = (TrackId, u32)>) -> Self {
		Self {
			tracks: tracks
				.into_iter()
				.map(|(id, timescale)| CmafTrack {
					id,
					timescale,
					samples: Vec::new(),
					base_ticks: 0,
					segment_start: 0,
				})
				.collect(),
			sequence: 1,
			segment: BytesMut::new(),
		}
	}

	pub fn push(&mut self, sample: MediaSample) {
		let track = self
			.tracks
			.iter_mut()
			.find(|track| track.id == sample.track_id)
			.unwrap_or_else(|| panic!("unknown track: {}", sample.track_id));

		track.samples.push(sample);
	}

	/// Wrap all buffered samples into one `moof`/`mdat` pair.
	///
	/// The fragment is appended to the open segment and also returned so it
	/// can be stored as a partial segment of its own.
	pub fn fragment(&mut self) -> Option<Bytes> {
		let mut trafs = Vec::new();
		let mut payloads = Vec::new();

		for track in &mut self.tracks {
			if track.samples.is_empty() {
				continue;
			}

			let samples = std::mem::take(&mut track.samples);
			let entries = samples
				.iter()
				.map(|sample| boxes::SampleRow {
					duration: sample.duration as u32,
					size: sample.payload.len() as u32,
					sync: sample.sync,
					cts: (sample.pts as i64 - sample.dts as i64) as i32,
				})
				.collect();

			trafs.push(boxes::Traf {
				track_id: track.id,
				base_decode_time: track.base_ticks,
				entries,
				data_offset: 0,
			});

			track.base_ticks += samples.iter().map(|sample| sample.duration).sum::<u64>();
			payloads.extend(samples.into_iter().map(|sample| sample.payload));
		}

		if trafs.is_empty() {
			return None;
		}

		let mut out = BytesMut::new();
		boxes::write_moof(&mut out, self.sequence, trafs);
		boxes::write_mdat(&mut out, &payloads);
		self.sequence += 1;

		let fragment = out.freeze();
		self.segment.extend_from_slice(&fragment);

		Some(fragment)
	}

	/// Close the segment: wrap any unflushed samples into a final fragment and
	/// prefix the fragment run with `styp` and the per-track `sidx` boxes.
	pub fn flush_segment(&mut self) -> Option<Bytes> {
		self.fragment();

		if self.segment.is_empty() {
			return None;
		}

		let body = std::mem::take(&mut self.segment);

		let mut out = BytesMut::with_capacity(body.len() + 128);
		boxes::write_styp(&mut out);

		let count = self.tracks.len();
		for (index, track) in self.tracks.iter_mut().enumerate() {
			let remaining = (count - index - 1) * boxes::SIDX_SIZE;
			boxes::write_sidx(
				&mut out,
				track.id,
				track.timescale,
				track.segment_start,
				remaining as u32,
				body.len() as u32,
				(track.base_ticks - track.segment_start) as u32,
			);
			track.segment_start = track.base_ticks;
		}

		out.extend_from_slice(&body);
		Some(out.freeze())
	}

	pub fn is_empty(&self) -> bool {
		self.segment.is_empty() && self.tracks.iter().all(|track| track.samples.is_empty())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample(track: u32, dts: u64, duration: u64, size: usize, sync: bool) -> MediaSample {
		MediaSample {
			track_id: track,
			dts,
			pts: dts,
			duration,
			sync,
			payload: vec![0xaau8; size].into(),
			timestamp: None,
		}
	}

	#[test]
	fn test_segment_layout() {
		let mut muxer = CmafMuxer::new([(1, 90_000), (2, 48_000)]);

		muxer.push(sample(1, 0, 3000, 16, true));
		muxer.push(sample(1, 3000, 3000, 8, false));
		muxer.push(sample(2, 0, 1024, 4, true));

		let segment = muxer.flush_segment().expect("segment");

		// styp first, then two sidx boxes, then the fragment.
		assert_eq!(&segment[4..8], b"styp");
		let styp_len = u32::from_be_bytes(segment[0..4].try_into().unwrap()) as usize;
		assert_eq!(&segment[styp_len + 4..styp_len + 8], b"sidx");
		let moof_at = styp_len + 2 * super::boxes::SIDX_SIZE;
		assert_eq!(&segment[moof_at + 4..moof_at + 8], b"moof");

		// The mdat carries all payload bytes plus its header.
		let moof_len = u32::from_be_bytes(segment[moof_at..moof_at + 4].try_into().unwrap()) as usize;
		let mdat_at = moof_at + moof_len;
		let mdat_len = u32::from_be_bytes(segment[mdat_at..mdat_at + 4].try_into().unwrap()) as usize;
		assert_eq!(&segment[mdat_at + 4..mdat_at + 8], b"mdat");
		assert_eq!(mdat_len, 8 + 16 + 8 + 4);
		assert_eq!(mdat_at + mdat_len, segment.len());

		assert!(muxer.is_empty());
	}

	#[test]
	fn test_base_decode_time_accumulates() {
		let mut muxer = CmafMuxer::new([(1, 90_000)]);

		muxer.push(sample(1, 0, 3000, 4, true));
		muxer.flush_segment().expect("segment");

		muxer.push(sample(1, 3000, 3000, 4, true));
		let second = muxer.flush_segment().expect("segment");

		// The second segment's tfdt starts where the first left off.
		let tfdt = second
			.windows(4)
			.position(|window| window == b"tfdt")
			.expect("tfdt present");
		let base = u64::from_be_bytes(second[tfdt + 8..tfdt + 16].try_into().unwrap());
		assert_eq!(base, 3000);
	}

	#[test]
	fn test_parts_accumulate_into_segment() {
		let mut muxer = CmafMuxer::new([(1, 90_000)]);

		muxer.push(sample(1, 0, 3000, 4, true));
		let part = muxer.fragment().expect("part");
		assert_eq!(&part[4..8], b"moof");

		muxer.push(sample(1, 3000, 3000, 4, false));
		let segment = muxer.flush_segment().expect("segment");

		// Two fragments inside one segment.
		let moofs = (0..segment.len() - 4).filter(|&i| &segment[i..i + 4] == b"moof").count();
		assert_eq!(moofs, 2);
	}
}
