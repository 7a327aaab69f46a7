use bytes::{BufMut, Bytes, BytesMut};

use crate::model::{rescale, MediaSample};
use crate::{TrackCodec, TrackId, TrackKind};

const PACKET_SIZE: usize = 188;
const PAT_PID: u16 = 0x0000;
const PMT_PID: u16 = 0x1000;
const FIRST_ES_PID: u16 = 0x0100;

const STREAM_TYPE_H264: u8 = 0x1b;
const STREAM_TYPE_H265: u8 = 0x24;
const STREAM_TYPE_AAC: u8 = 0x0f;

/// Muxes samples into 188-byte MPEG-TS packets.
///
/// Every segment starts with a PAT and PMT; there is no init header.
pub(crate) struct TsMuxer {
	tracks: Vec<TsTrack>,
	pcr_pid: u16,
	pat_cc: u8,
	pmt_cc: u8,
	segment: BytesMut,
}

struct TsTrack {
	id: TrackId,
	pid: u16,
	stream_id: u8,
	stream_type: u8,
	timescale: u32,
	cc: u8,
}

impl TsMuxer {
	pub fn new(tracks: impl IntoIterator<Item = (TrackId, TrackCodec, u32)>) -> Self {
		let tracks: Vec<TsTrack> = tracks
			.into_iter()
			.enumerate()
			.map(|(index, (id, codec, timescale))| TsTrack {
				id,
				pid: FIRST_ES_PID + index as u16,
				stream_id: match codec.kind() {
					TrackKind::Video => 0xe0,
					TrackKind::Audio => 0xc0,
				},
				stream_type: match codec {
					TrackCodec::H264 => STREAM_TYPE_H264,
					TrackCodec::H265 => STREAM_TYPE_H265,
					TrackCodec::Aac => STREAM_TYPE_AAC,
					TrackCodec::Av1 => unreachable!("AV1 is rejected for MPEG-TS"),
				},
				timescale,
				cc: 0,
			})
			.collect();

		Self {
			pcr_pid: tracks.first().map(|track| track.pid).unwrap_or(FIRST_ES_PID),
			tracks,
			pat_cc: 0,
			pmt_cc: 0,
			segment: BytesMut::new(),
		}
	}

	pub fn push(&mut self, sample: MediaSample) {
		if self.segment.is_empty() {
			self.write_tables();
		}

		let index = self
			.tracks
			.iter()
			.position(|track| track.id == sample.track_id)
			.unwrap_or_else(|| panic!("unknown track: {}", sample.track_id));

		let timescale = self.tracks[index].timescale;
		let pts = rescale(sample.pts, timescale, 90_000);
		let dts = rescale(sample.dts, timescale, 90_000);

		let pes = build_pes(self.tracks[index].stream_id, pts, dts, &sample.payload);
		let pcr = (self.tracks[index].pid == self.pcr_pid).then_some(dts);

		self.write_pes(index, &pes, sample.sync, pcr);
	}

	pub fn flush_segment(&mut self) -> Option<Bytes> {
		if self.segment.is_empty() {
			return None;
		}

		Some(std::mem::take(&mut self.segment).freeze())
	}

	pub fn is_empty(&self) -> bool {
		self.segment.is_empty()
	}

	fn write_tables(&mut self) {
		let mut pat = BytesMut::new();
		pat.put_u16(1); // program_number
		pat.put_u16(0xe000 | PMT_PID);

		let pat_cc = self.next_table_cc(true);
		self.write_section(PAT_PID, pat_cc, 0x00, &pat);

		let mut pmt = BytesMut::new();
		pmt.put_u16(0xe000 | self.pcr_pid);
		pmt.put_u16(0xf000); // program_info_length 0
		for track in &self.tracks {
			pmt.put_u8(track.stream_type);
			pmt.put_u16(0xe000 | track.pid);
			pmt.put_u16(0xf000); // ES_info_length 0
		}

		let pmt_cc = self.next_table_cc(false);
		self.write_section(PMT_PID, pmt_cc, 0x02, &pmt);
	}

	fn next_table_cc(&mut self, pat: bool) -> u8 {
		let cc = if pat { &mut self.pat_cc } else { &mut self.pmt_cc };
		let current = *cc;
		*cc = (*cc + 1) & 0x0f;
		current
	}

	/// Write one PSI section padded out to a full packet.
	fn write_section(&mut self, pid: u16, cc: u8, table_id: u8, body: &[u8]) {
		let start = self.segment.len();

		self.segment.put_u8(0x47);
		self.segment.put_u16(0x4000 | pid); // PUSI
		self.segment.put_u8(0x10 | cc); // payload only

		self.segment.put_u8(0); // pointer_field
		self.segment.put_u8(table_id);

		// section_length counts everything after it, CRC included.
		let section_length = 5 + body.len() + 4;
		self.segment.put_u16(0xb000 | section_length as u16);
		self.segment.put_u16(1); // transport_stream_id / program_number
		self.segment.put_u8(0xc1); // version 0, current
		self.segment.put_u8(0); // section_number
		self.segment.put_u8(0); // last_section_number
		self.segment.put_slice(body);

		let crc = crc32_mpeg2(&self.segment[start + 5..]);
		self.segment.put_u32(crc);

		while self.segment.len() - start < PACKET_SIZE {
			self.segment.put_u8(0xff);
		}
	}

	/// Split one PES packet across TS packets. The first carries PUSI, the
	/// random access indicator and (on the PCR PID) the PCR.
	fn write_pes(&mut self, index: usize, pes: &[u8], sync: bool, pcr: Option<u64>) {
		let pid = self.tracks[index].pid;
		let mut offset = 0;
		let mut first = true;

		while first || offset < pes.len() {
			let remaining = pes.len() - offset;

			let mut adaptation = BytesMut::new();
			if first && (sync || pcr.is_some()) {
				let mut flags = 0u8;
				if sync {
					flags |= 0x40; // random_access_indicator
				}
				if pcr.is_some() {
					flags |= 0x10;
				}
				adaptation.put_u8(flags);

				if let Some(base) = pcr {
					// 33 bit base, 6 reserved bits, 9 bit extension.
					let base = base & 0x1_ffff_ffff;
					adaptation.put_u8((base >> 25) as u8);
					adaptation.put_u8((base >> 17) as u8);
					adaptation.put_u8((base >> 9) as u8);
					adaptation.put_u8((base >> 1) as u8);
					adaptation.put_u8((((base & 1) as u8) << 7) | 0x7e);
					adaptation.put_u8(0);
				}
			}

			let field_size = if adaptation.is_empty() { 0 } else { adaptation.len() + 1 };
			let payload_len = remaining.min(PACKET_SIZE - 4 - field_size);
			let total_field = PACKET_SIZE - 4 - payload_len;

			let cc = {
				let track = &mut self.tracks[index];
				let cc = track.cc;
				track.cc = (track.cc + 1) & 0x0f;
				cc
			};

			self.segment.put_u8(0x47);
			self.segment.put_u16(if first { 0x4000 } else { 0 } | pid);
			self.segment.put_u8(if total_field > 0 { 0x30 } else { 0x10 } | cc);

			if total_field > 0 {
				// adaptation_field_length excludes its own byte.
				self.segment.put_u8((total_field - 1) as u8);
				if total_field > 1 {
					if adaptation.is_empty() {
						adaptation.put_u8(0);
					}
					let stuffing = total_field - 1 - adaptation.len();
					self.segment.put_slice(&adaptation);
					self.segment.put_bytes(0xff, stuffing);
				}
			}

			self.segment.put_slice(&pes[offset..offset + payload_len]);
			offset += payload_len;
			first = false;
		}
	}
}

fn build_pes(stream_id: u8, pts: u64, dts: u64, payload: &[u8]) -> Vec<u8> {
	let with_dts = dts != pts;
	let header_data_len = if with_dts { 10 } else { 5 };

	let mut pes = Vec::with_capacity(payload.len() + 20);
	pes.extend_from_slice(&[0, 0, 1, stream_id]);

	// Video PES may exceed the 16-bit length and uses 0 instead.
	let packet_len = 3 + header_data_len + payload.len();
	if packet_len > 0xffff {
		pes.extend_from_slice(&[0, 0]);
	} else {
		pes.extend_from_slice(&(packet_len as u16).to_be_bytes());
	}

	pes.push(0x80);
	pes.push(if with_dts { 0xc0 } else { 0x80 });
	pes.push(header_data_len as u8);

	push_timestamp(&mut pes, if with_dts { 0x30 } else { 0x20 }, pts);
	if with_dts {
		push_timestamp(&mut pes, 0x10, dts);
	}

	pes.extend_from_slice(payload);
	pes
}

fn push_timestamp(pes: &mut Vec<u8>, prefix: u8, value: u64) {
	let value = value & 0x1_ffff_ffff;
	pes.push(prefix | (((value >> 30) as u8) << 1) | 1);
	pes.push((value >> 22) as u8);
	pes.push((((value >> 14) as u8) & 0xfe) | 1);
	pes.push((value >> 7) as u8);
	pes.push((((value << 1) as u8) & 0xfe) | 1);
}

fn crc32_mpeg2(data: &[u8]) -> u32 {
	let mut crc = 0xffff_ffffu32;
	for &byte in data {
		crc ^= (byte as u32) << 24;
		for _ in 0..8 {
			crc = if crc & 0x8000_0000 != 0 {
				(crc << 1) ^ 0x04c1_1db7
			} else {
				crc << 1
			};
		}
	}
	crc
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample(track: u32, dts: u64, size: usize, sync: bool) -> MediaSample {
		MediaSample {
			track_id: track,
			dts,
			pts: dts,
			duration: 3000,
			sync,
			payload: vec![0xabu8; size].into(),
			timestamp: None,
		}
	}

	#[test]
	fn test_packet_alignment() {
		let mut muxer = TsMuxer::new([(1, TrackCodec::H264, 90_000), (2, TrackCodec::Aac, 48_000)]);

		muxer.push(sample(1, 0, 700, true));
		muxer.push(sample(2, 0, 32, true));

		let segment = muxer.flush_segment().expect("segment");
		assert_eq!(segment.len() % 188, 0);

		// PAT on PID 0 at offset 0, PMT on PID 0x1000 at offset 188.
		assert_eq!(segment[0], 0x47);
		let pat_pid = (u16::from(segment[1] & 0x1f) << 8) | u16::from(segment[2]);
		assert_eq!(pat_pid, 0);
		let pmt_pid = (u16::from(segment[188 + 1] & 0x1f) << 8) | u16::from(segment[188 + 2]);
		assert_eq!(pmt_pid, 0x1000);

		// First media packet carries PUSI on the first elementary PID.
		assert_eq!(segment[376] & 0xff, 0x47);
		assert!(segment[377] & 0x40 != 0);
		let es_pid = (u16::from(segment[377] & 0x1f) << 8) | u16::from(segment[378]);
		assert_eq!(es_pid, 0x100);
	}

	#[test]
	fn test_tables_restart_each_segment() {
		let mut muxer = TsMuxer::new([(1, TrackCodec::H264, 90_000)]);

		muxer.push(sample(1, 0, 10, true));
		let first = muxer.flush_segment().expect("segment");

		muxer.push(sample(1, 3000, 10, true));
		let second = muxer.flush_segment().expect("segment");

		for segment in [first, second] {
			let pid = (u16::from(segment[1] & 0x1f) << 8) | u16::from(segment[2]);
			assert_eq!(pid, 0);
		}
	}

	#[test]
	fn test_continuity_counters_wrap() {
		let mut muxer = TsMuxer::new([(1, TrackCodec::H264, 90_000)]);

		// Large sample spans more than 16 packets.
		muxer.push(sample(1, 0, 188 * 20, true));
		let segment = muxer.flush_segment().expect("segment");

		let mut last_cc = None;
		for packet in segment.chunks(188).skip(2) {
			let pid = (u16::from(packet[1] & 0x1f) << 8) | u16::from(packet[2]);
			if pid != 0x100 {
				continue;
			}
			let cc = packet[3] & 0x0f;
			if let Some(last) = last_cc {
				assert_eq!(cc, (last + 1) & 0x0f);
			}
			last_cc = Some(cc);
		}
	}

	#[test]
	fn test_crc32() {
		// CRC of an empty message is the initializer.
		assert_eq!(crc32_mpeg2(&[]), 0xffff_ffff);
		// Known vector: "123456789" under CRC-32/MPEG-2.
		assert_eq!(crc32_mpeg2(b"123456789"), 0x0376_e6e7);
	}
}
