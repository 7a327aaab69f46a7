//! Minimal ISO-BMFF box writers: just enough of the `ftyp`/`moov` hierarchy
//! for a CMAF init header, plus `styp`/`sidx`/`moof`/`mdat` for fragments.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{Aac, Av1, H265};
use crate::{TrackId, TrackKind};

/// Everything needed to describe one track in the init header.
pub(crate) struct InitTrack {
	pub id: TrackId,
	pub timescale: u32,
	pub width: u32,
	pub height: u32,
	pub entry: SampleEntry,
}

/// The codec-specific sample description entry.
pub(crate) enum SampleEntry {
	Avc {
		profile: u8,
		constraints: u8,
		level: u8,
		sps: Bytes,
		pps: Bytes,
	},
	Hevc {
		params: H265,
		vps: Bytes,
		sps: Bytes,
		pps: Bytes,
	},
	Aac {
		config: Aac,
	},
	Av1 {
		params: Av1,
		sequence_header: Bytes,
	},
}

impl SampleEntry {
	pub fn kind(&self) -> TrackKind {
		match self {
			Self::Avc { .. } | Self::Hevc { .. } | Self::Av1 { .. } => TrackKind::Video,
			Self::Aac { .. } => TrackKind::Audio,
		}
	}
}

/// One `traf` worth of fragment data.
pub(crate) struct Traf {
	pub track_id: TrackId,
	pub base_decode_time: u64,
	pub entries: Vec<SampleRow>,
	/// From the start of the enclosing moof to this track's first payload byte.
	pub data_offset: i32,
}

pub(crate) struct SampleRow {
	pub duration: u32,
	pub size: u32,
	pub sync: bool,
	/// pts - dts.
	pub cts: i32,
}

impl SampleRow {
	fn flags(&self) -> u32 {
		if self.sync {
			// sample_depends_on = 2 (no other samples)
			0x0200_0000
		} else {
			// sample_depends_on = 1, sample_is_non_sync_sample
			0x0101_0000
		}
	}
}

fn write_box(out: &mut BytesMut, fourcc: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
	let start = out.len();
	out.put_u32(0);
	out.put_slice(fourcc);
	body(out);

	let size = (out.len() - start) as u32;
	out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(out: &mut BytesMut, fourcc: &[u8; 4], version: u8, flags: u32, body: impl FnOnce(&mut BytesMut)) {
	write_box(out, fourcc, |out| {
		out.put_u32((version as u32) << 24 | (flags & 0x00ff_ffff));
		body(out);
	});
}

const MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// `ftyp` + `moov` with one `trak`/`trex` per track.
pub(crate) fn init_segment(tracks: &[InitTrack]) -> Bytes {
	let mut out = BytesMut::with_capacity(1024);

	write_box(&mut out, b"ftyp", |out| {
		out.put_slice(b"iso5");
		out.put_u32(512);
		out.put_slice(b"iso6");
		out.put_slice(b"mp41");
	});

	write_box(&mut out, b"moov", |out| {
		let next_track_id = tracks.iter().map(|track| track.id).max().unwrap_or(0) + 1;

		write_full_box(out, b"mvhd", 0, 0, |out| {
			out.put_u32(0); // creation_time
			out.put_u32(0); // modification_time
			out.put_u32(1000); // timescale
			out.put_u32(0); // duration
			out.put_u32(0x0001_0000); // rate 1.0
			out.put_u16(0x0100); // volume 1.0
			out.put_u16(0);
			out.put_u64(0);
			for value in MATRIX {
				out.put_u32(value);
			}
			out.put_bytes(0, 24); // pre_defined
			out.put_u32(next_track_id);
		});

		for track in tracks {
			write_trak(out, track);
		}

		write_box(out, b"mvex", |out| {
			for track in tracks {
				write_full_box(out, b"trex", 0, 0, |out| {
					out.put_u32(track.id);
					out.put_u32(1); // default_sample_description_index
					out.put_u32(0); // default_sample_duration
					out.put_u32(0); // default_sample_size
					out.put_u32(0); // default_sample_flags
				});
			}
		});
	});

	out.freeze()
}

fn write_trak(out: &mut BytesMut, track: &InitTrack) {
	let kind = track.entry.kind();

	write_box(out, b"trak", |out| {
		// flags: enabled | in_movie | in_preview
		write_full_box(out, b"tkhd", 0, 7, |out| {
			out.put_u32(0); // creation_time
			out.put_u32(0); // modification_time
			out.put_u32(track.id);
			out.put_u32(0);
			out.put_u32(0); // duration
			out.put_u64(0);
			out.put_u16(0); // layer
			out.put_u16(0); // alternate_group
			out.put_u16(if kind == TrackKind::Audio { 0x0100 } else { 0 }); // volume
			out.put_u16(0);
			for value in MATRIX {
				out.put_u32(value);
			}
			out.put_u32(track.width << 16);
			out.put_u32(track.height << 16);
		});

		write_box(out, b"mdia", |out| {
			write_full_box(out, b"mdhd", 0, 0, |out| {
				out.put_u32(0);
				out.put_u32(0);
				out.put_u32(track.timescale);
				out.put_u32(0);
				out.put_u16(0x55c4); // und
				out.put_u16(0);
			});

			write_full_box(out, b"hdlr", 0, 0, |out| {
				out.put_u32(0);
				out.put_slice(match kind {
					TrackKind::Video => b"vide",
					TrackKind::Audio => b"soun",
				});
				out.put_bytes(0, 12);
				out.put_slice(match kind {
					TrackKind::Video => b"VideoHandler\0",
					TrackKind::Audio => b"SoundHandler\0",
				});
			});

			write_box(out, b"minf", |out| {
				match kind {
					TrackKind::Video => write_full_box(out, b"vmhd", 0, 1, |out| {
						out.put_u64(0); // graphicsmode + opcolor
					}),
					TrackKind::Audio => write_full_box(out, b"smhd", 0, 0, |out| {
						out.put_u32(0); // balance
					}),
				}

				write_box(out, b"dinf", |out| {
					write_full_box(out, b"dref", 0, 0, |out| {
						out.put_u32(1);
						write_full_box(out, b"url ", 0, 1, |_| {});
					});
				});

				write_box(out, b"stbl", |out| {
					write_full_box(out, b"stsd", 0, 0, |out| {
						out.put_u32(1);
						write_sample_entry(out, track);
					});
					write_full_box(out, b"stts", 0, 0, |out| out.put_u32(0));
					write_full_box(out, b"stsc", 0, 0, |out| out.put_u32(0));
					write_full_box(out, b"stsz", 0, 0, |out| {
						out.put_u32(0);
						out.put_u32(0);
					});
					write_full_box(out, b"stco", 0, 0, |out| out.put_u32(0));
				});
			});
		});
	});
}

fn write_sample_entry(out: &mut BytesMut, track: &InitTrack) {
	match &track.entry {
		SampleEntry::Avc {
			profile,
			constraints,
			level,
			sps,
			pps,
		} => write_box(out, b"avc1", |out| {
			write_visual(out, track.width, track.height);
			write_box(out, b"avcC", |out| {
				out.put_u8(1); // configuration version
				out.put_u8(*profile);
				out.put_u8(*constraints);
				out.put_u8(*level);
				out.put_u8(0xff); // 4-byte NALU lengths
				out.put_u8(0xe1); // one SPS
				out.put_u16(sps.len() as u16);
				out.put_slice(sps);
				out.put_u8(1); // one PPS
				out.put_u16(pps.len() as u16);
				out.put_slice(pps);
			});
		}),
		SampleEntry::Hevc { params, vps, sps, pps } => write_box(out, b"hvc1", |out| {
			write_visual(out, track.width, track.height);
			write_box(out, b"hvcC", |out| {
				out.put_u8(1);
				out.put_u8((params.profile_space << 6) | ((params.tier as u8) << 5) | (params.profile_idc & 0x1f));
				out.put_u32(params.compatibility);
				out.put_slice(&params.constraints);
				out.put_u8(params.level_idc);
				out.put_u16(0xf000); // min_spatial_segmentation_idc
				out.put_u8(0xfc); // parallelismType
				out.put_u8(0xfc | 1); // chroma_format_idc 4:2:0
				out.put_u8(0xf8); // bit_depth_luma_minus8
				out.put_u8(0xf8); // bit_depth_chroma_minus8
				out.put_u16(0); // avgFrameRate
				out.put_u8(0x0b); // numTemporalLayers 1, 4-byte NALU lengths
				out.put_u8(3); // numOfArrays

				for (nal_type, nal) in [(32u8, vps), (33, sps), (34, pps)] {
					out.put_u8(nal_type);
					out.put_u16(1);
					out.put_u16(nal.len() as u16);
					out.put_slice(nal);
				}
			});
		}),
		SampleEntry::Aac { config } => write_box(out, b"mp4a", |out| {
			out.put_bytes(0, 6);
			out.put_u16(1); // data_reference_index
			out.put_u64(0);
			out.put_u16(config.channels as u16);
			out.put_u16(16); // samplesize
			out.put_u32(0);
			// 16.16 fixed point; rates past 16 bits are carried by the esds only.
			out.put_u32(config.sample_rate().min(0xffff) << 16);

			write_full_box(out, b"esds", 0, 0, |out| {
				let asc = config.config();

				// ES_Descriptor
				out.put_u8(0x03);
				out.put_u8(3 + 2 + 13 + 2 + asc.len() as u8 + 2 + 1);
				out.put_u16(track.id as u16);
				out.put_u8(0);

				// DecoderConfigDescriptor
				out.put_u8(0x04);
				out.put_u8(13 + 2 + asc.len() as u8);
				out.put_u8(0x40); // AAC
				out.put_u8(0x15); // audio stream
				out.put_bytes(0, 3); // bufferSizeDB
				out.put_u32(0); // maxBitrate
				out.put_u32(0); // avgBitrate

				// DecoderSpecificInfo
				out.put_u8(0x05);
				out.put_u8(asc.len() as u8);
				out.put_slice(&asc);

				// SLConfigDescriptor
				out.put_u8(0x06);
				out.put_u8(1);
				out.put_u8(0x02);
			});
		}),
		SampleEntry::Av1 { params, sequence_header } => write_box(out, b"av01", |out| {
			write_visual(out, track.width, track.height);
			write_box(out, b"av1C", |out| {
				out.put_u8(0x81); // marker | version 1
				out.put_u8((params.profile << 5) | (params.level & 0x1f));
				out.put_u8(
					(((params.tier == 'H') as u8) << 7)
						| (((params.bitdepth > 8) as u8) << 6)
						| (((params.bitdepth == 12) as u8) << 5)
						| ((params.mono_chrome as u8) << 4)
						| ((params.chroma_subsampling_x as u8) << 3)
						| ((params.chroma_subsampling_y as u8) << 2)
						| (params.chroma_sample_position & 0x03),
				);
				out.put_u8(0);
				out.put_slice(sequence_header);
			});
		}),
	}
}

fn write_visual(out: &mut BytesMut, width: u32, height: u32) {
	out.put_bytes(0, 6);
	out.put_u16(1); // data_reference_index
	out.put_u16(0);
	out.put_u16(0);
	out.put_bytes(0, 12); // pre_defined
	out.put_u16(width as u16);
	out.put_u16(height as u16);
	out.put_u32(0x0048_0000); // 72 dpi
	out.put_u32(0x0048_0000);
	out.put_u32(0);
	out.put_u16(1); // frame_count
	out.put_bytes(0, 32); // compressorname
	out.put_u16(0x0018); // depth
	out.put_i16(-1);
}

pub(crate) fn write_styp(out: &mut BytesMut) {
	write_box(out, b"styp", |out| {
		out.put_slice(b"msdh");
		out.put_u32(0);
		out.put_slice(b"msdh");
		out.put_slice(b"msix");
	});
}

/// One segment index entry covering the whole fragment run.
pub(crate) fn write_sidx(
	out: &mut BytesMut,
	reference_id: u32,
	timescale: u32,
	earliest: u64,
	first_offset: u32,
	referenced_size: u32,
	duration: u32,
) {
	write_full_box(out, b"sidx", 0, 0, |out| {
		out.put_u32(reference_id);
		out.put_u32(timescale);
		out.put_u32(earliest as u32);
		out.put_u32(first_offset);
		out.put_u16(0);
		out.put_u16(1); // reference_count
		out.put_u32(referenced_size & 0x7fff_ffff);
		out.put_u32(duration);
		out.put_u32(1 << 31 | 1 << 28); // starts with SAP type 1
	});
}

/// Fixed encoded size of a sidx box with a single reference.
pub(crate) const SIDX_SIZE: usize = 44;

fn write_moof_at(out: &mut BytesMut, sequence: u32, trafs: &[Traf]) {
	write_box(out, b"moof", |out| {
		write_full_box(out, b"mfhd", 0, 0, |out| {
			out.put_u32(sequence);
		});

		for traf in trafs {
			write_box(out, b"traf", |out| {
				// default-base-is-moof
				write_full_box(out, b"tfhd", 0, 0x020000, |out| {
					out.put_u32(traf.track_id);
				});

				write_full_box(out, b"tfdt", 1, 0, |out| {
					out.put_u64(traf.base_decode_time);
				});

				// data-offset, duration, size, flags and cts per sample
				write_full_box(out, b"trun", 1, 0x000f01, |out| {
					out.put_u32(traf.entries.len() as u32);
					out.put_i32(traf.data_offset);
					for row in &traf.entries {
						out.put_u32(row.duration);
						out.put_u32(row.size);
						out.put_u32(row.flags());
						out.put_i32(row.cts);
					}
				});
			});
		}
	});
}

/// Build a `moof` with trun data offsets measured from the start of the moof
/// into the following `mdat` payload, in traf order.
pub(crate) fn write_moof(out: &mut BytesMut, sequence: u32, mut trafs: Vec<Traf>) {
	// The encoded size does not depend on the offsets, so measure first.
	let mut probe = BytesMut::new();
	write_moof_at(&mut probe, sequence, &trafs);
	let moof_size = probe.len();

	let mut offset = moof_size as i32 + 8; // skip the mdat header
	for traf in &mut trafs {
		traf.data_offset = offset;
		offset += traf.entries.iter().map(|row| row.size as i32).sum::<i32>();
	}

	write_moof_at(out, sequence, &trafs);
}

pub(crate) fn write_mdat(out: &mut BytesMut, payloads: &[Bytes]) {
	write_box(out, b"mdat", |out| {
		for payload in payloads {
			out.put_slice(payload);
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_box_sizes() {
		let mut out = BytesMut::new();
		write_box(&mut out, b"free", |out| out.put_u32(42));

		assert_eq!(out.len(), 12);
		assert_eq!(&out[0..4], &12u32.to_be_bytes());
		assert_eq!(&out[4..8], b"free");
	}

	#[test]
	fn test_sidx_size_constant() {
		let mut out = BytesMut::new();
		write_sidx(&mut out, 1, 90_000, 0, 0, 1000, 180_000);
		assert_eq!(out.len(), SIDX_SIZE);
	}

	#[test]
	fn test_moof_offsets() {
		let trafs = vec![
			Traf {
				track_id: 1,
				base_decode_time: 0,
				entries: vec![SampleRow {
					duration: 3000,
					size: 10,
					sync: true,
					cts: 0,
				}],
				data_offset: 0,
			},
			Traf {
				track_id: 2,
				base_decode_time: 0,
				entries: vec![SampleRow {
					duration: 1024,
					size: 4,
					sync: true,
					cts: 0,
				}],
				data_offset: 0,
			},
		];

		let mut out = BytesMut::new();
		write_moof(&mut out, 1, trafs);

		let moof_size = u32::from_be_bytes(out[0..4].try_into().unwrap()) as usize;
		assert_eq!(moof_size, out.len());

		// The first track's samples start right after the mdat header, the
		// second track's after the first track's 10 bytes.
		let mut offsets = Vec::new();
		let mut index = 0;
		while index + 4 <= out.len() {
			if &out[index..index + 4] == b"trun" {
				let offset = i32::from_be_bytes(out[index + 12..index + 16].try_into().unwrap());
				offsets.push(offset);
			}
			index += 1;
		}

		assert_eq!(offsets, vec![moof_size as i32 + 8, moof_size as i32 + 8 + 10]);
	}
}
