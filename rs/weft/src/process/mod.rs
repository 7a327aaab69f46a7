mod annexb;
mod obu;

pub(crate) use annexb::*;
pub(crate) use obu::*;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::codec::{Aac, Av1, Codec, H264, H265};
use crate::mux::ContainerKind;
use crate::{Error, MediaSample, PrivData, Result, Sample, Track, TrackCodec, TrackKind};

/// Number of samples a track may consume without codec private data before the
/// writer complains that the init header is stalled.
const STALL_SAMPLES: u64 = 256;

/// Normalizes caller payloads into the layout the chosen container expects and
/// recovers codec private data from in-band parameter sets.
pub(crate) struct SampleProcessor {
	codec: TrackCodec,
	container: ContainerKind,

	// Recovered or caller-supplied parameter sets, without start codes.
	sps: Option<Bytes>,
	pps: Option<Bytes>,
	vps: Option<Bytes>,
	aac: Option<Aac>,
	sequence_header: Option<Bytes>,

	// Derived codec identity and dimensions.
	params: Option<Codec>,
	width: Option<u32>,
	height: Option<u32>,

	// Bumped whenever the recovered configuration changes.
	generation: u64,

	samples: u64,
	stalled: bool,
}

impl SampleProcessor {
	pub fn new(track: &Track, container: ContainerKind) -> Result<Self> {
		if track.timescale == 0 {
			return Err(Error::ZeroTimescale);
		}

		let mut this = Self {
			codec: track.codec,
			container,
			sps: None,
			pps: None,
			vps: None,
			aac: None,
			sequence_header: None,
			params: None,
			width: None,
			height: None,
			generation: 0,
			samples: 0,
			stalled: false,
		};

		match (track.codec, &track.priv_data) {
			(TrackCodec::H264, Some(PrivData::Avc { sps, pps })) => {
				this.recover_avc_sps(sps.clone()).ok_or(Error::InvalidPrivData)?;
				this.pps = Some(pps.clone());
			}
			(TrackCodec::H265, Some(PrivData::Hevc { vps, sps, pps })) => {
				this.recover_hevc_sps(sps.clone()).ok_or(Error::InvalidPrivData)?;
				this.vps = Some(vps.clone());
				this.pps = Some(pps.clone());
			}
			(TrackCodec::Aac, Some(PrivData::Aac { config })) => {
				let aac = Aac::parse_config(config).ok_or(Error::InvalidPrivData)?;
				this.aac = Some(aac);
				this.params = Some(aac.into());
			}
			(TrackCodec::Av1, Some(PrivData::Av1 { sequence_header })) => {
				this.recover_sequence_header(sequence_header.clone())
					.ok_or(Error::InvalidPrivData)?;
			}
			(_, None) => {}
			_ => return Err(Error::InvalidPrivData),
		}

		if track.codec == TrackCodec::Av1 && container == ContainerKind::MpegTs {
			return Err(Error::Av1RequiresFmp4);
		}

		if track.codec == TrackCodec::Aac && container == ContainerKind::MpegTs && this.aac.is_none() {
			// An ADTS header cannot be synthesized without the config.
			return Err(Error::MissingAudioConfig);
		}

		Ok(this)
	}

	/// Normalize one sample: fill the dts, detect the sync flag, capture in-band
	/// parameter sets, and rewrite the payload for the container.
	pub fn process(&mut self, sample: Sample) -> MediaSample {
		let dts = sample.dts.unwrap_or(sample.pts);

		let (payload, sync) = match self.codec {
			TrackCodec::H264 => self.process_h264(&sample.payload),
			TrackCodec::H265 => self.process_h265(&sample.payload),
			TrackCodec::Aac => self.process_aac(&sample.payload),
			TrackCodec::Av1 => self.process_av1(&sample.payload),
		};

		self.samples += 1;
		if !self.stalled && self.params.is_none() && self.samples >= STALL_SAMPLES {
			self.stalled = true;
			warn!(
				codec = ?self.codec,
				samples = self.samples,
				"no codec parameters recovered; init header is stalled"
			);
		}

		MediaSample {
			track_id: sample.track_id,
			dts,
			pts: sample.pts,
			duration: sample.duration,
			sync,
			payload,
			timestamp: sample.timestamp,
		}
	}

	fn process_h264(&mut self, payload: &Bytes) -> (Bytes, bool) {
		let nalus = split_nalus(payload);
		let mut keyframe = false;

		for nal in &nalus {
			match NalType::parse(nal) {
				Some(NalType::Sps) => {
					self.recover_avc_sps(nal.clone());
				}
				Some(NalType::Pps) => {
					if self.pps.as_ref() != Some(nal) {
						self.pps = Some(nal.clone());
						self.generation += 1;
					}
				}
				Some(NalType::IdrSlice) => keyframe = true,
				_ => {}
			}
		}

		let payload = match self.container {
			ContainerKind::Cmaf => to_length_prefixed(&nalus),
			ContainerKind::MpegTs => {
				let aud = match NalType::parse(nalus.first().map(|n| n.as_ref()).unwrap_or_default()) {
					Some(NalType::Aud) => None,
					_ => Some(H264_AUD),
				};
				to_annexb(&nalus, aud)
			}
		};

		(payload, keyframe)
	}

	fn process_h265(&mut self, payload: &Bytes) -> (Bytes, bool) {
		let nalus = split_nalus(payload);
		let mut keyframe = false;

		for nal in &nalus {
			match HevcNalType::parse(nal) {
				Some(HevcNalType::Sps) => {
					self.recover_hevc_sps(nal.clone());
				}
				Some(HevcNalType::Pps) => {
					if self.pps.as_ref() != Some(nal) {
						self.pps = Some(nal.clone());
						self.generation += 1;
					}
				}
				Some(HevcNalType::Vps) => {
					if self.vps.as_ref() != Some(nal) {
						self.vps = Some(nal.clone());
						self.generation += 1;
					}
				}
				_ => {
					if HevcNalType::raw_is_irap(nal) {
						keyframe = true;
					}
				}
			}
		}

		let payload = match self.container {
			ContainerKind::Cmaf => to_length_prefixed(&nalus),
			ContainerKind::MpegTs => {
				let aud = match HevcNalType::parse(nalus.first().map(|n| n.as_ref()).unwrap_or_default()) {
					Some(HevcNalType::Aud) => None,
					_ => Some(H265_AUD),
				};
				to_annexb(&nalus, aud)
			}
		};

		(payload, keyframe)
	}

	fn process_aac(&mut self, payload: &Bytes) -> (Bytes, bool) {
		if Aac::is_adts(payload) {
			// Recover the config from the first header.
			if let Some((config, _, _)) = Aac::parse_adts(payload) {
				if self.aac != Some(config) {
					self.aac = Some(config);
					self.params = Some(config.into());
					self.generation += 1;
				}
			}

			let payload = match self.container {
				ContainerKind::MpegTs => payload.clone(),
				ContainerKind::Cmaf => strip_adts(payload),
			};
			return (payload, true);
		}

		// Raw AAC frames.
		let payload = match self.container {
			ContainerKind::Cmaf => payload.clone(),
			ContainerKind::MpegTs => match self.aac {
				Some(config) => {
					let mut out = BytesMut::with_capacity(payload.len() + 7);
					out.extend_from_slice(&config.adts_header(payload.len()));
					out.extend_from_slice(payload);
					out.freeze()
				}
				// Checked at add time; kept as a guard for in-band config loss.
				None => payload.clone(),
			},
		};

		(payload, true)
	}

	fn process_av1(&mut self, payload: &Bytes) -> (Bytes, bool) {
		let obus = split_obus(payload);
		let mut keyframe = false;
		let mut keep = Vec::with_capacity(obus.len());

		for obu in obus {
			match obu.kind {
				Some(ObuType::SequenceHeader) => {
					self.recover_sequence_header(obu.data.clone());
					keep.push(obu.data);
				}
				Some(ObuType::TemporalDelimiter) => {
					// Not allowed inside fMP4 samples.
				}
				Some(ObuType::Frame) | Some(ObuType::FrameHeader) => {
					keyframe |= frame_is_key(obu.payload());
					keep.push(obu.data);
				}
				_ => keep.push(obu.data),
			}
		}

		let total = keep.iter().map(|obu| obu.len()).sum();
		let mut out = BytesMut::with_capacity(total);
		for obu in keep {
			out.extend_from_slice(&obu);
		}

		(out.freeze(), keyframe)
	}

	fn recover_avc_sps(&mut self, nal: Bytes) -> Option<()> {
		if self.sps.as_ref() == Some(&nal) {
			return Some(());
		}

		let sps = match h264_parser::Sps::parse(&nal) {
			Ok(sps) => sps,
			Err(_) => {
				warn!("failed to parse H.264 SPS");
				return None;
			}
		};

		self.width = Some(sps.width);
		self.height = Some(sps.height);
		self.params = Some(H264::from_sps(&sps).into());
		self.sps = Some(nal);
		self.generation += 1;

		Some(())
	}

	fn recover_hevc_sps(&mut self, nal: Bytes) -> Option<()> {
		if self.sps.as_ref() == Some(&nal) {
			return Some(());
		}

		let sps = match scuffle_h265::SpsNALUnit::parse(&mut &nal[..]) {
			Ok(sps) => sps,
			Err(_) => {
				warn!("failed to parse H.265 SPS");
				return None;
			}
		};

		self.width = Some(sps.rbsp.cropped_width() as u32);
		self.height = Some(sps.rbsp.cropped_height() as u32);
		self.params = Some(H265::from_sps(&sps)?.into());
		self.sps = Some(nal);
		self.generation += 1;

		Some(())
	}

	fn recover_sequence_header(&mut self, obu: Bytes) -> Option<()> {
		if self.sequence_header.as_ref() == Some(&obu) {
			return Some(());
		}

		// The stored OBU keeps its header; parsing wants the bare payload.
		let payload = split_obus(&obu)
			.into_iter()
			.find(|o| o.kind == Some(ObuType::SequenceHeader))
			.map(|o| o.data.slice(o.payload_offset..))
			.unwrap_or_else(|| obu.clone());

		let (av1, (width, height)) = match Av1::parse_sequence_header(&payload) {
			Some(parsed) => parsed,
			None => {
				warn!("failed to parse AV1 sequence header");
				return None;
			}
		};

		self.width = Some(width);
		self.height = Some(height);
		self.params = Some(av1.into());
		self.sequence_header = Some(obu);
		self.generation += 1;

		Some(())
	}

	/// Whether enough configuration exists to emit an init header.
	pub fn ready(&self) -> bool {
		match self.container {
			// MPEG-TS has no init header.
			ContainerKind::MpegTs => true,
			ContainerKind::Cmaf => match self.codec {
				TrackCodec::H264 => self.sps.is_some() && self.pps.is_some(),
				TrackCodec::H265 => self.vps.is_some() && self.sps.is_some() && self.pps.is_some(),
				TrackCodec::Aac => self.aac.is_some(),
				TrackCodec::Av1 => self.sequence_header.is_some(),
			},
		}
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn params(&self) -> Option<&Codec> {
		self.params.as_ref()
	}

	pub fn kind(&self) -> TrackKind {
		self.codec.kind()
	}

	pub fn width(&self) -> Option<u32> {
		self.width
	}

	pub fn height(&self) -> Option<u32> {
		self.height
	}

	pub fn avc_parameter_sets(&self) -> Option<(&Bytes, &Bytes)> {
		Some((self.sps.as_ref()?, self.pps.as_ref()?))
	}

	pub fn hevc_parameter_sets(&self) -> Option<(&Bytes, &Bytes, &Bytes)> {
		Some((self.vps.as_ref()?, self.sps.as_ref()?, self.pps.as_ref()?))
	}

	pub fn aac_config(&self) -> Option<Aac> {
		self.aac
	}

	pub fn av1_sequence_header(&self) -> Option<&Bytes> {
		self.sequence_header.as_ref()
	}
}

fn strip_adts(payload: &Bytes) -> Bytes {
	let mut out = BytesMut::with_capacity(payload.len());
	let mut offset = 0;

	while offset < payload.len() {
		match Aac::parse_adts(&payload[offset..]) {
			Some((_, header, total)) => {
				let end = (offset + total).min(payload.len());
				out.extend_from_slice(&payload[offset + header..end]);
				offset = end;
			}
			None => {
				// Trailing garbage; keep it rather than lose sync.
				out.extend_from_slice(&payload[offset..]);
				break;
			}
		}
	}

	out.freeze()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn aac_track() -> Track {
		Track::new(1, TrackCodec::Aac, 48_000).with_priv_data(PrivData::Aac {
			config: Bytes::from_static(&[0x11, 0x90]),
		})
	}

	#[test]
	fn test_aac_adts_to_raw() {
		let track = aac_track();
		let mut processor = SampleProcessor::new(&track, ContainerKind::Cmaf).expect("failed to create");

		let config = Aac::parse_config(&[0x11, 0x90]).unwrap();
		let mut frame = config.adts_header(4).to_vec();
		frame.extend_from_slice(&[1, 2, 3, 4]);

		let sample = Sample::new(1, 0, 1024, frame.into());
		let out = processor.process(sample);

		assert!(out.sync);
		assert_eq!(out.payload.as_ref(), &[1, 2, 3, 4]);
	}

	#[test]
	fn test_aac_raw_to_adts() {
		let track = aac_track();
		let mut processor = SampleProcessor::new(&track, ContainerKind::MpegTs).expect("failed to create");

		let sample = Sample::new(1, 0, 1024, Bytes::from_static(&[1, 2, 3, 4]));
		let out = processor.process(sample);

		assert!(Aac::is_adts(&out.payload));
		let (_, header, total) = Aac::parse_adts(&out.payload).unwrap();
		assert_eq!(total - header, 4);
	}

	#[test]
	fn test_aac_mpegts_requires_config() {
		let track = Track::new(1, TrackCodec::Aac, 48_000);
		assert!(matches!(
			SampleProcessor::new(&track, ContainerKind::MpegTs),
			Err(Error::MissingAudioConfig)
		));
	}

	#[test]
	fn test_h264_keyframe_and_aud() {
		let track = Track::new(1, TrackCodec::H264, 90_000);
		let mut processor = SampleProcessor::new(&track, ContainerKind::MpegTs).expect("failed to create");

		let payload = Bytes::from_static(&[0, 0, 0, 1, 0x65, 0xaa, 0xbb]);
		let out = processor.process(Sample::new(1, 0, 3000, payload));

		assert!(out.sync);
		// An AUD was prepended and start codes normalized to 4 bytes.
		assert_eq!(&out.payload[..6], &[0, 0, 0, 1, 0x09, 0xf0]);

		let payload = Bytes::from_static(&[0, 0, 0, 1, 0x41, 0xaa]);
		let out = processor.process(Sample::new(1, 3000, 3000, payload));
		assert!(!out.sync);
	}

	#[test]
	fn test_h264_cmaf_length_prefix() {
		let track = Track::new(1, TrackCodec::H264, 90_000);
		let mut processor = SampleProcessor::new(&track, ContainerKind::Cmaf).expect("failed to create");

		let payload = Bytes::from_static(&[0, 0, 1, 0x65, 0xaa, 0xbb]);
		let out = processor.process(Sample::new(1, 0, 3000, payload));

		assert_eq!(out.payload.as_ref(), &[0, 0, 0, 3, 0x65, 0xaa, 0xbb]);
	}

	#[test]
	fn test_av1_requires_fmp4() {
		let track = Track::new(1, TrackCodec::Av1, 90_000);
		assert!(matches!(
			SampleProcessor::new(&track, ContainerKind::MpegTs),
			Err(Error::Av1RequiresFmp4)
		));
	}

	#[test]
	fn test_dts_defaults_to_pts() {
		let track = aac_track();
		let mut processor = SampleProcessor::new(&track, ContainerKind::Cmaf).expect("failed to create");

		let out = processor.process(Sample::new(1, 42, 1024, Bytes::from_static(&[0])));
		assert_eq!(out.dts, 42);

		let out = processor.process(Sample::new(1, 50, 1024, Bytes::from_static(&[0])).with_dts(48));
		assert_eq!(out.dts, 48);
	}
}
