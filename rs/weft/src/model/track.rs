use bytes::Bytes;

/// Identifies a track within its variant.
///
/// Ids only need to be unique per variant; two variants may both use id 1.
pub type TrackId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
	Video,
	Audio,
}

/// The coded formats the writer can mux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackCodec {
	H264,
	H265,
	Aac,
	Av1,
}

impl TrackCodec {
	pub fn kind(&self) -> TrackKind {
		match self {
			Self::H264 | Self::H265 | Self::Av1 => TrackKind::Video,
			Self::Aac => TrackKind::Audio,
		}
	}
}

/// Codec private data supplied by the caller.
///
/// All of it can also be recovered from in-band parameter sets; a track created
/// without private data stays unconfigured until the stream carries them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivData {
	/// H.264 parameter sets, without start codes or length prefixes.
	Avc { sps: Bytes, pps: Bytes },

	/// H.265 parameter sets, without start codes or length prefixes.
	Hevc { vps: Bytes, sps: Bytes, pps: Bytes },

	/// The 2+ byte AudioSpecificConfig from ISO 14496-3.
	Aac { config: Bytes },

	/// A full AV1 sequence header OBU.
	Av1 { sequence_header: Bytes },
}

/// A single elementary stream inside a variant.
#[derive(Debug, Clone)]
pub struct Track {
	/// Unique within the owning variant.
	pub id: TrackId,

	pub codec: TrackCodec,

	/// Ticks per second for this track's timestamps.
	pub timescale: u32,

	/// Optional codec private data; recovered from in-band data when absent.
	pub priv_data: Option<PrivData>,
}

impl Track {
	pub fn new(id: TrackId, codec: TrackCodec, timescale: u32) -> Self {
		Self {
			id,
			codec,
			timescale,
			priv_data: None,
		}
	}

	pub fn with_priv_data(mut self, priv_data: PrivData) -> Self {
		self.priv_data = Some(priv_data);
		self
	}

	pub fn kind(&self) -> TrackKind {
		self.codec.kind()
	}
}
