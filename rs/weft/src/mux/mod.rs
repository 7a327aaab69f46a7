mod boxes;
mod cmaf;
mod ts;

pub(crate) use boxes::{init_segment, InitTrack, SampleEntry};
pub(crate) use cmaf::*;
pub(crate) use ts::*;

use bytes::Bytes;

use crate::model::MediaSample;

/// The byte layout a variant's segments use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainerKind {
	Cmaf,
	MpegTs,
}

/// The per-variant muxer. Monomorphized via the enum; no dispatch in the hot path.
#[derive(derive_more::From)]
pub(crate) enum TracksMuxer {
	Cmaf(CmafMuxer),
	Ts(TsMuxer),
}

impl TracksMuxer {
	pub fn push(&mut self, sample: MediaSample) {
		match self {
			Self::Cmaf(muxer) => muxer.push(sample),
			Self::Ts(muxer) => muxer.push(sample),
		}
	}

	/// Wrap the buffered samples into a standalone fragment (low-latency parts).
	/// MPEG-TS never carries parts.
	pub fn fragment(&mut self) -> Option<Bytes> {
		match self {
			Self::Cmaf(muxer) => muxer.fragment(),
			Self::Ts(_) => None,
		}
	}

	/// Close the current segment, returning its payload.
	pub fn flush_segment(&mut self) -> Option<Bytes> {
		match self {
			Self::Cmaf(muxer) => muxer.flush_segment(),
			Self::Ts(muxer) => muxer.flush_segment(),
		}
	}

	pub fn is_empty(&self) -> bool {
		match self {
			Self::Cmaf(muxer) => muxer.is_empty(),
			Self::Ts(muxer) => muxer.is_empty(),
		}
	}
}
