use std::path::PathBuf;

use crate::mux::ContainerKind;
use crate::playlist::{Part, Segment};
use crate::{Error, Result};

/// Whether the writer produces a single media playlist or a multivariant tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterKind {
	/// One variant, no master manifest.
	#[default]
	Media,
	/// Multiple variants and renditions behind a master manifest.
	Master,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterMode {
	/// Rolling window; evicted segments are deleted.
	#[default]
	Live,
	/// No eviction, `EXT-X-ENDLIST` on close.
	Vod,
}

/// The segment container and, with it, the playlist version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentKind {
	/// 188-byte transport stream segments, playlist version 6.
	MpegTs,
	/// CMAF segments, playlist version 7.
	#[default]
	Fmp4,
	/// CMAF segments plus partial segments, playlist version 9.
	LowLatency,
}

impl SegmentKind {
	pub(crate) fn container(&self) -> ContainerKind {
		match self {
			Self::MpegTs => ContainerKind::MpegTs,
			Self::Fmp4 | Self::LowLatency => ContainerKind::Cmaf,
		}
	}

	pub(crate) fn version(&self) -> u8 {
		match self {
			Self::MpegTs => 6,
			Self::Fmp4 => 7,
			Self::LowLatency => 9,
		}
	}

	pub(crate) fn extension(&self) -> &'static str {
		match self {
			Self::MpegTs => "ts",
			Self::Fmp4 | Self::LowLatency => "m4s",
		}
	}

	pub(crate) fn low_latency(&self) -> bool {
		matches!(self, Self::LowLatency)
	}
}

/// `EXT-X-SERVER-CONTROL` knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerControl {
	pub can_block_reload: bool,
}

pub type SegmentCallback = Box<dyn FnMut(&str, &Segment)>;
pub type PartCallback = Box<dyn FnMut(&str, &Part)>;

/// Writer configuration. Validated once at construction; invalid values never
/// surface later from `write_sample`.
pub struct WriterConfig {
	pub kind: WriterKind,
	pub mode: WriterMode,
	pub segment_kind: SegmentKind,

	/// Target segment duration in milliseconds, at least 1000.
	pub segment_duration_ms: u64,

	/// Low-latency part duration in milliseconds, at least 100.
	pub part_duration_ms: u64,

	/// Sliding window size; 0 keeps everything. Live mode wants at least 3.
	pub max_segments: usize,

	/// Root directory for [`DirStorage`](crate::DirStorage)-backed writers.
	pub storage_dir: Option<PathBuf>,

	pub server_control: ServerControl,

	/// Fired after a segment becomes visible in its playlist.
	pub on_segment_created: Option<SegmentCallback>,

	/// Fired after a part becomes visible in its playlist.
	pub on_part_created: Option<PartCallback>,
}

impl Default for WriterConfig {
	fn default() -> Self {
		Self {
			kind: WriterKind::default(),
			mode: WriterMode::default(),
			segment_kind: SegmentKind::default(),
			segment_duration_ms: 2000,
			part_duration_ms: 300,
			max_segments: 6,
			storage_dir: None,
			server_control: ServerControl::default(),
			on_segment_created: None,
			on_part_created: None,
		}
	}
}

impl WriterConfig {
	pub(crate) fn validate(&mut self) -> Result<()> {
		if self.segment_duration_ms < 1000 {
			return Err(Error::SegmentDurationTooShort(self.segment_duration_ms));
		}

		if self.part_duration_ms < 100 {
			return Err(Error::PartDurationTooShort(self.part_duration_ms));
		}

		// VOD never evicts.
		if self.mode == WriterMode::Vod {
			self.max_segments = 0;
		}

		if self.max_segments != 0 && self.max_segments < 3 {
			return Err(Error::WindowOutOfRange(self.max_segments));
		}

		Ok(())
	}
}
