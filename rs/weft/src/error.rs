/// A list of possible errors that can occur while configuring or driving the writer.
///
/// Out-of-order timestamps on a single track and samples referencing an unknown
/// track id are programmer errors; the writer panics instead of returning them.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	// Configuration errors, returned from construction.
	#[error("segment duration too short: {0}ms < 1000ms")]
	SegmentDurationTooShort(u64),

	#[error("part duration too short: {0}ms < 100ms")]
	PartDurationTooShort(u64),

	#[error("window size out of range: {0} (must be 0 or >= 3)")]
	WindowOutOfRange(usize),

	#[error("storage directory required")]
	MissingStorageDir,

	// Structural errors, returned from add_variant / add_rendition.
	#[error("writer already started")]
	AlreadyStarted,

	#[error("writer already closed")]
	Closed,

	#[error("media writer accepts a single variant")]
	SingleVariant,

	#[error("media writer accepts no renditions")]
	NoRenditions,

	#[error("duplicate variant: {0}")]
	DuplicateVariant(String),

	#[error("unknown variant: {0}")]
	UnknownVariant(String),

	#[error("variant has no tracks")]
	EmptyVariant,

	#[error("duplicate track id: {0}")]
	DuplicateTrack(u32),

	// Track errors, returned from add_variant / add_rendition.
	#[error("track timescale must be non-zero")]
	ZeroTimescale,

	#[error("AV1 requires an fMP4 container")]
	Av1RequiresFmp4,

	#[error("AAC track needs an audio specific config for MPEG-TS output")]
	MissingAudioConfig,

	#[error("invalid codec private data")]
	InvalidPrivData,

	#[error("invalid codec string")]
	InvalidCodec,

	// Storage errors are surfaced verbatim and are fatal for the current call.
	#[error("storage: {0}")]
	Storage(#[from] std::io::Error),
}

impl From<std::num::ParseIntError> for Error {
	fn from(_: std::num::ParseIntError) -> Self {
		Self::InvalidCodec
	}
}

pub type Result<T> = std::result::Result<T, Error>;
