mod aac;
mod av1;
mod h264;
mod h265;

pub use aac::*;
pub use av1::*;
pub use h264::*;
pub use h265::*;

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A fully identified codec, used to derive the RFC 6381 string advertised in
/// the multivariant playlist's `CODECS` attribute.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum Codec {
	H264(H264),
	H265(H265),
	Aac(Aac),
	Av1(Av1),
}

impl fmt::Display for Codec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::H264(codec) => codec.fmt(f),
			Self::H265(codec) => codec.fmt(f),
			Self::Aac(codec) => codec.fmt(f),
			Self::Av1(codec) => codec.fmt(f),
		}
	}
}

impl FromStr for Codec {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.starts_with("avc1.") {
			Ok(H264::from_str(s)?.into())
		} else if s.starts_with("hvc1.") {
			Ok(H265::from_str(s)?.into())
		} else if s.starts_with("mp4a.") {
			Ok(Aac::from_str(s)?.into())
		} else if s.starts_with("av01.") {
			Ok(Av1::from_str(s)?.into())
		} else {
			Err(Error::InvalidCodec)
		}
	}
}
