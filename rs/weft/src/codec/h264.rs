use std::{fmt, str::FromStr};

use crate::Error;

/// H.264/AVC codec identity.
///
/// Carries the three bytes that follow `avc1.` in an RFC 6381 codec string;
/// they are also the first three payload bytes of every SPS, so a player can
/// tell from the string alone which decoder features the stream relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H264 {
	/// profile_idc: 0x42 Baseline, 0x4D Main, 0x64 High.
	pub profile: u8,
	/// The constraint_set0..5 flags, packed from the high bit down.
	pub constraints: u8,
	/// level_idc, ten times the level number (0x1F is level 3.1).
	pub level: u8,
}

impl H264 {
	/// Derive the codec identity from a parsed SPS.
	pub fn from_sps(sps: &h264_parser::Sps) -> Self {
		let constraints: u8 = ((sps.constraint_set0_flag as u8) << 7)
			| ((sps.constraint_set1_flag as u8) << 6)
			| ((sps.constraint_set2_flag as u8) << 5)
			| ((sps.constraint_set3_flag as u8) << 4)
			| ((sps.constraint_set4_flag as u8) << 3)
			| ((sps.constraint_set5_flag as u8) << 2);

		Self {
			profile: sps.profile_idc,
			constraints,
			level: sps.level_idc,
		}
	}
}

impl fmt::Display for H264 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "avc1.{:02X}{:02X}{:02X}", self.profile, self.constraints, self.level)
	}
}

impl FromStr for H264 {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let hex = s.strip_prefix("avc1.").ok_or(Error::InvalidCodec)?;
		if hex.len() != 6 {
			return Err(Error::InvalidCodec);
		}

		Ok(Self {
			profile: u8::from_str_radix(&hex[0..2], 16)?,
			constraints: u8::from_str_radix(&hex[2..4], 16)?,
			level: u8::from_str_radix(&hex[4..6], 16)?,
		})
	}
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use crate::codec::Codec;

	use super::*;

	#[test]
	fn string_round_trip() {
		let high = H264 {
			profile: 0x64,
			constraints: 0x00,
			level: 0x1f,
		};

		assert_eq!(high.to_string(), "avc1.64001F");
		assert_eq!(H264::from_str("avc1.64001F").unwrap(), high);

		// The codec enum dispatches on the prefix.
		assert_eq!(Codec::from_str("avc1.64001F").unwrap(), high.into());

		// Lowercase strings from other writers parse too.
		let baseline = H264::from_str("avc1.42c01e").unwrap();
		assert_eq!(baseline.profile, 0x42);
		assert_eq!(baseline.constraints, 0xc0);
		assert_eq!(baseline.level, 0x1e);
	}

	#[test]
	fn rejects_malformed_strings() {
		for input in ["avc1", "avc1.64", "avc1.64001F00", "hvc1.64001F", "avc1.zz001e"] {
			assert!(H264::from_str(input).is_err(), "accepted {:?}", input);
		}
	}
}
