use std::{fmt, str::FromStr};

use crate::Error;

/// H.265/HEVC codec identity, following the ISO 14496-15 Annex E string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H265 {
	/// general_profile_space (0-3); non-zero spaces prefix the profile with A/B/C.
	pub profile_space: u8,
	pub profile_idc: u8,
	/// general_profile_compatibility_flags, in bitstream order.
	pub compatibility: u32,
	/// general_tier_flag; true is High tier.
	pub tier: bool,
	pub level_idc: u8,
	/// The six constraint bytes starting at general_progressive_source_flag.
	pub constraints: [u8; 6],
}

impl H265 {
	/// Derive the codec identity from a parsed SPS NAL unit.
	///
	/// Returns `None` when the SPS carries no level, which real encoders never omit.
	pub fn from_sps(sps: &scuffle_h265::SpsNALUnit) -> Option<Self> {
		let profile = &sps.rbsp.profile_tier_level.general_profile;

		Some(Self {
			profile_space: profile.profile_space,
			profile_idc: profile.profile_idc,
			compatibility: profile.profile_compatibility_flag.bits(),
			tier: profile.tier_flag,
			level_idc: profile.level_idc?,
			constraints: pack_constraint_flags(profile),
		})
	}
}

// Packs the constraint flags from ITU H.265 Section 7.3.3 Profile, tier and level syntax
fn pack_constraint_flags(profile: &scuffle_h265::Profile) -> [u8; 6] {
	let mut flags = [0u8; 6];
	flags[0] = ((profile.progressive_source_flag as u8) << 7)
		| ((profile.interlaced_source_flag as u8) << 6)
		| ((profile.non_packed_constraint_flag as u8) << 5)
		| ((profile.frame_only_constraint_flag as u8) << 4);

	flags
}

// hvc1.<space?><profile>.<compat, bit-reversed hex>.<L|H><level>.<constraint bytes>
// with trailing zero constraint bytes omitted, e.g. "hvc1.1.6.L93.B0".
impl fmt::Display for H265 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let space = match self.profile_space & 0x03 {
			1 => "A",
			2 => "B",
			3 => "C",
			_ => "",
		};

		write!(
			f,
			"hvc1.{}{}.{:X}.{}{}",
			space,
			self.profile_idc,
			self.compatibility.reverse_bits(),
			if self.tier { "H" } else { "L" },
			self.level_idc,
		)?;

		let tail = self
			.constraints
			.iter()
			.rposition(|b| *b != 0)
			.map(|last| &self.constraints[..=last])
			.unwrap_or_default();

		for byte in tail {
			write!(f, ".{:02X}", byte)?;
		}

		Ok(())
	}
}

impl FromStr for H265 {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = s.strip_prefix("hvc1.").ok_or(Error::InvalidCodec)?.split('.');

		let profile = parts.next().ok_or(Error::InvalidCodec)?;
		let (profile_space, profile_idc) = match profile.chars().next() {
			Some('A') => (1, &profile[1..]),
			Some('B') => (2, &profile[1..]),
			Some('C') => (3, &profile[1..]),
			_ => (0, profile),
		};

		let compatibility = u32::from_str_radix(parts.next().ok_or(Error::InvalidCodec)?, 16)?.reverse_bits();

		let tier_level = parts.next().ok_or(Error::InvalidCodec)?;
		let tier = match tier_level.chars().next() {
			Some('L') => false,
			Some('H') => true,
			_ => return Err(Error::InvalidCodec),
		};

		let mut constraints = [0u8; 6];
		for (i, part) in parts.enumerate() {
			if i >= constraints.len() {
				return Err(Error::InvalidCodec);
			}
			constraints[i] = u8::from_str_radix(part, 16)?;
		}

		Ok(Self {
			profile_space,
			profile_idc: profile_idc.parse()?,
			compatibility,
			tier,
			level_idc: tier_level[1..].parse()?,
			constraints,
		})
	}
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use super::*;

	#[test]
	fn test_h265() {
		let encoded = "hvc1.1.6.L93.B0";
		let decoded = H265 {
			profile_space: 0,
			profile_idc: 1,
			compatibility: 0x6000_0000,
			tier: false,
			level_idc: 93,
			constraints: [0xb0, 0, 0, 0, 0, 0],
		};

		let output = H265::from_str(encoded).expect("failed to parse");
		assert_eq!(output, decoded);

		let output = decoded.to_string();
		assert_eq!(output, encoded);
	}

	#[test]
	fn test_h265_high_tier() {
		let decoded = H265 {
			profile_space: 0,
			profile_idc: 2,
			compatibility: 0x2000_0000,
			tier: true,
			level_idc: 153,
			constraints: [0x90, 0, 0, 0, 0, 0],
		};

		assert_eq!(decoded.to_string(), "hvc1.2.4.H153.90");
	}
}
