use std::{fmt, str::FromStr};

use crate::Error;

const SAMPLE_RATES: [u32; 13] = [
	96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC codec identity plus the fields needed to synthesize ADTS headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aac {
	/// audioObjectType from ISO 14496-3 (2 = AAC-LC).
	pub object_type: u8,
	/// samplingFrequencyIndex into the standard rate table.
	pub frequency_index: u8,
	/// channelConfiguration (1-7).
	pub channels: u8,
}

impl Aac {
	/// Parse an AudioSpecificConfig (ISO 14496-3).
	///
	/// 5 bits: audioObjectType
	/// 4 bits: samplingFrequencyIndex
	/// 4 bits: channelConfiguration
	/// 3 bits: flags (ignored)
	pub fn parse_config(buf: &[u8]) -> Option<Self> {
		if buf.len() < 2 {
			return None;
		}

		let object_type = buf[0] >> 3;
		if object_type >= 31 {
			// Extended audioObjectType, not supported.
			return None;
		}

		let frequency_index = ((buf[0] & 0x07) << 1) | (buf[1] >> 7);
		let channels = (buf[1] >> 3) & 0x0f;
		if frequency_index as usize >= SAMPLE_RATES.len() || channels == 0 || channels > 7 {
			return None;
		}

		Some(Self {
			object_type,
			frequency_index,
			channels,
		})
	}

	/// Serialize back to a 2-byte AudioSpecificConfig.
	pub fn config(&self) -> [u8; 2] {
		[
			(self.object_type << 3) | (self.frequency_index >> 1),
			((self.frequency_index & 0x01) << 7) | (self.channels << 3),
		]
	}

	pub fn sample_rate(&self) -> u32 {
		SAMPLE_RATES.get(self.frequency_index as usize).copied().unwrap_or(0)
	}

	/// Whether the buffer starts with the 12-bit ADTS sync word.
	pub fn is_adts(buf: &[u8]) -> bool {
		buf.len() >= 2 && buf[0] == 0xff && buf[1] & 0xf0 == 0xf0
	}

	/// Parse an ADTS frame header, returning the config, the header size
	/// (7 or 9 bytes) and the total frame length including the header.
	pub fn parse_adts(buf: &[u8]) -> Option<(Self, usize, usize)> {
		if buf.len() < 7 || !Self::is_adts(buf) {
			return None;
		}

		let protection_absent = buf[1] & 0x01 == 1;
		let profile = (buf[2] >> 6) & 0x03;
		let frequency_index = (buf[2] >> 2) & 0x0f;
		let channels = ((buf[2] & 0x01) << 2) | (buf[3] >> 6);
		let frame_len = ((buf[3] as usize & 0x03) << 11) | ((buf[4] as usize) << 3) | ((buf[5] as usize) >> 5);

		let header = if protection_absent { 7 } else { 9 };
		if frame_len < header || frequency_index as usize >= SAMPLE_RATES.len() {
			return None;
		}

		let config = Self {
			object_type: profile + 1,
			frequency_index,
			channels,
		};

		Some((config, header, frame_len))
	}

	/// Build a 7-byte ADTS header for a raw frame of `frame_len` bytes.
	pub fn adts_header(&self, frame_len: usize) -> [u8; 7] {
		let total = frame_len + 7;
		let profile = self.object_type.saturating_sub(1) & 0x03;

		[
			0xff,
			0xf1, // MPEG-4, layer 0, no CRC
			(profile << 6) | ((self.frequency_index & 0x0f) << 2) | ((self.channels >> 2) & 0x01),
			((self.channels & 0x03) << 6) | (((total >> 11) & 0x03) as u8),
			((total >> 3) & 0xff) as u8,
			(((total & 0x07) << 5) as u8) | 0x1f,
			0xfc,
		]
	}
}

impl fmt::Display for Aac {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "mp4a.40.{}", self.object_type)
	}
}

impl FromStr for Aac {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let object_type = s.strip_prefix("mp4a.40.").ok_or(Error::InvalidCodec)?;

		// The string carries no rate or channel layout; those stay zeroed.
		Ok(Self {
			object_type: object_type.parse()?,
			frequency_index: 0,
			channels: 0,
		})
	}
}
