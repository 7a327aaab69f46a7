use std::{fmt, str::FromStr};

use crate::Error;

/// AV1 codec identity from the sequence header OBU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Av1 {
	pub profile: u8,
	/// seq_level_idx of the first operating point.
	pub level: u8,
	/// 'M' (Main) or 'H' (High) tier.
	pub tier: char,
	pub bitdepth: u8,
	pub mono_chrome: bool,
	pub chroma_subsampling_x: bool,
	pub chroma_subsampling_y: bool,
	pub chroma_sample_position: u8,
	pub color_primaries: u8,
	pub transfer_characteristics: u8,
	pub matrix_coefficients: u8,
	pub full_range: bool,
}

impl Default for Av1 {
	fn default() -> Self {
		Self {
			profile: 0,
			level: 0,
			tier: 'M',
			bitdepth: 8,
			mono_chrome: false,
			chroma_subsampling_x: true, // 4:2:0
			chroma_subsampling_y: true,
			chroma_sample_position: 0,
			color_primaries: 1,
			transfer_characteristics: 1,
			matrix_coefficients: 1,
			full_range: false,
		}
	}
}

impl Av1 {
	/// Parse the identity out of a sequence header OBU payload (header already stripped).
	///
	/// The whole non-reduced preamble is walked, timing and decoder model info
	/// included, so the frame dimensions behind it are always recovered.
	pub fn parse_sequence_header(payload: &[u8]) -> Option<(Self, (u32, u32))> {
		let mut bits = BitReader::new(payload);

		let mut av1 = Av1 {
			profile: bits.read(3)? as u8,
			..Default::default()
		};

		let _still_picture = bits.read(1)?;
		let reduced = bits.read(1)? == 1;

		if reduced {
			av1.level = bits.read(5)? as u8;
		} else {
			let timing_info_present = bits.read(1)? == 1;
			let mut decoder_model_info_present = false;
			let mut buffer_delay_length = 0;

			if timing_info_present {
				let _num_units_in_display_tick = bits.read(32)?;
				let _time_scale = bits.read(32)?;
				if bits.read(1)? == 1 {
					// equal_picture_interval
					let _num_ticks_per_picture = bits.uvlc()?;
				}

				decoder_model_info_present = bits.read(1)? == 1;
				if decoder_model_info_present {
					buffer_delay_length = bits.read(5)? as u32 + 1;
					let _num_units_in_decoding_tick = bits.read(32)?;
					let _buffer_removal_time_length = bits.read(5)?;
					let _frame_presentation_time_length = bits.read(5)?;
				}
			}

			let initial_display_delay_present = bits.read(1)? == 1;
			let operating_points = bits.read(5)? as usize + 1;

			for i in 0..operating_points {
				let _idc = bits.read(12)?;
				let level = bits.read(5)? as u8;
				let tier = if level > 7 { bits.read(1)? } else { 0 };

				if i == 0 {
					av1.level = level;
					av1.tier = if tier == 1 { 'H' } else { 'M' };
				}

				if decoder_model_info_present && bits.read(1)? == 1 {
					// operating_parameters_info
					let _decoder_buffer_delay = bits.read(buffer_delay_length)?;
					let _encoder_buffer_delay = bits.read(buffer_delay_length)?;
					let _low_delay_mode = bits.read(1)?;
				}

				if initial_display_delay_present && bits.read(1)? == 1 {
					let _delay = bits.read(4)?;
				}
			}
		}

		let width_bits = bits.read(4)? as u32 + 1;
		let height_bits = bits.read(4)? as u32 + 1;
		let width = bits.read(width_bits)? as u32 + 1;
		let height = bits.read(height_bits)? as u32 + 1;

		Some((av1, (width, height)))
	}
}

// av01.<profile>.<level><tier>.<bitDepth> with the optional long form
// .<monochrome>.<chromaSubsampling>.<colorPrimaries>.<transferCharacteristics>.
// <matrixCoefficients>.<videoFullRangeFlag> appended when any field differs
// from its default, e.g. "av01.0.04M.08".
impl fmt::Display for Av1 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "av01.{}.{:02}{}.{:02}", self.profile, self.level, self.tier, self.bitdepth)?;

		let short = Av1 {
			profile: self.profile,
			level: self.level,
			tier: self.tier,
			bitdepth: self.bitdepth,
			..Default::default()
		};

		if self == &short {
			return Ok(());
		}

		write!(
			f,
			".{}.{}{}{}.{:02}.{:02}.{:02}.{}",
			self.mono_chrome as u8,
			self.chroma_subsampling_x as u8,
			self.chroma_subsampling_y as u8,
			self.chroma_sample_position,
			self.color_primaries,
			self.transfer_characteristics,
			self.matrix_coefficients,
			self.full_range as u8,
		)
	}
}

impl FromStr for Av1 {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = s.strip_prefix("av01.").ok_or(Error::InvalidCodec)?.split('.');

		let profile = parts.next().ok_or(Error::InvalidCodec)?.parse()?;

		let level_tier = parts.next().ok_or(Error::InvalidCodec)?;
		if level_tier.len() != 3 {
			return Err(Error::InvalidCodec);
		}
		let tier = match &level_tier[2..] {
			"M" => 'M',
			"H" => 'H',
			_ => return Err(Error::InvalidCodec),
		};

		let mut av1 = Av1 {
			profile,
			level: level_tier[..2].parse()?,
			tier,
			bitdepth: parts.next().ok_or(Error::InvalidCodec)?.parse()?,
			..Default::default()
		};

		let Some(mono) = parts.next() else {
			return Ok(av1);
		};

		av1.mono_chrome = mono == "1";

		let chroma = parts.next().ok_or(Error::InvalidCodec)?;
		if chroma.len() != 3 {
			return Err(Error::InvalidCodec);
		}
		av1.chroma_subsampling_x = &chroma[0..1] == "1";
		av1.chroma_subsampling_y = &chroma[1..2] == "1";
		av1.chroma_sample_position = chroma[2..3].parse()?;

		av1.color_primaries = parts.next().ok_or(Error::InvalidCodec)?.parse()?;
		av1.transfer_characteristics = parts.next().ok_or(Error::InvalidCodec)?.parse()?;
		av1.matrix_coefficients = parts.next().ok_or(Error::InvalidCodec)?.parse()?;
		av1.full_range = parts.next().ok_or(Error::InvalidCodec)? == "1";

		Ok(av1)
	}
}

/// MSB-first bit reader over a byte slice.
struct BitReader<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> BitReader<'a> {
	fn new(data: &'a [u8]) -> Self {
		Self { data, pos: 0 }
	}

	fn read(&mut self, count: u32) -> Option<u64> {
		let mut value = 0u64;
		for _ in 0..count {
			let byte = *self.data.get(self.pos / 8)?;
			let bit = (byte >> (7 - (self.pos % 8))) & 1;
			value = (value << 1) | bit as u64;
			self.pos += 1;
		}
		Some(value)
	}

	/// Variable length unsigned integer: leading zero count, then that many bits.
	fn uvlc(&mut self) -> Option<u64> {
		let mut leading = 0u32;
		while self.read(1)? == 0 {
			leading += 1;
			if leading >= 32 {
				return Some((1 << 32) - 1);
			}
		}

		match leading {
			0 => Some(0),
			_ => Some(self.read(leading)? + (1u64 << leading) - 1),
		}
	}
}
