use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum ObuType {
	SequenceHeader = 1,
	TemporalDelimiter = 2,
	FrameHeader = 3,
	TileGroup = 4,
	Metadata = 5,
	Frame = 6,
	RedundantFrameHeader = 7,
	TileList = 8,
	Padding = 15,
}

/// A single Open Bitstream Unit, header included.
#[derive(Debug, Clone)]
pub(crate) struct Obu {
	pub kind: Option<ObuType>,
	/// Offset of the payload past the header, extension and size field.
	pub payload_offset: usize,
	pub data: Bytes,
}

impl Obu {
	pub fn payload(&self) -> &[u8] {
		&self.data[self.payload_offset.min(self.data.len())..]
	}
}

/// Split a sample payload into OBUs.
///
/// OBU header:
/// - obu_forbidden_bit (1)
/// - obu_type (4)
/// - obu_extension_flag (1)
/// - obu_has_size_field (1)
/// - obu_reserved_1bit (1)
///
/// An OBU without a size field extends to the end of the payload.
pub(crate) fn split_obus(payload: &Bytes) -> Vec<Obu> {
	let mut obus = Vec::new();
	let data = payload.as_ref();
	let mut offset = 0;

	while offset < data.len() {
		let header = data[offset];
		let kind = ObuType::try_from((header >> 3) & 0x0f).ok();
		let has_extension = (header >> 2) & 1 == 1;
		let has_size = (header >> 1) & 1 == 1;

		let mut cursor = offset + if has_extension { 2 } else { 1 };

		if !has_size {
			obus.push(Obu {
				kind,
				payload_offset: cursor - offset,
				data: payload.slice(offset..),
			});
			break;
		}

		// LEB128 size field.
		let mut size: usize = 0;
		let mut shift = 0;
		loop {
			let Some(byte) = data.get(cursor) else {
				return obus;
			};
			cursor += 1;

			size |= ((byte & 0x7f) as usize) << shift;
			shift += 7;

			if byte & 0x80 == 0 {
				break;
			}
			if shift >= 56 {
				return obus;
			}
		}

		let end = (cursor + size).min(data.len());
		obus.push(Obu {
			kind,
			payload_offset: cursor - offset,
			data: payload.slice(offset..end),
		});
		offset = end;
	}

	obus
}

/// Whether a frame OBU payload codes a key frame.
pub(crate) fn frame_is_key(payload: &[u8]) -> bool {
	let Some(first) = payload.first() else {
		return false;
	};

	let show_existing_frame = (first >> 7) & 1;
	if show_existing_frame == 1 {
		return false;
	}

	let frame_type = (first >> 5) & 0b11;
	frame_type == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	fn obu(kind: u8, payload: &[u8]) -> Vec<u8> {
		let mut out = vec![(kind << 3) | 0x02, payload.len() as u8];
		out.extend_from_slice(payload);
		out
	}

	#[test]
	fn test_split() {
		let mut data = obu(2, &[]); // temporal delimiter
		data.extend(obu(1, &[0x00, 0x00])); // sequence header
		data.extend(obu(6, &[0x10, 0xaa])); // frame

		let obus = split_obus(&Bytes::from(data));
		assert_eq!(obus.len(), 3);
		assert_eq!(obus[0].kind, Some(ObuType::TemporalDelimiter));
		assert_eq!(obus[1].kind, Some(ObuType::SequenceHeader));
		assert_eq!(obus[1].payload(), &[0x00, 0x00]);
		assert_eq!(obus[2].kind, Some(ObuType::Frame));
	}

	#[test]
	fn test_frame_type() {
		// frame_type KEY_FRAME (0), show_frame set.
		assert!(frame_is_key(&[0x10]));
		// frame_type INTER_FRAME (1).
		assert!(!frame_is_key(&[0x30]));
		// show_existing_frame set.
		assert!(!frame_is_key(&[0x80]));
	}
}
