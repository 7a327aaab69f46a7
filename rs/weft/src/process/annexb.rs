use bytes::{BufMut, Bytes, BytesMut};

// 4 byte start code.
// Yes, it's one byte longer than the 3 byte start code, but it keeps the
// conversion to length-prefixed samples trivial.
pub(crate) const START_CODE: &[u8] = &[0, 0, 0, 1];

// Access unit delimiter NALUs, prepended when muxing into MPEG-TS.
pub(crate) const H264_AUD: &[u8] = &[0x09, 0xf0];
pub(crate) const H265_AUD: &[u8] = &[0x46, 0x01, 0x60];

#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum NalType {
	Unspecified = 0,
	NonIdrSlice = 1,
	DataPartitionA = 2,
	DataPartitionB = 3,
	DataPartitionC = 4,
	IdrSlice = 5,
	Sei = 6,
	Sps = 7,
	Pps = 8,
	Aud = 9,
	EndOfSeq = 10,
	EndOfStream = 11,
	Filler = 12,
	SpsExt = 13,
	Prefix = 14,
	SubsetSps = 15,
	DepthParameterSet = 16,
}

impl NalType {
	pub fn parse(nal: &[u8]) -> Option<Self> {
		Self::try_from(nal.first()? & 0b11111).ok()
	}
}

// ITU H.265 Table 7-1, NAL unit type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum HevcNalType {
	TrailN = 0,
	TrailR = 1,
	TsaN = 2,
	TsaR = 3,
	StsaN = 4,
	StsaR = 5,
	RadlN = 6,
	RadlR = 7,
	RaslN = 8,
	RaslR = 9,
	BlaWLp = 16,
	BlaWRadl = 17,
	BlaNLp = 18,
	IdrWRadl = 19,
	IdrNLp = 20,
	Cra = 21,
	Vps = 32,
	Sps = 33,
	Pps = 34,
	Aud = 35,
	EndOfSequence = 36,
	EndOfBitstream = 37,
	Filler = 38,
	SeiPrefix = 39,
	SeiSuffix = 40,
}

impl HevcNalType {
	pub fn parse(nal: &[u8]) -> Option<Self> {
		Self::try_from((nal.first()? >> 1) & 0b111111).ok()
	}

	/// IRAP pictures (types 16-23) start a new coded video sequence.
	pub fn raw_is_irap(nal: &[u8]) -> bool {
		nal.first().map(|b| (16..=23).contains(&((b >> 1) & 0b111111))).unwrap_or(false)
	}
}

pub(crate) fn is_annexb(payload: &[u8]) -> bool {
	payload.starts_with(&[0, 0, 1]) || payload.starts_with(&[0, 0, 0, 1])
}

/// Split a sample payload into NAL units.
///
/// Accepts both Annex-B (3- or 4-byte start codes) and 4-byte length-prefixed
/// layouts; a payload that is neither is returned as a single unit.
pub(crate) fn split_nalus(payload: &Bytes) -> Vec<Bytes> {
	if is_annexb(payload) {
		split_annexb(payload)
	} else {
		split_length_prefixed(payload).unwrap_or_else(|| vec![payload.clone()])
	}
}

fn split_annexb(payload: &Bytes) -> Vec<Bytes> {
	let mut nalus = Vec::new();
	let data = payload.as_ref();

	let mut start = match after_start_code(data) {
		Some(offset) => offset,
		None => return nalus,
	};

	while let Some((size, code)) = find_start_code(&data[start..]) {
		nalus.push(payload.slice(start..start + size));
		start += size + code;
	}

	if start < data.len() {
		nalus.push(payload.slice(start..));
	}

	nalus
}

fn split_length_prefixed(payload: &Bytes) -> Option<Vec<Bytes>> {
	let data = payload.as_ref();
	let mut nalus = Vec::new();
	let mut offset = 0;

	while offset < data.len() {
		let rest = data.get(offset..offset + 4)?;
		let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
		if size == 0 || offset + 4 + size > data.len() {
			return None;
		}

		nalus.push(payload.slice(offset + 4..offset + 4 + size));
		offset += 4 + size;
	}

	Some(nalus)
}

// Return the size of the start code at the start of the buffer.
fn after_start_code(b: &[u8]) -> Option<usize> {
	if b.starts_with(&[0, 0, 1]) {
		Some(3)
	} else if b.starts_with(&[0, 0, 0, 1]) {
		Some(4)
	} else {
		None
	}
}

// Return the number of bytes until the next start code, and the size of that start code.
fn find_start_code(b: &[u8]) -> Option<(usize, usize)> {
	let mut index = 0;

	while index + 2 < b.len() {
		if b[index] == 0 && b[index + 1] == 0 {
			if b[index + 2] == 1 {
				return Some((index, 3));
			}
			if b[index + 2] == 0 && b.get(index + 3) == Some(&1) {
				return Some((index, 4));
			}
		}
		index += 1;
	}

	None
}

/// Concatenate NAL units as `[u32 big-endian length][nalu]`, the fMP4 sample layout.
pub(crate) fn to_length_prefixed(nalus: &[Bytes]) -> Bytes {
	let total = nalus.iter().map(|nal| 4 + nal.len()).sum();
	let mut out = BytesMut::with_capacity(total);

	for nal in nalus {
		out.put_u32(nal.len() as u32);
		out.put_slice(nal);
	}

	out.freeze()
}

/// Join NAL units with 4-byte start codes, prepending `aud` when the first
/// unit is not already an access unit delimiter.
pub(crate) fn to_annexb(nalus: &[Bytes], aud: Option<&[u8]>) -> Bytes {
	let total: usize = nalus.iter().map(|nal| 4 + nal.len()).sum();
	let mut out = BytesMut::with_capacity(total + 8);

	if let Some(aud) = aud {
		out.put_slice(START_CODE);
		out.put_slice(aud);
	}

	for nal in nalus {
		out.put_slice(START_CODE);
		out.put_slice(nal);
	}

	out.freeze()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_split_annexb() {
		let payload = Bytes::from_static(&[0, 0, 0, 1, 0x67, 0xaa, 0, 0, 1, 0x68, 0xbb, 0, 0, 0, 1, 0x65, 0xcc]);
		let nalus = split_nalus(&payload);

		assert_eq!(nalus.len(), 3);
		assert_eq!(nalus[0].as_ref(), &[0x67, 0xaa]);
		assert_eq!(nalus[1].as_ref(), &[0x68, 0xbb]);
		assert_eq!(nalus[2].as_ref(), &[0x65, 0xcc]);

		assert_eq!(NalType::parse(&nalus[0]), Some(NalType::Sps));
		assert_eq!(NalType::parse(&nalus[2]), Some(NalType::IdrSlice));
	}

	#[test]
	fn test_split_length_prefixed() {
		let payload = Bytes::from_static(&[0, 0, 0, 2, 0x65, 0xcc, 0, 0, 0, 1, 0x41]);
		let nalus = split_nalus(&payload);

		assert_eq!(nalus.len(), 2);
		assert_eq!(nalus[0].as_ref(), &[0x65, 0xcc]);
		assert_eq!(nalus[1].as_ref(), &[0x41]);
	}

	#[test]
	fn test_round_trip() {
		let nalus = vec![Bytes::from_static(&[0x65, 0xcc]), Bytes::from_static(&[0x41, 0x01])];

		let prefixed = to_length_prefixed(&nalus);
		assert_eq!(split_nalus(&prefixed), nalus);

		let annexb = to_annexb(&nalus, Some(H264_AUD));
		let back = split_nalus(&annexb);
		assert_eq!(back.len(), 3);
		assert_eq!(NalType::parse(&back[0]), Some(NalType::Aud));
		assert_eq!(&back[1..], &nalus[..]);
	}

	#[test]
	fn test_hevc_irap() {
		// IDR_W_RADL has type 19: (19 << 1) = 0x26.
		assert!(HevcNalType::raw_is_irap(&[0x26, 0x01]));
		// TRAIL_R has type 1.
		assert!(!HevcNalType::raw_is_irap(&[0x02, 0x01]));
		assert_eq!(HevcNalType::parse(&[0x40, 0x01]), Some(HevcNalType::Vps));
	}
}
