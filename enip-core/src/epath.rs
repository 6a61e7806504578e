//! Padded logical EPATH codec (CIP Vol.1 Appendix C, §4.2).

use crate::codec::Cursor;
use crate::error::{CipError, GeneralStatus};

/// One decoded padded-path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
	Class(u32),
	Instance(u32),
	ConnectionPoint(u32),
	Attribute(u32),
	ElectronicKey(ElectronicKey),
	ProductionInhibitTime(u8),
	SimpleData(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectronicKey {
	pub vendor_id: u16,
	pub device_type: u16,
	pub product_code: u16,
	pub major_revision: u8,
	pub compatibility: bool,
	pub minor_revision: u8,
}

/// A segment byte that is reserved (top three bits `111`) or simply not one of the
/// recognized segment types in the table in §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSegmentError {
	pub segment_byte: u8,
}

impl From<PathSegmentError> for CipError {
	fn from(_: PathSegmentError) -> Self {
		CipError::new(GeneralStatus::PathSegmentError)
	}
}

/// Decodes exactly one padded-path segment, returning it and the number of bytes consumed
/// (including the leading segment-type byte).
pub fn decode_segment(cur: &mut Cursor) -> Result<(Segment, usize), PathSegmentError> {
	let start = cur.position();
	let seg_byte = cur.peek_u8().map_err(|_| PathSegmentError { segment_byte: 0 })?;

	if seg_byte & 0xE0 == 0xE0 {
		return Err(PathSegmentError { segment_byte: seg_byte });
	}

	let segment = match seg_byte {
		0x20 => {
			cur.read_u8().unwrap();
			let v = cur.read_u8().map_err(|_| err(seg_byte))?;
			Segment::Class(v as u32)
		}
		0x21 => {
			cur.read_u8().unwrap();
			cur.read_u8().map_err(|_| err(seg_byte))?; // pad byte
			let v = cur.read_u16_le().map_err(|_| err(seg_byte))?;
			Segment::Class(v as u32)
		}
		0x24 => {
			cur.read_u8().unwrap();
			let v = cur.read_u8().map_err(|_| err(seg_byte))?;
			Segment::Instance(v as u32)
		}
		0x25 => {
			cur.read_u8().unwrap();
			cur.read_u8().map_err(|_| err(seg_byte))?;
			let v = cur.read_u16_le().map_err(|_| err(seg_byte))?;
			Segment::Instance(v as u32)
		}
		0x2C => {
			cur.read_u8().unwrap();
			let v = cur.read_u8().map_err(|_| err(seg_byte))?;
			Segment::ConnectionPoint(v as u32)
		}
		0x30 => {
			cur.read_u8().unwrap();
			let v = cur.read_u8().map_err(|_| err(seg_byte))?;
			Segment::Attribute(v as u32)
		}
		0x31 => {
			cur.read_u8().unwrap();
			cur.read_u8().map_err(|_| err(seg_byte))?;
			let v = cur.read_u16_le().map_err(|_| err(seg_byte))?;
			Segment::Attribute(v as u32)
		}
		0x34 => {
			cur.read_u8().unwrap();
			let key_format = cur.read_u8().map_err(|_| err(seg_byte))?;
			if key_format != 4 {
				return Err(PathSegmentError { segment_byte: seg_byte });
			}

			let vendor_id = cur.read_u16_le().map_err(|_| err(seg_byte))?;
			let device_type = cur.read_u16_le().map_err(|_| err(seg_byte))?;
			let product_code = cur.read_u16_le().map_err(|_| err(seg_byte))?;
			let major_raw = cur.read_u8().map_err(|_| err(seg_byte))?;
			let minor_revision = cur.read_u8().map_err(|_| err(seg_byte))?;

			Segment::ElectronicKey(ElectronicKey {
				vendor_id,
				device_type,
				product_code,
				major_revision: major_raw & 0x7F,
				compatibility: major_raw & 0x80 != 0,
				minor_revision,
			})
		}
		0x43 => {
			cur.read_u8().unwrap();
			let v = cur.read_u8().map_err(|_| err(seg_byte))?;
			Segment::ProductionInhibitTime(v)
		}
		0x80 => {
			cur.read_u8().unwrap();
			let words = cur.read_u8().map_err(|_| err(seg_byte))? as usize;
			let bytes = cur.read_bytes(words * 2).map_err(|_| err(seg_byte))?.to_vec();
			Segment::SimpleData(bytes)
		}
		_ => return Err(PathSegmentError { segment_byte: seg_byte }),
	};

	Ok((segment, cur.position() - start))
}

fn err(segment_byte: u8) -> PathSegmentError {
	PathSegmentError { segment_byte }
}

/// The class/instance/attribute triple the Message Router needs out of an unconnected
/// request's EPATH (§4.5 step 1). Other segment kinds (electronic key, connection point,
/// simple data) are legal in a path but irrelevant to dispatch and are simply skipped.
#[derive(Debug, Clone, Default)]
pub struct RequestPath {
	pub class: Option<u32>,
	pub instance: Option<u32>,
	pub attribute: Option<u32>,
}

/// Decodes a full padded EPATH: a 1-byte word-count header followed by that many words of
/// segments (§4.2). Returns the path plus the total number of bytes consumed, including the
/// header byte.
pub fn decode_padded_epath(cur: &mut Cursor) -> Result<(RequestPath, usize), PathSegmentError> {
	let start = cur.position();
	let size_words = cur.read_u8().map_err(|_| PathSegmentError { segment_byte: 0 })? as usize;
	let end = cur.position() + size_words * 2;

	let mut path = RequestPath::default();
	while cur.position() < end {
		let (segment, _) = decode_segment(cur)?;
		match segment {
			Segment::Class(c) => path.class = Some(c),
			Segment::Instance(i) => path.instance = Some(i),
			Segment::Attribute(a) => path.attribute = Some(a),
			_ => {}
		}
	}

	Ok((path, cur.position() - start))
}

/// Encodes a class/instance/attribute path using the shortest (8-bit) segment encoding
/// whenever each value fits, matching the wire shape produced by real scanners.
pub fn encode_padded_epath(path: &RequestPath) -> Vec<u8> {
	let mut body = Vec::new();
	if let Some(c) = path.class {
		encode_logical(&mut body, 0x20, 0x21, c);
	}
	if let Some(i) = path.instance {
		encode_logical(&mut body, 0x24, 0x25, i);
	}
	if let Some(a) = path.attribute {
		encode_logical(&mut body, 0x30, 0x31, a);
	}

	let mut out = Vec::with_capacity(1 + body.len());
	out.push((body.len() / 2) as u8);
	out.extend(body);
	out
}

fn encode_logical(out: &mut Vec<u8>, byte8: u8, byte16: u8, value: u32) {
	if value <= 0xFF {
		out.push(byte8);
		out.push(value as u8);
	} else {
		out.push(byte16);
		out.push(0);
		out.extend_from_slice(&(value as u16).to_le_bytes());
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn decodes_s1_request_path() {
		let bytes = [0x03, 0x20, 0x01, 0x24, 0x01, 0x30, 0x01];
		let mut cur = Cursor::new(&bytes);
		let (path, consumed) = decode_padded_epath(&mut cur).unwrap();
		assert_eq!(consumed, 1 + bytes[0] as usize * 2);
		assert_eq!(path.class, Some(0x01));
		assert_eq!(path.instance, Some(0x01));
		assert_eq!(path.attribute, Some(0x01));
	}

	#[test]
	fn round_trip_8_bit_segments() {
		let path = RequestPath {
			class: Some(0x04),
			instance: Some(100),
			attribute: Some(3),
		};

		let encoded = encode_padded_epath(&path);
		assert_eq!(encoded.len(), 1 + path.class.is_some() as usize * 2 + 2 + 2);

		let mut cur = Cursor::new(&encoded);
		let (decoded, consumed) = decode_padded_epath(&mut cur).unwrap();
		assert_eq!(consumed, encoded.len());
		assert_eq!(decoded.class, path.class);
		assert_eq!(decoded.instance, path.instance);
		assert_eq!(decoded.attribute, path.attribute);
	}

	#[test]
	fn sixteen_bit_class_uses_pad_byte() {
		// class 0x1234 needs the 16-bit form: 0x21, pad, lo, hi
		let bytes = [0x02, 0x21, 0x00, 0x34, 0x12];
		let mut cur = Cursor::new(&bytes);
		let (path, consumed) = decode_padded_epath(&mut cur).unwrap();
		assert_eq!(consumed, 5);
		assert_eq!(path.class, Some(0x1234));
	}

	#[test]
	fn electronic_key_segment_decodes_compatibility_bit() {
		let bytes = [0x34, 0x04, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x85, 0x02];
		let mut cur = Cursor::new(&bytes);
		let (segment, consumed) = decode_segment(&mut cur).unwrap();
		assert_eq!(consumed, bytes.len());
		match segment {
			Segment::ElectronicKey(key) => {
				assert_eq!(key.vendor_id, 1);
				assert_eq!(key.device_type, 2);
				assert_eq!(key.product_code, 3);
				assert_eq!(key.major_revision, 5);
				assert!(key.compatibility);
				assert_eq!(key.minor_revision, 2);
			}
			other => panic!("expected electronic key, got {other:?}"),
		}
	}

	#[test]
	fn reserved_segment_is_rejected() {
		let bytes = [0xE0, 0x00];
		let mut cur = Cursor::new(&bytes);
		assert!(decode_segment(&mut cur).is_err());
	}

	#[test]
	fn unknown_segment_is_rejected() {
		let bytes = [0x99, 0x00];
		let mut cur = Cursor::new(&bytes);
		assert!(decode_segment(&mut cur).is_err());
	}
}
