//! Little-endian byte codec for CIP wire values (§4.1).
//!
//! Builds directly on `bytestruct`'s `ReadFromWithEndian`/`WriteToWithEndian`/`Size` traits.
//! The codec does not bounds-check: callers must validate remaining length before calling.
//! Reading past the buffer end is a programming error, not a recoverable one.

use std::io::{self, Read, Write};

use bytestruct::{Endian, ReadFromWithEndian, Size, WriteToWithEndian};

/// A moving cursor over a borrowed byte buffer, used by the EPATH and CPF codecs.
pub struct Cursor<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Cursor<'a> {
	pub fn new(buf: &'a [u8]) -> Self {
		Cursor { buf, pos: 0 }
	}

	pub fn remaining(&self) -> usize {
		self.buf.len() - self.pos
	}

	pub fn position(&self) -> usize {
		self.pos
	}

	pub fn peek_u8(&self) -> io::Result<u8> {
		self.buf
			.get(self.pos)
			.copied()
			.ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "peek past end of buffer"))
	}

	pub fn read_bytes(&mut self, n: usize) -> io::Result<&'a [u8]> {
		if self.remaining() < n {
			return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of buffer"));
		}
		let out = &self.buf[self.pos..self.pos + n];
		self.pos += n;
		Ok(out)
	}

	pub fn read<T: ReadFromWithEndian>(&mut self, endian: Endian) -> io::Result<T> {
		T::read_from_with_endian(self, endian)
	}

	pub fn read_u8(&mut self) -> io::Result<u8> {
		self.read(Endian::Little)
	}

	pub fn read_u16_le(&mut self) -> io::Result<u16> {
		self.read(Endian::Little)
	}

	pub fn read_u32_le(&mut self) -> io::Result<u32> {
		self.read(Endian::Little)
	}

	pub fn read_u64_le(&mut self) -> io::Result<u64> {
		self.read(Endian::Little)
	}
}

impl<'a> Read for Cursor<'a> {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let n = buf.len().min(self.remaining());
		buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
		self.pos += n;
		Ok(n)
	}
}

/// A growable little-endian write buffer.
#[derive(Default)]
pub struct Writer(pub Vec<u8>);

impl Writer {
	pub fn new() -> Self {
		Writer(Vec::new())
	}

	pub fn write<T: WriteToWithEndian>(&mut self, value: &T, endian: Endian) -> io::Result<()> {
		value.write_to_with_endian(&mut self.0, endian)
	}

	pub fn write_u8(&mut self, value: u8) -> io::Result<()> {
		self.write(&value, Endian::Little)
	}

	pub fn write_u16_le(&mut self, value: u16) -> io::Result<()> {
		self.write(&value, Endian::Little)
	}

	pub fn write_u32_le(&mut self, value: u32) -> io::Result<()> {
		self.write(&value, Endian::Little)
	}

	pub fn into_inner(self) -> Vec<u8> {
		self.0
	}
}

/// CIP `STRING`: 2-byte LE length, raw bytes, then one pad byte if the length is odd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipString(pub String);

impl ReadFromWithEndian for CipString {
	fn read_from_with_endian<T: Read>(source: &mut T, endian: Endian) -> io::Result<Self> {
		let len = u16::read_from_with_endian(source, endian)? as usize;
		let mut buf = vec![0u8; len];
		source.read_exact(&mut buf)?;
		if len % 2 == 1 {
			let mut pad = [0u8; 1];
			source.read_exact(&mut pad)?;
		}

		String::from_utf8(buf)
			.map(CipString)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
	}
}

impl WriteToWithEndian for CipString {
	fn write_to_with_endian<T: Write>(&self, target: &mut T, endian: Endian) -> io::Result<()> {
		let bytes = self.0.as_bytes();
		(bytes.len() as u16).write_to_with_endian(target, endian)?;
		target.write_all(bytes)?;
		if bytes.len() % 2 == 1 {
			target.write_all(&[0])?;
		}
		Ok(())
	}
}

impl Size for CipString {
	fn size(&self) -> usize {
		2 + self.0.len() + (self.0.len() % 2)
	}
}

/// CIP `SHORT_STRING`: 1-byte length, raw bytes, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortString(pub String);

impl ReadFromWithEndian for ShortString {
	fn read_from_with_endian<T: Read>(source: &mut T, endian: Endian) -> io::Result<Self> {
		let len = u8::read_from_with_endian(source, endian)? as usize;
		let mut buf = vec![0u8; len];
		source.read_exact(&mut buf)?;

		String::from_utf8(buf)
			.map(ShortString)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
	}
}

impl WriteToWithEndian for ShortString {
	fn write_to_with_endian<T: Write>(&self, target: &mut T, _endian: Endian) -> io::Result<()> {
		let bytes = self.0.as_bytes();
		target.write_all(&[bytes.len() as u8])?;
		target.write_all(bytes)
	}
}

impl Size for ShortString {
	fn size(&self) -> usize {
		1 + self.0.len()
	}
}

/// A CIP sockaddr info item body (16 bytes): `sin_family`/`sin_port` big-endian per BSD
/// convention, address in network order, with 8 zero bytes of padding. Unlike the rest of
/// the CPF framing, this item's internal fields are always big-endian regardless of the
/// outer little-endian convention (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockAddrInfo {
	pub family: u16,
	pub port: u16,
	pub address: [u8; 4],
}

impl SockAddrInfo {
	pub const AF_INET: u16 = 2;
	pub const WIRE_SIZE: usize = 16;

	pub fn read<T: Read>(source: &mut T) -> io::Result<Self> {
		let family = u16::read_from_with_endian(source, Endian::Big)?;
		let port = u16::read_from_with_endian(source, Endian::Big)?;
		let address = <[u8; 4]>::read_from_with_endian(source, Endian::Big)?;
		let mut zero = [0u8; 8];
		source.read_exact(&mut zero)?;
		Ok(SockAddrInfo { family, port, address })
	}

	pub fn write<T: Write>(&self, target: &mut T) -> io::Result<()> {
		self.family.write_to_with_endian(target, Endian::Big)?;
		self.port.write_to_with_endian(target, Endian::Big)?;
		self.address.write_to_with_endian(target, Endian::Big)?;
		target.write_all(&[0u8; 8])
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn cip_string_round_trip_even_length() {
		let s = CipString("abcd".to_string());
		let mut buf = Vec::new();
		s.write_to_with_endian(&mut buf, Endian::Little).unwrap();
		assert_eq!(buf.len(), s.size());
		assert_eq!(buf.len() % 2, 0);

		let mut cur = Cursor::new(&buf);
		let decoded = CipString::read_from_with_endian(&mut cur, Endian::Little).unwrap();
		assert_eq!(decoded, s);
	}

	#[test]
	fn cip_string_pads_odd_length() {
		let s = CipString("abc".to_string());
		let mut buf = Vec::new();
		s.write_to_with_endian(&mut buf, Endian::Little).unwrap();
		// 2-byte length + 3 data bytes + 1 pad byte = 6
		assert_eq!(buf.len(), 6);

		let mut cur = Cursor::new(&buf);
		let decoded = CipString::read_from_with_endian(&mut cur, Endian::Little).unwrap();
		assert_eq!(decoded, s);
	}

	#[test]
	fn short_string_has_no_padding() {
		let s = ShortString("abc".to_string());
		let mut buf = Vec::new();
		s.write_to_with_endian(&mut buf, Endian::Little).unwrap();
		assert_eq!(buf.len(), 4);
	}

	#[test]
	fn sockaddr_info_round_trip() {
		let info = SockAddrInfo {
			family: SockAddrInfo::AF_INET,
			port: 0xAF12,
			address: [192, 168, 1, 1],
		};

		let mut buf = Vec::new();
		info.write(&mut buf).unwrap();
		assert_eq!(buf.len(), SockAddrInfo::WIRE_SIZE);
		assert_eq!(&buf[0..2], &[0x00, 0x02]);

		let decoded = SockAddrInfo::read(&mut &buf[..]).unwrap();
		assert_eq!(decoded, info);
	}
}
