//! Common Packet Format item-list codec (§4.3). Parses and assembles one packet at a time,
//! per the single-threaded contract that runs through this whole crate.

use crate::codec::{Cursor, SockAddrInfo, Writer};
use crate::error::{CipError, GeneralStatus};

const TYPE_NULL_ADDRESS: u16 = 0x0000;
const TYPE_LIST_IDENTITY_RESPONSE: u16 = 0x000C;
const TYPE_CONNECTION_ADDRESS: u16 = 0x00A1;
const TYPE_CONNECTED_DATA: u16 = 0x00B1;
const TYPE_UNCONNECTED_DATA: u16 = 0x00B2;
const TYPE_LIST_SERVICE_RESPONSE: u16 = 0x0100;
const TYPE_SOCKADDR_O_TO_T: u16 = 0x8000;
const TYPE_SOCKADDR_T_TO_O: u16 = 0x8001;
const TYPE_SEQUENCED_ADDRESS: u16 = 0x8002;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpfItem {
	NullAddress,
	ListIdentityResponse(Vec<u8>),
	ConnectionAddress { connection_id: u32 },
	SequencedAddress { connection_id: u32, sequence_number: u32 },
	ConnectedData(Vec<u8>),
	UnconnectedData(Vec<u8>),
	ListServiceResponse(Vec<u8>),
	SockAddrInfoOToT(SockAddrInfo),
	SockAddrInfoTToO(SockAddrInfo),
	Unknown { type_id: u16, data: Vec<u8> },
}

impl CpfItem {
	fn type_id(&self) -> u16 {
		match self {
			CpfItem::NullAddress => TYPE_NULL_ADDRESS,
			CpfItem::ListIdentityResponse(_) => TYPE_LIST_IDENTITY_RESPONSE,
			CpfItem::ConnectionAddress { .. } => TYPE_CONNECTION_ADDRESS,
			CpfItem::SequencedAddress { .. } => TYPE_SEQUENCED_ADDRESS,
			CpfItem::ConnectedData(_) => TYPE_CONNECTED_DATA,
			CpfItem::UnconnectedData(_) => TYPE_UNCONNECTED_DATA,
			CpfItem::ListServiceResponse(_) => TYPE_LIST_SERVICE_RESPONSE,
			CpfItem::SockAddrInfoOToT(_) => TYPE_SOCKADDR_O_TO_T,
			CpfItem::SockAddrInfoTToO(_) => TYPE_SOCKADDR_T_TO_O,
			CpfItem::Unknown { type_id, .. } => *type_id,
		}
	}

	fn write_body(&self, w: &mut Writer) -> std::io::Result<()> {
		match self {
			CpfItem::NullAddress => Ok(()),
			CpfItem::ListIdentityResponse(data) | CpfItem::ListServiceResponse(data) | CpfItem::ConnectedData(data) => {
				w.0.extend_from_slice(data);
				Ok(())
			}
			CpfItem::UnconnectedData(data) => {
				w.0.extend_from_slice(data);
				Ok(())
			}
			CpfItem::ConnectionAddress { connection_id } => w.write_u32_le(*connection_id),
			CpfItem::SequencedAddress {
				connection_id,
				sequence_number,
			} => {
				w.write_u32_le(*connection_id)?;
				w.write_u32_le(*sequence_number)
			}
			CpfItem::SockAddrInfoOToT(info) | CpfItem::SockAddrInfoTToO(info) => info.write(&mut w.0),
			CpfItem::Unknown { data, .. } => {
				w.0.extend_from_slice(data);
				Ok(())
			}
		}
	}
}

/// Parses a CPF item list: a 2-byte item count followed by that many `(type, length, bytes)`
/// items.
pub fn decode_cpf(cur: &mut Cursor) -> Result<Vec<CpfItem>, CipError> {
	let malformed = || CipError::new(GeneralStatus::PathSegmentError);

	let count = cur.read_u16_le().map_err(|_| malformed())?;
	let mut items = Vec::with_capacity(count as usize);

	for _ in 0..count {
		let type_id = cur.read_u16_le().map_err(|_| malformed())?;
		let length = cur.read_u16_le().map_err(|_| malformed())? as usize;
		let body = cur.read_bytes(length).map_err(|_| malformed())?;
		let mut body_cur = Cursor::new(body);

		let item = match type_id {
			TYPE_NULL_ADDRESS => CpfItem::NullAddress,
			TYPE_LIST_IDENTITY_RESPONSE => CpfItem::ListIdentityResponse(body.to_vec()),
			TYPE_LIST_SERVICE_RESPONSE => CpfItem::ListServiceResponse(body.to_vec()),
			TYPE_CONNECTION_ADDRESS => CpfItem::ConnectionAddress {
				connection_id: body_cur.read_u32_le().map_err(|_| malformed())?,
			},
			TYPE_SEQUENCED_ADDRESS => CpfItem::SequencedAddress {
				connection_id: body_cur.read_u32_le().map_err(|_| malformed())?,
				sequence_number: body_cur.read_u32_le().map_err(|_| malformed())?,
			},
			TYPE_CONNECTED_DATA => CpfItem::ConnectedData(body.to_vec()),
			TYPE_UNCONNECTED_DATA => CpfItem::UnconnectedData(body.to_vec()),
			TYPE_SOCKADDR_O_TO_T => CpfItem::SockAddrInfoOToT(SockAddrInfo::read(&mut body_cur).map_err(|_| malformed())?),
			TYPE_SOCKADDR_T_TO_O => CpfItem::SockAddrInfoTToO(SockAddrInfo::read(&mut body_cur).map_err(|_| malformed())?),
			other => CpfItem::Unknown {
				type_id: other,
				data: body.to_vec(),
			},
		};

		items.push(item);
	}

	Ok(items)
}

/// Assembles a CPF item list.
pub fn encode_cpf(items: &[CpfItem]) -> Vec<u8> {
	let mut w = Writer::new();
	w.write_u16_le(items.len() as u16).unwrap();

	for item in items {
		let mut body = Writer::new();
		item.write_body(&mut body).unwrap();

		w.write_u16_le(item.type_id()).unwrap();
		w.write_u16_le(body.0.len() as u16).unwrap();
		w.0.extend(body.0);
	}

	w.into_inner()
}

/// Builds the two-item list used for unconnected-message replies/requests: a null address
/// item followed by an unconnected-data item carrying `data`.
pub fn unconnected_envelope(data: Vec<u8>) -> Vec<u8> {
	encode_cpf(&[CpfItem::NullAddress, CpfItem::UnconnectedData(data)])
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn round_trips_null_address_plus_unconnected_data() {
		let items = vec![CpfItem::NullAddress, CpfItem::UnconnectedData(vec![0x8E, 0x00])];
		let encoded = encode_cpf(&items);

		let mut cur = Cursor::new(&encoded);
		let decoded = decode_cpf(&mut cur).unwrap();
		assert_eq!(decoded, items);
	}

	#[test]
	fn sequenced_address_carries_connection_id_and_sequence() {
		let items = vec![
			CpfItem::SequencedAddress {
				connection_id: 0x1234_5678,
				sequence_number: 7,
			},
			CpfItem::ConnectedData(vec![1, 2, 3, 4]),
		];
		let encoded = encode_cpf(&items);

		let mut cur = Cursor::new(&encoded);
		let decoded = decode_cpf(&mut cur).unwrap();
		assert_eq!(decoded, items);
	}

	#[test]
	fn unknown_type_id_preserved_as_unknown() {
		let items = vec![CpfItem::Unknown {
			type_id: 0x00B3,
			data: vec![9, 9],
		}];
		let encoded = encode_cpf(&items);
		let mut cur = Cursor::new(&encoded);
		let decoded = decode_cpf(&mut cur).unwrap();
		assert_eq!(decoded, items);
	}

	#[test]
	fn truncated_item_list_is_rejected() {
		let bytes = [0x01, 0x00, 0xA1, 0x00, 0x04, 0x00]; // claims a 4-byte body but has none
		let mut cur = Cursor::new(&bytes);
		assert!(decode_cpf(&mut cur).is_err());
	}
}
