//! ForwardOpen / ForwardClose and connection-path parsing (§4.6-§4.10).

use slog::{o, warn, Logger};

use crate::codec::{Cursor, Writer};
use crate::connection::{
	ActiveConnectionList, CipConnection, ConnectionIdentity, ConnectionPath, ConnectionRole, ConnectionState, SocketHandle,
	WatchdogTimeoutAction,
};
use crate::cpf::unconnected_envelope;
use crate::epath::ElectronicKey;
use crate::error::{CipError, ExtendedStatus, GeneralStatus};
use crate::registry::{reply_service, Registry, SVC_FORWARD_CLOSE, SVC_FORWARD_OPEN};

pub const MESSAGE_ROUTER_CLASS: u32 = 0x02;
pub const CONNECTION_MANAGER_CLASS: u32 = 0x06;
pub const ASSEMBLY_CLASS: u32 = 0x04;

const CONN_TYPE_MASK: u16 = 0x6000;
const CONN_TYPE_NULL: u16 = 0x0000;
const CONN_TYPE_MULTICAST: u16 = 0x2000;
const CONN_TYPE_POINT_TO_POINT: u16 = 0x4000;
const CONN_TYPE_RESERVED: u16 = 0x6000;
const CONN_SIZE_MASK: u16 = 0x01FF;

fn connection_type(params: u16) -> u16 {
	params & CONN_TYPE_MASK
}

/// Seeds and hands out 32-bit connection IDs (§4.9). Held on `EnipStack`, not a process
/// global, so more than one stack can run in the same test process.
pub struct ConnectionIdAllocator {
	incarnation_id: u16,
	counter: u16,
}

impl ConnectionIdAllocator {
	pub fn new(incarnation_id: u16) -> Self {
		ConnectionIdAllocator { incarnation_id, counter: 18 }
	}

	pub fn next(&mut self) -> u32 {
		let id = ((self.incarnation_id as u32) << 16) | self.counter as u32;
		self.counter = self.counter.wrapping_add(1);
		id
	}
}

/// The 36-byte ForwardOpen header that precedes the connection path (§4.6).
#[derive(Debug, Clone)]
pub struct ForwardOpenHeader {
	pub priority_time_tick: u8,
	pub timeout_ticks: u8,
	pub o_to_t_connection_id: u32,
	pub t_to_o_connection_id: u32,
	pub connection_serial_number: u16,
	pub originator_vendor_id: u16,
	pub originator_serial_number: u32,
	pub timeout_multiplier: u8,
	pub o_to_t_rpi_us: u32,
	pub o_to_t_network_params: u16,
	pub t_to_o_rpi_us: u32,
	pub t_to_o_network_params: u16,
	pub transport_type_class_trigger: u8,
	pub path_size_words: u8,
}

fn framing_error() -> CipError {
	CipError::new(GeneralStatus::NotEnoughData)
}

pub fn decode_forward_open_header(cur: &mut Cursor) -> Result<ForwardOpenHeader, CipError> {
	if cur.remaining() < 36 {
		return Err(framing_error());
	}

	let priority_time_tick = cur.read_u8().map_err(|_| framing_error())?;
	let timeout_ticks = cur.read_u8().map_err(|_| framing_error())?;
	let o_to_t_connection_id = cur.read_u32_le().map_err(|_| framing_error())?;
	let t_to_o_connection_id = cur.read_u32_le().map_err(|_| framing_error())?;
	let connection_serial_number = cur.read_u16_le().map_err(|_| framing_error())?;
	let originator_vendor_id = cur.read_u16_le().map_err(|_| framing_error())?;
	let originator_serial_number = cur.read_u32_le().map_err(|_| framing_error())?;
	let timeout_multiplier = cur.read_u8().map_err(|_| framing_error())?;
	cur.read_bytes(3).map_err(|_| framing_error())?; // reserved
	let o_to_t_rpi_us = cur.read_u32_le().map_err(|_| framing_error())?;
	let o_to_t_network_params = cur.read_u16_le().map_err(|_| framing_error())?;
	let t_to_o_rpi_us = cur.read_u32_le().map_err(|_| framing_error())?;
	let t_to_o_network_params = cur.read_u16_le().map_err(|_| framing_error())?;
	let transport_type_class_trigger = cur.read_u8().map_err(|_| framing_error())?;
	let path_size_words = cur.read_u8().map_err(|_| framing_error())?;

	Ok(ForwardOpenHeader {
		priority_time_tick,
		timeout_ticks,
		o_to_t_connection_id,
		t_to_o_connection_id,
		connection_serial_number,
		originator_vendor_id,
		originator_serial_number,
		timeout_multiplier,
		o_to_t_rpi_us,
		o_to_t_network_params,
		t_to_o_rpi_us,
		t_to_o_network_params,
		transport_type_class_trigger,
		path_size_words,
	})
}

/// Rounds `rpi_us` up to the next multiple of `tick_ms * 1000` (§4.6 step 4, §8 invariant 8).
pub fn round_rpi_to_tick(rpi_us: u32, tick_ms: u32) -> u32 {
	let tick_us = tick_ms * 1000;
	if tick_us == 0 {
		return rpi_us;
	}
	rpi_us.div_ceil(tick_us) * tick_us
}

/// §4.7. `remaining_words` bounds how many 16-bit words of path are left to parse.
pub fn parse_connection_path(
	cur: &mut Cursor,
	remaining_words: usize,
	header: &ForwardOpenHeader,
	registry: &Registry,
) -> Result<ParsedConnectionPath, CipError> {
	let path_end = cur.position() + remaining_words * 2;
	let mut path = ConnectionPath::default();
	let mut key = None;
	let mut config_data = Vec::new();
	let mut production_inhibit_time = None;

	if cur.remaining() > 0 && cur.peek_u8().ok() == Some(0x34) {
		let (segment, _) = crate::epath::decode_segment(cur).map_err(CipError::from)?;
		match segment {
			crate::epath::Segment::ElectronicKey(k) => {
				validate_electronic_key(&k, registry, &path)?;
				key = Some(k);
			}
			_ => return Err(CipError::new(GeneralStatus::PathSegmentError)),
		}
	}

	let is_non_cyclic = (header.transport_type_class_trigger >> 4) & 0x07 != 0;
	if is_non_cyclic && cur.position() < path_end && cur.peek_u8().ok() == Some(0x43) {
		let (segment, _) = crate::epath::decode_segment(cur).map_err(CipError::from)?;
		if let crate::epath::Segment::ProductionInhibitTime(ms) = segment {
			production_inhibit_time = Some(ms);
		}
	}

	let class_byte = cur.peek_u8().map_err(|_| CipError::new(GeneralStatus::PathSegmentError))?;
	if class_byte != 0x20 && class_byte != 0x21 {
		return Err(CipError::new(GeneralStatus::PathSegmentError));
	}
	let (segment, _) = crate::epath::decode_segment(cur).map_err(CipError::from)?;
	let class_id = match segment {
		crate::epath::Segment::Class(c) => c,
		_ => unreachable!(),
	};
	if registry.get_cip_class(class_id).is_none() {
		let extended = if class_id >= 0xC8 {
			ExtendedStatus::InvalidSegmentTypeInPath
		} else {
			ExtendedStatus::InconsistentApplicationPathCombo
		};
		return Err(CipError::with_extended(GeneralStatus::ConnectionFailure, extended));
	}
	path.class_id = class_id;

	if cur.position() < path_end && matches!(cur.peek_u8(), Ok(0x24) | Ok(0x25)) {
		let (segment, _) = crate::epath::decode_segment(cur).map_err(CipError::from)?;
		let instance_id = match segment {
			crate::epath::Segment::Instance(i) => i,
			_ => unreachable!(),
		};
		if registry
			.get_cip_class(class_id)
			.and_then(|c| c.instance(instance_id as u16))
			.is_none()
		{
			return Err(CipError::with_extended(
				GeneralStatus::ConnectionFailure,
				ExtendedStatus::InvalidSegmentTypeInPath,
			));
		}
		path.points[2] = instance_id;
	}

	let trigger_class = header.transport_type_class_trigger & 0x0F;
	if trigger_class == 0x03 {
		if cur.position() != path_end {
			return Err(CipError::new(GeneralStatus::TooMuchData));
		}
		if class_id != MESSAGE_ROUTER_CLASS || path.points[2] != 1 {
			return Err(CipError::with_extended(
				GeneralStatus::ConnectionFailure,
				ExtendedStatus::InconsistentApplicationPathCombo,
			));
		}
		path.points[0] = path.points[2];
	} else {
		let o_to_t_null = connection_type(header.o_to_t_network_params) == CONN_TYPE_NULL;
		let t_to_o_null = connection_type(header.t_to_o_network_params) == CONN_TYPE_NULL;
		let expected_points = match (o_to_t_null, t_to_o_null) {
			(true, true) => 0,
			(false, true) | (true, false) => 1,
			(false, false) => 2,
		};

		for i in 0..expected_points {
			if cur.position() >= path_end {
				return Err(CipError::new(GeneralStatus::NotEnoughData));
			}
			let byte = cur.peek_u8().map_err(|_| CipError::new(GeneralStatus::PathSegmentError))?;
			if byte != 0x24 && byte != 0x25 && byte != 0x2C {
				return Err(CipError::new(GeneralStatus::PathSegmentError));
			}
			let (segment, _) = crate::epath::decode_segment(cur).map_err(CipError::from)?;
			let point = match segment {
				crate::epath::Segment::Instance(v) | crate::epath::Segment::ConnectionPoint(v) => v,
				_ => unreachable!(),
			};
			if registry.get_cip_class(class_id).and_then(|c| c.instance(point as u16)).is_none() {
				return Err(CipError::with_extended(
					GeneralStatus::ConnectionFailure,
					ExtendedStatus::InvalidSegmentTypeInPath,
				));
			}
			path.points[i] = point;
		}
	}

	while cur.position() < path_end {
		let byte = cur.peek_u8().map_err(|_| CipError::new(GeneralStatus::PathSegmentError))?;
		match byte {
			0x80 => {
				let (segment, _) = crate::epath::decode_segment(cur).map_err(CipError::from)?;
				if let crate::epath::Segment::SimpleData(bytes) = segment {
					config_data = bytes;
				}
			}
			0x43 if is_non_cyclic => {
				let (segment, _) = crate::epath::decode_segment(cur).map_err(CipError::from)?;
				if let crate::epath::Segment::ProductionInhibitTime(ms) = segment {
					production_inhibit_time = Some(ms);
				}
			}
			_ => return Err(CipError::new(GeneralStatus::PathSegmentError)),
		}
	}

	Ok(ParsedConnectionPath {
		path,
		electronic_key: key,
		config_data,
		production_inhibit_time,
	})
}

/// §4.7's output: the class/instance/connection-point triple plus whatever else the path
/// carried (electronic key, configuration data, production-inhibit time).
pub struct ParsedConnectionPath {
	pub path: ConnectionPath,
	pub electronic_key: Option<ElectronicKey>,
	pub config_data: Vec<u8>,
	pub production_inhibit_time: Option<u8>,
}

fn validate_electronic_key(key: &ElectronicKey, _registry: &Registry, _path: &ConnectionPath) -> Result<(), CipError> {
	// Vendor ID / product code: match or wildcard zero.
	if key.vendor_id != 0 && key.vendor_id != OUR_VENDOR_ID {
		return Err(CipError::with_extended(
			GeneralStatus::ConnectionFailure,
			ExtendedStatus::VendorIdOrProductCodeError,
		));
	}
	if key.product_code != 0 && key.product_code != OUR_PRODUCT_CODE {
		return Err(CipError::with_extended(
			GeneralStatus::ConnectionFailure,
			ExtendedStatus::VendorIdOrProductCodeError,
		));
	}
	if key.device_type != 0 && key.device_type != OUR_DEVICE_TYPE {
		return Err(CipError::with_extended(GeneralStatus::ConnectionFailure, ExtendedStatus::DeviceTypeError));
	}

	let revision_ok = if key.compatibility {
		key.major_revision == OUR_MAJOR_REVISION && key.minor_revision > 0 && key.minor_revision <= OUR_MINOR_REVISION
	} else {
		key.major_revision == 0
			|| (key.major_revision == OUR_MAJOR_REVISION && (key.minor_revision == 0 || key.minor_revision == OUR_MINOR_REVISION))
	};

	if !revision_ok {
		return Err(CipError::with_extended(GeneralStatus::ConnectionFailure, ExtendedStatus::RevisionMismatch));
	}

	Ok(())
}

// This crate's identity, used to validate electronic keys (§4.7 step 1). A real adapter would
// source these from the Identity object's attributes; kept here as constants since the
// Identity object's values are themselves just these same numbers (§6).
pub const OUR_VENDOR_ID: u16 = 1;
pub const OUR_DEVICE_TYPE: u16 = 0x0C; // Communications Adapter
pub const OUR_PRODUCT_CODE: u16 = 1;
pub const OUR_MAJOR_REVISION: u8 = 1;
pub const OUR_MINOR_REVISION: u8 = 0;

/// §4.8: mutates a freshly-parsed staging connection ahead of insertion into the active list.
pub fn general_connection_configuration(connection: &mut CipConnection, tick_ms: u32, allocator: &mut ConnectionIdAllocator) {
	if connection_type(connection.o_to_t_network_params) == CONN_TYPE_POINT_TO_POINT {
		connection.consumed_connection_id = allocator.next();
	}
	if connection_type(connection.t_to_o_network_params) == CONN_TYPE_MULTICAST {
		connection.produced_connection_id = allocator.next();
	}

	connection.eip_level_sequence_count_consuming = 0;
	connection.eip_level_sequence_count_producing = 0;
	connection.sequence_count_consuming = 0;
	connection.sequence_count_producing = 0;
	connection.watchdog_timeout_action = WatchdogTimeoutAction::AutoDelete;

	if !connection.target_is_server() {
		connection.expected_packet_rate_ms = connection.t_to_o_rpi_us / 1000;
		connection.transmission_trigger_timer_ms = 0;
	} else {
		connection.expected_packet_rate_ms = connection.o_to_t_rpi_us / 1000;
	}

	let base = (connection.o_to_t_rpi_us / 1000) << (2 + connection.connection_timeout_multiplier as u32);
	connection.inactivity_watchdog_timer_ms = base.max(10_000) as i64;
	let _ = tick_ms;

	connection.consumed_connection_size = connection.o_to_t_network_params & CONN_SIZE_MASK;
	connection.produced_connection_size = connection.t_to_o_network_params & CONN_SIZE_MASK;
}

/// Builds a staging `CipConnection` out of a decoded header, with everything a connection open
/// handler needs already filled in except sockets and producing/consuming instance references.
fn staging_connection(header: &ForwardOpenHeader, parsed: ParsedConnectionPath, role: ConnectionRole) -> CipConnection {
	let production_inhibit_time_ms = parsed.production_inhibit_time.map(|ms| ms as u16).unwrap_or(256);
	CipConnection {
		state: ConnectionState::Configuring,
		role,
		consumed_connection_id: header.o_to_t_connection_id,
		produced_connection_id: header.t_to_o_connection_id,
		identity: ConnectionIdentity {
			connection_serial_number: header.connection_serial_number,
			originator_vendor_id: header.originator_vendor_id,
			originator_serial_number: header.originator_serial_number,
		},
		o_to_t_rpi_us: header.o_to_t_rpi_us,
		t_to_o_rpi_us: header.t_to_o_rpi_us,
		o_to_t_network_params: header.o_to_t_network_params,
		t_to_o_network_params: header.t_to_o_network_params,
		consumed_connection_size: 0,
		produced_connection_size: 0,
		connection_timeout_multiplier: header.timeout_multiplier,
		transport_type_class_trigger: header.transport_type_class_trigger,
		electronic_key: parsed.electronic_key,
		path: parsed.path,
		config_data: parsed.config_data,
		producing_instance: None,
		consuming_instance: None,
		consume_socket: SocketHandle::INVALID,
		produce_socket: SocketHandle::INVALID,
		originator_addr: None,
		eip_level_sequence_count_producing: 0,
		eip_level_sequence_count_consuming: 0,
		sequence_count_producing: 0,
		sequence_count_consuming: 0,
		inactivity_watchdog_timer_ms: 0,
		transmission_trigger_timer_ms: 0,
		production_inhibit_timer_ms: 0,
		production_inhibit_time_ms,
		expected_packet_rate_ms: 0,
		watchdog_timeout_action: WatchdogTimeoutAction::AutoDelete,
	}
}

/// The outcome of a successful ForwardOpen, everything needed to assemble the 26-byte reply
/// body (§4.6 step 8).
pub struct ForwardOpenAccepted {
	pub consumed_connection_id: u32,
	pub produced_connection_id: u32,
	pub connection_serial_number: u16,
	pub originator_vendor_id: u16,
	pub originator_serial_number: u32,
	pub o_to_t_rpi_us: u32,
	pub t_to_o_rpi_us: u32,
}

/// Runs the full ForwardOpen algorithm (§4.6) and, on success, inserts the new connection into
/// `active_list`. On failure, returns the `CipError` the caller uses to shape the error reply;
/// the identity triple is always available to the caller via the already-decoded header.
#[allow(clippy::too_many_arguments)]
pub fn forward_open(
	data: &[u8],
	registry: &Registry,
	active_list: &mut ActiveConnectionList,
	allocator: &mut ConnectionIdAllocator,
	tick_ms: u32,
	logger: &Logger,
) -> Result<ForwardOpenAccepted, CipError> {
	let mut cur = Cursor::new(data);
	let header = decode_forward_open_header(&mut cur)?;

	let identity = ConnectionIdentity {
		connection_serial_number: header.connection_serial_number,
		originator_vendor_id: header.originator_vendor_id,
		originator_serial_number: header.originator_serial_number,
	};

	if active_list.find_by_identity(identity).is_some() {
		if header.o_to_t_connection_id == 0 && header.t_to_o_connection_id == 0 {
			warn!(logger, "duplicate forward open"; "connection_serial_number" => identity.connection_serial_number);
		}
		return Err(CipError::with_extended(GeneralStatus::ConnectionFailure, ExtendedStatus::ConnectionInUse));
	}

	if connection_type(header.o_to_t_network_params) == CONN_TYPE_RESERVED {
		return Err(CipError::with_extended(
			GeneralStatus::ConnectionFailure,
			ExtendedStatus::InvalidOToTConnectionType,
		));
	}
	if connection_type(header.t_to_o_network_params) == CONN_TYPE_RESERVED {
		return Err(CipError::with_extended(
			GeneralStatus::ConnectionFailure,
			ExtendedStatus::InvalidTToOConnectionType,
		));
	}

	let mut header = header;
	header.t_to_o_rpi_us = round_rpi_to_tick(header.t_to_o_rpi_us, tick_ms);

	if header.transport_type_class_trigger & 0x40 != 0 {
		return Err(CipError::with_extended(
			GeneralStatus::ConnectionFailure,
			ExtendedStatus::TransportTriggerNotSupported,
		));
	}

	let remaining_words = header.path_size_words as usize;
	if cur.remaining() < remaining_words * 2 {
		return Err(CipError::new(GeneralStatus::NotEnoughData));
	}
	if cur.remaining() > remaining_words * 2 {
		return Err(CipError::new(GeneralStatus::TooMuchData));
	}

	let parsed = parse_connection_path(&mut cur, remaining_words, &header, registry)?;

	let o_to_t_non_null = connection_type(header.o_to_t_network_params) != CONN_TYPE_NULL;
	let t_to_o_non_null = connection_type(header.t_to_o_network_params) != CONN_TYPE_NULL;

	let role = if header.transport_type_class_trigger & 0x0F == 0x03 {
		ConnectionRole::ClassThree
	} else {
		match (o_to_t_non_null, t_to_o_non_null) {
			(true, true) => ConnectionRole::IoBidirectional,
			(true, false) => ConnectionRole::IoConsumer,
			(false, true) => ConnectionRole::IoProducer,
			(false, false) => ConnectionRole::IoBidirectional,
		}
	};

	let path = parsed.path;
	let mut connection = staging_connection(&header, parsed, role);
	general_connection_configuration(&mut connection, tick_ms, allocator);

	if role != ConnectionRole::ClassThree {
		let attachment = crate::assembly::open_assembly_connection(
			registry,
			&path,
			o_to_t_non_null,
			t_to_o_non_null,
			connection.consumed_connection_size,
			connection.produced_connection_size,
		)?;
		connection.consuming_instance = attachment.consuming_instance;
		connection.producing_instance = attachment.producing_instance;
	}

	connection.state = ConnectionState::Established;

	let consumed_connection_id = connection.consumed_connection_id;
	let produced_connection_id = connection.produced_connection_id;

	active_list.insert(connection);

	Ok(ForwardOpenAccepted {
		consumed_connection_id,
		produced_connection_id,
		connection_serial_number: identity.connection_serial_number,
		originator_vendor_id: identity.originator_vendor_id,
		originator_serial_number: identity.originator_serial_number,
		o_to_t_rpi_us: header.o_to_t_rpi_us,
		t_to_o_rpi_us: header.t_to_o_rpi_us,
	})
}

/// Assembles the ForwardOpen success reply (§4.6 step 8): generic reply header (service, status,
/// zero additional status words) followed by the 26-byte body.
pub fn encode_forward_open_reply(accepted: &ForwardOpenAccepted) -> Vec<u8> {
	let mut w = Writer::new();
	w.write_u8(reply_service(SVC_FORWARD_OPEN)).unwrap();
	w.write_u8(0).unwrap(); // reserved
	w.write_u8(GeneralStatus::Success.code()).unwrap();
	w.write_u8(0).unwrap(); // additional status size words
	w.write_u32_le(accepted.consumed_connection_id).unwrap();
	w.write_u32_le(accepted.produced_connection_id).unwrap();
	w.write_u16_le(accepted.connection_serial_number).unwrap();
	w.write_u16_le(accepted.originator_vendor_id).unwrap();
	w.write_u32_le(accepted.originator_serial_number).unwrap();
	w.write_u32_le(accepted.o_to_t_rpi_us).unwrap();
	w.write_u32_le(accepted.t_to_o_rpi_us).unwrap();
	w.write_u8(0).unwrap(); // remaining path size
	w.write_u8(0).unwrap(); // reserved
	unconnected_envelope(w.into_inner())
}

#[derive(Debug, Clone)]
pub struct ForwardCloseHeader {
	pub priority_time_tick: u8,
	pub timeout_ticks: u8,
	pub connection_serial_number: u16,
	pub originator_vendor_id: u16,
	pub originator_serial_number: u32,
	pub remaining_path_size: u8,
}

pub fn decode_forward_close_header(cur: &mut Cursor) -> Result<ForwardCloseHeader, CipError> {
	if cur.remaining() < 10 {
		return Err(framing_error());
	}
	Ok(ForwardCloseHeader {
		priority_time_tick: cur.read_u8().map_err(|_| framing_error())?,
		timeout_ticks: cur.read_u8().map_err(|_| framing_error())?,
		connection_serial_number: cur.read_u16_le().map_err(|_| framing_error())?,
		originator_vendor_id: cur.read_u16_le().map_err(|_| framing_error())?,
		originator_serial_number: cur.read_u32_le().map_err(|_| framing_error())?,
		remaining_path_size: {
			let n = cur.read_u8().map_err(|_| framing_error())?;
			cur.read_u8().map_err(|_| framing_error())?; // reserved pad
			n
		},
	})
}

/// §4.10. Returns the reply body on success; `Err` carries the extended status to report.
pub fn forward_close(data: &[u8], active_list: &mut ActiveConnectionList) -> Result<Vec<u8>, CipError> {
	let mut cur = Cursor::new(data);
	let header = decode_forward_close_header(&mut cur)?;

	let identity = ConnectionIdentity {
		connection_serial_number: header.connection_serial_number,
		originator_vendor_id: header.originator_vendor_id,
		originator_serial_number: header.originator_serial_number,
	};

	let reply_identity = || -> Vec<u8> {
		let mut w = Writer::new();
		w.write_u8(reply_service(SVC_FORWARD_CLOSE)).unwrap();
		w.write_u8(0).unwrap(); // reserved
		w.write_u8(GeneralStatus::Success.code()).unwrap();
		w.write_u8(0).unwrap(); // additional status size words
		w.write_u16_le(header.connection_serial_number).unwrap();
		w.write_u16_le(header.originator_vendor_id).unwrap();
		w.write_u32_le(header.originator_serial_number).unwrap();
		w.write_u8(header.remaining_path_size).unwrap();
		w.write_u8(0).unwrap();
		unconnected_envelope(w.into_inner())
	};

	match active_list.find_by_identity(identity) {
		Some(handle) => {
			active_list.remove(handle);
			Ok(reply_identity())
		}
		None => Err(CipError::with_extended(
			GeneralStatus::ConnectionFailure,
			ExtendedStatus::ConnectionNotFoundAtTargetApplication,
		)),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn discard_logger() -> Logger {
		Logger::root(slog::Discard, o!())
	}

	fn sample_registry() -> Registry {
		let mut reg = Registry::new();
		reg.register_class(MESSAGE_ROUTER_CLASS, "Message Router", 1, 0, 0, 0, 2, 0, 0).unwrap();
		reg.add_instance(MESSAGE_ROUTER_CLASS, 1).unwrap();
		crate::assembly::register_assembly_class(&mut reg).unwrap();
		crate::assembly::add_assembly_instance(&mut reg, 100, vec![0u8; 4]).unwrap(); // O->T (consuming)
		crate::assembly::add_assembly_instance(&mut reg, 101, vec![0u8; 2]).unwrap(); // T->O (producing)
		reg
	}

	fn io_forward_open_body(serial: u16) -> Vec<u8> {
		let mut w = Writer::new();
		w.write_u8(0x0A).unwrap(); // priority/time_tick
		w.write_u8(5).unwrap(); // timeout_ticks
		w.write_u32_le(0).unwrap();
		w.write_u32_le(0).unwrap();
		w.write_u16_le(serial).unwrap();
		w.write_u16_le(OUR_VENDOR_ID).unwrap();
		w.write_u32_le(0xCAFEBABE).unwrap();
		w.write_u8(0).unwrap(); // timeout multiplier
		w.0.extend_from_slice(&[0, 0, 0]); // reserved
		w.write_u32_le(5000).unwrap(); // O->T RPI
		w.write_u16_le(0x4004).unwrap(); // O->T params: point-to-point, size 4
		w.write_u32_le(5000).unwrap(); // T->O RPI
		w.write_u16_le(0x4002).unwrap(); // T->O params: point-to-point, size 2
		w.write_u8(0x01).unwrap(); // transport: client, cyclic, class 1
		w.write_u8(3).unwrap(); // path size words
		// path: class 0x04 (Assembly), connection points 100 (O->T), 101 (T->O)
		w.0.extend_from_slice(&[0x20, 0x04, 0x2C, 100, 0x2C, 101]);
		w.into_inner()
	}

	fn class3_forward_open_body(serial: u16, o_to_t_id: u32, t_to_o_id: u32) -> Vec<u8> {
		let mut w = Writer::new();
		w.write_u8(0x0A).unwrap(); // priority/time_tick
		w.write_u8(5).unwrap(); // timeout_ticks
		w.write_u32_le(o_to_t_id).unwrap();
		w.write_u32_le(t_to_o_id).unwrap();
		w.write_u16_le(serial).unwrap();
		w.write_u16_le(OUR_VENDOR_ID).unwrap();
		w.write_u32_le(0xCAFEBABE).unwrap();
		w.write_u8(0).unwrap(); // timeout multiplier
		w.0.extend_from_slice(&[0, 0, 0]); // reserved
		w.write_u32_le(5000).unwrap(); // O->T RPI
		w.write_u16_le(0x4200).unwrap(); // O->T params: point-to-point, size 0x200&0x1FF... keep small
		w.write_u32_le(5000).unwrap(); // T->O RPI
		w.write_u16_le(0x4200).unwrap(); // T->O params
		w.write_u8(0xA3).unwrap(); // transport: server, class 3
		w.write_u8(2).unwrap(); // path size words
		// path: class 0x02, instance 1 (the configuration instance, aliased to connection_point[0])
		w.0.extend_from_slice(&[0x20, 0x02, 0x24, 0x01]);
		w.into_inner()
	}

	#[test]
	fn class3_forward_open_establishes_connection() {
		let registry = sample_registry();
		let mut active = ActiveConnectionList::new();
		let mut allocator = ConnectionIdAllocator::new(0x1234);
		let logger = discard_logger();

		let body = class3_forward_open_body(7, 0, 0);
		let accepted = forward_open(&body, &registry, &mut active, &mut allocator, 10, &logger).unwrap();

		assert_eq!(accepted.connection_serial_number, 7);
		assert_eq!(active.iter().count(), 1);
	}

	#[test]
	fn io_forward_open_attaches_assembly_instances() {
		let registry = sample_registry();
		let mut active = ActiveConnectionList::new();
		let mut allocator = ConnectionIdAllocator::new(0x1234);
		let logger = discard_logger();

		let body = io_forward_open_body(11);
		forward_open(&body, &registry, &mut active, &mut allocator, 10, &logger).unwrap();

		let (_, conn) = active.iter().next().unwrap();
		assert_eq!(conn.role, ConnectionRole::IoBidirectional);
		assert_eq!(conn.consuming_instance, Some(100));
		assert_eq!(conn.producing_instance, Some(101));
	}

	#[test]
	fn io_forward_open_rejects_mismatched_connection_size() {
		let registry = sample_registry();
		let mut active = ActiveConnectionList::new();
		let mut allocator = ConnectionIdAllocator::new(0x1234);
		let logger = discard_logger();

		let mut body = io_forward_open_body(12);
		// O->T params now claim size 8 instead of the instance's actual 4 bytes.
		body[26] = 0x08;
		body[27] = 0x40;

		let err = forward_open(&body, &registry, &mut active, &mut allocator, 10, &logger).unwrap_err();
		assert_eq!(err.extended, ExtendedStatus::InvalidOToTConnectionSize(4));
		assert_eq!(active.iter().count(), 0);
	}

	#[test]
	fn duplicate_forward_open_is_rejected() {
		let registry = sample_registry();
		let mut active = ActiveConnectionList::new();
		let mut allocator = ConnectionIdAllocator::new(0x1234);
		let logger = discard_logger();

		let body = class3_forward_open_body(9, 0, 0);
		forward_open(&body, &registry, &mut active, &mut allocator, 10, &logger).unwrap();
		let err = forward_open(&body, &registry, &mut active, &mut allocator, 10, &logger).unwrap_err();

		assert_eq!(err.general, GeneralStatus::ConnectionFailure);
		assert_eq!(err.extended, ExtendedStatus::ConnectionInUse);
		assert_eq!(active.iter().count(), 1);
	}

	#[test]
	fn rpi_rounds_up_to_tick_multiple() {
		assert_eq!(round_rpi_to_tick(4_500, 10), 10_000);
		assert_eq!(round_rpi_to_tick(10_000, 10), 10_000);
		assert_eq!(round_rpi_to_tick(10_001, 10), 20_000);
	}

	#[test]
	fn forward_close_removes_matching_connection() {
		let registry = sample_registry();
		let mut active = ActiveConnectionList::new();
		let mut allocator = ConnectionIdAllocator::new(0x1234);
		let logger = discard_logger();

		let body = class3_forward_open_body(42, 0, 0);
		forward_open(&body, &registry, &mut active, &mut allocator, 10, &logger).unwrap();

		let mut close_body = Writer::new();
		close_body.write_u8(0x0A).unwrap();
		close_body.write_u8(5).unwrap();
		close_body.write_u16_le(42).unwrap();
		close_body.write_u16_le(OUR_VENDOR_ID).unwrap();
		close_body.write_u32_le(0xCAFEBABE).unwrap();
		close_body.write_u8(0).unwrap();
		close_body.write_u8(0).unwrap();

		forward_close(&close_body.into_inner(), &mut active).unwrap();
		assert_eq!(active.iter().count(), 0);
	}

	#[test]
	fn forward_close_without_match_reports_not_found() {
		let mut active = ActiveConnectionList::new();
		let mut close_body = Writer::new();
		close_body.write_u8(0x0A).unwrap();
		close_body.write_u8(5).unwrap();
		close_body.write_u16_le(1).unwrap();
		close_body.write_u16_le(1).unwrap();
		close_body.write_u32_le(1).unwrap();
		close_body.write_u8(0).unwrap();
		close_body.write_u8(0).unwrap();

		let err = forward_close(&close_body.into_inner(), &mut active).unwrap_err();
		assert_eq!(err.extended, ExtendedStatus::ConnectionNotFoundAtTargetApplication);
	}
}
