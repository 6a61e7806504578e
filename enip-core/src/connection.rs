//! The CIP connection record and the generational active-connection list (§3, §9).

use std::net::SocketAddrV4;

use crate::epath::ElectronicKey;

/// An opaque socket descriptor from the external network layer. `INVALID` stands in for the
/// original's `-1` sentinel (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketHandle(pub i32);

impl SocketHandle {
	pub const INVALID: SocketHandle = SocketHandle(-1);

	pub fn is_valid(&self) -> bool {
		self.0 >= 0
	}
}

impl Default for SocketHandle {
	fn default() -> Self {
		SocketHandle::INVALID
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
	#[default]
	NonExistent,
	Configuring,
	WaitingForConnectionID,
	Established,
	TimedOut,
}

/// Bits 0-3 of `transport_type_class_trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportClass {
	Class0,
	Class1,
	Class2,
	Class3,
	Other(u8),
}

/// Bits 4-6 of `transport_type_class_trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionTrigger {
	Cyclic,
	ChangeOfState,
	ApplicationTriggered,
	Other(u8),
}

/// What `ManageConnections` does when the inactivity watchdog expires (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchdogTimeoutAction {
	#[default]
	AutoDelete,
	AutoReset,
	DeferredDelete,
	Manual,
}

/// The role-specific behavior a connection plays, dispatched by `match` rather than a
/// heap-indirected function table per connection (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
	ClassThree,
	IoProducer,
	IoConsumer,
	IoBidirectional,
}

/// The `(connection_serial_number, originator_vendor_id, originator_serial_number)` triple
/// used for duplicate detection and ForwardClose matching (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionIdentity {
	pub connection_serial_number: u16,
	pub originator_vendor_id: u16,
	pub originator_serial_number: u32,
}

/// The three connection-point/configuration-instance slots a connection path parses into
/// (§4.7); for a Class-3 connection, slot 0 is aliased from slot 2 (the configuration
/// instance).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionPath {
	pub class_id: u32,
	pub points: [u32; 3],
}

/// A single CIP connection, the central record mutated by ForwardOpen, the timer tick, and
/// the connected-data receive path (§3).
#[derive(Debug, Clone)]
pub struct CipConnection {
	pub state: ConnectionState,
	pub role: ConnectionRole,

	pub consumed_connection_id: u32,
	pub produced_connection_id: u32,

	pub identity: ConnectionIdentity,

	pub o_to_t_rpi_us: u32,
	pub t_to_o_rpi_us: u32,
	pub o_to_t_network_params: u16,
	pub t_to_o_network_params: u16,
	pub consumed_connection_size: u16,
	pub produced_connection_size: u16,

	pub connection_timeout_multiplier: u8,
	pub transport_type_class_trigger: u8,

	pub electronic_key: Option<ElectronicKey>,
	pub path: ConnectionPath,

	pub config_data: Vec<u8>,

	pub producing_instance: Option<u16>,
	pub consuming_instance: Option<u16>,

	pub consume_socket: SocketHandle,
	pub produce_socket: SocketHandle,
	pub originator_addr: Option<SocketAddrV4>,

	pub eip_level_sequence_count_producing: u32,
	pub eip_level_sequence_count_consuming: u32,
	pub sequence_count_producing: u32,
	pub sequence_count_consuming: u32,

	pub inactivity_watchdog_timer_ms: i64,
	pub transmission_trigger_timer_ms: i64,
	pub production_inhibit_timer_ms: i64,
	/// Configured production-inhibit time, or the sentinel `256` meaning "none" (§3).
	pub production_inhibit_time_ms: u16,
	pub expected_packet_rate_ms: u32,

	pub watchdog_timeout_action: WatchdogTimeoutAction,
}

impl CipConnection {
	/// Bits 0-3.
	pub fn transport_class(&self) -> TransportClass {
		match self.transport_type_class_trigger & 0x0F {
			0 => TransportClass::Class0,
			1 => TransportClass::Class1,
			2 => TransportClass::Class2,
			3 => TransportClass::Class3,
			other => TransportClass::Other(other),
		}
	}

	/// Bits 4-6.
	pub fn production_trigger(&self) -> ProductionTrigger {
		match (self.transport_type_class_trigger >> 4) & 0x07 {
			0 => ProductionTrigger::Cyclic,
			1 => ProductionTrigger::ChangeOfState,
			2 => ProductionTrigger::ApplicationTriggered,
			other => ProductionTrigger::Other(other),
		}
	}

	/// Bit 7: set means the target is Server (it consumes; the originator produces), clear
	/// means the target is Client (it produces) (§4.8).
	pub fn target_is_server(&self) -> bool {
		self.transport_type_class_trigger & 0x80 != 0
	}

	pub fn is_non_cyclic(&self) -> bool {
		!matches!(self.production_trigger(), ProductionTrigger::Cyclic)
	}
}

/// A stable address into the active-connection slab: an index plus a generation counter, so a
/// handle captured before a delete/reuse cycle is detected rather than silently aliasing a
/// different connection (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
	index: usize,
	generation: u32,
}

enum Slot {
	Occupied { generation: u32, connection: CipConnection },
	Vacant { generation: u32, next_free: Option<usize> },
}

/// The generational slab backing the active-connection list: the ownership-strict substitute
/// for the original's intrusive doubly-linked list (§3, §9).
#[derive(Default)]
pub struct ActiveConnectionList {
	slots: Vec<Slot>,
	free_head: Option<usize>,
}

impl ActiveConnectionList {
	pub fn new() -> Self {
		ActiveConnectionList::default()
	}

	pub fn insert(&mut self, connection: CipConnection) -> ConnectionHandle {
		match self.free_head {
			Some(index) => {
				let generation = match &self.slots[index] {
					Slot::Vacant { generation, .. } => *generation,
					Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
				};
				let next_free = match &self.slots[index] {
					Slot::Vacant { next_free, .. } => *next_free,
					Slot::Occupied { .. } => unreachable!(),
				};
				self.free_head = next_free;
				self.slots[index] = Slot::Occupied { generation, connection };
				ConnectionHandle { index, generation }
			}
			None => {
				let index = self.slots.len();
				self.slots.push(Slot::Occupied { generation: 0, connection });
				ConnectionHandle { index, generation: 0 }
			}
		}
	}

	pub fn get(&self, handle: ConnectionHandle) -> Option<&CipConnection> {
		match self.slots.get(handle.index)? {
			Slot::Occupied { generation, connection } if *generation == handle.generation => Some(connection),
			_ => None,
		}
	}

	pub fn get_mut(&mut self, handle: ConnectionHandle) -> Option<&mut CipConnection> {
		match self.slots.get_mut(handle.index)? {
			Slot::Occupied { generation, connection } if *generation == handle.generation => Some(connection),
			_ => None,
		}
	}

	pub fn remove(&mut self, handle: ConnectionHandle) -> Option<CipConnection> {
		let slot = self.slots.get_mut(handle.index)?;
		match slot {
			Slot::Occupied { generation, .. } if *generation == handle.generation => {
				let generation = *generation;
				let old = std::mem::replace(
					slot,
					Slot::Vacant {
						generation: generation.wrapping_add(1),
						next_free: self.free_head,
					},
				);
				self.free_head = Some(handle.index);
				match old {
					Slot::Occupied { connection, .. } => Some(connection),
					Slot::Vacant { .. } => unreachable!(),
				}
			}
			_ => None,
		}
	}

	/// Every live connection and its handle, in slot order.
	pub fn iter(&self) -> impl Iterator<Item = (ConnectionHandle, &CipConnection)> {
		self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
			Slot::Occupied { generation, connection } => Some((
				ConnectionHandle {
					index,
					generation: *generation,
				},
				connection,
			)),
			Slot::Vacant { .. } => None,
		})
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = (ConnectionHandle, &mut CipConnection)> {
		self.slots.iter_mut().enumerate().filter_map(|(index, slot)| match slot {
			Slot::Occupied { generation, connection } => Some((
				ConnectionHandle {
					index,
					generation: *generation,
				},
				connection,
			)),
			Slot::Vacant { .. } => None,
		})
	}

	/// Linear scan for a connection matching the identity triple, restricted to Established or
	/// TimedOut records (the states ForwardClose and the ForwardOpen duplicate check care
	/// about).
	pub fn find_by_identity(&self, identity: ConnectionIdentity) -> Option<ConnectionHandle> {
		self.iter()
			.find(|(_, c)| {
				matches!(c.state, ConnectionState::Established | ConnectionState::TimedOut) && c.identity == identity
			})
			.map(|(handle, _)| handle)
	}

	pub fn find_by_consumed_id(&self, consumed_connection_id: u32) -> Option<ConnectionHandle> {
		self.iter()
			.find(|(_, c)| c.state == ConnectionState::Established && c.consumed_connection_id == consumed_connection_id)
			.map(|(handle, _)| handle)
	}
}

impl PartialEq for ConnectionIdentity {
	fn eq(&self, other: &Self) -> bool {
		self.connection_serial_number == other.connection_serial_number
			&& self.originator_vendor_id == other.originator_vendor_id
			&& self.originator_serial_number == other.originator_serial_number
	}
}
impl Eq for ConnectionIdentity {}

#[cfg(test)]
mod test {
	use super::*;

	fn sample_connection(serial: u16) -> CipConnection {
		CipConnection {
			state: ConnectionState::Established,
			role: ConnectionRole::ClassThree,
			consumed_connection_id: 0,
			produced_connection_id: 0,
			identity: ConnectionIdentity {
				connection_serial_number: serial,
				originator_vendor_id: 1,
				originator_serial_number: 0xDEAD_BEEF,
			},
			o_to_t_rpi_us: 5000,
			t_to_o_rpi_us: 5000,
			o_to_t_network_params: 0,
			t_to_o_network_params: 0,
			consumed_connection_size: 0,
			produced_connection_size: 0,
			connection_timeout_multiplier: 0,
			transport_type_class_trigger: 0xA3,
			electronic_key: None,
			path: ConnectionPath::default(),
			config_data: Vec::new(),
			producing_instance: None,
			consuming_instance: None,
			consume_socket: SocketHandle::INVALID,
			produce_socket: SocketHandle::INVALID,
			originator_addr: None,
			eip_level_sequence_count_producing: 0,
			eip_level_sequence_count_consuming: 0,
			sequence_count_producing: 0,
			sequence_count_consuming: 0,
			inactivity_watchdog_timer_ms: 10_000,
			transmission_trigger_timer_ms: 0,
			production_inhibit_timer_ms: 0,
			production_inhibit_time_ms: 256,
			expected_packet_rate_ms: 5,
			watchdog_timeout_action: WatchdogTimeoutAction::AutoDelete,
		}
	}

	#[test]
	fn insert_then_get_round_trips() {
		let mut list = ActiveConnectionList::new();
		let handle = list.insert(sample_connection(1));
		assert_eq!(list.get(handle).unwrap().identity.connection_serial_number, 1);
	}

	#[test]
	fn stale_handle_is_rejected_after_reuse() {
		let mut list = ActiveConnectionList::new();
		let first = list.insert(sample_connection(1));
		list.remove(first).unwrap();
		let second = list.insert(sample_connection(2));

		assert_eq!(first.index, second.index);
		assert!(list.get(first).is_none());
		assert_eq!(list.get(second).unwrap().identity.connection_serial_number, 2);
	}

	#[test]
	fn find_by_identity_matches_established_only() {
		let mut list = ActiveConnectionList::new();
		let mut timed_out = sample_connection(3);
		timed_out.state = ConnectionState::TimedOut;
		let handle = list.insert(timed_out);

		let identity = list.get(handle).unwrap().identity;
		assert_eq!(list.find_by_identity(identity), Some(handle));
	}

	#[test]
	fn transport_class_and_trigger_decode_from_byte() {
		let conn = sample_connection(1); // 0xA3 = server (bit7=1), trigger bits 4-6 = ApplicationTriggered, class 3
		assert_eq!(conn.transport_class(), TransportClass::Class3);
		assert!(conn.target_is_server());
	}
}
