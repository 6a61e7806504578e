//! `EnipStack`: the single value that owns a running adapter's core state and ties the other
//! modules together (§5 Concurrency/Resource Model — one thread, `&mut EnipStack` drives every
//! entry point).

use std::net::{Ipv4Addr, SocketAddrV4};

use slog::{debug, warn, Logger};

use crate::assembly;
use crate::codec::{Cursor, Writer};
use crate::connection::{ActiveConnectionList, ConnectionHandle, ConnectionState, SocketHandle};
use crate::connection_manager::{self, ConnectionIdAllocator};
use crate::cpf::{decode_cpf, encode_cpf, unconnected_envelope, CpfItem};
use crate::error::{CipError, GeneralStatus};
use crate::hooks::ApplicationHooks;
use crate::identity::{self, IdentityConfig, TcpIpConfig};
use crate::message_router::{self, RouterError, Routed};
use crate::registry::{reply_service, Registry, ServiceKind, SVC_FORWARD_CLOSE, SVC_FORWARD_OPEN, SVC_GET_CONNECTION_OWNER};
use crate::timing::{self, TickOutcome};

/// Startup parameters an embedder supplies once, up front (§6 "persisted state").
pub struct EnipConfig {
	/// Seeds the high 16 bits of every connection ID this stack hands out (§4.9).
	pub incarnation_id: u16,
	/// The fixed tick length `ManageConnections` is driven at, in milliseconds (§4.12). 10ms
	/// unless an embedder has a reason to run coarser or finer.
	pub timer_tick_ms: u32,
}

impl Default for EnipConfig {
	fn default() -> Self {
		EnipConfig {
			incarnation_id: 0,
			timer_tick_ms: 10,
		}
	}
}

/// What the network layer should actually transmit for one connection whose transmission
/// trigger fired this tick (§4.12 step 2's `send_data`). Writing `bytes` to `socket` is the
/// embedder's job, not this crate's (§1 Non-goals).
pub struct ProducedDatagram {
	pub socket: SocketHandle,
	pub destination: Option<SocketAddrV4>,
	pub bytes: Vec<u8>,
}

/// The adapter-side core: object registry, active-connection list, connection-ID allocator,
/// and the fixed tick, all behind one value so a single `&mut EnipStack` is enough to drive
/// any entry point (§5).
pub struct EnipStack {
	registry: Registry,
	active: ActiveConnectionList,
	allocator: ConnectionIdAllocator,
	tick_ms: u32,
	logger: Logger,
}

impl EnipStack {
	/// Builds a fresh stack and registers the classes this core always carries: Identity,
	/// TCP/IP Interface, Ethernet Link, Message Router, Connection Manager, and Assembly (§6).
	pub fn new(config: EnipConfig, identity: &IdentityConfig, tcp_ip: TcpIpConfig, logger: Logger) -> Result<Self, crate::error::EnipError> {
		let mut registry = Registry::new();
		identity::register_core_objects(&mut registry, identity, tcp_ip)?;
		assembly::register_assembly_class(&mut registry)?;

		Ok(EnipStack {
			registry,
			active: ActiveConnectionList::new(),
			allocator: ConnectionIdAllocator::new(config.incarnation_id),
			tick_ms: config.timer_tick_ms,
			logger,
		})
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn registry_mut(&mut self) -> &mut Registry {
		&mut self.registry
	}

	pub fn active_connections(&self) -> &ActiveConnectionList {
		&self.active
	}

	/// `NotifyMR`: the unconnected explicit-message entry point (§4.5). Always returns the full
	/// reply bytes, CPF-wrapped — there is no `Result` at this boundary, per §7's propagation
	/// policy that CIP-level failures become replies, never Rust errors.
	pub fn notify_mr(&mut self, hooks: &mut dyn ApplicationHooks, data: &[u8]) -> Vec<u8> {
		let active = &self.active;
		let is_connected_output = |class_id: u32, instance_id: u16| {
			class_id == connection_manager::ASSEMBLY_CLASS
				&& active
					.iter()
					.any(|(_, c)| c.state == ConnectionState::Established && c.producing_instance == Some(instance_id))
		};

		match message_router::notify(&mut self.registry, hooks, &is_connected_output, data) {
			Ok(Routed::Reply(resp)) => message_router::encode_reply(Ok(resp)),
			Ok(Routed::ConnectionManagerService { kind, payload }) => self.dispatch_connection_manager_service(kind, payload),
			Err(err) => message_router::encode_reply(Err(err)),
		}
	}

	fn dispatch_connection_manager_service(&mut self, kind: ServiceKind, payload: Vec<u8>) -> Vec<u8> {
		match kind {
			ServiceKind::ForwardOpen => {
				match connection_manager::forward_open(&payload, &self.registry, &mut self.active, &mut self.allocator, self.tick_ms, &self.logger) {
					Ok(accepted) => connection_manager::encode_forward_open_reply(&accepted),
					Err(err) => encode_forward_open_error(&payload, err),
				}
			}
			ServiceKind::ForwardClose => match connection_manager::forward_close(&payload, &mut self.active) {
				Ok(reply) => reply,
				Err(err) => encode_forward_close_error(&payload, err),
			},
			// GetConnectionOwner's multi-owner bookkeeping is out of scope for a single-stack
			// adapter core (open question, see design notes); always report unsupported.
			ServiceKind::GetConnectionOwner => message_router::encode_reply(Err(RouterError {
				service: SVC_GET_CONNECTION_OWNER,
				error: CipError::new(GeneralStatus::ServiceNotSupported),
			})),
			ServiceKind::GetAttributeSingle | ServiceKind::GetAttributeAll | ServiceKind::SetAttributeSingle => {
				unreachable!("message_router only routes connection manager service kinds here")
			}
		}
	}

	/// `HandleReceivedConnectedData` (§4.11): a connected datagram arrived on `source`. Silently
	/// dropped (logged, no reply — this is UDP) on any framing error, unknown connection ID,
	/// source mismatch, or stale sequence number.
	pub fn handle_received_connected_data(&mut self, hooks: &mut dyn ApplicationHooks, source: Ipv4Addr, data: &[u8]) {
		let mut cur = Cursor::new(data);
		let items = match decode_cpf(&mut cur) {
			Ok(items) => items,
			Err(_) => {
				debug!(self.logger, "connected data datagram failed CPF decode");
				return;
			}
		};

		let (connection_id, sequence_number, connected_data) = match items.as_slice() {
			[CpfItem::ConnectionAddress { connection_id }, CpfItem::ConnectedData(bytes), ..] => (*connection_id, None, bytes.as_slice()),
			[CpfItem::SequencedAddress { connection_id, sequence_number }, CpfItem::ConnectedData(bytes), ..] => {
				(*connection_id, Some(*sequence_number), bytes.as_slice())
			}
			_ => {
				debug!(self.logger, "connected data item list missing address/data pair");
				return;
			}
		};

		let handle = match self.active.find_by_consumed_id(connection_id) {
			Some(handle) => handle,
			None => {
				debug!(self.logger, "connected data for unknown connection id"; "connection_id" => connection_id);
				return;
			}
		};

		let consuming_instance = {
			let conn = self.active.get_mut(handle).expect("handle just resolved from the same list");

			if let Some(expected) = conn.originator_addr {
				if *expected.ip() != source {
					warn!(self.logger, "connected datagram source mismatch";
						"expected" => expected.ip().to_string(), "actual" => source.to_string());
					return;
				}
			}

			if let Some(seq) = sequence_number {
				if !seq_gt32(seq, conn.eip_level_sequence_count_consuming) {
					return;
				}
				conn.eip_level_sequence_count_consuming = seq;
			}

			let base = (conn.o_to_t_rpi_us / 1000) << (2 + conn.connection_timeout_multiplier as u32);
			conn.inactivity_watchdog_timer_ms = base.max(10_000) as i64;

			conn.consuming_instance
		};

		if let Some(instance_id) = consuming_instance {
			if assembly::receive_connected_data(&mut self.registry, instance_id, connected_data) {
				let _ = hooks.after_assembly_data_received(instance_id);
			}
		}
	}

	/// `ManageConnections` (§4.12): advances every connection's timers by one tick.
	pub fn manage_connections(&mut self, hooks: &mut dyn ApplicationHooks) -> TickOutcome {
		timing::manage_connections(&mut self.active, self.tick_ms, hooks, &self.logger)
	}

	/// Nudges an application-triggered connection to produce at the next allowed moment (§9).
	pub fn trigger_connections(&mut self, out_instance: u16, in_instance: u16) -> bool {
		timing::trigger_connections(&mut self.active, out_instance, in_instance)
	}

	/// The producer send path: builds the connected-data datagram for each connection named in
	/// `outcome.ready_to_produce`, running `before_assembly_data_send` and bumping the producing
	/// sequence counters (§4.12 step 2).
	pub fn produce(&mut self, hooks: &mut dyn ApplicationHooks, outcome: &TickOutcome) -> Vec<ProducedDatagram> {
		let mut out = Vec::new();

		for &handle in &outcome.ready_to_produce {
			let (socket, destination, connection_id, instance_id, sequence_number) = {
				let Some(conn) = self.active.get_mut(handle) else { continue };
				let Some(instance_id) = conn.producing_instance else { continue };
				conn.eip_level_sequence_count_producing = conn.eip_level_sequence_count_producing.wrapping_add(1);
				(
					conn.produce_socket,
					conn.originator_addr,
					conn.produced_connection_id,
					instance_id,
					conn.eip_level_sequence_count_producing,
				)
			};

			hooks.before_assembly_data_send(instance_id);
			let Some(data) = assembly::read_assembly_data(&self.registry, instance_id) else { continue };

			let items = vec![
				CpfItem::SequencedAddress { connection_id, sequence_number },
				CpfItem::ConnectedData(data),
			];
			out.push(ProducedDatagram {
				socket,
				destination,
				bytes: encode_cpf(&items),
			});
		}

		out
	}
}

/// §4.11's `SEQ_GT32`: `a` is newer than `b` under 32-bit wraparound comparison.
fn seq_gt32(a: u32, b: u32) -> bool {
	let diff = a.wrapping_sub(b);
	(diff & 0x8000_0000) == 0 && a != b
}

/// Builds a ForwardOpen error reply: 10-byte body carrying the identity triple so the
/// originator can correlate the failure, followed by the general/extended status (§4.6 step 8,
/// §7 propagation policy). The header is re-decoded from the original request since
/// `connection_manager::forward_open`'s error path doesn't carry it back.
fn encode_forward_open_error(payload: &[u8], err: CipError) -> Vec<u8> {
	let mut cur = Cursor::new(payload);
	let header = connection_manager::decode_forward_open_header(&mut cur).ok();

	let mut w = Writer::new();
	w.write_u8(reply_service(SVC_FORWARD_OPEN)).unwrap();
	w.write_u8(0).unwrap();
	w.write_u8(err.general.code()).unwrap();
	let words = err.extended.words();
	w.write_u8(words.len() as u8).unwrap();
	for word in words {
		w.write_u16_le(word).unwrap();
	}

	w.write_u16_le(header.as_ref().map_or(0, |h| h.connection_serial_number)).unwrap();
	w.write_u16_le(header.as_ref().map_or(0, |h| h.originator_vendor_id)).unwrap();
	w.write_u32_le(header.as_ref().map_or(0, |h| h.originator_serial_number)).unwrap();
	w.write_u8(0).unwrap(); // remaining path size
	w.write_u8(0).unwrap(); // reserved

	unconnected_envelope(w.into_inner())
}

/// Builds a ForwardClose error reply in the same identity-echoing shape as the success body
/// (§4.6 step 8, §7).
fn encode_forward_close_error(payload: &[u8], err: CipError) -> Vec<u8> {
	let mut cur = Cursor::new(payload);
	let header = connection_manager::decode_forward_close_header(&mut cur).ok();

	let mut w = Writer::new();
	w.write_u8(reply_service(SVC_FORWARD_CLOSE)).unwrap();
	w.write_u8(0).unwrap();
	w.write_u8(err.general.code()).unwrap();
	let words = err.extended.words();
	w.write_u8(words.len() as u8).unwrap();
	for word in words {
		w.write_u16_le(word).unwrap();
	}

	w.write_u16_le(header.as_ref().map_or(0, |h| h.connection_serial_number)).unwrap();
	w.write_u16_le(header.as_ref().map_or(0, |h| h.originator_vendor_id)).unwrap();
	w.write_u32_le(header.as_ref().map_or(0, |h| h.originator_serial_number)).unwrap();
	w.write_u8(header.as_ref().map_or(0, |h| h.remaining_path_size)).unwrap();
	w.write_u8(0).unwrap();

	unconnected_envelope(w.into_inner())
}
