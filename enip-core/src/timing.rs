//! The fixed-tick connection timer: `ManageConnections` and `trigger_connections` (§4.12).

use slog::{debug, Logger};

use crate::connection::{ActiveConnectionList, ConnectionHandle, ConnectionState, ProductionTrigger, WatchdogTimeoutAction};
use crate::hooks::ApplicationHooks;

/// What a single `manage_connections` tick produced, for the caller to act on. Sending the
/// actual wire frame for `ready_to_produce` entries is the network layer's job, not this
/// crate's (§1 Non-goals).
#[derive(Debug, Default)]
pub struct TickOutcome {
	/// Connections whose inactivity watchdog expired this tick, in slot order.
	pub timed_out: Vec<ConnectionHandle>,
	/// Connections whose transmission-trigger timer fired this tick.
	pub ready_to_produce: Vec<ConnectionHandle>,
}

/// Advances every Established connection's timers by one tick of `tick_ms`, per §4.12.
/// `AutoDelete` timeouts are removed from `active_list` before this returns; the other
/// `watchdog_timeout_action` variants only flip the connection to `TimedOut`, leaving removal
/// to the caller (e.g. a subsequent ForwardClose).
pub fn manage_connections(
	active_list: &mut ActiveConnectionList,
	tick_ms: u32,
	hooks: &mut dyn ApplicationHooks,
	logger: &Logger,
) -> TickOutcome {
	let mut outcome = TickOutcome::default();
	let tick = tick_ms as i64;
	let mut to_remove = Vec::new();

	for (handle, conn) in active_list.iter_mut() {
		if conn.state != ConnectionState::Established {
			continue;
		}

		if conn.consuming_instance.is_some() || conn.target_is_server() {
			conn.inactivity_watchdog_timer_ms -= tick;
			if conn.inactivity_watchdog_timer_ms <= 0 {
				debug!(logger, "connection watchdog expired";
					"connection_serial_number" => conn.identity.connection_serial_number);
				outcome.timed_out.push(handle);
				match conn.watchdog_timeout_action {
					WatchdogTimeoutAction::AutoDelete => to_remove.push(handle),
					_ => conn.state = ConnectionState::TimedOut,
				}
				continue;
			}
		}

		if conn.expected_packet_rate_ms != 0 && conn.produce_socket.is_valid() {
			if conn.is_non_cyclic() {
				conn.production_inhibit_timer_ms = (conn.production_inhibit_timer_ms - tick).max(0);
			}
			conn.transmission_trigger_timer_ms -= tick;
			if conn.transmission_trigger_timer_ms <= 0 {
				outcome.ready_to_produce.push(handle);
				conn.transmission_trigger_timer_ms = conn.expected_packet_rate_ms as i64;
				if conn.is_non_cyclic() {
					conn.production_inhibit_timer_ms = conn.production_inhibit_time_ms as i64;
				}
			}
		}
	}

	for handle in to_remove {
		active_list.remove(handle);
	}

	hooks.handle_application();

	outcome
}

/// Nudges the first Established, application-triggered connection whose producing/consuming
/// assembly instances match `(out_instance, in_instance)` to produce at the next allowed
/// moment: `transmission_trigger_timer := production_inhibit_timer`. Per §9, this finds the
/// first match, updates it, and returns — it does not keep scanning the rest of the list.
pub fn trigger_connections(active_list: &mut ActiveConnectionList, out_instance: u16, in_instance: u16) -> bool {
	for (_, conn) in active_list.iter_mut() {
		if conn.state != ConnectionState::Established {
			continue;
		}
		if !matches!(conn.production_trigger(), ProductionTrigger::ApplicationTriggered) {
			continue;
		}
		if conn.producing_instance != Some(out_instance) || conn.consuming_instance != Some(in_instance) {
			continue;
		}

		conn.transmission_trigger_timer_ms = conn.production_inhibit_timer_ms;
		return true;
	}

	false
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::connection::{ConnectionIdentity, ConnectionPath, ConnectionRole, SocketHandle};
	use crate::hooks::NullHooks;
	use slog::o;

	fn discard_logger() -> Logger {
		Logger::root(slog::Discard, o!())
	}

	fn sample_connection(serial: u16, transport_type_class_trigger: u8) -> crate::connection::CipConnection {
		crate::connection::CipConnection {
			state: ConnectionState::Established,
			role: ConnectionRole::IoConsumer,
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
			transport_type_class_trigger,
			electronic_key: None,
			path: ConnectionPath::default(),
			config_data: Vec::new(),
			producing_instance: None,
			consuming_instance: Some(100),
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
			expected_packet_rate_ms: 0,
			watchdog_timeout_action: WatchdogTimeoutAction::AutoDelete,
		}
	}

	#[test]
	fn watchdog_expiry_auto_deletes_exactly_once() {
		let mut active = ActiveConnectionList::new();
		active.insert(sample_connection(6, 0x03)); // consuming, class 3, cyclic
		let mut hooks = NullHooks;
		let logger = discard_logger();

		// RPI=5ms, multiplier=0 => watchdog = max(5<<2, 10_000) = 10_000ms (§8 invariant 7 / S6).
		let outcome = manage_connections(&mut active, 10_001, &mut hooks, &logger);

		assert_eq!(outcome.timed_out.len(), 1);
		assert_eq!(active.iter().count(), 0);
	}

	#[test]
	fn watchdog_survives_a_tick_within_budget() {
		let mut active = ActiveConnectionList::new();
		let handle = active.insert(sample_connection(7, 0x03));
		let mut hooks = NullHooks;
		let logger = discard_logger();

		let outcome = manage_connections(&mut active, 1_000, &mut hooks, &logger);

		assert!(outcome.timed_out.is_empty());
		assert_eq!(active.get(handle).unwrap().inactivity_watchdog_timer_ms, 9_000);
	}

	#[test]
	fn production_trigger_firing_reloads_timer() {
		let mut active = ActiveConnectionList::new();
		let handle = active.insert({
			let mut c = sample_connection(8, 0x03);
			c.produce_socket = SocketHandle(4);
			c.expected_packet_rate_ms = 100;
			c.transmission_trigger_timer_ms = 0;
			c
		});
		let mut hooks = NullHooks;
		let logger = discard_logger();

		let outcome = manage_connections(&mut active, 10, &mut hooks, &logger);

		assert_eq!(outcome.ready_to_produce, vec![handle]);
		assert_eq!(active.get(handle).unwrap().transmission_trigger_timer_ms, 100);
	}

	#[test]
	fn trigger_connections_finds_first_match_only() {
		let mut active = ActiveConnectionList::new();
		let mut c = sample_connection(9, 0x21); // ApplicationTriggered, class 1
		c.producing_instance = Some(5);
		c.consuming_instance = Some(6);
		c.production_inhibit_timer_ms = 42;
		c.transmission_trigger_timer_ms = 999;
		let handle = active.insert(c);

		let fired = trigger_connections(&mut active, 5, 6);

		assert!(fired);
		assert_eq!(active.get(handle).unwrap().transmission_trigger_timer_ms, 42);
	}

	#[test]
	fn trigger_connections_ignores_non_application_triggered() {
		let mut active = ActiveConnectionList::new();
		let mut c = sample_connection(10, 0x03); // Cyclic trigger, not ApplicationTriggered
		c.producing_instance = Some(5);
		c.consuming_instance = Some(6);
		active.insert(c);

		assert!(!trigger_connections(&mut active, 5, 6));
	}
}
