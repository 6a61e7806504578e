//! Application collaborator surface (§6 "Application hooks").

use crate::error::GeneralStatus;

/// Callbacks the embedding application supplies. `EnipStack` calls these synchronously on the
/// single core thread; none of them may block.
pub trait ApplicationHooks {
	/// Called before a BYTE_ARRAY attribute belonging to the Assembly class is encoded for a
	/// GetAttributeSingle/All reply (§4.4), so the application can refresh the data in place.
	fn before_assembly_data_send(&mut self, instance_id: u16);

	/// Called after a SetAttributeSingle write to an Assembly instance's data attribute has
	/// already landed (§9's write-through-then-validate quirk). An `Err` downgrades the reply
	/// status to `InvalidAttributeValue`, but the write itself is not rolled back.
	fn after_assembly_data_received(&mut self, instance_id: u16) -> Result<(), GeneralStatus>;

	/// Called once per `ManageConnections` tick, after timer bookkeeping (§4.12).
	fn handle_application(&mut self);

	/// Called once by the embedder at startup, before any request is routed through the core.
	fn application_initialization(&mut self);
}

/// A no-op set of hooks, useful for tests that only exercise the wire-protocol paths.
#[derive(Debug, Default)]
pub struct NullHooks;

impl ApplicationHooks for NullHooks {
	fn before_assembly_data_send(&mut self, _instance_id: u16) {}

	fn after_assembly_data_received(&mut self, _instance_id: u16) -> Result<(), GeneralStatus> {
		Ok(())
	}

	fn handle_application(&mut self) {}

	fn application_initialization(&mut self) {}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn null_hooks_never_fail_the_write() {
		let mut hooks = NullHooks;
		assert!(hooks.after_assembly_data_received(1).is_ok());
	}
}
