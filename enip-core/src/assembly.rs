//! The Assembly object: opaque byte-array instances used as I/O connection endpoints (§3, §4.4),
//! plus the connectable-object hookup that wires a fresh I/O connection to its instances
//! (§4.6 step 7, §9 "connectable-object table").

use crate::connection::ConnectionPath;
use crate::connection_manager::ASSEMBLY_CLASS;
use crate::error::{CipError, EnipError, ExtendedStatus, GeneralStatus};
use crate::registry::{
	AttributeFlags, AttributeValue, Registry, ServiceDescriptor, ServiceKind, SVC_GET_ATTRIBUTE_ALL, SVC_GET_ATTRIBUTE_SINGLE,
	SVC_SET_ATTRIBUTE_SINGLE,
};

const ATTR_DATA: u16 = 3;
const ATTR_LENGTH: u16 = 4;

/// Registers the Assembly class (0x04) with the services this crate's Message Router
/// dispatches against it (§6).
pub fn register_assembly_class(registry: &mut Registry) -> Result<(), EnipError> {
	registry.register_class(ASSEMBLY_CLASS, "Assembly", 2, 0, 2, 0, 3, 0, (1 << ATTR_DATA) | (1 << ATTR_LENGTH))?;

	for (code, name, kind) in [
		(SVC_GET_ATTRIBUTE_SINGLE, "Get_Attribute_Single", ServiceKind::GetAttributeSingle),
		(SVC_GET_ATTRIBUTE_ALL, "Get_Attribute_All", ServiceKind::GetAttributeAll),
		(SVC_SET_ATTRIBUTE_SINGLE, "Set_Attribute_Single", ServiceKind::SetAttributeSingle),
	] {
		registry.insert_instance_service(ASSEMBLY_CLASS, ServiceDescriptor { code, name, kind })?;
	}

	Ok(())
}

/// Adds an Assembly instance seeded with `data` (attribute 3) and its length (attribute 4,
/// read-only). `data`'s length is fixed for the instance's lifetime: later writes must match it
/// exactly (§4.4).
pub fn add_assembly_instance(registry: &mut Registry, instance_id: u16, data: Vec<u8>) -> Result<(), EnipError> {
	registry.add_instance(ASSEMBLY_CLASS, instance_id)?;
	let length = data.len() as u16;
	registry.insert_instance_attribute(
		ASSEMBLY_CLASS,
		instance_id,
		ATTR_DATA,
		AttributeValue::ByteArray(data),
		AttributeFlags::GETABLE_SINGLE | AttributeFlags::GETABLE_ALL | AttributeFlags::SETABLE_SINGLE,
	)?;
	registry.insert_instance_attribute(
		ASSEMBLY_CLASS,
		instance_id,
		ATTR_LENGTH,
		AttributeValue::Uint(length),
		AttributeFlags::GETABLE_SINGLE | AttributeFlags::GETABLE_ALL,
	)?;
	Ok(())
}

/// Which Assembly instances a freshly-opened I/O connection reads from and writes to.
pub struct AssemblyAttachment {
	pub producing_instance: Option<u16>,
	pub consuming_instance: Option<u16>,
}

/// The Assembly class's open-connection handler (§4.6 step 7): resolves `path.points` into
/// consuming/producing instance references, in the fixed O→T-then-T→O order, validating each
/// negotiated connection size against the instance's actual data length.
pub fn open_assembly_connection(
	registry: &Registry,
	path: &ConnectionPath,
	o_to_t_non_null: bool,
	t_to_o_non_null: bool,
	consumed_connection_size: u16,
	produced_connection_size: u16,
) -> Result<AssemblyAttachment, CipError> {
	let mut next_point = 0;
	let mut consuming_instance = None;
	let mut producing_instance = None;

	if o_to_t_non_null {
		let instance_id = path.points[next_point] as u16;
		next_point += 1;
		check_assembly_size(registry, instance_id, consumed_connection_size, false)?;
		consuming_instance = Some(instance_id);
	}

	if t_to_o_non_null {
		let instance_id = path.points[next_point] as u16;
		check_assembly_size(registry, instance_id, produced_connection_size, true)?;
		producing_instance = Some(instance_id);
	}

	Ok(AssemblyAttachment {
		producing_instance,
		consuming_instance,
	})
}

fn check_assembly_size(registry: &Registry, instance_id: u16, requested_size: u16, is_produced: bool) -> Result<(), CipError> {
	let class = registry
		.get_cip_class(ASSEMBLY_CLASS)
		.ok_or_else(|| CipError::with_extended(GeneralStatus::ConnectionFailure, ExtendedStatus::InvalidSegmentTypeInPath))?;
	let instance = class
		.instance(instance_id)
		.ok_or_else(|| CipError::with_extended(GeneralStatus::ConnectionFailure, ExtendedStatus::InvalidSegmentTypeInPath))?;

	let actual = match instance.attribute(ATTR_DATA).map(|a| &a.value) {
		Some(AttributeValue::ByteArray(bytes)) => bytes.len() as u16,
		_ => 0,
	};

	if actual != requested_size {
		let extended = if is_produced {
			ExtendedStatus::InvalidTToOConnectionSize(actual)
		} else {
			ExtendedStatus::InvalidOToTConnectionSize(actual)
		};
		return Err(CipError::with_extended(GeneralStatus::ConnectionFailure, extended));
	}

	Ok(())
}

/// Reads an Assembly instance's current data attribute, e.g. to build a producer datagram.
pub fn read_assembly_data(registry: &Registry, instance_id: u16) -> Option<Vec<u8>> {
	let class = registry.get_cip_class(ASSEMBLY_CLASS)?;
	let instance = class.instance(instance_id)?;
	match instance.attribute(ATTR_DATA).map(|a| &a.value) {
		Some(AttributeValue::ByteArray(bytes)) => Some(bytes.clone()),
		_ => None,
	}
}

/// Overwrites an Assembly instance's data attribute from connected I/O data (§4.11's
/// `receive_data` handler): same exact-length rule as `SetAttributeSingle`, but bypassing the
/// attribute-flags check since connected data delivery isn't gated by `SETABLE_SINGLE`. Returns
/// whether the write landed, so the caller knows whether to run `after_assembly_data_received`.
pub fn receive_connected_data(registry: &mut Registry, instance_id: u16, data: &[u8]) -> bool {
	let Some(class) = registry.get_cip_class_mut(ASSEMBLY_CLASS) else {
		return false;
	};
	let Some(instance) = class.instance_mut(instance_id) else {
		return false;
	};
	let Some(attr) = instance.attribute_mut(ATTR_DATA) else {
		return false;
	};
	let AttributeValue::ByteArray(bytes) = &mut attr.value else {
		return false;
	};
	if bytes.len() != data.len() {
		return false;
	}
	bytes.copy_from_slice(data);
	true
}

#[cfg(test)]
mod test {
	use super::*;

	fn sample_registry() -> Registry {
		let mut reg = Registry::new();
		register_assembly_class(&mut reg).unwrap();
		add_assembly_instance(&mut reg, 100, vec![0u8; 4]).unwrap(); // output (O->T)
		add_assembly_instance(&mut reg, 101, vec![0u8; 2]).unwrap(); // input (T->O)
		reg
	}

	#[test]
	fn attaches_both_directions_when_both_non_null() {
		let reg = sample_registry();
		let path = ConnectionPath {
			points: [100, 101, 0],
			..Default::default()
		};

		let attachment = open_assembly_connection(&reg, &path, true, true, 4, 2).unwrap();
		assert_eq!(attachment.consuming_instance, Some(100));
		assert_eq!(attachment.producing_instance, Some(101));
	}

	#[test]
	fn mismatched_size_is_rejected_with_correct_size() {
		let reg = sample_registry();
		let path = ConnectionPath {
			points: [100, 0, 0],
			..Default::default()
		};

		let err = open_assembly_connection(&reg, &path, true, false, 8, 0).unwrap_err();
		assert_eq!(err.extended, ExtendedStatus::InvalidOToTConnectionSize(4));
	}

	#[test]
	fn producer_only_connection_leaves_consuming_instance_unset() {
		let reg = sample_registry();
		let path = ConnectionPath {
			points: [101, 0, 0],
			..Default::default()
		};

		let attachment = open_assembly_connection(&reg, &path, false, true, 0, 2).unwrap();
		assert_eq!(attachment.consuming_instance, None);
		assert_eq!(attachment.producing_instance, Some(101));
	}
}
