//! Unconnected explicit-message dispatch (§4.5).

use crate::codec::{Cursor, Writer};
use crate::connection_manager::ASSEMBLY_CLASS;
use crate::cpf::unconnected_envelope;
use crate::epath::decode_padded_epath;
use crate::error::{CipError, GeneralStatus};
use crate::hooks::ApplicationHooks;
use crate::registry::{
	get_attribute_all, get_attribute_single, reply_service, AttributeFlags, AttributeValue, Registry, ServiceKind,
};

/// A resolved reply, ready for `encode_reply` (§4.5 step 5's `MessageRouterResponse`).
pub struct MessageRouterResponse {
	pub reply_service: u8,
	pub general_status: GeneralStatus,
	pub extended_status: Vec<u16>,
	pub data: Vec<u8>,
}

impl MessageRouterResponse {
	fn ok(reply_service: u8, data: Vec<u8>) -> Self {
		MessageRouterResponse {
			reply_service,
			general_status: GeneralStatus::Success,
			extended_status: Vec::new(),
			data,
		}
	}
}

/// What `notify` produced after the common routing steps (§4.5 steps 1-4). Attribute services
/// are fully resolved here; Connection Manager services need the active-connection list and ID
/// allocator, which this module does not hold, so they come back unresolved for `EnipStack` to
/// finish (§4.6 step 7's "invoke the open handler").
pub enum Routed {
	Reply(MessageRouterResponse),
	ConnectionManagerService { kind: ServiceKind, payload: Vec<u8> },
}

/// `notify` failed; `service` is the echoed reply service (0 if the request was too short to
/// even carry a service byte).
pub struct RouterError {
	pub service: u8,
	pub error: CipError,
}

/// `notify(data, length)` (§4.5). `is_connected_output` reports whether `(class_id,
/// instance_id)` is currently the producing side of an established I/O connection; writes to
/// such an instance are rejected regardless of its `SETABLE_SINGLE` flag (§4.4).
pub fn notify(
	registry: &mut Registry,
	hooks: &mut dyn ApplicationHooks,
	is_connected_output: &dyn Fn(u32, u16) -> bool,
	data: &[u8],
) -> Result<Routed, RouterError> {
	let mut cur = Cursor::new(data);
	let service = cur.read_u8().map_err(|_| RouterError {
		service: 0,
		error: CipError::new(GeneralStatus::NotEnoughData),
	})?;

	let wrap = |error: CipError| RouterError { service, error };

	let (path, _) = decode_padded_epath(&mut cur).map_err(CipError::from).map_err(wrap)?;
	let payload = cur
		.read_bytes(cur.remaining())
		.map_err(|_| wrap(CipError::new(GeneralStatus::NotEnoughData)))?
		.to_vec();

	let class_id = path.class.ok_or_else(|| wrap(CipError::new(GeneralStatus::PathSegmentError)))?;
	let instance_id = path.instance.unwrap_or(0) as u16;

	// §4.5 step 3: the original reports PathDestinationUnknown here too, not ObjectDoesNotExist,
	// matching a conformance test tool's expectation. Preserved deliberately.
	let kind = {
		let class = registry
			.get_cip_class(class_id)
			.ok_or_else(|| wrap(CipError::new(GeneralStatus::PathDestinationUnknown)))?;
		class
			.attributes_for(instance_id)
			.ok_or_else(|| wrap(CipError::new(GeneralStatus::PathDestinationUnknown)))?;
		class
			.service(instance_id, service)
			.ok_or_else(|| wrap(CipError::new(GeneralStatus::ServiceNotSupported)))?
			.kind
	};

	match kind {
		ServiceKind::ForwardOpen | ServiceKind::ForwardClose | ServiceKind::GetConnectionOwner => {
			Ok(Routed::ConnectionManagerService { kind, payload })
		}
		ServiceKind::GetAttributeSingle => {
			let attribute = path.attribute.ok_or_else(|| wrap(CipError::new(GeneralStatus::PathSegmentError)))? as u16;
			if class_id == ASSEMBLY_CLASS {
				hooks.before_assembly_data_send(instance_id);
			}
			let class = registry.get_cip_class(class_id).expect("checked above");
			let (attrs, _) = class.attributes_for(instance_id).expect("checked above");
			let bytes = get_attribute_single(attrs, attribute).map_err(wrap)?;
			Ok(Routed::Reply(MessageRouterResponse::ok(reply_service(service), bytes)))
		}
		ServiceKind::GetAttributeAll => {
			if class_id == ASSEMBLY_CLASS {
				hooks.before_assembly_data_send(instance_id);
			}
			let class = registry.get_cip_class(class_id).expect("checked above");
			let (attrs, mask) = class.attributes_for(instance_id).expect("checked above");
			let bytes = get_attribute_all(attrs, mask);
			Ok(Routed::Reply(MessageRouterResponse::ok(reply_service(service), bytes)))
		}
		ServiceKind::SetAttributeSingle => {
			let attribute = path.attribute.ok_or_else(|| wrap(CipError::new(GeneralStatus::PathSegmentError)))? as u16;
			set_assembly_attribute(registry, hooks, is_connected_output, class_id, instance_id, attribute, &payload)
				.map_err(wrap)?;
			Ok(Routed::Reply(MessageRouterResponse::ok(reply_service(service), Vec::new())))
		}
	}
}

/// The built-in Assembly `SetAttributeSingle` handler (§4.4): exact-length overwrite of a
/// `BYTE_ARRAY` attribute, guarded by the connected-output rule and the attribute's own flags.
fn set_assembly_attribute(
	registry: &mut Registry,
	hooks: &mut dyn ApplicationHooks,
	is_connected_output: &dyn Fn(u32, u16) -> bool,
	class_id: u32,
	instance_id: u16,
	attribute: u16,
	payload: &[u8],
) -> Result<(), CipError> {
	if is_connected_output(class_id, instance_id) {
		return Err(CipError::new(GeneralStatus::AttributeNotSetable));
	}

	let class = registry
		.get_cip_class_mut(class_id)
		.ok_or_else(|| CipError::new(GeneralStatus::PathDestinationUnknown))?;
	let instance = class
		.instance_mut(instance_id)
		.ok_or_else(|| CipError::new(GeneralStatus::PathDestinationUnknown))?;
	let attr = instance
		.attribute_mut(attribute)
		.ok_or_else(|| CipError::new(GeneralStatus::AttributeNotSupported))?;

	if !attr.flags.contains(AttributeFlags::SETABLE_SINGLE) {
		return Err(CipError::new(GeneralStatus::AttributeNotSetable));
	}

	let AttributeValue::ByteArray(bytes) = &mut attr.value else {
		return Err(CipError::new(GeneralStatus::InvalidAttributeValue));
	};

	match payload.len().cmp(&bytes.len()) {
		std::cmp::Ordering::Less => return Err(CipError::new(GeneralStatus::NotEnoughData)),
		std::cmp::Ordering::Greater => return Err(CipError::new(GeneralStatus::TooMuchData)),
		std::cmp::Ordering::Equal => bytes.copy_from_slice(payload),
	}

	// Write-through-then-validate (§9): the bytes already landed above; a hook error only
	// downgrades the reply status, it does not roll the write back.
	hooks
		.after_assembly_data_received(instance_id)
		.map_err(CipError::new)?;

	Ok(())
}

/// Serializes a resolved response, or the `CipError`/`RouterError` from an earlier step, into
/// the reply body: `reply_service, reserved, general_status, extended_word_count, extended
/// words..., data`. Wrapped in the null-address + unconnected-data CPF envelope (§4.5 step 5).
pub fn encode_reply(result: Result<MessageRouterResponse, RouterError>) -> Vec<u8> {
	let mut w = Writer::new();
	match result {
		Ok(resp) => {
			w.write_u8(resp.reply_service).unwrap();
			w.write_u8(0).unwrap();
			w.write_u8(resp.general_status.code()).unwrap();
			w.write_u8(resp.extended_status.len() as u8).unwrap();
			for word in &resp.extended_status {
				w.write_u16_le(*word).unwrap();
			}
			w.0.extend_from_slice(&resp.data);
		}
		Err(RouterError { service, error }) => {
			w.write_u8(reply_service(service)).unwrap();
			w.write_u8(0).unwrap();
			w.write_u8(error.general.code()).unwrap();
			let words = error.extended.words();
			w.write_u8(words.len() as u8).unwrap();
			for word in words {
				w.write_u16_le(word).unwrap();
			}
		}
	}
	unconnected_envelope(w.into_inner())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::registry::{ServiceDescriptor, SVC_GET_ATTRIBUTE_ALL, SVC_GET_ATTRIBUTE_SINGLE, SVC_SET_ATTRIBUTE_SINGLE};
	use crate::hooks::NullHooks;

	const IDENTITY_CLASS: u32 = 0x01;

	fn sample_registry() -> Registry {
		let mut reg = Registry::new();
		reg.register_class(IDENTITY_CLASS, "Identity", 1, 0, 8, 0, 2, 0, 0b11).unwrap();
		reg.add_instance(IDENTITY_CLASS, 1).unwrap();
		reg.insert_instance_attribute(
			IDENTITY_CLASS,
			1,
			1,
			AttributeValue::Uint(0x1234),
			AttributeFlags::GETABLE_SINGLE | AttributeFlags::GETABLE_ALL,
		)
		.unwrap();
		reg.insert_instance_service(
			IDENTITY_CLASS,
			ServiceDescriptor {
				code: SVC_GET_ATTRIBUTE_SINGLE,
				name: "Get_Attribute_Single",
				kind: ServiceKind::GetAttributeSingle,
			},
		)
		.unwrap();
		reg.insert_instance_service(
			IDENTITY_CLASS,
			ServiceDescriptor {
				code: SVC_GET_ATTRIBUTE_ALL,
				name: "Get_Attribute_All",
				kind: ServiceKind::GetAttributeAll,
			},
		)
		.unwrap();
		reg
	}

	fn no_connected_outputs(_class_id: u32, _instance_id: u16) -> bool {
		false
	}

	#[test]
	fn s1_get_attribute_single_reads_vendor_id() {
		let mut reg = sample_registry();
		let mut hooks = NullHooks;
		// service 0x0E, path [0x20 0x01 0x24 0x01 0x30 0x01]
		let request = [0x0E, 0x03, 0x20, 0x01, 0x24, 0x01, 0x30, 0x01];

		let routed = notify(&mut reg, &mut hooks, &no_connected_outputs, &request).unwrap();
		match routed {
			Routed::Reply(resp) => {
				assert_eq!(resp.reply_service, 0x8E);
				assert_eq!(resp.data, vec![0x34, 0x12]);
			}
			_ => panic!("expected a resolved reply"),
		}
	}

	#[test]
	fn unknown_class_is_path_destination_unknown() {
		let mut reg = sample_registry();
		let mut hooks = NullHooks;
		let request = [0x0E, 0x03, 0x20, 0x99, 0x24, 0x01, 0x30, 0x01];

		let err = notify(&mut reg, &mut hooks, &no_connected_outputs, &request).unwrap_err();
		assert_eq!(err.error.general, GeneralStatus::PathDestinationUnknown);
	}

	#[test]
	fn unregistered_service_code_is_service_not_supported() {
		let mut reg = sample_registry();
		let mut hooks = NullHooks;
		let request = [SVC_SET_ATTRIBUTE_SINGLE, 0x03, 0x20, 0x01, 0x24, 0x01, 0x30, 0x01];

		let err = notify(&mut reg, &mut hooks, &no_connected_outputs, &request).unwrap_err();
		assert_eq!(err.error.general, GeneralStatus::ServiceNotSupported);
	}

	#[test]
	fn assembly_set_attribute_single_overwrites_exact_length() {
		let mut reg = Registry::new();
		reg.register_class(ASSEMBLY_CLASS, "Assembly", 2, 0, 2, 0, 1, 0, 0).unwrap();
		reg.add_instance(ASSEMBLY_CLASS, 100).unwrap();
		reg.insert_instance_attribute(
			ASSEMBLY_CLASS,
			100,
			3,
			AttributeValue::ByteArray(vec![0, 0, 0, 0]),
			AttributeFlags::GETABLE_SINGLE | AttributeFlags::SETABLE_SINGLE,
		)
		.unwrap();
		reg.insert_instance_service(
			ASSEMBLY_CLASS,
			ServiceDescriptor {
				code: SVC_SET_ATTRIBUTE_SINGLE,
				name: "Set_Attribute_Single",
				kind: ServiceKind::SetAttributeSingle,
			},
		)
		.unwrap();
		let mut hooks = NullHooks;

		// service 0x10, path [0x20 0x04 0x24 0x64 0x30 0x03], data = 4 bytes
		let mut request = vec![0x10, 0x03, 0x20, 0x04, 0x24, 0x64, 0x30, 0x03];
		request.extend_from_slice(&[1, 2, 3, 4]);

		let routed = notify(&mut reg, &mut hooks, &no_connected_outputs, &request).unwrap();
		assert!(matches!(routed, Routed::Reply(_)));

		let class = reg.get_cip_class(ASSEMBLY_CLASS).unwrap();
		let (attrs, _) = class.attributes_for(100).unwrap();
		assert_eq!(attrs[0].value, AttributeValue::ByteArray(vec![1, 2, 3, 4]));
	}

	#[test]
	fn writing_a_connected_output_assembly_is_rejected() {
		let mut reg = Registry::new();
		reg.register_class(ASSEMBLY_CLASS, "Assembly", 2, 0, 2, 0, 1, 0, 0).unwrap();
		reg.add_instance(ASSEMBLY_CLASS, 100).unwrap();
		reg.insert_instance_attribute(
			ASSEMBLY_CLASS,
			100,
			3,
			AttributeValue::ByteArray(vec![0, 0]),
			AttributeFlags::GETABLE_SINGLE | AttributeFlags::SETABLE_SINGLE,
		)
		.unwrap();
		reg.insert_instance_service(
			ASSEMBLY_CLASS,
			ServiceDescriptor {
				code: SVC_SET_ATTRIBUTE_SINGLE,
				name: "Set_Attribute_Single",
				kind: ServiceKind::SetAttributeSingle,
			},
		)
		.unwrap();
		let mut hooks = NullHooks;

		let mut request = vec![0x10, 0x03, 0x20, 0x04, 0x24, 0x64, 0x30, 0x03];
		request.extend_from_slice(&[1, 2]);

		let err = notify(&mut reg, &mut hooks, &|_, _| true, &request).unwrap_err();
		assert_eq!(err.error.general, GeneralStatus::AttributeNotSetable);
	}
}
