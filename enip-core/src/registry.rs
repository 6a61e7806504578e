//! Object registry: classes keyed by class ID, each owning ordered instances, an attribute
//! table, and a service table (§3 Data Model, §4.4).

use std::collections::BTreeMap;

use bitflags::bitflags;
use bytestruct::{Endian, WriteToWithEndian};

use crate::codec::{CipString, ShortString, Writer};
use crate::epath::RequestPath;
use crate::error::{CipError, EnipError, GeneralStatus};

bitflags! {
	/// Access flags on an attribute descriptor (§3 Attribute descriptor).
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct AttributeFlags: u8 {
		const GETABLE_SINGLE = 0x01;
		const GETABLE_ALL = 0x02;
		const SETABLE_SINGLE = 0x04;
	}
}

/// The CIP TCP/IP Interface Object's compound attribute 5 ("Interface Configuration").
#[derive(Debug, Clone, PartialEq)]
pub struct TcpIpInterfaceConfig {
	pub ip_address: [u8; 4],
	pub network_mask: [u8; 4],
	pub gateway_address: [u8; 4],
	pub name_server: [u8; 4],
	pub name_server2: [u8; 4],
	pub domain_name: CipString,
}

/// One value a CIP attribute can hold, covering the CIP type tags named in §3.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
	Bool(bool),
	Sint(i8),
	Usint(u8),
	Int(i16),
	Uint(u16),
	Dint(i32),
	Udint(u32),
	Lint(i64),
	Ulint(u64),
	Real(f32),
	Str(CipString),
	ShortStr(ShortString),
	ByteArray(Vec<u8>),
	EPath(RequestPath),
	Mac([u8; 6]),
	UintArray6([u16; 6]),
	TcpIpInterfaceConfig(Box<TcpIpInterfaceConfig>),
}

impl AttributeValue {
	/// Encodes this value the way `GetAttributeSingle`/`GetAttributeAll` serialize it into a
	/// reply (§4.4).
	pub fn encode(&self) -> Vec<u8> {
		let mut w = Writer::new();
		match self {
			AttributeValue::Bool(v) => w.write_u8(*v as u8).unwrap(),
			AttributeValue::Sint(v) => w.0.push(v.to_le_bytes()[0]),
			AttributeValue::Usint(v) => w.write_u8(*v).unwrap(),
			AttributeValue::Int(v) => w.write(v, Endian::Little).unwrap(),
			AttributeValue::Uint(v) => w.write_u16_le(*v).unwrap(),
			AttributeValue::Dint(v) => w.write(v, Endian::Little).unwrap(),
			AttributeValue::Udint(v) => w.write_u32_le(*v).unwrap(),
			AttributeValue::Lint(v) => w.write(v, Endian::Little).unwrap(),
			AttributeValue::Ulint(v) => w.write(v, Endian::Little).unwrap(),
			AttributeValue::Real(v) => w.0.extend_from_slice(&v.to_le_bytes()),
			AttributeValue::Str(s) => s.write_to_with_endian(&mut w.0, Endian::Little).unwrap(),
			AttributeValue::ShortStr(s) => s.write_to_with_endian(&mut w.0, Endian::Little).unwrap(),
			AttributeValue::ByteArray(bytes) => w.0.extend_from_slice(bytes),
			AttributeValue::EPath(path) => w.0.extend(crate::epath::encode_padded_epath(path)),
			AttributeValue::Mac(mac) => w.0.extend_from_slice(mac),
			AttributeValue::UintArray6(arr) => {
				for v in arr {
					w.write_u16_le(*v).unwrap();
				}
			}
			AttributeValue::TcpIpInterfaceConfig(cfg) => {
				w.write_u32_le(0).unwrap(); // status: always "valid, configured" in this core
				w.write_u32_le(0).unwrap(); // configuration capability: none advertised
				w.write_u32_le(0).unwrap(); // configuration control: static
				w.0.extend_from_slice(&cfg.ip_address);
				w.0.extend_from_slice(&cfg.network_mask);
				w.0.extend_from_slice(&cfg.gateway_address);
				w.0.extend_from_slice(&cfg.name_server);
				w.0.extend_from_slice(&cfg.name_server2);
				cfg.domain_name.write_to_with_endian(&mut w.0, Endian::Little).unwrap();
			}
		}
		w.into_inner()
	}
}

/// One attribute: number, current value, and the flags gating GetAttributeSingle/All and
/// SetAttributeSingle (§3).
#[derive(Debug, Clone)]
pub struct Attribute {
	pub number: u16,
	pub value: AttributeValue,
	pub flags: AttributeFlags,
}

/// The service codes this crate's classes expose (§6). Kept as a closed enum rather than a
/// function-pointer table: an adapter's service set is fixed at build time, and `match` reads
/// more plainly than an indirect call through a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
	GetAttributeSingle,
	GetAttributeAll,
	SetAttributeSingle,
	ForwardOpen,
	ForwardClose,
	GetConnectionOwner,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceDescriptor {
	pub code: u8,
	pub name: &'static str,
	pub kind: ServiceKind,
}

pub const SVC_GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
pub const SVC_GET_ATTRIBUTE_ALL: u8 = 0x01;
pub const SVC_SET_ATTRIBUTE_SINGLE: u8 = 0x10;
pub const SVC_FORWARD_OPEN: u8 = 0x54;
pub const SVC_FORWARD_CLOSE: u8 = 0x4E;
pub const SVC_GET_CONNECTION_OWNER: u8 = 0x5A;

/// `0x80 | request_service`, per §3's service descriptor rule.
pub fn reply_service(request_service: u8) -> u8 {
	0x80 | request_service
}

/// A single instance: its own attribute table plus the instance number that identifies it
/// within its class (§3).
#[derive(Debug, Clone)]
pub struct Instance {
	pub id: u16,
	attributes: Vec<Attribute>,
	attribute_slots: usize,
}

impl Instance {
	pub fn attribute(&self, number: u16) -> Option<&Attribute> {
		self.attributes.iter().find(|a| a.number == number)
	}

	pub fn attribute_mut(&mut self, number: u16) -> Option<&mut Attribute> {
		self.attributes.iter_mut().find(|a| a.number == number)
	}

	pub fn attributes(&self) -> &[Attribute] {
		&self.attributes
	}
}

/// A CIP class: the ordered instance list, the class's own (metaclass) attribute table, and
/// both service tables (§3).
#[derive(Debug, Clone)]
pub struct CipClass {
	pub id: u32,
	pub name: String,
	pub revision: u16,
	instances: Vec<Instance>,
	default_instance_attribute_slots: usize,
	class_attributes: Vec<Attribute>,
	class_attribute_slots: usize,
	class_services: Vec<ServiceDescriptor>,
	class_service_slots: usize,
	instance_services: Vec<ServiceDescriptor>,
	instance_service_slots: usize,
	pub get_all_class_mask: u32,
	pub get_all_instance_mask: u32,
	highest_attribute_number: u16,
}

impl CipClass {
	pub fn instance(&self, instance_id: u16) -> Option<&Instance> {
		self.instances.iter().find(|i| i.id == instance_id)
	}

	pub fn instance_mut(&mut self, instance_id: u16) -> Option<&mut Instance> {
		self.instances.iter_mut().find(|i| i.id == instance_id)
	}

	pub fn instances(&self) -> &[Instance] {
		&self.instances
	}

	pub fn class_attributes(&self) -> &[Attribute] {
		&self.class_attributes
	}

	/// The attribute table and GetAttributeAll mask to use for `instance_id`: instance 0 is
	/// the class object itself (§3 "Instance ID 0 denotes the class object").
	pub fn attributes_for(&self, instance_id: u16) -> Option<(&[Attribute], u32)> {
		if instance_id == 0 {
			Some((&self.class_attributes, self.get_all_class_mask))
		} else {
			self.instance(instance_id).map(|i| (i.attributes(), self.get_all_instance_mask))
		}
	}

	pub fn service(&self, instance_id: u16, code: u8) -> Option<&ServiceDescriptor> {
		let table = if instance_id == 0 {
			&self.class_services
		} else {
			&self.instance_services
		};
		table.iter().find(|s| s.code == code)
	}

	pub fn highest_attribute_number(&self) -> u16 {
		self.highest_attribute_number
	}
}

/// The full set of classes known to this adapter, keyed by class ID (§3 "class IDs are
/// unique across the registry").
#[derive(Debug, Default)]
pub struct Registry {
	classes: BTreeMap<u32, CipClass>,
}

impl Registry {
	pub fn new() -> Self {
		Registry::default()
	}

	#[allow(clippy::too_many_arguments)]
	pub fn register_class(
		&mut self,
		class_id: u32,
		name: impl Into<String>,
		revision: u16,
		class_attribute_slots: usize,
		instance_attribute_slots: usize,
		class_service_slots: usize,
		instance_service_slots: usize,
		get_all_class_mask: u32,
		get_all_instance_mask: u32,
	) -> Result<(), EnipError> {
		if self.classes.contains_key(&class_id) {
			return Err(EnipError::ClassAlreadyRegistered(class_id));
		}

		self.classes.insert(
			class_id,
			CipClass {
				id: class_id,
				name: name.into(),
				revision,
				instances: Vec::new(),
				default_instance_attribute_slots: instance_attribute_slots,
				class_attributes: Vec::with_capacity(class_attribute_slots),
				class_attribute_slots,
				class_services: Vec::with_capacity(class_service_slots),
				class_service_slots,
				instance_services: Vec::with_capacity(instance_service_slots),
				instance_service_slots,
				get_all_class_mask,
				get_all_instance_mask,
				highest_attribute_number: 0,
			},
		);

		Ok(())
	}

	pub fn get_cip_class(&self, class_id: u32) -> Option<&CipClass> {
		self.classes.get(&class_id)
	}

	pub fn get_cip_class_mut(&mut self, class_id: u32) -> Option<&mut CipClass> {
		self.classes.get_mut(&class_id)
	}

	/// Idempotent per instance ID, per §4.4. Attribute capacity is the class's declared
	/// `instance_attribute_slots`.
	pub fn add_instance(&mut self, class_id: u32, instance_id: u16) -> Result<(), EnipError> {
		let class = self
			.classes
			.get_mut(&class_id)
			.ok_or(EnipError::UnknownClass(class_id))?;

		if class.instance(instance_id).is_some() {
			return Ok(());
		}

		let attribute_slots = class.default_instance_attribute_slots;
		class.instances.push(Instance {
			id: instance_id,
			attributes: Vec::with_capacity(attribute_slots),
			attribute_slots,
		});
		Ok(())
	}

	pub fn insert_instance_attribute(
		&mut self,
		class_id: u32,
		instance_id: u16,
		number: u16,
		value: AttributeValue,
		flags: AttributeFlags,
	) -> Result<(), EnipError> {
		let class = self
			.classes
			.get_mut(&class_id)
			.ok_or(EnipError::UnknownClass(class_id))?;
		class.highest_attribute_number = class.highest_attribute_number.max(number);

		let instance = class
			.instances
			.iter_mut()
			.find(|i| i.id == instance_id)
			.ok_or(EnipError::UnknownInstance(class_id, instance_id))?;

		if instance.attributes.len() >= instance.attribute_slots {
			return Err(EnipError::AttributeSlotsExhausted(
				class_id,
				instance.attribute_slots,
				instance.attributes.len(),
			));
		}

		instance.attributes.push(Attribute { number, value, flags });
		Ok(())
	}

	pub fn insert_class_attribute(
		&mut self,
		class_id: u32,
		number: u16,
		value: AttributeValue,
		flags: AttributeFlags,
	) -> Result<(), EnipError> {
		let class = self
			.classes
			.get_mut(&class_id)
			.ok_or(EnipError::UnknownClass(class_id))?;

		if class.class_attributes.len() >= class.class_attribute_slots {
			return Err(EnipError::AttributeSlotsExhausted(
				class_id,
				class.class_attribute_slots,
				class.class_attributes.len(),
			));
		}

		class.class_attributes.push(Attribute { number, value, flags });
		Ok(())
	}

	pub fn insert_instance_service(&mut self, class_id: u32, descriptor: ServiceDescriptor) -> Result<(), EnipError> {
		let class = self
			.classes
			.get_mut(&class_id)
			.ok_or(EnipError::UnknownClass(class_id))?;

		if class.instance_services.len() >= class.instance_service_slots {
			return Err(EnipError::ServiceSlotsExhausted(
				class_id,
				class.instance_service_slots,
				class.instance_services.len(),
			));
		}

		class.instance_services.push(descriptor);
		Ok(())
	}

	pub fn insert_class_service(&mut self, class_id: u32, descriptor: ServiceDescriptor) -> Result<(), EnipError> {
		let class = self
			.classes
			.get_mut(&class_id)
			.ok_or(EnipError::UnknownClass(class_id))?;

		if class.class_services.len() >= class.class_service_slots {
			return Err(EnipError::ServiceSlotsExhausted(
				class_id,
				class.class_service_slots,
				class.class_services.len(),
			));
		}

		class.class_services.push(descriptor);
		Ok(())
	}
}

/// GetAttributeAll: ascending attribute number, gated by `get_all_mask` bit `n` for `n < 32`
/// (§4.4).
pub fn get_attribute_all(attributes: &[Attribute], get_all_mask: u32) -> Vec<u8> {
	let mut out = Vec::new();
	for attr in attributes {
		if attr.number < 32 && (get_all_mask & (1 << attr.number)) != 0 && attr.flags.contains(AttributeFlags::GETABLE_ALL) {
			out.extend(attr.value.encode());
		}
	}
	out
}

/// GetAttributeSingle: the attribute must both carry `GETABLE_SINGLE` and exist (§4.4).
pub fn get_attribute_single(attributes: &[Attribute], number: u16) -> Result<Vec<u8>, CipError> {
	let attr = attributes
		.iter()
		.find(|a| a.number == number)
		.ok_or(CipError::new(GeneralStatus::AttributeNotSupported))?;

	if !attr.flags.contains(AttributeFlags::GETABLE_SINGLE) {
		return Err(CipError::new(GeneralStatus::AttributeNotSupported));
	}

	Ok(attr.value.encode())
}
