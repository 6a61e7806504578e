//! Identity, TCP/IP Interface, and Ethernet Link objects, plus the Message Router and
//! Connection Manager class registrations this crate's dispatch needs (§6).

use crate::codec::{CipString, ShortString};
use crate::connection_manager::{CONNECTION_MANAGER_CLASS, MESSAGE_ROUTER_CLASS};
use crate::error::EnipError;
use crate::registry::{
	AttributeFlags, AttributeValue, Registry, ServiceDescriptor, ServiceKind, TcpIpInterfaceConfig, SVC_FORWARD_CLOSE,
	SVC_FORWARD_OPEN, SVC_GET_ATTRIBUTE_ALL, SVC_GET_ATTRIBUTE_SINGLE, SVC_GET_CONNECTION_OWNER,
};

pub const IDENTITY_CLASS: u32 = 0x01;
pub const TCP_IP_INTERFACE_CLASS: u32 = 0xF5;
pub const ETHERNET_LINK_CLASS: u32 = 0xF6;

/// What an embedder supplies at startup to populate the Identity object (§6, persisted state).
pub struct IdentityConfig {
	pub vendor_id: u16,
	pub device_type: u16,
	pub product_code: u16,
	pub major_revision: u8,
	pub minor_revision: u8,
	pub serial_number: u32,
	pub product_name: String,
	pub mac_address: [u8; 6],
}

/// What an embedder supplies for the TCP/IP Interface object's attribute 5.
pub struct TcpIpConfig {
	pub ip_address: [u8; 4],
	pub network_mask: [u8; 4],
	pub gateway_address: [u8; 4],
	pub domain_name: String,
}

pub fn register_identity_class(registry: &mut Registry, config: &IdentityConfig) -> Result<(), EnipError> {
	// mask bits 1-7: vendor ID, device type, product code, revision, status, serial, product name
	registry.register_class(IDENTITY_CLASS, "Identity", 1, 0, 7, 0, 2, 0, 0xFE)?;
	registry.add_instance(IDENTITY_CLASS, 1)?;

	let getable = AttributeFlags::GETABLE_SINGLE | AttributeFlags::GETABLE_ALL;
	registry.insert_instance_attribute(IDENTITY_CLASS, 1, 1, AttributeValue::Uint(config.vendor_id), getable)?;
	registry.insert_instance_attribute(IDENTITY_CLASS, 1, 2, AttributeValue::Uint(config.device_type), getable)?;
	registry.insert_instance_attribute(IDENTITY_CLASS, 1, 3, AttributeValue::Uint(config.product_code), getable)?;
	registry.insert_instance_attribute(
		IDENTITY_CLASS,
		1,
		4,
		// Revision is two USINTs (major, minor); a little-endian UINT with major as the low byte
		// serializes to exactly those two bytes in order.
		AttributeValue::Uint((config.major_revision as u16) | ((config.minor_revision as u16) << 8)),
		getable,
	)?;
	registry.insert_instance_attribute(IDENTITY_CLASS, 1, 5, AttributeValue::Uint(0), getable)?; // status
	registry.insert_instance_attribute(IDENTITY_CLASS, 1, 6, AttributeValue::Udint(config.serial_number), getable)?;
	registry.insert_instance_attribute(
		IDENTITY_CLASS,
		1,
		7,
		AttributeValue::ShortStr(ShortString(config.product_name.clone())),
		getable,
	)?;

	registry.insert_instance_service(
		IDENTITY_CLASS,
		ServiceDescriptor {
			code: SVC_GET_ATTRIBUTE_SINGLE,
			name: "Get_Attribute_Single",
			kind: ServiceKind::GetAttributeSingle,
		},
	)?;
	registry.insert_instance_service(
		IDENTITY_CLASS,
		ServiceDescriptor {
			code: SVC_GET_ATTRIBUTE_ALL,
			name: "Get_Attribute_All",
			kind: ServiceKind::GetAttributeAll,
		},
	)?;

	Ok(())
}

pub fn register_tcp_ip_interface_class(registry: &mut Registry, config: TcpIpConfig) -> Result<(), EnipError> {
	registry.register_class(TCP_IP_INTERFACE_CLASS, "TCP/IP Interface", 1, 0, 1, 0, 1, 0, 1 << 5)?;
	registry.add_instance(TCP_IP_INTERFACE_CLASS, 1)?;

	registry.insert_instance_attribute(
		TCP_IP_INTERFACE_CLASS,
		1,
		5,
		AttributeValue::TcpIpInterfaceConfig(Box::new(TcpIpInterfaceConfig {
			ip_address: config.ip_address,
			network_mask: config.network_mask,
			gateway_address: config.gateway_address,
			name_server: [0; 4],
			name_server2: [0; 4],
			domain_name: CipString(config.domain_name),
		})),
		AttributeFlags::GETABLE_SINGLE | AttributeFlags::GETABLE_ALL,
	)?;

	registry.insert_instance_service(
		TCP_IP_INTERFACE_CLASS,
		ServiceDescriptor {
			code: SVC_GET_ATTRIBUTE_SINGLE,
			name: "Get_Attribute_Single",
			kind: ServiceKind::GetAttributeSingle,
		},
	)?;

	Ok(())
}

pub fn register_ethernet_link_class(registry: &mut Registry, mac_address: [u8; 6]) -> Result<(), EnipError> {
	registry.register_class(ETHERNET_LINK_CLASS, "Ethernet Link", 1, 0, 3, 0, 2, 0, 0b1110)?;
	registry.add_instance(ETHERNET_LINK_CLASS, 1)?;

	let getable = AttributeFlags::GETABLE_SINGLE | AttributeFlags::GETABLE_ALL;
	registry.insert_instance_attribute(ETHERNET_LINK_CLASS, 1, 1, AttributeValue::Udint(100_000_000), getable)?; // 100 Mbps
	registry.insert_instance_attribute(ETHERNET_LINK_CLASS, 1, 2, AttributeValue::Udint(0x0F), getable)?; // link up, full duplex
	registry.insert_instance_attribute(ETHERNET_LINK_CLASS, 1, 3, AttributeValue::Mac(mac_address), getable)?;

	registry.insert_instance_service(
		ETHERNET_LINK_CLASS,
		ServiceDescriptor {
			code: SVC_GET_ATTRIBUTE_SINGLE,
			name: "Get_Attribute_Single",
			kind: ServiceKind::GetAttributeSingle,
		},
	)?;
	registry.insert_instance_service(
		ETHERNET_LINK_CLASS,
		ServiceDescriptor {
			code: SVC_GET_ATTRIBUTE_ALL,
			name: "Get_Attribute_All",
			kind: ServiceKind::GetAttributeAll,
		},
	)?;

	Ok(())
}

/// Message Router class (0x02): default GetAttributeSingle/All only, one instance (§6).
pub fn register_message_router_class(registry: &mut Registry) -> Result<(), EnipError> {
	registry.register_class(MESSAGE_ROUTER_CLASS, "Message Router", 1, 0, 0, 0, 2, 0, 0)?;
	registry.add_instance(MESSAGE_ROUTER_CLASS, 1)?;

	registry.insert_instance_service(
		MESSAGE_ROUTER_CLASS,
		ServiceDescriptor {
			code: SVC_GET_ATTRIBUTE_SINGLE,
			name: "Get_Attribute_Single",
			kind: ServiceKind::GetAttributeSingle,
		},
	)?;
	registry.insert_instance_service(
		MESSAGE_ROUTER_CLASS,
		ServiceDescriptor {
			code: SVC_GET_ATTRIBUTE_ALL,
			name: "Get_Attribute_All",
			kind: ServiceKind::GetAttributeAll,
		},
	)?;

	Ok(())
}

/// Connection Manager class (0x06): ForwardOpen, ForwardClose, and GetConnectionOwner
/// (stubbed — see the open question in the design notes) (§6).
pub fn register_connection_manager_class(registry: &mut Registry) -> Result<(), EnipError> {
	registry.register_class(CONNECTION_MANAGER_CLASS, "Connection Manager", 1, 0, 0, 0, 3, 0, 0)?;
	registry.add_instance(CONNECTION_MANAGER_CLASS, 1)?;

	for (code, name, kind) in [
		(SVC_FORWARD_OPEN, "Forward_Open", ServiceKind::ForwardOpen),
		(SVC_FORWARD_CLOSE, "Forward_Close", ServiceKind::ForwardClose),
		(SVC_GET_CONNECTION_OWNER, "Get_Connection_Owner", ServiceKind::GetConnectionOwner),
	] {
		registry.insert_instance_service(CONNECTION_MANAGER_CLASS, ServiceDescriptor { code, name, kind })?;
	}

	Ok(())
}

/// Registers every class this core always carries, in dependency order.
pub fn register_core_objects(registry: &mut Registry, identity: &IdentityConfig, tcp_ip: TcpIpConfig) -> Result<(), EnipError> {
	register_identity_class(registry, identity)?;
	register_tcp_ip_interface_class(registry, tcp_ip)?;
	register_ethernet_link_class(registry, identity.mac_address)?;
	register_message_router_class(registry)?;
	register_connection_manager_class(registry)?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	fn sample_identity() -> IdentityConfig {
		IdentityConfig {
			vendor_id: 1,
			device_type: 0x0C,
			product_code: 1,
			major_revision: 1,
			minor_revision: 0,
			serial_number: 0x1122_3344,
			product_name: "enip-core adapter".to_string(),
			mac_address: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
		}
	}

	fn sample_tcp_ip() -> TcpIpConfig {
		TcpIpConfig {
			ip_address: [192, 168, 1, 50],
			network_mask: [255, 255, 255, 0],
			gateway_address: [192, 168, 1, 1],
			domain_name: String::new(),
		}
	}

	#[test]
	fn registers_every_core_class_once() {
		let mut reg = Registry::new();
		register_core_objects(&mut reg, &sample_identity(), sample_tcp_ip()).unwrap();

		assert!(reg.get_cip_class(IDENTITY_CLASS).is_some());
		assert!(reg.get_cip_class(TCP_IP_INTERFACE_CLASS).is_some());
		assert!(reg.get_cip_class(ETHERNET_LINK_CLASS).is_some());
		assert!(reg.get_cip_class(MESSAGE_ROUTER_CLASS).is_some());
		assert!(reg.get_cip_class(CONNECTION_MANAGER_CLASS).is_some());
	}

	#[test]
	fn identity_vendor_id_reads_back_as_configured() {
		let mut reg = Registry::new();
		register_identity_class(&mut reg, &sample_identity()).unwrap();

		let class = reg.get_cip_class(IDENTITY_CLASS).unwrap();
		let (attrs, _) = class.attributes_for(1).unwrap();
		let bytes = crate::registry::get_attribute_single(attrs, 1).unwrap();
		assert_eq!(bytes, vec![0x01, 0x00]);
	}

	#[test]
	fn connection_manager_exposes_forward_open_and_close() {
		let mut reg = Registry::new();
		register_connection_manager_class(&mut reg).unwrap();

		let class = reg.get_cip_class(CONNECTION_MANAGER_CLASS).unwrap();
		assert!(class.service(1, SVC_FORWARD_OPEN).is_some());
		assert!(class.service(1, SVC_FORWARD_CLOSE).is_some());
		assert!(class.service(1, SVC_GET_CONNECTION_OWNER).is_some());
	}
}
