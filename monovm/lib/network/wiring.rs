//! Splicing discovered interfaces into VMs.
//!
//! Every interworking model moves traffic between the interface found in the namespace and a
//! VM-facing device whose descriptors end up in the hypervisor:
//!
//! - `Bridged`: a TAP device and the interface are enslaved to a fresh bridge.
//! - `MacVtap`: a macvtap device is stacked on the interface, which hands it its MAC and IPv4
//!   addresses.
//! - `TcFilter`: ingress qdiscs on both the TAP device and the interface redirect every packet
//!   to the other side.
//!
//! The functions here must run inside the namespace holding the interface.

use rand::Rng;

use crate::{
    config::{NetInterworkingModel, DEFAULT_NET_INTERWORKING_MODEL, DEFAULT_QLEN},
    hypervisor::Hypervisor,
    network::{
        create_macvtap_fds, create_tap, create_vhost_fds, EndpointType, LinkAttrs, NetlinkHandle,
        NetworkInterfacePair,
    },
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Attempts made to find a free interface index for a macvtap device.
const MACVTAP_CREATE_ATTEMPTS: usize = 128;

/// The lowest interface index handed to macvtap devices.
const MACVTAP_BASE_INDEX: u32 = 8192;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Wires the interface of `pair` to a VM-facing device, following the pair's model.
///
/// The queue count is the vCPU count when the hypervisor supports multi-queue networking and 0
/// otherwise. vhost-net descriptors are opened unless the hypervisor configuration disables
/// them. Descriptors are left in `pair.tap_interface`.
///
/// ## Errors
///
/// Returns `UnsupportedNetworkModel` for `Enlightened` and `InvalidNetworkModel` for `None`
/// and `Invalid`. Netlink and device failures abort the wiring where they happen.
pub fn xconnect_vm_network(
    pair: &mut NetworkInterfacePair,
    endpoint_type: EndpointType,
    hypervisor: &dyn Hypervisor,
) -> MonovmResult<()> {
    let queues = if hypervisor.capabilities().is_multi_queue_supported() {
        *hypervisor.config().get_num_vcpus() as usize
    } else {
        0
    };
    let disable_vhost_net = *hypervisor.config().get_disable_vhost_net();

    if pair.interworking_model == NetInterworkingModel::Default {
        pair.interworking_model = DEFAULT_NET_INTERWORKING_MODEL;
    }

    tracing::info!(
        iface = %pair.virt_iface.name,
        model = %pair.interworking_model,
        queues,
        "connecting interface to the vm"
    );

    match pair.interworking_model {
        NetInterworkingModel::Bridged => {
            bridge_network_pair(pair, endpoint_type, queues, disable_vhost_net)
        }
        NetInterworkingModel::MacVtap => {
            tap_network_pair(pair, endpoint_type, queues, disable_vhost_net)
        }
        NetInterworkingModel::TcFilter => {
            setup_tc_filtering(pair, endpoint_type, queues, disable_vhost_net)
        }
        NetInterworkingModel::Enlightened => Err(MonovmError::UnsupportedNetworkModel(
            NetInterworkingModel::Enlightened,
        )),
        model => Err(MonovmError::InvalidNetworkModel(model)),
    }
}

/// Undoes [`xconnect_vm_network`].
///
/// ## Errors
///
/// Fails like [`xconnect_vm_network`] on unusable models.
pub fn xdisconnect_vm_network(
    pair: &mut NetworkInterfacePair,
    endpoint_type: EndpointType,
) -> MonovmResult<()> {
    if pair.interworking_model == NetInterworkingModel::Default {
        pair.interworking_model = DEFAULT_NET_INTERWORKING_MODEL;
    }

    tracing::info!(
        iface = %pair.virt_iface.name,
        model = %pair.interworking_model,
        "disconnecting interface from the vm"
    );

    match pair.interworking_model {
        NetInterworkingModel::Bridged => unbridge_network_pair(pair, endpoint_type),
        NetInterworkingModel::MacVtap => untap_network_pair(pair, endpoint_type),
        NetInterworkingModel::TcFilter => remove_tc_filtering(pair, endpoint_type),
        NetInterworkingModel::Enlightened => Err(MonovmError::UnsupportedNetworkModel(
            NetInterworkingModel::Enlightened,
        )),
        model => Err(MonovmError::InvalidNetworkModel(model)),
    }
}

/// Stacks a macvtap device on the interface and moves the interface's identity onto it.
///
/// The macvtap takes over the MAC of the interface, which gets the random MAC of the pair
/// instead, and the IPv4 addresses of the interface are parked in the pair.
fn tap_network_pair(
    pair: &mut NetworkInterfacePair,
    endpoint_type: EndpointType,
    queues: usize,
    disable_vhost_net: bool,
) -> MonovmResult<()> {
    let netlink = NetlinkHandle::new()?;
    let link = virtual_link(&netlink, pair, endpoint_type)?;

    let tx_queue_len = match link.tx_queue_len {
        0 => DEFAULT_QLEN,
        len => len,
    };

    let tap_name = pair.tap_interface.tap_iface.name.clone();
    let tap_link = create_macvtap(&netlink, &tap_name, link.index, tx_queue_len)?;

    pair.tap_interface.tap_iface.hard_addr = link.hardware_addr.clone();

    netlink.set_mtu(tap_link.index, link.mtu)?;
    netlink.set_hardware_addr(link.index, &pair.virt_iface.hard_addr)?;
    netlink.set_hardware_addr(tap_link.index, &link.hardware_addr)?;
    netlink.set_up(tap_link.index)?;

    pair.virt_iface.addrs = netlink.clear_v4_addresses(link.index)?;

    netlink.set_up(link.index)?;

    let (vm_fds, vhost_fds) = create_macvtap_fds(tap_link.index, queues, disable_vhost_net)?;

    pair.tap_interface.vm_fds = vm_fds;
    pair.tap_interface.vhost_fds = vhost_fds;

    Ok(())
}

/// Joins a new TAP device and the interface with a bridge.
fn bridge_network_pair(
    pair: &mut NetworkInterfacePair,
    endpoint_type: EndpointType,
    queues: usize,
    disable_vhost_net: bool,
) -> MonovmResult<()> {
    let netlink = NetlinkHandle::new()?;

    let tap_name = pair.tap_interface.tap_iface.name.clone();
    let vm_fds = create_tap(&tap_name, queues)?;
    let tap_link = link_of_type(&netlink, &tap_name, "tap")?;
    let vhost_fds = if disable_vhost_net {
        Vec::new()
    } else {
        create_vhost_fds(queues)?
    };

    let link = virtual_link(&netlink, pair, endpoint_type)?;
    pair.tap_interface.tap_iface.hard_addr = link.hardware_addr.clone();

    netlink.set_mtu(tap_link.index, link.mtu)?;
    netlink.set_hardware_addr(link.index, &pair.virt_iface.hard_addr)?;

    let bridge = netlink.add_bridge(&pair.tap_interface.name)?;

    netlink.set_controller(tap_link.index, bridge.index)?;
    netlink.set_up(tap_link.index)?;

    netlink.set_controller(link.index, bridge.index)?;
    netlink.set_up(link.index)?;

    netlink.set_up(bridge.index)?;

    pair.tap_interface.vm_fds = vm_fds;
    pair.tap_interface.vhost_fds = vhost_fds;

    Ok(())
}

/// Redirects all traffic between a new TAP device and the interface with tc filters.
fn setup_tc_filtering(
    pair: &mut NetworkInterfacePair,
    endpoint_type: EndpointType,
    queues: usize,
    disable_vhost_net: bool,
) -> MonovmResult<()> {
    let netlink = NetlinkHandle::new()?;

    let tap_name = pair.tap_interface.tap_iface.name.clone();
    let vm_fds = create_tap(&tap_name, queues)?;
    let tap_link = link_of_type(&netlink, &tap_name, "tap")?;
    let vhost_fds = if disable_vhost_net {
        Vec::new()
    } else {
        create_vhost_fds(queues)?
    };

    let link = virtual_link(&netlink, pair, endpoint_type)?;
    pair.tap_interface.tap_iface.hard_addr = link.hardware_addr.clone();

    netlink.set_mtu(tap_link.index, link.mtu)?;
    netlink.set_up(tap_link.index)?;

    netlink.add_ingress_qdisc(tap_link.index)?;
    netlink.add_ingress_qdisc(link.index)?;

    netlink.add_redirect_filter(link.index, tap_link.index)?;
    netlink.add_redirect_filter(tap_link.index, link.index)?;

    pair.tap_interface.vm_fds = vm_fds;
    pair.tap_interface.vhost_fds = vhost_fds;

    Ok(())
}

fn untap_network_pair(
    pair: &mut NetworkInterfacePair,
    endpoint_type: EndpointType,
) -> MonovmResult<()> {
    let netlink = NetlinkHandle::new()?;

    let tap_link = link_of_type(&netlink, &pair.tap_interface.tap_iface.name, "macvtap")?;
    netlink.delete_link(tap_link.index)?;

    let link = virtual_link(&netlink, pair, endpoint_type)?;
    netlink.set_hardware_addr(link.index, &pair.tap_interface.tap_iface.hard_addr)?;
    netlink.set_down(link.index)?;

    for addr in &pair.virt_iface.addrs {
        netlink.add_address(link.index, addr)?;
    }

    Ok(())
}

fn unbridge_network_pair(
    pair: &mut NetworkInterfacePair,
    endpoint_type: EndpointType,
) -> MonovmResult<()> {
    let netlink = NetlinkHandle::new()?;

    let tap_link = link_of_type(&netlink, &pair.tap_interface.tap_iface.name, "tap")?;
    let bridge = link_of_type(&netlink, &pair.tap_interface.name, "bridge")?;

    netlink.set_down(bridge.index)?;
    netlink.set_down(tap_link.index)?;
    netlink.clear_controller(tap_link.index)?;

    netlink.delete_link(bridge.index)?;
    netlink.delete_link(tap_link.index)?;

    let link = virtual_link(&netlink, pair, endpoint_type)?;
    netlink.set_hardware_addr(link.index, &pair.tap_interface.tap_iface.hard_addr)?;
    netlink.set_down(link.index)?;
    netlink.clear_controller(link.index)
}

/// Removes the TAP device and the ingress qdisc of the interface, which drops its filters.
fn remove_tc_filtering(
    pair: &mut NetworkInterfacePair,
    endpoint_type: EndpointType,
) -> MonovmResult<()> {
    let netlink = NetlinkHandle::new()?;

    let tap_link = link_of_type(&netlink, &pair.tap_interface.tap_iface.name, "tap")?;
    netlink.set_down(tap_link.index)?;
    netlink.delete_link(tap_link.index)?;

    let link = virtual_link(&netlink, pair, endpoint_type)?;
    netlink.delete_ingress_qdisc(link.index)?;
    netlink.set_down(link.index)
}

/// Creates a macvtap device, retrying with other random interface indices on failure.
///
/// Only the error of the last attempt is returned.
fn create_macvtap(
    netlink: &NetlinkHandle,
    name: &str,
    parent_index: u32,
    tx_queue_len: u32,
) -> MonovmResult<LinkAttrs> {
    let mut rng = rand::rng();
    let mut last_error = None;

    for attempt in 0..MACVTAP_CREATE_ATTEMPTS {
        let index = MACVTAP_BASE_INDEX + (rng.random::<u32>() & 0xFFFF);

        match netlink.add_macvtap(name, index, parent_index, tx_queue_len) {
            Ok(()) => return link_of_type(netlink, name, "macvtap"),
            Err(e) => {
                tracing::debug!(%name, index, attempt, error = %e, "macvtap creation failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| MonovmError::LinkNotFound(name.to_string())))
}

/// Looks up the interface the pair was built for, checking its kind matches the endpoint.
fn virtual_link(
    netlink: &NetlinkHandle,
    pair: &NetworkInterfacePair,
    endpoint_type: EndpointType,
) -> MonovmResult<LinkAttrs> {
    let expected = endpoint_type.virtual_link_type().ok_or_else(|| {
        MonovmError::Unsupported(format!("{endpoint_type} endpoints have no interface pair"))
    })?;

    link_of_type(netlink, &pair.virt_iface.name, expected)
}

/// Looks a link up by name and checks its kind.
pub(crate) fn link_of_type(
    netlink: &NetlinkHandle,
    name: &str,
    expected: &str,
) -> MonovmResult<LinkAttrs> {
    let link = netlink.link_by_name(name)?;

    if link.link_type != expected {
        return Err(MonovmError::UnexpectedLinkType {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: link.link_type,
        });
    }

    Ok(link)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
