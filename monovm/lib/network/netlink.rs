//! A blocking facade over `rtnetlink`.
//!
//! Each [`NetlinkHandle`] opens its own route socket in the network namespace of the calling
//! thread and drives it on a private current-thread runtime. Handles must therefore be created
//! after entering the target namespace, and must not be used from inside an async task.

use std::net::IpAddr;

use futures::{Future, TryStreamExt};
use ipnetwork::IpNetwork;
use netlink_packet_route::{
    address::{AddressAttribute, AddressMessage},
    link::{InfoKind, LinkAttribute, LinkInfo, LinkLayerType, LinkMessage},
    route::{RouteAddress, RouteAttribute, RouteMessage},
    tc::TcHandle,
};
use rtnetlink::{Handle, IpVersion};
use tokio::runtime::Runtime;

use crate::{
    network::{format_mac, parse_mac, AddrInfo, LinkAttrs, RouteInfo},
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// `MACVLAN_MODE_BRIDGE` from `linux/if_link.h`.
const MACVTAP_MODE_BRIDGE: u32 = 4;

/// `RT_TABLE_MAIN` from `linux/rtnetlink.h`.
const RT_TABLE_MAIN: u8 = 254;

/// The handle of an ingress qdisc, `ffff:`.
const INGRESS_QDISC_HANDLE: u32 = 0xffff_0000;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A route netlink socket bound to the namespace it was opened in.
pub struct NetlinkHandle {
    runtime: Runtime,
    handle: Handle,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NetlinkHandle {
    /// Opens a route netlink socket in the current network namespace.
    pub fn new() -> MonovmResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;

        let handle = {
            let _guard = runtime.enter();
            let (connection, handle, _) = rtnetlink::new_connection()?;
            runtime.spawn(connection);
            handle
        };

        Ok(Self { runtime, handle })
    }

    /// Lists every link of the namespace.
    pub fn links(&self) -> MonovmResult<Vec<LinkAttrs>> {
        let messages: Vec<LinkMessage> = self
            .run("list links", self.handle.link().get().execute().try_collect())?;

        Ok(messages.into_iter().map(link_attrs).collect())
    }

    /// Looks a link up by name.
    ///
    /// ## Errors
    ///
    /// Returns `LinkNotFound` if there is no such link.
    pub fn link_by_name(&self, name: &str) -> MonovmResult<LinkAttrs> {
        let mut request = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();

        match self.runtime.block_on(request.try_next()) {
            Ok(Some(message)) => Ok(link_attrs(message)),
            Ok(None) => Err(MonovmError::LinkNotFound(name.to_string())),
            Err(e) if is_errno(&e, libc::ENODEV) => Err(MonovmError::LinkNotFound(name.to_string())),
            Err(e) => Err(MonovmError::netlink(format!("get link {name}"), e)),
        }
    }

    /// Looks a link up by index.
    ///
    /// ## Errors
    ///
    /// Returns `LinkNotFound` if there is no such link.
    pub fn link_by_index(&self, index: u32) -> MonovmResult<LinkAttrs> {
        let mut request = self.handle.link().get().match_index(index).execute();

        match self.runtime.block_on(request.try_next()) {
            Ok(Some(message)) => Ok(link_attrs(message)),
            Ok(None) => Err(MonovmError::LinkNotFound(format!("index {index}"))),
            Err(e) if is_errno(&e, libc::ENODEV) => {
                Err(MonovmError::LinkNotFound(format!("index {index}")))
            }
            Err(e) => Err(MonovmError::netlink(format!("get link {index}"), e)),
        }
    }

    /// Creates a bridge and returns its attributes.
    pub fn add_bridge(&self, name: &str) -> MonovmResult<LinkAttrs> {
        self.run(
            format!("add bridge {name}"),
            self.handle.link().add().bridge(name.to_string()).execute(),
        )?;

        self.link_by_name(name)
    }

    /// Creates a bridge-mode macvtap on top of `parent_index`, asking for interface `index`.
    pub fn add_macvtap(
        &self,
        name: &str,
        index: u32,
        parent_index: u32,
        tx_queue_len: u32,
    ) -> MonovmResult<()> {
        let mut request =
            self.handle
                .link()
                .add()
                .macvtap(name.to_string(), parent_index, MACVTAP_MODE_BRIDGE);

        let message = request.message_mut();
        message.header.index = index;
        message
            .attributes
            .push(LinkAttribute::TxQueueLen(tx_queue_len));

        self.run(format!("add macvtap {name}"), request.execute())
    }

    /// Deletes a link.
    pub fn delete_link(&self, index: u32) -> MonovmResult<()> {
        self.run(
            format!("delete link {index}"),
            self.handle.link().del(index).execute(),
        )
    }

    /// Brings a link up.
    pub fn set_up(&self, index: u32) -> MonovmResult<()> {
        self.run(
            format!("set link {index} up"),
            self.handle.link().set(index).up().execute(),
        )
    }

    /// Brings a link down.
    pub fn set_down(&self, index: u32) -> MonovmResult<()> {
        self.run(
            format!("set link {index} down"),
            self.handle.link().set(index).down().execute(),
        )
    }

    /// Changes the MTU of a link.
    pub fn set_mtu(&self, index: u32, mtu: u32) -> MonovmResult<()> {
        self.run(
            format!("set link {index} mtu {mtu}"),
            self.handle.link().set(index).mtu(mtu).execute(),
        )
    }

    /// Changes the MAC address of a link.
    pub fn set_hardware_addr(&self, index: u32, mac: &str) -> MonovmResult<()> {
        let address = parse_mac(mac)?;

        self.run(
            format!("set link {index} address {mac}"),
            self.handle.link().set(index).address(address).execute(),
        )
    }

    /// Enslaves a link to the bridge `controller_index`.
    pub fn set_controller(&self, index: u32, controller_index: u32) -> MonovmResult<()> {
        self.run(
            format!("set link {index} master {controller_index}"),
            self.handle
                .link()
                .set(index)
                .controller(controller_index)
                .execute(),
        )
    }

    /// Releases a link from its bridge.
    pub fn clear_controller(&self, index: u32) -> MonovmResult<()> {
        self.run(
            format!("set link {index} nomaster"),
            self.handle.link().set(index).nocontroller().execute(),
        )
    }

    /// Lists the addresses of a link, IPv4 only when `v4_only` is set.
    pub fn addresses(&self, index: u32, v4_only: bool) -> MonovmResult<Vec<AddrInfo>> {
        Ok(self
            .address_messages(index)?
            .iter()
            .filter_map(addr_info)
            .filter(|a| !v4_only || a.address.is_ipv4())
            .collect())
    }

    /// Assigns an address to a link.
    pub fn add_address(&self, index: u32, addr: &AddrInfo) -> MonovmResult<()> {
        self.run(
            format!("add address {} to link {index}", addr.address),
            self.handle
                .address()
                .add(index, addr.address.ip(), addr.address.prefix())
                .execute(),
        )
    }

    /// Removes every IPv4 address of a link and returns what was removed.
    pub fn clear_v4_addresses(&self, index: u32) -> MonovmResult<Vec<AddrInfo>> {
        let mut removed = Vec::new();

        for message in self.address_messages(index)? {
            let Some(addr) = addr_info(&message).filter(|a| a.address.is_ipv4()) else {
                continue;
            };

            self.run(
                format!("delete address {} from link {index}", addr.address),
                self.handle.address().del(message).execute(),
            )?;

            removed.push(addr);
        }

        Ok(removed)
    }

    /// Lists the main-table routes, of both families, leaving through `link_index`.
    pub fn routes(&self, link_index: u32) -> MonovmResult<Vec<RouteInfo>> {
        let mut routes = Vec::new();

        for version in [IpVersion::V4, IpVersion::V6] {
            let messages: Vec<RouteMessage> = self.run(
                "list routes",
                self.handle.route().get(version).execute().try_collect(),
            )?;

            routes.extend(
                messages
                    .iter()
                    .filter(|m| m.header.table == RT_TABLE_MAIN)
                    .map(route_info)
                    .filter(|r| r.link_index == link_index),
            );
        }

        Ok(routes)
    }

    /// Adds an ingress qdisc to a link.
    pub fn add_ingress_qdisc(&self, index: u32) -> MonovmResult<()> {
        self.run(
            format!("add ingress qdisc to link {index}"),
            self.handle.qdisc().add(index as i32).ingress().execute(),
        )
    }

    /// Deletes the ingress qdisc of a link, along with its filters.
    ///
    /// A link without an ingress qdisc is left alone.
    pub fn delete_ingress_qdisc(&self, index: u32) -> MonovmResult<()> {
        let mut request = self.handle.qdisc().del(index as i32);
        let message = request.message_mut();
        message.header.parent = TcHandle::INGRESS;
        message.header.handle = TcHandle::from(INGRESS_QDISC_HANDLE);

        match self.runtime.block_on(request.execute()) {
            Ok(()) => Ok(()),
            Err(e) if is_errno(&e, libc::ENOENT) || is_errno(&e, libc::EINVAL) => {
                tracing::debug!(index, "no ingress qdisc to delete");
                Ok(())
            }
            Err(e) => Err(MonovmError::netlink(
                format!("delete ingress qdisc of link {index}"),
                e,
            )),
        }
    }

    /// Redirects every packet entering `src_index` to the egress of `dst_index`.
    pub fn add_redirect_filter(&self, src_index: u32, dst_index: u32) -> MonovmResult<()> {
        let operation = format!("add redirect filter {src_index} -> {dst_index}");

        let request = self
            .handle
            .traffic_filter(src_index as i32)
            .add()
            .parent(INGRESS_QDISC_HANDLE)
            .protocol((libc::ETH_P_ALL as u16).to_be())
            .redirect(dst_index)
            .map_err(|e| MonovmError::netlink(operation.clone(), e))?;

        self.run(operation, request.execute())
    }

    fn address_messages(&self, index: u32) -> MonovmResult<Vec<AddressMessage>> {
        self.run(
            format!("list addresses of link {index}"),
            self.handle
                .address()
                .get()
                .set_link_index_filter(index)
                .execute()
                .try_collect(),
        )
    }

    fn run<T>(
        &self,
        operation: impl Into<String>,
        future: impl Future<Output = Result<T, rtnetlink::Error>>,
    ) -> MonovmResult<T> {
        self.runtime
            .block_on(future)
            .map_err(|e| MonovmError::netlink(operation, e))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn is_errno(error: &rtnetlink::Error, errno: i32) -> bool {
    match error {
        rtnetlink::Error::NetlinkError(message) => {
            message.code.map(|code| code.get()) == Some(-errno)
        }
        _ => false,
    }
}

fn link_attrs(message: LinkMessage) -> LinkAttrs {
    let mut attrs = LinkAttrs {
        index: message.header.index,
        is_loopback: message.header.link_layer_type == LinkLayerType::Loopback,
        link_type: "device".to_string(),
        ..Default::default()
    };

    for attribute in message.attributes {
        match attribute {
            LinkAttribute::IfName(name) => attrs.name = name,
            LinkAttribute::Address(address) => attrs.hardware_addr = format_mac(&address),
            LinkAttribute::Mtu(mtu) => attrs.mtu = mtu,
            LinkAttribute::TxQueueLen(len) => attrs.tx_queue_len = len,
            LinkAttribute::Link(parent) => attrs.parent_index = parent,
            LinkAttribute::Controller(controller) => attrs.controller_index = controller,
            LinkAttribute::LinkInfo(infos) => {
                for info in infos {
                    if let LinkInfo::Kind(kind) = info {
                        attrs.link_type = link_type_name(&kind);
                    }
                }
            }
            _ => {}
        }
    }

    attrs
}

/// Maps a kernel link kind onto the names endpoint dispatch works with.
///
/// The kernel reports TAP devices as `tun`.
fn link_type_name(kind: &InfoKind) -> String {
    match kind {
        InfoKind::Bridge => "bridge".to_string(),
        InfoKind::Veth => "veth".to_string(),
        InfoKind::MacVlan => "macvlan".to_string(),
        InfoKind::MacVtap => "macvtap".to_string(),
        InfoKind::IpVlan => "ipvlan".to_string(),
        InfoKind::Tun => "tap".to_string(),
        InfoKind::Other(name) => name.clone(),
        other => format!("{other:?}").to_lowercase(),
    }
}

fn addr_info(message: &AddressMessage) -> Option<AddrInfo> {
    let mut address: Option<IpAddr> = None;
    let mut local: Option<IpAddr> = None;
    let mut label = String::new();

    for attribute in &message.attributes {
        match attribute {
            AddressAttribute::Address(ip) => address = Some(*ip),
            AddressAttribute::Local(ip) => local = Some(*ip),
            AddressAttribute::Label(l) => label = l.clone(),
            _ => {}
        }
    }

    let ip = local.or(address)?;
    let address = IpNetwork::new(ip, message.header.prefix_len).ok()?;

    Some(AddrInfo { address, label })
}

fn route_info(message: &RouteMessage) -> RouteInfo {
    let mut route = RouteInfo {
        scope: u8::from(message.header.scope),
        ..Default::default()
    };

    for attribute in &message.attributes {
        match attribute {
            RouteAttribute::Destination(dest) => {
                route.dest = route_addr(dest).and_then(|ip| {
                    IpNetwork::new(ip, message.header.destination_prefix_length).ok()
                });
            }
            RouteAttribute::Gateway(gateway) => route.gateway = route_addr(gateway),
            RouteAttribute::PrefSource(source) => route.source = route_addr(source),
            RouteAttribute::Oif(index) => route.link_index = *index,
            _ => {}
        }
    }

    route
}

fn route_addr(address: &RouteAddress) -> Option<IpAddr> {
    match address {
        RouteAddress::Inet(ip) => Some(IpAddr::V4(*ip)),
        RouteAddress::Inet6(ip) => Some(IpAddr::V6(*ip)),
        _ => None,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_type_names() {
        assert_eq!(link_type_name(&InfoKind::Veth), "veth");
        assert_eq!(link_type_name(&InfoKind::MacVlan), "macvlan");
        assert_eq!(link_type_name(&InfoKind::MacVtap), "macvtap");
        assert_eq!(link_type_name(&InfoKind::IpVlan), "ipvlan");
        assert_eq!(link_type_name(&InfoKind::Tun), "tap");
        assert_eq!(link_type_name(&InfoKind::Bridge), "bridge");
        assert_eq!(link_type_name(&InfoKind::Other("wg".into())), "wg");
    }

    #[test]
    fn test_link_attrs_from_message() {
        let mut message = LinkMessage::default();
        message.header.index = 7;
        message.attributes = vec![
            LinkAttribute::IfName("eth0".into()),
            LinkAttribute::Address(vec![0x02, 0x00, 0xca, 0xfe, 0x00, 0x04]),
            LinkAttribute::Mtu(1450),
            LinkAttribute::TxQueueLen(1000),
            LinkAttribute::LinkInfo(vec![LinkInfo::Kind(InfoKind::Veth)]),
        ];

        let attrs = link_attrs(message);
        assert_eq!(attrs.index, 7);
        assert_eq!(attrs.name, "eth0");
        assert_eq!(attrs.hardware_addr, "02:00:ca:fe:00:04");
        assert_eq!(attrs.mtu, 1450);
        assert_eq!(attrs.tx_queue_len, 1000);
        assert_eq!(attrs.link_type, "veth");
        assert!(!attrs.is_loopback);
    }

    #[test]
    fn test_link_without_info_is_a_device() {
        let mut message = LinkMessage::default();
        message.attributes = vec![LinkAttribute::IfName("enp0s3".into())];

        assert_eq!(link_attrs(message).link_type, "device");
    }

    #[test]
    fn test_addr_info_prefers_local() {
        let mut message = AddressMessage::default();
        message.header.prefix_len = 24;
        message.attributes = vec![
            AddressAttribute::Address("10.0.0.1".parse().unwrap()),
            AddressAttribute::Local("10.0.0.2".parse().unwrap()),
            AddressAttribute::Label("eth0".into()),
        ];

        let addr = addr_info(&message).unwrap();
        assert_eq!(addr.address.to_string(), "10.0.0.2/24");
        assert_eq!(addr.label, "eth0");

        assert!(addr_info(&AddressMessage::default()).is_none());
    }

    #[test]
    fn test_route_info_from_message() {
        let mut message = RouteMessage::default();
        message.header.destination_prefix_length = 16;
        message.attributes = vec![
            RouteAttribute::Destination(RouteAddress::Inet("172.16.0.0".parse().unwrap())),
            RouteAttribute::Gateway(RouteAddress::Inet("172.16.0.1".parse().unwrap())),
            RouteAttribute::Oif(3),
        ];

        let route = route_info(&message);
        assert_eq!(route.dest.map(|d| d.to_string()).as_deref(), Some("172.16.0.0/16"));
        assert_eq!(route.gateway, Some("172.16.0.1".parse().unwrap()));
        assert_eq!(route.source, None);
        assert_eq!(route.link_index, 3);
    }
}
