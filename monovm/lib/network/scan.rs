use crate::{
    config::{NetInterworkingModel, NetworkConfig},
    network::{
        create_bridged_macvlan_network_endpoint, create_ipvlan_network_endpoint,
        create_macvtap_network_endpoint, create_physical_endpoint, create_tap_network_endpoint,
        create_veth_network_endpoint, create_vhost_user_endpoint, do_netns, Endpoint, HostProbe,
        LinkAttrs, NetlinkHandle, NetworkEndpoint, NetworkInfo,
    },
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Collects the addresses and routes of `link`, of every family.
pub fn network_info_from_link(
    netlink: &NetlinkHandle,
    link: LinkAttrs,
) -> MonovmResult<NetworkInfo> {
    let addrs = netlink.addresses(link.index, false)?;
    let routes = netlink.routes(link.index)?;

    Ok(NetworkInfo {
        iface: link,
        addrs,
        routes,
        ..Default::default()
    })
}

/// Picks the endpoint kind for a scanned interface.
///
/// PCI NICs become physical endpoints and interfaces with a vhost-user socket become vhost-user
/// endpoints. Everything else is decided by the link type.
///
/// ## Errors
///
/// Returns `UnsupportedInterface` for link types no endpoint handles.
pub fn create_endpoint(
    net_info: NetworkInfo,
    idx: i32,
    model: NetInterworkingModel,
    probe: &HostProbe,
) -> MonovmResult<NetworkEndpoint> {
    let name = net_info.iface.name.clone();

    if probe.is_physical_iface(&name)? {
        tracing::info!(interface = %name, "physical network interface found");
        return Ok(NetworkEndpoint::Physical(create_physical_endpoint(
            net_info, probe,
        )?));
    }

    if let Some(socket) = probe.vhost_user_socket(&net_info) {
        tracing::info!(interface = %name, socket = %socket.display(), "vhost-user network interface found");
        return Ok(NetworkEndpoint::VhostUser(create_vhost_user_endpoint(
            net_info, socket,
        )));
    }

    let endpoint = match net_info.iface.link_type.as_str() {
        "macvlan" => NetworkEndpoint::BridgedMacvlan(create_bridged_macvlan_network_endpoint(
            idx, &name, model,
        )?),
        "macvtap" => NetworkEndpoint::Macvtap(create_macvtap_network_endpoint(net_info)),
        "tap" => NetworkEndpoint::Tap(create_tap_network_endpoint(idx, &name)?),
        "veth" => NetworkEndpoint::Veth(create_veth_network_endpoint(idx, &name, model)?),
        "ipvlan" => NetworkEndpoint::IPVlan(create_ipvlan_network_endpoint(idx, &name)?),
        other => {
            return Err(MonovmError::UnsupportedInterface(format!(
                "{name} has unsupported type {other}"
            )))
        }
    };

    Ok(endpoint)
}

/// Builds an endpoint for every configured interface of the namespace at `netns_path`.
///
/// Loopback and interfaces without addresses are skipped. Endpoints are numbered in scan order
/// and returned sorted by name.
pub fn create_endpoints_from_scan(
    netns_path: &str,
    config: &NetworkConfig,
) -> MonovmResult<Vec<NetworkEndpoint>> {
    create_endpoints_from_scan_with(netns_path, config, &HostProbe::default())
}

/// [`create_endpoints_from_scan`] with an explicit host probe.
pub fn create_endpoints_from_scan_with(
    netns_path: &str,
    config: &NetworkConfig,
    probe: &HostProbe,
) -> MonovmResult<Vec<NetworkEndpoint>> {
    let model = config.effective_model();

    let mut endpoints = do_netns(netns_path, || {
        let netlink = NetlinkHandle::new()?;
        let mut endpoints = Vec::new();
        let mut idx = 0;

        for link in netlink.links()? {
            let net_info = network_info_from_link(&netlink, link)?;

            // Tunnel base devices such as gre0 or sit0 carry no address.
            if net_info.addrs.is_empty() || net_info.iface.is_loopback {
                continue;
            }

            let mut endpoint = create_endpoint(net_info.clone(), idx, model, probe)?;
            endpoint.set_properties(net_info);
            endpoints.push(endpoint);
            idx += 1;
        }

        Ok(endpoints)
    })?;

    endpoints.sort_by(|a, b| a.name().cmp(b.name()));

    tracing::info!(
        netns = %netns_path,
        endpoints = ?endpoints.iter().map(|e| (e.name(), e.endpoint_type())).collect::<Vec<_>>(),
        "endpoints found after scan"
    );

    Ok(endpoints)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
