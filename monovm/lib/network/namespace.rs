use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    config::NetworkConfig,
    hypervisor::Hypervisor,
    network::{
        create_endpoints_from_scan_with, create_netns, delete_netns, do_netns,
        host_networking_requested, unmarshal_endpoints, Endpoint, HostProbe, Interface, IpAddress,
        IpFamily, NetworkEndpoint, Route, TypedJsonEndpoint,
    },
    MonovmError, MonovmResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The network namespace of a sandbox and the endpoints wired out of it.
///
/// Persisted as `{"NetNsPath", "NetNsCreated", "Endpoints", "NetmonPID"}` where each endpoint
/// is stored with its type, see [`TypedJsonEndpoint`].
#[derive(Debug, Default, PartialEq)]
pub struct NetworkNamespace {
    /// The namespace path.
    pub netns_path: String,

    /// Whether the runtime created the namespace, and must delete it.
    pub netns_created: bool,

    /// The endpoints, sorted by name.
    pub endpoints: Vec<NetworkEndpoint>,

    /// The pid of the network monitor watching the namespace.
    pub netmon_pid: Option<i32>,
}

/// Drives namespace creation, endpoint discovery and attachment for a sandbox.
#[derive(Debug, Default)]
pub struct Network {
    probe: HostProbe,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PersistedNamespace {
    net_ns_path: String,
    net_ns_created: bool,
    #[serde(default)]
    endpoints: Option<Vec<TypedJsonEndpoint>>,
    #[serde(rename = "NetmonPID", default)]
    netmon_pid: Option<i32>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NetworkNamespace {
    /// Returns what the guest agent needs to configure every endpoint.
    ///
    /// Only IPv4 is handed over: IPv6 addresses and routes are logged and dropped, and loopback
    /// addresses are skipped. A namespace without a path yields nothing.
    pub fn interfaces_and_routes(&self) -> (Vec<Interface>, Vec<Route>) {
        if self.netns_path.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let mut interfaces = Vec::new();
        let mut routes = Vec::new();

        for endpoint in &self.endpoints {
            let properties = endpoint.properties();

            let mut ip_addresses = Vec::new();
            for addr in &properties.addrs {
                if addr.address.is_ipv6() {
                    tracing::warn!(address = %addr.address, "unsupported address type ipv6");
                    continue;
                }

                if addr.address.ip().is_loopback() {
                    continue;
                }

                ip_addresses.push(IpAddress {
                    family: IpFamily::V4,
                    address: addr.address.ip().to_string(),
                    mask: addr.address.prefix().to_string(),
                });
            }

            interfaces.push(Interface {
                device: endpoint.name().to_string(),
                name: endpoint.name().to_string(),
                ip_addresses,
                mtu: u64::from(properties.iface.mtu),
                hw_addr: endpoint.hardware_addr().to_string(),
                pci_addr: endpoint.pci_addr().to_string(),
            });

            for route in &properties.routes {
                let mut r = Route::default();

                if let Some(dest) = route.dest {
                    if dest.is_ipv6() {
                        tracing::warn!(destination = %dest, "unsupported route type ipv6");
                        continue;
                    }
                    r.dest = dest.to_string();
                }

                if let Some(gateway) = route.gateway {
                    if gateway.is_ipv6() {
                        tracing::warn!(%gateway, "unsupported route type ipv6");
                        continue;
                    }
                    r.gateway = gateway.to_string();
                }

                if let Some(source) = route.source {
                    r.source = source.to_string();
                }

                r.device = endpoint.name().to_string();
                r.scope = u32::from(route.scope);
                routes.push(r);
            }
        }

        (interfaces, routes)
    }
}

impl Network {
    /// Creates a network driver probing the real host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a network driver using `probe` to classify interfaces.
    pub fn with_probe(probe: HostProbe) -> Self {
        Self { probe }
    }

    /// Settles the namespace the sandbox runs in, returning its path and whether it was
    /// created here.
    ///
    /// Without a configured path a new namespace is created, unless new namespaces are
    /// disabled, in which case the sandbox shares the caller's namespace.
    ///
    /// ## Errors
    ///
    /// Returns `HostNetworkingUnsupported` if the configured path is the caller's own
    /// namespace.
    pub fn init(&self, config: &NetworkConfig) -> MonovmResult<(String, bool)> {
        let netns_path = config.get_netns_path();

        if netns_path.is_empty() {
            if *config.get_disable_new_netns() {
                tracing::info!("new network namespaces are disabled");
                return Ok((String::new(), false));
            }

            let path = create_netns()?;
            return Ok((path.to_string_lossy().into_owned(), true));
        }

        if host_networking_requested(netns_path)? {
            return Err(MonovmError::HostNetworkingUnsupported);
        }

        Ok((netns_path.clone(), false))
    }

    /// Runs `f` inside the namespace at `netns_path`.
    ///
    /// ## Errors
    ///
    /// Returns `EmptyNetnsPath` if no namespace is given.
    pub fn run<T, F>(&self, netns_path: &str, f: F) -> MonovmResult<T>
    where
        F: FnOnce() -> MonovmResult<T> + Send,
        T: Send,
    {
        if netns_path.is_empty() {
            return Err(MonovmError::EmptyNetnsPath);
        }

        do_netns(netns_path, f)
    }

    /// Scans the namespace of `config` and attaches every endpoint found to the VM, through
    /// hotplug when `hotplug` is set.
    ///
    /// Returns the attached endpoints. Nothing is returned on failure.
    pub fn add(
        &self,
        config: &NetworkConfig,
        hypervisor: &mut dyn Hypervisor,
        hotplug: bool,
    ) -> MonovmResult<Vec<NetworkEndpoint>> {
        let netns_path = config.get_netns_path();
        let mut endpoints = create_endpoints_from_scan_with(netns_path, config, &self.probe)?;

        do_netns(netns_path, || {
            for endpoint in endpoints.iter_mut() {
                tracing::info!(
                    endpoint_type = %endpoint.endpoint_type(),
                    name = %endpoint.name(),
                    hotplug,
                    "attaching endpoint"
                );

                if hotplug {
                    endpoint.hot_attach(hypervisor)?;
                } else {
                    endpoint.attach(hypervisor)?;
                }
            }

            Ok(())
        })?;

        tracing::debug!(netns = %netns_path, "network added");
        Ok(endpoints)
    }

    /// Detaches every endpoint of `netns`, through hot unplug when `hotunplug` is set, then
    /// deletes the namespace if it was created by the runtime.
    pub fn remove(
        &self,
        netns: &mut NetworkNamespace,
        hypervisor: &mut dyn Hypervisor,
        hotunplug: bool,
    ) -> MonovmResult<()> {
        for endpoint in netns.endpoints.iter_mut() {
            tracing::info!(
                endpoint_type = %endpoint.endpoint_type(),
                name = %endpoint.name(),
                hotunplug,
                "detaching endpoint"
            );

            if hotunplug {
                endpoint.hot_detach(hypervisor, netns.netns_created, &netns.netns_path)?;
            } else {
                endpoint.detach(netns.netns_created, &netns.netns_path)?;
            }
        }

        tracing::debug!(netns = %netns.netns_path, "network removed");

        if netns.netns_created {
            tracing::info!(netns = %netns.netns_path, "deleting network namespace");
            delete_netns(&netns.netns_path)?;
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Serialize for NetworkNamespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let endpoints = self
            .endpoints
            .iter()
            .map(NetworkEndpoint::to_typed_json)
            .collect::<MonovmResult<Vec<_>>>()
            .map_err(ser::Error::custom)?;

        PersistedNamespace {
            net_ns_path: self.netns_path.clone(),
            net_ns_created: self.netns_created,
            endpoints: Some(endpoints),
            netmon_pid: self.netmon_pid,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NetworkNamespace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let persisted = PersistedNamespace::deserialize(deserializer)?;

        let endpoints = unmarshal_endpoints(persisted.endpoints.unwrap_or_default())
            .map_err(de::Error::custom)?;

        Ok(NetworkNamespace {
            netns_path: persisted.net_ns_path,
            netns_created: persisted.net_ns_created,
            endpoints,
            netmon_pid: persisted.netmon_pid,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::config::NetInterworkingModel;
    use crate::network::{
        create_macvtap_network_endpoint, create_veth_network_endpoint, AddrInfo, LinkAttrs,
        NetworkInfo, RouteInfo,
    };

    use super::*;

    fn veth_with_properties() -> anyhow::Result<NetworkEndpoint> {
        let mut endpoint = create_veth_network_endpoint(0, "eth0", NetInterworkingModel::MacVtap)?;
        endpoint.set_properties(NetworkInfo {
            iface: LinkAttrs {
                index: 3,
                name: "eth0".into(),
                hardware_addr: "02:42:ac:11:00:02".into(),
                mtu: 1450,
                link_type: "veth".into(),
                ..Default::default()
            },
            addrs: vec![
                AddrInfo::new("172.17.0.2/16".parse()?),
                AddrInfo::new("127.0.0.2/8".parse()?),
                AddrInfo::new("fd00::2/64".parse()?),
            ],
            routes: vec![
                RouteInfo {
                    dest: None,
                    gateway: Some("172.17.0.1".parse()?),
                    link_index: 3,
                    ..Default::default()
                },
                RouteInfo {
                    dest: Some("172.17.0.0/16".parse()?),
                    source: Some("172.17.0.2".parse()?),
                    link_index: 3,
                    scope: 253,
                    ..Default::default()
                },
                RouteInfo {
                    dest: Some("fd00::/64".parse()?),
                    link_index: 3,
                    ..Default::default()
                },
                RouteInfo {
                    gateway: Some("fd00::1".parse()?),
                    link_index: 3,
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        Ok(NetworkEndpoint::Veth(endpoint))
    }

    #[test_log::test]
    fn test_interfaces_and_routes() -> anyhow::Result<()> {
        let mut netns = NetworkNamespace {
            netns_path: "/run/netns/cni-test".into(),
            endpoints: vec![veth_with_properties()?],
            ..Default::default()
        };
        netns.endpoints[0]
            .network_pair_mut()
            .unwrap()
            .tap_interface
            .tap_iface
            .hard_addr = "02:42:ac:11:00:02".into();

        let (interfaces, routes) = netns.interfaces_and_routes();

        assert_eq!(interfaces.len(), 1);
        let iface = &interfaces[0];
        assert_eq!(iface.name, "eth0");
        assert_eq!(iface.device, "eth0");
        assert_eq!(iface.mtu, 1450);
        assert_eq!(iface.hw_addr, "02:42:ac:11:00:02");
        assert_eq!(
            iface.ip_addresses,
            vec![IpAddress {
                family: IpFamily::V4,
                address: "172.17.0.2".into(),
                mask: "16".into(),
            }]
        );

        assert_eq!(
            routes,
            vec![
                Route {
                    gateway: "172.17.0.1".into(),
                    device: "eth0".into(),
                    ..Default::default()
                },
                Route {
                    dest: "172.17.0.0/16".into(),
                    source: "172.17.0.2".into(),
                    device: "eth0".into(),
                    scope: 253,
                    ..Default::default()
                },
            ]
        );

        netns.netns_path.clear();
        let (interfaces, routes) = netns.interfaces_and_routes();
        assert!(interfaces.is_empty() && routes.is_empty());

        Ok(())
    }

    #[test]
    fn test_namespace_json_shape() -> anyhow::Result<()> {
        let netns = NetworkNamespace {
            netns_path: "/run/netns/cni-test".into(),
            netns_created: true,
            endpoints: vec![NetworkEndpoint::Macvtap(create_macvtap_network_endpoint(
                NetworkInfo::default(),
            ))],
            netmon_pid: Some(42),
        };

        let value = serde_json::to_value(&netns)?;
        assert_eq!(value["NetNsPath"], json!("/run/netns/cni-test"));
        assert_eq!(value["NetNsCreated"], json!(true));
        assert_eq!(value["NetmonPID"], json!(42));
        assert_eq!(value["Endpoints"][0]["Type"], json!("macvtap"));
        assert!(value["Endpoints"][0]["Data"].is_object());

        let restored: NetworkNamespace = serde_json::from_value(value)?;
        assert_eq!(restored, netns);

        Ok(())
    }

    #[test]
    fn test_namespace_without_endpoints() -> anyhow::Result<()> {
        let restored: NetworkNamespace = serde_json::from_str(
            r#"{"NetNsPath": "/run/netns/x", "NetNsCreated": false, "Endpoints": null}"#,
        )?;

        assert_eq!(restored.netns_path, "/run/netns/x");
        assert!(restored.endpoints.is_empty());
        assert_eq!(restored.netmon_pid, None);

        Ok(())
    }

    #[test]
    fn test_network_run_requires_path() {
        let network = Network::new();
        assert!(matches!(
            network.run("", || Ok(())),
            Err(MonovmError::EmptyNetnsPath)
        ));
    }

    #[test]
    fn test_network_init_refuses_host_namespace() {
        let network = Network::new();
        let config = NetworkConfig::builder()
            .netns_path("/proc/thread-self/ns/net")
            .build();

        assert!(matches!(
            network.init(&config),
            Err(MonovmError::HostNetworkingUnsupported)
        ));

        let config = NetworkConfig::builder().disable_new_netns(true).build();
        assert!(matches!(network.init(&config), Ok((path, false)) if path.is_empty()));
    }
}
