use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{config::DEFAULT_NET_INTERWORKING_MODEL, MonovmError, MonovmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The strategy used to splice a host-visible interface into the guest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetInterworkingModel {
    /// Use whatever model the configuration designates as its default.
    #[default]
    Default,

    /// A linux bridge joins the host interface and a TAP device.
    Bridged,

    /// A macvtap device is stacked directly on the host interface.
    MacVtap,

    /// The network plugin hands a VM-ready interface over. Not implemented.
    Enlightened,

    /// Traffic-control filters redirect packets between the host interface and a TAP device.
    TcFilter,

    /// No interworking at all.
    None,

    /// Terminal sentinel. Never valid.
    Invalid,
}

/// Settings for the network monitor process watching a sandbox namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters, TypedBuilder, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
pub struct NetmonConfig {
    /// Path to the network monitor binary.
    #[builder(default, setter(into))]
    path: PathBuf,

    /// Whether the monitor runs with debug output.
    #[builder(default)]
    debug: bool,

    /// Whether the monitor should be started at all.
    #[builder(default)]
    enable: bool,
}

/// The network intent of a sandbox, fixed when the sandbox is created.
///
/// ## Examples
///
/// ```
/// use monovm::config::{NetInterworkingModel, NetworkConfig};
///
/// let config = NetworkConfig::builder()
///     .netns_path("/run/netns/cni-1234")
///     .interworking_model(NetInterworkingModel::TcFilter)
///     .build();
///
/// assert_eq!(config.effective_model(), NetInterworkingModel::TcFilter);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Getters, TypedBuilder, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
pub struct NetworkConfig {
    /// The namespace to run the sandbox in. Empty asks for a new one.
    #[builder(default, setter(into))]
    netns_path: String,

    /// Whether the namespace at `netns_path` was created by the runtime.
    #[builder(default)]
    netns_created: bool,

    /// Refuse to create a namespace when none is given.
    #[builder(default)]
    disable_new_netns: bool,

    /// Network monitor settings.
    #[builder(default)]
    netmon_config: NetmonConfig,

    /// The requested interworking model.
    #[builder(default)]
    interworking_model: NetInterworkingModel,

    /// The model `NetInterworkingModel::Default` resolves to.
    #[builder(default = DEFAULT_NET_INTERWORKING_MODEL)]
    default_model: NetInterworkingModel,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NetInterworkingModel {
    /// Returns true for every declared model except the `Invalid` sentinel.
    pub fn is_valid(&self) -> bool {
        !matches!(self, NetInterworkingModel::Invalid)
    }

    /// Replaces the model with the one named by `name`.
    ///
    /// ## Errors
    ///
    /// Returns `UnknownNetworkModel` if `name` is not one of `default`, `bridged`, `macvtap`,
    /// `enlightened`, `tcfilter` or `none`.
    pub fn set_model(&mut self, name: &str) -> MonovmResult<()> {
        *self = name.parse()?;
        Ok(())
    }

    /// Resolves `Default` to `default_model`. Every other model, `Invalid` included, is kept so
    /// wiring can reject it.
    pub fn resolve(self, default_model: NetInterworkingModel) -> NetInterworkingModel {
        match self {
            NetInterworkingModel::Default => default_model,
            model => model,
        }
    }
}

impl NetworkConfig {
    /// Returns the interworking model endpoints of this sandbox should be wired with.
    pub fn effective_model(&self) -> NetInterworkingModel {
        self.interworking_model.resolve(self.default_model)
    }

    /// Records the namespace the sandbox ended up running in.
    pub fn set_netns(&mut self, path: impl Into<String>, created: bool) {
        self.netns_path = path.into();
        self.netns_created = created;
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FromStr for NetInterworkingModel {
    type Err = MonovmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(NetInterworkingModel::Default),
            "bridged" => Ok(NetInterworkingModel::Bridged),
            "macvtap" => Ok(NetInterworkingModel::MacVtap),
            "enlightened" => Ok(NetInterworkingModel::Enlightened),
            "tcfilter" => Ok(NetInterworkingModel::TcFilter),
            "none" => Ok(NetInterworkingModel::None),
            _ => Err(MonovmError::UnknownNetworkModel(s.to_string())),
        }
    }
}

impl Display for NetInterworkingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetInterworkingModel::Default => "default",
            NetInterworkingModel::Bridged => "bridged",
            NetInterworkingModel::MacVtap => "macvtap",
            NetInterworkingModel::Enlightened => "enlightened",
            NetInterworkingModel::TcFilter => "tcfilter",
            NetInterworkingModel::None => "none",
            NetInterworkingModel::Invalid => "invalid",
        };

        write!(f, "{name}")
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_net_interworking_model_is_valid() {
        for model in [
            NetInterworkingModel::Default,
            NetInterworkingModel::Bridged,
            NetInterworkingModel::MacVtap,
            NetInterworkingModel::Enlightened,
            NetInterworkingModel::TcFilter,
            NetInterworkingModel::None,
        ] {
            assert!(model.is_valid(), "{model} should be valid");
        }

        assert!(!NetInterworkingModel::Invalid.is_valid());
    }

    #[test]
    fn test_net_interworking_model_set_model() -> anyhow::Result<()> {
        let mut model = NetInterworkingModel::Invalid;

        for (name, expected) in [
            ("default", NetInterworkingModel::Default),
            ("bridged", NetInterworkingModel::Bridged),
            ("macvtap", NetInterworkingModel::MacVtap),
            ("enlightened", NetInterworkingModel::Enlightened),
            ("tcfilter", NetInterworkingModel::TcFilter),
            ("none", NetInterworkingModel::None),
        ] {
            model.set_model(name)?;
            assert_eq!(model, expected);
            assert_eq!(model.to_string(), name);
        }

        for name in ["invalid", "", "MacVtap", "bridge"] {
            assert!(matches!(
                model.set_model(name),
                Err(MonovmError::UnknownNetworkModel(_))
            ));
        }

        // A failed parse leaves the previous model in place.
        assert_eq!(model, NetInterworkingModel::None);

        Ok(())
    }

    #[test]
    fn test_network_config_effective_model() {
        let config = NetworkConfig::default();
        assert_eq!(config.effective_model(), NetInterworkingModel::MacVtap);

        let config = NetworkConfig::builder()
            .default_model(NetInterworkingModel::TcFilter)
            .build();
        assert_eq!(config.effective_model(), NetInterworkingModel::TcFilter);

        let config = NetworkConfig::builder()
            .interworking_model(NetInterworkingModel::Bridged)
            .default_model(NetInterworkingModel::TcFilter)
            .build();
        assert_eq!(config.effective_model(), NetInterworkingModel::Bridged);

        for model in [NetInterworkingModel::Invalid, NetInterworkingModel::None] {
            assert_eq!(model.resolve(NetInterworkingModel::MacVtap), model);

            let config = NetworkConfig::builder().interworking_model(model).build();
            assert_eq!(config.effective_model(), model);
        }
    }
}
