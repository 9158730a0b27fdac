//! `monovm` is the network and hypervisor core of a VM-based sandbox runtime.
//!
//! # Overview
//!
//! A sandbox is a lightweight VM running containers. Before the VM boots, the network a CNI
//! plugin configured inside the sandbox namespace has to be carried into the guest. monovm:
//! - creates, enters and deletes network namespaces
//! - scans a namespace and classifies each interface as an endpoint
//! - wires endpoints to the VM through a bridge, a macvtap device or tc redirect filters
//! - hands the resulting devices to a hypervisor, cold or through hotplug
//! - keeps the host-wide container to sandbox table behind an advisory lock
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use monovm::{
//!     config::NetworkConfig,
//!     hypervisor::{Hypervisor, HypervisorConfig, MockHypervisor},
//!     network::Network,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let network = Network::new();
//!     let mut config = NetworkConfig::default();
//!
//!     let (path, created) = network.init(&config)?;
//!     config.set_netns(path, created);
//!
//!     let mut hypervisor = MockHypervisor::new();
//!     hypervisor.create_sandbox(
//!         "sandbox",
//!         HypervisorConfig::builder()
//!             .kernel_path("/opt/vm/vmlinuz")
//!             .image_path("/opt/vm/rootfs.img")
//!             .build(),
//!     )?;
//!
//!     let endpoints = network.add(&config, &mut hypervisor, false)?;
//!     println!("attached {} endpoints", endpoints.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`] - Network configuration and defaults
//! - [`hypervisor`] - The hypervisor trait, its configuration and device model
//! - [`network`] - Namespaces, endpoints and wiring
//! - [`sandbox`] - The containers map
//!
//! # Platform Support
//!
//! Linux only. Most network operations need `CAP_NET_ADMIN` and `CAP_SYS_ADMIN`.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod config;
pub mod hypervisor;
pub mod network;
pub mod sandbox;

pub use error::*;
