//! Sandbox networking: namespaces, endpoint discovery and the wiring that carries each endpoint
//! into the VM.

mod endpoint;
mod guest;
mod host;
mod namespace;
mod netlink;
mod netmon;
mod netns;
mod pair;
mod scan;
mod tuntap;
mod types;
mod wiring;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use endpoint::*;
pub use guest::*;
pub use host::*;
pub use namespace::*;
pub use netlink::*;
pub use netmon::*;
pub use netns::*;
pub use pair::*;
pub use scan::*;
pub use tuntap::*;
pub use types::*;
pub use wiring::*;
