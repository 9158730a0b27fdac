//! The hypervisor abstraction: configuration, capabilities, the device model and the VM state
//! machine.

mod asset;
mod capabilities;
mod config;
mod device;
mod hypervisor;
mod mock;
mod params;
mod state;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use asset::*;
pub use capabilities::*;
pub use config::*;
pub use device::*;
pub use hypervisor::*;
pub use mock::*;
pub use params::*;
pub use state::*;
