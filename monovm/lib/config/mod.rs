//! Configuration types and defaults.

mod defaults;
mod network;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use network::*;
