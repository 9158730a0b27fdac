//! Bookkeeping shared by every runtime process on the host.

mod containers_map;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use containers_map::*;
