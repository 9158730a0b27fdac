//! `monoutils` is a library containing general utilities for the monovm project.

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod error;
pub mod lock;
pub mod proc;
pub mod rootless;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use error::*;
pub use lock::*;
pub use proc::*;
pub use rootless::*;
