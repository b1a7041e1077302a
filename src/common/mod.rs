//! Typed inputs: bootstrap addresses and lookup targets.

mod address;
mod identity;

pub use address::*;
pub use identity::*;
