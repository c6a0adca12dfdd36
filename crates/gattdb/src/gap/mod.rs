//! Device addressing used to identify GATT peers
//!
//! Per-client attribute overrides are keyed by a remote device's identity,
//! which is its address together with the address type.

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::*;
