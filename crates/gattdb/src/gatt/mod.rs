//! GATT level types shared by the attribute database
//!
//! UUIDs, characteristic properties and the Client Characteristic
//! Configuration bitfield.

pub mod types;


pub use types::{CharProps, ClientCharConfig, GattUuid};
