//! gattdb - The attribute database of a Bluetooth LE GATT server
//!
//! This library stores the services, characteristics and descriptors a GATT
//! server exposes, gates remote access by transport and link security, keeps
//! a separate value per remote device for attributes such as Client
//! Characteristic Configuration descriptors, and persists all of it through
//! a caller supplied record store. It does no radio or protocol I/O of its
//! own; an ATT server drives it with reads and writes by handle.

pub mod att;
pub mod db;
pub mod error;
pub mod gap;
pub mod gatt;
pub mod persist;

// Re-export common types for convenience
pub use att::{AttErrorCode, AttFlags, AttPermissions, AuthenticationLevel, LinkSecurity};
pub use db::{
    AttValue, CoiValue, DatabaseConfig, DynamicAttr, DynamicValue, GattDatabase, Link, OpenError,
    ReadOutcome, RomImage, ServerEvent, ServiceId, ServiceParms, SharedGattDatabase, StaticAttr,
    StaticValue, WriteOutcome,
};
pub use error::{DbError, DbResult};
pub use gap::{AddressType, BdAddr, DevAddr, Transport};
pub use gatt::{CharProps, ClientCharConfig, GattUuid};
pub use persist::{MemoryStore, PersistenceManager, RecordId};
