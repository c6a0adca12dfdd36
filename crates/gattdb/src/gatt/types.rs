//! Common types for GATT attributes

use bitflags::bitflags;
use std::fmt;

/// UUID of a GATT attribute type or service.
///
/// 128-bit UUIDs are held in little-endian order, the order in which they are
/// stored in the database and sent over the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattUuid {
    /// 16-bit SIG assigned UUID
    Uuid16(u16),
    /// Full 128-bit UUID
    Uuid128([u8; 16]),
}

impl GattUuid {
    /// Convert raw little-endian bytes to a UUID based on length
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(GattUuid::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            16 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(bytes);
                Some(GattUuid::Uuid128(uuid))
            }
            _ => None,
        }
    }

    /// Create a UUID from a 128-bit value
    pub fn from_u128(uuid: u128) -> Self {
        GattUuid::Uuid128(uuid.to_le_bytes())
    }

    /// Get the little-endian bytes of this UUID
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            GattUuid::Uuid16(uuid) => uuid.to_le_bytes().to_vec(),
            GattUuid::Uuid128(uuid) => uuid.to_vec(),
        }
    }

    /// Get the 16-bit UUID value if this is a 16-bit UUID
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            GattUuid::Uuid16(uuid) => Some(*uuid),
            GattUuid::Uuid128(_) => None,
        }
    }
}

impl From<u16> for GattUuid {
    fn from(uuid: u16) -> Self {
        GattUuid::Uuid16(uuid)
    }
}

impl fmt::Display for GattUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattUuid::Uuid16(uuid) => write!(f, "{:04x}", uuid),
            GattUuid::Uuid128(uuid) => {
                write!(
                    f,
                    "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
                    uuid[15], uuid[14], uuid[13], uuid[12],
                    uuid[11], uuid[10],
                    uuid[9], uuid[8],
                    uuid[7], uuid[6],
                    uuid[5], uuid[4], uuid[3], uuid[2], uuid[1], uuid[0]
                )
            }
        }
    }
}

bitflags! {
    /// Characteristic properties as carried in a characteristic declaration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharProps: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_NO_RSP = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const SIGNED_WRITES = 0x40;
        const EXT_PROPS = 0x80;
    }
}

bitflags! {
    /// Client Characteristic Configuration bits. The empty set is the
    /// default value every client starts with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientCharConfig: u16 {
        const NOTIFICATION = 0x0001;
        const INDICATION = 0x0002;
    }
}

impl ClientCharConfig {
    pub fn notifications_enabled(&self) -> bool {
        self.contains(ClientCharConfig::NOTIFICATION)
    }

    pub fn indications_enabled(&self) -> bool {
        self.contains(ClientCharConfig::INDICATION)
    }
}
