//! Permission, flag and link security types
use super::constants::*;
use bitflags::bitflags;

bitflags! {
    /// ATT permission bits of an attribute.
    ///
    /// Read and write requirements are independent. The MITM bits only take
    /// effect together with the matching `AUTHEN_REQ_*_NOEC` bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttPermissions: u16 {
        const WRITEABLE = 0x0001;
        const READABLE = 0x0002;
        const AUTHEN_REQ_WRITE_NOEC = 0x0004;
        const AUTHEN_REQ_READ_NOEC = 0x0008;
        const MITM_WRITE = 0x0010;
        const MITM_READ = 0x0020;
        const AUTHOR_REQ_WRITE = 0x0040;
        const AUTHOR_REQ_READ = 0x0080;
        const ENCRYPT_REQ_WRITE = 0x0100;
        const ENCRYPT_REQ_READ = 0x0200;
        const SC_MITM_WRITE = 0x0400;
        const SC_MITM_READ = 0x0800;

        /// Pairing plus encryption required to write
        const AUTHEN_REQ_WRITE = Self::AUTHEN_REQ_WRITE_NOEC.bits() | Self::ENCRYPT_REQ_WRITE.bits();
        /// Pairing plus encryption required to read
        const AUTHEN_REQ_READ = Self::AUTHEN_REQ_READ_NOEC.bits() | Self::ENCRYPT_REQ_READ.bits();
        const READWRITEABLE = Self::READABLE.bits() | Self::WRITEABLE.bits();
    }
}

impl AttPermissions {
    /// Check if read is permitted
    pub fn can_read(&self) -> bool {
        self.contains(AttPermissions::READABLE)
    }

    /// Check if write is permitted
    pub fn can_write(&self) -> bool {
        self.contains(AttPermissions::WRITEABLE)
    }

    /// Check if read requires authorization
    pub fn read_requires_authorization(&self) -> bool {
        self.contains(AttPermissions::AUTHOR_REQ_READ)
    }

    /// Check if write requires authorization
    pub fn write_requires_authorization(&self) -> bool {
        self.contains(AttPermissions::AUTHOR_REQ_WRITE)
    }
}

bitflags! {
    /// Features and behaviours of a single attribute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AttFlags: u16 {
        /// The attribute type is a 128-bit UUID held in the static table
        const TYPE_UUID128 = 0x0001;
        /// Alert the service handler after a remote write
        const ALERT_ON_WRITE = 0x0002;
        /// Alert the service handler after a remote read
        const ALERT_ON_READ = 0x0004;
        /// The value may change at runtime
        const VAL_DYNAMIC = 0x0008;
        /// Remote writes are handed to the service handler before commit
        const CHECK_WRITE = 0x0010;
    }
}

/// Pairing strength of a link as reported by the security manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AuthenticationLevel {
    /// Not paired
    #[default]
    None,
    /// Paired without MITM protection (Just Works)
    Unauthenticated,
    /// Paired with MITM protection
    Authenticated,
    /// LE Secure Connections pairing with MITM protection
    SecureConnections,
}

/// Security state of one link, supplied synchronously by the security
/// manager for each access. The database only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkSecurity {
    pub authentication: AuthenticationLevel,
    pub encrypted: bool,
    /// Negotiated key size in octets, meaningful only while encrypted
    pub key_size: u8,
    pub authorized: bool,
}

impl LinkSecurity {
    /// Security of a fresh, unpaired link
    pub fn open() -> Self {
        Self::default()
    }

    /// Security of an encrypted link with a full size key
    pub fn encrypted(authentication: AuthenticationLevel) -> Self {
        Self {
            authentication,
            encrypted: true,
            key_size: ATT_MAX_ENCRYPT_KEY_SIZE,
            authorized: false,
        }
    }

    pub fn with_key_size(mut self, key_size: u8) -> Self {
        self.key_size = key_size;
        self
    }

    pub fn with_authorization(mut self, authorized: bool) -> Self {
        self.authorized = authorized;
        self
    }

    /// Effective key size, zero when the link is not encrypted
    pub fn effective_key_size(&self) -> u8 {
        if self.encrypted {
            self.key_size
        } else {
            0
        }
    }
}
