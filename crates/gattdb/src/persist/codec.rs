//! Binary layout of persisted records
//!
//! All multi-byte fields are little-endian.
//!
//! The root record holds, in order: magic `GTDB`, format version (u8), the
//! identity (IRK, address id counter u32, local address), the static and
//! dynamic table entries referenced by active RAM services (count u16, then
//! index u16, length u16 and bytes per entry), the active RAM services
//! (count u16, then start handle u16, attribute count u16, transport u8 and
//! per attribute a presence byte followed by the attribute), and the record
//! ids of the per-peer groups (count u16, then u32 each).
//!
//! A group record is self contained: magic `GCOI`, version, peer address
//! type (u8) and address, then per item start handle u16, attribute index
//! u16, kind u8 and the value. Octet values are stored inline.

use super::RecordId;
use crate::att::{AttFlags, AttPermissions};
use crate::db::{
    AttValueType, Attribute, CoiDefault, CoiValue, Identity, ServiceTransport, StoredValue,
};
use crate::error::{DbError, DbResult};
use crate::gap::{AddressType, BdAddr, DevAddr};
use crate::gatt::ClientCharConfig;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

pub const ROOT_MAGIC: [u8; 4] = *b"GTDB";
pub const GROUP_MAGIC: [u8; 4] = *b"GCOI";
pub const FORMAT_VERSION: u8 = 1;

const COI_KIND_CCC: u8 = 0;
const COI_KIND_OCTETS: u8 = 1;
const COI_KIND_TWO_U16: u8 = 2;

/// Decoded root record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootImage {
    pub identity: Identity,
    pub static_entries: Vec<(u16, Vec<u8>)>,
    pub dynamic_entries: Vec<(u16, Vec<u8>)>,
    pub services: Vec<ServiceImage>,
    pub groups: Vec<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceImage {
    pub start_handle: u16,
    pub transport: ServiceTransport,
    pub attributes: Vec<Option<Attribute>>,
}

/// Decoded group record: every own value of one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupImage {
    pub peer: DevAddr,
    pub items: Vec<GroupItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupItem {
    pub start_handle: u16,
    pub attr_index: u16,
    pub value: CoiValue,
}

fn invalid(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

fn corrupt(id: RecordId, e: io::Error) -> DbError {
    DbError::CorruptRecord {
        id,
        reason: e.to_string(),
    }
}

fn check_header<R: Read>(r: &mut R, magic: [u8; 4]) -> io::Result<()> {
    let mut found = [0u8; 4];
    r.read_exact(&mut found)?;
    if found != magic {
        return Err(invalid(format!("bad magic {}", hex::encode(found))));
    }
    let version = r.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(invalid(format!("unsupported version {}", version)));
    }
    Ok(())
}

fn count(len: usize) -> io::Result<u16> {
    u16::try_from(len).map_err(|_| invalid("too many elements"))
}

fn write_entries<W: Write>(w: &mut W, entries: &[(u16, Vec<u8>)]) -> io::Result<()> {
    w.write_u16::<LittleEndian>(count(entries.len())?)?;
    for (index, bytes) in entries {
        w.write_u16::<LittleEndian>(*index)?;
        w.write_u16::<LittleEndian>(count(bytes.len())?)?;
        w.write_all(bytes)?;
    }
    Ok(())
}

fn read_bytes<R: Read>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_entries<R: Read>(r: &mut R) -> io::Result<Vec<(u16, Vec<u8>)>> {
    let n = r.read_u16::<LittleEndian>()?;
    let mut entries = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let index = r.read_u16::<LittleEndian>()?;
        let len = r.read_u16::<LittleEndian>()?;
        entries.push((index, read_bytes(r, len as usize)?));
    }
    Ok(entries)
}

fn write_attribute<W: Write>(w: &mut W, attr: &Attribute) -> io::Result<()> {
    w.write_u16::<LittleEndian>(attr.permissions.bits())?;
    w.write_u8(attr.encrypt_key_size)?;
    w.write_u8(attr.value_type().into())?;
    w.write_u16::<LittleEndian>(attr.flags.bits())?;
    w.write_u16::<LittleEndian>(attr.attr_type)?;

    match attr.value {
        StoredValue::V8(v) => w.write_u8(v),
        StoredValue::V16(v) | StoredValue::Handle(v) => w.write_u16::<LittleEndian>(v),
        StoredValue::V32(v) => w.write_u32::<LittleEndian>(v),
        StoredValue::V48(v) => w.write_u48::<LittleEndian>(v),
        StoredValue::Uuid128 { index }
        | StoredValue::IncDefUuid { index }
        | StoredValue::IncDefNoUuid { index }
        | StoredValue::CharDeclUuid16 { index }
        | StoredValue::CharDeclUuid128 { index }
        | StoredValue::HandleArray { index } => w.write_u16::<LittleEndian>(index),
        StoredValue::OctetSeq { len, max, index } => {
            w.write_u16::<LittleEndian>(len)?;
            w.write_u16::<LittleEndian>(max)?;
            w.write_u16::<LittleEndian>(index)
        }
        StoredValue::OctetSeqFixed { len, index } => {
            w.write_u16::<LittleEndian>(len)?;
            w.write_u16::<LittleEndian>(index)
        }
        StoredValue::StoredServApp { len, max, fixed } => {
            w.write_u16::<LittleEndian>(len)?;
            w.write_u16::<LittleEndian>(max)?;
            w.write_u8(fixed as u8)
        }
        StoredValue::ClientOwnInst(CoiDefault::Ccc(ccc)) => {
            w.write_u8(COI_KIND_CCC)?;
            w.write_u16::<LittleEndian>(ccc.bits())
        }
        StoredValue::ClientOwnInst(CoiDefault::Octets { len, max, index }) => {
            w.write_u8(COI_KIND_OCTETS)?;
            w.write_u16::<LittleEndian>(len)?;
            w.write_u16::<LittleEndian>(max)?;
            w.write_u16::<LittleEndian>(index)
        }
        StoredValue::ClientOwnInst(CoiDefault::TwoU16 { start, end }) => {
            w.write_u8(COI_KIND_TWO_U16)?;
            w.write_u16::<LittleEndian>(start)?;
            w.write_u16::<LittleEndian>(end)
        }
        StoredValue::Enum8 { index, min, max } => {
            w.write_u16::<LittleEndian>(index)?;
            w.write_u8(min)?;
            w.write_u8(max)
        }
        StoredValue::Enum16 { index, min, max } => {
            w.write_u16::<LittleEndian>(index)?;
            w.write_u16::<LittleEndian>(min)?;
            w.write_u16::<LittleEndian>(max)
        }
    }
}

fn read_attribute<R: Read>(r: &mut R) -> io::Result<Attribute> {
    let permissions = AttPermissions::from_bits_retain(r.read_u16::<LittleEndian>()?);
    let encrypt_key_size = r.read_u8()?;
    let code = r.read_u8()?;
    let value_type =
        AttValueType::try_from(code).map_err(|c| invalid(format!("unknown value type {}", c)))?;
    let flags = AttFlags::from_bits_retain(r.read_u16::<LittleEndian>()?);
    let attr_type = r.read_u16::<LittleEndian>()?;

    let value = match value_type {
        AttValueType::V8 => StoredValue::V8(r.read_u8()?),
        AttValueType::V16 => StoredValue::V16(r.read_u16::<LittleEndian>()?),
        AttValueType::V32 => StoredValue::V32(r.read_u32::<LittleEndian>()?),
        AttValueType::V48 => StoredValue::V48(r.read_u48::<LittleEndian>()?),
        AttValueType::Handle => StoredValue::Handle(r.read_u16::<LittleEndian>()?),
        AttValueType::Uuid128 => StoredValue::Uuid128 {
            index: r.read_u16::<LittleEndian>()?,
        },
        AttValueType::IncDefUuid => StoredValue::IncDefUuid {
            index: r.read_u16::<LittleEndian>()?,
        },
        AttValueType::IncDefNoUuid => StoredValue::IncDefNoUuid {
            index: r.read_u16::<LittleEndian>()?,
        },
        AttValueType::CharDeclUuid16 => StoredValue::CharDeclUuid16 {
            index: r.read_u16::<LittleEndian>()?,
        },
        AttValueType::CharDeclUuid128 => StoredValue::CharDeclUuid128 {
            index: r.read_u16::<LittleEndian>()?,
        },
        AttValueType::HandleArray => StoredValue::HandleArray {
            index: r.read_u16::<LittleEndian>()?,
        },
        AttValueType::OctetSeq => StoredValue::OctetSeq {
            len: r.read_u16::<LittleEndian>()?,
            max: r.read_u16::<LittleEndian>()?,
            index: r.read_u16::<LittleEndian>()?,
        },
        AttValueType::OctetSeqFixed => StoredValue::OctetSeqFixed {
            len: r.read_u16::<LittleEndian>()?,
            index: r.read_u16::<LittleEndian>()?,
        },
        AttValueType::StoredServApp => StoredValue::StoredServApp {
            len: r.read_u16::<LittleEndian>()?,
            max: r.read_u16::<LittleEndian>()?,
            fixed: r.read_u8()? != 0,
        },
        AttValueType::ClientOwnInst => StoredValue::ClientOwnInst(match r.read_u8()? {
            COI_KIND_CCC => {
                CoiDefault::Ccc(ClientCharConfig::from_bits_retain(r.read_u16::<LittleEndian>()?))
            }
            COI_KIND_OCTETS => CoiDefault::Octets {
                len: r.read_u16::<LittleEndian>()?,
                max: r.read_u16::<LittleEndian>()?,
                index: r.read_u16::<LittleEndian>()?,
            },
            COI_KIND_TWO_U16 => CoiDefault::TwoU16 {
                start: r.read_u16::<LittleEndian>()?,
                end: r.read_u16::<LittleEndian>()?,
            },
            kind => return Err(invalid(format!("unknown client own instance kind {}", kind))),
        }),
        AttValueType::Enum8 => StoredValue::Enum8 {
            index: r.read_u16::<LittleEndian>()?,
            min: r.read_u8()?,
            max: r.read_u8()?,
        },
        AttValueType::Enum16 => StoredValue::Enum16 {
            index: r.read_u16::<LittleEndian>()?,
            min: r.read_u16::<LittleEndian>()?,
            max: r.read_u16::<LittleEndian>()?,
        },
    };

    Ok(Attribute::new(permissions, attr_type, value)
        .with_flags(flags)
        .with_key_size(encrypt_key_size))
}

fn write_root<W: Write>(w: &mut W, root: &RootImage) -> io::Result<()> {
    w.write_all(&ROOT_MAGIC)?;
    w.write_u8(FORMAT_VERSION)?;
    w.write_all(&root.identity.irk)?;
    w.write_u32::<LittleEndian>(root.identity.address_id_counter)?;
    w.write_all(root.identity.local_addr.as_slice())?;

    write_entries(w, &root.static_entries)?;
    write_entries(w, &root.dynamic_entries)?;

    w.write_u16::<LittleEndian>(count(root.services.len())?)?;
    for service in &root.services {
        w.write_u16::<LittleEndian>(service.start_handle)?;
        w.write_u16::<LittleEndian>(count(service.attributes.len())?)?;
        w.write_u8(service.transport as u8)?;
        for attr in &service.attributes {
            match attr {
                Some(attr) => {
                    w.write_u8(1)?;
                    write_attribute(w, attr)?;
                }
                None => w.write_u8(0)?,
            }
        }
    }

    w.write_u16::<LittleEndian>(count(root.groups.len())?)?;
    for record in &root.groups {
        w.write_u32::<LittleEndian>(*record)?;
    }
    Ok(())
}

fn read_root<R: Read>(r: &mut R) -> io::Result<RootImage> {
    check_header(r, ROOT_MAGIC)?;
    let mut irk = [0u8; 16];
    r.read_exact(&mut irk)?;
    let address_id_counter = r.read_u32::<LittleEndian>()?;
    let mut addr = [0u8; 6];
    r.read_exact(&mut addr)?;

    let static_entries = read_entries(r)?;
    let dynamic_entries = read_entries(r)?;

    let num_services = r.read_u16::<LittleEndian>()?;
    let mut services = Vec::with_capacity(num_services as usize);
    for _ in 0..num_services {
        let start_handle = r.read_u16::<LittleEndian>()?;
        let num_attr = r.read_u16::<LittleEndian>()?;
        let transport = ServiceTransport::try_from(r.read_u8()?)
            .map_err(|t| invalid(format!("unknown transport {}", t)))?;
        let mut attributes = Vec::with_capacity(num_attr as usize);
        for _ in 0..num_attr {
            attributes.push(match r.read_u8()? {
                0 => None,
                _ => Some(read_attribute(r)?),
            });
        }
        services.push(ServiceImage {
            start_handle,
            transport,
            attributes,
        });
    }

    let num_groups = r.read_u16::<LittleEndian>()?;
    let mut groups = Vec::with_capacity(num_groups as usize);
    for _ in 0..num_groups {
        groups.push(r.read_u32::<LittleEndian>()?);
    }

    Ok(RootImage {
        identity: Identity {
            irk,
            address_id_counter,
            local_addr: BdAddr::new(addr),
        },
        static_entries,
        dynamic_entries,
        services,
        groups,
    })
}

fn write_group<W: Write>(w: &mut W, group: &GroupImage) -> io::Result<()> {
    w.write_all(&GROUP_MAGIC)?;
    w.write_u8(FORMAT_VERSION)?;
    w.write_u8(group.peer.address_type.into())?;
    w.write_all(group.peer.address.as_slice())?;
    w.write_u16::<LittleEndian>(count(group.items.len())?)?;
    for item in &group.items {
        w.write_u16::<LittleEndian>(item.start_handle)?;
        w.write_u16::<LittleEndian>(item.attr_index)?;
        match &item.value {
            CoiValue::Ccc(ccc) => {
                w.write_u8(COI_KIND_CCC)?;
                w.write_u16::<LittleEndian>(ccc.bits())?;
            }
            CoiValue::Octets(data) => {
                w.write_u8(COI_KIND_OCTETS)?;
                w.write_u16::<LittleEndian>(count(data.len())?)?;
                w.write_all(data)?;
            }
            CoiValue::TwoU16 { start, end } => {
                w.write_u8(COI_KIND_TWO_U16)?;
                w.write_u16::<LittleEndian>(*start)?;
                w.write_u16::<LittleEndian>(*end)?;
            }
        }
    }
    Ok(())
}

fn read_group<R: Read>(r: &mut R) -> io::Result<GroupImage> {
    check_header(r, GROUP_MAGIC)?;
    let address_type = AddressType::from(r.read_u8()?);
    let mut addr = [0u8; 6];
    r.read_exact(&mut addr)?;

    let n = r.read_u16::<LittleEndian>()?;
    let mut items = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let start_handle = r.read_u16::<LittleEndian>()?;
        let attr_index = r.read_u16::<LittleEndian>()?;
        let value = match r.read_u8()? {
            COI_KIND_CCC => {
                CoiValue::Ccc(ClientCharConfig::from_bits_retain(r.read_u16::<LittleEndian>()?))
            }
            COI_KIND_OCTETS => {
                let len = r.read_u16::<LittleEndian>()?;
                CoiValue::Octets(read_bytes(r, len as usize)?)
            }
            COI_KIND_TWO_U16 => CoiValue::TwoU16 {
                start: r.read_u16::<LittleEndian>()?,
                end: r.read_u16::<LittleEndian>()?,
            },
            kind => return Err(invalid(format!("unknown client own instance kind {}", kind))),
        };
        items.push(GroupItem {
            start_handle,
            attr_index,
            value,
        });
    }

    Ok(GroupImage {
        peer: DevAddr::new(address_type, BdAddr::new(addr)),
        items,
    })
}

fn decode_all<T>(
    id: RecordId,
    bytes: &[u8],
    read: impl FnOnce(&mut Cursor<&[u8]>) -> io::Result<T>,
) -> DbResult<T> {
    let mut cursor = Cursor::new(bytes);
    let value = read(&mut cursor).map_err(|e| corrupt(id, e))?;
    if cursor.position() as usize != bytes.len() {
        return Err(DbError::CorruptRecord {
            id,
            reason: format!("{} trailing bytes", bytes.len() - cursor.position() as usize),
        });
    }
    Ok(value)
}

pub fn encode_root(root: &RootImage) -> DbResult<Vec<u8>> {
    let mut buf = Vec::new();
    write_root(&mut buf, root).map_err(|e| DbError::Persistence(e.to_string()))?;
    Ok(buf)
}

pub fn decode_root(id: RecordId, bytes: &[u8]) -> DbResult<RootImage> {
    decode_all(id, bytes, |r| read_root(r))
}

pub fn encode_group(group: &GroupImage) -> DbResult<Vec<u8>> {
    let mut buf = Vec::new();
    write_group(&mut buf, group).map_err(|e| DbError::Persistence(e.to_string()))?;
    Ok(buf)
}

pub fn decode_group(id: RecordId, bytes: &[u8]) -> DbResult<GroupImage> {
    decode_all(id, bytes, |r| read_group(r))
}
