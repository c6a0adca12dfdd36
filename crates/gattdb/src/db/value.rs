//! Attribute value model
//!
//! Attributes are kept in a compact stored form. Fixed width scalars live
//! inline in the attribute, everything of variable length is referenced by
//! an index into the static or dynamic value table. An octet sequence lives
//! in the dynamic table exactly when the attribute carries
//! [`AttFlags::VAL_DYNAMIC`].
//!
//! Callers never see the stored form directly. They register attributes from
//! [`StaticAttr`] and [`DynamicAttr`] templates and read values back as
//! [`AttValue`].

use crate::att::{
    AttFlags, AttPermissions, ATT_MAX_ENCRYPT_KEY_SIZE, ATT_MIN_ENCRYPT_KEY_SIZE,
};
use crate::error::{DbError, DbResult};
use crate::gatt::{CharProps, ClientCharConfig, GattUuid};
use byteorder::{ByteOrder, LittleEndian};

/// Value type codes, stable in the persisted format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttValueType {
    V8 = 0,
    V16 = 1,
    V32 = 2,
    V48 = 3,
    Handle = 4,
    Uuid128 = 5,
    OctetSeq = 6,
    OctetSeqFixed = 7,
    StoredServApp = 8,
    ClientOwnInst = 9,
    IncDefUuid = 10,
    IncDefNoUuid = 11,
    CharDeclUuid16 = 12,
    CharDeclUuid128 = 13,
    HandleArray = 14,
    Enum8 = 15,
    Enum16 = 16,
}

impl TryFrom<u8> for AttValueType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => AttValueType::V8,
            1 => AttValueType::V16,
            2 => AttValueType::V32,
            3 => AttValueType::V48,
            4 => AttValueType::Handle,
            5 => AttValueType::Uuid128,
            6 => AttValueType::OctetSeq,
            7 => AttValueType::OctetSeqFixed,
            8 => AttValueType::StoredServApp,
            9 => AttValueType::ClientOwnInst,
            10 => AttValueType::IncDefUuid,
            11 => AttValueType::IncDefNoUuid,
            12 => AttValueType::CharDeclUuid16,
            13 => AttValueType::CharDeclUuid128,
            14 => AttValueType::HandleArray,
            15 => AttValueType::Enum8,
            16 => AttValueType::Enum16,
            other => return Err(other),
        })
    }
}

impl From<AttValueType> for u8 {
    fn from(value_type: AttValueType) -> Self {
        value_type as u8
    }
}

/// Default of a client own instance attribute, the value every peer sees
/// until it writes its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoiDefault {
    Ccc(ClientCharConfig),
    /// Table entry allocated at `max` bytes
    Octets { len: u16, max: u16, index: u16 },
    TwoU16 { start: u16, end: u16 },
}

/// Stored form of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredValue {
    V8(u8),
    V16(u16),
    V32(u32),
    /// Only the low 48 bits are significant
    V48(u64),
    /// Offset of the referenced attribute from the service start handle
    Handle(u16),
    Uuid128 { index: u16 },
    OctetSeq { len: u16, max: u16, index: u16 },
    OctetSeqFixed { len: u16, index: u16 },
    /// The bytes are owned by the service handler
    StoredServApp { len: u16, max: u16, fixed: bool },
    ClientOwnInst(CoiDefault),
    IncDefUuid { index: u16 },
    IncDefNoUuid { index: u16 },
    CharDeclUuid16 { index: u16 },
    CharDeclUuid128 { index: u16 },
    HandleArray { index: u16 },
    /// Current value in the dynamic table, bounds inline
    Enum8 { index: u16, min: u8, max: u8 },
    Enum16 { index: u16, min: u16, max: u16 },
}

impl StoredValue {
    pub fn value_type(&self) -> AttValueType {
        match self {
            StoredValue::V8(_) => AttValueType::V8,
            StoredValue::V16(_) => AttValueType::V16,
            StoredValue::V32(_) => AttValueType::V32,
            StoredValue::V48(_) => AttValueType::V48,
            StoredValue::Handle(_) => AttValueType::Handle,
            StoredValue::Uuid128 { .. } => AttValueType::Uuid128,
            StoredValue::OctetSeq { .. } => AttValueType::OctetSeq,
            StoredValue::OctetSeqFixed { .. } => AttValueType::OctetSeqFixed,
            StoredValue::StoredServApp { .. } => AttValueType::StoredServApp,
            StoredValue::ClientOwnInst(_) => AttValueType::ClientOwnInst,
            StoredValue::IncDefUuid { .. } => AttValueType::IncDefUuid,
            StoredValue::IncDefNoUuid { .. } => AttValueType::IncDefNoUuid,
            StoredValue::CharDeclUuid16 { .. } => AttValueType::CharDeclUuid16,
            StoredValue::CharDeclUuid128 { .. } => AttValueType::CharDeclUuid128,
            StoredValue::HandleArray { .. } => AttValueType::HandleArray,
            StoredValue::Enum8 { .. } => AttValueType::Enum8,
            StoredValue::Enum16 { .. } => AttValueType::Enum16,
        }
    }

    /// Value table entry referenced by this value, if any
    pub fn table_index(&self) -> Option<u16> {
        match *self {
            StoredValue::Uuid128 { index }
            | StoredValue::OctetSeq { index, .. }
            | StoredValue::OctetSeqFixed { index, .. }
            | StoredValue::IncDefUuid { index }
            | StoredValue::IncDefNoUuid { index }
            | StoredValue::CharDeclUuid16 { index }
            | StoredValue::CharDeclUuid128 { index }
            | StoredValue::HandleArray { index }
            | StoredValue::Enum8 { index, .. }
            | StoredValue::Enum16 { index, .. } => Some(index),
            StoredValue::ClientOwnInst(CoiDefault::Octets { index, .. }) => Some(index),
            _ => None,
        }
    }

    /// Whether the referenced entry lives in the dynamic table for an
    /// attribute with `flags`
    pub fn in_dynamic_table(&self, flags: AttFlags) -> bool {
        match self {
            StoredValue::Enum8 { .. } | StoredValue::Enum16 { .. } => true,
            StoredValue::OctetSeq { .. }
            | StoredValue::OctetSeqFixed { .. }
            | StoredValue::ClientOwnInst(_) => flags.contains(AttFlags::VAL_DYNAMIC),
            _ => false,
        }
    }
}

/// One attribute as held in a service's attribute array.
///
/// Attributes can be built in `const` context so that whole arrays may live
/// in read-only statics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub permissions: AttPermissions,
    /// Minimum encryption key size, 0 for no requirement
    pub encrypt_key_size: u8,
    pub flags: AttFlags,
    /// 16-bit type UUID, or the static table index of a 128-bit type UUID
    /// when `TYPE_UUID128` is set
    pub attr_type: u16,
    pub value: StoredValue,
}

impl Attribute {
    pub const fn new(permissions: AttPermissions, attr_type: u16, value: StoredValue) -> Self {
        Self {
            permissions,
            encrypt_key_size: 0,
            flags: AttFlags::empty(),
            attr_type,
            value,
        }
    }

    pub const fn with_flags(self, flags: AttFlags) -> Self {
        Self {
            permissions: self.permissions,
            encrypt_key_size: self.encrypt_key_size,
            flags,
            attr_type: self.attr_type,
            value: self.value,
        }
    }

    pub const fn with_key_size(self, encrypt_key_size: u8) -> Self {
        Self {
            permissions: self.permissions,
            encrypt_key_size,
            flags: self.flags,
            attr_type: self.attr_type,
            value: self.value,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.contains(AttFlags::VAL_DYNAMIC)
    }

    pub fn value_type(&self) -> AttValueType {
        self.value.value_type()
    }

    /// Table index of the attribute type if it is a 128-bit UUID
    pub fn type_index(&self) -> Option<u16> {
        if self.flags.contains(AttFlags::TYPE_UUID128) {
            Some(self.attr_type)
        } else {
            None
        }
    }
}

/// A client own instance value as seen by one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoiValue {
    Ccc(ClientCharConfig),
    Octets(Vec<u8>),
    TwoU16 { start: u16, end: u16 },
}

impl Default for CoiValue {
    fn default() -> Self {
        CoiValue::Ccc(ClientCharConfig::empty())
    }
}

impl CoiValue {
    /// Whether this value has the same shape as `default`
    pub(crate) fn matches_kind(&self, default: &CoiDefault) -> bool {
        matches!(
            (self, default),
            (CoiValue::Ccc(_), CoiDefault::Ccc(_))
                | (CoiValue::Octets(_), CoiDefault::Octets { .. })
                | (CoiValue::TwoU16 { .. }, CoiDefault::TwoU16 { .. })
        )
    }

    /// Bytes as sent over the air
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            CoiValue::Ccc(ccc) => ccc.bits().to_le_bytes().to_vec(),
            CoiValue::Octets(data) => data.clone(),
            CoiValue::TwoU16 { start, end } => {
                let mut buf = Vec::with_capacity(4);
                buf.extend_from_slice(&start.to_le_bytes());
                buf.extend_from_slice(&end.to_le_bytes());
                buf
            }
        }
    }
}

/// Caller facing attribute value with the data resolved from the tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttValue {
    V8(u8),
    V16(u16),
    V32(u32),
    V48(u64),
    /// Offset from the service start handle
    Handle(u16),
    Uuid128([u8; 16]),
    OctetSeq {
        data: Vec<u8>,
        max: u16,
    },
    OctetSeqFixed(Vec<u8>),
    StoredServApp {
        len: u16,
        max: u16,
        fixed: bool,
    },
    /// `max` is the capacity of an octet default and 0 otherwise
    ClientOwnInst {
        default: CoiValue,
        max: u16,
    },
    /// Include declaration. The UUID is present only for 16-bit service UUIDs.
    IncludeDef {
        service_handle: u16,
        end_group_handle: u16,
        uuid: Option<u16>,
    },
    /// Characteristic declaration. `value_offset` is relative to the service
    /// start handle.
    CharDecl {
        props: CharProps,
        value_offset: u16,
        uuid: GattUuid,
    },
    /// Handle offsets relative to the service start handle
    HandleArray(Vec<u16>),
    Enum8 {
        value: u8,
        min: u8,
        max: u8,
    },
    Enum16 {
        value: u16,
        min: u16,
        max: u16,
    },
}

impl AttValue {
    pub fn value_type(&self) -> AttValueType {
        match self {
            AttValue::V8(_) => AttValueType::V8,
            AttValue::V16(_) => AttValueType::V16,
            AttValue::V32(_) => AttValueType::V32,
            AttValue::V48(_) => AttValueType::V48,
            AttValue::Handle(_) => AttValueType::Handle,
            AttValue::Uuid128(_) => AttValueType::Uuid128,
            AttValue::OctetSeq { .. } => AttValueType::OctetSeq,
            AttValue::OctetSeqFixed(_) => AttValueType::OctetSeqFixed,
            AttValue::StoredServApp { .. } => AttValueType::StoredServApp,
            AttValue::ClientOwnInst { .. } => AttValueType::ClientOwnInst,
            AttValue::IncludeDef { uuid: Some(_), .. } => AttValueType::IncDefUuid,
            AttValue::IncludeDef { uuid: None, .. } => AttValueType::IncDefNoUuid,
            AttValue::CharDecl {
                uuid: GattUuid::Uuid16(_),
                ..
            } => AttValueType::CharDeclUuid16,
            AttValue::CharDecl {
                uuid: GattUuid::Uuid128(_),
                ..
            } => AttValueType::CharDeclUuid128,
            AttValue::HandleArray(_) => AttValueType::HandleArray,
            AttValue::Enum8 { .. } => AttValueType::Enum8,
            AttValue::Enum16 { .. } => AttValueType::Enum16,
        }
    }
}

/// Full description of an attribute returned by `get_attrib_value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttValueDesc {
    pub attr_type: GattUuid,
    pub permissions: AttPermissions,
    pub encrypt_key_size: u8,
    pub flags: AttFlags,
    pub value: AttValue,
}

/// Values that may be registered through `add_static`. None of them can
/// change after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticValue {
    V8(u8),
    V16(u16),
    V32(u32),
    V48(u64),
    Handle(u16),
    Uuid128([u8; 16]),
    OctetSeq(Vec<u8>),
    OctetSeqFixed(Vec<u8>),
    IncludeDef {
        service_handle: u16,
        end_group_handle: u16,
        uuid: Option<u16>,
    },
    CharDecl {
        props: CharProps,
        value_offset: u16,
        uuid: GattUuid,
    },
    HandleArray(Vec<u16>),
}

impl TryFrom<AttValue> for StaticValue {
    type Error = DbError;

    fn try_from(value: AttValue) -> Result<Self, Self::Error> {
        Ok(match value {
            AttValue::V8(v) => StaticValue::V8(v),
            AttValue::V16(v) => StaticValue::V16(v),
            AttValue::V32(v) => StaticValue::V32(v),
            AttValue::V48(v) => StaticValue::V48(v),
            AttValue::Handle(h) => StaticValue::Handle(h),
            AttValue::Uuid128(u) => StaticValue::Uuid128(u),
            AttValue::OctetSeq { data, max } => {
                if data.len() > max as usize {
                    return Err(DbError::InvalidTemplate("octet sequence longer than max"));
                }
                StaticValue::OctetSeq(data)
            }
            AttValue::OctetSeqFixed(data) => StaticValue::OctetSeqFixed(data),
            AttValue::IncludeDef {
                service_handle,
                end_group_handle,
                uuid,
            } => StaticValue::IncludeDef {
                service_handle,
                end_group_handle,
                uuid,
            },
            AttValue::CharDecl {
                props,
                value_offset,
                uuid,
            } => StaticValue::CharDecl {
                props,
                value_offset,
                uuid,
            },
            AttValue::HandleArray(handles) => StaticValue::HandleArray(handles),
            AttValue::StoredServApp { .. }
            | AttValue::ClientOwnInst { .. }
            | AttValue::Enum8 { .. }
            | AttValue::Enum16 { .. } => {
                return Err(DbError::InvalidTemplate("value type cannot be static"))
            }
        })
    }
}

/// Values that may be registered through `add_dynamic`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicValue {
    V8(u8),
    V16(u16),
    V32(u32),
    V48(u64),
    OctetSeq {
        data: Vec<u8>,
        max: u16,
    },
    OctetSeqFixed(Vec<u8>),
    StoredServApp {
        len: u16,
        max: u16,
        fixed: bool,
    },
    ClientOwnInst {
        default: CoiValue,
        max: u16,
    },
    Enum8 {
        value: u8,
        min: u8,
        max: u8,
    },
    Enum16 {
        value: u16,
        min: u16,
        max: u16,
    },
}

impl DynamicValue {
    /// A Client Characteristic Configuration descriptor value, defaulting
    /// to nothing enabled
    pub fn ccc() -> Self {
        DynamicValue::ClientOwnInst {
            default: CoiValue::default(),
            max: 0,
        }
    }
}

impl TryFrom<AttValue> for DynamicValue {
    type Error = DbError;

    fn try_from(value: AttValue) -> Result<Self, Self::Error> {
        Ok(match value {
            AttValue::V8(v) => DynamicValue::V8(v),
            AttValue::V16(v) => DynamicValue::V16(v),
            AttValue::V32(v) => DynamicValue::V32(v),
            AttValue::V48(v) => DynamicValue::V48(v),
            AttValue::OctetSeq { data, max } => DynamicValue::OctetSeq { data, max },
            AttValue::OctetSeqFixed(data) => DynamicValue::OctetSeqFixed(data),
            AttValue::StoredServApp { len, max, fixed } => {
                DynamicValue::StoredServApp { len, max, fixed }
            }
            AttValue::ClientOwnInst { default, max } => DynamicValue::ClientOwnInst { default, max },
            AttValue::Enum8 { value, min, max } => DynamicValue::Enum8 { value, min, max },
            AttValue::Enum16 { value, min, max } => DynamicValue::Enum16 { value, min, max },
            AttValue::Handle(_)
            | AttValue::Uuid128(_)
            | AttValue::IncludeDef { .. }
            | AttValue::CharDecl { .. }
            | AttValue::HandleArray(_) => {
                return Err(DbError::InvalidTemplate("value type cannot be dynamic"))
            }
        })
    }
}

fn check_key_size(encrypt_key_size: u8) -> DbResult<()> {
    if encrypt_key_size != 0
        && !(ATT_MIN_ENCRYPT_KEY_SIZE..=ATT_MAX_ENCRYPT_KEY_SIZE).contains(&encrypt_key_size)
    {
        return Err(DbError::InvalidTemplate("encryption key size out of range"));
    }
    Ok(())
}

fn check_octets(len: usize, max: u16, limit: u16) -> DbResult<()> {
    if max > limit {
        return Err(DbError::InvalidTemplate("max exceeds the attribute value limit"));
    }
    if len > max as usize {
        return Err(DbError::InvalidLength { len, max });
    }
    Ok(())
}

/// Template for an attribute whose value never changes after registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAttr {
    pub attr_type: GattUuid,
    pub permissions: AttPermissions,
    pub encrypt_key_size: u8,
    pub alert_read: bool,
    pub value: StaticValue,
}

impl StaticAttr {
    pub fn new(attr_type: impl Into<GattUuid>, permissions: AttPermissions, value: StaticValue) -> Self {
        Self {
            attr_type: attr_type.into(),
            permissions,
            encrypt_key_size: 0,
            alert_read: false,
            value,
        }
    }

    pub fn with_key_size(mut self, encrypt_key_size: u8) -> Self {
        self.encrypt_key_size = encrypt_key_size;
        self
    }

    pub fn alert_on_read(mut self) -> Self {
        self.alert_read = true;
        self
    }

    pub(crate) fn validate(&self, limit: u16) -> DbResult<()> {
        if !self.permissions.can_read() {
            return Err(DbError::InvalidTemplate("static attribute must be readable"));
        }
        if self.permissions.can_write() {
            return Err(DbError::InvalidTemplate("static attribute cannot be writeable"));
        }
        check_key_size(self.encrypt_key_size)?;
        match &self.value {
            StaticValue::OctetSeq(data) | StaticValue::OctetSeqFixed(data) => {
                check_octets(data.len(), limit, limit)
            }
            StaticValue::HandleArray(handles) if handles.is_empty() => {
                Err(DbError::InvalidTemplate("empty handle array"))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn flags(&self) -> AttFlags {
        let mut flags = AttFlags::empty();
        flags.set(AttFlags::ALERT_ON_READ, self.alert_read);
        flags.set(AttFlags::TYPE_UUID128, matches!(self.attr_type, GattUuid::Uuid128(_)));
        flags
    }
}

/// Template for an attribute whose value may change at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicAttr {
    pub attr_type: GattUuid,
    pub permissions: AttPermissions,
    pub encrypt_key_size: u8,
    pub alert_read: bool,
    pub alert_write: bool,
    pub check_write: bool,
    pub value: DynamicValue,
}

impl DynamicAttr {
    pub fn new(attr_type: impl Into<GattUuid>, permissions: AttPermissions, value: DynamicValue) -> Self {
        Self {
            attr_type: attr_type.into(),
            permissions,
            encrypt_key_size: 0,
            alert_read: false,
            alert_write: false,
            check_write: false,
            value,
        }
    }

    pub fn with_key_size(mut self, encrypt_key_size: u8) -> Self {
        self.encrypt_key_size = encrypt_key_size;
        self
    }

    pub fn alert_on_read(mut self) -> Self {
        self.alert_read = true;
        self
    }

    pub fn alert_on_write(mut self) -> Self {
        self.alert_write = true;
        self
    }

    /// Hand remote writes to the service handler before they are committed
    pub fn check_write(mut self) -> Self {
        self.check_write = true;
        self
    }

    pub(crate) fn validate(&self, limit: u16) -> DbResult<()> {
        check_key_size(self.encrypt_key_size)?;
        match &self.value {
            DynamicValue::OctetSeq { data, max } => check_octets(data.len(), *max, limit),
            DynamicValue::OctetSeqFixed(data) => check_octets(data.len(), limit, limit),
            DynamicValue::StoredServApp { len, max, .. } => check_octets(*len as usize, *max, limit),
            DynamicValue::ClientOwnInst {
                default: CoiValue::Octets(data),
                max,
            } => check_octets(data.len(), *max, limit),
            DynamicValue::Enum8 { value, min, max } => check_bounds(*value, *min, *max),
            DynamicValue::Enum16 { value, min, max } => check_bounds(*value, *min, *max),
            _ => Ok(()),
        }
    }

    pub(crate) fn flags(&self) -> AttFlags {
        let mut flags = AttFlags::VAL_DYNAMIC;
        flags.set(AttFlags::ALERT_ON_READ, self.alert_read);
        flags.set(AttFlags::ALERT_ON_WRITE, self.alert_write);
        flags.set(AttFlags::CHECK_WRITE, self.check_write);
        flags.set(AttFlags::TYPE_UUID128, matches!(self.attr_type, GattUuid::Uuid128(_)));
        flags
    }
}

fn check_bounds<T: PartialOrd>(value: T, min: T, max: T) -> DbResult<()> {
    if min > max {
        return Err(DbError::InvalidTemplate("enum bounds are inverted"));
    }
    if value < min || value > max {
        return Err(DbError::OutOfRange);
    }
    Ok(())
}

/// Table encoding of an include declaration
pub(crate) fn encode_include(service_handle: u16, end_group_handle: u16, uuid: Option<u16>) -> Vec<u8> {
    let mut buf = vec![0u8; if uuid.is_some() { 6 } else { 4 }];
    LittleEndian::write_u16(&mut buf[0..2], service_handle);
    LittleEndian::write_u16(&mut buf[2..4], end_group_handle);
    if let Some(uuid) = uuid {
        LittleEndian::write_u16(&mut buf[4..6], uuid);
    }
    buf
}

/// Table encoding of a characteristic declaration, with the value handle
/// kept as an offset from the service start
pub(crate) fn encode_char_decl(props: CharProps, value_offset: u16, uuid: &GattUuid) -> Vec<u8> {
    let mut buf = vec![props.bits(), 0, 0];
    LittleEndian::write_u16(&mut buf[1..3], value_offset);
    buf.extend_from_slice(&uuid.as_bytes());
    buf
}

pub(crate) fn encode_handle_array(handles: &[u16]) -> Vec<u8> {
    let mut buf = vec![0u8; handles.len() * 2];
    LittleEndian::write_u16_into(handles, &mut buf);
    buf
}

pub(crate) fn decode_handle_array(bytes: &[u8]) -> Vec<u16> {
    bytes.chunks_exact(2).map(LittleEndian::read_u16).collect()
}

/// Decode a table entry of a value of type `value_type` into the caller
/// facing form. Only the types whose whole content lives in one entry are
/// handled here.
pub(crate) fn decode_table_value(value_type: AttValueType, bytes: &[u8]) -> Option<AttValue> {
    Some(match value_type {
        AttValueType::Uuid128 => {
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(bytes.get(..16)?);
            AttValue::Uuid128(uuid)
        }
        AttValueType::IncDefUuid | AttValueType::IncDefNoUuid => {
            if bytes.len() < 4 {
                return None;
            }
            AttValue::IncludeDef {
                service_handle: LittleEndian::read_u16(&bytes[0..2]),
                end_group_handle: LittleEndian::read_u16(&bytes[2..4]),
                uuid: bytes.get(4..6).map(LittleEndian::read_u16),
            }
        }
        AttValueType::CharDeclUuid16 | AttValueType::CharDeclUuid128 => {
            if bytes.len() < 3 {
                return None;
            }
            AttValue::CharDecl {
                props: CharProps::from_bits_retain(bytes[0]),
                value_offset: LittleEndian::read_u16(&bytes[1..3]),
                uuid: GattUuid::from_bytes(&bytes[3..])?,
            }
        }
        AttValueType::HandleArray => AttValue::HandleArray(decode_handle_array(bytes)),
        _ => return None,
    })
}
