//! Services, handle range allocation and attribute registration
//!
//! A service owns a contiguous handle range `[start, start + num_attr - 1]`
//! and an attribute array of the same length. The array is either borrowed
//! from read-only memory or built at runtime one attribute at a time.

use super::pending::{PendingRequest, ServiceHandler};
use super::value::{
    decode_table_value, encode_char_decl, encode_handle_array, encode_include, AttValue, AttValueDesc, Attribute,
    CoiDefault, CoiValue, DynamicAttr, DynamicValue, StaticAttr, StaticValue, StoredValue,
};
use super::GattDatabase;
use crate::att::{AttPermissions, ATT_HANDLE_MAX, PRIMARY_SERVICE_UUID, SECONDARY_SERVICE_UUID};
use crate::error::{DbError, DbResult};
use crate::gap::Transport;
use crate::gatt::GattUuid;
use crate::persist::PersistenceManager;
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use std::fmt;

bitflags! {
    /// State bits of a service
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServiceFlags: u8 {
        /// Visible to remote peers and persisted on flush
        const ACTIVE = 0x01;
        /// The attribute array lives in read-only memory
        const ATTARRAY_ROM = 0x02;
    }
}

/// Radio transports a service is reachable over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ServiceTransport {
    #[default]
    All = 0,
    LeOnly = 1,
    BrEdrOnly = 2,
}

impl ServiceTransport {
    pub fn allows(&self, transport: Transport) -> bool {
        matches!(
            (self, transport),
            (ServiceTransport::All, _)
                | (ServiceTransport::LeOnly, Transport::Le)
                | (ServiceTransport::BrEdrOnly, Transport::BrEdr)
        )
    }
}

impl TryFrom<u8> for ServiceTransport {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServiceTransport::All),
            1 => Ok(ServiceTransport::LeOnly),
            2 => Ok(ServiceTransport::BrEdrOnly),
            other => Err(other),
        }
    }
}

/// Identifies an allocated service. Equal to its start handle, which never
/// changes while the service exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(pub(crate) u16);

impl ServiceId {
    pub fn start_handle(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service@{:#06x}", self.0)
    }
}

/// Inclusive handle range of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    pub fn contains(&self, handle: u16) -> bool {
        handle >= self.start && handle <= self.end
    }

    pub fn overlaps(&self, other: &HandleRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Parameters for [`GattDatabase::allocate_service`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceParms {
    /// Requested start handle, 0 to let the database choose
    pub start_handle: u16,
    /// Number of attributes including the service declaration
    pub num_handles: u16,
    pub primary: bool,
    pub uuid: GattUuid,
    pub transport: ServiceTransport,
}

impl ServiceParms {
    pub fn primary(uuid: impl Into<GattUuid>, num_handles: u16) -> Self {
        Self {
            start_handle: 0,
            num_handles,
            primary: true,
            uuid: uuid.into(),
            transport: ServiceTransport::All,
        }
    }

    pub fn secondary(uuid: impl Into<GattUuid>, num_handles: u16) -> Self {
        Self {
            primary: false,
            ..Self::primary(uuid, num_handles)
        }
    }

    pub fn with_start_handle(mut self, start_handle: u16) -> Self {
        self.start_handle = start_handle;
        self
    }

    pub fn with_transport(mut self, transport: ServiceTransport) -> Self {
        self.transport = transport;
        self
    }
}

/// Attribute array of a service
#[derive(Debug, Clone)]
pub enum AttributeArray {
    /// Read-only array, never modified or freed by the database
    Rom(&'static [Attribute]),
    /// Runtime array; `None` marks an index not yet registered
    Ram(Vec<Option<Attribute>>),
}

impl AttributeArray {
    pub fn len(&self) -> usize {
        match self {
            AttributeArray::Rom(attrs) => attrs.len(),
            AttributeArray::Ram(attrs) => attrs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: u16) -> Option<&Attribute> {
        match self {
            AttributeArray::Rom(attrs) => attrs.get(index as usize),
            AttributeArray::Ram(attrs) => attrs.get(index as usize).and_then(Option::as_ref),
        }
    }

    /// Mutable slot of a runtime array
    pub fn slot_mut(&mut self, index: u16) -> DbResult<&mut Option<Attribute>> {
        match self {
            AttributeArray::Rom(_) => Err(DbError::Immutable),
            AttributeArray::Ram(attrs) => attrs
                .get_mut(index as usize)
                .ok_or(DbError::AttributeNotFound(index)),
        }
    }

    /// Registered attributes with their index
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Attribute)> + '_ {
        (0..self.len() as u16).filter_map(move |i| self.get(i).map(|a| (i, a)))
    }
}

/// One service in the database
#[derive(Clone)]
pub struct Service {
    pub(crate) start_handle: u16,
    pub(crate) flags: ServiceFlags,
    pub(crate) transport: ServiceTransport,
    pub(crate) attributes: AttributeArray,
    pub(crate) handler: Option<ServiceHandler>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("start_handle", &self.start_handle)
            .field("flags", &self.flags)
            .field("transport", &self.transport)
            .field("attributes", &self.attributes)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl Service {
    pub(crate) fn new(start_handle: u16, transport: ServiceTransport, attributes: AttributeArray) -> Self {
        let flags = match attributes {
            AttributeArray::Rom(_) => ServiceFlags::ATTARRAY_ROM | ServiceFlags::ACTIVE,
            AttributeArray::Ram(_) => ServiceFlags::empty(),
        };
        Self {
            start_handle,
            flags,
            transport,
            attributes,
            handler: None,
        }
    }

    pub fn num_attr(&self) -> u16 {
        self.attributes.len() as u16
    }

    pub fn end_handle(&self) -> u16 {
        self.start_handle + self.num_attr().saturating_sub(1)
    }

    pub fn range(&self) -> HandleRange {
        HandleRange {
            start: self.start_handle,
            end: self.end_handle(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(ServiceFlags::ACTIVE)
    }

    pub fn is_rom(&self) -> bool {
        self.flags.contains(ServiceFlags::ATTARRAY_ROM)
    }

    pub fn transport(&self) -> ServiceTransport {
        self.transport
    }

    pub fn attributes(&self) -> &AttributeArray {
        &self.attributes
    }
}

/// Summary of a service returned by lookups and enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: ServiceId,
    pub range: HandleRange,
    pub uuid: GattUuid,
    pub primary: bool,
    pub active: bool,
    pub rom: bool,
    pub transport: ServiceTransport,
}

/// Cursor for [`GattDatabase::enum_services`]. Services are visited in
/// handle order; services added behind the cursor are not visited.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceEnumContext {
    next_handle: u32,
}

/// Table entries added while materializing one attribute, released again if
/// a later step fails
#[derive(Default)]
struct Rollback {
    statics: Vec<u16>,
    dynamics: Vec<u16>,
}

impl<P: PersistenceManager> GattDatabase<P> {
    /// Allocate a handle range and create an inactive service whose
    /// declaration is already in place. The remaining indices must be filled
    /// with `add_static`/`add_dynamic` before the service is added.
    pub fn allocate_service(&mut self, parms: &ServiceParms) -> DbResult<ServiceId> {
        if parms.num_handles == 0 {
            return Err(DbError::InvalidParameter("service needs at least one handle"));
        }
        if parms.start_handle == ATT_HANDLE_MAX {
            return Err(DbError::InvalidParameter("start handle"));
        }

        let start_handle = if parms.start_handle == 0 {
            self.find_free_range(parms.num_handles)
                .ok_or(DbError::HandleRangeUnavailable)?
        } else {
            let end = parms.start_handle as u32 + parms.num_handles as u32 - 1;
            if end > ATT_HANDLE_MAX as u32 {
                return Err(DbError::HandleRangeUnavailable);
            }
            let wanted = HandleRange {
                start: parms.start_handle,
                end: end as u16,
            };
            if self.services.values().any(|s| s.range().overlaps(&wanted)) {
                return Err(DbError::HandleRangeUnavailable);
            }
            parms.start_handle
        };

        let mut slots: Vec<Option<Attribute>> = Vec::new();
        slots
            .try_reserve_exact(parms.num_handles as usize)
            .map_err(|_| DbError::NoResources)?;
        slots.resize(parms.num_handles as usize, None);

        let decl_type = if parms.primary {
            PRIMARY_SERVICE_UUID
        } else {
            SECONDARY_SERVICE_UUID
        };
        let decl_value = match parms.uuid {
            GattUuid::Uuid16(uuid) => StoredValue::V16(uuid),
            GattUuid::Uuid128(uuid) => StoredValue::Uuid128 {
                index: self.static_table.add(&uuid)?,
            },
        };
        slots[0] = Some(Attribute::new(AttPermissions::READABLE, decl_type, decl_value));

        self.services.insert(
            start_handle,
            Service::new(start_handle, parms.transport, AttributeArray::Ram(slots)),
        );
        debug!(
            "Allocated service {} at {:#06x}..={:#06x}",
            parms.uuid,
            start_handle,
            start_handle as u32 + parms.num_handles as u32 - 1
        );

        Ok(ServiceId(start_handle))
    }

    /// Pick a start handle for `num` handles.
    ///
    /// The range after the highest allocated handle is preferred, leaving
    /// `handle_end_spacing` spare handles when they fit. Otherwise the lowest
    /// gap between existing services that is large enough is used.
    fn find_free_range(&self, num: u16) -> Option<u16> {
        let num = num as u32;
        let max = ATT_HANDLE_MAX as u32;
        let highest = self.services.values().map(|s| s.end_handle() as u32).max();

        let after = match highest {
            None => 1,
            Some(end) => end + 1,
        };
        if highest.is_some() {
            let spaced = after + self.config.handle_end_spacing as u32;
            if spaced + num - 1 <= max {
                return Some(spaced as u16);
            }
        }
        if after + num - 1 <= max {
            return Some(after as u16);
        }

        let mut cursor = 1u32;
        for service in self.services.values() {
            if (service.start_handle as u32).saturating_sub(cursor) >= num {
                return Some(cursor as u16);
            }
            cursor = service.end_handle() as u32 + 1;
        }
        None
    }

    fn service_mut_for_build(&mut self, id: ServiceId, index: u16) -> DbResult<&mut Option<Attribute>> {
        let service = self.services.get_mut(&id.0).ok_or(DbError::InvalidService)?;
        if service.is_rom() {
            return Err(DbError::RomService);
        }
        if service.is_active() {
            return Err(DbError::Busy);
        }
        if index == 0 {
            return Err(DbError::InvalidParameter("index 0 is the service declaration"));
        }
        if index >= service.num_attr() {
            return Err(DbError::AttributeNotFound(index));
        }
        let slot = service.attributes.slot_mut(index)?;
        if slot.is_some() {
            return Err(DbError::InUse(index));
        }
        Ok(slot)
    }

    /// Register an attribute whose value never changes. Returns its handle.
    pub fn add_static(&mut self, id: ServiceId, index: u16, template: &StaticAttr) -> DbResult<u16> {
        self.service_mut_for_build(id, index)?;
        template.validate(self.config.max_attrib_value_size)?;

        let mut rollback = Rollback::default();
        let attr = match self.materialize_static(template, &mut rollback) {
            Ok(attr) => attr,
            Err(e) => {
                self.release(rollback);
                return Err(e);
            }
        };
        *self.service_mut_for_build(id, index)? = Some(attr);
        Ok(id.0 + index)
    }

    /// Register an attribute whose value may change at runtime. Returns its
    /// handle.
    pub fn add_dynamic(&mut self, id: ServiceId, index: u16, template: &DynamicAttr) -> DbResult<u16> {
        self.service_mut_for_build(id, index)?;
        template.validate(self.config.max_attrib_value_size)?;

        let mut rollback = Rollback::default();
        let attr = match self.materialize_dynamic(template, &mut rollback) {
            Ok(attr) => attr,
            Err(e) => {
                self.release(rollback);
                return Err(e);
            }
        };
        *self.service_mut_for_build(id, index)? = Some(attr);
        Ok(id.0 + index)
    }

    fn release(&mut self, rollback: Rollback) {
        for index in rollback.statics {
            self.static_table.remove(index);
        }
        for index in rollback.dynamics {
            self.dynamic_table.remove(index);
        }
    }

    fn add_static_entry(&mut self, bytes: &[u8], rollback: &mut Rollback) -> DbResult<u16> {
        let index = self.static_table.add(bytes)?;
        rollback.statics.push(index);
        Ok(index)
    }

    fn add_dynamic_entry(&mut self, bytes: &[u8], rollback: &mut Rollback) -> DbResult<u16> {
        let index = self.dynamic_table.add(bytes)?;
        rollback.dynamics.push(index);
        Ok(index)
    }

    fn type_code(&mut self, attr_type: &GattUuid, rollback: &mut Rollback) -> DbResult<u16> {
        match attr_type {
            GattUuid::Uuid16(uuid) => Ok(*uuid),
            GattUuid::Uuid128(uuid) => self.add_static_entry(uuid, rollback),
        }
    }

    fn materialize_static(&mut self, template: &StaticAttr, rollback: &mut Rollback) -> DbResult<Attribute> {
        let attr_type = self.type_code(&template.attr_type, rollback)?;
        let value = match &template.value {
            StaticValue::V8(v) => StoredValue::V8(*v),
            StaticValue::V16(v) => StoredValue::V16(*v),
            StaticValue::V32(v) => StoredValue::V32(*v),
            StaticValue::V48(v) => StoredValue::V48(*v & V48_MASK),
            StaticValue::Handle(h) => StoredValue::Handle(*h),
            StaticValue::Uuid128(uuid) => StoredValue::Uuid128 {
                index: self.add_static_entry(uuid, rollback)?,
            },
            StaticValue::OctetSeq(data) => StoredValue::OctetSeq {
                len: data.len() as u16,
                max: data.len() as u16,
                index: self.add_static_entry(data, rollback)?,
            },
            StaticValue::OctetSeqFixed(data) => StoredValue::OctetSeqFixed {
                len: data.len() as u16,
                index: self.add_static_entry(data, rollback)?,
            },
            StaticValue::IncludeDef {
                service_handle,
                end_group_handle,
                uuid,
            } => {
                let bytes = encode_include(*service_handle, *end_group_handle, *uuid);
                let index = self.add_static_entry(&bytes, rollback)?;
                match uuid {
                    Some(_) => StoredValue::IncDefUuid { index },
                    None => StoredValue::IncDefNoUuid { index },
                }
            }
            StaticValue::CharDecl {
                props,
                value_offset,
                uuid,
            } => {
                let bytes = encode_char_decl(*props, *value_offset, uuid);
                let index = self.add_static_entry(&bytes, rollback)?;
                match uuid {
                    GattUuid::Uuid16(_) => StoredValue::CharDeclUuid16 { index },
                    GattUuid::Uuid128(_) => StoredValue::CharDeclUuid128 { index },
                }
            }
            StaticValue::HandleArray(handles) => StoredValue::HandleArray {
                index: self.add_static_entry(&encode_handle_array(handles), rollback)?,
            },
        };

        Ok(Attribute::new(template.permissions, attr_type, value)
            .with_flags(template.flags())
            .with_key_size(template.encrypt_key_size))
    }

    fn materialize_dynamic(&mut self, template: &DynamicAttr, rollback: &mut Rollback) -> DbResult<Attribute> {
        let attr_type = self.type_code(&template.attr_type, rollback)?;
        let value = match &template.value {
            DynamicValue::V8(v) => StoredValue::V8(*v),
            DynamicValue::V16(v) => StoredValue::V16(*v),
            DynamicValue::V32(v) => StoredValue::V32(*v),
            DynamicValue::V48(v) => StoredValue::V48(*v & V48_MASK),
            DynamicValue::OctetSeq { data, max } => StoredValue::OctetSeq {
                len: data.len() as u16,
                max: *max,
                index: self.add_dynamic_entry(&padded(data, *max), rollback)?,
            },
            DynamicValue::OctetSeqFixed(data) => StoredValue::OctetSeqFixed {
                len: data.len() as u16,
                index: self.add_dynamic_entry(data, rollback)?,
            },
            DynamicValue::StoredServApp { len, max, fixed } => StoredValue::StoredServApp {
                len: *len,
                max: *max,
                fixed: *fixed,
            },
            DynamicValue::ClientOwnInst { default, max } => {
                StoredValue::ClientOwnInst(match default {
                    CoiValue::Ccc(ccc) => CoiDefault::Ccc(*ccc),
                    CoiValue::TwoU16 { start, end } => CoiDefault::TwoU16 {
                        start: *start,
                        end: *end,
                    },
                    CoiValue::Octets(data) => CoiDefault::Octets {
                        len: data.len() as u16,
                        max: *max,
                        index: self.add_dynamic_entry(&padded(data, *max), rollback)?,
                    },
                })
            }
            DynamicValue::Enum8 { value, min, max } => StoredValue::Enum8 {
                index: self.add_dynamic_entry(&[*value], rollback)?,
                min: *min,
                max: *max,
            },
            DynamicValue::Enum16 { value, min, max } => StoredValue::Enum16 {
                index: self.add_dynamic_entry(&value.to_le_bytes(), rollback)?,
                min: *min,
                max: *max,
            },
        };

        Ok(Attribute::new(template.permissions, attr_type, value)
            .with_flags(template.flags())
            .with_key_size(template.encrypt_key_size))
    }

    /// Make a service visible to peers and eligible for persistence.
    ///
    /// Returns the handle range so the caller can send a service changed
    /// indication to subscribed bonded peers.
    pub fn add_service(&mut self, id: ServiceId) -> DbResult<HandleRange> {
        let connected = !self.connections.is_empty();
        let service = self.services.get_mut(&id.0).ok_or(DbError::InvalidService)?;
        if connected || service.is_active() {
            return Err(DbError::Busy);
        }
        service.flags.insert(ServiceFlags::ACTIVE);
        let range = service.range();
        self.dirty = true;
        info!("Service {} active ({:#06x}..={:#06x})", id, range.start, range.end);
        Ok(range)
    }

    /// Hide a service from peers again
    pub fn inactivate_service(&mut self, id: ServiceId) -> DbResult<HandleRange> {
        let connected = !self.connections.is_empty();
        let service = self.services.get_mut(&id.0).ok_or(DbError::InvalidService)?;
        if !service.is_active() {
            return Err(DbError::NotActive);
        }
        if connected {
            return Err(DbError::Busy);
        }
        service.flags.remove(ServiceFlags::ACTIVE);
        let range = service.range();
        self.dirty = true;
        info!("Service {} inactive", id);
        Ok(range)
    }

    /// Free an inactive RAM service together with its table entries, the
    /// per-peer overrides of its attributes and any suspended requests.
    pub fn remove_service(&mut self, id: ServiceId) -> DbResult<()> {
        let service = self.services.get(&id.0).ok_or(DbError::InvalidService)?;
        if service.is_rom() {
            return Err(DbError::RomService);
        }
        if service.is_active() || !self.connections.is_empty() {
            return Err(DbError::Busy);
        }

        let service = self.services.remove(&id.0).ok_or(DbError::InvalidService)?;
        for (_, attr) in service.attributes.iter() {
            if let Some(index) = attr.type_index() {
                self.static_table.remove(index);
            }
            if let Some(index) = attr.value.table_index() {
                if attr.value.in_dynamic_table(attr.flags) {
                    self.dynamic_table.remove(index);
                } else {
                    self.static_table.remove(index);
                }
            }
        }
        self.remove_coi_for_service(id.0);
        let dropped = self
            .pending
            .drop_where(|r: &PendingRequest| r.start_handle == id.0);
        if dropped > 0 {
            debug!("Dropped {} pending requests of {}", dropped, id);
        }

        info!("Service {} removed", id);
        Ok(())
    }

    pub(crate) fn service(&self, id: ServiceId) -> DbResult<&Service> {
        self.services.get(&id.0).ok_or(DbError::InvalidService)
    }

    /// Registered attribute at `index` of service `id`
    pub(crate) fn attribute(&self, id: ServiceId, index: u16) -> DbResult<Attribute> {
        let service = self.service(id)?;
        if index >= service.num_attr() {
            return Err(DbError::AttributeNotFound(index));
        }
        service
            .attributes
            .get(index)
            .copied()
            .ok_or(DbError::InvalidAttribute(index))
    }

    fn service_info(&self, service: &Service) -> ServiceInfo {
        let decl = service.attributes.get(0);
        let primary = decl.map_or(true, |a| a.attr_type == PRIMARY_SERVICE_UUID);
        let uuid = match decl.map(|a| a.value) {
            Some(StoredValue::V16(uuid)) => GattUuid::Uuid16(uuid),
            Some(StoredValue::Uuid128 { index }) => self
                .static_table
                .get(index)
                .and_then(GattUuid::from_bytes)
                .unwrap_or(GattUuid::Uuid16(0)),
            _ => GattUuid::Uuid16(0),
        };
        ServiceInfo {
            id: ServiceId(service.start_handle),
            range: service.range(),
            uuid,
            primary,
            active: service.is_active(),
            rom: service.is_rom(),
            transport: service.transport,
        }
    }

    /// Service starting at `start_handle`
    pub fn get_service(&self, start_handle: u16) -> Option<ServiceInfo> {
        self.services
            .get(&start_handle)
            .map(|service| self.service_info(service))
    }

    /// All services with the given UUID, active or not, in handle order
    pub fn find_services(&self, uuid: &GattUuid) -> Vec<ServiceInfo> {
        self.services
            .values()
            .map(|service| self.service_info(service))
            .filter(|info| info.uuid == *uuid)
            .collect()
    }

    /// Next service after the cursor, in handle order
    pub fn enum_services(&self, ctx: &mut ServiceEnumContext) -> Option<ServiceInfo> {
        if ctx.next_handle > ATT_HANDLE_MAX as u32 {
            return None;
        }
        let (_, service) = self.services.range(ctx.next_handle as u16..).next()?;
        ctx.next_handle = service.end_handle() as u32 + 1;
        Some(self.service_info(service))
    }

    /// Service containing `handle`
    pub fn find_attribute(&self, handle: u16) -> Option<(ServiceId, u16)> {
        let (_, service) = self.services.range(..=handle).next_back()?;
        if service.range().contains(handle) {
            Some((ServiceId(service.start_handle), handle - service.start_handle))
        } else {
            None
        }
    }

    pub fn service_start_handle(&self, id: ServiceId) -> DbResult<u16> {
        Ok(self.service(id)?.start_handle)
    }

    pub fn service_last_attrib_index(&self, id: ServiceId) -> DbResult<u16> {
        Ok(self.service(id)?.num_attr() - 1)
    }

    /// Install or clear the handler of a service, returning the previous one
    pub fn set_service_handler(
        &mut self,
        id: ServiceId,
        handler: Option<ServiceHandler>,
    ) -> DbResult<Option<ServiceHandler>> {
        let service = self.services.get_mut(&id.0).ok_or(DbError::InvalidService)?;
        Ok(std::mem::replace(&mut service.handler, handler))
    }

    pub(crate) fn attr_type_uuid(&self, attr: &Attribute) -> GattUuid {
        match attr.type_index() {
            Some(index) => self
                .static_table
                .get(index)
                .and_then(GattUuid::from_bytes)
                .unwrap_or(GattUuid::Uuid16(0)),
            None => GattUuid::Uuid16(attr.attr_type),
        }
    }

    pub(crate) fn table_bytes(&self, attr: &Attribute, index: u16) -> DbResult<&[u8]> {
        let table = if attr.value.in_dynamic_table(attr.flags) {
            &self.dynamic_table
        } else {
            &self.static_table
        };
        table
            .get(index)
            .ok_or(DbError::CorruptRecord {
                id: 0,
                reason: format!("missing value table entry {}", index),
            })
    }

    /// First `len` bytes of the table entry `index` of `attr`
    pub(crate) fn table_prefix(&self, attr: &Attribute, index: u16, len: usize) -> DbResult<&[u8]> {
        self.table_bytes(attr, index)?
            .get(..len)
            .ok_or_else(|| DbError::CorruptRecord {
                id: 0,
                reason: format!("value table entry {} is shorter than {} bytes", index, len),
            })
    }

    /// Check that the table entries `attr` refers to exist and are large
    /// enough for the value it describes
    pub(crate) fn check_attribute(&self, attr: &Attribute) -> Result<(), String> {
        if let Some(index) = attr.type_index() {
            match self.static_table.get(index) {
                Some(bytes) if bytes.len() == 16 => {}
                _ => return Err(format!("type UUID entry {} is missing or malformed", index)),
            }
        }

        let index = match attr.value.table_index() {
            Some(index) => index,
            None => return Ok(()),
        };
        let table = if attr.value.in_dynamic_table(attr.flags) {
            &self.dynamic_table
        } else {
            &self.static_table
        };
        let bytes = table
            .get(index)
            .ok_or_else(|| format!("value table entry {} is missing", index))?;

        let fits = match attr.value {
            StoredValue::OctetSeq { len, max, .. }
            | StoredValue::ClientOwnInst(CoiDefault::Octets { len, max, .. }) => {
                len <= max && bytes.len() >= len as usize
            }
            StoredValue::OctetSeqFixed { len, .. } => bytes.len() >= len as usize,
            StoredValue::Enum8 { .. } => !bytes.is_empty(),
            StoredValue::Enum16 { .. } => bytes.len() >= 2,
            StoredValue::HandleArray { .. } => bytes.len() % 2 == 0,
            _ => decode_table_value(attr.value_type(), bytes).is_some(),
        };
        if !fits {
            return Err(format!(
                "value table entry {} does not hold a valid {:?} value",
                index,
                attr.value_type()
            ));
        }
        Ok(())
    }

    /// Caller facing value of `attr`. Client own instance attributes report
    /// their default.
    pub(crate) fn resolve_value(&self, attr: &Attribute) -> DbResult<AttValue> {
        Ok(match attr.value {
            StoredValue::V8(v) => AttValue::V8(v),
            StoredValue::V16(v) => AttValue::V16(v),
            StoredValue::V32(v) => AttValue::V32(v),
            StoredValue::V48(v) => AttValue::V48(v),
            StoredValue::Handle(h) => AttValue::Handle(h),
            StoredValue::OctetSeq { len, max, index } => AttValue::OctetSeq {
                data: self.table_prefix(attr, index, len as usize)?.to_vec(),
                max,
            },
            StoredValue::OctetSeqFixed { len, index } => {
                AttValue::OctetSeqFixed(self.table_prefix(attr, index, len as usize)?.to_vec())
            }
            StoredValue::StoredServApp { len, max, fixed } => {
                AttValue::StoredServApp { len, max, fixed }
            }
            StoredValue::ClientOwnInst(default) => {
                let (default, max) = match default {
                    CoiDefault::Ccc(ccc) => (CoiValue::Ccc(ccc), 0),
                    CoiDefault::TwoU16 { start, end } => (CoiValue::TwoU16 { start, end }, 0),
                    CoiDefault::Octets { len, max, index } => (
                        CoiValue::Octets(self.table_prefix(attr, index, len as usize)?.to_vec()),
                        max,
                    ),
                };
                AttValue::ClientOwnInst { default, max }
            }
            StoredValue::Enum8 { index, min, max } => AttValue::Enum8 {
                value: self.table_prefix(attr, index, 1)?[0],
                min,
                max,
            },
            StoredValue::Enum16 { index, min, max } => AttValue::Enum16 {
                value: LittleEndian::read_u16(self.table_prefix(attr, index, 2)?),
                min,
                max,
            },
            StoredValue::Uuid128 { index }
            | StoredValue::IncDefUuid { index }
            | StoredValue::IncDefNoUuid { index }
            | StoredValue::CharDeclUuid16 { index }
            | StoredValue::CharDeclUuid128 { index }
            | StoredValue::HandleArray { index } => {
                let bytes = self.table_bytes(attr, index)?;
                decode_table_value(attr.value_type(), bytes).ok_or(
                    DbError::CorruptRecord {
                        id: 0,
                        reason: format!("malformed value table entry {}", index),
                    },
                )?
            }
        })
    }

    /// Read an attribute as registered
    pub fn get_attrib_value(&self, id: ServiceId, index: u16) -> DbResult<AttValueDesc> {
        let attr = self.attribute(id, index)?;
        Ok(AttValueDesc {
            attr_type: self.attr_type_uuid(&attr),
            permissions: attr.permissions,
            encrypt_key_size: attr.encrypt_key_size,
            flags: attr.flags,
            value: self.resolve_value(&attr)?,
        })
    }

    /// Replace the value of a dynamic attribute locally.
    ///
    /// The value type must match the registered one. Maximum lengths and
    /// enum bounds are fixed at registration; those fields of `value` are
    /// ignored.
    pub fn set_attrib_value(&mut self, id: ServiceId, index: u16, value: &AttValue) -> DbResult<()> {
        let attr = self.attribute(id, index)?;
        if self.service(id)?.is_rom() || !attr.is_dynamic() {
            return Err(DbError::Immutable);
        }
        if attr.value_type() != value.value_type() {
            return Err(DbError::TypeMismatch);
        }

        let stored = match (attr.value, value) {
            (StoredValue::V8(_), AttValue::V8(v)) => StoredValue::V8(*v),
            (StoredValue::V16(_), AttValue::V16(v)) => StoredValue::V16(*v),
            (StoredValue::V32(_), AttValue::V32(v)) => StoredValue::V32(*v),
            (StoredValue::V48(_), AttValue::V48(v)) => {
                if *v > V48_MASK {
                    return Err(DbError::OutOfRange);
                }
                StoredValue::V48(*v)
            }
            (StoredValue::OctetSeq { max, index, .. }, AttValue::OctetSeq { data, .. }) => {
                self.write_dynamic(index, 0, data, max)?;
                StoredValue::OctetSeq {
                    len: data.len() as u16,
                    max,
                    index,
                }
            }
            (StoredValue::OctetSeqFixed { len, index }, AttValue::OctetSeqFixed(data)) => {
                if data.len() != len as usize {
                    return Err(DbError::InvalidLength {
                        len: data.len(),
                        max: len,
                    });
                }
                self.write_dynamic(index, 0, data, len)?;
                attr.value
            }
            (StoredValue::StoredServApp { len, max, fixed }, AttValue::StoredServApp { len: new_len, .. }) => {
                if *new_len > max || (fixed && *new_len != len) {
                    return Err(DbError::InvalidLength {
                        len: *new_len as usize,
                        max,
                    });
                }
                StoredValue::StoredServApp {
                    len: *new_len,
                    max,
                    fixed,
                }
            }
            (StoredValue::ClientOwnInst(default), AttValue::ClientOwnInst { default: new, .. }) => {
                StoredValue::ClientOwnInst(match (default, new) {
                    (CoiDefault::Ccc(_), CoiValue::Ccc(ccc)) => CoiDefault::Ccc(*ccc),
                    (CoiDefault::TwoU16 { .. }, CoiValue::TwoU16 { start, end }) => CoiDefault::TwoU16 {
                        start: *start,
                        end: *end,
                    },
                    (CoiDefault::Octets { max, index, .. }, CoiValue::Octets(data)) => {
                        self.write_dynamic(index, 0, data, max)?;
                        CoiDefault::Octets {
                            len: data.len() as u16,
                            max,
                            index,
                        }
                    }
                    _ => return Err(DbError::TypeMismatch),
                })
            }
            (StoredValue::Enum8 { index, min, max }, AttValue::Enum8 { value, .. }) => {
                if *value < min || *value > max {
                    return Err(DbError::OutOfRange);
                }
                self.write_dynamic(index, 0, &[*value], 1)?;
                attr.value
            }
            (StoredValue::Enum16 { index, min, max }, AttValue::Enum16 { value, .. }) => {
                if *value < min || *value > max {
                    return Err(DbError::OutOfRange);
                }
                self.write_dynamic(index, 0, &value.to_le_bytes(), 2)?;
                attr.value
            }
            _ => return Err(DbError::Immutable),
        };

        self.store_attribute(id, index, stored)?;
        self.dirty = true;
        Ok(())
    }

    /// Copy `data` into dynamic entry `index` at `offset`, never past `max`
    pub(crate) fn write_dynamic(&mut self, index: u16, offset: usize, data: &[u8], max: u16) -> DbResult<()> {
        let end = offset + data.len();
        if end > max as usize {
            return Err(DbError::InvalidLength { len: end, max });
        }
        let entry = self.dynamic_table.get_mut(index)?;
        if entry.len() < end {
            entry.resize(end, 0);
        }
        entry[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Replace the stored value of a registered RAM attribute
    pub(crate) fn store_attribute(&mut self, id: ServiceId, index: u16, value: StoredValue) -> DbResult<()> {
        let service = self.services.get_mut(&id.0).ok_or(DbError::InvalidService)?;
        match service.attributes.slot_mut(index)? {
            Some(attr) => {
                attr.value = value;
                Ok(())
            }
            None => Err(DbError::InvalidAttribute(index)),
        }
    }
}

pub(crate) const V48_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// `data` zero padded to `max` bytes
fn padded(data: &[u8], max: u16) -> Vec<u8> {
    let mut buf = data.to_vec();
    buf.resize((max as usize).max(data.len()), 0);
    buf
}
