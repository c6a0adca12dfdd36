//! Remote attribute access
//!
//! Entry points for the ATT server: every read and write from a peer passes
//! visibility, transport and permission checks before the value is encoded
//! or the write committed.

use super::pending::{PendingKind, PendingRequest, RequestToken, ServerEvent};
use super::service::{ServiceId, V48_MASK};
use super::value::{AttValue, Attribute, CoiDefault, CoiValue, StoredValue};
use super::GattDatabase;
use crate::att::{
    evaluate, AccessOp, AttErrorCode, AttFlags, LinkSecurity, ATT_ERROR_ENUM_OUT_OF_RANGE,
    ATT_ERROR_TRANSPORT_RESTRICTED,
};
use crate::error::DbError;
use crate::gap::{DevAddr, Transport};
use crate::gatt::ClientCharConfig;
use crate::persist::PersistenceManager;
use byteorder::{ByteOrder, LittleEndian};
use log::{trace, warn};

/// The connection a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub peer: DevAddr,
    pub transport: Transport,
    pub security: LinkSecurity,
}

impl Link {
    pub fn le(peer: DevAddr, security: LinkSecurity) -> Self {
        Self {
            peer,
            transport: Transport::Le,
            security,
        }
    }

    pub fn br_edr(peer: DevAddr, security: LinkSecurity) -> Self {
        Self {
            peer,
            transport: Transport::BrEdr,
            security,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Value from the requested offset on
    Complete(Vec<u8>),
    /// The service handler supplies the value later
    Pending(RequestToken),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Complete,
    /// The service handler decides later
    Pending(RequestToken),
}

/// A validated write, ready to be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WritePlan {
    /// New inline value
    Inline(StoredValue),
    /// Copy `data` into dynamic entry `index` at `offset`, then store `value`
    Table {
        index: u16,
        offset: usize,
        data: Vec<u8>,
        value: StoredValue,
    },
    /// New value for the writing peer
    Coi(CoiValue),
    /// New length of a handler owned value
    ServApp(StoredValue),
}

fn encode_scalar(value: u64, width: usize) -> Vec<u8> {
    let mut buf = vec![0u8; width];
    LittleEndian::write_uint(&mut buf, value, width);
    buf
}

/// On-air encoding of `value` for a service starting at `start_handle`.
/// Handle offsets become absolute handles.
fn encode_wire(value: &AttValue, start_handle: u16) -> Vec<u8> {
    let absolute = |offset: u16| start_handle.wrapping_add(offset);
    match value {
        AttValue::V8(v) => vec![*v],
        AttValue::V16(v) => v.to_le_bytes().to_vec(),
        AttValue::V32(v) => v.to_le_bytes().to_vec(),
        AttValue::V48(v) => encode_scalar(*v & V48_MASK, 6),
        AttValue::Handle(h) => absolute(*h).to_le_bytes().to_vec(),
        AttValue::Uuid128(uuid) => uuid.to_vec(),
        AttValue::OctetSeq { data, .. } | AttValue::OctetSeqFixed(data) => data.clone(),
        AttValue::StoredServApp { .. } => Vec::new(),
        AttValue::ClientOwnInst { default, .. } => default.to_wire(),
        AttValue::IncludeDef {
            service_handle,
            end_group_handle,
            uuid,
        } => {
            let mut buf = Vec::with_capacity(6);
            buf.extend_from_slice(&service_handle.to_le_bytes());
            buf.extend_from_slice(&end_group_handle.to_le_bytes());
            if let Some(uuid) = uuid {
                buf.extend_from_slice(&uuid.to_le_bytes());
            }
            buf
        }
        AttValue::CharDecl {
            props,
            value_offset,
            uuid,
        } => {
            let mut buf = vec![props.bits()];
            buf.extend_from_slice(&absolute(*value_offset).to_le_bytes());
            buf.extend_from_slice(&uuid.as_bytes());
            buf
        }
        AttValue::HandleArray(offsets) => offsets
            .iter()
            .flat_map(|h| absolute(*h).to_le_bytes())
            .collect(),
        AttValue::Enum8 { value, .. } => vec![*value],
        AttValue::Enum16 { value, .. } => value.to_le_bytes().to_vec(),
    }
}

/// Octet sequence write rules shared by table and per-peer values: the
/// write may start anywhere up to the current end and the result is
/// truncated to `offset + data.len()`.
fn check_octet_write(offset: usize, data_len: usize, len: u16, max: u16) -> Result<u16, AttErrorCode> {
    if offset > len as usize {
        return Err(AttErrorCode::InvalidOffset);
    }
    let end = offset + data_len;
    if end > max as usize {
        return Err(AttErrorCode::InvalidAttributeValueLength);
    }
    Ok(end as u16)
}

fn exact_width(offset: u16, data: &[u8], width: usize) -> Result<(), AttErrorCode> {
    if offset != 0 {
        return Err(AttErrorCode::AttributeNotLong);
    }
    if data.len() != width {
        return Err(AttErrorCode::InvalidAttributeValueLength);
    }
    Ok(())
}

fn resource_error(e: DbError) -> AttErrorCode {
    match e {
        DbError::NoResources => AttErrorCode::InsufficientResources,
        DbError::InvalidLength { .. } => AttErrorCode::InvalidAttributeValueLength,
        _ => AttErrorCode::Unlikely,
    }
}

impl<P: PersistenceManager> GattDatabase<P> {
    /// Resolve `handle` for `link`: the owning service must be active and
    /// reachable over the link's transport.
    fn locate(&self, link: &Link, handle: u16) -> Result<(ServiceId, u16, Attribute), AttErrorCode> {
        let (id, index) = self.find_attribute(handle).ok_or(AttErrorCode::InvalidHandle)?;
        let service = self.service(id).map_err(|_| AttErrorCode::InvalidHandle)?;
        if !service.is_active() {
            return Err(AttErrorCode::InvalidHandle);
        }
        let attr = *service
            .attributes
            .get(index)
            .ok_or(AttErrorCode::InvalidHandle)?;
        if !service.transport().allows(link.transport) {
            return Err(AttErrorCode::ApplicationError(ATT_ERROR_TRANSPORT_RESTRICTED));
        }
        Ok((id, index, attr))
    }

    /// Value of `attr` as seen by `peer`
    fn value_for_peer(&self, id: ServiceId, index: u16, attr: &Attribute, peer: &DevAddr) -> Result<AttValue, DbError> {
        match attr.value {
            StoredValue::ClientOwnInst(CoiDefault::Octets { max, .. }) => Ok(AttValue::ClientOwnInst {
                default: self.get_client_own_inst_value(id, index, peer)?,
                max,
            }),
            StoredValue::ClientOwnInst(_) => Ok(AttValue::ClientOwnInst {
                default: self.get_client_own_inst_value(id, index, peer)?,
                max: 0,
            }),
            _ => self.resolve_value(attr),
        }
    }

    /// Read the attribute at `handle` for a remote peer
    pub fn read_attribute(&mut self, link: &Link, handle: u16, offset: u16) -> Result<ReadOutcome, AttErrorCode> {
        let (id, index, attr) = self.locate(link, handle)?;
        evaluate(attr.permissions, attr.encrypt_key_size, AccessOp::Read, &link.security)?;

        if let StoredValue::StoredServApp { .. } = attr.value {
            let token = self.pending.insert(PendingRequest {
                peer: link.peer,
                start_handle: id.0,
                index,
                kind: PendingKind::Read { offset },
            });
            let event = ServerEvent::ReadValueRequest {
                token,
                peer: link.peer,
                service: id,
                index,
                handle,
                offset,
            };
            if !self.notify_handler(id, &event) {
                self.pending.remove(token);
                warn!("No handler for application owned value at {:#06x}", handle);
                return Err(AttErrorCode::Unlikely);
            }
            return Ok(ReadOutcome::Pending(token));
        }

        let value = self.value_for_peer(id, index, &attr, &link.peer).map_err(|e| {
            warn!("Read of {:#06x} failed: {}", handle, e);
            AttErrorCode::Unlikely
        })?;
        let bytes = encode_wire(&value, id.0);
        if offset as usize > bytes.len() {
            return Err(AttErrorCode::InvalidOffset);
        }
        trace!("Read {:#06x} by {}: {}", handle, link.peer, hex::encode(&bytes));

        if attr.flags.contains(AttFlags::ALERT_ON_READ) {
            self.notify_handler(
                id,
                &ServerEvent::ReadAlert {
                    peer: link.peer,
                    service: id,
                    index,
                    handle,
                },
            );
        }

        Ok(ReadOutcome::Complete(bytes[offset as usize..].to_vec()))
    }

    /// Write the attribute at `handle` on behalf of a remote peer
    pub fn write_attribute(
        &mut self,
        link: &Link,
        handle: u16,
        offset: u16,
        data: &[u8],
    ) -> Result<WriteOutcome, AttErrorCode> {
        let (id, index, attr) = self.locate(link, handle)?;
        evaluate(attr.permissions, attr.encrypt_key_size, AccessOp::Write, &link.security)?;
        trace!(
            "Write {:#06x}+{} by {}: {}",
            handle,
            offset,
            link.peer,
            hex::encode(data)
        );

        let plan = self.plan_write(id.0, index, &attr, link.peer, offset, data)?;
        let owned_by_handler = matches!(plan, WritePlan::ServApp(_));

        if owned_by_handler || attr.flags.contains(AttFlags::CHECK_WRITE) {
            let token = self.pending.insert(PendingRequest {
                peer: link.peer,
                start_handle: id.0,
                index,
                kind: PendingKind::Write {
                    offset,
                    data: data.to_vec(),
                },
            });
            let event = ServerEvent::CheckWriteRequest {
                token,
                peer: link.peer,
                service: id,
                index,
                handle,
                offset,
                data: data.to_vec(),
            };
            if self.notify_handler(id, &event) {
                return Ok(WriteOutcome::Pending(token));
            }
            self.pending.remove(token);
            if owned_by_handler {
                warn!("No handler for application owned value at {:#06x}", handle);
                return Err(AttErrorCode::Unlikely);
            }
        }

        self.apply_write(link.peer, id.0, index, plan)?;

        if attr.flags.contains(AttFlags::ALERT_ON_WRITE) {
            self.notify_handler(
                id,
                &ServerEvent::WriteAlert {
                    peer: link.peer,
                    service: id,
                    index,
                    handle,
                    offset,
                    data: data.to_vec(),
                },
            );
        }
        Ok(WriteOutcome::Complete)
    }

    /// Validate a write of `data` at `offset` against the current value
    pub(crate) fn plan_write(
        &self,
        start_handle: u16,
        index: u16,
        attr: &Attribute,
        peer: DevAddr,
        offset: u16,
        data: &[u8],
    ) -> Result<WritePlan, AttErrorCode> {
        let id = ServiceId(start_handle);
        let rom = self
            .service(id)
            .map_err(|_| AttErrorCode::InvalidHandle)?
            .is_rom();
        let off = offset as usize;

        if let StoredValue::ClientOwnInst(default) = attr.value {
            return Ok(WritePlan::Coi(match default {
                CoiDefault::Ccc(_) => {
                    exact_width(offset, data, 2)?;
                    CoiValue::Ccc(ClientCharConfig::from_bits_retain(
                        LittleEndian::read_u16(data),
                    ))
                }
                CoiDefault::TwoU16 { .. } => {
                    exact_width(offset, data, 4)?;
                    CoiValue::TwoU16 {
                        start: LittleEndian::read_u16(&data[0..2]),
                        end: LittleEndian::read_u16(&data[2..4]),
                    }
                }
                CoiDefault::Octets { max, .. } => {
                    let current = match self.get_client_own_inst_value(id, index, &peer) {
                        Ok(CoiValue::Octets(current)) => current,
                        _ => return Err(AttErrorCode::Unlikely),
                    };
                    check_octet_write(off, data.len(), current.len() as u16, max)?;
                    let mut next = current;
                    next.truncate(off);
                    next.extend_from_slice(data);
                    CoiValue::Octets(next)
                }
            }));
        }

        if rom || !attr.is_dynamic() {
            return Err(AttErrorCode::WriteNotPermitted);
        }

        Ok(match attr.value {
            StoredValue::V8(_) => {
                exact_width(offset, data, 1)?;
                WritePlan::Inline(StoredValue::V8(data[0]))
            }
            StoredValue::V16(_) => {
                exact_width(offset, data, 2)?;
                WritePlan::Inline(StoredValue::V16(LittleEndian::read_u16(data)))
            }
            StoredValue::V32(_) => {
                exact_width(offset, data, 4)?;
                WritePlan::Inline(StoredValue::V32(LittleEndian::read_u32(data)))
            }
            StoredValue::V48(_) => {
                exact_width(offset, data, 6)?;
                WritePlan::Inline(StoredValue::V48(LittleEndian::read_uint(data, 6)))
            }
            StoredValue::OctetSeq { len, max, index } => {
                let end = check_octet_write(off, data.len(), len, max)?;
                WritePlan::Table {
                    index,
                    offset: off,
                    data: data.to_vec(),
                    value: StoredValue::OctetSeq { len: end, max, index },
                }
            }
            StoredValue::OctetSeqFixed { len, index } => {
                if off > len as usize {
                    return Err(AttErrorCode::InvalidOffset);
                }
                if off + data.len() > len as usize {
                    return Err(AttErrorCode::InvalidAttributeValueLength);
                }
                WritePlan::Table {
                    index,
                    offset: off,
                    data: data.to_vec(),
                    value: attr.value,
                }
            }
            StoredValue::StoredServApp { len, max, fixed } => {
                if fixed {
                    if off > len as usize {
                        return Err(AttErrorCode::InvalidOffset);
                    }
                    if off + data.len() > len as usize {
                        return Err(AttErrorCode::InvalidAttributeValueLength);
                    }
                    WritePlan::ServApp(attr.value)
                } else {
                    let end = check_octet_write(off, data.len(), len, max)?;
                    WritePlan::ServApp(StoredValue::StoredServApp { len: end, max, fixed })
                }
            }
            StoredValue::Enum8 { index, min, max } => {
                exact_width(offset, data, 1)?;
                if data[0] < min || data[0] > max {
                    return Err(AttErrorCode::ApplicationError(ATT_ERROR_ENUM_OUT_OF_RANGE));
                }
                WritePlan::Table {
                    index,
                    offset: 0,
                    data: data.to_vec(),
                    value: attr.value,
                }
            }
            StoredValue::Enum16 { index, min, max } => {
                exact_width(offset, data, 2)?;
                let value = LittleEndian::read_u16(data);
                if value < min || value > max {
                    return Err(AttErrorCode::ApplicationError(ATT_ERROR_ENUM_OUT_OF_RANGE));
                }
                WritePlan::Table {
                    index,
                    offset: 0,
                    data: data.to_vec(),
                    value: attr.value,
                }
            }
            _ => return Err(AttErrorCode::WriteNotPermitted),
        })
    }

    /// Commit a planned write
    pub(crate) fn apply_write(
        &mut self,
        peer: DevAddr,
        start_handle: u16,
        index: u16,
        plan: WritePlan,
    ) -> Result<(), AttErrorCode> {
        let id = ServiceId(start_handle);
        match plan {
            WritePlan::Inline(value) | WritePlan::ServApp(value) => {
                self.store_attribute(id, index, value).map_err(resource_error)?;
            }
            WritePlan::Table {
                index: entry,
                offset,
                data,
                value,
            } => {
                let max = match value {
                    StoredValue::OctetSeq { max, .. } => max,
                    _ => (offset + data.len()) as u16,
                };
                self.write_dynamic(entry, offset, &data, max)
                    .map_err(resource_error)?;
                self.store_attribute(id, index, value).map_err(resource_error)?;
            }
            WritePlan::Coi(value) => {
                self.set_client_own_inst_value(id, index, &peer, &value)
                    .map_err(resource_error)?;
                return Ok(());
            }
        }
        self.dirty = true;
        Ok(())
    }
}
