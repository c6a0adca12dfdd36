//! Read-only database images
//!
//! A [`RomImage`] describes services fixed at build time. Its attribute
//! arrays and value bytes are borrowed for the life of the program; the
//! database never modifies, frees or persists them. Value table indices in a
//! ROM attribute refer to `values`, where entry `i` becomes static table
//! index `i + 1`.

use super::service::{AttributeArray, HandleRange, Service, ServiceTransport};
use super::value::{Attribute, StoredValue};
use super::GattDatabase;
use crate::att::{ATT_HANDLE_MAX, PRIMARY_SERVICE_UUID, SECONDARY_SERVICE_UUID};
use crate::error::{DbError, DbResult};
use crate::persist::PersistenceManager;
use log::{debug, warn};

/// One service of a ROM image
#[derive(Debug, Clone, Copy)]
pub struct RomService {
    pub start_handle: u16,
    pub transport: ServiceTransport,
    /// Index 0 must be the service declaration
    pub attributes: &'static [Attribute],
}

/// Services and static table content known at build time
#[derive(Debug, Clone, Copy)]
pub struct RomImage {
    pub values: &'static [&'static [u8]],
    pub services: &'static [RomService],
}

impl<P: PersistenceManager> GattDatabase<P> {
    /// Install a ROM image into an empty database
    pub(crate) fn load_rom(&mut self, image: &'static RomImage) -> DbResult<()> {
        for (i, bytes) in image.values.iter().enumerate() {
            let index = self.static_table.add_rom(bytes)?;
            if index as usize != i + 1 {
                return Err(DbError::InvalidParameter("ROM value table must load first"));
            }
        }

        for rom in image.services {
            if rom.start_handle == 0 || rom.attributes.is_empty() {
                return Err(DbError::InvalidParameter("ROM service"));
            }
            let end = rom.start_handle as u32 + rom.attributes.len() as u32 - 1;
            if end > ATT_HANDLE_MAX as u32 {
                return Err(DbError::HandleRangeUnavailable);
            }
            let range = HandleRange {
                start: rom.start_handle,
                end: end as u16,
            };
            if self.services.values().any(|s| s.range().overlaps(&range)) {
                return Err(DbError::HandleRangeUnavailable);
            }
            if !is_service_declaration(&rom.attributes[0]) {
                warn!("ROM service at {:#06x} has no service declaration", range.start);
                return Err(DbError::InvalidParameter("ROM service declaration"));
            }
            for (i, attr) in rom.attributes.iter().enumerate() {
                if let Err(e) = self.check_attribute(attr) {
                    warn!("ROM attribute {:#06x}: {}", range.start as usize + i, e);
                    return Err(DbError::InvalidParameter("ROM attribute"));
                }
            }
            self.services.insert(
                rom.start_handle,
                Service::new(rom.start_handle, rom.transport, AttributeArray::Rom(rom.attributes)),
            );
            debug!(
                "Loaded ROM service at {:#06x}..={:#06x}",
                range.start, range.end
            );
        }
        Ok(())
    }
}

fn is_service_declaration(attr: &Attribute) -> bool {
    attr.type_index().is_none()
        && matches!(attr.attr_type, PRIMARY_SERVICE_UUID | SECONDARY_SERVICE_UUID)
        && matches!(attr.value, StoredValue::V16(_) | StoredValue::Uuid128 { .. })
}
