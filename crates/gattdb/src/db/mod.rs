//! The attribute database
//!
//! A [`GattDatabase`] holds the services of the local GATT server: their
//! attribute arrays, the value tables their variable length values live in,
//! per-peer values of client own instance attributes and the identity
//! material of the radio. It is built at runtime with
//! [`GattDatabase::allocate_service`], `add_static`/`add_dynamic` and
//! [`GattDatabase::add_service`], optionally on top of a [`RomImage`], and is
//! persisted through a [`PersistenceManager`] on [`GattDatabase::flush`].
//!
//! Remote peers reach attributes by handle with
//! [`GattDatabase::read_attribute`] and [`GattDatabase::write_attribute`];
//! the local application works with service ids and attribute indices.
//!
//! The database itself is not synchronized. Wrap it in a
//! [`SharedGattDatabase`] to use it from several threads.

mod coi;
mod identity;
mod pending;
mod remote;
mod rom;
mod service;
mod shared;
mod table;
mod value;

#[cfg(test)]
mod tests;

pub use self::coi::{CoiRecord, FoundRecords};
pub use self::identity::Identity;
pub use self::pending::{Completion, RequestToken, Response, ServerEvent, ServiceHandler};
pub use self::remote::{Link, ReadOutcome, WriteOutcome};
pub use self::rom::{RomImage, RomService};
pub use self::service::{
    AttributeArray, HandleRange, ServiceEnumContext, ServiceId, ServiceInfo, ServiceParms,
    ServiceTransport,
};
pub use self::shared::SharedGattDatabase;
pub use self::table::{ValueEntry, ValueTable, INVALID_INDEX};
pub use self::value::{
    AttValue, AttValueDesc, AttValueType, Attribute, CoiDefault, CoiValue, DynamicAttr,
    DynamicValue, StaticAttr, StaticValue, StoredValue,
};

use self::coi::CoiGroup;
use self::pending::PendingRequests;
use self::service::{Service, ServiceFlags};
use crate::att::{ATT_HANDLE_MAX, ATT_SERV_MAX_ATTRIB_VALUE_SIZE};
use crate::error::{DbError, DbResult};
use crate::gap::{BdAddr, DevAddr};
use crate::persist::codec::{self, RootImage, ServiceImage};
use crate::persist::{
    is_fixed_record, read_record, write_record, PersistenceManager, RecordId,
    FIRST_FIXED_RECORD_ID,
};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Fixed record holding the root of the persisted database
    pub root_record: RecordId,
    /// Spare handles left after the highest service when allocating
    /// automatically, so that a service can grow without moving
    pub handle_end_spacing: u16,
    /// Largest attribute value accepted
    pub max_attrib_value_size: u16,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            root_record: FIRST_FIXED_RECORD_ID,
            handle_end_spacing: 10,
            max_attrib_value_size: ATT_SERV_MAX_ATTRIB_VALUE_SIZE,
        }
    }
}

/// Failure to open a database. The store is handed back so that the
/// caller can repair or wipe it and try again.
pub struct OpenError<P> {
    pub error: DbError,
    pub store: P,
}

impl<P> OpenError<P> {
    fn new(error: DbError, store: P) -> Self {
        Self { error, store }
    }
}

impl<P> fmt::Debug for OpenError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenError").field("error", &self.error).finish()
    }
}

impl<P> fmt::Display for OpenError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<P> std::error::Error for OpenError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<P> From<OpenError<P>> for DbError {
    fn from(e: OpenError<P>) -> Self {
        e.error
    }
}

/// Attribute database of the local GATT server
pub struct GattDatabase<P: PersistenceManager> {
    store: P,
    config: DatabaseConfig,
    identity: Identity,
    /// Services keyed by start handle
    services: BTreeMap<u16, Service>,
    static_table: ValueTable,
    dynamic_table: ValueTable,
    /// Client own instance values per peer
    coi: BTreeMap<DevAddr, CoiGroup>,
    /// Connected peers and whether they are bonded
    connections: BTreeMap<DevAddr, bool>,
    pending: PendingRequests,
    dirty: bool,
}

impl<P: PersistenceManager> GattDatabase<P> {
    /// Open the database of the radio `local_addr` with default settings
    pub fn open(
        store: P,
        local_addr: BdAddr,
        rom: Option<&'static RomImage>,
    ) -> Result<Self, OpenError<P>> {
        Self::open_with_config(store, local_addr, rom, DatabaseConfig::default())
    }

    /// Open the database of the radio `local_addr`.
    ///
    /// The ROM image, if any, is installed first. Then the persisted root
    /// record is loaded. A root written for another radio is discarded along
    /// with its group records and the database starts empty.
    pub fn open_with_config(
        store: P,
        local_addr: BdAddr,
        rom: Option<&'static RomImage>,
        config: DatabaseConfig,
    ) -> Result<Self, OpenError<P>> {
        if !is_fixed_record(config.root_record) {
            return Err(OpenError::new(
                DbError::InvalidParameter("root record must be a fixed record"),
                store,
            ));
        }
        if config.max_attrib_value_size == 0
            || config.max_attrib_value_size > ATT_SERV_MAX_ATTRIB_VALUE_SIZE
        {
            return Err(OpenError::new(
                DbError::InvalidParameter("max attribute value size"),
                store,
            ));
        }

        let mut db = Self {
            store,
            config,
            identity: Identity::generate(local_addr),
            services: BTreeMap::new(),
            static_table: ValueTable::new("static"),
            dynamic_table: ValueTable::new("dynamic"),
            coi: BTreeMap::new(),
            connections: BTreeMap::new(),
            pending: PendingRequests::default(),
            dirty: true,
        };

        if let Err(error) = db.load(local_addr, rom) {
            warn!("Failed to open attribute database for {}: {}", local_addr, error);
            return Err(OpenError::new(error, db.store));
        }

        info!(
            "Opened attribute database for {} with {} services",
            local_addr,
            db.services.len()
        );
        Ok(db)
    }

    fn load(&mut self, local_addr: BdAddr, rom: Option<&'static RomImage>) -> DbResult<()> {
        if let Some(image) = rom {
            self.load_rom(image)?;
        }

        let root_record = self.config.root_record;
        match read_record(&mut self.store, root_record) {
            None => info!("No persisted database for {}, starting empty", local_addr),
            Some(bytes) => {
                let root = codec::decode_root(root_record, &bytes)?;
                if root.identity.local_addr != local_addr {
                    warn!(
                        "Persisted database belongs to {}, not {}; discarding it",
                        root.identity.local_addr, local_addr
                    );
                    for record in root.groups {
                        self.store.remove(record);
                    }
                } else {
                    self.restore(root_record, root)?;
                    self.dirty = false;
                }
            }
        }
        Ok(())
    }

    fn restore(&mut self, record: RecordId, root: RootImage) -> DbResult<()> {
        let corrupt = |reason: String| DbError::CorruptRecord { id: record, reason };

        self.identity = root.identity;
        for (index, bytes) in root.static_entries {
            self.static_table
                .insert_at(index, bytes)
                .map_err(|e| corrupt(format!("static entry {}: {}", index, e)))?;
        }
        for (index, bytes) in root.dynamic_entries {
            self.dynamic_table
                .insert_at(index, bytes)
                .map_err(|e| corrupt(format!("dynamic entry {}: {}", index, e)))?;
        }

        for image in root.services {
            let service = self.restore_service(image).map_err(corrupt)?;
            self.services.insert(service.start_handle, service);
        }

        for group in root.groups {
            self.restore_group(group);
        }

        debug!(
            "Restored {} services, {} peers",
            self.services.len(),
            self.coi.len()
        );
        Ok(())
    }

    fn restore_service(&self, image: ServiceImage) -> Result<Service, String> {
        if image.start_handle == 0 || image.attributes.is_empty() {
            return Err(format!("empty service at {:#06x}", image.start_handle));
        }
        let end = image.start_handle as u32 + image.attributes.len() as u32 - 1;
        if end > ATT_HANDLE_MAX as u32 {
            return Err(format!("service at {:#06x} too long", image.start_handle));
        }
        let range = HandleRange {
            start: image.start_handle,
            end: end as u16,
        };
        if self.services.values().any(|s| s.range().overlaps(&range)) {
            return Err(format!(
                "service at {:#06x} overlaps an existing service",
                image.start_handle
            ));
        }

        for attr in image.attributes.iter().flatten() {
            self.check_attribute(attr)
                .map_err(|e| format!("service at {:#06x}: {}", image.start_handle, e))?;
        }

        let mut service = Service::new(
            image.start_handle,
            image.transport,
            AttributeArray::Ram(image.attributes),
        );
        service.flags.insert(ServiceFlags::ACTIVE);
        Ok(service)
    }

    fn root_image(&self, groups: Vec<RecordId>) -> RootImage {
        let mut statics = BTreeSet::new();
        let mut dynamics = BTreeSet::new();
        let mut services = Vec::new();

        for service in self.services.values() {
            let attributes = match &service.attributes {
                AttributeArray::Ram(attributes) if service.is_active() => attributes,
                _ => continue,
            };
            for attr in attributes.iter().flatten() {
                if let Some(index) = attr.type_index() {
                    statics.insert(index);
                }
                if let Some(index) = attr.value.table_index() {
                    if attr.value.in_dynamic_table(attr.flags) {
                        dynamics.insert(index);
                    } else {
                        statics.insert(index);
                    }
                }
            }
            services.push(ServiceImage {
                start_handle: service.start_handle,
                transport: service.transport,
                attributes: attributes.clone(),
            });
        }

        let entries = |table: &ValueTable, indices: BTreeSet<u16>| {
            indices
                .into_iter()
                .filter_map(|i| table.entry(i).map(|e| (i, e)))
                .filter(|(_, e)| !e.is_rom())
                .map(|(i, e)| (i, e.bytes().to_vec()))
                .collect::<Vec<_>>()
        };

        RootImage {
            identity: self.identity.clone(),
            static_entries: entries(&self.static_table, statics),
            dynamic_entries: entries(&self.dynamic_table, dynamics),
            services,
            groups,
        }
    }

    /// Write the database to the persistent store.
    ///
    /// Active RAM services, the identity and the values of bonded peers are
    /// written. ROM services and inactive services are not persisted. The
    /// root record is written last so that it never names a group record
    /// that does not exist yet.
    pub fn flush(&mut self) -> DbResult<()> {
        let mut created = Vec::new();
        let result = self.write_all(&mut created);
        if result.is_err() {
            // Records created by a failed flush are not named by any root
            for (peer, record) in created {
                self.store.remove(record);
                if let Some(group) = self.coi.get_mut(&peer) {
                    group.record = None;
                }
            }
        }
        result
    }

    fn write_all(&mut self, created: &mut Vec<(DevAddr, RecordId)>) -> DbResult<()> {
        let mut groups = Vec::new();
        let peers: Vec<DevAddr> = self.coi.keys().copied().collect();

        for peer in peers {
            let (bonded, empty, record) = match self.coi.get(&peer) {
                Some(group) => (group.bonded, group.items.is_empty(), group.record),
                None => continue,
            };
            if !bonded {
                continue;
            }

            if empty {
                if let Some(record) = record {
                    if !self.store.remove(record) {
                        return Err(DbError::Persistence(format!(
                            "failed to remove record {}",
                            record
                        )));
                    }
                    if let Some(group) = self.coi.get_mut(&peer) {
                        group.record = None;
                    }
                }
                continue;
            }

            let image = match self.group_image(&peer)? {
                Some(image) => image,
                None => continue,
            };
            let bytes = codec::encode_group(&image)?;
            let record = match record {
                Some(record) => record,
                None => {
                    let record = self
                        .store
                        .create()
                        .ok_or_else(|| DbError::Persistence("no free record".to_string()))?;
                    created.push((peer, record));
                    record
                }
            };
            if let Some(group) = self.coi.get_mut(&peer) {
                group.record = Some(record);
            }
            if !write_record(&mut self.store, record, &bytes) {
                return Err(DbError::Persistence(format!(
                    "failed to write record {}",
                    record
                )));
            }
            groups.push(record);
        }

        let root = self.root_image(groups);
        let bytes = codec::encode_root(&root)?;
        if !write_record(&mut self.store, self.config.root_record, &bytes) {
            return Err(DbError::Persistence(format!(
                "failed to write root record {}",
                self.config.root_record
            )));
        }

        self.dirty = false;
        info!(
            "Flushed {} services and {} peer records ({} bytes root)",
            root.services.len(),
            root.groups.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Close the database and hand back the store. Unflushed changes are
    /// lost.
    pub fn close(self) -> P {
        if self.dirty {
            warn!("Closing attribute database with unflushed changes");
        }
        self.store
    }

    /// Whether there are changes not yet flushed
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}
