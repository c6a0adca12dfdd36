//! Client own instance values
//!
//! Some attributes, most notably Client Characteristic Configuration
//! descriptors, hold a separate value for every remote device. The attribute
//! itself only carries the default. A peer's own value is created the first
//! time it differs from that default and lives in a per-peer group, so that
//! everything belonging to one peer can be persisted or erased as a unit.
//!
//! Groups of bonded peers are written to the persistent store on flush.
//! Groups of peers without a bond never are, and disappear on disconnect.

use super::pending::PendingRequest;
use super::service::ServiceId;
use super::value::{CoiDefault, CoiValue, StoredValue};
use super::GattDatabase;
use crate::error::{DbError, DbResult};
use crate::gap::DevAddr;
use crate::gatt::ClientCharConfig;
use crate::persist::codec::{self, GroupImage, GroupItem};
use crate::persist::{read_record, PersistenceManager, RecordId};
use log::{debug, warn};

/// Stored form of one peer's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoiStored {
    Ccc(ClientCharConfig),
    /// Dynamic table entry allocated at the attribute's max length
    Octets { index: u16, len: u16 },
    TwoU16 { start: u16, end: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CoiItem {
    pub start_handle: u16,
    pub attr_index: u16,
    pub value: CoiStored,
}

/// All values of one peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CoiGroup {
    pub bonded: bool,
    pub items: Vec<CoiItem>,
    /// Persistent record holding this group, once written
    pub record: Option<RecordId>,
}

impl CoiGroup {
    fn find(&self, start_handle: u16, attr_index: u16) -> Option<&CoiItem> {
        self.items
            .iter()
            .find(|i| i.start_handle == start_handle && i.attr_index == attr_index)
    }
}

/// One peer's value returned by
/// [`GattDatabase::find_client_own_inst_records`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoiRecord {
    pub peer: DevAddr,
    pub value: CoiValue,
}

/// Outcome of a record search. `total` counts every match even when the
/// output buffer was too small to hold them all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoundRecords {
    pub returned: usize,
    pub total: usize,
}

impl<P: PersistenceManager> GattDatabase<P> {
    fn coi_default(&self, id: ServiceId, index: u16) -> DbResult<CoiDefault> {
        match self.attribute(id, index)?.value {
            StoredValue::ClientOwnInst(default) => Ok(default),
            _ => Err(DbError::NotClientOwnInstance),
        }
    }

    fn coi_default_value(&self, id: ServiceId, index: u16) -> DbResult<CoiValue> {
        let attr = self.attribute(id, index)?;
        Ok(match attr.value {
            StoredValue::ClientOwnInst(CoiDefault::Ccc(ccc)) => CoiValue::Ccc(ccc),
            StoredValue::ClientOwnInst(CoiDefault::TwoU16 { start, end }) => {
                CoiValue::TwoU16 { start, end }
            }
            StoredValue::ClientOwnInst(CoiDefault::Octets { len, index, .. }) => {
                CoiValue::Octets(self.table_prefix(&attr, index, len as usize)?.to_vec())
            }
            _ => return Err(DbError::NotClientOwnInstance),
        })
    }

    fn coi_item_value(&self, item: &CoiItem) -> DbResult<CoiValue> {
        Ok(match item.value {
            CoiStored::Ccc(ccc) => CoiValue::Ccc(ccc),
            CoiStored::TwoU16 { start, end } => CoiValue::TwoU16 { start, end },
            CoiStored::Octets { index, len } => {
                let bytes = self
                    .dynamic_table
                    .get(index)
                    .and_then(|bytes| bytes.get(..len as usize))
                    .ok_or(DbError::InvalidParameter("client own instance entry"))?;
                CoiValue::Octets(bytes.to_vec())
            }
        })
    }

    /// Value of attribute `index` of service `id` as seen by `peer`, the
    /// default if the peer never wrote its own
    pub fn get_client_own_inst_value(&self, id: ServiceId, index: u16, peer: &DevAddr) -> DbResult<CoiValue> {
        self.coi_default(id, index)?;
        match self.coi.get(peer).and_then(|g| g.find(id.0, index)) {
            Some(item) => self.coi_item_value(item),
            None => self.coi_default_value(id, index),
        }
    }

    /// Set the value `peer` sees for attribute `index` of service `id`.
    ///
    /// Nothing is stored while the value equals the default and the peer has
    /// no own value yet.
    pub fn set_client_own_inst_value(
        &mut self,
        id: ServiceId,
        index: u16,
        peer: &DevAddr,
        value: &CoiValue,
    ) -> DbResult<()> {
        let default = self.coi_default(id, index)?;
        if !value.matches_kind(&default) {
            return Err(DbError::TypeMismatch);
        }
        if let (CoiValue::Octets(data), CoiDefault::Octets { max, .. }) = (value, default) {
            if data.len() > max as usize {
                return Err(DbError::InvalidLength { len: data.len(), max });
            }
        }

        let existing = self
            .coi
            .get(peer)
            .and_then(|g| g.find(id.0, index))
            .map(|item| item.value);
        if existing.is_none() && *value == self.coi_default_value(id, index)? {
            return Ok(());
        }

        let stored = match (existing, value) {
            (_, CoiValue::Ccc(ccc)) => CoiStored::Ccc(*ccc),
            (_, CoiValue::TwoU16 { start, end }) => CoiStored::TwoU16 {
                start: *start,
                end: *end,
            },
            (Some(CoiStored::Octets { index: entry, .. }), CoiValue::Octets(data)) => {
                let max = match default {
                    CoiDefault::Octets { max, .. } => max,
                    _ => return Err(DbError::TypeMismatch),
                };
                self.write_dynamic(entry, 0, data, max)?;
                CoiStored::Octets {
                    index: entry,
                    len: data.len() as u16,
                }
            }
            (_, CoiValue::Octets(data)) => {
                let max = match default {
                    CoiDefault::Octets { max, .. } => max,
                    _ => return Err(DbError::TypeMismatch),
                };
                let mut bytes = data.clone();
                bytes.resize(max as usize, 0);
                CoiStored::Octets {
                    index: self.dynamic_table.add(&bytes)?,
                    len: data.len() as u16,
                }
            }
        };

        let bonded = self.connections.get(peer).copied().unwrap_or(false);
        let group = self.coi.entry(*peer).or_insert_with(|| {
            debug!("Created client own instance group for {}", peer);
            CoiGroup {
                bonded,
                ..CoiGroup::default()
            }
        });
        match group
            .items
            .iter_mut()
            .find(|i| i.start_handle == id.0 && i.attr_index == index)
        {
            Some(item) => item.value = stored,
            None => group.items.push(CoiItem {
                start_handle: id.0,
                attr_index: index,
                value: stored,
            }),
        }
        if group.bonded {
            self.dirty = true;
        }
        Ok(())
    }

    /// Collect the peers holding their own value of attribute `index`.
    ///
    /// Up to `out.len()` records are written. Call with an empty slice to
    /// learn the total first.
    pub fn find_client_own_inst_records(
        &self,
        id: ServiceId,
        index: u16,
        out: &mut [CoiRecord],
    ) -> DbResult<FoundRecords> {
        self.coi_default(id, index)?;
        let mut found = FoundRecords::default();
        for (peer, group) in &self.coi {
            if let Some(item) = group.find(id.0, index) {
                if let Some(slot) = out.get_mut(found.returned) {
                    *slot = CoiRecord {
                        peer: *peer,
                        value: self.coi_item_value(item)?,
                    };
                    found.returned += 1;
                }
                found.total += 1;
            }
        }
        Ok(found)
    }

    /// Whether `peer` holds any value of its own
    pub fn has_client_own_values(&self, peer: &DevAddr) -> bool {
        self.coi.get(peer).map_or(false, |g| !g.items.is_empty())
    }

    /// Erase everything stored for `peer`, including its persistent record.
    /// Used when the bond with `peer` is removed.
    ///
    /// The persistent record goes first; if the store refuses, nothing is
    /// changed and the error is returned.
    pub fn remove_client_own_attribs_for_peer(&mut self, peer: &DevAddr) -> DbResult<()> {
        if let Some(record) = self.coi.get(peer).and_then(|g| g.record) {
            if !self.store.remove(record) {
                return Err(DbError::Persistence(format!(
                    "failed to remove record {} of {}",
                    record, peer
                )));
            }
        }
        if let Some(group) = self.coi.remove(peer) {
            self.free_group(&group);
            debug!("Removed {} client own values of {}", group.items.len(), peer);
            self.dirty = true;
        }
        if let Some(bonded) = self.connections.get_mut(peer) {
            *bonded = false;
        }
        Ok(())
    }

    pub(crate) fn free_group(&mut self, group: &CoiGroup) {
        for item in &group.items {
            if let CoiStored::Octets { index, .. } = item.value {
                self.dynamic_table.remove(index);
            }
        }
    }

    /// Drop the values of every peer for the attributes of the service
    /// starting at `start_handle`
    pub(crate) fn remove_coi_for_service(&mut self, start_handle: u16) {
        let mut freed = Vec::new();
        for group in self.coi.values_mut() {
            group.items.retain(|item| {
                if item.start_handle != start_handle {
                    return true;
                }
                if let CoiStored::Octets { index, .. } = item.value {
                    freed.push(index);
                }
                false
            });
        }
        for index in freed {
            self.dynamic_table.remove(index);
        }
        self.dirty = true;
    }

    /// A GATT connection to `peer` came up. A peer connecting without a bond
    /// loses anything left over from an earlier bond.
    pub fn peer_connected(&mut self, peer: &DevAddr, bonded: bool) -> DbResult<()> {
        debug!("Peer {} connected (bonded: {})", peer, bonded);
        if !bonded && self.coi.contains_key(peer) {
            warn!("Erasing client own values of {}, no longer bonded", peer);
            self.remove_client_own_attribs_for_peer(peer)?;
        }
        self.connections.insert(*peer, bonded);
        Ok(())
    }

    /// The connection to `peer` went down. Values of a peer without a bond
    /// are dropped, as are its suspended requests.
    pub fn peer_disconnected(&mut self, peer: &DevAddr) {
        debug!("Peer {} disconnected", peer);
        self.connections.remove(peer);

        let dropped = self.pending.drop_where(|r: &PendingRequest| r.peer == *peer);
        if dropped > 0 {
            debug!("Dropped {} pending requests of {}", dropped, peer);
        }

        if self.coi.get(peer).map_or(false, |g| !g.bonded) {
            if let Some(group) = self.coi.remove(peer) {
                self.free_group(&group);
            }
        }
    }

    /// A bond with `peer` was created; its values become persistent
    pub fn bond_created(&mut self, peer: &DevAddr) {
        debug!("Bond created with {}", peer);
        if let Some(bonded) = self.connections.get_mut(peer) {
            *bonded = true;
        }
        if let Some(group) = self.coi.get_mut(peer) {
            group.bonded = true;
            self.dirty = true;
        }
    }

    /// Whether `peer` is currently connected
    pub fn is_connected(&self, peer: &DevAddr) -> bool {
        self.connections.contains_key(peer)
    }

    /// Persistable image of the values of `peer`
    pub(crate) fn group_image(&self, peer: &DevAddr) -> DbResult<Option<GroupImage>> {
        let group = match self.coi.get(peer) {
            Some(group) => group,
            None => return Ok(None),
        };
        let mut items = Vec::with_capacity(group.items.len());
        for item in &group.items {
            items.push(GroupItem {
                start_handle: item.start_handle,
                attr_index: item.attr_index,
                value: self.coi_item_value(item)?,
            });
        }
        Ok(Some(GroupImage { peer: *peer, items }))
    }

    /// Load a persisted group. A record that cannot be read or decoded is
    /// skipped, as are items whose attribute no longer exists.
    pub(crate) fn restore_group(&mut self, record: RecordId) {
        let bytes = match read_record(&mut self.store, record) {
            Some(bytes) => bytes,
            None => {
                warn!("Group record {} is missing", record);
                return;
            }
        };
        let image = match codec::decode_group(record, &bytes) {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping group record {}: {}", record, e);
                return;
            }
        };

        let mut group = CoiGroup {
            bonded: true,
            items: Vec::with_capacity(image.items.len()),
            record: Some(record),
        };
        for item in image.items {
            let id = ServiceId(item.start_handle);
            let default = match self.coi_default(id, item.attr_index) {
                Ok(default) if item.value.matches_kind(&default) => default,
                _ => {
                    warn!(
                        "Dropping stale value of {} for {}[{}]",
                        image.peer, id, item.attr_index
                    );
                    continue;
                }
            };
            let value = match (item.value, default) {
                (CoiValue::Ccc(ccc), _) => CoiStored::Ccc(ccc),
                (CoiValue::TwoU16 { start, end }, _) => CoiStored::TwoU16 { start, end },
                (CoiValue::Octets(data), CoiDefault::Octets { max, .. }) if data.len() <= max as usize => {
                    let len = data.len() as u16;
                    let mut bytes = data;
                    bytes.resize(max as usize, 0);
                    match self.dynamic_table.add(&bytes) {
                        Ok(index) => CoiStored::Octets { index, len },
                        Err(e) => {
                            warn!("No room for value of {}: {}", image.peer, e);
                            continue;
                        }
                    }
                }
                _ => {
                    warn!("Dropping oversized value of {} for {}", image.peer, id);
                    continue;
                }
            };
            group.items.push(CoiItem {
                start_handle: item.start_handle,
                attr_index: item.attr_index,
                value,
            });
        }

        debug!(
            "Restored {} client own values of {} from record {}",
            group.items.len(),
            image.peer,
            record
        );
        if let Some(old) = self.coi.insert(image.peer, group) {
            warn!("Duplicate group record for {}", image.peer);
            self.free_group(&old);
        }
    }
}
