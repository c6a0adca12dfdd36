//! Persistent storage collaborator
//!
//! The database does not do any I/O of its own. It reads and writes opaque
//! records through a [`PersistenceManager`] supplied by the caller. Record
//! ids are split into a small fixed range usable without creation and an
//! open ended dynamic range whose records must be created first.

pub mod codec;


use log::debug;
use std::collections::BTreeMap;

/// Identifier of a persistent record
pub type RecordId = u32;

/// Never a valid record
pub const INVALID_RECORD_ID: RecordId = 0;
pub const FIRST_FIXED_RECORD_ID: RecordId = 1;
pub const LAST_FIXED_RECORD_ID: RecordId = 255;
pub const FIRST_DYNAMIC_RECORD_ID: RecordId = 256;

pub fn is_fixed_record(id: RecordId) -> bool {
    (FIRST_FIXED_RECORD_ID..=LAST_FIXED_RECORD_ID).contains(&id)
}

/// Record store backing a database
pub trait PersistenceManager {
    /// Create a new record in the dynamic range
    fn create(&mut self) -> Option<RecordId>;

    /// Remove a record. Removing a fixed record clears it.
    fn remove(&mut self, id: RecordId) -> bool;

    /// Read up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes read
    fn read(&mut self, id: RecordId, buf: &mut [u8], offset: u32) -> usize;

    /// Write `data` at `offset`, growing the record as needed
    fn write(&mut self, id: RecordId, data: &[u8], offset: u32) -> bool;

    /// Length of a record, 0 if it does not exist
    fn get_length(&mut self, id: RecordId) -> u32;

    /// Truncate or zero extend a record
    fn set_length(&mut self, id: RecordId, len: u32) -> bool;
}

/// Read a whole record
pub(crate) fn read_record<P: PersistenceManager + ?Sized>(store: &mut P, id: RecordId) -> Option<Vec<u8>> {
    let len = store.get_length(id) as usize;
    if len == 0 {
        return None;
    }
    let mut buf = vec![0u8; len];
    if store.read(id, &mut buf, 0) != len {
        return None;
    }
    Some(buf)
}

/// Replace the content of a record
pub(crate) fn write_record<P: PersistenceManager + ?Sized>(store: &mut P, id: RecordId, data: &[u8]) -> bool {
    store.set_length(id, data.len() as u32) && store.write(id, data, 0)
}

/// Record store held in memory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    records: BTreeMap<RecordId, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// Ids of all records, fixed ones included
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.records.keys().copied().collect()
    }

    /// Ids of records in the dynamic range
    pub fn dynamic_record_ids(&self) -> Vec<RecordId> {
        self.records
            .range(FIRST_DYNAMIC_RECORD_ID..)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn record(&self, id: RecordId) -> Option<&[u8]> {
        self.records.get(&id).map(Vec::as_slice)
    }

    /// Record for writing; fixed records spring into existence on demand
    fn record_mut(&mut self, id: RecordId) -> Option<&mut Vec<u8>> {
        if is_fixed_record(id) {
            Some(self.records.entry(id).or_default())
        } else {
            self.records.get_mut(&id)
        }
    }
}

impl PersistenceManager for MemoryStore {
    fn create(&mut self) -> Option<RecordId> {
        let mut id = FIRST_DYNAMIC_RECORD_ID;
        for used in self.records.range(FIRST_DYNAMIC_RECORD_ID..).map(|(id, _)| *id) {
            if used != id {
                break;
            }
            id = id.checked_add(1)?;
        }
        self.records.insert(id, Vec::new());
        debug!("Created record {}", id);
        Some(id)
    }

    fn remove(&mut self, id: RecordId) -> bool {
        if id == INVALID_RECORD_ID {
            return false;
        }
        self.records.remove(&id).is_some() || is_fixed_record(id)
    }

    fn read(&mut self, id: RecordId, buf: &mut [u8], offset: u32) -> usize {
        let record = match self.records.get(&id) {
            Some(record) => record,
            None => return 0,
        };
        let start = (offset as usize).min(record.len());
        let count = buf.len().min(record.len() - start);
        buf[..count].copy_from_slice(&record[start..start + count]);
        count
    }

    fn write(&mut self, id: RecordId, data: &[u8], offset: u32) -> bool {
        let record = match self.record_mut(id) {
            Some(record) => record,
            None => return false,
        };
        let start = offset as usize;
        let end = start + data.len();
        if record.len() < end {
            record.resize(end, 0);
        }
        record[start..end].copy_from_slice(data);
        true
    }

    fn get_length(&mut self, id: RecordId) -> u32 {
        self.records.get(&id).map_or(0, |r| r.len() as u32)
    }

    fn set_length(&mut self, id: RecordId, len: u32) -> bool {
        match self.record_mut(id) {
            Some(record) => {
                record.resize(len as usize, 0);
                true
            }
            None => false,
        }
    }
}
