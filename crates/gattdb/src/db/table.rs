//! Static and dynamic value tables
//!
//! Variable length attribute values live in one of two slab tables and are
//! referenced from attributes by a dense `u16` index. Index 0 is reserved and
//! never handed out. An index is stable from `add` until `remove`: removing
//! an entry in the middle of the table leaves a hole that a later `add`
//! reuses, only entries at the tail are given back.

use crate::error::{DbError, DbResult};
use log::debug;

/// Index value that never refers to an entry
pub const INVALID_INDEX: u16 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryData {
    /// Borrowed from a read-only image, never persisted
    Rom(&'static [u8]),
    Ram(Vec<u8>),
}

/// One occupied slot of a value table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    data: EntryData,
}

impl ValueEntry {
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            EntryData::Rom(bytes) => bytes,
            EntryData::Ram(bytes) => bytes,
        }
    }

    pub fn is_rom(&self) -> bool {
        matches!(self.data, EntryData::Rom(_))
    }
}

/// A growable table of byte values addressed by index
#[derive(Debug, Clone)]
pub struct ValueTable {
    name: &'static str,
    entries: Vec<Option<ValueEntry>>,
}

impl ValueTable {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    /// Logical size of the table, counting the reserved slot and holes
    pub fn num_entries(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Number of occupied entries
    pub fn occupied(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Copy `bytes` into a new entry and return its index
    pub fn add(&mut self, bytes: &[u8]) -> DbResult<u16> {
        self.insert(EntryData::Ram(bytes.to_vec()))
    }

    /// Add an entry borrowing read-only bytes
    pub fn add_rom(&mut self, bytes: &'static [u8]) -> DbResult<u16> {
        self.insert(EntryData::Rom(bytes))
    }

    fn insert(&mut self, data: EntryData) -> DbResult<u16> {
        let entry = ValueEntry { data };

        if let Some(index) = self.find_hole() {
            debug!("{} table: reusing hole at index {}", self.name, index);
            self.entries[index as usize] = Some(entry);
            return Ok(index);
        }

        if self.entries.len() >= INVALID_INDEX as usize {
            return Err(DbError::NoResources);
        }
        let needed = if self.entries.is_empty() { 2 } else { 1 };
        self.entries
            .try_reserve(needed)
            .map_err(|_| DbError::NoResources)?;
        if self.entries.is_empty() {
            self.entries.push(None);
        }
        self.entries.push(Some(entry));

        Ok((self.entries.len() - 1) as u16)
    }

    /// Holes are searched from the tail since recently freed entries are
    /// most likely to sit there.
    fn find_hole(&self) -> Option<u16> {
        (1..self.entries.len())
            .rev()
            .find(|&i| self.entries[i].is_none())
            .map(|i| i as u16)
    }

    /// Remove the entry at `index`, returning it if it was occupied.
    ///
    /// The table shrinks only when the tail becomes free; any other index
    /// becomes a hole.
    pub fn remove(&mut self, index: u16) -> Option<ValueEntry> {
        if index == 0 {
            return None;
        }
        let removed = self.entries.get_mut(index as usize)?.take();

        while self.entries.len() > 1 && matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
        if self.entries.len() == 1 {
            self.entries.clear();
        }

        removed
    }

    /// Place an entry at a known index, used when loading persisted tables
    pub fn insert_at(&mut self, index: u16, bytes: Vec<u8>) -> DbResult<()> {
        if index == 0 || index == INVALID_INDEX {
            return Err(DbError::InvalidParameter("table index"));
        }
        let slot = index as usize;
        if slot < self.entries.len() {
            if self.entries[slot].is_some() {
                return Err(DbError::InUse(index));
            }
        } else {
            self.entries
                .try_reserve(slot + 1 - self.entries.len())
                .map_err(|_| DbError::NoResources)?;
            self.entries.resize(slot + 1, None);
        }
        self.entries[slot] = Some(ValueEntry {
            data: EntryData::Ram(bytes),
        });
        Ok(())
    }

    pub fn get(&self, index: u16) -> Option<&[u8]> {
        self.entry(index).map(ValueEntry::bytes)
    }

    pub fn entry(&self, index: u16) -> Option<&ValueEntry> {
        self.entries.get(index as usize).and_then(Option::as_ref)
    }

    /// Mutable access to a RAM entry. ROM entries cannot be modified.
    pub fn get_mut(&mut self, index: u16) -> DbResult<&mut Vec<u8>> {
        match self.entries.get_mut(index as usize).and_then(Option::as_mut) {
            Some(ValueEntry {
                data: EntryData::Ram(bytes),
            }) => Ok(bytes),
            Some(_) => Err(DbError::Immutable),
            None => Err(DbError::InvalidParameter("table index")),
        }
    }

    /// Iterate over occupied entries in index order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &ValueEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as u16, e)))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
