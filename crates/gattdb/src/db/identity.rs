//! Per-radio identity material
//!
//! The database keeps the local identity resolving key and an address id
//! counter in its root record so that both survive restarts.

use super::GattDatabase;
use crate::gap::BdAddr;
use crate::persist::PersistenceManager;
use log::debug;
use rand::RngCore;

/// Identity material stored alongside the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Local identity resolving key
    pub irk: [u8; 16],
    pub address_id_counter: u32,
    /// Radio the database belongs to
    pub local_addr: BdAddr,
}

impl Identity {
    /// Fresh identity with a random IRK
    pub fn generate(local_addr: BdAddr) -> Self {
        let mut irk = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut irk);
        debug!("Generated new identity for {}", local_addr);
        Self {
            irk,
            address_id_counter: 0,
            local_addr,
        }
    }
}

impl<P: PersistenceManager> GattDatabase<P> {
    pub fn irk(&self) -> &[u8; 16] {
        &self.identity.irk
    }

    pub fn local_address(&self) -> BdAddr {
        self.identity.local_addr
    }

    /// Hand out the next address id. The counter is persisted on flush.
    pub fn next_address_id(&mut self) -> u32 {
        self.identity.address_id_counter = self.identity.address_id_counter.wrapping_add(1);
        self.dirty = true;
        self.identity.address_id_counter
    }
}
