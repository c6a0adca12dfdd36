//! Thread safe handle to a database

use super::GattDatabase;
use crate::error::{DbError, DbResult};
use crate::persist::PersistenceManager;
use std::sync::{Arc, Mutex, MutexGuard};

/// A database shared between the ATT server, the security manager and the
/// application. Every operation runs under one lock, so callers observe
/// operations as atomic.
///
/// Service handlers are invoked while the lock is held. A handler must not
/// lock the database again; it should hand the request to another thread or
/// answer it after the triggering call has returned.
pub struct SharedGattDatabase<P: PersistenceManager> {
    inner: Arc<Mutex<GattDatabase<P>>>,
}

impl<P: PersistenceManager> Clone for SharedGattDatabase<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PersistenceManager> SharedGattDatabase<P> {
    pub fn new(db: GattDatabase<P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    pub fn lock(&self) -> DbResult<MutexGuard<'_, GattDatabase<P>>> {
        self.inner.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Run `f` with the database locked
    pub fn with<R>(&self, f: impl FnOnce(&mut GattDatabase<P>) -> R) -> DbResult<R> {
        let mut db = self.lock()?;
        Ok(f(&mut db))
    }

    /// Take the database back if this is the last handle
    pub fn try_unwrap(self) -> Result<GattDatabase<P>, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(|e| e.into_inner())),
            Err(inner) => Err(Self { inner }),
        }
    }
}
