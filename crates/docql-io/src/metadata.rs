//! Cluster metadata and a watchable view of it.
//!
//! Metadata only ever grows by joining: databases and tables are keyed by id
//! and a join takes the union. A `MetadataView` separates the authoritative
//! copy (where joins land) from the watched copy evaluation reads, so callers
//! can block until a join has propagated.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use docql_core::id::{DbId, TableId};
use docql_core::signal::Interruptor;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMeta {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub db: DbId,
    pub name: String,
    pub primary_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMetadata {
    /// Keyed by database name.
    pub databases: BTreeMap<String, (DbId, DatabaseMeta)>,
    /// Keyed by table id.
    pub tables: BTreeMap<String, (TableId, TableMeta)>,
}

impl ClusterMetadata {
    pub fn add_database(&mut self, name: &str) -> DbId {
        if let Some((id, _)) = self.databases.get(name) {
            return *id;
        }
        let id = DbId::generate();
        self.databases.insert(
            name.to_string(),
            (
                id,
                DatabaseMeta {
                    name: name.to_string(),
                },
            ),
        );
        id
    }

    pub fn add_table(&mut self, db: DbId, name: &str, primary_key: &str) -> TableId {
        if let Some((id, _)) = self.find_table(db, name) {
            return id;
        }
        let id = TableId::generate();
        self.tables.insert(
            id.to_string(),
            (
                id,
                TableMeta {
                    db,
                    name: name.to_string(),
                    primary_key: primary_key.to_string(),
                },
            ),
        );
        id
    }

    pub fn find_database(&self, name: &str) -> Option<DbId> {
        self.databases.get(name).map(|(id, _)| *id)
    }

    pub fn find_table(&self, db: DbId, name: &str) -> Option<(TableId, &TableMeta)> {
        self.tables
            .values()
            .find(|(_, m)| m.db == db && m.name == name)
            .map(|(id, m)| (*id, m))
    }

    /// Union of both sides; entries already present are kept.
    pub fn join(&mut self, other: &ClusterMetadata) {
        for (k, v) in &other.databases {
            self.databases.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.tables {
            self.tables.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// True when joining `other` would change nothing.
    pub fn contains(&self, other: &ClusterMetadata) -> bool {
        other.databases.keys().all(|k| self.databases.contains_key(k))
            && other.tables.keys().all(|k| self.tables.contains_key(k))
    }
}

/// Shared value whose changes wake blocked waiters.
pub struct Watchable<T> {
    inner: Arc<(Mutex<T>, Condvar)>,
}

impl<T> Clone for Watchable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Watchable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new((Mutex::new(value), Condvar::new())),
        }
    }

    pub fn get(&self) -> Result<T> {
        let (lock, _) = &*self.inner;
        let guard = lock
            .lock()
            .map_err(|_| StorageError::Poisoned("watchable"))?;
        Ok(guard.clone())
    }

    pub fn apply(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock
            .lock()
            .map_err(|_| StorageError::Poisoned("watchable"))?;
        f(&mut guard);
        cvar.notify_all();
        Ok(())
    }

    /// Block until `pred` holds or `interruptor` fires. The interruptor is
    /// polled every `poll`, so cancellation is noticed within one interval.
    pub fn run_until_satisfied(
        &self,
        mut pred: impl FnMut(&T) -> bool,
        interruptor: &Interruptor,
        poll: Duration,
    ) -> Result<T> {
        let (lock, cvar) = &*self.inner;
        let mut guard = lock
            .lock()
            .map_err(|_| StorageError::Poisoned("watchable"))?;
        loop {
            if pred(&guard) {
                return Ok(guard.clone());
            }
            if interruptor.is_pulsed() {
                return Err(StorageError::Interrupted);
            }
            let (next, _) = cvar
                .wait_timeout(guard, poll)
                .map_err(|_| StorageError::Poisoned("watchable"))?;
            guard = next;
        }
    }
}

/// Authoritative metadata plus the watched copy evaluation reads.
#[derive(Clone)]
pub struct MetadataView {
    authoritative: Arc<Mutex<ClusterMetadata>>,
    watched: Watchable<ClusterMetadata>,
    auto_propagate: bool,
}

impl MetadataView {
    /// A view where joins become visible immediately.
    pub fn new(initial: ClusterMetadata) -> Self {
        Self {
            authoritative: Arc::new(Mutex::new(initial.clone())),
            watched: Watchable::new(initial),
            auto_propagate: true,
        }
    }

    /// A view where joins only become visible after `propagate`.
    pub fn deferred(initial: ClusterMetadata) -> Self {
        Self {
            auto_propagate: false,
            ..Self::new(initial)
        }
    }

    pub fn join(&self, other: &ClusterMetadata) -> Result<()> {
        {
            let mut auth = self
                .authoritative
                .lock()
                .map_err(|_| StorageError::Poisoned("metadata"))?;
            auth.join(other);
        }
        if self.auto_propagate {
            self.propagate()?;
        }
        Ok(())
    }

    /// Publish the authoritative copy to watchers.
    pub fn propagate(&self) -> Result<()> {
        let snapshot = self
            .authoritative
            .lock()
            .map_err(|_| StorageError::Poisoned("metadata"))?
            .clone();
        self.watched.apply(|m| m.join(&snapshot))
    }

    pub fn snapshot(&self) -> Result<ClusterMetadata> {
        self.watched.get()
    }

    pub fn watchable(&self) -> &Watchable<ClusterMetadata> {
        &self.watched
    }
}
