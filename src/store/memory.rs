//! In-process key/value backing store with transactional staging.
//!
//! Writes made inside a transaction are staged on the connection and only
//! become visible to other connections on commit. Useful for tests and for
//! wiring a router without a database.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::util::lock::{rw_read, rw_write};

use super::{BackingStore, StoreConnection, StoreError};

const OWNER: &str = "store::memory";

/// Counters of the transactional operations a store has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    data: RwLock<BTreeMap<String, String>>,
    connects: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    fail_connects: AtomicBool,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                data: RwLock::new(BTreeMap::new()),
                connects: AtomicUsize::new(0),
                begins: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
                fail_connects: AtomicBool::new(false),
                fail_commits: AtomicBool::new(false),
            }),
        }
    }

    /// Committed value for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        rw_read(&self.inner.data, OWNER, "get").get(key).cloned()
    }

    /// Snapshot of all committed rows.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        rw_read(&self.inner.data, OWNER, "snapshot").clone()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.inner.data, OWNER, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            connects: self.inner.connects.load(Ordering::SeqCst),
            begins: self.inner.begins.load(Ordering::SeqCst),
            commits: self.inner.commits.load(Ordering::SeqCst),
            rollbacks: self.inner.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// Make subsequent `connect` calls fail.
    pub fn fail_connects(&self, fail: bool) {
        self.inner.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent commits fail; the staged writes are discarded.
    pub fn fail_commits(&self, fail: bool) {
        self.inner.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.inner.name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        if self.inner.fail_connects.load(Ordering::SeqCst) {
            return Err(StoreError::connect(
                self.inner.name.clone(),
                "store is unreachable",
            ));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
            staged: None,
        }))
    }
}

/// Connection to a [`MemoryStore`].
pub struct MemoryConnection {
    inner: Arc<Inner>,
    staged: Option<HashMap<String, Option<String>>>,
}

impl MemoryConnection {
    pub fn store_name(&self) -> &str {
        &self.inner.name
    }

    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    /// Read through staged writes, then committed data.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.staged.as_ref().and_then(|staged| staged.get(key)) {
            return value.clone();
        }
        rw_read(&self.inner.data, OWNER, "connection.get")
            .get(key)
            .cloned()
    }

    /// Write a row; applied immediately outside a transaction.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.write(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.write(key.into(), None);
    }

    fn write(&mut self, key: String, value: Option<String>) {
        match self.staged.as_mut() {
            Some(staged) => {
                staged.insert(key, value);
            }
            None => apply(&self.inner, [(key, value)]),
        }
    }
}

fn apply(inner: &Inner, writes: impl IntoIterator<Item = (String, Option<String>)>) {
    let mut data = rw_write(&inner.data, OWNER, "apply");
    for (key, value) in writes {
        match value {
            Some(value) => {
                data.insert(key, value);
            }
            None => {
                data.remove(&key);
            }
        }
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.staged.is_some() {
            return Err(StoreError::transaction(
                self.inner.name.clone(),
                "begin",
                "a transaction is already open on this connection",
            ));
        }
        self.staged = Some(HashMap::new());
        self.inner.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let staged = self.staged.take().ok_or_else(|| {
            StoreError::transaction(self.inner.name.clone(), "commit", "no open transaction")
        })?;
        if self.inner.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::transaction(
                self.inner.name.clone(),
                "commit",
                "commit rejected by store",
            ));
        }
        apply(&self.inner, staged);
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if self.staged.take().is_none() {
            return Err(StoreError::transaction(
                self.inner.name.clone(),
                "rollback",
                "no open transaction",
            ));
        }
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_rollback(&mut self) {
        if self.staged.take().is_some() {
            self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
