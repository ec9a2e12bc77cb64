//! Reference-counted registries for the three artifact kinds.
//!
//! A store owns its artifacts by id; handles are keys, so a handle whose
//! artifact has been evicted simply resolves to `None`. Entries are inserted
//! uncounted and become invisible the moment their count drops from 1 to 0.
//! Eviction hands the artifact back to the caller, which performs any external
//! release (dropping a temp relation) after the store lock is gone.

use crate::descriptor::Arg;
use crate::handle::{Handle, HandleKind};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Materialized query result held by the engine as a temp relation.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub relation: String,
    pub columns: Vec<String>,
    pub row_count: u64,
}

/// Unexecuted SQL plus the arguments it was created with (not pre-resolved).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFragment {
    pub sql: String,
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPlot {
    pub data: Handle,
    pub template: String,
    pub overrides: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug)]
struct Entry<T> {
    artifact: Arc<T>,
    refs: usize,
}

#[derive(Debug)]
struct Inner<T> {
    next_id: u64,
    entries: HashMap<u64, Entry<T>>,
}

#[derive(Debug)]
pub struct HandleStore<T> {
    kind: HandleKind,
    inner: Mutex<Inner<T>>,
}

impl<T> HandleStore<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(Inner {
                next_id: 1,
                entries: HashMap::new(),
            }),
        }
    }

    /// Insert an artifact with a count of zero and return its handle.
    ///
    /// Ids are sequential per store and never reused.
    pub fn store(&self, artifact: T) -> Handle {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(
            id,
            Entry {
                artifact: Arc::new(artifact),
                refs: 0,
            },
        );
        Handle::new(self.kind, id)
    }

    pub fn get(&self, handle: &Handle) -> Option<Arc<T>> {
        if handle.kind != self.kind {
            return None;
        }
        let inner = self.inner.lock();
        inner.entries.get(&handle.id).map(|e| Arc::clone(&e.artifact))
    }

    /// Lookup by host token; any display suffix is ignored.
    pub fn get_str(&self, raw: &str) -> Option<Arc<T>> {
        Handle::parse(raw).and_then(|handle| self.get(&handle))
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        handle.kind == self.kind && self.inner.lock().entries.contains_key(&handle.id)
    }

    /// Returns `false` (and logs) if the handle is absent.
    pub fn increment(&self, handle: &Handle) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(&handle.id) {
            Some(entry) if handle.kind == self.kind => {
                entry.refs += 1;
                true
            }
            _ => {
                log::error!("refcount increment on absent handle {handle}");
                false
            }
        }
    }

    /// Lower the count; on the 1 -> 0 transition the entry is removed and
    /// returned so the caller can release it outside the lock.
    pub fn decrement(&self, handle: &Handle) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner
            .entries
            .get_mut(&handle.id)
            .filter(|_| handle.kind == self.kind)
        else {
            log::error!("refcount decrement on absent handle {handle}");
            return None;
        };
        match entry.refs {
            0 => {
                log::error!("refcount decrement below zero for {handle}");
                None
            }
            1 => inner.entries.remove(&handle.id).map(|e| e.artifact),
            _ => {
                entry.refs -= 1;
                None
            }
        }
    }

    pub fn refcount(&self, handle: &Handle) -> Option<usize> {
        if handle.kind != self.kind {
            return None;
        }
        self.inner.lock().entries.get(&handle.id).map(|e| e.refs)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The three stores, shared by every component.
#[derive(Debug)]
pub struct Stores {
    pub tables: HandleStore<StoredResult>,
    pub fragments: HandleStore<StoredFragment>,
    pub plots: HandleStore<StoredPlot>,
}

/// Something a decrement evicted; tables still own an engine-side relation.
#[derive(Debug, Clone)]
pub enum Evicted {
    Table(Arc<StoredResult>),
    Fragment(Arc<StoredFragment>),
    Plot(Arc<StoredPlot>),
}

impl Stores {
    pub fn new() -> Self {
        Self {
            tables: HandleStore::new(HandleKind::Table),
            fragments: HandleStore::new(HandleKind::Fragment),
            plots: HandleStore::new(HandleKind::Plot),
        }
    }

    pub fn increment(&self, handle: &Handle) -> bool {
        match handle.kind {
            HandleKind::Table => self.tables.increment(handle),
            HandleKind::Fragment => self.fragments.increment(handle),
            HandleKind::Plot => self.plots.increment(handle),
        }
    }

    pub fn decrement(&self, handle: &Handle) -> Option<Evicted> {
        match handle.kind {
            HandleKind::Table => self.tables.decrement(handle).map(Evicted::Table),
            HandleKind::Fragment => self.fragments.decrement(handle).map(Evicted::Fragment),
            HandleKind::Plot => self.plots.decrement(handle).map(Evicted::Plot),
        }
    }

    pub fn refcount(&self, handle: &Handle) -> Option<usize> {
        match handle.kind {
            HandleKind::Table => self.tables.refcount(handle),
            HandleKind::Fragment => self.fragments.refcount(handle),
            HandleKind::Plot => self.plots.refcount(handle),
        }
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        match handle.kind {
            HandleKind::Table => self.tables.contains(handle),
            HandleKind::Fragment => self.fragments.contains(handle),
            HandleKind::Plot => self.plots.contains(handle),
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new()
    }
}
