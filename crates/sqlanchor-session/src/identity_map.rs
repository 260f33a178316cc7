//! Per-root-type in-memory cache of persistent objects.
//!
//! The identity map guarantees that each database row has at most one live
//! in-memory object at any time, so the same record can never be edited
//! inconsistently through two copies. Objects are indexed twice: every
//! cached object appears under its cache key, and those that correspond
//! to a row also appear under their primary key. The cache-key index is
//! ordered because the key allocator scans it for the first free gap.
//!
//! Retention is driven by the handle count. While any handle points at an
//! object it stays cached; when the count drops to zero the object is
//! evicted, unless caching is enabled and the object has an id, in which
//! case it is retained indefinitely.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use sqlanchor_core::{Error, Id, Result};
use sqlanchor_sqlite::DatabaseConnection;
use tracing::trace;

use crate::persistent::{ObjectCore, Persistent, Root, exists};

pub(crate) type Record<R> = Rc<RefCell<R>>;

/// The indexes and allocator state behind an [`IdentityMap`].
///
/// Shared (via `Rc`) with every object's core, so that objects and handles
/// can reach the map without borrowing the map's owner.
pub(crate) struct MapState<R: Root> {
    by_cache_key: BTreeMap<Id, Record<R>>,
    by_id: HashMap<Id, Record<R>>,
    last_cache_key: Id,
    is_caching: bool,
    connection: Rc<DatabaseConnection>,
}

impl<R: Root> MapState<R> {
    fn new(connection: Rc<DatabaseConnection>) -> Self {
        Self {
            by_cache_key: BTreeMap::new(),
            by_id: HashMap::new(),
            last_cache_key: 0,
            is_caching: false,
            connection,
        }
    }

    /// Allocate a fresh cache key: the first key not currently in use,
    /// scanning forward from the last key handed out and wrapping at the
    /// positive limit.
    fn provide_cache_key(&mut self) -> Result<Id> {
        if self.by_cache_key.is_empty() {
            self.last_cache_key = 1;
            return Ok(1);
        }
        if self.by_cache_key.len() as u128 >= Id::MAX as u128 {
            return Err(Error::Overflow(
                "no more cache keys are available for identifying objects",
            ));
        }
        let key = scan_free_key(&self.by_cache_key, self.last_cache_key);
        self.last_cache_key = key;
        Ok(key)
    }

    /// Record the id assigned to a newly saved object so it can be found
    /// by id from now on.
    ///
    /// If another object already holds this id, it is a stale survivor of
    /// a save whose enclosing transaction was cancelled after
    /// registration: the stale object is dropped from the id index and
    /// its id cleared (it stays under its cache key while handles point
    /// at it), then the new object takes the id.
    pub(crate) fn register_id(&mut self, cache_key: Id, id: Id) -> Result<()> {
        let record = self.by_cache_key.get(&cache_key).cloned().ok_or_else(|| {
            Error::Logic("no object is cached under the given cache key".to_string())
        })?;
        if let Some(stale) = self.by_id.get(&id).cloned() {
            if !Rc::ptr_eq(&stale, &record) {
                trace!(id, "id registration displaced a stale object");
                stale.borrow().core().clear_id();
                self.by_id.remove(&id);
            }
        }
        self.by_id.insert(id, record);
        Ok(())
    }

    /// Forget that any object holds `id`. The object itself is untouched.
    pub(crate) fn deregister_id(&mut self, id: Id) {
        self.by_id.remove(&id);
    }

    /// Called when an object's handle count reaches zero. Evicts the
    /// object unless caching is on and the object has an id.
    pub(crate) fn notify_nil_handles(&mut self, cache_key: Id) {
        let Some(record) = self.by_cache_key.get(&cache_key) else {
            return;
        };
        let has_id = record.borrow().core().has_id();
        if !has_id || !self.is_caching {
            self.uncache(cache_key);
        }
    }

    /// Drop an object from both indexes.
    fn uncache(&mut self, cache_key: Id) {
        self.partially_uncache(cache_key);
        if self.by_cache_key.remove(&cache_key).is_some() {
            trace!(cache_key, "evicted object");
        }
    }

    /// Drop an object from the id index only, keeping it reachable by its
    /// cache key.
    fn partially_uncache(&mut self, cache_key: Id) {
        if let Some(record) = self.by_cache_key.get(&cache_key) {
            if let Some(id) = record.borrow().core().id() {
                self.by_id.remove(&id);
            }
        }
    }

    fn connection(&self) -> &Rc<DatabaseConnection> {
        &self.connection
    }
}

fn scan_free_key<V>(occupied: &BTreeMap<Id, V>, last: Id) -> Id {
    let mut candidate = if last < 1 { 1 } else { last };
    while occupied.contains_key(&candidate) {
        candidate = if candidate == Id::MAX { 1 } else { candidate + 1 };
    }
    candidate
}

/// In-memory cache ensuring at most one live object per database row of
/// root type `R`.
///
/// One map exists per (connection, root type) pair; a wrapping connection
/// type owns its maps and exposes them through
/// [`HasIdentityMap`](crate::HasIdentityMap). Handles are the only public
/// way in and out of the cache.
pub struct IdentityMap<R: Root> {
    state: Rc<RefCell<MapState<R>>>,
}

impl<R: Root> IdentityMap<R> {
    /// Create a map serving `connection`.
    pub fn new(connection: Rc<DatabaseConnection>) -> Self {
        Self {
            state: Rc::new(RefCell::new(MapState::new(connection))),
        }
    }

    /// The connection this map serves.
    pub fn connection(&self) -> Rc<DatabaseConnection> {
        Rc::clone(self.state.borrow().connection())
    }

    /// Retain objects with no handles as long as they have an id.
    /// Caching is off by default.
    pub fn enable_caching(&self) {
        self.state.borrow_mut().is_caching = true;
    }

    /// Stop retaining handleless objects, and evict every object whose
    /// handle count is currently zero.
    pub fn disable_caching(&self) {
        let mut state = self.state.borrow_mut();
        if !state.is_caching {
            return;
        }
        let orphaned: Vec<Id> = state
            .by_cache_key
            .iter()
            .filter(|(_, record)| record.borrow().core().is_orphaned())
            .map(|(key, _)| *key)
            .collect();
        for cache_key in orphaned {
            state.uncache(cache_key);
        }
        state.is_caching = false;
    }

    /// Whether handleless objects with an id are currently retained.
    pub fn is_caching(&self) -> bool {
        self.state.borrow().is_caching
    }

    /// Number of objects currently cached (with or without an id).
    pub fn cached_count(&self) -> usize {
        self.state.borrow().by_cache_key.len()
    }

    /// Whether an object with primary key `id` is currently cached.
    pub fn is_cached_by_id(&self, id: Id) -> bool {
        self.state.borrow().by_id.contains_key(&id)
    }

    /// Construct and cache a new object of dynamic type `D`, not yet
    /// corresponding to any row.
    pub(crate) fn provide_new<D: Persistent<Root = R>>(&self) -> Result<Record<R>> {
        let mut state = self.state.borrow_mut();
        let cache_key = state.provide_cache_key()?;
        let core = ObjectCore::new(
            Rc::downgrade(&self.state),
            Rc::clone(state.connection()),
            None,
        );
        core.set_cache_key(cache_key);
        let record = Rc::new(RefCell::new(D::from_core(core)));
        state.by_cache_key.insert(cache_key, Rc::clone(&record));
        trace!(cache_key, "cached new object");
        Ok(record)
    }

    /// Fetch or construct the object with primary key `id`, after
    /// verifying against the database that the row exists.
    pub(crate) fn provide_by_id<D: Persistent<Root = R>>(&self, id: Id) -> Result<Record<R>> {
        let connection = self.connection();
        if !exists::<D>(&connection, id)? {
            return Err(Error::BadIdentifier(id));
        }
        self.provide_by_id_unchecked::<D>(id)
    }

    /// Like [`provide_by_id`](Self::provide_by_id) but without the
    /// existence probe. The caller must know the row exists; a ghost
    /// created for a missing row will fail on first hydration.
    pub(crate) fn provide_by_id_unchecked<D: Persistent<Root = R>>(
        &self,
        id: Id,
    ) -> Result<Record<R>> {
        let mut state = self.state.borrow_mut();
        if let Some(existing) = state.by_id.get(&id) {
            if existing.borrow().core().has_high_handle_count() {
                return Err(Error::Overflow(
                    "handle count for the cached object has reached a dangerous level",
                ));
            }
            if D::from_root(&existing.borrow()).is_none() {
                return Err(Error::Logic(
                    "cached object has a different dynamic type than requested".to_string(),
                ));
            }
            return Ok(Rc::clone(existing));
        }
        let cache_key = state.provide_cache_key()?;
        let core = ObjectCore::new(
            Rc::downgrade(&self.state),
            Rc::clone(state.connection()),
            Some(id),
        );
        core.set_cache_key(cache_key);
        let record = Rc::new(RefCell::new(D::from_core(core)));
        state.by_id.insert(id, Rc::clone(&record));
        state.by_cache_key.insert(cache_key, Rc::clone(&record));
        trace!(cache_key, id, "cached object for existing row");
        Ok(record)
    }
}

/// Access to the identity map serving root type `R`.
///
/// A connection type wrapping [`DatabaseConnection`] implements this once
/// per root type it persists; handle constructors take any implementor.
pub trait HasIdentityMap<R: Root> {
    fn identity_map(&self) -> &IdentityMap<R>;
}

impl<R: Root> HasIdentityMap<R> for IdentityMap<R> {
    fn identity_map(&self) -> &IdentityMap<R> {
        self
    }
}
