//! The persistent-object state machine.
//!
//! A persisted type embeds an [`ObjectCore`] and implements [`Persistent`]
//! and (for the root of its hierarchy) [`Root`]. The core tracks identity
//! (optional primary key plus the cache key assigned by the identity map),
//! the ghost/loading/loaded status and the handle count. The provided
//! methods on `Root` are the whole lifecycle: lazy hydration, saving of
//! new and existing rows, and removal, each wrapped in a transaction frame
//! and each falling back to a ghost on failure.
//!
//! # Lazy fields
//!
//! Store lazily loaded fields in an `Option` and have every getter and
//! setter call [`Root::load`] as its first statement. `load` is a no-op on
//! a loaded object and on an object with no id, so the call costs nothing
//! once hydrated; skipping it in a setter means a later hydration will
//! overwrite the in-memory change.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use sqlanchor_core::{Error, HandleCounter, Id, Result};
use sqlanchor_sqlite::{DatabaseConnection, SqlStatement, TransactionScope, next_auto_key};
use tracing::debug;

use crate::identity_map::MapState;

/// Hydration status of an in-memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStatus {
    /// Only identity is populated; lazy fields hold placeholders.
    Ghost,
    /// Hydration is in flight. Never observable by well-behaved callers.
    Loading,
    /// All persistent fields reflect a row snapshot or in-memory edits.
    Loaded,
}

/// Bookkeeping embedded in every persisted object.
///
/// Only an identity map can create one, which is what makes the map the
/// sole constructor of persistent objects: a concrete type's
/// [`Persistent::from_core`] cannot be called usefully by anything else.
pub struct ObjectCore<R: Root> {
    map: Weak<RefCell<MapState<R>>>,
    connection: Rc<DatabaseConnection>,
    id: Cell<Option<Id>>,
    cache_key: Cell<Option<Id>>,
    status: Cell<LoadingStatus>,
    handles: Cell<HandleCounter>,
}

impl<R: Root> ObjectCore<R> {
    pub(crate) fn new(
        map: Weak<RefCell<MapState<R>>>,
        connection: Rc<DatabaseConnection>,
        id: Option<Id>,
    ) -> Self {
        Self {
            map,
            connection,
            id: Cell::new(id),
            cache_key: Cell::new(None),
            status: Cell::new(LoadingStatus::Ghost),
            handles: Cell::new(0),
        }
    }

    /// The connection this object is persisted through.
    pub fn connection(&self) -> &Rc<DatabaseConnection> {
        &self.connection
    }

    /// The primary key, if the object corresponds to a row.
    pub fn id(&self) -> Option<Id> {
        self.id.get()
    }

    pub fn has_id(&self) -> bool {
        self.id.get().is_some()
    }

    pub(crate) fn set_id(&self, id: Id) {
        self.id.set(Some(id));
    }

    pub(crate) fn clear_id(&self) {
        self.id.set(None);
    }

    pub(crate) fn cache_key(&self) -> Option<Id> {
        self.cache_key.get()
    }

    pub(crate) fn set_cache_key(&self, key: Id) {
        self.cache_key.set(Some(key));
    }

    pub(crate) fn status(&self) -> LoadingStatus {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: LoadingStatus) {
        self.status.set(status);
    }

    pub(crate) fn map(&self) -> Option<Rc<RefCell<MapState<R>>>> {
        self.map.upgrade()
    }

    pub(crate) fn increment_handles(&self) -> Result<()> {
        let count = self.handles.get();
        if count == HandleCounter::MAX {
            return Err(Error::Overflow(
                "handle counter has reached its maximum value and cannot be \
                 safely incremented",
            ));
        }
        self.handles.set(count + 1);
        Ok(())
    }

    /// Returns true when the count transitions to zero.
    pub(crate) fn decrement_handles(&self) -> bool {
        match self.handles.get() {
            1 => {
                self.handles.set(0);
                true
            }
            0 => false,
            count => {
                self.handles.set(count - 1);
                false
            }
        }
    }

    pub(crate) fn is_orphaned(&self) -> bool {
        self.handles.get() == 0
    }

    pub(crate) fn has_high_handle_count(&self) -> bool {
        self.handles.get() >= HandleCounter::MAX - 2
    }
}

/// A type whose instances live in an identity map, either as the root of
/// its hierarchy or as one variant of a root enum.
///
/// For a standalone type, `Root = Self` and `from_root` always matches.
/// For a hierarchy, the root is an enum over the concrete variants; each
/// variant implements `Persistent` with `from_root` matching only itself,
/// which is what gives [`crate::handle_cast`] its checked downcast.
pub trait Persistent: Sized + 'static {
    /// The type under which instances are cached. The primary keys of
    /// every variant of a hierarchy live in the root's exclusive table.
    type Root: Root;

    /// Name of the table in which all and only primary keys of this type
    /// occur.
    fn exclusive_table_name() -> &'static str;

    /// Construct a ghost holding the given core.
    ///
    /// Called by the identity map with the map internally locked: the
    /// implementation must only build the value. It must not construct
    /// handles, touch the map, or execute SQL; lazy fields start as
    /// placeholders and are populated later by `do_load`.
    fn from_core(core: ObjectCore<Self::Root>) -> Self::Root;

    /// View a root value as this type, if it has this dynamic type.
    fn from_root(root: &Self::Root) -> Option<&Self>;

    /// Mutable counterpart of [`from_root`](Self::from_root).
    fn from_root_mut(root: &mut Self::Root) -> Option<&mut Self>;
}

/// The root of a persisted hierarchy: owner of the [`ObjectCore`] and of
/// the per-type load/save logic.
///
/// Implementors supply the `do_*` hooks; the provided methods are final in
/// spirit and should not be overridden.
///
/// `do_load` must not write to the database, and must leave the object
/// reloadable if it fails; `do_ghostify` must reset any state `do_load`
/// accumulates (for example, clear a Vec that `do_load` pushes into), so
/// that hydrating a ghost never duplicates. Returning `()` rather than a
/// `Result` from `do_ghostify` is what lets every failure path here fall
/// back to a ghost unconditionally.
pub trait Root: Persistent<Root = Self> {
    /// Name of the primary key column in the exclusive table. The column
    /// must be a single `integer primary key autoincrement`.
    fn primary_key_name() -> &'static str;

    /// Access the embedded core.
    fn core(&self) -> &ObjectCore<Self>;

    /// Populate all lazy fields from the row identified by the object's
    /// id. Wrapped in a transaction frame by [`load`](Self::load).
    fn do_load(&mut self) -> Result<()>;

    /// Write the object's state over its existing row.
    fn do_save_existing(&mut self) -> Result<()>;

    /// Insert the object as a new row. The insert must produce a complete
    /// row; objects are not saved a piece at a time.
    fn do_save_new(&mut self) -> Result<()>;

    /// Delete the object's row. The default deletes from the exclusive
    /// table by primary key.
    fn do_remove(&mut self) -> Result<()> {
        let text = format!(
            "delete from {} where {} = :p",
            Self::exclusive_table_name(),
            Self::primary_key_name()
        );
        let mut statement = SqlStatement::new(self.core().connection(), &text)?;
        statement.bind(":p", self.id()?)?;
        statement.step_final()
    }

    /// Reset lazy state so the object can be rehydrated. The default does
    /// nothing.
    fn do_ghostify(&mut self) {}

    /// The primary key, or `UninitializedId` if the object has none.
    fn id(&self) -> Result<Id> {
        self.core().id().ok_or(Error::UninitializedId)
    }

    /// True iff the object has an id. The id need not exist in the
    /// database.
    fn has_id(&self) -> bool {
        self.core().has_id()
    }

    /// Hydrate the object if it is a ghost with an id; otherwise do
    /// nothing.
    ///
    /// On failure the object is ghostified, the transaction frame is
    /// cancelled and the error is returned, leaving the object loadable
    /// again.
    fn load(&mut self) -> Result<()> {
        match self.core().status() {
            LoadingStatus::Loaded => return Ok(()),
            LoadingStatus::Loading => {
                return Err(Error::Logic(
                    "load re-entered while the object is already loading".to_string(),
                ));
            }
            LoadingStatus::Ghost => {}
        }
        if !self.has_id() {
            return Ok(());
        }
        let connection = Rc::clone(self.core().connection());
        let frame = TransactionScope::new(&connection)?;
        self.core().set_status(LoadingStatus::Loading);
        match self.do_load() {
            Ok(()) => match frame.commit() {
                Ok(()) => {
                    self.core().set_status(LoadingStatus::Loaded);
                    Ok(())
                }
                Err(e) => {
                    self.ghostify();
                    Err(e)
                }
            },
            Err(e) => {
                self.ghostify();
                frame.cancel()?;
                Err(e)
            }
        }
    }

    /// Write the object to the database.
    ///
    /// With an id, the existing row is updated (the object is hydrated
    /// first, so a setter that skipped [`load`](Self::load) loses its
    /// edit). Without an id, a new row is inserted, the freshly assigned
    /// key is registered with the identity map and recorded on the
    /// object. Either way the object is left loaded on success and a
    /// ghost on failure, with the transaction frame rolled back.
    fn save(&mut self) -> Result<()> {
        let cache_key = self.core().cache_key().ok_or_else(|| {
            Error::Logic("object being saved was not provided by an identity map".to_string())
        })?;
        let connection = Rc::clone(self.core().connection());
        if self.has_id() {
            self.load()?;
            let frame = TransactionScope::new(&connection)?;
            match self.do_save_existing() {
                Ok(()) => {
                    if let Err(e) = frame.commit() {
                        self.ghostify();
                        return Err(e);
                    }
                }
                Err(e) => {
                    self.ghostify();
                    frame.cancel()?;
                    return Err(e);
                }
            }
            debug!(
                table = Self::exclusive_table_name(),
                id = self.core().id(),
                "updated existing row"
            );
        } else {
            let map = self.core().map().ok_or_else(|| {
                Error::Logic("identity map for object being saved no longer exists".to_string())
            })?;
            let allocated = self.prospective_key()?;
            let frame = TransactionScope::new(&connection)?;
            if let Err(e) = self.do_save_new() {
                self.core().clear_id();
                frame.cancel()?;
                return Err(e);
            }
            if let Err(e) = map.borrow_mut().register_id(cache_key, allocated) {
                self.core().clear_id();
                frame.cancel()?;
                return Err(e);
            }
            if let Err(e) = frame.commit() {
                map.borrow_mut().deregister_id(allocated);
                self.core().clear_id();
                return Err(e);
            }
            self.core().set_id(allocated);
            debug!(
                table = Self::exclusive_table_name(),
                id = allocated,
                "inserted new row"
            );
        }
        self.core().set_status(LoadingStatus::Loaded);
        Ok(())
    }

    /// Delete the object's row. A no-op if the object has no id.
    ///
    /// On success the identity map drops the object from its id index
    /// (retaining it under its cache key while handles remain) and the
    /// in-memory id is cleared. Other attributes are untouched.
    fn remove(&mut self) -> Result<()> {
        if !self.has_id() {
            return Ok(());
        }
        let connection = Rc::clone(self.core().connection());
        let frame = TransactionScope::new(&connection)?;
        match self.do_remove() {
            Ok(()) => {
                if let Err(e) = frame.commit() {
                    self.ghostify();
                    return Err(e);
                }
            }
            Err(e) => {
                self.ghostify();
                frame.cancel()?;
                return Err(e);
            }
        }
        debug!(
            table = Self::exclusive_table_name(),
            id = self.core().id(),
            "deleted row"
        );
        if let Some(map) = self.core().map() {
            if let Some(id) = self.core().id() {
                map.borrow_mut().deregister_id(id);
            }
        }
        self.core().clear_id();
        Ok(())
    }

    /// Revert to a ghost: run [`do_ghostify`](Self::do_ghostify), then
    /// mark the object as holding identity only.
    fn ghostify(&mut self) {
        self.do_ghostify();
        self.core().set_status(LoadingStatus::Ghost);
    }

    /// The id this object would be assigned if saved now.
    fn prospective_key(&self) -> Result<Id> {
        if self.has_id() {
            return Err(Error::Logic(
                "object already has an id, so a prospective key does not apply".to_string(),
            ));
        }
        next_auto_key(self.core().connection(), Self::exclusive_table_name())
    }
}

/// True iff a row with primary key `id` exists in `T`'s exclusive table.
///
/// The database is always consulted, never the identity map.
pub fn exists<T: Persistent>(connection: &DatabaseConnection, id: Id) -> Result<bool> {
    let text = format!(
        "select * from {} where {} = :p",
        T::exclusive_table_name(),
        <T::Root as Root>::primary_key_name()
    );
    let mut statement = SqlStatement::new(connection, &text)?;
    statement.bind(":p", id)?;
    statement.step()
}

/// True iff no objects of type `T` are saved in the database.
///
/// The database is always consulted, never the identity map.
pub fn none_saved<T: Persistent>(connection: &DatabaseConnection) -> Result<bool> {
    let text = format!("select * from {}", T::exclusive_table_name());
    let mut statement = SqlStatement::new(connection, &text)?;
    Ok(!statement.step()?)
}
