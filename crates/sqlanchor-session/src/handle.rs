//! Counted references to cached persistent objects.

use std::cell::{Ref, RefMut};
use std::marker::PhantomData;
use std::rc::Rc;

use sqlanchor_core::{Error, Id, Result};

use crate::identity_map::{HasIdentityMap, Record};
use crate::persistent::{Persistent, Root};

/// A counted reference to an object cached in an identity map.
///
/// Handles are the only way client code touches persistent objects.
/// Every live handle contributes one to the referent's handle count; when
/// the count drops to zero the identity map decides whether the object is
/// evicted or retained. A handle may also be null, bound to nothing.
///
/// Cloning increments the count (see [`try_clone`](Self::try_clone) for
/// the fallible form); moving a handle transfers its count. Two handles
/// compare equal iff they refer to the same underlying object.
///
/// Every handle operation, cloning and dropping included, briefly borrows
/// the referent to touch its counter. A borrow guard obtained through
/// [`borrow`](Self::borrow) or [`borrow_mut`](Self::borrow_mut) must
/// therefore not be alive when any handle to the same object is cloned or
/// dropped; the cell discipline panics on that misuse. In particular, a
/// drop that takes the count to zero may destroy the referent on the
/// spot, so no reference to the object may be held past it.
pub struct Handle<T: Persistent> {
    record: Option<Record<T::Root>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistent> Handle<T> {
    /// A null handle.
    pub fn null() -> Self {
        Self {
            record: None,
            _marker: PhantomData,
        }
    }

    /// Create a handle to a brand-new object, not yet persisted. The
    /// object is saved to the database if and when [`save`](Self::save)
    /// is called.
    pub fn new<C: HasIdentityMap<T::Root>>(connection: &C) -> Result<Self> {
        Self::bind(connection.identity_map().provide_new::<T>()?)
    }

    /// Create a handle to the object persisted with primary key `id`.
    /// Existence is verified against the database; a missing row yields
    /// `BadIdentifier`.
    pub fn by_id<C: HasIdentityMap<T::Root>>(connection: &C, id: Id) -> Result<Self> {
        Self::bind(connection.identity_map().provide_by_id::<T>(id)?)
    }

    /// Like [`by_id`](Self::by_id) without the existence probe. Only call
    /// this when the row is known to exist (a handle built for a missing
    /// row fails on first hydration instead of here).
    pub fn create_unchecked<C: HasIdentityMap<T::Root>>(connection: &C, id: Id) -> Result<Self> {
        Self::bind(connection.identity_map().provide_by_id_unchecked::<T>(id)?)
    }

    fn bind(record: Record<T::Root>) -> Result<Self> {
        record.borrow().core().increment_handles()?;
        Ok(Self {
            record: Some(record),
            _marker: PhantomData,
        })
    }

    /// True iff this handle is bound to an object.
    pub fn is_bound(&self) -> bool {
        self.record.is_some()
    }

    /// Borrow the referent for reading. Getters on the referent hydrate
    /// the object on first access.
    pub fn borrow(&self) -> Result<Ref<'_, T>> {
        let record = self.record.as_ref().ok_or(Error::UnboundHandle)?;
        Ref::filter_map(record.borrow(), T::from_root).map_err(|_| {
            Error::Logic("cached object has a different dynamic type than the handle".to_string())
        })
    }

    /// Borrow the referent for writing.
    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>> {
        let record = self.record.as_ref().ok_or(Error::UnboundHandle)?;
        RefMut::filter_map(record.borrow_mut(), T::from_root_mut).map_err(|_| {
            Error::Logic("cached object has a different dynamic type than the handle".to_string())
        })
    }

    /// Hydrate the referent now, rather than on first field access.
    pub fn load(&self) -> Result<()> {
        let record = self.record.as_ref().ok_or(Error::UnboundHandle)?;
        record.borrow_mut().load()
    }

    /// Save the referent (insert or update as appropriate).
    pub fn save(&self) -> Result<()> {
        let record = self.record.as_ref().ok_or(Error::UnboundHandle)?;
        record.borrow_mut().save()
    }

    /// Delete the referent's row and clear its id.
    pub fn remove(&self) -> Result<()> {
        let record = self.record.as_ref().ok_or(Error::UnboundHandle)?;
        record.borrow_mut().remove()
    }

    /// The referent's primary key.
    pub fn id(&self) -> Result<Id> {
        let record = self.record.as_ref().ok_or(Error::UnboundHandle)?;
        record.borrow().id()
    }

    /// Clone the handle, surfacing counter saturation as an error.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.record {
            None => Ok(Self::null()),
            Some(record) => Self::bind(Rc::clone(record)),
        }
    }

    pub(crate) fn record(&self) -> Option<&Record<T::Root>> {
        self.record.as_ref()
    }
}

impl<T: Persistent> Default for Handle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Persistent> Clone for Handle<T> {
    /// Increments the referent's handle count.
    ///
    /// Panics if the counter is saturated, which would take `u32::MAX`
    /// simultaneous handles; use [`try_clone`](Self::try_clone) to handle
    /// that case as an error.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(handle) => handle,
            Err(e) => panic!("could not clone handle: {e}"),
        }
    }
}

impl<T: Persistent> Drop for Handle<T> {
    fn drop(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };
        let hit_zero = record.borrow().core().decrement_handles();
        if !hit_zero {
            return;
        }
        let notify = {
            let object = record.borrow();
            let core = object.core();
            match (core.cache_key(), core.map()) {
                (Some(cache_key), Some(map)) => Some((cache_key, map)),
                _ => None,
            }
        };
        if let Some((cache_key, map)) = notify {
            map.borrow_mut().notify_nil_handles(cache_key);
        }
    }
}

impl<T: Persistent> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.record {
            Some(record) => write!(f, "Handle({:p})", Rc::as_ptr(record)),
            None => f.write_str("Handle(null)"),
        }
    }
}

impl<T: Persistent> PartialEq for Handle<T> {
    /// Handles are equal iff they refer to the same underlying object
    /// (two null handles are equal).
    fn eq(&self, other: &Self) -> bool {
        match (&self.record, &other.record) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Persistent> Eq for Handle<T> {}

/// Cross-cast between handle types sharing one root.
///
/// If the referent's dynamic type is `L`, the returned handle is bound to
/// the same object (with the count incremented); otherwise it is null.
/// A null input yields a null output.
pub fn handle_cast<L, R>(handle: &Handle<R>) -> Result<Handle<L>>
where
    L: Persistent,
    R: Persistent<Root = L::Root>,
{
    let Some(record) = handle.record() else {
        return Ok(Handle::null());
    };
    if L::from_root(&record.borrow()).is_none() {
        return Ok(Handle::null());
    }
    Handle::bind(Rc::clone(record))
}
