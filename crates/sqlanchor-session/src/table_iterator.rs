//! Streaming traversal of a table's rows as handles.

use std::marker::PhantomData;

use sqlanchor_core::{Id, Result};
use sqlanchor_sqlite::SqlStatement;

use crate::handle::Handle;
use crate::identity_map::HasIdentityMap;
use crate::persistent::{Persistent, Root};

/// An iterator over the rows of a table, yielding a [`Handle`] per row.
///
/// By default the iterator runs `select <pk> from <exclusive_table>`; a
/// custom SELECT can be supplied instead, in which case only its first
/// column is read and must hold primary keys of `T`. Each key is
/// materialized through the identity map without an existence probe,
/// since a key streamed out of the table is known to exist.
///
/// Errors while stepping or materializing are yielded once, after which
/// the iterator is exhausted and must not be relied on further.
pub struct TableIterator<'conn, C, T>
where
    T: Persistent,
    C: HasIdentityMap<T::Root>,
{
    connection: &'conn C,
    statement: Option<SqlStatement>,
    _marker: PhantomData<fn() -> T>,
}

impl<'conn, C, T> TableIterator<'conn, C, T>
where
    T: Persistent,
    C: HasIdentityMap<T::Root>,
{
    /// Iterate every primary key in `T`'s exclusive table.
    pub fn new(connection: &'conn C) -> Result<Self> {
        let text = format!(
            "select {} from {}",
            <T::Root as Root>::primary_key_name(),
            T::exclusive_table_name()
        );
        Self::with_sql(connection, &text)
    }

    /// Iterate the keys produced by a custom SELECT.
    pub fn with_sql(connection: &'conn C, text: &str) -> Result<Self> {
        let db = connection.identity_map().connection();
        let statement = SqlStatement::new(&db, text)?;
        Ok(Self {
            connection,
            statement: Some(statement),
            _marker: PhantomData,
        })
    }
}

impl<C, T> Iterator for TableIterator<'_, C, T>
where
    T: Persistent,
    C: HasIdentityMap<T::Root>,
{
    type Item = Result<Handle<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let statement = self.statement.as_mut()?;
        match statement.step() {
            Ok(true) => {}
            Ok(false) => {
                self.statement = None;
                return None;
            }
            Err(e) => {
                self.statement = None;
                return Some(Err(e));
            }
        }
        let id = match statement.extract::<Id>(0) {
            Ok(id) => id,
            Err(e) => {
                self.statement = None;
                return Some(Err(e));
            }
        };
        match Handle::create_unchecked(self.connection, id) {
            Ok(handle) => Some(Ok(handle)),
            Err(e) => {
                self.statement = None;
                Some(Err(e))
            }
        }
    }
}
