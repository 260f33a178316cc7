//! Identity-mapped, lazily loaded persistent objects over SQLite.
//!
//! sqlanchor keeps at most one live in-memory object per database row, so
//! edits through different references can never diverge. Objects are
//! created as ghosts carrying only identity, hydrated on first field
//! access, and written back inside transaction frames that nest to
//! arbitrary depth, falling back to a ghost on any failure.
//!
//! The workspace splits into three layers, all re-exported here:
//!
//! - `sqlanchor-core`: the [`Id`] and [`Error`] vocabulary
//! - `sqlanchor-sqlite`: [`DatabaseConnection`], [`SqlStatement`],
//!   [`TransactionScope`] and [`next_auto_key`]
//! - `sqlanchor-session`: [`IdentityMap`], the [`Persistent`]/[`Root`]
//!   traits, [`Handle`] and [`TableIterator`]
//!
//! # Defining a persisted type
//!
//! A persisted type embeds an [`ObjectCore`], implements [`Persistent`]
//! (identity and construction) and [`Root`] (table metadata plus the
//! `do_load`/`do_save_new`/`do_save_existing` hooks), and is only ever
//! handled through [`Handle`]s obtained from a connection type that
//! implements [`HasIdentityMap`] for it. The integration tests in this
//! crate contain a complete example domain, including an enum root
//! hierarchy with checked [`handle_cast`] downcasts.

pub use sqlanchor_core::{Error, HandleCounter, Id, Result, SqliteError, SqliteErrorKind};
pub use sqlanchor_session::{
    Handle, HasIdentityMap, IdentityMap, LoadingStatus, ObjectCore, Persistent, Root, TableIterator,
    exists, handle_cast, none_saved,
};
pub use sqlanchor_sqlite::{
    Bindable, DEFAULT_STATEMENT_CACHE_CAPACITY, DatabaseConnection, Extractable, SqlStatement,
    TransactionScope, next_auto_key,
};
