//! SQLite driver layer for sqlanchor.
//!
//! This crate owns everything that talks to the engine directly:
//!
//! - [`ffi`]: hand-written bindings to libsqlite3
//! - [`SqlStatement`]: a prepared statement with named-parameter binding
//!   and typed column extraction, recycled through a per-connection cache
//! - [`DatabaseConnection`]: one connection to one database file, with the
//!   statement cache and the nested-transaction counter
//! - [`TransactionScope`]: a frame that commits or rolls back on exit, and
//!   that nests to arbitrary depth via savepoints
//! - [`next_auto_key`]: prediction of the next auto-increment primary key
//!
//! The object layer in `sqlanchor-session` is built entirely on this
//! surface and never touches the FFI itself.

pub mod ffi;

mod connection;
mod dbconn;
mod next_key;
mod statement;
mod transaction;

pub use connection::{DEFAULT_STATEMENT_CACHE_CAPACITY, DatabaseConnection};
pub use next_key::next_auto_key;
pub use statement::{Bindable, Extractable, SqlStatement};
pub use transaction::TransactionScope;
