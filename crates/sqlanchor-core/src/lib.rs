//! Core types shared by every sqlanchor crate.
//!
//! This crate holds the process-wide identifier aliases and the error
//! enum. It deliberately has no SQLite dependency so that the session
//! layer can name error kinds without pulling in the driver.

pub mod error;
pub mod id;

pub use error::{Error, Result, SqliteError, SqliteErrorKind};
pub use id::{HandleCounter, Id};
