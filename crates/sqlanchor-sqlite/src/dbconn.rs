//! Raw connection handle.
//!
//! `SqliteHandle` owns the `sqlite3*` and nothing else: open/close
//! lifecycle, direct SQL execution and the translation of engine result
//! codes into error values. The statement cache and transaction machinery
//! live a layer up in [`crate::connection::DatabaseConnection`].

use std::cell::Cell;
use std::ffi::{CStr, CString, c_int};
use std::path::Path;
use std::ptr;

use sqlanchor_core::{Error, Result, SqliteError, SqliteErrorKind};
use tracing::{debug, error};

use crate::ffi;

#[derive(Debug)]
pub(crate) struct SqliteHandle {
    db: Cell<*mut ffi::sqlite3>,
}

impl SqliteHandle {
    /// Initialize the engine and create a handle not yet connected to any
    /// file.
    pub(crate) fn new() -> Result<Self> {
        // SAFETY: sqlite3_initialize is safe to call any number of times.
        let rc = unsafe { ffi::sqlite3_initialize() };
        if rc != ffi::SQLITE_OK {
            return Err(Error::Sqlite(SqliteError {
                kind: SqliteErrorKind::from_code(rc).unwrap_or(SqliteErrorKind::Generic),
                message: format!("SQLite could not be initialized: {}", ffi::error_string(rc)),
            }));
        }
        Ok(Self {
            db: Cell::new(ptr::null_mut()),
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.db.get().is_null()
    }

    pub(crate) fn raw(&self) -> *mut ffi::sqlite3 {
        self.db.get()
    }

    /// Open the handle against `path`, creating the file if absent, and
    /// enable foreign key enforcement.
    pub(crate) fn open(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidFilename);
        }
        if self.is_open() {
            return Err(Error::MultipleConnection);
        }
        let c_path = CString::new(path.to_str().ok_or(Error::InvalidFilename)?)
            .map_err(|_| Error::InvalidFilename)?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: c_path is a valid NUL-terminated string and db is a valid
        // out-pointer.
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_path.as_ptr(),
                &mut db,
                ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
                ptr::null(),
            )
        };
        if rc != ffi::SQLITE_OK {
            let message = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is a valid handle that failed to open; errmsg
                // returns a valid C string and close releases it.
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(match SqliteErrorKind::from_code(rc) {
                Some(kind) => Error::Sqlite(SqliteError { kind, message }),
                None => Error::UnknownSqliteCode { code: rc, message },
            });
        }
        self.db.set(db);
        self.execute("pragma foreign_keys = on;")?;
        debug!(path = %path.display(), "opened database");
        Ok(())
    }

    /// Execute one or more SQL statements directly, without parameters.
    pub(crate) fn execute(&self, sql: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::InvalidConnection);
        }
        let c_sql = CString::new(sql)
            .map_err(|_| Error::Logic("SQL text contains an interior NUL byte".to_string()))?;
        // SAFETY: the handle is open and c_sql is valid; no callback or
        // out-parameters are used.
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.db.get(),
                c_sql.as_ptr(),
                None,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        self.check(rc)
    }

    /// Translate an engine result code, raising on anything other than
    /// OK, ROW or DONE.
    ///
    /// The code passed must be the one produced by the most recent engine
    /// call on this handle; a mismatch means the caller lost track of what
    /// it executed and is reported as a logic error rather than being
    /// wrapped as an engine failure.
    pub(crate) fn check(&self, code: c_int) -> Result<()> {
        if !self.is_open() {
            return Err(Error::InvalidConnection);
        }
        match code {
            ffi::SQLITE_OK | ffi::SQLITE_DONE | ffi::SQLITE_ROW => return Ok(()),
            _ => {}
        }
        // SAFETY: the handle is open.
        let latest = unsafe { ffi::sqlite3_errcode(self.db.get()) };
        if code != latest {
            return Err(Error::Logic(format!(
                "result code {code} does not correspond to the latest engine \
                 error code {latest} on this connection"
            )));
        }
        // SAFETY: the handle is open; errmsg returns a valid C string.
        let message = unsafe {
            let ptr = ffi::sqlite3_errmsg(self.db.get());
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        Err(match SqliteErrorKind::from_code(code) {
            Some(kind) => Error::Sqlite(SqliteError { kind, message }),
            None => Error::UnknownSqliteCode { code, message },
        })
    }
}

impl Drop for SqliteHandle {
    fn drop(&mut self) {
        let db = self.db.get();
        if !db.is_null() {
            // SAFETY: every statement holds its own reference to this
            // handle, so by the time we get here they have all been
            // finalized.
            let rc = unsafe { ffi::sqlite3_close(db) };
            if rc != ffi::SQLITE_OK {
                error!(code = rc, "could not close SQLite connection cleanly");
            }
        }
        // sqlite3_shutdown is deliberately not called here: it deinitializes
        // the whole library, which is unsound while any other connection in
        // the process is live. Deinitialization is left to process exit.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filename_is_rejected() {
        let handle = SqliteHandle::new().unwrap();
        assert!(matches!(
            handle.open(Path::new("")),
            Err(Error::InvalidFilename)
        ));
    }

    #[test]
    fn double_open_is_rejected() {
        let handle = SqliteHandle::new().unwrap();
        handle.open(Path::new(":memory:")).unwrap();
        assert!(matches!(
            handle.open(Path::new(":memory:")),
            Err(Error::MultipleConnection)
        ));
    }

    #[test]
    fn execute_requires_open_handle() {
        let handle = SqliteHandle::new().unwrap();
        assert!(matches!(
            handle.execute("create table t(a)"),
            Err(Error::InvalidConnection)
        ));
    }

    #[test]
    fn execute_reports_engine_errors() {
        let handle = SqliteHandle::new().unwrap();
        handle.open(Path::new(":memory:")).unwrap();
        let err = handle.execute("not valid sql").unwrap_err();
        assert!(matches!(err, Error::Sqlite(_)));
    }
}
