//! Prepared statement wrapper.
//!
//! [`StatementImpl`] owns one engine-prepared statement together with the
//! lock flag that governs its reuse from the connection's statement cache.
//! [`SqlStatement`] is the public face: it borrows an implementation from
//! the cache on construction and returns it (reset, bindings cleared,
//! unlocked) on drop.

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString, c_int};
use std::rc::Rc;

use sqlanchor_core::{Error, Result};

use crate::connection::DatabaseConnection;
use crate::dbconn::SqliteHandle;
use crate::ffi;

#[derive(Debug)]
pub(crate) struct StatementImpl {
    stmt: *mut ffi::sqlite3_stmt,
    handle: Rc<SqliteHandle>,
    locked: Cell<bool>,
}

impl StatementImpl {
    /// Prepare a single SQL statement.
    ///
    /// `text` must hold exactly one statement, optionally followed by any
    /// mixture of semicolons and spaces. Anything else after the first
    /// statement is rejected.
    pub(crate) fn new(handle: Rc<SqliteHandle>, text: &str) -> Result<Self> {
        if !handle.is_open() {
            return Err(Error::InvalidConnection);
        }
        let c_text = CString::new(text)
            .map_err(|_| Error::Logic("SQL text contains an interior NUL byte".to_string()))?;
        let mut stmt: *mut ffi::sqlite3_stmt = std::ptr::null_mut();
        let mut tail: *const std::ffi::c_char = std::ptr::null();
        // SAFETY: all pointers are valid; nByte covers the terminating NUL.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                handle.raw(),
                c_text.as_ptr(),
                c_text.as_bytes_with_nul().len() as c_int,
                &mut stmt,
                &mut tail,
            )
        };
        handle.check(rc)?;
        // Whitespace-only input prepares "successfully" to a null
        // statement.
        if stmt.is_null() {
            return Err(Error::Logic("statement text contains no SQL".to_string()));
        }

        // SAFETY: on success tail points into c_text's buffer, at or before
        // its terminating NUL.
        let rest = unsafe { CStr::from_ptr(tail) };
        for &byte in rest.to_bytes() {
            match byte {
                b';' | b' ' => {}
                _ => {
                    // SAFETY: stmt was successfully prepared above.
                    unsafe { ffi::sqlite3_finalize(stmt) };
                    return Err(Error::TooManyStatements);
                }
            }
        }

        Ok(Self {
            stmt,
            handle,
            locked: Cell::new(false),
        })
    }

    fn parameter_index(&self, name: &str) -> Result<c_int> {
        let c_name = CString::new(name)
            .map_err(|_| Error::Logic("parameter name contains an interior NUL byte".to_string()))?;
        // SAFETY: stmt and c_name are valid.
        let index = unsafe { ffi::sqlite3_bind_parameter_index(self.stmt, c_name.as_ptr()) };
        if index == 0 {
            return Err(Error::NoSuchParameter {
                name: name.to_string(),
            });
        }
        Ok(index)
    }

    fn bind_i32(&self, index: c_int, value: i32) -> Result<()> {
        // SAFETY: stmt is valid; the engine range-checks the index.
        let rc = unsafe { ffi::sqlite3_bind_int(self.stmt, index, value) };
        self.handle.check(rc)
    }

    fn bind_i64(&self, index: c_int, value: i64) -> Result<()> {
        // SAFETY: as above.
        let rc = unsafe { ffi::sqlite3_bind_int64(self.stmt, index, value) };
        self.handle.check(rc)
    }

    fn bind_f64(&self, index: c_int, value: f64) -> Result<()> {
        // SAFETY: as above.
        let rc = unsafe { ffi::sqlite3_bind_double(self.stmt, index, value) };
        self.handle.check(rc)
    }

    fn bind_text(&self, index: c_int, value: &str) -> Result<()> {
        // SQLITE_TRANSIENT makes the engine copy the buffer before this
        // borrow ends.
        // SAFETY: value's bytes are valid for the duration of the call.
        let rc = unsafe {
            ffi::sqlite3_bind_text(
                self.stmt,
                index,
                value.as_ptr().cast(),
                value.len() as c_int,
                ffi::SQLITE_TRANSIENT,
            )
        };
        self.handle.check(rc)
    }

    fn step(&self) -> Result<bool> {
        if !self.handle.is_open() {
            return Err(Error::InvalidConnection);
        }
        // SAFETY: stmt is valid.
        let code = unsafe { ffi::sqlite3_step(self.stmt) };
        if let Err(e) = self.handle.check(code) {
            self.reset();
            self.clear_bindings();
            return Err(e);
        }
        match code {
            ffi::SQLITE_ROW => Ok(true),
            ffi::SQLITE_DONE => {
                self.reset();
                Ok(false)
            }
            other => Err(Error::Logic(format!(
                "sqlite3_step returned success code {other} that is neither ROW nor DONE"
            ))),
        }
    }

    fn step_final(&self) -> Result<()> {
        if self.step()? {
            self.reset();
            return Err(Error::UnexpectedResultRow);
        }
        Ok(())
    }

    fn check_column(&self, index: i32, value_type: c_int, expected: &'static str) -> Result<()> {
        // SAFETY: stmt is valid for all column inspection calls.
        let count = unsafe { ffi::sqlite3_column_count(self.stmt) };
        if count == 0 {
            return Err(Error::NoResultRow);
        }
        if index < 0 || index >= count {
            return Err(Error::IndexOutOfRange { index });
        }
        let actual = unsafe { ffi::sqlite3_column_type(self.stmt, index) };
        if actual != value_type {
            return Err(Error::ValueTypeMismatch { index, expected });
        }
        Ok(())
    }

    fn reset(&self) {
        if !self.stmt.is_null() {
            // SAFETY: stmt is valid; the return code repeats the last step
            // error and carries no new information.
            unsafe { ffi::sqlite3_reset(self.stmt) };
        }
    }

    fn clear_bindings(&self) {
        if !self.stmt.is_null() {
            // SAFETY: stmt is valid.
            unsafe { ffi::sqlite3_clear_bindings(self.stmt) };
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked.get()
    }

    pub(crate) fn lock(&self) {
        self.locked.set(true);
    }

    pub(crate) fn unlock(&self) {
        self.locked.set(false);
    }
}

impl Drop for StatementImpl {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            // SAFETY: stmt was prepared on a handle we still hold a
            // reference to. finalize always succeeds for our purposes.
            unsafe { ffi::sqlite3_finalize(self.stmt) };
        }
    }
}

/// A single prepared SQL statement, borrowed from a connection's
/// statement cache.
///
/// Bind parameters by name, call [`step`](Self::step) to advance, and
/// [`extract`](Self::extract) typed values from the current result row.
/// Dropping the statement resets it, clears its bindings and returns it to
/// the cache.
#[derive(Debug)]
pub struct SqlStatement {
    imp: Rc<RefCell<StatementImpl>>,
}

impl SqlStatement {
    /// Prepare (or fetch from the cache) a statement for `text` on
    /// `connection`.
    pub fn new(connection: &DatabaseConnection, text: &str) -> Result<Self> {
        connection.provide_statement(text)
    }

    pub(crate) fn from_impl(imp: Rc<RefCell<StatementImpl>>) -> Self {
        Self { imp }
    }

    /// Bind a value to the named parameter.
    ///
    /// On failure the statement is reset and its bindings cleared before
    /// the error is returned.
    pub fn bind<V: Bindable>(&mut self, name: &str, value: V) -> Result<()> {
        let index = self.imp.borrow().parameter_index(name);
        let outcome = match index {
            Ok(index) => value.bind_parameter(self, index),
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            let imp = self.imp.borrow();
            imp.reset();
            imp.clear_bindings();
        }
        outcome
    }

    /// Advance the statement. Returns `true` while result rows remain;
    /// on `false` the statement has been reset ready for re-execution.
    ///
    /// On failure the statement is reset and its bindings cleared before
    /// the error is returned.
    pub fn step(&mut self) -> Result<bool> {
        self.imp.borrow().step()
    }

    /// Advance the statement, expecting no result row; raises
    /// `UnexpectedResultRow` if one is produced.
    pub fn step_final(&mut self) -> Result<()> {
        self.imp.borrow().step_final()
    }

    /// Extract the value at `index` (starting at 0) from the current
    /// result row.
    pub fn extract<V: Extractable>(&self, index: i32) -> Result<V> {
        V::extract_column(self, index)
    }

    /// Reset the statement ready for re-execution. Bound parameters are
    /// retained.
    pub fn reset(&mut self) {
        self.imp.borrow().reset();
    }

    /// Clear all parameter bindings, setting them to NULL.
    pub fn clear_bindings(&mut self) {
        self.imp.borrow().clear_bindings();
    }

    fn with_impl<T>(&self, f: impl FnOnce(&StatementImpl) -> Result<T>) -> Result<T> {
        f(&self.imp.borrow())
    }
}

impl Drop for SqlStatement {
    fn drop(&mut self) {
        let imp = self.imp.borrow();
        imp.reset();
        imp.clear_bindings();
        imp.unlock();
    }
}

/// Types that can be bound to a statement parameter.
///
/// Implemented for the integer widths the engine's 64-bit integer column
/// can hold, plus floating point and text. Wider integer types have no
/// implementation, so binding them fails to compile.
pub trait Bindable {
    fn bind_parameter(self, statement: &mut SqlStatement, index: i32) -> Result<()>;
}

impl Bindable for i32 {
    fn bind_parameter(self, statement: &mut SqlStatement, index: i32) -> Result<()> {
        statement.with_impl(|imp| imp.bind_i32(index, self))
    }
}

impl Bindable for i64 {
    fn bind_parameter(self, statement: &mut SqlStatement, index: i32) -> Result<()> {
        statement.with_impl(|imp| imp.bind_i64(index, self))
    }
}

impl Bindable for f64 {
    fn bind_parameter(self, statement: &mut SqlStatement, index: i32) -> Result<()> {
        statement.with_impl(|imp| imp.bind_f64(index, self))
    }
}

impl Bindable for &str {
    fn bind_parameter(self, statement: &mut SqlStatement, index: i32) -> Result<()> {
        statement.with_impl(|imp| imp.bind_text(index, self))
    }
}

impl Bindable for &String {
    fn bind_parameter(self, statement: &mut SqlStatement, index: i32) -> Result<()> {
        statement.with_impl(|imp| imp.bind_text(index, self))
    }
}

/// Types that can be extracted from a result column.
pub trait Extractable: Sized {
    fn extract_column(statement: &SqlStatement, index: i32) -> Result<Self>;
}

impl Extractable for i32 {
    fn extract_column(statement: &SqlStatement, index: i32) -> Result<Self> {
        statement.with_impl(|imp| {
            imp.check_column(index, ffi::SQLITE_INTEGER, "integer")?;
            // SAFETY: check_column validated the row, index and type.
            Ok(unsafe { ffi::sqlite3_column_int(imp.stmt, index) })
        })
    }
}

impl Extractable for i64 {
    fn extract_column(statement: &SqlStatement, index: i32) -> Result<Self> {
        statement.with_impl(|imp| {
            imp.check_column(index, ffi::SQLITE_INTEGER, "integer")?;
            // SAFETY: as above.
            Ok(unsafe { ffi::sqlite3_column_int64(imp.stmt, index) })
        })
    }
}

impl Extractable for f64 {
    fn extract_column(statement: &SqlStatement, index: i32) -> Result<Self> {
        statement.with_impl(|imp| {
            imp.check_column(index, ffi::SQLITE_FLOAT, "real")?;
            // SAFETY: as above.
            Ok(unsafe { ffi::sqlite3_column_double(imp.stmt, index) })
        })
    }
}

impl Extractable for String {
    fn extract_column(statement: &SqlStatement, index: i32) -> Result<Self> {
        statement.with_impl(|imp| {
            imp.check_column(index, ffi::SQLITE_TEXT, "text")?;
            // SAFETY: check_column validated the row, index and type; the
            // pointer stays valid until the next statement operation.
            unsafe {
                let ptr = ffi::sqlite3_column_text(imp.stmt, index);
                let len = ffi::sqlite3_column_bytes(imp.stmt, index);
                if ptr.is_null() {
                    return Ok(String::new());
                }
                let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
        })
    }
}
