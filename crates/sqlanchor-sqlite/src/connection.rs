//! Database connection.
//!
//! `DatabaseConnection` layers two services over the raw handle: a cache
//! of prepared statements keyed by their SQL text, and the nested
//! transaction counter that decides whether `begin`/`end`/`cancel`
//! translate to transaction commands or savepoint commands.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use sqlanchor_core::{Error, Result};
use tracing::{error, trace};

use crate::dbconn::SqliteHandle;
use crate::statement::{SqlStatement, StatementImpl};

/// Number of statement implementations cached per connection unless a
/// different capacity is requested at construction.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 300;

// The savepoint commands always reuse one name; SQLite keeps a stack of
// savepoints with the same name, so each release pops the innermost.
const SAVEPOINT_NAME: &str = "sp";

/// A connection to one SQLite database file.
///
/// The connection starts closed; call [`open`](Self::open) to bind it to a
/// file (created if absent). All statement preparation goes through the
/// statement cache, and transaction nesting is tracked here so that
/// [`crate::TransactionScope`] frames can be stacked arbitrarily.
pub struct DatabaseConnection {
    handle: Rc<SqliteHandle>,
    statement_cache: RefCell<HashMap<String, Rc<RefCell<StatementImpl>>>>,
    cache_capacity: usize,
    nesting: Cell<i32>,
    filepath: RefCell<Option<PathBuf>>,
}

impl DatabaseConnection {
    /// Initialize the engine and create a connection not yet bound to a
    /// file.
    pub fn new() -> Result<Self> {
        Self::with_cache_capacity(DEFAULT_STATEMENT_CACHE_CAPACITY)
    }

    /// Like [`new`](Self::new), but with an explicit statement-cache
    /// capacity. The capacity is fixed for the life of the connection.
    pub fn with_cache_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            handle: Rc::new(SqliteHandle::new()?),
            statement_cache: RefCell::new(HashMap::new()),
            cache_capacity: capacity,
            nesting: Cell::new(0),
            filepath: RefCell::new(None),
        })
    }

    /// True iff the connection is open against a database file.
    pub fn is_valid(&self) -> bool {
        self.handle.is_open()
    }

    /// Open the connection against `path`, creating the file if absent.
    /// Foreign key enforcement is switched on as part of opening.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.handle.open(path)?;
        let absolute = std::path::absolute(path)
            .map_err(|e| Error::Logic(format!("could not resolve database path: {e}")))?;
        *self.filepath.borrow_mut() = Some(absolute);
        Ok(())
    }

    /// Execute SQL directly, without parameters. Intended for DDL and
    /// other statements fully under the caller's control.
    pub fn execute_sql(&self, sql: &str) -> Result<()> {
        self.handle.execute(sql)
    }

    /// Create the two-row `booleans` table, usable as a foreign-key
    /// target for columns that must hold only 0 or 1.
    pub fn setup_boolean_table(&self) -> Result<()> {
        self.execute_sql("create table booleans(representation integer primary key)")?;
        self.execute_sql("insert into booleans(representation) values(0)")?;
        self.execute_sql("insert into booleans(representation) values(1)")?;
        Ok(())
    }

    /// Absolute path of the file this connection was opened against.
    pub fn filepath(&self) -> Result<PathBuf> {
        if !self.is_valid() {
            return Err(Error::InvalidConnection);
        }
        self.filepath
            .borrow()
            .clone()
            .ok_or(Error::InvalidConnection)
    }

    /// Maximum transaction nesting depth.
    pub fn max_nesting() -> i32 {
        i32::MAX
    }

    /// Fetch a statement for `text` from the cache, or prepare a new one.
    ///
    /// A cached statement is handed out only while nothing else is using
    /// it; concurrent requests for the same text each get their own
    /// implementation. Newly prepared statements are cached while
    /// capacity remains.
    pub(crate) fn provide_statement(&self, text: &str) -> Result<SqlStatement> {
        if !self.is_valid() {
            return Err(Error::InvalidConnection);
        }
        {
            let cache = self.statement_cache.borrow();
            if let Some(existing) = cache.get(text) {
                if !existing.borrow().is_locked() {
                    existing.borrow().lock();
                    trace!(text, "statement cache hit");
                    return Ok(SqlStatement::from_impl(Rc::clone(existing)));
                }
            }
        }
        trace!(text, "statement cache miss");
        let imp = Rc::new(RefCell::new(StatementImpl::new(
            Rc::clone(&self.handle),
            text,
        )?));
        imp.borrow().lock();
        let mut cache = self.statement_cache.borrow_mut();
        if cache.len() != self.cache_capacity {
            cache.insert(text.to_string(), Rc::clone(&imp));
        }
        Ok(SqlStatement::from_impl(imp))
    }

    /// Begin a transaction frame. The outermost frame issues `begin`;
    /// inner frames set a savepoint.
    pub(crate) fn begin_transaction(&self) -> Result<()> {
        match self.nesting.get() {
            0 => self.run_transaction_command("begin")?,
            level if level == Self::max_nesting() => {
                return Err(Error::TransactionNesting(
                    "maximum transaction nesting level reached".to_string(),
                ));
            }
            _ => self.run_transaction_command(&format!("savepoint {SAVEPOINT_NAME}"))?,
        }
        self.nesting.set(self.nesting.get() + 1);
        trace!(depth = self.nesting.get(), "transaction frame opened");
        Ok(())
    }

    /// Commit a transaction frame. The outermost frame issues `end`;
    /// inner frames release their savepoint.
    pub(crate) fn end_transaction(&self) -> Result<()> {
        match self.nesting.get() {
            1 => self.run_transaction_command("end")?,
            0 => {
                return Err(Error::TransactionNesting(
                    "cannot end a transaction when none is open".to_string(),
                ));
            }
            _ => self.run_transaction_command(&format!("release {SAVEPOINT_NAME}"))?,
        }
        self.nesting.set(self.nesting.get() - 1);
        trace!(depth = self.nesting.get(), "transaction frame committed");
        Ok(())
    }

    /// Cancel a transaction frame. The outermost frame rolls the whole
    /// transaction back; inner frames roll back to and release their
    /// savepoint.
    pub(crate) fn cancel_transaction(&self) -> Result<()> {
        match self.nesting.get() {
            1 => self.run_transaction_command("rollback")?,
            0 => {
                return Err(Error::TransactionNesting(
                    "cannot cancel a transaction when none is open".to_string(),
                ));
            }
            _ => {
                self.run_transaction_command(&format!(
                    "rollback to savepoint {SAVEPOINT_NAME}"
                ))?;
                self.run_transaction_command(&format!("release {SAVEPOINT_NAME}"))?;
            }
        }
        self.nesting.set(self.nesting.get() - 1);
        trace!(depth = self.nesting.get(), "transaction frame cancelled");
        Ok(())
    }

    fn run_transaction_command(&self, text: &str) -> Result<()> {
        let mut statement = self.provide_statement(text)?;
        statement.step()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_nesting_for_tests(&self, level: i32) {
        self.nesting.set(level);
    }

    #[cfg(test)]
    pub(crate) fn cached_statement_count(&self) -> usize {
        self.statement_cache.borrow().len()
    }
}

impl Drop for DatabaseConnection {
    fn drop(&mut self) {
        if self.nesting.get() > 0 {
            error!(
                depth = self.nesting.get(),
                "transactions remained incomplete on closure of connection"
            );
        }
        self.statement_cache.borrow_mut().clear();
    }
}
