//! Prediction of the next auto-increment primary key.

use sqlanchor_core::{Error, Id, Result};

use crate::connection::DatabaseConnection;
use crate::statement::SqlStatement;

/// Predict the primary key the next row inserted into `table` will be
/// assigned.
///
/// The table must use a single-column `integer primary key autoincrement`;
/// with autoincrement the key is one more than the greatest key ever
/// assigned, so deleted rows never cause key reuse. A table that has never
/// allocated a key yields 1.
///
/// Note the prediction only holds if the insert actually happens before
/// any other insert into the same table, and that cancelling the enclosing
/// transaction returns the counter to its previous value.
pub fn next_auto_key(connection: &DatabaseConnection, table: &str) -> Result<Id> {
    // The sequence table itself only springs into existence once some
    // autoincrement table allocates its first key.
    let mut probe = SqlStatement::new(
        connection,
        "select name from sqlite_master where type = 'table' and name = 'sqlite_sequence'",
    )?;
    if !probe.step()? {
        return Ok(1);
    }
    drop(probe);

    let mut statement =
        SqlStatement::new(connection, "select seq from sqlite_sequence where name = :p")?;
    statement.bind(":p", table)?;
    if !statement.step()? {
        return Ok(1);
    }
    let seq: Id = statement.extract(0)?;
    if seq == Id::MAX {
        return Err(Error::TableSize {
            table: table.to_string(),
        });
    }
    Ok(seq + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_connection() -> DatabaseConnection {
        let conn = DatabaseConnection::new().unwrap();
        conn.open(":memory:").unwrap();
        conn
    }

    #[test]
    fn unopened_connection_is_rejected() {
        let conn = DatabaseConnection::new().unwrap();
        assert!(matches!(
            next_auto_key(&conn, "anything"),
            Err(Error::InvalidConnection)
        ));
    }

    #[test]
    fn fresh_database_predicts_one() {
        let conn = memory_connection();
        assert_eq!(next_auto_key(&conn, "missing_table").unwrap(), 1);
        conn.execute_sql("create table plain(a text)").unwrap();
        assert_eq!(next_auto_key(&conn, "plain").unwrap(), 1);
    }

    #[test]
    fn keys_advance_with_inserts_and_survive_deletes() {
        let conn = memory_connection();
        conn.execute_sql(
            "create table seqd(k integer primary key autoincrement, v text not null)",
        )
        .unwrap();
        assert_eq!(next_auto_key(&conn, "seqd").unwrap(), 1);

        conn.execute_sql("insert into seqd(v) values('a')").unwrap();
        conn.execute_sql("insert into seqd(v) values('b')").unwrap();
        conn.execute_sql("insert into seqd(v) values('c')").unwrap();
        assert_eq!(next_auto_key(&conn, "seqd").unwrap(), 4);

        // Deleting does not free keys for reuse.
        conn.execute_sql("delete from seqd where k = 2").unwrap();
        conn.execute_sql("delete from seqd where k = 3").unwrap();
        assert_eq!(next_auto_key(&conn, "seqd").unwrap(), 4);

        conn.execute_sql("insert into seqd(v) values('d')").unwrap();
        let mut stmt = SqlStatement::new(&conn, "select k from seqd where v = 'd'").unwrap();
        assert!(stmt.step().unwrap());
        assert_eq!(stmt.extract::<Id>(0).unwrap(), 4);
    }

    #[test]
    fn saturated_sequence_reports_table_size() {
        let conn = memory_connection();
        conn.execute_sql(
            "create table seqd(k integer primary key autoincrement, v text not null)",
        )
        .unwrap();
        conn.execute_sql("insert into seqd(v) values('a')").unwrap();
        conn.execute_sql(&format!(
            "update sqlite_sequence set seq = {} where name = 'seqd'",
            Id::MAX
        ))
        .unwrap();
        assert!(matches!(
            next_auto_key(&conn, "seqd"),
            Err(Error::TableSize { .. })
        ));
    }
}
