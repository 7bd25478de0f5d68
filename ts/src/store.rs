//! SQLite-backed record store

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::record::{Filter, IndexValue, Record};

/// Database file created inside the store directory
pub const DB_FILE_NAME: &str = "taskstore.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id INTEGER NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS record_indexes (
    collection TEXT NOT NULL,
    id INTEGER NOT NULL,
    field TEXT NOT NULL,
    value_str TEXT,
    value_int INTEGER,
    PRIMARY KEY (collection, id, field)
);
CREATE INDEX IF NOT EXISTS idx_record_indexes_str ON record_indexes (collection, field, value_str);
CREATE INDEX IF NOT EXISTS idx_record_indexes_int ON record_indexes (collection, field, value_int);
"#;

/// Persistent record store
///
/// Several processes may open the same directory; SQLite's WAL journal and
/// busy timeout serialize their writers. Every mutating method runs inside an
/// IMMEDIATE transaction so read-then-write sequences are atomic.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the store in `dir`
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        debug!(dir = %dir.display(), "Store::open: called");
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE_NAME);
        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(%mode, "Store::open: journal mode set");
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "Opened record store");
        Ok(Self { conn, path })
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new record, allocating an id when the record has none
    pub fn create<T: Record>(&mut self, mut record: T) -> StoreResult<i64> {
        let collection = T::collection_name();
        debug!(%collection, id = record.id(), "Store::create: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = if record.id() == 0 {
            let next: i64 = tx.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM records WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            debug!(%next, "Store::create: allocated id");
            next
        } else {
            record.id()
        };
        record.set_id(id);

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            debug!(%collection, %id, "Store::create: id already taken");
            return Err(StoreError::AlreadyExists { collection, id });
        }

        let data = serde_json::to_string(&record)?;
        tx.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, data, record.updated_at()],
        )?;
        write_indexes(&tx, &record)?;
        tx.commit()?;
        Ok(id)
    }

    /// Fetch a record by id
    pub fn get<T: Record>(&self, id: i64) -> StoreResult<Option<T>> {
        let collection = T::collection_name();
        debug!(%collection, %id, "Store::get: called");
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Overwrite an existing record
    pub fn update<T: Record>(&mut self, record: T) -> StoreResult<()> {
        let collection = T::collection_name();
        let id = record.id();
        debug!(%collection, %id, "Store::update: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let data = serde_json::to_string(&record)?;
        let rows = tx.execute(
            "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
            params![collection, id, data, record.updated_at()],
        )?;
        if rows == 0 {
            debug!(%collection, %id, "Store::update: no such record");
            return Err(StoreError::NotFound { collection, id });
        }
        write_indexes(&tx, &record)?;
        tx.commit()?;
        Ok(())
    }

    /// Overwrite a record only if its persisted `field` index still equals `expected`
    ///
    /// Returns `false` (and writes nothing) when another writer changed the
    /// field first or the record is gone.
    pub fn update_if<T: Record>(&mut self, record: T, field: &str, expected: &IndexValue) -> StoreResult<bool> {
        let collection = T::collection_name();
        let id = record.id();
        debug!(%collection, %id, %field, ?expected, "Store::update_if: called");
        let (column, value) = expected.column();
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let data = serde_json::to_string(&record)?;
        let sql = format!(
            "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2 AND EXISTS (\
             SELECT 1 FROM record_indexes i WHERE i.collection = ?1 AND i.id = ?2 AND i.field = ?5 AND i.{column} = ?6)"
        );
        let rows = tx.execute(&sql, params![collection, id, data, record.updated_at(), field, value])?;
        if rows == 0 {
            debug!(%collection, %id, %field, "Store::update_if: precondition failed");
            return Ok(false);
        }
        write_indexes(&tx, &record)?;
        tx.commit()?;
        Ok(true)
    }

    /// List records matching every filter, in ascending id order
    pub fn list<T: Record>(&self, filters: &[Filter]) -> StoreResult<Vec<T>> {
        let collection = T::collection_name();
        debug!(%collection, filter_count = filters.len(), "Store::list: called");
        let mut sql = String::from("SELECT r.data FROM records r WHERE r.collection = ?1");
        let mut values: Vec<SqlValue> = vec![SqlValue::Text(collection.to_string())];
        for filter in filters {
            let (column, value) = filter.value.column();
            values.push(SqlValue::Text(filter.field.clone()));
            let field_idx = values.len();
            values.push(value);
            let value_idx = values.len();
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM record_indexes i WHERE i.collection = r.collection AND i.id = r.id \
                 AND i.field = ?{field_idx} AND i.{column} {} ?{value_idx})",
                filter.op.sql()
            ));
        }
        sql.push_str(" ORDER BY r.id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for data in rows {
            records.push(serde_json::from_str(&data?)?);
        }
        debug!(%collection, count = records.len(), "Store::list: returning");
        Ok(records)
    }

    /// Delete a record and its index rows
    pub fn delete<T: Record>(&mut self, id: i64) -> StoreResult<()> {
        let collection = T::collection_name();
        debug!(%collection, %id, "Store::delete: called");
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound { collection, id });
        }
        tx.execute(
            "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Rewrite the index rows of every record in a collection
    pub fn rebuild_indexes<T: Record>(&mut self) -> StoreResult<usize> {
        let collection = T::collection_name();
        debug!(%collection, "Store::rebuild_indexes: called");
        let records: Vec<T> = self.list(&[])?;
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for record in &records {
            write_indexes(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }
}

fn write_indexes<T: Record>(tx: &Transaction<'_>, record: &T) -> StoreResult<()> {
    let collection = T::collection_name();
    let id = record.id();
    tx.execute(
        "DELETE FROM record_indexes WHERE collection = ?1 AND id = ?2",
        params![collection, id],
    )?;
    for (field, value) in record.indexed_fields() {
        let (value_str, value_int): (Option<String>, Option<i64>) = match value {
            IndexValue::String(s) => (Some(s), None),
            IndexValue::Int(i) => (None, Some(i)),
            IndexValue::Bool(b) => (None, Some(i64::from(b))),
        };
        tx.execute(
            "INSERT INTO record_indexes (collection, id, field, value_str, value_int) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![collection, id, field, value_str, value_int],
        )?;
    }
    Ok(())
}
