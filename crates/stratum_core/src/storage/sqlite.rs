//! SQLite storage backend.
//!
//! # Responsibility
//! - Map the flat record keyspace onto one `records` table.
//! - Implement every optional capability: batch writes ride native
//!   transactions, `LIKE prefix%` answers list/count, `BEGIN IMMEDIATE`
//!   backs the transactional extension.
//!
//! # Invariants
//! - The connection mutex is the single-writer lock: two physical writers
//!   never race on a key, and an open transaction holds the lock until it
//!   finishes.
//! - Schema version is tracked via `PRAGMA user_version`; record data is
//!   never touched before migrations succeed.

use super::{
    BatchStorage, QueryableStorage, Record, Storage, StorageError, StorageResult,
    StorageTransaction, TransactionalStorage,
};
use log::{error, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const RECORD_SELECT_SQL: &str = "SELECT
    key,
    data,
    version,
    created_at,
    updated_at
FROM records";

const RECORD_UPSERT_SQL: &str = "INSERT INTO records (
    key,
    data,
    version,
    created_at,
    updated_at
) VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(key) DO UPDATE SET
    data = excluded.data,
    version = excluded.version,
    created_at = excluded.created_at,
    updated_at = excluded.updated_at;";

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/0001_records.sql"),
}];

/// Single-connection SQLite backend.
///
/// `None` in the mutex marks the closed state.
pub struct SqliteStorage {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Opens a database file and applies pending migrations.
    ///
    /// # Side effects
    /// - Emits timed `storage_open` logging events.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with("file", || Connection::open(path))
    }

    /// Opens an in-memory database and applies pending migrations.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_with("memory", Connection::open_in_memory)
    }

    fn open_with(
        mode: &'static str,
        open: impl FnOnce() -> rusqlite::Result<Connection>,
    ) -> StorageResult<Self> {
        let started_at = Instant::now();
        info!("event=storage_open module=storage status=start mode={mode}");

        let result = open().map_err(StorageError::from).and_then(|mut conn| {
            bootstrap_connection(&mut conn)?;
            Ok(conn)
        });

        match result {
            Ok(conn) => {
                info!(
                    "event=storage_open module=storage status=ok mode={mode} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    conn: Mutex::new(Some(conn)),
                })
            }
            Err(err) => {
                error!(
                    "event=storage_open module=storage status=error mode={mode} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A poisoned lock still guards a usable connection; recover.
        self.conn.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> StorageResult<R>) -> StorageResult<R> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        f(conn)
    }
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> StorageResult<Record> {
        self.with_conn(|conn| query_record(conn, key))
    }

    fn set(&self, record: &Record) -> StorageResult<()> {
        self.with_conn(|conn| upsert_record(conn, record))
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.with_conn(|conn| delete_key(conn, key))
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        self.with_conn(|conn| {
            let found = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM records WHERE key = ?1);",
                params![key],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(found != 0)
        })
    }

    fn close(&self) -> StorageResult<()> {
        let mut guard = self.lock();
        match guard.take() {
            Some(conn) => {
                drop(conn);
                info!("event=storage_close module=storage status=ok");
                Ok(())
            }
            None => Err(StorageError::Closed),
        }
    }

    fn batch(&self) -> Option<&dyn BatchStorage> {
        Some(self)
    }

    fn queryable(&self) -> Option<&dyn QueryableStorage> {
        Some(self)
    }

    fn transactional(&self) -> Option<&dyn TransactionalStorage> {
        Some(self)
    }
}

impl BatchStorage for SqliteStorage {
    fn get_many(&self, keys: &[String]) -> StorageResult<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        self.with_conn(|conn| {
            let placeholders = vec!["?"; keys.len()].join(", ");
            let sql =
                format!("{RECORD_SELECT_SQL} WHERE key IN ({placeholders}) ORDER BY key ASC;");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(keys.iter()))?;

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(parse_record_row(row)?);
            }
            Ok(records)
        })
    }

    fn set_many(&self, records: &[Record]) -> StorageResult<()> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;

        let tx = conn.transaction()?;
        for record in records {
            upsert_record(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<()> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(StorageError::Closed)?;

        let tx = conn.transaction()?;
        for key in keys {
            delete_key(&tx, key)?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl QueryableStorage for SqliteStorage {
    fn list(&self, prefix: &str, limit: Option<u32>, offset: u32) -> StorageResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT key FROM records WHERE key LIKE ? ORDER BY key ASC");
            let mut bind_values: Vec<Value> = vec![Value::Text(format!("{prefix}%"))];

            if let Some(limit) = limit {
                sql.push_str(" LIMIT ?");
                bind_values.push(Value::Integer(i64::from(limit)));
                if offset > 0 {
                    sql.push_str(" OFFSET ?");
                    bind_values.push(Value::Integer(i64::from(offset)));
                }
            } else if offset > 0 {
                sql.push_str(" LIMIT -1 OFFSET ?");
                bind_values.push(Value::Integer(i64::from(offset)));
            }
            sql.push(';');

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;

            let mut keys = Vec::new();
            while let Some(row) = rows.next()? {
                keys.push(row.get::<_, String>(0)?);
            }
            Ok(keys)
        })
    }

    fn count(&self, prefix: &str) -> StorageResult<u64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM records WHERE key LIKE ?1;",
                params![format!("{prefix}%")],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

impl TransactionalStorage for SqliteStorage {
    fn begin<'a>(&'a self) -> StorageResult<Box<dyn StorageTransaction + 'a>> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StorageError::Closed)?;
        conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(Box::new(SqliteTransaction {
            guard,
            finished: false,
        }))
    }
}

/// Open change set over the single connection.
///
/// Holds the connection lock for its whole lifetime, which is what
/// serializes concurrent commits across the process.
struct SqliteTransaction<'a> {
    guard: MutexGuard<'a, Option<Connection>>,
    finished: bool,
}

impl SqliteTransaction<'_> {
    fn conn(&self) -> StorageResult<&Connection> {
        if self.finished {
            return Err(StorageError::TxClosed);
        }
        self.guard.as_ref().ok_or(StorageError::Closed)
    }
}

impl StorageTransaction for SqliteTransaction<'_> {
    fn get(&self, key: &str) -> StorageResult<Record> {
        query_record(self.conn()?, key)
    }

    fn set(&mut self, record: &Record) -> StorageResult<()> {
        upsert_record(self.conn()?, record)
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        delete_key(self.conn()?, key)
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.conn()?.execute_batch("COMMIT;")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(&mut self) -> StorageResult<()> {
        self.conn()?.execute_batch("ROLLBACK;")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(conn) = self.guard.as_ref() {
                let _ = conn.execute_batch("ROLLBACK;");
            }
        }
    }
}

fn bootstrap_connection(conn: &mut Connection) -> StorageResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}

fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

fn apply_migrations(conn: &mut Connection) -> StorageResult<()> {
    let current_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();

    if current_version > latest {
        return Err(StorageError::UnsupportedSchema {
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    Ok(())
}

fn query_record(conn: &Connection, key: &str) -> StorageResult<Record> {
    let mut stmt = conn.prepare(&format!("{RECORD_SELECT_SQL} WHERE key = ?1;"))?;
    let mut rows = stmt.query(params![key])?;

    if let Some(row) = rows.next()? {
        return parse_record_row(row);
    }
    Err(StorageError::NotFound {
        key: key.to_string(),
    })
}

fn upsert_record(conn: &Connection, record: &Record) -> StorageResult<()> {
    conn.execute(
        RECORD_UPSERT_SQL,
        params![
            record.key,
            record.data,
            record.version,
            record.created_at,
            record.updated_at,
        ],
    )?;
    Ok(())
}

fn delete_key(conn: &Connection, key: &str) -> StorageResult<()> {
    conn.execute("DELETE FROM records WHERE key = ?1;", params![key])?;
    Ok(())
}

fn parse_record_row(row: &Row<'_>) -> StorageResult<Record> {
    let key: String = row.get("key")?;
    let version: i64 = row.get("version")?;
    if version < 0 {
        return Err(StorageError::InvalidRecord {
            key,
            message: format!("negative version `{version}` in records.version"),
        });
    }

    Ok(Record {
        data: row.get("data")?,
        version,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        key,
    })
}
