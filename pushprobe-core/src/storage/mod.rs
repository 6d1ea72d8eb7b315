//! SQLite storage backend.
//!
//! One connection per process, shared behind a mutex. Every invariant the
//! core relies on is enforced by a single statement or a single transaction
//! on this connection, so several relay processes may share one database file.

use crate::{PushProbeError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Tables that must exist after schema bootstrap.
const REQUIRED_TABLES: [&str; 2] = ["devices", "test_runs"];

/// Thread-safe handle to the store.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) the database file and bootstrap the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Self::from_connection(conn)
    }

    /// Fresh in-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        storage.verify_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                platform TEXT NOT NULL CHECK (platform IN ('android', 'ios')),
                fcm_token TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (user_id, device_id)
            );

            CREATE TABLE IF NOT EXISTS test_runs (
                nonce TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING' CHECK (status IN ('PENDING', 'ACKED')),
                created_at INTEGER NOT NULL,
                acked_at INTEGER
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_devices_device_id
                ON devices(device_id);
            CREATE INDEX IF NOT EXISTS idx_devices_user_active
                ON devices(user_id, is_active);
            CREATE INDEX IF NOT EXISTS idx_test_runs_created_at
                ON test_runs(created_at);",
        )?;
        Ok(())
    }

    fn verify_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        let found: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN (?1, ?2)",
            rusqlite::params![REQUIRED_TABLES[0], REQUIRED_TABLES[1]],
            |row| row.get(0),
        )?;

        if found as usize != REQUIRED_TABLES.len() {
            return Err(PushProbeError::Storage(format!(
                "expected {} tables after bootstrap, found {}",
                REQUIRED_TABLES.len(),
                found
            )));
        }
        Ok(())
    }

    /// Cheap liveness probe against the connection.
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PushProbeError::Storage(format!("Lock error: {}", e)))
    }
}
