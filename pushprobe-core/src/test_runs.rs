//! Test-run acknowledgment state machine.
//!
//! A run is created `PENDING` by a tagged dispatch and moves to `ACKED`
//! exactly once. The transition is one conditional `UPDATE`; zero affected
//! rows means either the nonce never existed or it was already acknowledged.
//! Both surface as the same `NotFound`, so a replayed ack cannot be told
//! apart from an unknown nonce.

use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, info};

use crate::models::{from_unix, TestRun, TestRunStatus};
use crate::storage::Storage;
use crate::{is_constraint_violation, PushProbeError, Result};

#[derive(Clone)]
pub struct TestRuns {
    storage: Storage,
}

impl TestRuns {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Insert a `PENDING` run. A reused nonce is a conflict.
    pub fn create_pending(&self, nonce: &str, user_id: &str) -> Result<()> {
        if nonce.is_empty() || user_id.is_empty() {
            return Err(PushProbeError::Validation(
                "missing required fields: nonce, user_id".to_string(),
            ));
        }

        let conn = self.storage.conn()?;
        conn.execute(
            "INSERT INTO test_runs (nonce, user_id, status, created_at) VALUES (?1, ?2, 'PENDING', ?3)",
            rusqlite::params![nonce, user_id, Utc::now().timestamp()],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                PushProbeError::Conflict(format!("test run already exists: nonce={}", nonce))
            } else {
                e.into()
            }
        })?;

        info!(nonce, user_id, "created test run");
        Ok(())
    }

    /// The only legal transition: `PENDING` to `ACKED`.
    pub fn acknowledge(&self, nonce: &str) -> Result<()> {
        if nonce.is_empty() {
            return Err(PushProbeError::Validation(
                "missing required field: nonce".to_string(),
            ));
        }

        let conn = self.storage.conn()?;
        let changed = conn.execute(
            "UPDATE test_runs SET status = 'ACKED', acked_at = ?1
             WHERE nonce = ?2 AND status = 'PENDING'",
            rusqlite::params![Utc::now().timestamp(), nonce],
        )?;

        if changed == 0 {
            debug!(nonce, "ack matched no pending run");
            return Err(PushProbeError::NotFound(
                "test run not found or already acknowledged".to_string(),
            ));
        }

        info!(nonce, "test run acknowledged");
        Ok(())
    }

    pub fn get_status(&self, nonce: &str) -> Result<TestRun> {
        if nonce.is_empty() {
            return Err(PushProbeError::Validation(
                "missing required parameter: nonce".to_string(),
            ));
        }

        let conn = self.storage.conn()?;
        let row: Option<(String, String, Option<i64>)> = conn
            .query_row(
                "SELECT nonce, status, acked_at FROM test_runs WHERE nonce = ?1",
                [nonce],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (nonce, status, acked_at) =
            row.ok_or_else(|| PushProbeError::NotFound("test run not found".to_string()))?;
        let status: TestRunStatus = status.parse()?;

        Ok(TestRun {
            nonce,
            status,
            acked_at: match status {
                TestRunStatus::Acked => acked_at.map(from_unix),
                TestRunStatus::Pending => None,
            },
        })
    }

    /// Delete runs created before `cutoff` (Unix seconds). Returns the count.
    pub fn prune_created_before(&self, cutoff: i64) -> Result<usize> {
        let conn = self.storage.conn()?;
        let removed = conn.execute("DELETE FROM test_runs WHERE created_at < ?1", [cutoff])?;
        Ok(removed)
    }
}
