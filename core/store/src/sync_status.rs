//! Sync status tracking: eligibility selection, statistics, reconciliation.
//!
//! A message is eligible for a push attempt iff its status row has
//! `synced_at IS NULL AND retry_count < max_retries`. Setting `synced_at` is
//! the only transition out of the eligible set on the success path and
//! happens at most once per message.

use chrono::Utc;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::{debug, info};

use meterlog_common::Result;

use crate::db::{db_err, UsageDb};
use crate::models::{MessageRecord, SyncStats, SyncStatusRow};

/// SQLite's default bound-parameter limit is 999; stay well under it when
/// expanding IN lists.
pub(crate) const MAX_IN_PARAMS: usize = 500;

/// `?, ?, ?` placeholder list for an IN clause of `n` parameters.
pub(crate) fn in_placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One group of failed messages sharing the same recorded outcome string.
///
/// Grouping by identical error keeps the number of UPDATE statements
/// proportional to distinct causes, not batch size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureGroup {
    /// Full `failed: <code> - <message>` outcome string.
    pub response: String,
    pub message_ids: Vec<String>,
}

/// The set operations to apply for one transmitted batch.
///
/// The three id sets are disjoint and their union covers the batch; the
/// reconciler enforces that before handing the plan to the store.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub persisted: Vec<String>,
    pub deduplicated: Vec<String>,
    pub failed: Vec<FailureGroup>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.persisted.is_empty() && self.deduplicated.is_empty() && self.failed.is_empty()
    }

    pub fn succeeded_count(&self) -> usize {
        self.persisted.len() + self.deduplicated.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.iter().map(|g| g.message_ids.len()).sum()
    }
}

impl UsageDb {
    /// Create missing sync_status rows for all messages.
    ///
    /// Rows are created lazily here rather than eagerly at ingestion, so the
    /// ingestion pipeline never has to know about sync state.
    fn ensure_status_rows(&self) -> Result<()> {
        let created = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO sync_status (message_id) SELECT id FROM messages",
                [],
            )
            .map_err(db_err)?;
        if created > 0 {
            debug!("Created {} sync status rows", created);
        }
        Ok(())
    }

    /// Select up to `batch_size` eligible messages, oldest first.
    ///
    /// FIFO-by-timestamp ordering keeps delivery approximately in original
    /// order and makes partial-failure diagnosis reproducible.
    pub fn select_eligible(&self, batch_size: usize, max_retries: u32) -> Result<Vec<MessageRecord>> {
        self.ensure_status_rows()?;

        let sql = format!(
            "SELECT {} FROM messages m \
             JOIN sync_status s ON s.message_id = m.id \
             WHERE s.synced_at IS NULL AND s.retry_count < ?1 \
             ORDER BY m.timestamp ASC \
             LIMIT ?2",
            MessageRecord::COLUMNS
                .split(", ")
                .map(|c| format!("m.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![max_retries, batch_size as i64],
                MessageRecord::from_row,
            )
            .map_err(db_err)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(db_err)?);
        }
        Ok(messages)
    }

    /// Number of messages currently eligible for a push attempt.
    pub fn eligible_count(&self, max_retries: u32) -> Result<u64> {
        self.ensure_status_rows()?;
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sync_status \
                 WHERE synced_at IS NULL AND retry_count < ?1",
                [max_retries],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as u64)
    }

    /// Read-only statistics projection over committed state.
    pub fn sync_stats(&self) -> Result<SyncStats> {
        self.ensure_status_rows()?;

        let total = self.message_count()?;
        let synced: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sync_status WHERE synced_at IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT retry_count, COUNT(*) FROM sync_status \
                 WHERE synced_at IS NULL \
                 GROUP BY retry_count ORDER BY retry_count ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as u64)))
            .map_err(db_err)?;

        let mut retry_histogram = Vec::new();
        for row in rows {
            retry_histogram.push(row.map_err(db_err)?);
        }

        Ok(SyncStats {
            total,
            synced: synced as u64,
            unsynced: total.saturating_sub(synced as u64),
            retry_histogram,
        })
    }

    /// Fetch the sync status row for one message.
    pub fn sync_status(&self, message_id: &str) -> Result<Option<SyncStatusRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT message_id, synced_at, retry_count, sync_response \
                 FROM sync_status WHERE message_id = ?1",
            )
            .map_err(db_err)?;

        let row = stmt.query_row([message_id], |row| {
            Ok(SyncStatusRow {
                message_id: row.get(0)?,
                synced_at: row.get(1)?,
                retry_count: row.get(2)?,
                sync_response: row.get(3)?,
            })
        });

        match row {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Reset retry state for unsynchronized messages (force mode).
    ///
    /// Only rows with `synced_at IS NULL` are touched; a synced record is
    /// never made eligible again. Returns the number of rows reset.
    pub fn reset_retries(&mut self, scope: Option<&[String]>) -> Result<usize> {
        self.ensure_status_rows()?;

        let reset = match scope {
            None => self
                .conn
                .execute(
                    "UPDATE sync_status SET retry_count = 0, sync_response = NULL \
                     WHERE synced_at IS NULL",
                    [],
                )
                .map_err(db_err)?,
            Some(ids) => {
                // One transaction across the chunked updates; a scoped reset
                // either applies in full or not at all.
                let tx = self.conn.transaction().map_err(db_err)?;
                let mut reset = 0;
                for chunk in ids.chunks(MAX_IN_PARAMS) {
                    let sql = format!(
                        "UPDATE sync_status SET retry_count = 0, sync_response = NULL \
                         WHERE synced_at IS NULL AND message_id IN ({})",
                        in_placeholders(chunk.len())
                    );
                    reset += tx.execute(&sql, params_from_iter(chunk)).map_err(db_err)?;
                }
                tx.commit().map_err(db_err)?;
                reset
            }
        };

        info!("Reset retry state for {} messages", reset);
        Ok(reset)
    }

    /// Apply one batch's reconciliation plan in a single transaction.
    ///
    /// Either every row for the batch updates, or none do. Success updates
    /// are guarded by `synced_at IS NULL` so a previously synced row can
    /// never be rewritten.
    pub fn apply_reconcile_plan(&mut self, plan: &ReconcilePlan) -> Result<()> {
        // The guarded UPDATEs match zero rows for a message without a status
        // row, which would silently discard its verdict.
        self.ensure_status_rows()?;

        let now = now_millis();
        let tx = self.conn.transaction().map_err(db_err)?;

        for (ids, response) in [
            (&plan.persisted, "persisted"),
            (&plan.deduplicated, "deduplicated"),
        ] {
            for chunk in ids.chunks(MAX_IN_PARAMS) {
                let sql = format!(
                    "UPDATE sync_status SET synced_at = ?1, sync_response = ?2 \
                     WHERE synced_at IS NULL AND message_id IN ({})",
                    in_placeholders(chunk.len())
                );
                let params = params_from_iter(
                    [Value::Integer(now), Value::Text(response.to_string())]
                        .into_iter()
                        .chain(chunk.iter().map(|id| Value::Text(id.clone()))),
                );
                tx.execute(&sql, params).map_err(db_err)?;
            }
        }

        for group in &plan.failed {
            for chunk in group.message_ids.chunks(MAX_IN_PARAMS) {
                let sql = format!(
                    "UPDATE sync_status \
                     SET retry_count = retry_count + 1, sync_response = ?1 \
                     WHERE synced_at IS NULL AND message_id IN ({})",
                    in_placeholders(chunk.len())
                );
                let params = params_from_iter(
                    std::iter::once(Value::Text(group.response.clone()))
                        .chain(chunk.iter().map(|id| Value::Text(id.clone()))),
                );
                tx.execute(&sql, params).map_err(db_err)?;
            }
        }

        tx.commit().map_err(db_err)?;
        debug!(
            "Reconciled batch: {} succeeded, {} failed",
            plan.succeeded_count(),
            plan.failed_count()
        );
        Ok(())
    }

    /// Record a whole-batch delivery failure: every message in the batch gets
    /// its retry count incremented as a group, no partial credit.
    pub fn mark_batch_failed(&mut self, message_ids: &[String], response: &str) -> Result<()> {
        self.apply_reconcile_plan(&ReconcilePlan {
            failed: vec![FailureGroup {
                response: response.to_string(),
                message_ids: message_ids.to_vec(),
            }],
            ..Default::default()
        })
    }
}
