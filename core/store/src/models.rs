//! Row types for the local usage database.

use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// One immutable usage record, owned by the ingestion pipeline.
///
/// The push engine reads these rows but never mutates them. Pricing columns
/// are a snapshot taken at ingestion time so a record's cost stays stable
/// even when the pricing cache is refreshed later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub project_id: String,
    pub machine_id: String,
    pub user_id: String,
    pub role: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cache_read_tokens: i64,
    pub price_per_input_token: f64,
    pub price_per_output_token: f64,
    pub price_per_cache_write_token: f64,
    pub price_per_cache_read_token: f64,
    pub cache_duration_minutes: i64,
    pub message_cost: f64,
    /// Unix millis of the original message.
    pub timestamp: i64,
    pub writer: String,
}

impl MessageRecord {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            project_id: row.get(2)?,
            machine_id: row.get(3)?,
            user_id: row.get(4)?,
            role: row.get(5)?,
            model: row.get(6)?,
            input_tokens: row.get(7)?,
            output_tokens: row.get(8)?,
            cache_creation_tokens: row.get(9)?,
            cache_read_tokens: row.get(10)?,
            price_per_input_token: row.get(11)?,
            price_per_output_token: row.get(12)?,
            price_per_cache_write_token: row.get(13)?,
            price_per_cache_read_token: row.get(14)?,
            cache_duration_minutes: row.get(15)?,
            message_cost: row.get(16)?,
            timestamp: row.get(17)?,
            writer: row.get(18)?,
        })
    }

    /// Column list matching `from_row`, for SELECT statements.
    pub(crate) const COLUMNS: &'static str = "id, session_id, project_id, machine_id, user_id, \
         role, model, input_tokens, output_tokens, cache_creation_tokens, cache_read_tokens, \
         price_per_input_token, price_per_output_token, price_per_cache_write_token, \
         price_per_cache_read_token, cache_duration_minutes, message_cost, timestamp, writer";
}

/// A machine known to the local installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineEntity {
    pub id: String,
    pub name: String,
    pub platform: String,
}

/// A project tracked by the local installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntity {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// A usage session within a project on a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntity {
    pub id: String,
    pub project_id: String,
    pub machine_id: String,
    /// Unix millis.
    pub started_at: i64,
}

/// Durable synchronization state for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusRow {
    pub message_id: String,
    /// Unix millis of the terminal success; immutable once set.
    pub synced_at: Option<i64>,
    pub retry_count: i64,
    pub sync_response: Option<String>,
}

impl SyncStatusRow {
    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }
}

/// Read-only statistics projection over the sync status store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStats {
    pub total: u64,
    pub synced: u64,
    pub unsynced: u64,
    /// (retry_count, row count) over unsynchronized rows, ascending.
    pub retry_histogram: Vec<(i64, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_row_synced() {
        let row = SyncStatusRow {
            message_id: "m1".to_string(),
            synced_at: Some(1_700_000_000_000),
            retry_count: 0,
            sync_response: Some("persisted".to_string()),
        };
        assert!(row.is_synced());

        let pending = SyncStatusRow {
            message_id: "m2".to_string(),
            synced_at: None,
            retry_count: 2,
            sync_response: Some("failed: timeout - request timed out".to_string()),
        };
        assert!(!pending.is_synced());
    }
}
