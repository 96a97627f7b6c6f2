//! SQLite connection management and schema for the local usage database.

use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info};

use meterlog_common::{Error, Result};

use crate::models::{MachineEntity, MessageRecord, ProjectEntity, SessionEntity};

/// Local usage database.
///
/// One connection, used by a single push session at a time. The messages and
/// entity tables are the ingestion pipeline's write surface; `sync_status`
/// belongs to the push engine.
pub struct UsageDb {
    pub(crate) conn: Connection,
}

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

impl UsageDb {
    /// Create or open the usage database at the given path.
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        Self::init_schema(&conn)?;
        info!("Usage database opened");
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS machines (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                platform TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                path TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                machine_id TEXT NOT NULL,
                started_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                machine_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cache_creation_tokens INTEGER NOT NULL,
                cache_read_tokens INTEGER NOT NULL,
                price_per_input_token REAL NOT NULL,
                price_per_output_token REAL NOT NULL,
                price_per_cache_write_token REAL NOT NULL,
                price_per_cache_read_token REAL NOT NULL,
                cache_duration_minutes INTEGER NOT NULL,
                message_cost REAL NOT NULL,
                timestamp INTEGER NOT NULL,
                writer TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_status (
                message_id TEXT PRIMARY KEY REFERENCES messages(id),
                synced_at INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                sync_response TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);
            CREATE INDEX IF NOT EXISTS idx_sync_status_pending
                ON sync_status(retry_count) WHERE synced_at IS NULL;
            "#,
        )
        .map_err(db_err)
    }

    /// Insert a message row (ingestion boundary).
    pub fn insert_message(&self, msg: &MessageRecord) -> Result<()> {
        debug!("Inserting message: {}", msg.id);
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO messages
                (id, session_id, project_id, machine_id, user_id, role, model,
                 input_tokens, output_tokens, cache_creation_tokens, cache_read_tokens,
                 price_per_input_token, price_per_output_token, price_per_cache_write_token,
                 price_per_cache_read_token, cache_duration_minutes, message_cost,
                 timestamp, writer)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                        ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                "#,
                params![
                    msg.id,
                    msg.session_id,
                    msg.project_id,
                    msg.machine_id,
                    msg.user_id,
                    msg.role,
                    msg.model,
                    msg.input_tokens,
                    msg.output_tokens,
                    msg.cache_creation_tokens,
                    msg.cache_read_tokens,
                    msg.price_per_input_token,
                    msg.price_per_output_token,
                    msg.price_per_cache_write_token,
                    msg.price_per_cache_read_token,
                    msg.cache_duration_minutes,
                    msg.message_cost,
                    msg.timestamp,
                    msg.writer,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Insert a machine row (ingestion boundary).
    pub fn insert_machine(&self, machine: &MachineEntity) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO machines (id, name, platform) VALUES (?1, ?2, ?3)",
                params![machine.id, machine.name, machine.platform],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Insert a project row (ingestion boundary).
    pub fn insert_project(&self, project: &ProjectEntity) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO projects (id, name, path) VALUES (?1, ?2, ?3)",
                params![project.id, project.name, project.path],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Insert a session row (ingestion boundary).
    pub fn insert_session(&self, session: &SessionEntity) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sessions (id, project_id, machine_id, started_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.id,
                    session.project_id,
                    session.machine_id,
                    session.started_at
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Look up machines by id.
    pub fn machines_by_ids(&self, ids: &[String]) -> Result<Vec<MachineEntity>> {
        self.entities_by_ids(ids, "SELECT id, name, platform FROM machines", |row| {
            Ok(MachineEntity {
                id: row.get(0)?,
                name: row.get(1)?,
                platform: row.get(2)?,
            })
        })
    }

    /// Look up projects by id.
    pub fn projects_by_ids(&self, ids: &[String]) -> Result<Vec<ProjectEntity>> {
        self.entities_by_ids(ids, "SELECT id, name, path FROM projects", |row| {
            Ok(ProjectEntity {
                id: row.get(0)?,
                name: row.get(1)?,
                path: row.get(2)?,
            })
        })
    }

    /// Look up sessions by id.
    pub fn sessions_by_ids(&self, ids: &[String]) -> Result<Vec<SessionEntity>> {
        self.entities_by_ids(
            ids,
            "SELECT id, project_id, machine_id, started_at FROM sessions",
            |row| {
                Ok(SessionEntity {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    machine_id: row.get(2)?,
                    started_at: row.get(3)?,
                })
            },
        )
    }

    fn entities_by_ids<T>(
        &self,
        ids: &[String],
        base_query: &str,
        map: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut result = Vec::new();
        for chunk in ids.chunks(crate::sync_status::MAX_IN_PARAMS) {
            let sql = format!(
                "{} WHERE id IN ({})",
                base_query,
                crate::sync_status::in_placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(chunk), &map)
                .map_err(db_err)?;
            for row in rows {
                result.push(row.map_err(db_err)?);
            }
        }
        Ok(result)
    }

    /// Total number of message rows.
    pub fn message_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count as u64)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::MessageRecord;

    pub(crate) fn sample_message(id: &str, timestamp: i64) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            session_id: "sess-1".to_string(),
            project_id: "proj-1".to_string(),
            machine_id: "mach-1".to_string(),
            user_id: "local-user".to_string(),
            role: "assistant".to_string(),
            model: "sonnet".to_string(),
            input_tokens: 120,
            output_tokens: 480,
            cache_creation_tokens: 0,
            cache_read_tokens: 1024,
            price_per_input_token: 0.000003,
            price_per_output_token: 0.000015,
            price_per_cache_write_token: 0.00000375,
            price_per_cache_read_token: 0.0000003,
            cache_duration_minutes: 5,
            message_cost: 0.0076,
            timestamp,
            writer: "cli".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_message;
    use super::*;

    #[test]
    fn test_open_and_insert() {
        let db = UsageDb::in_memory().unwrap();
        db.insert_message(&sample_message("m1", 1000)).unwrap();
        db.insert_message(&sample_message("m2", 2000)).unwrap();
        assert_eq!(db.message_count().unwrap(), 2);
    }

    #[test]
    fn test_entity_lookup() {
        let db = UsageDb::in_memory().unwrap();
        db.insert_machine(&MachineEntity {
            id: "mach-1".to_string(),
            name: "workstation".to_string(),
            platform: "linux".to_string(),
        })
        .unwrap();
        db.insert_project(&ProjectEntity {
            id: "proj-1".to_string(),
            name: "demo".to_string(),
            path: "/home/user/demo".to_string(),
        })
        .unwrap();

        let machines = db.machines_by_ids(&["mach-1".to_string()]).unwrap();
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].name, "workstation");

        let missing = db.machines_by_ids(&["mach-9".to_string()]).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.db");
        {
            let db = UsageDb::open(&path).unwrap();
            db.insert_message(&sample_message("m1", 1000)).unwrap();
        }
        let db = UsageDb::open(&path).unwrap();
        assert_eq!(db.message_count().unwrap(), 1);
    }
}
