//! Database schema and migrations

use rusqlite::Connection;

use crate::{Error, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Subgoal progress, device-local per (user, language)
        CREATE TABLE IF NOT EXISTS subgoal_progress (
            user_id TEXT NOT NULL,
            language TEXT NOT NULL,
            subgoal_id TEXT NOT NULL,
            percentage INTEGER NOT NULL DEFAULT 0 CHECK(percentage BETWEEN 0 AND 100),
            level INTEGER NOT NULL DEFAULT 0 CHECK(level >= 0),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, language, subgoal_id)
        );

        -- Fallback message list for sessions without a backend conversation
        CREATE TABLE IF NOT EXISTS local_messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            local_id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            language TEXT NOT NULL,
            sender TEXT NOT NULL CHECK(sender IN ('user', 'ai', 'system')),
            text TEXT NOT NULL,
            romanized_text TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_local_messages_owner
            ON local_messages(user_id, language);

        PRAGMA user_version = 1;
        ",
    )
    .map_err(|e| Error::Database(e.to_string()))?;

    tracing::debug!("applied schema migration v1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_schema_version_recorded() {
        let conn = setup_test_conn();
        init(&conn).unwrap();

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = setup_test_conn();
        init(&conn).unwrap();
        init(&conn).unwrap(); // Should not fail
    }

    #[test]
    fn test_percentage_constraint() {
        let conn = setup_test_conn();
        init(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO subgoal_progress (user_id, language, subgoal_id, percentage, level)
             VALUES ('u', 'ja', 's', 150, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
