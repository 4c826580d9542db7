//! Schema migrations.
//!
//! Applied migrations are recorded in `_migrations`; pending ones run in
//! version order.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_generation_jobs_table",
        sql: include_str!("sql/001_create_generation_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_document_tasks_table",
        sql: include_str!("sql/002_create_document_tasks.sql"),
    },
];

pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = migrated();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = migrated();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_jobs_table_has_owner_column() {
        let conn = migrated();
        let mut stmt = conn.prepare("PRAGMA table_info(generation_jobs)").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(columns.iter().any(|c| c == "owner"), "{:?}", columns);
    }

    #[test]
    fn test_tasks_cascade_with_job() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO generation_jobs (id, mode, status, record_count, created_at, updated_at)
             VALUES ('g1', 'batch', 'created', 1, '2026-01-01', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO document_tasks (generation_id, idx, status) VALUES ('g1', 0, 'pending')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM generation_jobs WHERE id = 'g1'", [])
            .unwrap();
        let remaining: u32 = conn
            .query_row("SELECT COUNT(*) FROM document_tasks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
