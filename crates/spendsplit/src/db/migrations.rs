//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies pending
//! ones in version order. Each migration and its `_migrations` row are
//! written in one transaction, so a failed script leaves no trace.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_users_and_categories_tables",
        sql: include_str!("sql/001_create_directory.sql"),
    },
    Migration {
        version: 2,
        description: "create_jobs_table",
        sql: include_str!("sql/002_create_jobs.sql"),
    },
    Migration {
        version: 3,
        description: "create_spending_tables",
        sql: include_str!("sql/003_create_spendings.sql"),
    },
];

/// Runs all pending migrations on the given connection.
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
        apply(conn, migration)?;
    }

    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let failed = |e: rusqlite::Error| DatabaseError::Migration {
        version: migration.version,
        reason: e.to_string(),
    };

    conn.execute_batch("BEGIN").map_err(failed)?;
    let result = conn.execute_batch(migration.sql).and_then(|_| {
        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )
    });

    match result {
        Ok(_) => conn.execute_batch("COMMIT").map_err(failed),
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::warn!(
                    "Rollback of migration v{} failed: {}",
                    migration.version,
                    rollback
                );
            }
            Err(failed(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    fn columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = fresh();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_jobs_table_has_attempts() {
        let conn = fresh();
        assert!(columns(&conn, "jobs").iter().any(|c| c == "attempts"));
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let broken = Migration {
            version: 99,
            description: "broken",
            sql: "CREATE TABLE half_done (id INTEGER); SELECT * FROM no_such_table;",
        };
        let err = apply(&conn, &broken).unwrap_err();
        assert!(matches!(err, DatabaseError::Migration { version: 99, .. }));

        let recorded: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations WHERE version = 99", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(recorded, 0);
        assert!(columns(&conn, "half_done").is_empty());
    }

    #[test]
    fn test_spending_tables_exist() {
        let conn = fresh();
        for table in ["spendings", "job_spendings", "spending_attributions"] {
            let count: u32 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .unwrap();
            assert_eq!(count, 0);
        }
    }
}
