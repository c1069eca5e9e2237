//! Category catalog: the ordered list of spending buckets.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DatabaseError};
use crate::categorizer::Category;

/// Inserts a category and returns its id.
pub fn insert(db: &Database, name: &str, hint: Option<&str>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO categories (name, hint) VALUES (?1, ?2)",
            params![name, hint],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Returns the whole catalog ordered by name.
pub fn list(db: &Database) -> Result<Vec<Category>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT id, name, hint FROM categories ORDER BY name, id")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Category {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    hint: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Resolves a category name to its id on an already-locked connection
/// (typically inside a transaction).
pub fn find_id_by_name(conn: &Connection, name: &str) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM categories WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}
