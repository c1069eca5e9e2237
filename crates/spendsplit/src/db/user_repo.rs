//! User directory: read-only lookups used by the pipeline, plus the
//! inserts needed to seed it.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};
use crate::categorizer::Person;

/// A raw user row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: i64,
    pub display_name: String,
    pub partner_id: Option<i64>,
}

impl From<UserRow> for Person {
    fn from(row: UserRow) -> Self {
        Person {
            id: row.id,
            display_name: row.display_name,
        }
    }
}

/// Inserts a user without a partner.
pub fn insert(db: &Database, id: i64, display_name: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO users (id, display_name) VALUES (?1, ?2)",
            params![id, display_name],
        )?;
        Ok(())
    })
}

/// Makes two users each other's co-payer.
pub fn link_partners(db: &Database, a: i64, b: i64) -> Result<(), DatabaseError> {
    db.with_transaction(|tx| {
        tx.execute(
            "UPDATE users SET partner_id = ?2 WHERE id = ?1",
            params![a, b],
        )?;
        tx.execute(
            "UPDATE users SET partner_id = ?2 WHERE id = ?1",
            params![b, a],
        )?;
        Ok(())
    })
}

/// Finds a user by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<UserRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT id, display_name, partner_id FROM users WHERE id = ?1",
                params![id],
                |r| {
                    Ok(UserRow {
                        id: r.get(0)?,
                        display_name: r.get(1)?,
                        partner_id: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}

/// Resolves a user id to a display identity.
pub fn find_person(db: &Database, id: i64) -> Result<Option<Person>, DatabaseError> {
    Ok(find_by_id(db, id)?.map(Person::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, 1, "Alice").unwrap();

        let user = find_by_id(&db, 1).unwrap().unwrap();
        assert_eq!(user.display_name, "Alice");
        assert!(user.partner_id.is_none());
        assert!(find_by_id(&db, 99).unwrap().is_none());
    }

    #[test]
    fn test_link_partners_is_symmetric() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, 1, "Alice").unwrap();
        insert(&db, 2, "Bob").unwrap();
        link_partners(&db, 1, 2).unwrap();

        assert_eq!(find_by_id(&db, 1).unwrap().unwrap().partner_id, Some(2));
        assert_eq!(find_by_id(&db, 2).unwrap().unwrap().partner_id, Some(1));
    }

    #[test]
    fn test_find_person() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, 7, "Carol").unwrap();
        let person = find_person(&db, 7).unwrap().unwrap();
        assert_eq!(
            person,
            Person {
                id: 7,
                display_name: "Carol".to_string()
            }
        );
    }
}
