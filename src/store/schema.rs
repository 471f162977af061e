// src/store/schema.rs

//! Base schema for the primary data store
//!
//! Two tracked entity collections (organizational units and accounts) plus
//! the applied-migration registry. Accounts reference units, and SQLite
//! enforces the constraint, so restore must recreate units before accounts
//! and delete in the opposite order.

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use tracing::debug;

/// Open a connection with foreign keys enforced
pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Create the base schema if it does not exist
pub fn init(conn: &Connection) -> Result<()> {
    debug!("Initializing base schema");

    conn.execute_batch(
        "
        -- Organizational units: parent collection
        CREATE TABLE IF NOT EXISTS org_units (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            is_primary INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        -- Accounts: child collection, references org_units
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('admin', 'member')),
            unit_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (unit_id) REFERENCES org_units(id)
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_role ON accounts(role);
        CREATE INDEX IF NOT EXISTS idx_accounts_unit_id ON accounts(unit_id);

        -- Applied schema/data migrations
        CREATE TABLE IF NOT EXISTS schema_migrations (
            id TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        );
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM org_units", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_accounts_require_existing_unit() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        init(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO accounts (id, email, name, role, unit_id, created_at)
             VALUES ('a1', 'x@example.com', 'X', 'member', 'missing', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err(), "FK violation should be rejected");
    }
}
