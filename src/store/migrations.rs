// src/store/migrations.rs

//! Embedded migration registry
//!
//! Migrations are identified by stable string ids and applied in declaration
//! order. The applied-id list is part of every backup payload, and restore
//! rewrites the registry to match the snapshot.

use crate::error::Result;
use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

/// A single schema/data migration
struct Migration {
    id: &'static str,
    sql: &'static str,
}

/// All known migrations, in application order
const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "0001_account_phone",
        sql: "ALTER TABLE accounts ADD COLUMN phone TEXT",
    },
    Migration {
        id: "0002_unit_address",
        sql: "ALTER TABLE org_units ADD COLUMN address TEXT",
    },
    Migration {
        id: "0003_account_role_index",
        sql: "CREATE INDEX IF NOT EXISTS idx_accounts_email_role ON accounts(email, role)",
    },
];

/// Ids of all registered migrations, in order
pub fn registered_ids() -> Vec<String> {
    MIGRATIONS.iter().map(|m| m.id.to_string()).collect()
}

/// Ids of migrations already applied to this store, in application order
pub fn applied_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT id FROM schema_migrations ORDER BY applied_at, id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Registered migrations not yet applied to this store
pub fn pending_ids(conn: &Connection) -> Result<Vec<String>> {
    let applied = applied_ids(conn)?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.iter().any(|id| id == m.id))
        .map(|m| m.id.to_string())
        .collect())
}

/// Apply all pending migrations, returning the ids that were applied
pub fn apply_pending(conn: &Connection) -> Result<Vec<String>> {
    let applied = applied_ids(conn)?;
    let mut newly_applied = Vec::new();

    for migration in MIGRATIONS {
        if applied.iter().any(|id| id == migration.id) {
            continue;
        }
        info!("Applying migration {}", migration.id);
        conn.execute_batch(migration.sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (id, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.id, Utc::now().to_rfc3339()],
        )?;
        newly_applied.push(migration.id.to_string());
    }

    Ok(newly_applied)
}

/// Rewrite the applied-migration registry to exactly `ids`
///
/// Used by restore: the snapshot's applied list replaces whatever the live
/// store currently records. Table contents only; the DDL the migrations
/// performed is implied by the restored entity data.
pub fn set_applied(conn: &Connection, ids: &[String]) -> Result<()> {
    conn.execute("DELETE FROM schema_migrations", [])?;
    let now = Utc::now().to_rfc3339();
    for id in ids {
        conn.execute(
            "INSERT INTO schema_migrations (id, applied_at) VALUES (?1, ?2)",
            rusqlite::params![id, now],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init(&conn).unwrap();
        conn
    }

    #[test]
    fn test_apply_pending_applies_all_once() {
        let conn = test_conn();

        let first = apply_pending(&conn).unwrap();
        assert_eq!(first, registered_ids());

        let second = apply_pending(&conn).unwrap();
        assert!(second.is_empty(), "re-running applies nothing");
        assert_eq!(applied_ids(&conn).unwrap().len(), MIGRATIONS.len());
    }

    #[test]
    fn test_pending_ids_shrink_as_applied() {
        let conn = test_conn();
        assert_eq!(pending_ids(&conn).unwrap().len(), MIGRATIONS.len());

        apply_pending(&conn).unwrap();
        assert!(pending_ids(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_set_applied_rewrites_registry() {
        let conn = test_conn();
        apply_pending(&conn).unwrap();

        let subset = vec!["0001_account_phone".to_string()];
        set_applied(&conn, &subset).unwrap();
        assert_eq!(applied_ids(&conn).unwrap(), subset);
        assert_eq!(pending_ids(&conn).unwrap().len(), MIGRATIONS.len() - 1);
    }
}
