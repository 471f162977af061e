// src/store/mod.rs

//! Primary data store access
//!
//! The society-management application owns two tracked entity collections:
//! organizational units (parents) and accounts (children). This module gives
//! the engine the find-all / delete-all / create-one surface the backup and
//! recovery paths need, with referential ordering left to the callers.

pub mod migrations;
pub mod schema;

use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    fn from_db(value: &str) -> Role {
        match value {
            "admin" => Role::Admin,
            _ => Role::Member,
        }
    }
}

/// Organizational unit (society branch)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    pub id: String,
    pub code: String,
    pub name: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

/// User account; references an organizational unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub unit_id: String,
    pub created_at: DateTime<Utc>,
}

/// Handle on the primary data store
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open the store and ensure the base schema exists
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = schema::open(db_path)?;
        schema::init(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory store (tests)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// A stored timestamp that fails to parse is data corruption and surfaces
/// as a conversion error rather than a fabricated value.
fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// All organizational units, ordered by code
pub fn find_all_units(conn: &Connection) -> Result<Vec<OrgUnit>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, is_primary, created_at FROM org_units ORDER BY code",
    )?;
    let units = stmt
        .query_map([], |row| {
            Ok(OrgUnit {
                id: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                is_primary: row.get::<_, i64>(3)? != 0,
                created_at: parse_timestamp(4, row.get(4)?)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(units)
}

/// All accounts, ordered by email
pub fn find_all_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, email, name, role, unit_id, created_at FROM accounts ORDER BY email",
    )?;
    let accounts = stmt
        .query_map([], |row| {
            Ok(Account {
                id: row.get(0)?,
                email: row.get(1)?,
                name: row.get(2)?,
                role: Role::from_db(&row.get::<_, String>(3)?),
                unit_id: row.get(4)?,
                created_at: parse_timestamp(5, row.get(5)?)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(accounts)
}

pub fn create_unit(conn: &Connection, unit: &OrgUnit) -> Result<()> {
    conn.execute(
        "INSERT INTO org_units (id, code, name, is_primary, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            unit.id,
            unit.code,
            unit.name,
            unit.is_primary as i64,
            unit.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn create_account(conn: &Connection, account: &Account) -> Result<()> {
    conn.execute(
        "INSERT INTO accounts (id, email, name, role, unit_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            account.id,
            account.email,
            account.name,
            account.role.as_str(),
            account.unit_id,
            account.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Delete all accounts (children first when clearing both collections)
pub fn delete_all_accounts(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM accounts", [])?)
}

pub fn delete_all_units(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("DELETE FROM org_units", [])?)
}

pub fn count_units(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM org_units", [], |row| row.get(0))?)
}

pub fn count_accounts(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?)
}

pub fn count_admins(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM accounts WHERE role = 'admin'",
        [],
        |row| row.get(0),
    )?)
}

pub fn count_primary_units(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM org_units WHERE is_primary = 1",
        [],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub fn sample_unit(id: &str, code: &str, is_primary: bool) -> OrgUnit {
        OrgUnit {
            id: id.to_string(),
            code: code.to_string(),
            name: format!("Unit {}", code),
            is_primary,
            created_at: Utc::now(),
        }
    }

    pub fn sample_account(id: &str, email: &str, role: Role, unit_id: &str) -> Account {
        Account {
            id: id.to_string(),
            email: email.to_string(),
            name: email.split('@').next().unwrap_or("user").to_string(),
            role,
            unit_id: unit_id.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Seed a store with units and accounts for tests
    pub fn seed(conn: &Connection, units: usize, accounts_per_unit: usize) {
        for u in 0..units {
            let unit = sample_unit(&format!("u{}", u), &format!("U{:03}", u), u == 0);
            create_unit(conn, &unit).unwrap();
            for a in 0..accounts_per_unit {
                let role = if u == 0 && a == 0 {
                    Role::Admin
                } else {
                    Role::Member
                };
                let account = sample_account(
                    &format!("a{}-{}", u, a),
                    &format!("user{}-{}@example.com", u, a),
                    role,
                    &format!("u{}", u),
                );
                create_account(conn, &account).unwrap();
            }
        }
    }
}
