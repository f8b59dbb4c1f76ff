//! SQLite-backed contribution ledger.
//!
//! Free functions over a `rusqlite::Connection`. Writes that touch more than
//! one row run inside a transaction so a failed request never leaves half of
//! its rows behind.

mod contributions;
mod distributions;
mod meetings;
mod users;

pub use contributions::*;
pub use distributions::*;
pub use meetings::*;
pub use users::*;

use crate::error::{Error, Result};
use crate::schema::MemberRole;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use uuid::Uuid;

pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    init(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
          id TEXT PRIMARY KEY,
          email TEXT NOT NULL UNIQUE,
          display_name TEXT NOT NULL,
          aliases_json TEXT NOT NULL DEFAULT '[]',
          wallet_address TEXT,
          created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE TABLE IF NOT EXISTS projects (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          description TEXT,
          owner_id TEXT NOT NULL REFERENCES users(id),
          token_symbol TEXT,
          status TEXT NOT NULL DEFAULT 'active',
          created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        );

        CREATE TABLE IF NOT EXISTS project_members (
          project_id TEXT NOT NULL REFERENCES projects(id),
          user_id TEXT NOT NULL REFERENCES users(id),
          role TEXT NOT NULL,
          joined_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
          PRIMARY KEY (project_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS meetings (
          id TEXT PRIMARY KEY,
          project_id TEXT NOT NULL REFERENCES projects(id),
          title TEXT,
          meeting_date TEXT,
          raw_transcript TEXT NOT NULL,
          parsed_json TEXT NOT NULL,
          status TEXT NOT NULL DEFAULT 'pending',
          created_by TEXT NOT NULL,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS contributions (
          id TEXT PRIMARY KEY,
          project_id TEXT NOT NULL REFERENCES projects(id),
          user_id TEXT NOT NULL REFERENCES users(id),
          ratio REAL NOT NULL CHECK (ratio >= 0),
          source_type TEXT NOT NULL,
          source_id TEXT,
          description TEXT,
          created_by TEXT NOT NULL,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_contributions_project ON contributions(project_id, created_at);

        CREATE TABLE IF NOT EXISTS token_distributions (
          id TEXT PRIMARY KEY,
          project_id TEXT NOT NULL REFERENCES projects(id),
          milestone_name TEXT,
          total_tokens INTEGER NOT NULL,
          distribution_json TEXT NOT NULL,
          tx_hash TEXT,
          status TEXT NOT NULL,
          created_by TEXT NOT NULL,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_distributions_project ON token_distributions(project_id, created_at);

        CREATE TABLE IF NOT EXISTS user_balances (
          user_id TEXT NOT NULL REFERENCES users(id),
          project_id TEXT NOT NULL REFERENCES projects(id),
          balance INTEGER NOT NULL DEFAULT 0,
          total_contributed REAL NOT NULL DEFAULT 0,
          last_updated TEXT NOT NULL,
          PRIMARY KEY (user_id, project_id)
        );
        "#,
    )?;
    Ok(())
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current UTC time in the same format as the column defaults.
pub(crate) fn now(conn: &Connection) -> Result<String> {
    Ok(conn.query_row("SELECT strftime('%Y-%m-%dT%H:%M:%fZ','now')", [], |row| {
        row.get(0)
    })?)
}

pub(crate) fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Validation(format!("{value} is too large to store")))
}

pub(crate) fn from_sql_int(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::Inconsistent(format!("negative amount {value} in ledger")))
}

pub fn membership_role(conn: &Connection, project_id: &str, user_id: &str) -> Result<Option<MemberRole>> {
    let role: Option<String> = conn
        .query_row(
            "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    role.map(|role| MemberRole::parse(&role)).transpose()
}

/// The actor's role, or `NotFound` when they are not in the project.
pub fn require_member(conn: &Connection, project_id: &str, actor: &str) -> Result<MemberRole> {
    membership_role(conn, project_id, actor)?
        .ok_or_else(|| Error::NotFound(format!("project {project_id} not found or access denied")))
}

pub fn require_admin(conn: &Connection, project_id: &str, actor: &str, action: &str) -> Result<()> {
    match membership_role(conn, project_id, actor)? {
        Some(MemberRole::Admin) => Ok(()),
        _ => Err(Error::Forbidden(format!("only admins can {action}"))),
    }
}
