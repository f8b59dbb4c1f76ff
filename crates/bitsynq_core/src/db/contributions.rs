use super::{membership_role, new_id, now, require_admin, require_member};
use crate::allocation::round_to;
use crate::error::{Error, Result};
use crate::schema::{
    ContributionEntry, ContributionRecord, ContributionShare, ContributionSummary, SourceType,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::info;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ContributionPage {
    pub contributions: Vec<ContributionRecord>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

/// Manual entry by an admin, ratio in `[0, 100]`.
pub fn add_contribution(
    conn: &Connection,
    project_id: &str,
    actor: &str,
    entry: &ContributionEntry,
) -> Result<ContributionRecord> {
    require_admin(conn, project_id, actor, "add contributions")?;
    check_ratio(entry.ratio, 100.0)?;
    check_member(conn, project_id, &entry.user_id)?;

    let tx = conn.unchecked_transaction()?;
    let now = now(&tx)?;
    let record = insert_contribution(
        &tx,
        project_id,
        &entry.user_id,
        entry.ratio,
        SourceType::Manual,
        None,
        entry.description.as_deref(),
        actor,
        &now,
    )?;
    tx.commit()?;

    info!(contribution_id = %record.id, user_id = %record.user_id, ratio = record.ratio, "added contribution");
    Ok(record)
}

/// Bulk entry from an external source. All rows land or none do.
pub fn import_contributions(
    conn: &Connection,
    project_id: &str,
    actor: &str,
    source_id: Option<&str>,
    entries: &[ContributionEntry],
) -> Result<Vec<ContributionRecord>> {
    require_admin(conn, project_id, actor, "import contributions")?;
    if entries.is_empty() {
        return Err(Error::Validation("nothing to import".to_string()));
    }
    for entry in entries {
        check_ratio(entry.ratio, 100.0)?;
        check_member(conn, project_id, &entry.user_id)?;
    }

    let tx = conn.unchecked_transaction()?;
    let now = now(&tx)?;
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        records.push(insert_contribution(
            &tx,
            project_id,
            &entry.user_id,
            entry.ratio,
            SourceType::Import,
            source_id,
            entry.description.as_deref(),
            actor,
            &now,
        )?);
    }
    tx.commit()?;

    info!(project_id, imported = records.len(), "imported contributions");
    Ok(records)
}

/// Newest first. `page` counts from 1; `limit` is clamped to [`MAX_PAGE_SIZE`].
pub fn list_contributions(
    conn: &Connection,
    project_id: &str,
    actor: &str,
    page: u32,
    limit: u32,
) -> Result<ContributionPage> {
    require_member(conn, project_id, actor)?;
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let offset = i64::from(page - 1) * i64::from(limit);

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM contributions WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        r#"
        SELECT id, project_id, user_id, ratio, source_type, source_id, description,
               created_by, created_at
        FROM contributions
        WHERE project_id = ?1
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?2 OFFSET ?3
        "#,
    )?;
    let rows = stmt.query_map(params![project_id, limit, offset], contribution_row)?;

    let mut contributions = Vec::new();
    for r in rows {
        contributions.push(r?.into_record()?);
    }
    Ok(ContributionPage {
        contributions,
        page,
        limit,
        total: super::from_sql_int(total)?,
    })
}

pub fn get_contribution(conn: &Connection, project_id: &str, contribution_id: &str) -> Result<ContributionRecord> {
    let row = conn
        .query_row(
            r#"
            SELECT id, project_id, user_id, ratio, source_type, source_id, description,
                   created_by, created_at
            FROM contributions WHERE id = ?1 AND project_id = ?2
            "#,
            params![contribution_id, project_id],
            contribution_row,
        )
        .optional()?;
    row.ok_or_else(|| Error::NotFound(format!("contribution {contribution_id}")))?
        .into_record()
}

/// Per-user totals, largest first, with each user's share of the grand total.
pub fn contribution_summary(conn: &Connection, project_id: &str, actor: &str) -> Result<Vec<ContributionSummary>> {
    require_member(conn, project_id, actor)?;
    let mut stmt = conn.prepare(
        r#"
        SELECT c.user_id, u.display_name, SUM(c.ratio), COUNT(*), MAX(c.created_at)
        FROM contributions c
        INNER JOIN users u ON c.user_id = u.id
        WHERE c.project_id = ?1
        GROUP BY c.user_id, u.display_name
        ORDER BY SUM(c.ratio) DESC, c.user_id
        "#,
    )?;
    let rows = stmt.query_map(params![project_id], |row| {
        Ok(ContributionSummary {
            user_id: row.get(0)?,
            display_name: row.get(1)?,
            total_ratio: row.get(2)?,
            contribution_count: row.get(3)?,
            last_contribution: row.get(4)?,
            percentage: 0.0,
        })
    })?;

    let mut summary = Vec::new();
    for r in rows {
        summary.push(r?);
    }

    let grand_total: f64 = summary.iter().map(|row| row.total_ratio).sum();
    if grand_total > 0.0 {
        for row in &mut summary {
            row.percentage = round_to(row.total_ratio / grand_total * 100.0, 2);
        }
    }
    Ok(summary)
}

pub fn delete_contribution(conn: &Connection, project_id: &str, contribution_id: &str, actor: &str) -> Result<()> {
    require_admin(conn, project_id, actor, "delete contributions")?;
    let record = get_contribution(conn, project_id, contribution_id)?;

    let tx = conn.unchecked_transaction()?;
    let now = now(&tx)?;
    tx.execute("DELETE FROM contributions WHERE id = ?1", params![contribution_id])?;
    tx.execute(
        r#"
        UPDATE user_balances
        SET total_contributed = MAX(total_contributed - ?1, 0), last_updated = ?2
        WHERE user_id = ?3 AND project_id = ?4
        "#,
        params![record.ratio, now, record.user_id, project_id],
    )?;
    tx.commit()?;

    info!(contribution_id, user_id = %record.user_id, "deleted contribution");
    Ok(())
}

/// Every `(user_id, ratio)` pair of the project, in insertion order.
pub fn contribution_shares(conn: &Connection, project_id: &str) -> Result<Vec<ContributionShare>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, ratio FROM contributions WHERE project_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![project_id], |row| {
        Ok(ContributionShare {
            user_id: row.get(0)?,
            ratio: row.get(1)?,
        })
    })?;

    let mut shares = Vec::new();
    for r in rows {
        shares.push(r?);
    }
    Ok(shares)
}

pub(super) fn check_ratio(ratio: f64, max: f64) -> Result<()> {
    if !ratio.is_finite() || ratio < 0.0 || ratio > max {
        let bound = if max.is_finite() {
            format!("between 0 and {max}")
        } else {
            "a non-negative number".to_string()
        };
        return Err(Error::Validation(format!("ratio must be {bound}, got {ratio}")));
    }
    Ok(())
}

fn check_member(conn: &Connection, project_id: &str, user_id: &str) -> Result<()> {
    if membership_role(conn, project_id, user_id)?.is_none() {
        return Err(Error::Validation(format!("user {user_id} is not a project member")));
    }
    Ok(())
}

/// Insert one record and add its ratio to the user's running total. Callers
/// own the transaction.
#[allow(clippy::too_many_arguments)]
pub(super) fn insert_contribution(
    conn: &Connection,
    project_id: &str,
    user_id: &str,
    ratio: f64,
    source_type: SourceType,
    source_id: Option<&str>,
    description: Option<&str>,
    actor: &str,
    now: &str,
) -> Result<ContributionRecord> {
    let id = new_id();
    conn.execute(
        r#"
        INSERT INTO contributions (
          id, project_id, user_id, ratio, source_type, source_id, description,
          created_by, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            id,
            project_id,
            user_id,
            ratio,
            source_type.as_str(),
            source_id,
            description,
            actor,
            now
        ],
    )?;
    conn.execute(
        r#"
        INSERT INTO user_balances (user_id, project_id, balance, total_contributed, last_updated)
        VALUES (?1, ?2, 0, ?3, ?4)
        ON CONFLICT(user_id, project_id) DO UPDATE SET
          total_contributed = total_contributed + excluded.total_contributed,
          last_updated = excluded.last_updated
        "#,
        params![user_id, project_id, ratio, now],
    )?;

    Ok(ContributionRecord {
        id,
        project_id: project_id.to_string(),
        user_id: user_id.to_string(),
        ratio,
        source_type,
        source_id: source_id.map(str::to_string),
        description: description.map(str::to_string),
        created_by: actor.to_string(),
        created_at: now.to_string(),
    })
}

#[derive(Debug)]
struct ContributionRow {
    id: String,
    project_id: String,
    user_id: String,
    ratio: f64,
    source_type: String,
    source_id: Option<String>,
    description: Option<String>,
    created_by: String,
    created_at: String,
}

impl ContributionRow {
    fn into_record(self) -> Result<ContributionRecord> {
        Ok(ContributionRecord {
            id: self.id,
            project_id: self.project_id,
            user_id: self.user_id,
            ratio: self.ratio,
            source_type: SourceType::parse(&self.source_type)?,
            source_id: self.source_id,
            description: self.description,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

fn contribution_row(row: &Row<'_>) -> rusqlite::Result<ContributionRow> {
    Ok(ContributionRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        ratio: row.get(3)?,
        source_type: row.get(4)?,
        source_id: row.get(5)?,
        description: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
    })
}
