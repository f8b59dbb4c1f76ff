use super::{from_sql_int, new_id, now, to_sql_int};
use crate::allocation::{deserialize_distribution, serialize_distribution};
use crate::error::{Error, Result};
use crate::schema::{Distribution, DistributionStatus, TokenDistribution, UserBalance};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone)]
pub struct NewDistribution<'a> {
    pub project_id: &'a str,
    pub milestone_name: Option<&'a str>,
    pub total_tokens: u64,
    pub distribution: &'a Distribution,
    pub tx_hash: Option<&'a str>,
    pub status: DistributionStatus,
    pub created_by: &'a str,
}

/// Store the snapshot and credit every recipient's balance in one transaction.
pub fn record_distribution(conn: &Connection, new: &NewDistribution<'_>) -> Result<TokenDistribution> {
    let id = new_id();
    let tx = conn.unchecked_transaction()?;
    let created_at = now(&tx)?;

    tx.execute(
        r#"
        INSERT INTO token_distributions (
          id, project_id, milestone_name, total_tokens, distribution_json,
          tx_hash, status, created_by, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            id,
            new.project_id,
            new.milestone_name,
            to_sql_int(new.total_tokens)?,
            serialize_distribution(new.distribution)?,
            new.tx_hash,
            new.status.as_str(),
            new.created_by,
            created_at
        ],
    )?;

    for entry in new.distribution.values() {
        tx.execute(
            r#"
            INSERT INTO user_balances (user_id, project_id, balance, total_contributed, last_updated)
            VALUES (?1, ?2, ?3, 0, ?4)
            ON CONFLICT(user_id, project_id) DO UPDATE SET
              balance = balance + excluded.balance,
              last_updated = excluded.last_updated
            "#,
            params![
                entry.user_id,
                new.project_id,
                to_sql_int(entry.token_amount)?,
                created_at
            ],
        )?;
    }
    tx.commit()?;

    info!(
        distribution_id = %id,
        project_id = new.project_id,
        total_tokens = new.total_tokens,
        recipients = new.distribution.len(),
        "recorded distribution"
    );

    Ok(TokenDistribution {
        id,
        project_id: new.project_id.to_string(),
        milestone_name: new.milestone_name.map(str::to_string),
        total_tokens: new.total_tokens,
        distribution_data: new.distribution.clone(),
        tx_hash: new.tx_hash.map(str::to_string),
        status: new.status,
        created_by: new.created_by.to_string(),
        created_at,
    })
}

/// Newest first.
pub fn list_distributions(conn: &Connection, project_id: &str) -> Result<Vec<TokenDistribution>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, project_id, milestone_name, total_tokens, distribution_json,
               tx_hash, status, created_by, created_at
        FROM token_distributions
        WHERE project_id = ?1
        ORDER BY created_at DESC, rowid DESC
        "#,
    )?;
    let rows = stmt.query_map(params![project_id], distribution_row)?;

    let mut distributions = Vec::new();
    for r in rows {
        distributions.push(r?.into_distribution()?);
    }
    Ok(distributions)
}

pub fn get_distribution(conn: &Connection, project_id: &str, distribution_id: &str) -> Result<TokenDistribution> {
    let row = conn
        .query_row(
            r#"
            SELECT id, project_id, milestone_name, total_tokens, distribution_json,
                   tx_hash, status, created_by, created_at
            FROM token_distributions WHERE id = ?1 AND project_id = ?2
            "#,
            params![distribution_id, project_id],
            distribution_row,
        )
        .optional()?;
    row.ok_or_else(|| Error::NotFound(format!("distribution {distribution_id}")))?
        .into_distribution()
}

/// Only the settlement fields change after a distribution is written.
pub fn update_settlement(
    conn: &Connection,
    distribution_id: &str,
    tx_hash: Option<&str>,
    status: DistributionStatus,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE token_distributions SET tx_hash = ?1, status = ?2 WHERE id = ?3",
        params![tx_hash, status.as_str(), distribution_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("distribution {distribution_id}")));
    }
    Ok(())
}

/// Balances of a project, largest first.
pub fn balances(conn: &Connection, project_id: &str) -> Result<Vec<UserBalance>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT b.user_id, b.project_id, u.display_name, b.balance, b.total_contributed, b.last_updated
        FROM user_balances b
        INNER JOIN users u ON b.user_id = u.id
        WHERE b.project_id = ?1
        ORDER BY b.balance DESC, u.display_name
        "#,
    )?;
    let rows = stmt.query_map(params![project_id], balance_row)?;

    let mut balances = Vec::new();
    for r in rows {
        balances.push(r?.into_balance()?);
    }
    Ok(balances)
}

/// A user without a balance row reads as zero.
pub fn balance_of(conn: &Connection, project_id: &str, user_id: &str) -> Result<UserBalance> {
    let row = conn
        .query_row(
            r#"
            SELECT b.user_id, b.project_id, u.display_name, b.balance, b.total_contributed, b.last_updated
            FROM user_balances b
            INNER JOIN users u ON b.user_id = u.id
            WHERE b.project_id = ?1 AND b.user_id = ?2
            "#,
            params![project_id, user_id],
            balance_row,
        )
        .optional()?;

    match row {
        Some(row) => row.into_balance(),
        None => {
            let user = super::get_user(conn, user_id)?;
            Ok(UserBalance {
                user_id: user.id,
                project_id: project_id.to_string(),
                display_name: user.display_name,
                balance: 0,
                total_contributed: 0.0,
                last_updated: now(conn)?,
            })
        }
    }
}

/// Sum of confirmed distributions.
pub fn total_distributed(conn: &Connection, project_id: &str) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(total_tokens), 0) FROM token_distributions WHERE project_id = ?1 AND status = ?2",
        params![project_id, DistributionStatus::Confirmed.as_str()],
        |row| row.get(0),
    )?;
    from_sql_int(total)
}

/// Wallet address per user id; users without one map to `None`.
pub fn wallet_addresses(conn: &Connection, user_ids: &[&str]) -> Result<BTreeMap<String, Option<String>>> {
    let mut stmt = conn.prepare("SELECT wallet_address FROM users WHERE id = ?1")?;
    let mut wallets = BTreeMap::new();
    for user_id in user_ids {
        let wallet: Option<String> = stmt
            .query_row(params![user_id], |row| row.get::<_, Option<String>>(0))
            .optional()?
            .flatten();
        wallets.insert(user_id.to_string(), wallet);
    }
    Ok(wallets)
}

#[derive(Debug)]
struct DistributionRow {
    id: String,
    project_id: String,
    milestone_name: Option<String>,
    total_tokens: i64,
    distribution_json: String,
    tx_hash: Option<String>,
    status: String,
    created_by: String,
    created_at: String,
}

impl DistributionRow {
    fn into_distribution(self) -> Result<TokenDistribution> {
        Ok(TokenDistribution {
            id: self.id,
            project_id: self.project_id,
            milestone_name: self.milestone_name,
            total_tokens: from_sql_int(self.total_tokens)?,
            distribution_data: deserialize_distribution(&self.distribution_json)?,
            tx_hash: self.tx_hash,
            status: DistributionStatus::parse(&self.status)?,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

fn distribution_row(row: &Row<'_>) -> rusqlite::Result<DistributionRow> {
    Ok(DistributionRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        milestone_name: row.get(2)?,
        total_tokens: row.get(3)?,
        distribution_json: row.get(4)?,
        tx_hash: row.get(5)?,
        status: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[derive(Debug)]
struct BalanceRow {
    user_id: String,
    project_id: String,
    display_name: String,
    balance: i64,
    total_contributed: f64,
    last_updated: String,
}

impl BalanceRow {
    fn into_balance(self) -> Result<UserBalance> {
        Ok(UserBalance {
            user_id: self.user_id,
            project_id: self.project_id,
            display_name: self.display_name,
            balance: from_sql_int(self.balance)?,
            total_contributed: self.total_contributed,
            last_updated: self.last_updated,
        })
    }
}

fn balance_row(row: &Row<'_>) -> rusqlite::Result<BalanceRow> {
    Ok(BalanceRow {
        user_id: row.get(0)?,
        project_id: row.get(1)?,
        display_name: row.get(2)?,
        balance: row.get(3)?,
        total_contributed: row.get(4)?,
        last_updated: row.get(5)?,
    })
}
