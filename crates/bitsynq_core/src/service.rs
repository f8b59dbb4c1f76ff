//! Preview and run token distributions for a project.
//!
//! Both entry points read the project's contribution shares and go through
//! [`allocate`], so the amounts a preview shows are the amounts a
//! distribution persists for the same ledger state.

use crate::allocation::allocate;
use crate::db::{self, NewDistribution};
use crate::error::{Error, Result};
use crate::schema::{Distribution, DistributionStatus, TokenDistribution};
use crate::settlement::{Settlement, Transfer, is_valid_address, scale_amount};
use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DistributionRequest {
    #[serde(default)]
    pub milestone_name: Option<String>,
    pub total_tokens: u64,
    #[serde(default)]
    pub on_chain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PreviewLine {
    pub user_id: String,
    pub display_name: String,
    pub total_ratio: f64,
    pub percentage: f64,
    pub token_amount: u64,
}

/// The allocation for the current ledger state, without writing anything.
/// Lines are sorted by token amount, largest first.
pub fn preview(
    conn: &Connection,
    project_id: &str,
    actor: &str,
    request: &DistributionRequest,
) -> Result<Vec<PreviewLine>> {
    let distribution = compute(conn, project_id, actor, request)?;
    preview_lines(conn, &distribution)
}

/// Allocate, settle when `on_chain` is requested, then persist.
///
/// A failed settlement returns [`Error::Settlement`] and leaves the ledger
/// untouched. Without `on_chain` the record is written straight away.
pub fn distribute(
    conn: &Connection,
    project_id: &str,
    actor: &str,
    request: &DistributionRequest,
    settlement: Option<&dyn Settlement>,
    decimals: u32,
) -> Result<TokenDistribution> {
    let distribution = compute(conn, project_id, actor, request)?;

    let tx_hash = if request.on_chain {
        let settlement = settlement.ok_or_else(|| {
            Error::Validation("on-chain distribution requires a settlement backend".to_string())
        })?;
        let transfers = transfers(conn, &distribution, decimals)?;
        let tx_hash = settlement.settle(&transfers).map_err(|err| {
            warn!(project_id, error = %err, "settlement failed, nothing recorded");
            Error::Settlement(err.to_string())
        })?;
        info!(project_id, %tx_hash, transfers = transfers.len(), "settled distribution");
        Some(tx_hash)
    } else {
        None
    };

    db::record_distribution(
        conn,
        &NewDistribution {
            project_id,
            milestone_name: request.milestone_name.as_deref(),
            total_tokens: request.total_tokens,
            distribution: &distribution,
            tx_hash: tx_hash.as_deref(),
            status: DistributionStatus::Confirmed,
            created_by: actor,
        },
    )
}

fn compute(
    conn: &Connection,
    project_id: &str,
    actor: &str,
    request: &DistributionRequest,
) -> Result<Distribution> {
    db::require_admin(conn, project_id, actor, "distribute tokens")?;
    if request.total_tokens == 0 {
        return Err(Error::Validation("total_tokens must be positive".to_string()));
    }

    let shares = db::contribution_shares(conn, project_id)?;
    if shares.is_empty() {
        return Err(Error::Validation(
            "no contributions found for this project".to_string(),
        ));
    }
    allocate(&shares, request.total_tokens)
}

fn preview_lines(conn: &Connection, distribution: &Distribution) -> Result<Vec<PreviewLine>> {
    let mut lines = Vec::with_capacity(distribution.len());
    for entry in distribution.values() {
        let display_name = db::get_user(conn, &entry.user_id)
            .map(|user| user.display_name)
            .unwrap_or_else(|_| "Unknown".to_string());
        lines.push(PreviewLine {
            user_id: entry.user_id.clone(),
            display_name,
            total_ratio: entry.total_ratio,
            percentage: entry.percentage,
            token_amount: entry.token_amount,
        });
    }
    lines.sort_by(|a, b| b.token_amount.cmp(&a.token_amount));
    Ok(lines)
}

/// One transfer per recipient; every recipient needs a valid wallet.
fn transfers(conn: &Connection, distribution: &Distribution, decimals: u32) -> Result<Vec<Transfer>> {
    let user_ids: Vec<&str> = distribution.keys().map(String::as_str).collect();
    let wallets: BTreeMap<String, Option<String>> = db::wallet_addresses(conn, &user_ids)?;

    let mut missing = Vec::new();
    let mut transfers = Vec::with_capacity(distribution.len());
    for entry in distribution.values() {
        match wallets.get(&entry.user_id).cloned().flatten() {
            Some(wallet) if is_valid_address(&wallet) => transfers.push(Transfer {
                user_id: entry.user_id.clone(),
                recipient: wallet,
                amount: scale_amount(entry.token_amount, decimals)?,
            }),
            _ => missing.push(entry.user_id.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(Error::Validation(format!(
            "users without a valid wallet address: {}",
            missing.join(", ")
        )));
    }
    Ok(transfers)
}
