//! The seam between an allocation and the external token ledger.
//!
//! A settlement receives the whole transfer batch and either returns a
//! single transaction reference or fails; partial success is not a thing
//! callers have to handle. RPC-backed implementations live outside this
//! crate and plug in through [`Settlement`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Why the external ledger did not accept a batch.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct SettlementError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub user_id: String,
    pub recipient: String,
    pub amount: u128, // base units, already scaled by the token decimals
}

pub trait Settlement {
    /// Submit the batch and wait for confirmation; `Ok` carries the tx hash.
    fn settle(&self, transfers: &[Transfer]) -> std::result::Result<String, SettlementError>;
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|ch| ch.is_ascii_hexdigit()))
}

/// Whole tokens to base units, `tokens * 10^decimals`.
pub fn scale_amount(tokens: u64, decimals: u32) -> Result<u128> {
    10u128
        .checked_pow(decimals)
        .and_then(|factor| u128::from(tokens).checked_mul(factor))
        .ok_or_else(|| {
            Error::Validation(format!("{tokens} tokens overflow at {decimals} decimals"))
        })
}

/// Offline settlement: writes the batch as JSON into an outbox directory and
/// returns the SHA-256 of that file as the transaction reference.
pub struct RecordingSettlement {
    outbox_dir: PathBuf,
}

impl RecordingSettlement {
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
        }
    }

    fn write_batch(&self, transfers: &[Transfer]) -> Result<String> {
        fs::create_dir_all(&self.outbox_dir)?;
        let body = serde_json::to_string_pretty(transfers)?;
        let digest = hex::encode(Sha256::digest(body.as_bytes()));
        let tx_hash = format!("0x{digest}");
        fs::write(self.outbox_dir.join(format!("{tx_hash}.json")), body)?;
        info!(%tx_hash, transfers = transfers.len(), "recorded settlement batch");
        Ok(tx_hash)
    }
}

impl Settlement for RecordingSettlement {
    fn settle(&self, transfers: &[Transfer]) -> std::result::Result<String, SettlementError> {
        if transfers.is_empty() {
            return Err(SettlementError("empty transfer batch".to_string()));
        }
        self.write_batch(transfers)
            .map_err(|err| SettlementError(err.to_string()))
    }
}
