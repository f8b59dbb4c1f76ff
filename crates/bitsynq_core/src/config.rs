//! `bitsynq.toml` loading. Every section is optional; a missing file means
//! defaults throughout.

use crate::error::{Error, Result};
use crate::lexicon::Lexicon;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "bitsynq.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub tokens: TokenConfig,
    pub parser: ParserConfig,
    pub settlement: SettlementConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("bitsynq.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub decimals: u32,
    pub symbol: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            decimals: 18,
            symbol: "BTS".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub lexicon_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub outbox_dir: PathBuf,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            outbox_dir: PathBuf::from("settlements"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "bitsynq_core=info,vault=info,bitsynq=info".to_string(),
        }
    }
}

impl Config {
    /// Read `path`, or `bitsynq.toml` in the working directory when `path` is
    /// `None`. Only an explicitly named file has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if required {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            debug!("no {} found, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| Error::Config(err.to_string()))
    }

    /// The configured lexicon, or the built-in one.
    pub fn lexicon(&self) -> Result<Lexicon> {
        match &self.parser.lexicon_path {
            Some(path) => Lexicon::load(path),
            None => Ok(Lexicon::builtin().clone()),
        }
    }
}
