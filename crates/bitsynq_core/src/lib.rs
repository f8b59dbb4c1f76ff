//! Meeting transcripts in, contribution ratios and token distributions out.

pub mod allocation;
pub mod config;
pub mod db;
pub mod error;
pub mod lexicon;
pub mod matcher;
pub mod parser;
pub mod schema;
pub mod service;
pub mod settlement;

pub use error::{Error, Result};
