//! # cellscore common library
//!
//! Shared code for the cellscore tools:
//! - Error type
//! - TOML configuration loading and resolution
//! - Path templates (`{source}`, `{date}`, `{models}`)

pub mod config;
pub mod error;
pub mod templates;

pub use error::{Error, Result};
