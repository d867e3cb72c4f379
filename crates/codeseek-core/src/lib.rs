//! Core types, configuration, and error handling for codeseek.
//!
//! This crate provides the shared foundation used by the index crate and the
//! CLI:
//! - [`CodeseekError`]: unified error type using `thiserror`
//! - [`CodeseekConfig`]: configuration loaded from `.codeseek.toml`
//! - Shared types: [`CodeUnit`], [`UnitKind`], [`SearchResult`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{CodeseekConfig, EmbeddingConfig, IndexConfig, SearchConfig};
pub use error::CodeseekError;
pub use types::{content_hash, CodeUnit, OutputFormat, SearchResult, UnitKind};

/// A convenience `Result` type for codeseek operations.
pub type Result<T> = std::result::Result<T, CodeseekError>;
