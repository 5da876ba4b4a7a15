//! Shared types, error model, and configuration for textsift.
//!
//! This crate is the foundation depended on by all other textsift crates.
//! It provides:
//! - [`TextsiftError`]: the unified error type
//! - The record data model ([`Table`], [`Column`], [`Value`], [`ColumnRole`], [`Lang`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod table;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ElasticConfig, KibanaConfig, PipelineConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{Result, TextsiftError};
pub use table::{Column, Table, read_json_lines, write_json_lines};
pub use types::{ColumnRole, Lang, Value};
