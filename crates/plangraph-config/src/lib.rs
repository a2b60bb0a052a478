//! Configuration system for plangraph.
//!
//! Provides TOML-based configuration with:
//! - Data directory location (`data_dir`, `PLANGRAPH_DATA_DIR`)
//! - Semantic search switches (`[search]`)
//! - Embedding provider selection (`[embedding]`, `[embedding.openai]`)
//! - Log filtering and optional JSON log file (`[logging]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, DATA_DIR_ENV, LoadedConfig, load_config, load_config_file,
    load_config_with_options, resolve_data_dir, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
