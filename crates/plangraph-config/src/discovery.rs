//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/plangraph/config.toml` (XDG user config)
//! 2. `<project>/plangraph.toml` (project-local)
//! 3. `PLANGRAPH_DATA_DIR` for the data directory

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{ConfigError, PlangraphConfig, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "plangraph.toml";

/// Default config filename within XDG config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "plangraph";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "PLANGRAPH_CONFIG_DIR";

/// Environment variable to override the data directory.
pub const DATA_DIR_ENV: &str = "PLANGRAPH_DATA_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: PlangraphConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
    /// Layers that existed but could not be loaded.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration by discovering and merging all config layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Load configuration with explicit control over the user config directory.
///
/// `config_dir` overrides both `PLANGRAPH_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = PlangraphConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => xdg_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    debug!(
        loaded = sources.iter().filter(|s| s.loaded).count(),
        "Configuration discovered"
    );

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<PlangraphConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    PlangraphConfig::from_toml(&contents)
}

/// Path of the user config file.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// User config directory: `PLANGRAPH_CONFIG_DIR`, else the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Effective data directory for a project.
///
/// `PLANGRAPH_DATA_DIR` wins; otherwise the configured (or default) data dir,
/// joined onto `project_dir` when relative.
pub fn resolve_data_dir(config: &PlangraphConfig, project_dir: &Path) -> PathBuf {
    let env_dir = std::env::var(DATA_DIR_ENV).ok().filter(|d| !d.is_empty());
    resolve_data_dir_with(config, project_dir, env_dir.as_deref())
}

fn resolve_data_dir_with(
    config: &PlangraphConfig,
    project_dir: &Path,
    env_override: Option<&str>,
) -> PathBuf {
    let dir = env_override
        .map(PathBuf::from)
        .unwrap_or_else(|| config.data_dir());
    if dir.is_absolute() {
        dir
    } else {
        project_dir.join(dir)
    }
}

/// Try to load a config file and merge it into the existing config.
fn load_layer(
    config: &mut PlangraphConfig,
    path: &Path,
    warnings: &mut Vec<String>,
) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable config file");
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
