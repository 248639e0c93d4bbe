pub mod error;
pub mod stack;

pub use error::*;
pub use stack::{CdnConfig, StackConfig};

use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_PATH_ENV: &str = "ETLFLOW_CONFIG_PATH";
pub const SOURCE_DIR_ENV: &str = "ETLFLOW_SOURCE_DIR";

const CANDIDATES: [&str; 4] = [
    "etlflow.local.yaml",
    ".etlflow.local.yaml",
    "etlflow.yaml",
    ".etlflow.yaml",
];

/// etlflow's global config directory (`~/.config/etlflow`)
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("etlflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the deployment config file
///
/// Search order:
/// 1. `ETLFLOW_CONFIG_PATH`
/// 2. current directory: etlflow.local.yaml, .etlflow.local.yaml, etlflow.yaml, .etlflow.yaml
/// 3. `./.etlflow/`, same order
/// 4. `~/.config/etlflow/etlflow.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".etlflow");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("etlflow").join("etlflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// Load the config from `path`, or from the discovered file.
///
/// With no explicit path and no file anywhere, defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<StackConfig> {
    match path {
        Some(path) => StackConfig::load(path),
        None => match find_config_file() {
            Ok(path) => {
                debug!(path = %path.display(), "Using config file");
                StackConfig::load(&path)
            }
            Err(ConfigError::ConfigFileNotFound) => {
                debug!("No config file found, using defaults");
                Ok(StackConfig::default())
            }
            Err(e) => Err(e),
        },
    }
}

/// Locate the project's `source` directory (the one holding `app_resources`)
///
/// Search order:
/// 1. `ETLFLOW_SOURCE_DIR`
/// 2. `source` next to the active virtualenv (`$VIRTUAL_ENV/../source`)
/// 3. the nearest ancestor of the current directory that is, or contains, a
///    `source` directory with `app_resources` inside
pub fn find_source_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(SOURCE_DIR_ENV) {
        let path = PathBuf::from(dir);
        if path.is_dir() {
            return Ok(path);
        }
    }

    if let Ok(venv) = std::env::var("VIRTUAL_ENV")
        && let Some(parent) = Path::new(&venv).parent()
    {
        let path = parent.join("source");
        if path.is_dir() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    for dir in current_dir.ancestors() {
        if dir.join("app_resources").is_dir() {
            return Ok(dir.to_path_buf());
        }
        let source = dir.join("source");
        if source.join("app_resources").is_dir() {
            return Ok(source);
        }
    }

    Err(ConfigError::SourceDirNotFound)
}
