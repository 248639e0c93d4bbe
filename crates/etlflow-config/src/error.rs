use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Config file not found. Looked in:\n\
        - current directory: etlflow.local.yaml, .etlflow.local.yaml, etlflow.yaml, .etlflow.yaml\n\
        - ./.etlflow/\n\
        - ~/.config/etlflow/etlflow.yaml\n\
        Set ETLFLOW_CONFIG_PATH to point at a file directly"
    )]
    ConfigFileNotFound,

    #[error(
        "Source directory not found. Set ETLFLOW_SOURCE_DIR, activate the project's \
        virtualenv, or run from inside the project (expected source/app_resources)"
    )]
    SourceDirNotFound,

    #[error("Cannot parse config file {path}\nreason: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
